use crate::domain::interval::TimeInterval;
use crate::domain::models::resolve_local;
use crate::infrastructure::error::InfraError;
use chrono::{DateTime, NaiveDate, Utc};
use chrono_tz::Tz;
use std::collections::HashMap;

const KEY_TASK_ID: &str = "todo_task_id";
const DEFAULT_DESCRIPTION: &str = "Todo item";

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq, Eq, Default)]
pub struct CalendarEventDateTime {
    #[serde(rename = "dateTime", skip_serializing_if = "Option::is_none")]
    pub date_time: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    #[serde(rename = "timeZone", skip_serializing_if = "Option::is_none")]
    pub time_zone: Option<String>,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq, Eq, Default)]
pub struct CalendarEventExtendedProperties {
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub private: HashMap<String, String>,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
pub struct CalendarEventReminders {
    #[serde(rename = "useDefault")]
    pub use_default: bool,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
pub struct GoogleCalendarEvent {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transparency: Option<String>,
    pub start: CalendarEventDateTime,
    pub end: CalendarEventDateTime,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reminders: Option<CalendarEventReminders>,
    #[serde(rename = "extendedProperties", skip_serializing_if = "Option::is_none")]
    pub extended_properties: Option<CalendarEventExtendedProperties>,
}

/// Event the calendar collaborator is asked to create for a scheduled task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewCalendarEvent {
    pub task_id: String,
    pub title: String,
    pub description: Option<String>,
    pub start: DateTime<Utc>,
    pub duration_minutes: u32,
}

pub fn encode_todo_event(
    event: &NewCalendarEvent,
    summary_prefix: &str,
    timezone: Tz,
) -> Result<GoogleCalendarEvent, InfraError> {
    let interval = TimeInterval::from_start(event.start, event.duration_minutes)
        .map_err(|error| InfraError::CalendarApi(format!("invalid event span: {error}")))?;

    let mut private = HashMap::new();
    private.insert(KEY_TASK_ID.to_string(), event.task_id.clone());

    let description = event
        .description
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .unwrap_or(DEFAULT_DESCRIPTION);

    Ok(GoogleCalendarEvent {
        id: None,
        summary: Some(format!("{summary_prefix}{}", event.title.trim())),
        description: Some(description.to_string()),
        status: Some("confirmed".to_string()),
        transparency: None,
        start: local_date_time(interval.start(), timezone),
        end: local_date_time(interval.end(), timezone),
        reminders: Some(CalendarEventReminders { use_default: true }),
        extended_properties: Some(CalendarEventExtendedProperties { private }),
    })
}

fn local_date_time(instant: DateTime<Utc>, timezone: Tz) -> CalendarEventDateTime {
    CalendarEventDateTime {
        date_time: Some(instant.with_timezone(&timezone).to_rfc3339()),
        date: None,
        time_zone: Some(timezone.name().to_string()),
    }
}

pub fn decode_task_id(event: &GoogleCalendarEvent) -> Option<String> {
    event
        .extended_properties
        .as_ref()
        .and_then(|properties| properties.private.get(KEY_TASK_ID))
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// Span of `event` inside `day`, or `None` when it does not block time there.
///
/// Cancelled and transparent ("free") events never block. All-day events
/// block every date they cover, interpreted in `timezone`.
pub fn busy_interval(
    event: &GoogleCalendarEvent,
    day: &TimeInterval,
    timezone: Tz,
) -> Result<Option<TimeInterval>, InfraError> {
    let is_cancelled = event
        .status
        .as_deref()
        .map(|status| status.eq_ignore_ascii_case("cancelled"))
        .unwrap_or(false);
    let is_transparent = event
        .transparency
        .as_deref()
        .map(|value| value.eq_ignore_ascii_case("transparent"))
        .unwrap_or(false);
    if is_cancelled || is_transparent {
        return Ok(None);
    }

    let start = resolve_boundary(&event.start, "start", timezone)?;
    let end = resolve_boundary(&event.end, "end", timezone)?;
    if end <= start {
        return Ok(None);
    }
    let interval = TimeInterval::new(start, end)
        .map_err(|error| InfraError::CalendarApi(format!("invalid calendar event span: {error}")))?;
    Ok(interval.clip_to(day))
}

fn resolve_boundary(
    value: &CalendarEventDateTime,
    field_name: &str,
    timezone: Tz,
) -> Result<DateTime<Utc>, InfraError> {
    if let Some(raw) = value.date_time.as_deref() {
        return DateTime::parse_from_rfc3339(raw)
            .map(|parsed| parsed.with_timezone(&Utc))
            .map_err(|error| {
                InfraError::CalendarApi(format!(
                    "invalid calendar event {field_name}.dateTime '{raw}': {error}"
                ))
            });
    }
    if let Some(raw) = value.date.as_deref() {
        let date = NaiveDate::parse_from_str(raw, "%Y-%m-%d").map_err(|error| {
            InfraError::CalendarApi(format!(
                "invalid calendar event {field_name}.date '{raw}': {error}"
            ))
        })?;
        let midnight = date.and_hms_opt(0, 0, 0).ok_or_else(|| {
            InfraError::CalendarApi(format!("invalid calendar event {field_name}.date '{raw}'"))
        })?;
        return resolve_local(timezone, midnight).ok_or_else(|| {
            InfraError::CalendarApi(format!(
                "calendar event {field_name}.date '{raw}' has no start of day in {}",
                timezone.name()
            ))
        });
    }
    Err(InfraError::CalendarApi(format!(
        "calendar event {field_name} has neither dateTime nor date"
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixed_time(value: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(value)
            .expect("valid datetime")
            .with_timezone(&Utc)
    }

    fn day() -> TimeInterval {
        TimeInterval::new(
            fixed_time("2026-02-16T00:00:00Z"),
            fixed_time("2026-02-17T00:00:00Z"),
        )
        .expect("valid day")
    }

    fn timed_event(start: &str, end: &str) -> GoogleCalendarEvent {
        GoogleCalendarEvent {
            id: Some("evt-1".to_string()),
            summary: Some("Standup".to_string()),
            description: None,
            status: Some("confirmed".to_string()),
            transparency: None,
            start: CalendarEventDateTime {
                date_time: Some(start.to_string()),
                ..CalendarEventDateTime::default()
            },
            end: CalendarEventDateTime {
                date_time: Some(end.to_string()),
                ..CalendarEventDateTime::default()
            },
            reminders: None,
            extended_properties: None,
        }
    }

    #[test]
    fn timed_event_maps_to_utc_interval() {
        let event = timed_event("2026-02-16T10:00:00+01:00", "2026-02-16T11:30:00+01:00");
        let interval = busy_interval(&event, &day(), Tz::UTC)
            .expect("decode")
            .expect("busy");
        assert_eq!(interval.start(), fixed_time("2026-02-16T09:00:00Z"));
        assert_eq!(interval.duration_minutes(), 90);
    }

    #[test]
    fn event_crossing_midnight_is_clipped_to_the_day() {
        let event = timed_event("2026-02-16T23:00:00Z", "2026-02-17T01:00:00Z");
        let interval = busy_interval(&event, &day(), Tz::UTC)
            .expect("decode")
            .expect("busy");
        assert_eq!(interval.end(), fixed_time("2026-02-17T00:00:00Z"));
    }

    #[test]
    fn cancelled_and_transparent_events_are_not_busy() {
        let mut cancelled = timed_event("2026-02-16T10:00:00Z", "2026-02-16T11:00:00Z");
        cancelled.status = Some("cancelled".to_string());
        let decoded = busy_interval(&cancelled, &day(), Tz::UTC).expect("decode");
        assert!(decoded.is_none());

        let mut transparent = timed_event("2026-02-16T10:00:00Z", "2026-02-16T11:00:00Z");
        transparent.transparency = Some("transparent".to_string());
        let decoded = busy_interval(&transparent, &day(), Tz::UTC).expect("decode");
        assert!(decoded.is_none());
    }

    #[test]
    fn all_day_event_blocks_the_whole_day() {
        let mut event = timed_event("", "");
        event.start = CalendarEventDateTime {
            date: Some("2026-02-16".to_string()),
            ..CalendarEventDateTime::default()
        };
        event.end = CalendarEventDateTime {
            date: Some("2026-02-17".to_string()),
            ..CalendarEventDateTime::default()
        };
        let interval = busy_interval(&event, &day(), Tz::UTC)
            .expect("decode")
            .expect("busy");
        assert_eq!(interval, day());
    }

    #[test]
    fn all_day_event_on_a_dst_gap_day_starts_after_the_jump() {
        let santiago = chrono_tz::America::Santiago;
        let mut event = timed_event("", "");
        event.start = CalendarEventDateTime {
            date: Some("2026-09-06".to_string()),
            ..CalendarEventDateTime::default()
        };
        event.end = CalendarEventDateTime {
            date: Some("2026-09-07".to_string()),
            ..CalendarEventDateTime::default()
        };
        let gap_day = TimeInterval::new(
            fixed_time("2026-09-06T04:00:00Z"),
            fixed_time("2026-09-07T03:00:00Z"),
        )
        .expect("valid day");

        let interval = busy_interval(&event, &gap_day, santiago)
            .expect("decode")
            .expect("busy");
        assert_eq!(interval, gap_day);
    }

    #[test]
    fn invalid_datetime_is_an_error() {
        let event = timed_event("not-a-time", "2026-02-16T11:00:00Z");
        assert!(busy_interval(&event, &day(), Tz::UTC).is_err());
    }

    #[test]
    fn encoded_event_uses_local_time_and_carries_task_id() {
        let new_event = NewCalendarEvent {
            task_id: "tsk-9".to_string(),
            title: " Write report ".to_string(),
            description: None,
            start: fixed_time("2026-02-16T00:00:00Z"),
            duration_minutes: 45,
        };
        let encoded =
            encode_todo_event(&new_event, "📝 ", chrono_tz::Asia::Tokyo).expect("encode");

        assert_eq!(encoded.summary.as_deref(), Some("📝 Write report"));
        assert_eq!(encoded.description.as_deref(), Some("Todo item"));
        assert_eq!(
            encoded.start.date_time.as_deref(),
            Some("2026-02-16T09:00:00+09:00")
        );
        assert_eq!(
            encoded.end.date_time.as_deref(),
            Some("2026-02-16T09:45:00+09:00")
        );
        assert_eq!(encoded.start.time_zone.as_deref(), Some("Asia/Tokyo"));
        assert_eq!(decode_task_id(&encoded).as_deref(), Some("tsk-9"));

        let payload = serde_json::to_value(&encoded).expect("serialize");
        assert!(payload["start"].get("date").is_none());
        assert_eq!(payload["reminders"]["useDefault"], true);
    }
}
