use crate::domain::interval::{IntervalError, TimeInterval};
use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Task {
    pub id: String,
    pub title: String,
    pub description: Option<String>,
    pub date: Option<NaiveDate>,
    pub completed: bool,
    pub event_reference: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Task {
    pub fn validate(&self) -> Result<(), String> {
        validate_non_empty(&self.id, "task.id")?;
        validate_non_empty(&self.title, "task.title")?;
        if let Some(reference) = self.event_reference.as_deref() {
            validate_non_empty(reference, "task.event_reference")?;
        }
        Ok(())
    }

    pub fn is_scheduled(&self) -> bool {
        self.scheduled_event().is_some()
    }

    /// The recorded calendar event, ignoring blank references.
    pub fn scheduled_event(&self) -> Option<&str> {
        self.event_reference
            .as_deref()
            .map(str::trim)
            .filter(|reference| !reference.is_empty())
    }

    /// Title and description joined, as scanned by the keyword heuristics.
    pub fn text(&self) -> String {
        match self.description.as_deref().map(str::trim) {
            Some(description) if !description.is_empty() => {
                format!("{} {}", self.title.trim(), description)
            }
            _ => self.title.trim().to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TaskCategory {
    Work,
    Personal,
}

impl TaskCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Work => "work",
            Self::Personal => "personal",
        }
    }
}

/// Daily schedulable range, in local time of `timezone`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkingWindow {
    pub start: NaiveTime,
    pub end: NaiveTime,
    pub timezone: Tz,
}

impl WorkingWindow {
    pub fn new(start: NaiveTime, end: NaiveTime, timezone: Tz) -> Result<Self, String> {
        let window = Self {
            start,
            end,
            timezone,
        };
        window.validate()?;
        Ok(window)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.end <= self.start {
            return Err("working_window.end must be after working_window.start".to_string());
        }
        Ok(())
    }

    pub fn anchor(&self, day: NaiveDate) -> Result<TimeInterval, String> {
        let start = self.at_local(day, self.start)?;
        let end = self.at_local(day, self.end)?;
        TimeInterval::new(start, end).map_err(|error| error.to_string())
    }

    /// Local midnight to the following midnight.
    pub fn day_bounds(&self, day: NaiveDate) -> Result<TimeInterval, String> {
        let next = day
            .succ_opt()
            .ok_or_else(|| format!("no day follows {day}"))?;
        let midnight = NaiveTime::from_hms_opt(0, 0, 0).ok_or("invalid midnight")?;
        let start = self.at_local(day, midnight)?;
        let end = self.at_local(next, midnight)?;
        TimeInterval::new(start, end).map_err(|error| error.to_string())
    }

    pub fn midday(&self, day: NaiveDate) -> Result<DateTime<Utc>, String> {
        let noon = NaiveTime::from_hms_opt(12, 0, 0).ok_or("invalid midday")?;
        self.at_local(day, noon)
    }

    pub fn at_local(&self, day: NaiveDate, time: NaiveTime) -> Result<DateTime<Utc>, String> {
        resolve_local(self.timezone, day.and_time(time)).ok_or_else(|| {
            format!(
                "local time {day} {time} cannot be resolved in {}",
                self.timezone.name()
            )
        })
    }

    pub fn local_hhmm(&self, instant: DateTime<Utc>) -> String {
        instant
            .with_timezone(&self.timezone)
            .format("%H:%M")
            .to_string()
    }
}

/// Longest run of skipped wall-clock time searched past a DST jump.
const MAX_GAP_MINUTES: u32 = 24 * 60;

/// Resolves a wall-clock time in `timezone`.
///
/// Repeated times take the earlier instant. Times skipped by a DST jump move
/// to the first instant after the gap, so zones that jump at midnight still
/// have a start of day.
pub fn resolve_local(timezone: Tz, local: NaiveDateTime) -> Option<DateTime<Utc>> {
    let mut candidate = local;
    for _ in 0..=MAX_GAP_MINUTES {
        if let Some(value) = timezone.from_local_datetime(&candidate).earliest() {
            return Some(value.with_timezone(&Utc));
        }
        candidate = candidate.checked_add_signed(Duration::minutes(1))?;
    }
    None
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DecisionSource {
    Ai,
    Fallback,
}

impl DecisionSource {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ai => "ai",
            Self::Fallback => "fallback",
        }
    }
}

/// Where one task goes. Built once per attempt and never mutated.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct SchedulingDecision {
    #[serde(skip)]
    interval: TimeInterval,
    slot_start: DateTime<Utc>,
    duration_minutes: u32,
    source: DecisionSource,
    reasoning: String,
}

impl SchedulingDecision {
    pub fn new(
        slot_start: DateTime<Utc>,
        duration_minutes: u32,
        source: DecisionSource,
        reasoning: impl Into<String>,
    ) -> Result<Self, IntervalError> {
        let interval = TimeInterval::from_start(slot_start, duration_minutes)?;
        Ok(Self {
            interval,
            slot_start,
            duration_minutes,
            source,
            reasoning: reasoning.into(),
        })
    }

    pub fn slot_start(&self) -> DateTime<Utc> {
        self.slot_start
    }

    pub fn slot_end(&self) -> DateTime<Utc> {
        self.interval.end()
    }

    pub fn duration_minutes(&self) -> u32 {
        self.duration_minutes
    }

    pub fn source(&self) -> DecisionSource {
        self.source
    }

    pub fn reasoning(&self) -> &str {
        &self.reasoning
    }

    pub fn interval(&self) -> &TimeInterval {
        &self.interval
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ScheduleResult {
    pub decision: SchedulingDecision,
    pub event_reference: String,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ScheduleOutcome {
    Scheduled(ScheduleResult),
    NoSlotAvailable { reason: String },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OAuthToken {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: DateTime<Utc>,
    pub token_type: String,
    pub scope: Option<String>,
}

impl OAuthToken {
    pub fn is_valid_at(&self, now: DateTime<Utc>, leeway_seconds: i64) -> bool {
        self.expires_at > now + Duration::seconds(leeway_seconds)
            && !self.access_token.trim().is_empty()
    }
}

fn validate_non_empty(value: &str, field_name: &str) -> Result<(), String> {
    if value.trim().is_empty() {
        return Err(format!("{field_name} must not be empty"));
    }
    Ok(())
}
