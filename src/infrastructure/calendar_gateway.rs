use crate::domain::interval::TimeInterval;
use crate::infrastructure::credential_store::AccessTokenProvider;
use crate::infrastructure::error::InfraError;
use crate::infrastructure::event_mapper::{busy_interval, decode_task_id, encode_todo_event};
use crate::infrastructure::google_calendar_client::{GoogleCalendarClient, ListEventsRequest};
use async_trait::async_trait;
use chrono_tz::Tz;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

pub use crate::infrastructure::event_mapper::NewCalendarEvent;

/// Calendar collaborator consumed by the scheduling engine.
#[async_trait]
pub trait CalendarGateway: Send + Sync {
    /// Busy spans overlapping `day`, clipped to it. Order is not guaranteed.
    async fn busy_intervals(&self, day: &TimeInterval) -> Result<Vec<TimeInterval>, InfraError>;

    async fn create_event(&self, event: &NewCalendarEvent) -> Result<String, InfraError>;

    async fn delete_event(&self, event_id: &str) -> Result<(), InfraError>;
}

pub struct GoogleCalendarGateway<C, T>
where
    C: GoogleCalendarClient,
    T: AccessTokenProvider + ?Sized,
{
    client: Arc<C>,
    tokens: Arc<T>,
    calendar_id: String,
    timezone: Tz,
    summary_prefix: String,
    timeout: Duration,
}

impl<C, T> GoogleCalendarGateway<C, T>
where
    C: GoogleCalendarClient,
    T: AccessTokenProvider + ?Sized,
{
    pub fn new(
        client: Arc<C>,
        tokens: Arc<T>,
        calendar_id: impl Into<String>,
        timezone: Tz,
        timeout: Duration,
    ) -> Self {
        Self {
            client,
            tokens,
            calendar_id: calendar_id.into(),
            timezone,
            summary_prefix: String::new(),
            timeout,
        }
    }

    pub fn with_summary_prefix(mut self, summary_prefix: impl Into<String>) -> Self {
        self.summary_prefix = summary_prefix.into();
        self
    }

    async fn bounded<F, R>(&self, operation: &str, future: F) -> Result<R, InfraError>
    where
        F: Future<Output = Result<R, InfraError>> + Send,
    {
        match tokio::time::timeout(self.timeout, future).await {
            Ok(result) => result,
            Err(_) => Err(InfraError::Timeout {
                operation: operation.to_string(),
                timeout_ms: u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX),
            }),
        }
    }
}

#[async_trait]
impl<C, T> CalendarGateway for GoogleCalendarGateway<C, T>
where
    C: GoogleCalendarClient,
    T: AccessTokenProvider + ?Sized,
{
    async fn busy_intervals(&self, day: &TimeInterval) -> Result<Vec<TimeInterval>, InfraError> {
        let access_token = self.tokens.access_token()?;
        let request = ListEventsRequest {
            time_min: day.start(),
            time_max: day.end(),
        };
        let events = self
            .bounded(
                "calendar events list",
                self.client
                    .list_events(&access_token, &self.calendar_id, request),
            )
            .await?;

        let mut intervals = Vec::with_capacity(events.len());
        let mut todo_events = 0;
        for event in &events {
            if decode_task_id(event).is_some() {
                todo_events += 1;
            }
            if let Some(interval) = busy_interval(event, day, self.timezone)? {
                intervals.push(interval);
            }
        }
        tracing::debug!(
            calendar_id = %self.calendar_id,
            events = events.len(),
            todo_events,
            busy = intervals.len(),
            "loaded busy intervals"
        );
        Ok(intervals)
    }

    async fn create_event(&self, event: &NewCalendarEvent) -> Result<String, InfraError> {
        let access_token = self.tokens.access_token()?;
        let payload = encode_todo_event(event, &self.summary_prefix, self.timezone)?;
        self.bounded(
            "calendar event create",
            self.client
                .create_event(&access_token, &self.calendar_id, &payload),
        )
        .await
    }

    async fn delete_event(&self, event_id: &str) -> Result<(), InfraError> {
        let access_token = self.tokens.access_token()?;
        self.bounded(
            "calendar event delete",
            self.client
                .delete_event(&access_token, &self.calendar_id, event_id),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::credential_store::StaticAccessTokenProvider;
    use crate::infrastructure::event_mapper::{CalendarEventDateTime, GoogleCalendarEvent};
    use chrono::{DateTime, Utc};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct FakeGoogleCalendarClient {
        events: Vec<GoogleCalendarEvent>,
        delay: Duration,
        list_calls: AtomicUsize,
        created: Mutex<Vec<GoogleCalendarEvent>>,
        deleted: Mutex<Vec<String>>,
    }

    impl FakeGoogleCalendarClient {
        fn with_events(events: Vec<GoogleCalendarEvent>) -> Self {
            Self {
                events,
                delay: Duration::ZERO,
                list_calls: AtomicUsize::new(0),
                created: Mutex::new(Vec::new()),
                deleted: Mutex::new(Vec::new()),
            }
        }

        fn slow(delay: Duration) -> Self {
            Self {
                delay,
                ..Self::with_events(Vec::new())
            }
        }
    }

    #[async_trait]
    impl GoogleCalendarClient for FakeGoogleCalendarClient {
        async fn list_events(
            &self,
            access_token: &str,
            _calendar_id: &str,
            _request: ListEventsRequest,
        ) -> Result<Vec<GoogleCalendarEvent>, InfraError> {
            assert_eq!(access_token, "token");
            self.list_calls.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            Ok(self.events.clone())
        }

        async fn create_event(
            &self,
            _access_token: &str,
            _calendar_id: &str,
            event: &GoogleCalendarEvent,
        ) -> Result<String, InfraError> {
            self.created
                .lock()
                .expect("created lock poisoned")
                .push(event.clone());
            Ok("evt-created".to_string())
        }

        async fn delete_event(
            &self,
            _access_token: &str,
            _calendar_id: &str,
            event_id: &str,
        ) -> Result<(), InfraError> {
            self.deleted
                .lock()
                .expect("deleted lock poisoned")
                .push(event_id.to_string());
            Ok(())
        }
    }

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

    fn event(start: &str, end: &str, status: &str) -> GoogleCalendarEvent {
        GoogleCalendarEvent {
            id: Some(format!("evt-{start}")),
            summary: Some("busy".to_string()),
            description: None,
            status: Some(status.to_string()),
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

    fn gateway(
        client: Arc<FakeGoogleCalendarClient>,
        timeout: Duration,
    ) -> GoogleCalendarGateway<FakeGoogleCalendarClient, StaticAccessTokenProvider> {
        GoogleCalendarGateway::new(
            client,
            Arc::new(StaticAccessTokenProvider::new("token")),
            "primary",
            Tz::UTC,
            timeout,
        )
        .with_summary_prefix("📝 ")
    }

    #[tokio::test]
    async fn busy_intervals_skip_cancelled_events() {
        let client = Arc::new(FakeGoogleCalendarClient::with_events(vec![
            event("2026-02-16T10:00:00Z", "2026-02-16T11:00:00Z", "confirmed"),
            event("2026-02-16T12:00:00Z", "2026-02-16T13:00:00Z", "cancelled"),
        ]));
        let intervals = gateway(Arc::clone(&client), Duration::from_secs(1))
            .busy_intervals(&day())
            .await
            .expect("busy intervals");

        assert_eq!(intervals.len(), 1);
        assert_eq!(intervals[0].start(), fixed_time("2026-02-16T10:00:00Z"));
        assert_eq!(client.list_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn slow_calendar_is_reported_as_timeout() {
        let client = Arc::new(FakeGoogleCalendarClient::slow(Duration::from_millis(500)));
        let result = gateway(client, Duration::from_millis(20))
            .busy_intervals(&day())
            .await;
        assert!(matches!(
            result,
            Err(InfraError::Timeout { timeout_ms: 20, .. })
        ));
    }

    #[tokio::test]
    async fn create_event_encodes_prefix_and_task_id() {
        let client = Arc::new(FakeGoogleCalendarClient::with_events(Vec::new()));
        let event_id = gateway(Arc::clone(&client), Duration::from_secs(1))
            .create_event(&NewCalendarEvent {
                task_id: "tsk-1".to_string(),
                title: "Gym".to_string(),
                description: Some("legs".to_string()),
                start: fixed_time("2026-02-16T15:00:00Z"),
                duration_minutes: 60,
            })
            .await
            .expect("created");

        assert_eq!(event_id, "evt-created");
        let created = client.created.lock().expect("created lock poisoned");
        assert_eq!(created[0].summary.as_deref(), Some("📝 Gym"));
        assert_eq!(decode_task_id(&created[0]).as_deref(), Some("tsk-1"));
    }

    #[tokio::test]
    async fn blank_token_fails_before_calling_calendar() {
        let client = Arc::new(FakeGoogleCalendarClient::with_events(Vec::new()));
        let gateway = GoogleCalendarGateway::new(
            Arc::clone(&client),
            Arc::new(StaticAccessTokenProvider::new("")),
            "primary",
            Tz::UTC,
            Duration::from_secs(1),
        );
        let result = gateway.busy_intervals(&day()).await;
        assert!(matches!(result, Err(InfraError::Credential(_))));
        assert_eq!(client.list_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn delete_event_reaches_client() {
        let client = Arc::new(FakeGoogleCalendarClient::with_events(Vec::new()));
        gateway(Arc::clone(&client), Duration::from_secs(1))
            .delete_event("evt-9")
            .await
            .expect("deleted");
        let deleted = client.deleted.lock().expect("deleted lock poisoned");
        assert_eq!(deleted.as_slice(), ["evt-9".to_string()]);
    }
}
