use crate::domain::interval::{FreeSlot, TimeInterval};
use crate::domain::models::{DecisionSource, SchedulingDecision, Task, WorkingWindow};
use crate::infrastructure::completion_client::CompletionClient;
use crate::infrastructure::error::InfraError;
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::Deserialize;
use std::fmt::Write as _;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

type NowProvider = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

const MAX_RECOMMENDED_MINUTES: i64 = 24 * 60;

/// Why the AI path handed over to the heuristic scheduler.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FallbackReason {
    #[error("ai scheduling is disabled")]
    Disabled,
    #[error("no free slots to offer")]
    NoFreeSlots,
    #[error("completion service unavailable: {0}")]
    Unavailable(String),
    #[error("completion timed out after {0}ms")]
    TimedOut(u64),
    #[error("malformed recommendation: {0}")]
    Malformed(String),
    #[error("recommendation outside free slots: {0}")]
    OutOfBounds(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AiOutcome {
    Decided(SchedulingDecision),
    FallbackRequired(FallbackReason),
}

#[derive(Debug, Deserialize)]
struct RawRecommendation {
    start_time: String,
    duration_minutes: i64,
    #[serde(default)]
    reasoning: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recommendation {
    pub start: DateTime<Utc>,
    pub duration_minutes: u32,
    pub reasoning: String,
}

/// Primary slot chooser backed by a completion service. Never errors:
/// every failure becomes `AiOutcome::FallbackRequired`.
pub struct AiScheduler<C>
where
    C: CompletionClient,
{
    client: Option<Arc<C>>,
    window: WorkingWindow,
    timeout: Duration,
    now_provider: NowProvider,
}

impl<C> AiScheduler<C>
where
    C: CompletionClient,
{
    pub fn new(client: Arc<C>, window: WorkingWindow, timeout: Duration) -> Self {
        Self {
            client: Some(client),
            window,
            timeout,
            now_provider: Arc::new(Utc::now),
        }
    }

    pub fn disabled(window: WorkingWindow) -> Self {
        Self {
            client: None,
            window,
            timeout: Duration::ZERO,
            now_provider: Arc::new(Utc::now),
        }
    }

    pub fn with_now_provider(mut self, now_provider: NowProvider) -> Self {
        self.now_provider = now_provider;
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.client.is_some()
    }

    pub async fn choose_ai_slot(
        &self,
        free_slots: &[FreeSlot],
        task: &Task,
        day: NaiveDate,
    ) -> AiOutcome {
        match self.try_choose(free_slots, task, day).await {
            Ok(decision) => AiOutcome::Decided(decision),
            Err(reason) => {
                tracing::warn!(
                    task_id = %task.id,
                    reason = %reason,
                    "ai scheduling degraded to fallback"
                );
                AiOutcome::FallbackRequired(reason)
            }
        }
    }

    async fn try_choose(
        &self,
        free_slots: &[FreeSlot],
        task: &Task,
        day: NaiveDate,
    ) -> Result<SchedulingDecision, FallbackReason> {
        let client = self.client.as_ref().ok_or(FallbackReason::Disabled)?;
        if free_slots.is_empty() {
            return Err(FallbackReason::NoFreeSlots);
        }

        let prompt = build_prompt(task, free_slots, &self.window, day, (self.now_provider)());
        let started = Instant::now();
        let reply = client.complete(&prompt, self.timeout);
        let raw = match tokio::time::timeout(self.timeout, reply).await {
            Ok(Ok(raw)) => raw,
            Ok(Err(InfraError::Timeout { timeout_ms, .. })) => {
                return Err(FallbackReason::TimedOut(timeout_ms));
            }
            Ok(Err(error)) => return Err(FallbackReason::Unavailable(error.to_string())),
            Err(_) => {
                return Err(FallbackReason::TimedOut(
                    u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX),
                ));
            }
        };
        tracing::debug!(
            task_id = %task.id,
            elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            "completion returned"
        );

        let recommendation =
            parse_recommendation(&raw, &self.window, day).map_err(FallbackReason::Malformed)?;
        validate_recommendation(&recommendation, free_slots)?;

        SchedulingDecision::new(
            recommendation.start,
            recommendation.duration_minutes,
            DecisionSource::Ai,
            recommendation.reasoning,
        )
        .map_err(|error| FallbackReason::Malformed(error.to_string()))
    }
}

pub fn build_prompt(
    task: &Task,
    free_slots: &[FreeSlot],
    window: &WorkingWindow,
    day: NaiveDate,
    now: DateTime<Utc>,
) -> String {
    let mut slots = String::new();
    for (index, slot) in free_slots.iter().enumerate() {
        let _ = writeln!(
            slots,
            "{}. {}-{} ({} minutes)",
            index + 1,
            window.local_hhmm(slot.start()),
            window.local_hhmm(slot.end()),
            slot.duration_minutes()
        );
    }
    let local_now = now.with_timezone(&window.timezone);
    let description = task
        .description
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .unwrap_or("No description");

    format!(
        "Schedule one todo item on the user's calendar.\n\
         Todo: {title}\n\
         Description: {description}\n\
         Date: {date} ({timezone})\n\
         Current local time: {now}\n\
         \n\
         Free slots (local time):\n\
         {slots}\
         \n\
         Consider:\n\
         - Work tasks, meetings and focused work fit best in the MORNING (before 12:00).\n\
         - Personal errands, exercise and family tasks fit best in the AFTERNOON (12:00 or later).\n\
         - Estimate how many minutes the task needs from its title and description.\n\
         - The whole task, from start_time to start_time + duration_minutes, must fit inside ONE free slot.\n\
         \n\
         Reply with ONLY this JSON object:\n\
         {{\"start_time\":\"HH:MM\",\"duration_minutes\":<integer>,\"reasoning\":\"<one short sentence>\"}}",
        title = task.title.trim(),
        date = day.format("%A, %B %d, %Y"),
        timezone = window.timezone.name(),
        now = local_now.format("%Y-%m-%d %H:%M"),
    )
}

/// Reads the first `{` .. last `}` of `raw` as a recommendation.
///
/// `start_time` is either `HH:MM` local to `window` on `day`, or RFC 3339.
pub fn parse_recommendation(
    raw: &str,
    window: &WorkingWindow,
    day: NaiveDate,
) -> Result<Recommendation, String> {
    let (Some(open), Some(close)) = (raw.find('{'), raw.rfind('}')) else {
        return Err("response contains no JSON object".to_string());
    };
    if close < open {
        return Err("response contains no JSON object".to_string());
    }
    let parsed: RawRecommendation = serde_json::from_str(&raw[open..=close])
        .map_err(|error| format!("invalid recommendation JSON: {error}"))?;

    let minutes = parsed.duration_minutes;
    if minutes <= 0 || minutes > MAX_RECOMMENDED_MINUTES {
        return Err(format!("duration_minutes {minutes} is out of range"));
    }
    let duration_minutes =
        u32::try_from(minutes).map_err(|_| format!("duration_minutes {minutes} is out of range"))?;

    let start = parse_start_time(parsed.start_time.trim(), window, day)?;
    let reasoning = parsed
        .reasoning
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| "AI selected this time".to_string());

    Ok(Recommendation {
        start,
        duration_minutes,
        reasoning,
    })
}

fn parse_start_time(
    value: &str,
    window: &WorkingWindow,
    day: NaiveDate,
) -> Result<DateTime<Utc>, String> {
    if let Ok(time) = NaiveTime::parse_from_str(value, "%H:%M") {
        return window.at_local(day, time);
    }
    DateTime::parse_from_rfc3339(value)
        .map(|parsed| parsed.with_timezone(&Utc))
        .map_err(|_| format!("start_time '{value}' is neither HH:MM nor RFC 3339"))
}

fn validate_recommendation(
    recommendation: &Recommendation,
    free_slots: &[FreeSlot],
) -> Result<(), FallbackReason> {
    let span = TimeInterval::from_start(recommendation.start, recommendation.duration_minutes)
        .map_err(|error| FallbackReason::Malformed(error.to_string()))?;
    if free_slots.iter().any(|slot| slot.contains(&span)) {
        return Ok(());
    }
    Err(FallbackReason::OutOfBounds(format!(
        "{} for {} minutes",
        recommendation.start.to_rfc3339(),
        recommendation.duration_minutes
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::free_slots::find_free_slots;
    use async_trait::async_trait;
    use chrono_tz::Tz;
    use std::sync::atomic::{AtomicUsize, Ordering};

    enum FakeReply {
        Text(&'static str),
        Fail,
        Hang,
    }

    struct FakeCompletionClient {
        reply: FakeReply,
        calls: AtomicUsize,
    }

    impl FakeCompletionClient {
        fn new(reply: FakeReply) -> Arc<Self> {
            Arc::new(Self {
                reply,
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl CompletionClient for FakeCompletionClient {
        async fn complete(&self, _prompt: &str, _timeout: Duration) -> Result<String, InfraError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.reply {
                FakeReply::Text(text) => Ok(text.to_string()),
                FakeReply::Fail => Err(InfraError::Completion("http 429 quota".to_string())),
                FakeReply::Hang => {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    Ok("{}".to_string())
                }
            }
        }
    }

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 2, 16).expect("valid date")
    }

    fn at(hhmm: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(&format!("2026-02-16T{hhmm}:00Z"))
            .expect("valid datetime")
            .with_timezone(&Utc)
    }

    fn window() -> WorkingWindow {
        WorkingWindow::new(
            NaiveTime::from_hms_opt(9, 0, 0).expect("valid time"),
            NaiveTime::from_hms_opt(18, 0, 0).expect("valid time"),
            Tz::UTC,
        )
        .expect("valid window")
    }

    fn task() -> Task {
        Task {
            id: "tsk-1".to_string(),
            title: "Write report".to_string(),
            description: None,
            date: Some(day()),
            completed: false,
            event_reference: None,
            created_at: at("08:00"),
        }
    }

    fn morning_only() -> Vec<FreeSlot> {
        let busy = TimeInterval::new(at("10:00"), at("18:00")).expect("valid interval");
        find_free_slots(day(), &window(), vec![busy], 15).expect("slots")
    }

    fn scheduler(client: Arc<FakeCompletionClient>) -> AiScheduler<FakeCompletionClient> {
        AiScheduler::new(client, window(), Duration::from_millis(50))
            .with_now_provider(Arc::new(|| at("08:00")))
    }

    #[tokio::test]
    async fn valid_recommendation_is_tagged_ai() {
        let client = FakeCompletionClient::new(FakeReply::Text(
            "Sure! ```json\n{\"start_time\":\"09:15\",\"duration_minutes\":30,\"reasoning\":\"fresh morning\"}\n```",
        ));
        let outcome = scheduler(Arc::clone(&client))
            .choose_ai_slot(&morning_only(), &task(), day())
            .await;

        let decision = match outcome {
            AiOutcome::Decided(decision) => decision,
            other => panic!("expected an AI decision, got {other:?}"),
        };
        assert_eq!(decision.slot_start(), at("09:15"));
        assert_eq!(decision.duration_minutes(), 30);
        assert_eq!(decision.source(), DecisionSource::Ai);
        assert_eq!(decision.reasoning(), "fresh morning");
        assert_eq!(client.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn recommendation_outside_free_slots_requires_fallback() {
        let client = FakeCompletionClient::new(FakeReply::Text(
            r#"{"start_time":"13:30","duration_minutes":30,"reasoning":"after lunch"}"#,
        ));
        let outcome = scheduler(client)
            .choose_ai_slot(&morning_only(), &task(), day())
            .await;
        assert!(matches!(
            outcome,
            AiOutcome::FallbackRequired(FallbackReason::OutOfBounds(_))
        ));
    }

    #[tokio::test]
    async fn recommendation_overrunning_its_slot_requires_fallback() {
        let client = FakeCompletionClient::new(FakeReply::Text(
            r#"{"start_time":"09:45","duration_minutes":30}"#,
        ));
        let outcome = scheduler(client)
            .choose_ai_slot(&morning_only(), &task(), day())
            .await;
        assert!(matches!(
            outcome,
            AiOutcome::FallbackRequired(FallbackReason::OutOfBounds(_))
        ));
    }

    #[tokio::test]
    async fn non_json_reply_requires_fallback() {
        let client = FakeCompletionClient::new(FakeReply::Text("I would suggest the morning."));
        let outcome = scheduler(client)
            .choose_ai_slot(&morning_only(), &task(), day())
            .await;
        assert!(matches!(
            outcome,
            AiOutcome::FallbackRequired(FallbackReason::Malformed(_))
        ));
    }

    #[tokio::test]
    async fn transport_error_and_timeout_require_fallback() {
        let outcome = scheduler(FakeCompletionClient::new(FakeReply::Fail))
            .choose_ai_slot(&morning_only(), &task(), day())
            .await;
        assert!(matches!(
            outcome,
            AiOutcome::FallbackRequired(FallbackReason::Unavailable(_))
        ));

        let outcome = scheduler(FakeCompletionClient::new(FakeReply::Hang))
            .choose_ai_slot(&morning_only(), &task(), day())
            .await;
        assert_eq!(
            outcome,
            AiOutcome::FallbackRequired(FallbackReason::TimedOut(50))
        );
    }

    #[tokio::test]
    async fn disabled_scheduler_never_calls_out() {
        let scheduler = AiScheduler::<FakeCompletionClient>::disabled(window());
        assert!(!scheduler.is_enabled());
        let outcome = scheduler
            .choose_ai_slot(&morning_only(), &task(), day())
            .await;
        assert_eq!(
            outcome,
            AiOutcome::FallbackRequired(FallbackReason::Disabled)
        );
    }

    #[test]
    fn parse_accepts_rfc3339_start() {
        let recommendation = parse_recommendation(
            r#"{"start_time":"2026-02-16T18:30:00+09:00","duration_minutes":45}"#,
            &window(),
            day(),
        )
        .expect("parsed");
        assert_eq!(recommendation.start, at("09:30"));
        assert_eq!(recommendation.reasoning, "AI selected this time");
    }

    #[test]
    fn parse_rejects_missing_fields_and_bad_durations() {
        for raw in [
            r#"{"start_time":"09:00"}"#,
            r#"{"start_time":"09:00","duration_minutes":0}"#,
            r#"{"start_time":"9am","duration_minutes":30}"#,
            "} nothing {",
        ] {
            assert!(
                parse_recommendation(raw, &window(), day()).is_err(),
                "{raw}"
            );
        }
    }

    #[test]
    fn prompt_lists_numbered_local_slots() {
        let prompt = build_prompt(&task(), &morning_only(), &window(), day(), at("08:00"));
        assert!(prompt.contains("Todo: Write report"));
        assert!(prompt.contains("1. 09:00-10:00 (60 minutes)"));
        assert!(prompt.contains("Monday, February 16, 2026"));
        assert!(prompt.contains("Current local time: 2026-02-16 08:00"));
    }
}
