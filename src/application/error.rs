use crate::domain::interval::IntervalError;
use crate::infrastructure::error::InfraError;
use thiserror::Error;

/// Failures surfaced to callers of the scheduling engine.
///
/// "No slot available" and AI degradation are not errors and never appear here.
#[derive(Debug, Error)]
pub enum SchedulingError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("task not found: {0}")]
    NotFound(String),
    #[error("task {task_id} is already scheduled as event {event_reference}")]
    AlreadyScheduled {
        task_id: String,
        event_reference: String,
    },
    #[error("calendar unavailable: {0}")]
    CalendarUnavailable(InfraError),
    #[error("calendar write failed: {0}")]
    CalendarWriteFailed(InfraError),
    #[error(
        "event {event_id} was created for task {task_id} but the task could not be updated: {reason}"
    )]
    PartialScheduleFailure {
        task_id: String,
        event_id: String,
        reason: String,
    },
    #[error("storage error: {0}")]
    Storage(InfraError),
}

impl SchedulingError {
    /// Resource failures worth retrying later without changing input.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::CalendarUnavailable(_)
                | Self::CalendarWriteFailed(_)
                | Self::PartialScheduleFailure { .. }
                | Self::Storage(_)
        )
    }
}

impl From<IntervalError> for SchedulingError {
    fn from(error: IntervalError) -> Self {
        Self::InvalidInput(error.to_string())
    }
}
