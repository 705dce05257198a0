pub mod application;
pub mod domain;
pub mod infrastructure;

pub use application::error::SchedulingError;
pub use application::orchestrator::{SchedulingOrchestrator, SchedulingPolicy};
pub use domain::models::{DecisionSource, ScheduleOutcome, ScheduleResult, SchedulingDecision};
