pub mod ai_scheduler;
pub mod bootstrap;
pub mod duration_estimator;
pub mod error;
pub mod free_slots;
pub mod heuristic_scheduler;
pub mod orchestrator;
