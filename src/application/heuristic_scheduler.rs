use crate::application::duration_estimator::{tokenize, DurationEstimator};
use crate::application::error::SchedulingError;
use crate::domain::interval::FreeSlot;
use crate::domain::models::{DecisionSource, SchedulingDecision, Task, TaskCategory, WorkingWindow};
use chrono::{DateTime, NaiveDate, Utc};

const WORK_MARKERS: &[&str] = &[
    "work",
    "meeting",
    "call",
    "project",
    "report",
    "email",
    "client",
    "business",
    "review",
    "design",
    "deadline",
    "presentation",
    "interview",
];
const PERSONAL_MARKERS: &[&str] = &[
    "grocery",
    "groceries",
    "shopping",
    "exercise",
    "gym",
    "workout",
    "personal",
    "family",
    "home",
    "errand",
    "doctor",
    "dentist",
    "laundry",
];

pub const NO_FITTING_SLOT: &str = "no slot of sufficient length";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FallbackOutcome {
    Chosen(SchedulingDecision),
    NoSlotAvailable { reason: String },
}

/// Work unless personal markers strictly outnumber work markers.
pub fn classify(title: &str, description: Option<&str>) -> TaskCategory {
    let words = tokenize(title, description);
    let work_hits = WORK_MARKERS
        .iter()
        .filter(|marker| words.iter().any(|word| word == *marker))
        .count();
    let personal_hits = PERSONAL_MARKERS
        .iter()
        .filter(|marker| words.iter().any(|word| word == *marker))
        .count();
    if personal_hits > work_hits {
        TaskCategory::Personal
    } else {
        TaskCategory::Work
    }
}

/// Deterministic, I/O-free slot chooser used whenever the AI path degrades.
#[derive(Debug, Clone, Copy)]
pub struct HeuristicScheduler {
    window: WorkingWindow,
    estimator: DurationEstimator,
}

impl HeuristicScheduler {
    pub fn new(window: WorkingWindow, estimator: DurationEstimator) -> Self {
        Self { window, estimator }
    }

    pub fn choose_fallback_slot(
        &self,
        free_slots: &[FreeSlot],
        task: &Task,
        day: NaiveDate,
    ) -> Result<FallbackOutcome, SchedulingError> {
        let description = task.description.as_deref();
        let category = classify(&task.title, description);
        let duration = self.estimator.estimate(&task.title, description);
        let midday = self
            .window
            .midday(day)
            .map_err(SchedulingError::InvalidInput)?;

        let Some(slot) = rank_slots(free_slots, category, midday)
            .into_iter()
            .find(|slot| slot.fits(duration))
        else {
            tracing::info!(
                task_id = %task.id,
                category = category.as_str(),
                duration_minutes = duration,
                "fallback found no fitting slot"
            );
            return Ok(FallbackOutcome::NoSlotAvailable {
                reason: NO_FITTING_SLOT.to_string(),
            });
        };

        let part_of_day = if slot.start() < midday {
            "morning"
        } else {
            "afternoon"
        };
        let reasoning = format!(
            "{} task needs about {duration} minutes; earliest preferred {part_of_day} slot at {}",
            category.as_str(),
            self.window.local_hhmm(slot.start())
        );
        let decision =
            SchedulingDecision::new(slot.start(), duration, DecisionSource::Fallback, reasoning)?;
        Ok(FallbackOutcome::Chosen(decision))
    }
}

/// Preferred half of the day first, earlier first within each half.
fn rank_slots(
    free_slots: &[FreeSlot],
    category: TaskCategory,
    midday: DateTime<Utc>,
) -> Vec<FreeSlot> {
    let mut ranked = free_slots.to_vec();
    ranked.sort_by_key(|slot| {
        let is_morning = slot.start() < midday;
        let preferred = match category {
            TaskCategory::Work => is_morning,
            TaskCategory::Personal => !is_morning,
        };
        (!preferred, slot.start())
    });
    ranked
}
