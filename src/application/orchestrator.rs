use crate::application::ai_scheduler::{AiOutcome, AiScheduler};
use crate::application::error::SchedulingError;
use crate::application::free_slots::{discard_elapsed, find_free_slots};
use crate::application::heuristic_scheduler::{FallbackOutcome, HeuristicScheduler};
use crate::domain::interval::FreeSlot;
use crate::domain::models::{
    ScheduleOutcome, ScheduleResult, SchedulingDecision, Task, WorkingWindow,
};
use crate::infrastructure::calendar_gateway::{CalendarGateway, NewCalendarEvent};
use crate::infrastructure::completion_client::CompletionClient;
use crate::infrastructure::task_repository::{EventReferenceUpdate, TaskRepository};
use chrono::{DateTime, NaiveDate, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

type NowProvider = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;
type TaskLocks = Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>;

pub const NO_FREE_TIME: &str = "no free time in the working window";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulingPolicy {
    pub min_slot_minutes: u32,
    pub skip_elapsed_slots: bool,
}

impl Default for SchedulingPolicy {
    fn default() -> Self {
        Self {
            min_slot_minutes: 15,
            skip_elapsed_slots: true,
        }
    }
}

pub struct SchedulingOrchestrator<R, G, C>
where
    R: TaskRepository,
    G: CalendarGateway,
    C: CompletionClient,
{
    tasks: Arc<R>,
    calendar: Arc<G>,
    ai: AiScheduler<C>,
    fallback: HeuristicScheduler,
    window: WorkingWindow,
    policy: SchedulingPolicy,
    task_locks: TaskLocks,
    now_provider: NowProvider,
}

impl<R, G, C> SchedulingOrchestrator<R, G, C>
where
    R: TaskRepository,
    G: CalendarGateway,
    C: CompletionClient,
{
    pub fn new(
        tasks: Arc<R>,
        calendar: Arc<G>,
        ai: AiScheduler<C>,
        fallback: HeuristicScheduler,
        window: WorkingWindow,
    ) -> Self {
        Self {
            tasks,
            calendar,
            ai,
            fallback,
            window,
            policy: SchedulingPolicy::default(),
            task_locks: Mutex::new(HashMap::new()),
            now_provider: Arc::new(Utc::now),
        }
    }

    pub fn with_policy(mut self, policy: SchedulingPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_now_provider(mut self, now_provider: NowProvider) -> Self {
        self.now_provider = now_provider;
        self
    }

    /// Free slots of `day` as the schedulers see them.
    pub async fn free_slots(&self, day: NaiveDate) -> Result<Vec<FreeSlot>, SchedulingError> {
        let day_range = self
            .window
            .day_bounds(day)
            .map_err(SchedulingError::InvalidInput)?;
        let busy = self
            .calendar
            .busy_intervals(&day_range)
            .await
            .map_err(SchedulingError::CalendarUnavailable)?;

        let slots = find_free_slots(day, &self.window, busy, self.policy.min_slot_minutes)?;
        if !self.policy.skip_elapsed_slots {
            return Ok(slots);
        }
        Ok(discard_elapsed(
            slots,
            (self.now_provider)(),
            self.policy.min_slot_minutes,
        ))
    }

    pub async fn schedule_task(
        &self,
        task_id: &str,
        day: NaiveDate,
    ) -> Result<ScheduleOutcome, SchedulingError> {
        let task_id = ensure_task_id(task_id)?;
        let entry = self.task_lock(task_id);
        let _held = entry.lock.lock().await;
        self.schedule_locked(task_id, day).await
    }

    /// Retries only the task update after a `PartialScheduleFailure`.
    /// The calendar is never touched, so no duplicate event can appear.
    pub async fn complete_partial_schedule(
        &self,
        task_id: &str,
        event_id: &str,
    ) -> Result<String, SchedulingError> {
        let task_id = ensure_task_id(task_id)?;
        let event_id = event_id.trim();
        if event_id.is_empty() {
            return Err(SchedulingError::InvalidInput(
                "event id must not be empty".to_string(),
            ));
        }

        let entry = self.task_lock(task_id);
        let _held = entry.lock.lock().await;
        self.record_event_reference(task_id, event_id)
    }

    /// Deletes the task's calendar event and clears its reference.
    ///
    /// Returns the removed event id, or `None` when the task had no event.
    pub async fn unschedule_task(&self, task_id: &str) -> Result<Option<String>, SchedulingError> {
        let task_id = ensure_task_id(task_id)?;
        let entry = self.task_lock(task_id);
        let _held = entry.lock.lock().await;
        self.unschedule_locked(task_id).await
    }

    async fn schedule_locked(
        &self,
        task_id: &str,
        day: NaiveDate,
    ) -> Result<ScheduleOutcome, SchedulingError> {
        let task = self
            .tasks
            .get_task(task_id)
            .map_err(SchedulingError::Storage)?
            .ok_or_else(|| SchedulingError::NotFound(task_id.to_string()))?;
        if let Some(event_reference) = task.scheduled_event() {
            return Err(SchedulingError::AlreadyScheduled {
                task_id: task.id.clone(),
                event_reference: event_reference.to_string(),
            });
        }

        let slots = self.free_slots(day).await?;
        if slots.is_empty() {
            tracing::info!(task_id = %task.id, %day, "no free slot in working window");
            return Ok(ScheduleOutcome::NoSlotAvailable {
                reason: NO_FREE_TIME.to_string(),
            });
        }

        let decision = match self.ai.choose_ai_slot(&slots, &task, day).await {
            AiOutcome::Decided(decision) => decision,
            AiOutcome::FallbackRequired(_) => {
                match self.fallback.choose_fallback_slot(&slots, &task, day)? {
                    FallbackOutcome::Chosen(decision) => decision,
                    FallbackOutcome::NoSlotAvailable { reason } => {
                        return Ok(ScheduleOutcome::NoSlotAvailable { reason });
                    }
                }
            }
        };

        let event_reference = self.write_back(&task, &decision).await?;
        tracing::info!(
            task_id = %task.id,
            source = decision.source().as_str(),
            slot_start = %decision.slot_start(),
            duration_minutes = decision.duration_minutes(),
            event_id = %event_reference,
            "task scheduled"
        );
        Ok(ScheduleOutcome::Scheduled(ScheduleResult {
            decision,
            event_reference,
        }))
    }

    async fn unschedule_locked(&self, task_id: &str) -> Result<Option<String>, SchedulingError> {
        let task = self
            .tasks
            .get_task(task_id)
            .map_err(SchedulingError::Storage)?
            .ok_or_else(|| SchedulingError::NotFound(task_id.to_string()))?;
        let Some(event_id) = task.scheduled_event().map(str::to_string) else {
            return Ok(None);
        };

        self.calendar
            .delete_event(&event_id)
            .await
            .map_err(SchedulingError::CalendarWriteFailed)?;
        let cleared = self
            .tasks
            .clear_event_reference(task_id)
            .map_err(SchedulingError::Storage)?;
        tracing::info!(task_id = %task_id, event_id = %event_id, cleared, "task unscheduled");
        Ok(Some(event_id))
    }

    async fn write_back(
        &self,
        task: &Task,
        decision: &SchedulingDecision,
    ) -> Result<String, SchedulingError> {
        let event = NewCalendarEvent {
            task_id: task.id.clone(),
            title: task.title.clone(),
            description: task.description.clone(),
            start: decision.slot_start(),
            duration_minutes: decision.duration_minutes(),
        };
        let event_id = self
            .calendar
            .create_event(&event)
            .await
            .map_err(SchedulingError::CalendarWriteFailed)?;

        match self.tasks.set_event_reference(&task.id, &event_id) {
            Ok(EventReferenceUpdate::Applied) => Ok(event_id),
            Ok(EventReferenceUpdate::AlreadySet(existing)) => {
                tracing::warn!(
                    task_id = %task.id,
                    event_id = %event_id,
                    existing = %existing,
                    "lost scheduling race; removing duplicate event"
                );
                self.discard_event(&task.id, &event_id).await;
                Err(SchedulingError::AlreadyScheduled {
                    task_id: task.id.clone(),
                    event_reference: existing,
                })
            }
            Ok(EventReferenceUpdate::Missing) => {
                tracing::warn!(
                    task_id = %task.id,
                    event_id = %event_id,
                    "task vanished before write-back"
                );
                self.discard_event(&task.id, &event_id).await;
                Err(SchedulingError::NotFound(task.id.clone()))
            }
            Err(error) => {
                tracing::error!(
                    task_id = %task.id,
                    event_id = %event_id,
                    reason = %error,
                    "calendar event created but task update failed"
                );
                Err(SchedulingError::PartialScheduleFailure {
                    task_id: task.id.clone(),
                    event_id,
                    reason: error.to_string(),
                })
            }
        }
    }

    async fn discard_event(&self, task_id: &str, event_id: &str) {
        if let Err(error) = self.calendar.delete_event(event_id).await {
            tracing::warn!(
                task_id = %task_id,
                event_id = %event_id,
                reason = %error,
                "failed to delete orphaned event"
            );
        }
    }

    fn record_event_reference(
        &self,
        task_id: &str,
        event_id: &str,
    ) -> Result<String, SchedulingError> {
        match self.tasks.set_event_reference(task_id, event_id) {
            Ok(EventReferenceUpdate::Applied) => {
                tracing::info!(
                    task_id = %task_id,
                    event_id = %event_id,
                    "partial schedule completed"
                );
                Ok(event_id.to_string())
            }
            Ok(EventReferenceUpdate::AlreadySet(existing)) if existing == event_id => Ok(existing),
            Ok(EventReferenceUpdate::AlreadySet(existing)) => {
                Err(SchedulingError::AlreadyScheduled {
                    task_id: task_id.to_string(),
                    event_reference: existing,
                })
            }
            Ok(EventReferenceUpdate::Missing) => {
                Err(SchedulingError::NotFound(task_id.to_string()))
            }
            Err(error) => Err(SchedulingError::PartialScheduleFailure {
                task_id: task_id.to_string(),
                event_id: event_id.to_string(),
                reason: error.to_string(),
            }),
        }
    }

    fn task_lock(&self, task_id: &str) -> TaskLockEntry<'_> {
        let mut locks = self
            .task_locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let lock = Arc::clone(locks.entry(task_id.to_string()).or_default());
        TaskLockEntry {
            locks: &self.task_locks,
            task_id: task_id.to_string(),
            lock,
        }
    }
}

/// One caller's handle on a task lock. Dropping it, even when the owning
/// future is cancelled, removes the map entry once nobody else holds it.
struct TaskLockEntry<'a> {
    locks: &'a TaskLocks,
    task_id: String,
    lock: Arc<tokio::sync::Mutex<()>>,
}

impl Drop for TaskLockEntry<'_> {
    fn drop(&mut self) {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        // Only the map and this handle: nobody is waiting.
        if Arc::strong_count(&self.lock) == 2 {
            locks.remove(&self.task_id);
        }
    }
}

fn ensure_task_id(task_id: &str) -> Result<&str, SchedulingError> {
    let task_id = task_id.trim();
    if task_id.is_empty() {
        return Err(SchedulingError::InvalidInput(
            "task id must not be empty".to_string(),
        ));
    }
    Ok(task_id)
}
