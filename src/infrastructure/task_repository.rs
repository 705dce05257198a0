use crate::domain::models::Task;
use crate::infrastructure::error::InfraError;
use crate::infrastructure::storage::apply_schema;
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

fn next_id(prefix: &str) -> String {
    let sequence = NEXT_ID.fetch_add(1, Ordering::Relaxed);
    format!("{prefix}-{}-{sequence}", Utc::now().timestamp_micros())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTask {
    pub title: String,
    pub description: Option<String>,
    pub date: Option<NaiveDate>,
}

/// Result of the compare-and-set on a task's event reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventReferenceUpdate {
    Applied,
    AlreadySet(String),
    Missing,
}

pub trait TaskRepository: Send + Sync {
    fn create_task(&self, new_task: NewTask) -> Result<Task, InfraError>;
    fn get_task(&self, task_id: &str) -> Result<Option<Task>, InfraError>;
    fn list_tasks(&self) -> Result<Vec<Task>, InfraError>;
    /// Sets the reference only while it is still unset.
    fn set_event_reference(
        &self,
        task_id: &str,
        event_id: &str,
    ) -> Result<EventReferenceUpdate, InfraError>;
    fn clear_event_reference(&self, task_id: &str) -> Result<bool, InfraError>;
}

fn build_task(new_task: NewTask) -> Result<Task, InfraError> {
    let task = Task {
        id: next_id("tsk"),
        title: new_task.title.trim().to_string(),
        description: new_task
            .description
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty()),
        date: new_task.date,
        completed: false,
        event_reference: None,
        created_at: Utc::now(),
    };
    task.validate().map_err(InfraError::InvalidInput)?;
    Ok(task)
}

fn ensure_event_id(event_id: &str) -> Result<&str, InfraError> {
    let event_id = event_id.trim();
    if event_id.is_empty() {
        return Err(InfraError::InvalidInput(
            "event_id must not be empty".to_string(),
        ));
    }
    Ok(event_id)
}

#[derive(Debug, Clone)]
pub struct SqliteTaskRepository {
    db_path: PathBuf,
}

struct TaskRow {
    id: String,
    title: String,
    description: Option<String>,
    completed: bool,
    date: Option<String>,
    calendar_event_id: Option<String>,
    created_at: String,
}

impl SqliteTaskRepository {
    pub fn new(db_path: impl AsRef<Path>) -> Self {
        Self {
            db_path: db_path.as_ref().to_path_buf(),
        }
    }

    fn connect(&self) -> Result<Connection, InfraError> {
        let connection = Connection::open(&self.db_path)?;
        connection.busy_timeout(BUSY_TIMEOUT)?;
        apply_schema(&connection)?;
        Ok(connection)
    }

    fn read_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<TaskRow> {
        Ok(TaskRow {
            id: row.get(0)?,
            title: row.get(1)?,
            description: row.get(2)?,
            completed: row.get(3)?,
            date: row.get(4)?,
            calendar_event_id: row.get(5)?,
            created_at: row.get(6)?,
        })
    }

    fn into_task(row: TaskRow) -> Result<Task, InfraError> {
        let created_at = DateTime::parse_from_rfc3339(&row.created_at)
            .map_err(|error| {
                InfraError::Storage(format!(
                    "invalid todos.created_at '{}': {error}",
                    row.created_at
                ))
            })?
            .with_timezone(&Utc);
        let date = row
            .date
            .as_deref()
            .map(|raw| {
                NaiveDate::parse_from_str(raw, "%Y-%m-%d").map_err(|error| {
                    InfraError::Storage(format!("invalid todos.date '{raw}': {error}"))
                })
            })
            .transpose()?;

        Ok(Task {
            id: row.id,
            title: row.title,
            description: row.description,
            date,
            completed: row.completed,
            event_reference: row
                .calendar_event_id
                .filter(|value| !value.trim().is_empty()),
            created_at,
        })
    }
}

const SELECT_COLUMNS: &str =
    "SELECT id, title, description, completed, date, calendar_event_id, created_at FROM todos";

impl TaskRepository for SqliteTaskRepository {
    fn create_task(&self, new_task: NewTask) -> Result<Task, InfraError> {
        let task = build_task(new_task)?;
        let connection = self.connect()?;
        connection.execute(
            "INSERT INTO todos (id, title, description, completed, date, calendar_event_id, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, NULL, ?6)",
            params![
                task.id,
                task.title,
                task.description,
                task.completed,
                task.date.map(|date| date.to_string()),
                task.created_at.to_rfc3339()
            ],
        )?;
        Ok(task)
    }

    fn get_task(&self, task_id: &str) -> Result<Option<Task>, InfraError> {
        let connection = self.connect()?;
        let row = connection
            .query_row(
                &format!("{SELECT_COLUMNS} WHERE id = ?1"),
                params![task_id.trim()],
                Self::read_row,
            )
            .optional()?;
        row.map(Self::into_task).transpose()
    }

    fn list_tasks(&self) -> Result<Vec<Task>, InfraError> {
        let connection = self.connect()?;
        let mut statement =
            connection.prepare(&format!("{SELECT_COLUMNS} ORDER BY rowid"))?;
        let rows = statement
            .query_map([], Self::read_row)?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(Self::into_task).collect()
    }

    fn set_event_reference(
        &self,
        task_id: &str,
        event_id: &str,
    ) -> Result<EventReferenceUpdate, InfraError> {
        let event_id = ensure_event_id(event_id)?;
        let mut connection = self.connect()?;
        let transaction = connection.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let current: Option<Option<String>> = transaction
            .query_row(
                "SELECT calendar_event_id FROM todos WHERE id = ?1",
                params![task_id.trim()],
                |row| row.get(0),
            )
            .optional()?;

        let outcome = match current {
            None => EventReferenceUpdate::Missing,
            Some(Some(existing)) if !existing.trim().is_empty() => {
                EventReferenceUpdate::AlreadySet(existing)
            }
            Some(_) => {
                transaction.execute(
                    "UPDATE todos SET calendar_event_id = ?2, updated_at = ?3
                     WHERE id = ?1 AND (calendar_event_id IS NULL OR trim(calendar_event_id) = '')",
                    params![task_id.trim(), event_id, Utc::now().to_rfc3339()],
                )?;
                EventReferenceUpdate::Applied
            }
        };

        transaction.commit()?;
        Ok(outcome)
    }

    fn clear_event_reference(&self, task_id: &str) -> Result<bool, InfraError> {
        let connection = self.connect()?;
        let changed = connection.execute(
            "UPDATE todos SET calendar_event_id = NULL, updated_at = ?2
             WHERE id = ?1 AND calendar_event_id IS NOT NULL",
            params![task_id.trim(), Utc::now().to_rfc3339()],
        )?;
        Ok(changed > 0)
    }
}

#[derive(Debug, Default)]
pub struct InMemoryTaskRepository {
    state: Mutex<InMemoryTasks>,
}

#[derive(Debug, Default)]
struct InMemoryTasks {
    tasks: HashMap<String, Task>,
    order: Vec<String>,
}

impl InMemoryTaskRepository {
    pub fn with_tasks(tasks: impl IntoIterator<Item = Task>) -> Self {
        let repository = Self::default();
        if let Ok(mut state) = repository.state.lock() {
            for task in tasks {
                state.order.push(task.id.clone());
                state.tasks.insert(task.id.clone(), task);
            }
        }
        repository
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, InMemoryTasks>, InfraError> {
        self.state
            .lock()
            .map_err(|error| InfraError::Storage(format!("task store lock poisoned: {error}")))
    }
}

impl TaskRepository for InMemoryTaskRepository {
    fn create_task(&self, new_task: NewTask) -> Result<Task, InfraError> {
        let task = build_task(new_task)?;
        let mut state = self.lock()?;
        state.order.push(task.id.clone());
        state.tasks.insert(task.id.clone(), task.clone());
        Ok(task)
    }

    fn get_task(&self, task_id: &str) -> Result<Option<Task>, InfraError> {
        let state = self.lock()?;
        Ok(state.tasks.get(task_id.trim()).cloned())
    }

    fn list_tasks(&self) -> Result<Vec<Task>, InfraError> {
        let state = self.lock()?;
        Ok(state
            .order
            .iter()
            .filter_map(|id| state.tasks.get(id).cloned())
            .collect())
    }

    fn set_event_reference(
        &self,
        task_id: &str,
        event_id: &str,
    ) -> Result<EventReferenceUpdate, InfraError> {
        let event_id = ensure_event_id(event_id)?;
        let mut state = self.lock()?;
        let Some(task) = state.tasks.get_mut(task_id.trim()) else {
            return Ok(EventReferenceUpdate::Missing);
        };
        if let Some(existing) = task.scheduled_event() {
            return Ok(EventReferenceUpdate::AlreadySet(existing.to_string()));
        }
        task.event_reference = Some(event_id.to_string());
        Ok(EventReferenceUpdate::Applied)
    }

    fn clear_event_reference(&self, task_id: &str) -> Result<bool, InfraError> {
        let mut state = self.lock()?;
        let Some(task) = state.tasks.get_mut(task_id.trim()) else {
            return Ok(false);
        };
        Ok(task.event_reference.take().is_some())
    }
}
