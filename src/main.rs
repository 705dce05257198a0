use chrono::{NaiveDate, Utc};
use clap::{Parser, Subcommand};
use serde_json::json;
use std::fs::OpenOptions;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Mutex;
use thiserror::Error;
use todo_scheduler::application::bootstrap::{bootstrap_workspace, AppState, BootstrapResult};
use todo_scheduler::application::error::SchedulingError;
use todo_scheduler::infrastructure::config::load_secrets_from_env;
use todo_scheduler::infrastructure::error::InfraError;
use todo_scheduler::infrastructure::task_repository::{NewTask, TaskRepository};
use tracing_subscriber::EnvFilter;

/// Places todos on a Google calendar, asking an AI first and falling back to heuristics.
#[derive(Parser)]
#[command(name = "todo-scheduler", version, about)]
struct Cli {
    /// Workspace holding config/, state/ and logs/ (defaults to the current directory).
    #[arg(long)]
    workspace: Option<PathBuf>,

    /// Human-readable logs on stderr instead of JSON lines in logs/scheduler.log.
    #[arg(long)]
    pretty: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create a new unscheduled task.
    AddTask {
        #[arg(long)]
        title: String,
        #[arg(long)]
        description: Option<String>,
        #[arg(long)]
        date: Option<NaiveDate>,
    },
    /// List all tasks.
    ListTasks,
    /// Show the free slots of a day.
    FreeSlots {
        #[arg(long)]
        date: NaiveDate,
    },
    /// Place a task on the calendar.
    Schedule {
        #[arg(long)]
        task_id: String,
        /// Defaults to the task's own date, then today.
        #[arg(long)]
        date: Option<NaiveDate>,
    },
    /// Record an already-created event on a task after a partial failure.
    Resume {
        #[arg(long)]
        task_id: String,
        #[arg(long)]
        event_id: String,
    },
    /// Remove a task's calendar event and mark it unscheduled again.
    Unschedule {
        #[arg(long)]
        task_id: String,
    },
}

#[derive(Debug, Error)]
enum CliError {
    #[error(transparent)]
    Infra(#[from] InfraError),
    #[error(transparent)]
    Scheduling(#[from] SchedulingError),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl CliError {
    fn kind(&self) -> &'static str {
        match self {
            Self::Infra(InfraError::InvalidInput(_)) => "invalid_input",
            Self::Infra(_) | Self::Json(_) => "infrastructure",
            Self::Scheduling(SchedulingError::InvalidInput(_)) => "invalid_input",
            Self::Scheduling(SchedulingError::NotFound(_)) => "not_found",
            Self::Scheduling(SchedulingError::AlreadyScheduled { .. }) => "already_scheduled",
            Self::Scheduling(SchedulingError::CalendarUnavailable(_)) => "calendar_unavailable",
            Self::Scheduling(SchedulingError::CalendarWriteFailed(_)) => "calendar_write_failed",
            Self::Scheduling(SchedulingError::PartialScheduleFailure { .. }) => {
                "partial_schedule_failure"
            }
            Self::Scheduling(SchedulingError::Storage(_)) => "storage",
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let workspace_root = match cli.workspace.clone() {
        Some(path) => path,
        None => match std::env::current_dir() {
            Ok(path) => path,
            Err(error) => return report(&CliError::Infra(error.into())),
        },
    };

    let bootstrap = match bootstrap_workspace(&workspace_root) {
        Ok(bootstrap) => bootstrap,
        Err(error) => return report(&error.into()),
    };
    if let Err(error) = init_tracing(&bootstrap, cli.pretty) {
        return report(&error.into());
    }

    match run(cli.command, &bootstrap).await {
        Ok(output) => {
            println!("{output}");
            ExitCode::SUCCESS
        }
        Err(error) => report(&error),
    }
}

fn init_tracing(bootstrap: &BootstrapResult, pretty: bool) -> Result<(), InfraError> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if pretty {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
        return Ok(());
    }

    let log_file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(bootstrap.logs_dir.join("scheduler.log"))?;
    tracing_subscriber::fmt()
        .json()
        .with_env_filter(filter)
        .with_current_span(false)
        .with_writer(Mutex::new(log_file))
        .init();
    Ok(())
}

async fn run(command: Command, bootstrap: &BootstrapResult) -> Result<String, CliError> {
    let state = AppState::new(bootstrap, &load_secrets_from_env())?;
    let value = match command {
        Command::AddTask {
            title,
            description,
            date,
        } => {
            let task = state.tasks.create_task(NewTask {
                title,
                description,
                date,
            })?;
            tracing::info!(task_id = %task.id, "task created");
            serde_json::to_value(task)?
        }
        Command::ListTasks => serde_json::to_value(state.tasks.list_tasks()?)?,
        Command::FreeSlots { date } => {
            let slots = state.orchestrator.free_slots(date).await?;
            let window = bootstrap.settings.working_window;
            json!({
                "date": date,
                "timezone": window.timezone.name(),
                "ai_enabled": state.ai_enabled,
                "slots": slots
                    .iter()
                    .map(|slot| json!({
                        "start": window.local_hhmm(slot.start()),
                        "end": window.local_hhmm(slot.end()),
                        "duration_minutes": slot.duration_minutes(),
                    }))
                    .collect::<Vec<_>>(),
            })
        }
        Command::Schedule { task_id, date } => {
            let day = match date {
                Some(day) => day,
                None => default_day(&state, &task_id, bootstrap)?,
            };
            let outcome = state.orchestrator.schedule_task(&task_id, day).await?;
            serde_json::to_value(outcome)?
        }
        Command::Resume { task_id, event_id } => {
            let event_reference = state
                .orchestrator
                .complete_partial_schedule(&task_id, &event_id)
                .await?;
            json!({ "task_id": task_id, "event_reference": event_reference })
        }
        Command::Unschedule { task_id } => {
            let removed = state.orchestrator.unschedule_task(&task_id).await?;
            json!({ "task_id": task_id, "removed_event": removed })
        }
    };
    Ok(serde_json::to_string_pretty(&value)?)
}

fn default_day(
    state: &AppState,
    task_id: &str,
    bootstrap: &BootstrapResult,
) -> Result<NaiveDate, CliError> {
    let task_date = state.tasks.get_task(task_id)?.and_then(|task| task.date);
    Ok(task_date.unwrap_or_else(|| {
        Utc::now()
            .with_timezone(&bootstrap.settings.timezone())
            .date_naive()
    }))
}

fn report(error: &CliError) -> ExitCode {
    tracing::error!(kind = error.kind(), error = %error, "command failed");
    let retryable = matches!(error, CliError::Scheduling(inner) if inner.is_retryable());
    let mut body = json!({
        "error": error.kind(),
        "message": error.to_string(),
        "retryable": retryable,
    });
    if let CliError::Scheduling(SchedulingError::PartialScheduleFailure { event_id, .. }) = error {
        body["event_id"] = json!(event_id);
    }
    println!("{body}");
    ExitCode::FAILURE
}
