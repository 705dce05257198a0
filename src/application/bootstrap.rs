use crate::application::ai_scheduler::AiScheduler;
use crate::application::duration_estimator::DurationEstimator;
use crate::application::heuristic_scheduler::HeuristicScheduler;
use crate::application::orchestrator::{SchedulingOrchestrator, SchedulingPolicy};
use crate::infrastructure::calendar_gateway::GoogleCalendarGateway;
use crate::infrastructure::completion_client::OpenAiCompletionClient;
use crate::infrastructure::config::{
    ensure_default_configs, load_settings, SchedulerSettings, Secrets,
};
use crate::infrastructure::credential_store::{
    AccessTokenProvider, KeyringAccessTokenProvider, StaticAccessTokenProvider,
};
use crate::infrastructure::error::InfraError;
use crate::infrastructure::google_calendar_client::ReqwestGoogleCalendarClient;
use crate::infrastructure::storage::initialize_database;
use crate::infrastructure::task_repository::SqliteTaskRepository;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub type CalendarService =
    GoogleCalendarGateway<ReqwestGoogleCalendarClient, dyn AccessTokenProvider>;
pub type Orchestrator =
    SchedulingOrchestrator<SqliteTaskRepository, CalendarService, OpenAiCompletionClient>;

#[derive(Debug)]
pub struct BootstrapResult {
    pub workspace_root: PathBuf,
    pub logs_dir: PathBuf,
    pub database_path: PathBuf,
    pub settings: SchedulerSettings,
}

pub fn bootstrap_workspace(workspace_root: &Path) -> Result<BootstrapResult, InfraError> {
    let config_dir = workspace_root.join("config");
    let state_dir = workspace_root.join("state");
    let logs_dir = workspace_root.join("logs");
    let database_path = state_dir.join("todo-scheduler.sqlite");

    fs::create_dir_all(&config_dir)?;
    fs::create_dir_all(&state_dir)?;
    fs::create_dir_all(&logs_dir)?;

    ensure_default_configs(&config_dir)?;
    let settings = load_settings(&config_dir)?;
    initialize_database(&database_path)?;

    Ok(BootstrapResult {
        workspace_root: workspace_root.to_path_buf(),
        logs_dir,
        database_path,
        settings,
    })
}

/// Collaborators wired for one process.
pub struct AppState {
    pub tasks: Arc<SqliteTaskRepository>,
    pub orchestrator: Orchestrator,
    pub ai_enabled: bool,
}

impl AppState {
    pub fn new(bootstrap: &BootstrapResult, secrets: &Secrets) -> Result<Self, InfraError> {
        let settings = &bootstrap.settings;
        let tasks = Arc::new(SqliteTaskRepository::new(&bootstrap.database_path));

        let tokens: Arc<dyn AccessTokenProvider> = match secrets.google_access_token.as_deref() {
            Some(token) => Arc::new(StaticAccessTokenProvider::new(token)),
            None => Arc::new(KeyringAccessTokenProvider::default()),
        };
        let client = ReqwestGoogleCalendarClient::with_timeout(settings.calendar_timeout)?;
        let calendar = Arc::new(
            GoogleCalendarGateway::new(
                Arc::new(client),
                tokens,
                settings.calendar_id.clone(),
                settings.timezone(),
                settings.calendar_timeout,
            )
            .with_summary_prefix(settings.event_summary_prefix.clone()),
        );

        let ai = match secrets.openai_api_key.as_deref() {
            Some(api_key) if settings.ai.enabled => {
                let client = OpenAiCompletionClient::new(
                    settings.ai.endpoint.clone(),
                    api_key,
                    settings.ai.model.clone(),
                )
                .with_sampling(settings.ai.temperature, settings.ai.max_tokens);
                AiScheduler::new(
                    Arc::new(client),
                    settings.working_window,
                    settings.ai.timeout,
                )
            }
            _ => {
                tracing::info!(
                    configured = settings.ai.enabled,
                    "ai scheduling disabled; using heuristic scheduler only"
                );
                AiScheduler::disabled(settings.working_window)
            }
        };
        let ai_enabled = ai.is_enabled();

        let fallback = HeuristicScheduler::new(
            settings.working_window,
            DurationEstimator::new(settings.default_duration_minutes),
        );
        let orchestrator = SchedulingOrchestrator::new(
            Arc::clone(&tasks),
            calendar,
            ai,
            fallback,
            settings.working_window,
        )
        .with_policy(SchedulingPolicy {
            min_slot_minutes: settings.min_slot_minutes,
            skip_elapsed_slots: settings.skip_elapsed_slots,
        });

        Ok(Self {
            tasks,
            orchestrator,
            ai_enabled,
        })
    }
}
