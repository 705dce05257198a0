use crate::domain::models::WorkingWindow;
use crate::infrastructure::error::InfraError;
use chrono::NaiveTime;
use chrono_tz::Tz;
use serde::Deserialize;
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::time::Duration;

const APP_JSON: &str = "app.json";
const POLICIES_JSON: &str = "policies.json";
const AI_JSON: &str = "ai.json";

const DEFAULT_COMPLETION_ENDPOINT: &str = "https://api.openai.com/v1/chat/completions";

fn default_files() -> HashMap<&'static str, serde_json::Value> {
    HashMap::from([
        (
            APP_JSON,
            serde_json::json!({
                "schema": 1,
                "timezone": "UTC",
                "calendarId": "primary",
                "eventSummaryPrefix": "📝 ",
                "calendarTimeoutMs": 15000
            }),
        ),
        (
            POLICIES_JSON,
            serde_json::json!({
                "schema": 1,
                "workHours": {
                    "start": "09:00",
                    "end": "18:00"
                },
                "minSlotMinutes": 15,
                "defaultDurationMinutes": 30,
                "skipElapsedSlots": true
            }),
        ),
        (
            AI_JSON,
            serde_json::json!({
                "schema": 1,
                "enabled": true,
                "endpoint": DEFAULT_COMPLETION_ENDPOINT,
                "model": "gpt-4o-mini",
                "timeoutMs": 8000,
                "temperature": 0.3,
                "maxTokens": 200
            }),
        ),
    ])
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AppConfigFile {
    #[serde(default = "default_timezone")]
    timezone: String,
    #[serde(default = "default_calendar_id")]
    calendar_id: String,
    #[serde(default = "default_summary_prefix")]
    event_summary_prefix: String,
    #[serde(default = "default_calendar_timeout_ms")]
    calendar_timeout_ms: u64,
}

#[derive(Debug, Deserialize)]
struct WorkHoursFile {
    start: String,
    end: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PoliciesConfigFile {
    work_hours: WorkHoursFile,
    #[serde(default = "default_min_slot_minutes")]
    min_slot_minutes: u32,
    #[serde(default = "default_duration_minutes")]
    default_duration_minutes: u32,
    #[serde(default = "default_true")]
    skip_elapsed_slots: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AiConfigFile {
    #[serde(default = "default_true")]
    enabled: bool,
    #[serde(default = "default_endpoint")]
    endpoint: String,
    #[serde(default = "default_model")]
    model: String,
    #[serde(default = "default_ai_timeout_ms")]
    timeout_ms: u64,
    #[serde(default = "default_temperature")]
    temperature: f32,
    #[serde(default = "default_max_tokens")]
    max_tokens: u32,
}

fn default_timezone() -> String {
    "UTC".to_string()
}

fn default_calendar_id() -> String {
    "primary".to_string()
}

fn default_summary_prefix() -> String {
    "📝 ".to_string()
}

fn default_calendar_timeout_ms() -> u64 {
    15_000
}

fn default_min_slot_minutes() -> u32 {
    15
}

fn default_duration_minutes() -> u32 {
    30
}

fn default_true() -> bool {
    true
}

fn default_endpoint() -> String {
    DEFAULT_COMPLETION_ENDPOINT.to_string()
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_ai_timeout_ms() -> u64 {
    8_000
}

fn default_temperature() -> f32 {
    0.3
}

fn default_max_tokens() -> u32 {
    200
}

#[derive(Debug, Clone, PartialEq)]
pub struct AiSettings {
    pub enabled: bool,
    pub endpoint: String,
    pub model: String,
    pub timeout: Duration,
    pub temperature: f32,
    pub max_tokens: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SchedulerSettings {
    pub calendar_id: String,
    pub event_summary_prefix: String,
    pub calendar_timeout: Duration,
    pub working_window: WorkingWindow,
    pub min_slot_minutes: u32,
    pub default_duration_minutes: u32,
    pub skip_elapsed_slots: bool,
    pub ai: AiSettings,
}

impl SchedulerSettings {
    pub fn timezone(&self) -> Tz {
        self.working_window.timezone
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Secrets {
    pub openai_api_key: Option<String>,
    pub google_access_token: Option<String>,
}

pub fn ensure_default_configs(config_dir: &Path) -> Result<(), InfraError> {
    for (name, value) in default_files() {
        let path = config_dir.join(name);
        if !path.exists() {
            let formatted = serde_json::to_string_pretty(&value)?;
            fs::write(path, format!("{formatted}\n"))?;
        }
    }
    Ok(())
}

fn read_config(path: &Path) -> Result<serde_json::Value, InfraError> {
    let raw = fs::read_to_string(path)?;
    let parsed: serde_json::Value = serde_json::from_str(&raw)?;
    let schema = parsed
        .get("schema")
        .and_then(serde_json::Value::as_u64)
        .ok_or_else(|| InfraError::InvalidConfig(format!("missing schema in {}", path.display())))?;
    if schema != 1 {
        return Err(InfraError::InvalidConfig(format!(
            "unsupported schema {} in {}",
            schema,
            path.display()
        )));
    }
    Ok(parsed)
}

fn read_typed<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, InfraError> {
    let value = read_config(path)?;
    serde_json::from_value(value)
        .map_err(|error| InfraError::InvalidConfig(format!("{}: {error}", path.display())))
}

pub fn load_settings(config_dir: &Path) -> Result<SchedulerSettings, InfraError> {
    let app: AppConfigFile = read_typed(&config_dir.join(APP_JSON))?;
    let policies: PoliciesConfigFile = read_typed(&config_dir.join(POLICIES_JSON))?;
    let ai: AiConfigFile = read_typed(&config_dir.join(AI_JSON))?;
    build_settings(app, policies, ai)
}

fn build_settings(
    app: AppConfigFile,
    policies: PoliciesConfigFile,
    ai: AiConfigFile,
) -> Result<SchedulerSettings, InfraError> {
    let timezone = parse_timezone(&app.timezone)?;
    let start = parse_hhmm(&policies.work_hours.start, "workHours.start")?;
    let end = parse_hhmm(&policies.work_hours.end, "workHours.end")?;
    let working_window =
        WorkingWindow::new(start, end, timezone).map_err(InfraError::InvalidConfig)?;

    if policies.min_slot_minutes == 0 {
        return Err(InfraError::InvalidConfig(
            "minSlotMinutes must be > 0".to_string(),
        ));
    }
    if policies.default_duration_minutes == 0 {
        return Err(InfraError::InvalidConfig(
            "defaultDurationMinutes must be > 0".to_string(),
        ));
    }
    let calendar_id = app.calendar_id.trim();
    if calendar_id.is_empty() {
        return Err(InfraError::InvalidConfig(
            "calendarId must not be empty".to_string(),
        ));
    }
    if ai.timeout_ms == 0 || ai.timeout_ms >= app.calendar_timeout_ms {
        return Err(InfraError::InvalidConfig(format!(
            "ai timeoutMs ({}) must be > 0 and below calendarTimeoutMs ({})",
            ai.timeout_ms, app.calendar_timeout_ms
        )));
    }

    Ok(SchedulerSettings {
        calendar_id: calendar_id.to_string(),
        event_summary_prefix: app.event_summary_prefix,
        calendar_timeout: Duration::from_millis(app.calendar_timeout_ms),
        working_window,
        min_slot_minutes: policies.min_slot_minutes,
        default_duration_minutes: policies.default_duration_minutes,
        skip_elapsed_slots: policies.skip_elapsed_slots,
        ai: AiSettings {
            enabled: ai.enabled,
            endpoint: ai.endpoint.trim().to_string(),
            model: ai.model.trim().to_string(),
            timeout: Duration::from_millis(ai.timeout_ms),
            temperature: ai.temperature,
            max_tokens: ai.max_tokens,
        },
    })
}

fn parse_timezone(value: &str) -> Result<Tz, InfraError> {
    value
        .trim()
        .parse::<Tz>()
        .map_err(|error| InfraError::InvalidConfig(format!("invalid timezone '{value}': {error}")))
}

fn parse_hhmm(value: &str, field_name: &str) -> Result<NaiveTime, InfraError> {
    NaiveTime::parse_from_str(value.trim(), "%H:%M")
        .map_err(|_| InfraError::InvalidConfig(format!("{field_name} must be HH:MM")))
}

pub fn load_secrets_from_env() -> Secrets {
    load_secrets_from_lookup(|key| std::env::var(key).ok())
}

pub fn load_secrets_from_lookup<F>(lookup: F) -> Secrets
where
    F: Fn(&str) -> Option<String>,
{
    Secrets {
        openai_api_key: optional_lookup_value(
            &lookup,
            &["TODO_SCHEDULER_OPENAI_API_KEY", "OPENAI_API_KEY"],
        ),
        google_access_token: optional_lookup_value(
            &lookup,
            &["TODO_SCHEDULER_GOOGLE_ACCESS_TOKEN", "GOOGLE_ACCESS_TOKEN"],
        ),
    }
}

fn optional_lookup_value<F>(lookup: &F, keys: &[&str]) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    for key in keys {
        if let Some(value) = lookup(key) {
            let normalized = value.trim();
            if !normalized.is_empty() {
                return Some(normalized.to_string());
            }
        }
    }
    None
}
