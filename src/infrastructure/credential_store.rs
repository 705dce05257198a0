use crate::domain::models::OAuthToken;
use crate::infrastructure::error::InfraError;
use chrono::{DateTime, Utc};
use std::sync::Arc;

const TOKEN_LEEWAY_SECONDS: i64 = 60;

type NowProvider = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// Source of a bearer token for the calendar account.
pub trait AccessTokenProvider: Send + Sync {
    fn access_token(&self) -> Result<String, InfraError>;
}

#[derive(Debug, Clone)]
pub struct StaticAccessTokenProvider {
    token: String,
}

impl StaticAccessTokenProvider {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

impl AccessTokenProvider for StaticAccessTokenProvider {
    fn access_token(&self) -> Result<String, InfraError> {
        let token = self.token.trim();
        if token.is_empty() {
            return Err(InfraError::Credential("access token is empty".to_string()));
        }
        Ok(token.to_string())
    }
}

/// Reads an `OAuthToken` stored as JSON in the OS keyring.
pub struct KeyringAccessTokenProvider {
    service_name: String,
    account_name: String,
    now_provider: NowProvider,
}

impl KeyringAccessTokenProvider {
    pub fn new(service_name: impl Into<String>, account_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            account_name: account_name.into(),
            now_provider: Arc::new(Utc::now),
        }
    }

    pub fn with_now_provider(mut self, now_provider: NowProvider) -> Self {
        self.now_provider = now_provider;
        self
    }

    fn entry(&self) -> Result<keyring::Entry, InfraError> {
        keyring::Entry::new(&self.service_name, &self.account_name)
            .map_err(|error| InfraError::Credential(error.to_string()))
    }

    pub fn load_token(&self) -> Result<Option<OAuthToken>, InfraError> {
        let payload = match self.entry()?.get_password() {
            Ok(value) => value,
            Err(keyring::Error::NoEntry) => return Ok(None),
            Err(error) => return Err(InfraError::Credential(error.to_string())),
        };
        let token = serde_json::from_str::<OAuthToken>(&payload).map_err(|error| {
            InfraError::Credential(format!("stored token is unreadable: {error}"))
        })?;
        Ok(Some(token))
    }
}

impl Default for KeyringAccessTokenProvider {
    fn default() -> Self {
        Self::new("todo-scheduler.oauth.google", "default")
    }
}

impl AccessTokenProvider for KeyringAccessTokenProvider {
    fn access_token(&self) -> Result<String, InfraError> {
        let token = self.load_token()?.ok_or_else(|| {
            InfraError::Credential(format!(
                "no calendar token stored under '{}'",
                self.service_name
            ))
        })?;
        select_valid_token(token, (self.now_provider)())
    }
}

fn select_valid_token(token: OAuthToken, now: DateTime<Utc>) -> Result<String, InfraError> {
    if !token.is_valid_at(now, TOKEN_LEEWAY_SECONDS) {
        return Err(InfraError::Credential(format!(
            "calendar token expired at {}",
            token.expires_at.to_rfc3339()
        )));
    }
    Ok(token.access_token.trim().to_string())
}
