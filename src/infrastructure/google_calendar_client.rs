use crate::infrastructure::error::InfraError;
use crate::infrastructure::event_mapper::GoogleCalendarEvent;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use std::time::Duration;
use url::Url;

const CALENDAR_API_BASE: &str = "https://www.googleapis.com/calendar/v3/";

#[derive(Debug, Clone)]
pub struct ListEventsRequest {
    pub time_min: DateTime<Utc>,
    pub time_max: DateTime<Utc>,
}

#[async_trait]
pub trait GoogleCalendarClient: Send + Sync {
    async fn list_events(
        &self,
        access_token: &str,
        calendar_id: &str,
        request: ListEventsRequest,
    ) -> Result<Vec<GoogleCalendarEvent>, InfraError>;

    async fn create_event(
        &self,
        access_token: &str,
        calendar_id: &str,
        event: &GoogleCalendarEvent,
    ) -> Result<String, InfraError>;

    async fn delete_event(
        &self,
        access_token: &str,
        calendar_id: &str,
        event_id: &str,
    ) -> Result<(), InfraError>;
}

#[derive(Debug, Clone)]
pub struct ReqwestGoogleCalendarClient {
    client: Client,
    api_base: String,
}

impl Default for ReqwestGoogleCalendarClient {
    fn default() -> Self {
        Self::new()
    }
}

impl ReqwestGoogleCalendarClient {
    pub fn new() -> Self {
        Self {
            client: Client::new(),
            api_base: CALENDAR_API_BASE.to_string(),
        }
    }

    /// Client whose every request is bounded by `timeout`.
    pub fn with_timeout(timeout: Duration) -> Result<Self, InfraError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|error| {
                InfraError::CalendarApi(format!("failed to build http client: {error}"))
            })?;
        Ok(Self {
            client,
            api_base: CALENDAR_API_BASE.to_string(),
        })
    }

    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self
    }

    fn ensure_non_empty(value: &str, field: &str) -> Result<(), InfraError> {
        if value.trim().is_empty() {
            return Err(InfraError::CalendarApi(format!(
                "{field} must not be empty"
            )));
        }
        Ok(())
    }

    fn http_error(status: reqwest::StatusCode, body: &str) -> InfraError {
        let code = status.as_u16();
        let message = if body.trim().is_empty() {
            format!("google calendar api error: http {code}")
        } else {
            format!("google calendar api error: http {code}; body={body}")
        };
        InfraError::CalendarApi(message)
    }

    fn events_endpoint(&self, calendar_id: &str) -> Result<Url, InfraError> {
        let mut url = Url::parse(&self.api_base).map_err(|error| {
            InfraError::CalendarApi(format!("invalid calendar api base url: {error}"))
        })?;
        {
            let mut segments = url.path_segments_mut().map_err(|_| {
                InfraError::CalendarApi("calendar api base URL cannot be a base".to_string())
            })?;
            segments.pop_if_empty();
            segments.push("calendars");
            segments.push(calendar_id);
            segments.push("events");
        }
        Ok(url)
    }

    fn event_endpoint(&self, calendar_id: &str, event_id: &str) -> Result<Url, InfraError> {
        let mut url = self.events_endpoint(calendar_id)?;
        {
            let mut segments = url.path_segments_mut().map_err(|_| {
                InfraError::CalendarApi("calendar events URL cannot be a base".to_string())
            })?;
            segments.push(event_id);
        }
        Ok(url)
    }

    async fn read_body(
        response: reqwest::Response,
        operation: &str,
    ) -> Result<(reqwest::StatusCode, String), InfraError> {
        let status = response.status();
        let body = response.text().await.map_err(|error| {
            InfraError::CalendarApi(format!("failed reading {operation} response: {error}"))
        })?;
        Ok((status, body))
    }
}

#[derive(Debug, serde::Deserialize)]
struct EventsPageResponse {
    items: Option<Vec<GoogleCalendarEvent>>,
    #[serde(rename = "nextPageToken")]
    next_page_token: Option<String>,
}

#[async_trait]
impl GoogleCalendarClient for ReqwestGoogleCalendarClient {
    async fn list_events(
        &self,
        access_token: &str,
        calendar_id: &str,
        request: ListEventsRequest,
    ) -> Result<Vec<GoogleCalendarEvent>, InfraError> {
        Self::ensure_non_empty(access_token, "access token")?;
        Self::ensure_non_empty(calendar_id, "calendar id")?;

        let endpoint = self.events_endpoint(calendar_id)?;
        let mut page_token: Option<String> = None;
        let mut events = Vec::new();

        loop {
            let mut req = self
                .client
                .get(endpoint.clone())
                .bearer_auth(access_token)
                .query(&[
                    ("singleEvents", "true"),
                    ("orderBy", "startTime"),
                    ("maxResults", "2500"),
                ])
                .query(&[
                    ("timeMin", request.time_min.to_rfc3339()),
                    ("timeMax", request.time_max.to_rfc3339()),
                ]);
            if let Some(page_token) = page_token.as_deref() {
                req = req.query(&[("pageToken", page_token)]);
            }

            let response = req.send().await.map_err(|error| {
                InfraError::CalendarApi(format!(
                    "network error while listing calendar events: {error}"
                ))
            })?;
            let (status, body) = Self::read_body(response, "events list").await?;
            if !status.is_success() {
                return Err(Self::http_error(status, &body));
            }

            let mut parsed: EventsPageResponse = serde_json::from_str(&body).map_err(|error| {
                InfraError::CalendarApi(format!(
                    "invalid events list payload: {error}; body={body}"
                ))
            })?;
            events.extend(parsed.items.take().unwrap_or_default());

            match parsed.next_page_token.take() {
                Some(next_page_token) => page_token = Some(next_page_token),
                None => break,
            }
        }

        Ok(events)
    }

    async fn create_event(
        &self,
        access_token: &str,
        calendar_id: &str,
        event: &GoogleCalendarEvent,
    ) -> Result<String, InfraError> {
        Self::ensure_non_empty(access_token, "access token")?;
        Self::ensure_non_empty(calendar_id, "calendar id")?;

        let endpoint = self.events_endpoint(calendar_id)?;
        let response = self
            .client
            .post(endpoint)
            .bearer_auth(access_token)
            .json(event)
            .send()
            .await
            .map_err(|error| {
                InfraError::CalendarApi(format!("network error while creating event: {error}"))
            })?;
        let (status, body) = Self::read_body(response, "event create").await?;
        if !status.is_success() {
            return Err(Self::http_error(status, &body));
        }

        let parsed: GoogleCalendarEvent = serde_json::from_str(&body).map_err(|error| {
            InfraError::CalendarApi(format!(
                "invalid event create payload: {error}; body={body}"
            ))
        })?;
        parsed
            .id
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
            .ok_or_else(|| {
                InfraError::CalendarApi("event create response did not include id".to_string())
            })
    }

    async fn delete_event(
        &self,
        access_token: &str,
        calendar_id: &str,
        event_id: &str,
    ) -> Result<(), InfraError> {
        Self::ensure_non_empty(access_token, "access token")?;
        Self::ensure_non_empty(calendar_id, "calendar id")?;
        Self::ensure_non_empty(event_id, "event id")?;

        let endpoint = self.event_endpoint(calendar_id, event_id)?;
        let response = self
            .client
            .delete(endpoint)
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|error| {
                InfraError::CalendarApi(format!("network error while deleting event: {error}"))
            })?;
        let (status, body) = Self::read_body(response, "event delete").await?;
        if !status.is_success() && status != reqwest::StatusCode::GONE {
            return Err(Self::http_error(status, &body));
        }
        Ok(())
    }
}
