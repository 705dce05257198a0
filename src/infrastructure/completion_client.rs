use crate::infrastructure::error::InfraError;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

const SYSTEM_PROMPT: &str = "You are a scheduling assistant. You read a task and a list of free \
calendar slots and reply ONLY with a single JSON object, with no markdown, no backticks and no \
extra text. You never recommend a time outside the listed free slots.";

/// AI completion collaborator: one prompt in, raw model text out.
#[async_trait]
pub trait CompletionClient: Send + Sync {
    async fn complete(&self, prompt: &str, timeout: Duration) -> Result<String, InfraError>;
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Clone)]
pub struct OpenAiCompletionClient {
    client: Client,
    endpoint: String,
    api_key: String,
    model: String,
    temperature: f32,
    max_tokens: u32,
}

impl OpenAiCompletionClient {
    pub fn new(
        endpoint: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            client: Client::new(),
            endpoint: endpoint.into(),
            api_key: api_key.into(),
            model: model.into(),
            temperature: 0.2,
            max_tokens: 300,
        }
    }

    pub fn with_sampling(mut self, temperature: f32, max_tokens: u32) -> Self {
        self.temperature = temperature;
        self.max_tokens = max_tokens;
        self
    }

    async fn send(&self, prompt: &str) -> Result<String, InfraError> {
        let request = ChatCompletionRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT,
                },
                ChatMessage {
                    role: "user",
                    content: prompt,
                },
            ],
            max_tokens: self.max_tokens,
            temperature: self.temperature,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|error| InfraError::Completion(format!("network error: {error}")))?;

        let status = response.status();
        let body = response.text().await.map_err(|error| {
            InfraError::Completion(format!("failed reading completion response: {error}"))
        })?;
        if !status.is_success() {
            return Err(InfraError::Completion(format!(
                "completion api error: http {}; body={body}",
                status.as_u16()
            )));
        }

        extract_content(&body)
    }
}

#[async_trait]
impl CompletionClient for OpenAiCompletionClient {
    async fn complete(&self, prompt: &str, timeout: Duration) -> Result<String, InfraError> {
        if self.api_key.trim().is_empty() {
            return Err(InfraError::Completion("api key is empty".to_string()));
        }
        match tokio::time::timeout(timeout, self.send(prompt)).await {
            Ok(result) => result,
            Err(_) => Err(InfraError::Timeout {
                operation: "completion".to_string(),
                timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            }),
        }
    }
}

fn extract_content(body: &str) -> Result<String, InfraError> {
    let parsed: ChatCompletionResponse = serde_json::from_str(body).map_err(|error| {
        InfraError::Completion(format!("invalid completion payload: {error}; body={body}"))
    })?;
    parsed
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message.content)
        .filter(|content| !content.trim().is_empty())
        .ok_or_else(|| InfraError::Completion("completion response had no content".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_content_reads_first_choice() {
        let body = r#"{"choices":[{"message":{"role":"assistant","content":"{\"start_time\":\"09:00\"}"}}]}"#;
        assert_eq!(
            extract_content(body).expect("content"),
            r#"{"start_time":"09:00"}"#
        );
    }

    #[test]
    fn extract_content_rejects_empty_choices() {
        assert!(matches!(
            extract_content(r#"{"choices":[]}"#),
            Err(InfraError::Completion(_))
        ));
        assert!(matches!(
            extract_content(r#"{"choices":[{"message":{"content":null}}]}"#),
            Err(InfraError::Completion(_))
        ));
    }

    #[test]
    fn request_serializes_in_chat_completions_shape() {
        let request = ChatCompletionRequest {
            model: "gpt-4o-mini",
            messages: vec![ChatMessage {
                role: "user",
                content: "hi",
            }],
            max_tokens: 300,
            temperature: 0.5,
        };
        let value = serde_json::to_value(&request).expect("serialize");
        assert_eq!(value["model"], "gpt-4o-mini");
        assert_eq!(value["messages"][0]["role"], "user");
        assert_eq!(value["max_tokens"], 300);
    }

    #[tokio::test]
    async fn missing_api_key_fails_without_network() {
        let client =
            OpenAiCompletionClient::new("http://127.0.0.1:9/v1/chat/completions", " ", "m");
        let result = client.complete("prompt", Duration::from_millis(50)).await;
        assert!(matches!(result, Err(InfraError::Completion(_))));
    }
}
