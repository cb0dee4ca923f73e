//! OpenAI-compatible chat completions backend.

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::parse::parse_payload;
use super::prompt;
use super::{BackendError, BackendResult, GenerationRequest, InferenceBackend};
use crate::config::{BackendConfig, ConfigError};
use crate::pipeline::StagePayload;

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 2],
    temperature: f32,
    max_tokens: u32,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Debug, Deserialize)]
struct ChatReply {
    #[serde(default)]
    content: Option<String>,
}

pub struct RemoteBackend {
    client: reqwest::Client,
    url: String,
    api_key: Option<String>,
    config: BackendConfig,
}

impl RemoteBackend {
    pub fn new(config: &BackendConfig, timeout: Duration) -> Result<Self, ConfigError> {
        let endpoint = config.endpoint.trim().trim_end_matches('/');
        if endpoint.is_empty() {
            return Err(ConfigError::invalid("backend.endpoint", "must not be empty"));
        }
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ConfigError::invalid("backend", format!("cannot build HTTP client: {e}")))?;

        Ok(Self {
            client,
            url: format!("{endpoint}/chat/completions"),
            api_key: config.api_key.clone().filter(|k| !k.is_empty()),
            config: config.clone(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    async fn complete(&self, request: &GenerationRequest<'_>) -> BackendResult<String> {
        let prompt = prompt::build(request);
        let body = ChatRequest {
            model: self.config.model_for(request.stage),
            messages: [
                ChatMessage {
                    role: "system",
                    content: &prompt.system,
                },
                ChatMessage {
                    role: "user",
                    content: &prompt.user,
                },
            ],
            temperature: self.config.temperature,
            max_tokens: self.config.max_tokens,
            stream: false,
        };

        let mut builder = self.client.post(&self.url).json(&body);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder.send().await.map_err(classify_transport_error)?;
        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(classify_status(status, &detail));
        }

        // A stalled or dropped body is a transport failure; only a body that
        // arrived in full and does not decode is malformed.
        let bytes = response.bytes().await.map_err(classify_transport_error)?;
        let parsed: ChatResponse = serde_json::from_slice(&bytes)
            .map_err(|e| BackendError::malformed(format!("unreadable completion body: {e}")))?;
        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .filter(|content| !content.trim().is_empty())
            .ok_or_else(|| BackendError::malformed("completion has no message content"))
    }
}

fn classify_transport_error(error: reqwest::Error) -> BackendError {
    if error.is_timeout() {
        BackendError::unavailable(format!("request timed out: {error}"))
    } else if error.is_connect() {
        BackendError::unavailable(format!("connection failed: {error}"))
    } else {
        BackendError::unavailable(error.to_string())
    }
}

/// 429 and 5xx are worth waiting for; any other rejection will not change.
fn classify_status(status: StatusCode, detail: &str) -> BackendError {
    let snippet: String = detail.chars().take(200).collect();
    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        BackendError::unavailable(format!("HTTP {status}: {snippet}"))
    } else {
        BackendError::malformed(format!("HTTP {status}: {snippet}"))
    }
}

#[async_trait]
impl InferenceBackend for RemoteBackend {
    fn name(&self) -> &'static str {
        "remote"
    }

    async fn generate(&self, request: &GenerationRequest<'_>) -> BackendResult<StagePayload> {
        let content = self.complete(request).await?;
        tracing::trace!(
            target: "backend",
            "chunk {} {} reply: {} chars",
            request.chunk.chunk_id,
            request.stage,
            content.chars().count()
        );
        parse_payload(&content, request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        assert!(classify_status(StatusCode::TOO_MANY_REQUESTS, "").is_transient());
        assert!(classify_status(StatusCode::BAD_GATEWAY, "").is_transient());
        assert!(!classify_status(StatusCode::BAD_REQUEST, "bad model").is_transient());
        assert!(!classify_status(StatusCode::UNAUTHORIZED, "").is_transient());
    }

    #[test]
    fn test_url_joins_endpoint() {
        let config = BackendConfig {
            endpoint: "http://localhost:8000/v1/".into(),
            ..Default::default()
        };
        let backend = RemoteBackend::new(&config, Duration::from_secs(5)).unwrap();
        assert_eq!(backend.url(), "http://localhost:8000/v1/chat/completions");
    }

    #[test]
    fn test_empty_endpoint_is_rejected() {
        let config = BackendConfig {
            endpoint: "  ".into(),
            ..Default::default()
        };
        assert!(RemoteBackend::new(&config, Duration::from_secs(5)).is_err());
    }
}
