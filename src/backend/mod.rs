//! Inference backends.
//!
//! A backend turns a generation request for one chunk into a stage payload.
//! Two implementations exist:
//! - [`MockBackend`]: deterministic payloads derived from the chunk text, no network
//! - [`RemoteBackend`]: OpenAI-compatible chat completions endpoint
//!
//! Backends are stateless and shared across workers behind an `Arc`.

pub mod mock;
pub mod parse;
pub mod prompt;
pub mod remote;

pub use mock::MockBackend;
pub use remote::RemoteBackend;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::config::{ConfigError, GenerationConfig, Settings};
use crate::documents::Chunk;
use crate::pipeline::{Stage, StagePayload, Upstream};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum BackendError {
    /// Connection failures, timeouts, rate limiting and server errors.
    #[error("Backend unavailable: {reason}")]
    Unavailable { reason: String },

    /// A reply that cannot be read as the stage's payload.
    #[error("Malformed response: {reason}")]
    MalformedResponse { reason: String },
}

impl BackendError {
    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self::Unavailable {
            reason: reason.into(),
        }
    }

    pub fn malformed(reason: impl Into<String>) -> Self {
        Self::MalformedResponse {
            reason: reason.into(),
        }
    }

    /// Whether waiting may fix the error.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable { .. })
    }
}

pub type BackendResult<T> = Result<T, BackendError>;

/// Limits shaping every payload.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationOptions {
    pub keywords_per_chunk: usize,
    pub base_questions: usize,
    pub questions_per_keyword: usize,
    pub max_context_chars: usize,
}

impl Default for GenerationOptions {
    fn default() -> Self {
        Self::from_config(&GenerationConfig::default())
    }
}

impl GenerationOptions {
    pub fn from_config(config: &GenerationConfig) -> Self {
        Self {
            keywords_per_chunk: config.keywords_per_chunk,
            base_questions: config.base_questions,
            questions_per_keyword: config.questions_per_keyword,
            max_context_chars: config.max_context_chars,
        }
    }
}

/// Everything a backend needs for one call.
#[derive(Debug, Clone, Copy)]
pub struct GenerationRequest<'a> {
    pub stage: Stage,
    pub chunk: &'a Chunk,
    pub upstream: &'a Upstream,
    /// Primary output language.
    pub language: &'a str,
    /// All languages questions may be written in.
    pub languages: &'a [String],
    pub options: &'a GenerationOptions,
}

#[async_trait]
pub trait InferenceBackend: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    /// Produce the payload for `request.stage`.
    async fn generate(&self, request: &GenerationRequest<'_>) -> BackendResult<StagePayload>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendMode {
    #[default]
    Mock,
    Remote,
}

impl std::str::FromStr for BackendMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "mock" => Ok(BackendMode::Mock),
            "remote" | "openai" | "openai_compat" => Ok(BackendMode::Remote),
            other => Err(format!("unknown backend mode '{other}' (expected mock or remote)")),
        }
    }
}

/// Resolve the configured backend once for the whole run.
pub fn from_settings(settings: &Settings) -> Result<Arc<dyn InferenceBackend>, ConfigError> {
    match settings.backend.mode {
        BackendMode::Mock => {
            tracing::info!(target: "backend", "using mock backend");
            Ok(Arc::new(MockBackend::new()))
        }
        BackendMode::Remote => {
            let timeout = Duration::from_secs(settings.generation.call_timeout_secs);
            let backend = RemoteBackend::new(&settings.backend, timeout)?;
            tracing::info!(
                target: "backend",
                "using remote backend at {}",
                settings.backend.endpoint
            );
            Ok(Arc::new(backend))
        }
    }
}
