//! Stage runner configuration
//!
//! Controls concurrency, retries, timeouts and output ordering for every stage.
//! Reads from Settings (.quadchain/settings.toml).

use std::time::Duration;

use super::retry::RetryPolicy;
use super::validate::PayloadValidator;
use crate::backend::GenerationOptions;
use crate::config::Settings;

#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Concurrent backend calls
    pub worker_count: usize,

    pub policy: RetryPolicy,

    /// Per-call timeout; expiry counts as backend unavailable
    pub call_timeout: Duration,

    /// Buffer completions and write records in input order
    pub ordered_output: bool,

    /// Question languages; the first is primary
    pub languages: Vec<String>,

    pub options: GenerationOptions,

    pub validator: PayloadValidator,

    /// Log a metrics report per stage
    pub pipeline_tracing: bool,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self::from_settings(&Settings::default())
    }
}

impl RunnerConfig {
    /// Create config from Settings.
    ///
    /// Reads `[generation]`: worker_count, max_retries, backoff_base_ms,
    /// backoff_cap_ms, call_timeout_secs, ordered_output, languages,
    /// payload_quality, quality_threshold, pipeline_tracing.
    pub fn from_settings(settings: &Settings) -> Self {
        let generation = &settings.generation;
        Self {
            worker_count: generation.worker_count.max(1),
            policy: RetryPolicy {
                max_retries: generation.max_retries,
                base_delay: Duration::from_millis(generation.backoff_base_ms),
                max_delay: Duration::from_millis(generation.backoff_cap_ms),
            },
            call_timeout: Duration::from_secs(generation.call_timeout_secs.max(1)),
            ordered_output: generation.ordered_output,
            languages: generation.languages.clone(),
            options: GenerationOptions::from_config(generation),
            validator: PayloadValidator::new(
                generation.payload_quality.clone(),
                generation.quality_threshold,
            ),
            pipeline_tracing: generation.pipeline_tracing,
        }
    }

    /// Primary output language.
    pub fn primary_language(&self) -> &str {
        self.languages.first().map(String::as_str).unwrap_or("en")
    }

    /// Set worker count
    pub fn with_worker_count(mut self, workers: usize) -> Self {
        self.worker_count = workers.max(1);
        self
    }

    /// Set retry budget and backoff
    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Set per-call timeout
    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    /// Write records in input order
    pub fn with_ordered_output(mut self, ordered: bool) -> Self {
        self.ordered_output = ordered;
        self
    }

    pub fn with_languages(mut self, languages: Vec<String>) -> Self {
        self.languages = languages;
        self
    }

    pub fn with_options(mut self, options: GenerationOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_validator(mut self, validator: PayloadValidator) -> Self {
        self.validator = validator;
        self
    }
}
