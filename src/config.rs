//! Configuration module for the corpus generation pipeline.
//!
//! This module provides a layered configuration system that supports:
//! - Default values
//! - TOML configuration file
//! - Environment variable overrides
//! - CLI argument overrides
//!
//! # Environment Variables
//!
//! Environment variables must be prefixed with `QC_` and use double underscores
//! to separate nested levels:
//! - `QC_GENERATION__WORKER_COUNT=48` sets `generation.worker_count`
//! - `QC_BACKEND__MODE=remote` sets `backend.mode`
//! - `QC_CHUNKING__CHUNK_SIZE=800` sets `chunking.chunk_size`

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::backend::BackendMode;
use crate::documents::{ChunkingConfig, QualityConfig};
use crate::pipeline::Stage;

/// Directory holding the workspace settings file.
pub const CONFIG_DIR: &str = ".quadchain";
pub const CONFIG_FILE: &str = "settings.toml";
pub const ENV_PREFIX: &str = "QC_";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid configuration value for '{field}': {reason}")]
    Invalid { field: String, reason: String },

    #[error("Failed to load configuration: {0}")]
    Load(#[from] Box<figment::Error>),

    #[error("Failed to write configuration to {path}: {reason}")]
    Write { path: String, reason: String },
}

impl ConfigError {
    pub fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Settings {
    /// Version of the configuration schema
    #[serde(default = "default_version")]
    pub version: u32,

    /// Directory of extracted documents
    #[serde(default = "default_input_dir")]
    pub input_dir: PathBuf,

    /// Directory receiving chunk and stage artifacts
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    /// Workspace root directory (where .quadchain is located)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workspace_root: Option<PathBuf>,

    #[serde(default)]
    pub chunking: ChunkingConfig,

    #[serde(default)]
    pub generation: GenerationConfig,

    #[serde(default)]
    pub backend: BackendConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct GenerationConfig {
    /// Stages to run, in pipeline order
    #[serde(default = "default_stages")]
    pub stages: Vec<Stage>,

    /// Question and answer languages; the first is the primary one
    #[serde(default = "default_languages")]
    pub languages: Vec<String>,

    /// Concurrent backend calls per stage
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,

    /// Retries after the first attempt
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Per-call timeout in seconds
    #[serde(default = "default_call_timeout_secs")]
    pub call_timeout_secs: u64,

    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,

    #[serde(default = "default_backoff_cap_ms")]
    pub backoff_cap_ms: u64,

    /// Minimum normalized critique score for a review to count as passing
    #[serde(default = "default_quality_threshold")]
    pub quality_threshold: f32,

    #[serde(default = "default_keywords_per_chunk")]
    pub keywords_per_chunk: usize,

    #[serde(default = "default_base_questions")]
    pub base_questions: usize,

    #[serde(default = "default_questions_per_keyword")]
    pub questions_per_keyword: usize,

    /// Chunk text sent to the backend is cut to this many characters
    #[serde(default = "default_max_context_chars")]
    pub max_context_chars: usize,

    /// Write stage records in input order instead of completion order
    #[serde(default = "default_false")]
    pub ordered_output: bool,

    /// Show a progress bar per stage on interactive terminals
    #[serde(default = "default_true")]
    pub show_progress: bool,

    /// Log a metrics report at the end of every stage
    #[serde(default = "default_false")]
    pub pipeline_tracing: bool,

    /// Quality predicate for generated questions and answers
    #[serde(default = "default_payload_quality")]
    pub payload_quality: QualityConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct BackendConfig {
    #[serde(default)]
    pub mode: BackendMode,

    /// Base URL of an OpenAI-compatible API
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    /// Bearer credential for the remote endpoint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Model used by every stage without an override
    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    #[serde(default)]
    pub models: StageModels,
}

/// Per-stage model overrides.
#[derive(Debug, Deserialize, Serialize, Clone, Default, PartialEq)]
pub struct StageModels {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keyword: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub question: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub answer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub critique: Option<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LoggingConfig {
    /// Default level for every target
    #[serde(default = "default_log_level")]
    pub default: String,

    /// Per-target levels, e.g. `runner = "debug"`
    #[serde(default)]
    pub modules: HashMap<String, String>,
}

// Default value functions
fn default_version() -> u32 {
    1
}
fn default_input_dir() -> PathBuf {
    PathBuf::from("datasets")
}
fn default_output_dir() -> PathBuf {
    PathBuf::from("corpus")
}
fn default_true() -> bool {
    true
}
fn default_false() -> bool {
    false
}
fn default_stages() -> Vec<Stage> {
    Stage::ALL.to_vec()
}
fn default_languages() -> Vec<String> {
    vec!["zh".to_string(), "en".to_string()]
}
fn default_worker_count() -> usize {
    32
}
fn default_max_retries() -> u32 {
    2
}
fn default_call_timeout_secs() -> u64 {
    120
}
fn default_backoff_base_ms() -> u64 {
    500
}
fn default_backoff_cap_ms() -> u64 {
    30_000
}
fn default_quality_threshold() -> f32 {
    0.65
}
fn default_keywords_per_chunk() -> usize {
    3
}
fn default_base_questions() -> usize {
    5
}
fn default_questions_per_keyword() -> usize {
    2
}
fn default_max_context_chars() -> usize {
    1600
}
fn default_payload_quality() -> QualityConfig {
    QualityConfig {
        min_len: 4,
        max_len: 4000,
        ..QualityConfig::default()
    }
}
fn default_endpoint() -> String {
    "http://localhost:11434/v1".to_string()
}
fn default_model() -> String {
    "llama3.1:8b-instruct".to_string()
}
fn default_temperature() -> f32 {
    0.2
}
fn default_max_tokens() -> u32 {
    768
}
fn default_log_level() -> String {
    "warn".to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            version: default_version(),
            input_dir: default_input_dir(),
            output_dir: default_output_dir(),
            workspace_root: None,
            chunking: ChunkingConfig::default(),
            generation: GenerationConfig::default(),
            backend: BackendConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            stages: default_stages(),
            languages: default_languages(),
            worker_count: default_worker_count(),
            max_retries: default_max_retries(),
            call_timeout_secs: default_call_timeout_secs(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff_cap_ms: default_backoff_cap_ms(),
            quality_threshold: default_quality_threshold(),
            keywords_per_chunk: default_keywords_per_chunk(),
            base_questions: default_base_questions(),
            questions_per_keyword: default_questions_per_keyword(),
            max_context_chars: default_max_context_chars(),
            ordered_output: false,
            show_progress: true,
            pipeline_tracing: false,
            payload_quality: default_payload_quality(),
        }
    }
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            mode: BackendMode::default(),
            endpoint: default_endpoint(),
            api_key: None,
            model: default_model(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            models: StageModels::default(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            default: default_log_level(),
            modules: HashMap::new(),
        }
    }
}

impl BackendConfig {
    /// Model name for `stage`, falling back to the shared model.
    pub fn model_for(&self, stage: Stage) -> &str {
        let specific = match stage {
            Stage::Keyword => &self.models.keyword,
            Stage::Question => &self.models.question,
            Stage::Answer => &self.models.answer,
            Stage::Critique => &self.models.critique,
        };
        specific.as_deref().unwrap_or(&self.model)
    }
}

impl Settings {
    /// Load configuration from all sources
    pub fn load() -> Result<Self, ConfigError> {
        // Try to find the workspace root by looking for .quadchain directory
        let config_path = Self::find_workspace_config()
            .unwrap_or_else(|| PathBuf::from(CONFIG_DIR).join(CONFIG_FILE));

        let mut settings = Self::figment(&config_path)
            .extract::<Settings>()
            .map_err(Box::new)?;
        // If workspace_root is not set in config, detect it
        if settings.workspace_root.is_none() {
            settings.workspace_root = Self::workspace_root();
        }
        Ok(settings)
    }

    /// Load configuration from a specific file
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let settings = Self::figment(path.as_ref())
            .extract::<Settings>()
            .map_err(Box::new)?;
        Ok(settings)
    }

    fn figment(config_path: &Path) -> Figment {
        Figment::new()
            // Start with defaults
            .merge(Serialized::defaults(Settings::default()))
            // Layer in config file if it exists
            .merge(Toml::file(config_path))
            // Double underscore separates nested levels, single underscore stays
            .merge(Env::prefixed(ENV_PREFIX).map(|key| {
                key.as_str().to_lowercase().replace("__", ".").into()
            }))
    }

    /// Find the workspace config by looking for .quadchain directory
    /// Searches from current directory up to root
    pub fn find_workspace_config() -> Option<PathBuf> {
        Self::workspace_root().map(|root| root.join(CONFIG_DIR).join(CONFIG_FILE))
    }

    /// Get the workspace root directory (where .quadchain is located)
    pub fn workspace_root() -> Option<PathBuf> {
        let current = std::env::current_dir().ok()?;

        current
            .ancestors()
            .find(|ancestor| ancestor.join(CONFIG_DIR).is_dir())
            .map(Path::to_path_buf)
    }

    /// Resolve a configured path against the workspace root.
    pub fn resolve(&self, path: &Path) -> PathBuf {
        match &self.workspace_root {
            Some(root) if path.is_relative() => root.join(path),
            _ => path.to_path_buf(),
        }
    }

    pub fn input_path(&self) -> PathBuf {
        self.resolve(&self.input_dir)
    }

    pub fn output_path(&self) -> PathBuf {
        self.resolve(&self.output_dir)
    }

    /// Copy with credentials masked, for display.
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        if copy.backend.api_key.is_some() {
            copy.backend.api_key = Some("********".to_string());
        }
        copy
    }

    /// Save current configuration to file
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let write_error = |reason: String| ConfigError::Write {
            path: path.display().to_string(),
            reason,
        };

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| write_error(e.to_string()))?;
        }
        let toml_string = toml::to_string_pretty(self).map_err(|e| write_error(e.to_string()))?;
        std::fs::write(path, toml_string).map_err(|e| write_error(e.to_string()))?;

        Ok(())
    }

    /// Create a default settings file under `root`
    pub fn init_config_file(root: &Path, force: bool) -> Result<PathBuf, ConfigError> {
        let config_path = root.join(CONFIG_DIR).join(CONFIG_FILE);

        if !force && config_path.exists() {
            return Err(ConfigError::Write {
                path: config_path.display().to_string(),
                reason: "configuration file already exists, use --force to overwrite".to_string(),
            });
        }

        Settings::default().save(&config_path)?;
        tracing::debug!(target: "cli", "wrote default settings to {}", config_path.display());
        Ok(config_path)
    }

    /// Check every cross-field constraint.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.chunking
            .validate()
            .map_err(|reason| ConfigError::invalid("chunking", reason))?;

        let generation = &self.generation;
        if generation.stages.is_empty() {
            return Err(ConfigError::invalid("generation.stages", "select at least one stage"));
        }
        if generation.languages.iter().all(|l| l.trim().is_empty()) {
            return Err(ConfigError::invalid(
                "generation.languages",
                "at least one language is required",
            ));
        }
        if generation.worker_count == 0 {
            return Err(ConfigError::invalid("generation.worker_count", "must be at least 1"));
        }
        if generation.call_timeout_secs == 0 {
            return Err(ConfigError::invalid(
                "generation.call_timeout_secs",
                "must be at least 1",
            ));
        }
        if generation.backoff_base_ms > generation.backoff_cap_ms {
            return Err(ConfigError::invalid(
                "generation.backoff_base_ms",
                format!(
                    "base delay ({}) exceeds the cap ({})",
                    generation.backoff_base_ms, generation.backoff_cap_ms
                ),
            ));
        }
        if !(0.0..=1.0).contains(&generation.quality_threshold) {
            return Err(ConfigError::invalid(
                "generation.quality_threshold",
                format!("{} is outside [0, 1]", generation.quality_threshold),
            ));
        }
        if generation.keywords_per_chunk == 0 {
            return Err(ConfigError::invalid(
                "generation.keywords_per_chunk",
                "must be at least 1",
            ));
        }
        if generation.max_context_chars == 0 {
            return Err(ConfigError::invalid(
                "generation.max_context_chars",
                "must be at least 1",
            ));
        }
        generation
            .payload_quality
            .validate()
            .map_err(|reason| ConfigError::invalid("generation.payload_quality", reason))?;

        if self.backend.mode == BackendMode::Remote {
            let endpoint = self.backend.endpoint.trim();
            if !(endpoint.starts_with("http://") || endpoint.starts_with("https://")) {
                return Err(ConfigError::invalid(
                    "backend.endpoint",
                    "remote mode needs an http(s) endpoint",
                ));
            }
        }
        if !(0.0..=2.0).contains(&self.backend.temperature) {
            return Err(ConfigError::invalid(
                "backend.temperature",
                format!("{} is outside [0, 2]", self.backend.temperature),
            ));
        }
        if self.backend.max_tokens == 0 {
            return Err(ConfigError::invalid("backend.max_tokens", "must be at least 1"));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_default_settings() {
        let settings = Settings::default();
        assert_eq!(settings.version, 1);
        assert_eq!(settings.input_dir, PathBuf::from("datasets"));
        assert_eq!(settings.generation.worker_count, 32);
        assert_eq!(settings.generation.stages, Stage::ALL.to_vec());
        assert_eq!(settings.backend.mode, BackendMode::Mock);
        assert_eq!(settings.generation.payload_quality.min_len, 4);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_load_from_toml() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("settings.toml");

        let toml_content = r#"
version = 2
output_dir = "out"

[chunking]
chunk_size = 800
overlap = 100

[generation]
stages = ["keyword", "question"]
worker_count = 16
languages = ["en"]

[generation.payload_quality]
min_len = 8

[backend]
mode = "remote"
endpoint = "https://llm.internal/v1"

[backend.models]
critique = "judge-large"
"#;

        fs::write(&config_path, toml_content).unwrap();

        let settings = Settings::load_from(&config_path).unwrap();
        assert_eq!(settings.version, 2);
        assert_eq!(settings.output_dir, PathBuf::from("out"));
        assert_eq!(settings.chunking.chunk_size, 800);
        assert_eq!(settings.generation.stages, vec![Stage::Keyword, Stage::Question]);
        assert_eq!(settings.generation.worker_count, 16);
        assert_eq!(settings.generation.payload_quality.min_len, 8);
        // Unspecified nested values keep their defaults
        assert_eq!(settings.generation.payload_quality.max_len, 4000);
        assert_eq!(settings.backend.mode, BackendMode::Remote);
        assert_eq!(settings.backend.model_for(Stage::Critique), "judge-large");
        assert_eq!(settings.backend.model_for(Stage::Keyword), "llama3.1:8b-instruct");
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_save_settings() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("nested").join("settings.toml");

        let mut settings = Settings::default();
        settings.generation.max_retries = 5;
        settings.chunking.separators = vec!["\n\n".to_string(), "。".to_string()];

        settings.save(&config_path).unwrap();

        let loaded = Settings::load_from(&config_path).unwrap();
        assert_eq!(loaded.generation.max_retries, 5);
        assert_eq!(loaded.chunking.separators, settings.chunking.separators);
        assert_eq!(loaded.chunking.terminal_marks, settings.chunking.terminal_marks);
    }

    #[test]
    fn test_init_config_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = Settings::init_config_file(temp_dir.path(), false).unwrap();
        assert!(path.ends_with(".quadchain/settings.toml"));
        assert!(matches!(
            Settings::init_config_file(temp_dir.path(), false),
            Err(ConfigError::Write { .. })
        ));
        assert!(Settings::init_config_file(temp_dir.path(), true).is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut settings = Settings::default();
        settings.chunking.overlap = settings.chunking.chunk_size;
        assert!(matches!(settings.validate(), Err(ConfigError::Invalid { field, .. }) if field == "chunking"));

        let mut settings = Settings::default();
        settings.generation.worker_count = 0;
        assert!(settings.validate().is_err());

        let mut settings = Settings::default();
        settings.generation.quality_threshold = 1.5;
        assert!(settings.validate().is_err());

        let mut settings = Settings::default();
        settings.generation.languages.clear();
        assert!(settings.validate().is_err());

        let mut settings = Settings::default();
        settings.backend.mode = BackendMode::Remote;
        settings.backend.endpoint = "localhost".into();
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_unknown_stage_fails_to_load() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("settings.toml");
        fs::write(&config_path, "[generation]\nstages = [\"summary\"]\n").unwrap();
        assert!(matches!(Settings::load_from(&config_path), Err(ConfigError::Load(_))));
    }

    #[test]
    fn test_resolve_against_workspace_root() {
        let mut settings = Settings::default();
        settings.workspace_root = Some(PathBuf::from("/work"));
        assert_eq!(settings.input_path(), PathBuf::from("/work/datasets"));
        assert_eq!(settings.resolve(Path::new("/abs")), PathBuf::from("/abs"));
    }

    #[test]
    fn test_redacted_masks_api_key() {
        let mut settings = Settings::default();
        settings.backend.api_key = Some("sk-secret".into());
        let shown = toml::to_string_pretty(&settings.redacted()).unwrap();
        assert!(!shown.contains("sk-secret"));
    }
}
