//! Staged QA corpus generation.
//!
//! Extracted documents are split into quality-filtered chunks, then every
//! chunk goes through keyword, question, answer and critique stages against
//! an inference backend. Each stage appends one record per chunk to its own
//! JSONL file so interrupted runs resume where they stopped.

pub mod backend;
pub mod cli;
pub mod config;
pub mod documents;
pub mod io;
pub mod logging;
pub mod pipeline;
pub mod store;

pub use backend::{BackendError, BackendMode, InferenceBackend, MockBackend, RemoteBackend};
pub use config::{ConfigError, Settings};
pub use documents::{Chunk, ChunkBuilder, ChunkId, ChunkingConfig, QualityConfig};
pub use io::ExitCode;
pub use pipeline::{Pipeline, PipelineError, RecordStatus, RunSummary, Stage, StageRecord};
pub use store::ArtifactStore;
