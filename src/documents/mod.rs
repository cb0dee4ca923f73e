//! Source documents and their conversion into chunks.
//!
//! This module provides:
//! - Loading extracted page text from an input directory
//! - Noise removal for extracted text
//! - Separator-fallback chunk building with overlap
//! - The quality predicate shared with generated payloads
//! - An input manifest for safe reuse of chunk artifacts

pub mod chunker;
pub mod clean;
pub mod config;
pub mod loader;
pub mod manifest;
pub mod quality;
pub mod types;

pub use chunker::{BuildStats, ChunkBuild, ChunkBuilder, PageOutcome};
pub use clean::{CleanedText, clean_text, clean_with_origin};
pub use config::{ChunkingConfig, QualityConfig};
pub use loader::{InputError, InputResult, LoadedCorpus, SourceFile, load_directory};
pub use manifest::InputManifest;
pub use quality::{Rejection, RejectionCounts, evaluate, is_quality};
pub use types::{Chunk, ChunkId, RawSegment, SourcePage, truncate_chars};
