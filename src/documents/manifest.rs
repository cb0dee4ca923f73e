//! Fingerprint of the inputs a chunk artifact was built from.
//!
//! Chunk ids are only stable while the input files and chunking settings
//! stay the same. The manifest records both so a later run can tell whether
//! an existing `chunks.jsonl` may be reused.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::chunker::BuildStats;
use super::config::ChunkingConfig;
use super::loader::{SourceFile, hash_bytes};

pub const MANIFEST_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputManifest {
    pub version: u32,
    /// Hash of the chunking settings that influence segment boundaries.
    pub config_hash: String,
    /// Source identifier to content hash.
    pub files: BTreeMap<String, String>,
    pub created_at: String,
    /// Statistics of the build that produced the chunks.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stats: Option<BuildStats>,
}

impl InputManifest {
    pub fn new(files: &[SourceFile], config: &ChunkingConfig) -> Self {
        Self {
            version: MANIFEST_VERSION,
            config_hash: config_fingerprint(config),
            files: files
                .iter()
                .map(|f| (f.source.clone(), f.content_hash.clone()))
                .collect(),
            created_at: chrono::Utc::now().to_rfc3339(),
            stats: None,
        }
    }

    pub fn with_stats(mut self, stats: BuildStats) -> Self {
        self.stats = Some(stats);
        self
    }

    /// Same inputs and settings, ignoring the creation time.
    pub fn matches(&self, other: &InputManifest) -> bool {
        self.version == other.version
            && self.config_hash == other.config_hash
            && self.files == other.files
    }

    /// Sources that were added, removed or changed relative to `previous`.
    pub fn changed_sources(&self, previous: &InputManifest) -> Vec<String> {
        let mut changed: Vec<String> = self
            .files
            .iter()
            .filter(|(source, hash)| previous.files.get(*source) != Some(*hash))
            .map(|(source, _)| source.clone())
            .collect();
        changed.extend(
            previous
                .files
                .keys()
                .filter(|source| !self.files.contains_key(*source))
                .cloned(),
        );
        changed.sort();
        changed
    }
}

fn config_fingerprint(config: &ChunkingConfig) -> String {
    // Thread count does not change the output.
    let relevant = serde_json::json!({
        "chunk_size": config.chunk_size,
        "overlap": config.overlap,
        "separators": config.separators,
        "min_len": config.min_len,
        "max_len": config.max_len,
        "density_threshold": config.density_threshold,
        "terminal_marks": config.terminal_marks,
        "clean_text": config.clean_text,
    });
    hash_bytes(relevant.to_string().as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn file(source: &str, hash: &str) -> SourceFile {
        SourceFile {
            path: PathBuf::from(source),
            source: source.to_string(),
            content_hash: hash.to_string(),
        }
    }

    #[test]
    fn test_matches_ignores_timestamp_and_threads() {
        let config = ChunkingConfig::default();
        let a = InputManifest::new(&[file("a.txt", "1")], &config);
        let mut b = InputManifest::new(
            &[file("a.txt", "1")],
            &ChunkingConfig {
                parallel_threads: 99,
                ..config.clone()
            },
        );
        b.created_at = "earlier".to_string();
        assert!(a.matches(&b));
    }

    #[test]
    fn test_config_change_breaks_match() {
        let files = [file("a.txt", "1")];
        let a = InputManifest::new(&files, &ChunkingConfig::default());
        let b = InputManifest::new(
            &files,
            &ChunkingConfig {
                chunk_size: 900,
                ..Default::default()
            },
        );
        assert!(!a.matches(&b));
    }

    #[test]
    fn test_changed_sources() {
        let config = ChunkingConfig::default();
        let old = InputManifest::new(&[file("a.txt", "1"), file("b.txt", "2")], &config);
        let new = InputManifest::new(&[file("a.txt", "1"), file("b.txt", "3"), file("c.txt", "4")], &config);
        assert_eq!(new.changed_sources(&old), vec!["b.txt", "c.txt"]);

        let shrunk = InputManifest::new(&[file("a.txt", "1")], &config);
        assert_eq!(shrunk.changed_sources(&old), vec!["b.txt"]);
    }
}
