//! Configuration types for chunk building and quality filtering.

use serde::{Deserialize, Serialize};

/// Configuration for the chunk builder.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkingConfig {
    /// Target maximum segment size in characters before overlap is added.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Characters of preceding source text prepended to every segment but the first.
    #[serde(default = "default_overlap")]
    pub overlap: usize,

    /// Split points in priority order. The separator stays with the left piece.
    #[serde(default = "default_separators")]
    pub separators: Vec<String>,

    /// Minimum accepted chunk length in characters.
    #[serde(default = "default_min_len")]
    pub min_len: usize,

    /// Maximum accepted chunk length in characters.
    #[serde(default = "default_max_len")]
    pub max_len: usize,

    /// Minimum ratio of alphanumeric or CJK characters.
    #[serde(default = "default_density_threshold")]
    pub density_threshold: f32,

    /// Characters a chunk may end with.
    #[serde(default = "default_terminal_marks")]
    pub terminal_marks: Vec<char>,

    /// Strip page numbers, copyright lines and blank-line runs before splitting.
    #[serde(default = "default_true")]
    pub clean_text: bool,

    /// Threads used to split pages in parallel.
    #[serde(default = "default_parallel_threads")]
    pub parallel_threads: usize,
}

fn default_chunk_size() -> usize {
    1200
}

fn default_overlap() -> usize {
    150
}

fn default_separators() -> Vec<String> {
    [
        "\n\n\n", "\n\n", "\n", "。", "！", "？", "；", ". ", "! ", "? ", "; ", "：", ": ", "，",
        ", ", "、", " ",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_min_len() -> usize {
    60
}

fn default_max_len() -> usize {
    1600
}

fn default_density_threshold() -> f32 {
    0.3
}

pub(crate) fn default_terminal_marks() -> Vec<char> {
    vec!['。', '！', '？', '.', '!', '?', '；', ';', '：', ':', '…']
}

fn default_true() -> bool {
    true
}

fn default_parallel_threads() -> usize {
    num_cpus::get()
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            overlap: default_overlap(),
            separators: default_separators(),
            min_len: default_min_len(),
            max_len: default_max_len(),
            density_threshold: default_density_threshold(),
            terminal_marks: default_terminal_marks(),
            clean_text: true,
            parallel_threads: default_parallel_threads(),
        }
    }
}

impl ChunkingConfig {
    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), String> {
        if self.chunk_size == 0 {
            return Err("chunk_size must be greater than zero".to_string());
        }

        if self.overlap >= self.chunk_size {
            return Err(format!(
                "overlap ({}) must be less than chunk_size ({})",
                self.overlap, self.chunk_size
            ));
        }

        if self.min_len > self.max_len {
            return Err(format!(
                "min_len ({}) must not exceed max_len ({})",
                self.min_len, self.max_len
            ));
        }

        if self.min_len > self.chunk_size {
            return Err(format!(
                "min_len ({}) must not exceed chunk_size ({})",
                self.min_len, self.chunk_size
            ));
        }

        if self.separators.iter().any(|s| s.is_empty()) {
            return Err("separators must not contain empty strings".to_string());
        }

        self.quality().validate()
    }

    /// Quality predicate configuration for produced chunks.
    pub fn quality(&self) -> QualityConfig {
        QualityConfig {
            min_len: self.min_len,
            max_len: self.max_len,
            density_threshold: self.density_threshold,
            terminal_marks: self.terminal_marks.clone(),
        }
    }
}

/// Thresholds for the quality predicate.
///
/// Chunks and text-bearing stage payloads are judged with separate instances.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QualityConfig {
    #[serde(default = "default_min_len")]
    pub min_len: usize,

    #[serde(default = "default_max_len")]
    pub max_len: usize,

    #[serde(default = "default_density_threshold")]
    pub density_threshold: f32,

    #[serde(default = "default_terminal_marks")]
    pub terminal_marks: Vec<char>,
}

impl Default for QualityConfig {
    fn default() -> Self {
        ChunkingConfig::default().quality()
    }
}

impl QualityConfig {
    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), String> {
        if self.min_len > self.max_len {
            return Err(format!(
                "min_len ({}) must not exceed max_len ({})",
                self.min_len, self.max_len
            ));
        }

        if !(0.0..=1.0).contains(&self.density_threshold) {
            return Err(format!(
                "density_threshold ({}) must be within [0, 1]",
                self.density_threshold
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunking_config_defaults() {
        let config = ChunkingConfig::default();
        assert_eq!(config.chunk_size, 1200);
        assert_eq!(config.overlap, 150);
        assert_eq!(config.min_len, 60);
        assert_eq!(config.max_len, 1600);
        assert_eq!(config.separators[0], "\n\n\n");
        assert_eq!(config.separators.last().map(String::as_str), Some(" "));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_chunking_config_validation() {
        let mut config = ChunkingConfig::default();

        config.overlap = config.chunk_size;
        assert!(config.validate().is_err());

        config.overlap = 10;
        config.min_len = 2000;
        assert!(config.validate().is_err());

        config.min_len = 60;
        config.density_threshold = 1.5;
        assert!(config.validate().is_err());

        config.density_threshold = 0.3;
        config.separators.push(String::new());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_quality_view_follows_chunking() {
        let config = ChunkingConfig {
            min_len: 5,
            max_len: 50,
            ..Default::default()
        };
        let quality = config.quality();
        assert_eq!(quality.min_len, 5);
        assert_eq!(quality.max_len, 50);
        assert_eq!(quality.terminal_marks, default_terminal_marks());
    }
}
