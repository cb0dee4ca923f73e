//! Core types for chunks and their source pages.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Dense zero-based identifier assigned to every accepted chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChunkId(u32);

impl ChunkId {
    pub fn new(value: u32) -> Self {
        Self(value)
    }

    pub fn value(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for ChunkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One page of extracted text, the unit the chunk builder consumes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourcePage {
    /// Originating document identifier.
    pub source: String,

    /// 1-based page locator, absent for flat text.
    #[serde(default)]
    pub page: Option<u32>,

    /// Extracted text.
    pub text: String,
}

impl SourcePage {
    pub fn new(source: impl Into<String>, page: Option<u32>, text: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            page,
            text: text.into(),
        }
    }
}

/// A segment produced by the builder before an id is assigned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawSegment {
    /// Character range in the page text (start, end).
    pub char_range: (usize, usize),

    /// Segment text, trimmed.
    pub text: String,

    /// Single token longer than `chunk_size`, kept verbatim.
    pub oversized: bool,
}

impl RawSegment {
    pub fn char_count(&self) -> usize {
        self.text.chars().count()
    }
}

fn is_false(value: &bool) -> bool {
    !*value
}

/// An accepted, immutable chunk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub chunk_id: ChunkId,
    pub source: String,
    #[serde(default)]
    pub page: Option<u32>,
    pub text: String,
    pub char_offset_start: usize,
    pub char_offset_end: usize,
    #[serde(default, skip_serializing_if = "is_false")]
    pub oversized: bool,
}

impl Chunk {
    /// Promote a raw segment from `page` to a chunk with the given id.
    pub fn from_segment(chunk_id: ChunkId, page: &SourcePage, segment: RawSegment) -> Self {
        Self {
            chunk_id,
            source: page.source.clone(),
            page: page.page,
            text: segment.text,
            char_offset_start: segment.char_range.0,
            char_offset_end: segment.char_range.1,
            oversized: segment.oversized,
        }
    }

    pub fn char_count(&self) -> usize {
        self.text.chars().count()
    }

    /// First `max_chars` characters, cut on a character boundary.
    pub fn preview(&self, max_chars: usize) -> &str {
        truncate_chars(&self.text, max_chars)
    }

    /// Human-readable locator such as `manual.txt p.3`.
    pub fn locator(&self) -> String {
        match self.page {
            Some(page) => format!("{} p.{page}", self.source),
            None => self.source.clone(),
        }
    }
}

/// Longest prefix of `text` with at most `max_chars` characters.
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
