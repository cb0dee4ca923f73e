//! Separator-fallback chunk builder.
//!
//! Algorithm:
//! 1. Split the span at the first separator (in priority order) that occurs in it,
//!    keeping the separator on the left piece
//! 2. Greedily pack consecutive pieces up to `chunk_size`
//! 3. Recurse into pieces still larger than `chunk_size` with the remaining separators
//! 4. With no separator left, hard-cut at `chunk_size` (single tokens stay whole)
//! 5. Merge segments shorter than `min_len` into a neighbour when they fit
//! 6. Extend every segment but the first backwards by `overlap` characters
//! 7. Drop segments failing the quality filter
//!
//! All positions are character indices, never byte offsets. With cleaning on,
//! chunk offsets are mapped back to the uncleaned page text.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use super::clean::clean_with_origin;
use super::config::{ChunkingConfig, QualityConfig};
use super::quality::{RejectionCounts, evaluate, is_cjk};
use super::types::{Chunk, ChunkId, RawSegment, SourcePage};

/// Character span inside a page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Span {
    start: usize,
    end: usize,
    oversized: bool,
}

impl Span {
    fn new(start: usize, end: usize) -> Self {
        Self {
            start,
            end,
            oversized: false,
        }
    }

    fn len(&self) -> usize {
        self.end - self.start
    }
}

/// Segments accepted from one page plus what was thrown away.
#[derive(Debug, Default)]
pub struct PageOutcome {
    pub accepted: Vec<RawSegment>,
    pub rejected: RejectionCounts,
}

/// Statistics for a full build.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildStats {
    pub pages: usize,
    pub empty_pages: usize,
    pub segments: usize,
    pub chunks: usize,
    pub oversized: usize,
    pub rejected: RejectionCounts,
}

/// Result of chunking a corpus.
#[derive(Debug, Default)]
pub struct ChunkBuild {
    pub chunks: Vec<Chunk>,
    pub stats: BuildStats,
}

/// Splits page text into bounded, quality-filtered segments.
#[derive(Debug, Clone)]
pub struct ChunkBuilder {
    config: ChunkingConfig,
    separators: Vec<Vec<char>>,
    quality: QualityConfig,
}

impl ChunkBuilder {
    pub fn new(config: ChunkingConfig) -> Self {
        let separators = config
            .separators
            .iter()
            .filter(|s| !s.is_empty())
            .map(|s| s.chars().collect())
            .collect();
        let quality = config.quality();
        Self {
            config,
            separators,
            quality,
        }
    }

    pub fn config(&self) -> &ChunkingConfig {
        &self.config
    }

    /// Bounded segments of `text` before quality filtering.
    pub fn segments(&self, text: &str) -> Vec<RawSegment> {
        let chars: Vec<char> = text.chars().collect();
        if chars.is_empty() {
            return Vec::new();
        }

        let mut spans = Vec::new();
        self.split_range(&chars, 0, chars.len(), &self.separators, &mut spans);

        let trimmed: Vec<Span> = spans
            .into_iter()
            .filter_map(|span| trim_span(&chars, span))
            .collect();
        let merged = self.merge_short(trimmed);
        self.apply_overlap(&chars, &merged)
    }

    /// Segments of one page that pass the quality filter.
    pub fn split_page(&self, text: &str) -> PageOutcome {
        let mut outcome = PageOutcome::default();
        for segment in self.segments(text) {
            match evaluate(&segment.text, &self.quality, segment.oversized) {
                Ok(()) => outcome.accepted.push(segment),
                Err(rejection) => {
                    tracing::trace!(
                        target: "chunking",
                        "dropped segment at {}..{}: {rejection}",
                        segment.char_range.0,
                        segment.char_range.1
                    );
                    outcome.rejected.record(&rejection);
                }
            }
        }
        outcome
    }

    /// Chunk a corpus. Pages are split in parallel; ids are assigned afterwards
    /// in page order so the result does not depend on scheduling.
    pub fn build(&self, pages: &[SourcePage]) -> ChunkBuild {
        let split = |page: &SourcePage| {
            if !self.config.clean_text {
                return (page.text.chars().count(), self.split_page(&page.text));
            }
            let cleaned = clean_with_origin(&page.text);
            let mut outcome = self.split_page(&cleaned.text);
            for segment in &mut outcome.accepted {
                segment.char_range = cleaned.source_range(segment.char_range);
            }
            (cleaned.char_count(), outcome)
        };

        let outcomes: Vec<(usize, PageOutcome)> =
            match rayon::ThreadPoolBuilder::new()
                .num_threads(self.config.parallel_threads.max(1))
                .build()
            {
                Ok(pool) => pool.install(|| pages.par_iter().map(split).collect()),
                Err(e) => {
                    tracing::warn!(target: "chunking", "falling back to global thread pool: {e}");
                    pages.par_iter().map(split).collect()
                }
            };

        let mut build = ChunkBuild::default();
        build.stats.pages = pages.len();
        let mut next_id = 0u32;

        for (page, (page_len, outcome)) in pages.iter().zip(outcomes) {
            if page_len < self.config.min_len {
                build.stats.empty_pages += 1;
                tracing::debug!(
                    target: "chunking",
                    "{} page {:?} shorter than min_len ({page_len} chars), no chunks",
                    page.source,
                    page.page
                );
            }

            build.stats.segments += outcome.accepted.len() + outcome.rejected.total();
            build.stats.rejected.merge(&outcome.rejected);

            for segment in outcome.accepted {
                if segment.oversized {
                    build.stats.oversized += 1;
                }
                build
                    .chunks
                    .push(Chunk::from_segment(ChunkId::new(next_id), page, segment));
                next_id += 1;
            }
        }

        build.stats.chunks = build.chunks.len();
        tracing::info!(
            target: "chunking",
            "built {} chunks from {} pages ({} segments, {} rejected, {} oversized)",
            build.stats.chunks,
            build.stats.pages,
            build.stats.segments,
            build.stats.rejected.total(),
            build.stats.oversized
        );
        build
    }

    fn split_range(
        &self,
        chars: &[char],
        start: usize,
        end: usize,
        separators: &[Vec<char>],
        out: &mut Vec<Span>,
    ) {
        let chunk_size = self.config.chunk_size;
        if end - start <= chunk_size {
            out.push(Span::new(start, end));
            return;
        }

        let found = separators
            .iter()
            .position(|sep| find(chars, start, end, sep).is_some());
        let Some(idx) = found else {
            self.hard_cut(chars, start, end, out);
            return;
        };
        let remaining = &separators[idx + 1..];

        let mut pending: Option<(usize, usize)> = None;
        for (piece_start, piece_end) in pieces(chars, start, end, &separators[idx]) {
            if piece_end - piece_start > chunk_size {
                if let Some((s, e)) = pending.take() {
                    out.push(Span::new(s, e));
                }
                self.split_range(chars, piece_start, piece_end, remaining, out);
                continue;
            }

            pending = match pending {
                Some((s, _)) if piece_end - s <= chunk_size => Some((s, piece_end)),
                Some((s, e)) => {
                    out.push(Span::new(s, e));
                    Some((piece_start, piece_end))
                }
                None => Some((piece_start, piece_end)),
            };
        }
        if let Some((s, e)) = pending {
            out.push(Span::new(s, e));
        }
    }

    fn hard_cut(&self, chars: &[char], start: usize, end: usize, out: &mut Vec<Span>) {
        let Some(inner) = trim_span(chars, Span::new(start, end)) else {
            return;
        };

        let single_token = chars[inner.start..inner.end]
            .iter()
            .all(|c| !c.is_whitespace() && !is_cjk(*c));
        if single_token {
            out.push(Span {
                oversized: inner.len() > self.config.chunk_size,
                ..inner
            });
            return;
        }

        let size = self.config.chunk_size.max(1);
        let mut pos = start;
        while pos < end {
            let cut = (pos + size).min(end);
            out.push(Span::new(pos, cut));
            pos = cut;
        }
    }

    fn merge_short(&self, spans: Vec<Span>) -> Vec<Span> {
        let min_len = self.config.min_len;
        let chunk_size = self.config.chunk_size;
        let mut merged: Vec<Span> = Vec::with_capacity(spans.len());

        for span in spans {
            if let Some(last) = merged.last_mut() {
                let short = last.len() < min_len || span.len() < min_len;
                let fits = span.end - last.start <= chunk_size;
                if short && fits && !last.oversized && !span.oversized {
                    last.end = span.end;
                    continue;
                }
            }
            merged.push(span);
        }
        merged
    }

    fn apply_overlap(&self, chars: &[char], spans: &[Span]) -> Vec<RawSegment> {
        let overlap = self.config.overlap;
        let mut segments = Vec::with_capacity(spans.len());

        for (i, span) in spans.iter().enumerate() {
            let mut start = span.start;
            if i > 0 && overlap > 0 && !span.oversized {
                let floor = spans[i - 1].start;
                start = span.start.saturating_sub(overlap).max(floor);
                while start < span.start && chars[start].is_whitespace() {
                    start += 1;
                }
            }
            segments.push(RawSegment {
                char_range: (start, span.end),
                text: chars[start..span.end].iter().collect(),
                oversized: span.oversized,
            });
        }
        segments
    }
}

/// Position of the first occurrence of `sep` inside `[start, end)`.
fn find(chars: &[char], start: usize, end: usize, sep: &[char]) -> Option<usize> {
    if sep.is_empty() || end - start < sep.len() {
        return None;
    }
    (start..=end - sep.len()).find(|&i| chars[i..i + sep.len()] == *sep)
}

/// Pieces of `[start, end)` split after every occurrence of `sep`.
fn pieces(chars: &[char], start: usize, end: usize, sep: &[char]) -> Vec<(usize, usize)> {
    let mut out = Vec::new();
    let mut piece_start = start;
    let mut pos = start;
    while let Some(hit) = find(chars, pos, end, sep) {
        let piece_end = hit + sep.len();
        out.push((piece_start, piece_end));
        piece_start = piece_end;
        pos = piece_end;
    }
    if piece_start < end {
        out.push((piece_start, end));
    }
    out
}

fn trim_span(chars: &[char], span: Span) -> Option<Span> {
    let mut start = span.start;
    let mut end = span.end;
    while start < end && chars[start].is_whitespace() {
        start += 1;
    }
    while end > start && chars[end - 1].is_whitespace() {
        end -= 1;
    }
    (start < end).then_some(Span { start, end, ..span })
}
