//! Noise removal for extracted page text.
//!
//! Extraction leaves page numbers, running footers and copyright lines in the
//! text. They carry no content and break sentence packing, so they are
//! removed before splitting. Every kept character remembers its position in
//! the page text, so chunk offsets still address the source.

use regex::Regex;
use std::sync::OnceLock;

const NOISE_LINE_PATTERNS: &[&str] = &[
    r"^\d{1,4}$",
    r"(?i)^page\s*\d+(\s*(of|/)\s*\d+)?$",
    r"^第\s*\d+\s*[頁页]$",
    r"^\d+\s*/\s*\d+$",
    r"(?i)^copyright\b",
    r"^©",
    r"^[-_=*~·•]{3,}$",
];

fn noise_patterns() -> &'static [Regex] {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        NOISE_LINE_PATTERNS
            .iter()
            .filter_map(|p| Regex::new(p).ok())
            .collect()
    })
}

/// True for lines that only carry layout noise.
pub fn is_noise_line(line: &str) -> bool {
    let trimmed = line.trim();
    !trimmed.is_empty() && noise_patterns().iter().any(|re| re.is_match(trimmed))
}

/// Cleaned text plus, for each of its characters, the character index it
/// came from in the original.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanedText {
    pub text: String,
    origin: Vec<usize>,
}

impl CleanedText {
    /// Map a character range of the cleaned text onto the original.
    ///
    /// The mapped range spans from the first to the last kept character, so
    /// it also covers any noise removed in between.
    pub fn source_range(&self, (start, end): (usize, usize)) -> (usize, usize) {
        if start >= end {
            let at = self.origin.get(start).copied().unwrap_or(start);
            return (at, at);
        }
        match (self.origin.get(start), self.origin.get(end - 1)) {
            (Some(&first), Some(&last)) => (first, last + 1),
            _ => (start, end),
        }
    }

    pub fn char_count(&self) -> usize {
        self.origin.len()
    }
}

type Line = Vec<(char, usize)>;

/// Normalise line endings, drop noise lines and collapse blank-line runs.
pub fn clean_text(text: &str) -> String {
    clean_with_origin(text).text
}

/// [`clean_text`] that keeps the source position of every character.
pub fn clean_with_origin(text: &str) -> CleanedText {
    // Split into lines; `\r\n` and lone `\r` both end a line.
    let mut lines: Vec<(Line, Option<usize>)> = Vec::new();
    let mut current: Line = Vec::new();
    let mut chars = text.chars().enumerate().peekable();
    while let Some((index, c)) = chars.next() {
        match c {
            '\r' if chars.peek().is_some_and(|(_, next)| *next == '\n') => {}
            '\r' | '\n' => lines.push((std::mem::take(&mut current), Some(index))),
            _ => current.push((c, index)),
        }
    }
    lines.push((current, None));

    let mut kept: Vec<(Line, Option<usize>)> = Vec::with_capacity(lines.len());
    for (mut line, newline) in lines {
        let content: String = line.iter().map(|(c, _)| *c).collect();
        if is_noise_line(&content) {
            continue;
        }
        while line.last().is_some_and(|(c, _)| c.is_whitespace()) {
            line.pop();
        }
        let blank = line.is_empty();
        let previous_blank = kept.last().is_some_and(|(l, _)| l.is_empty());
        if blank && previous_blank {
            continue;
        }
        kept.push((line, newline));
    }

    let mut joined: Line = Vec::new();
    let last = kept.len().saturating_sub(1);
    for (i, (line, newline)) in kept.into_iter().enumerate() {
        joined.extend(line);
        if i < last {
            joined.push(('\n', newline.unwrap_or(0)));
        }
    }

    let start = joined
        .iter()
        .position(|(c, _)| !c.is_whitespace())
        .unwrap_or(joined.len());
    let end = joined
        .iter()
        .rposition(|(c, _)| !c.is_whitespace())
        .map_or(start, |i| i + 1);
    let trimmed = &joined[start..end];

    CleanedText {
        text: trimmed.iter().map(|(c, _)| *c).collect(),
        origin: trimmed.iter().map(|(_, i)| *i).collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_noise_lines() {
        assert!(is_noise_line("12"));
        assert!(is_noise_line("  Page 3 "));
        assert!(is_noise_line("page 3 of 10"));
        assert!(is_noise_line("第 4 頁"));
        assert!(is_noise_line("3 / 10"));
        assert!(is_noise_line("Copyright 2021 Example Corp."));
        assert!(is_noise_line("© Example"));
        assert!(is_noise_line("-----"));
        assert!(!is_noise_line(""));
        assert!(!is_noise_line("Step 2 requires 12 bolts."));
        assert!(!is_noise_line("2024 budget overview"));
    }

    #[test]
    fn test_clean_text_removes_noise_and_collapses_blanks() {
        let raw = "Intro line.\r\n\r\n\r\n\r\n12\r\nBody text.\nPage 2\n\n\n\nEnd.   ";
        assert_eq!(clean_text(raw), "Intro line.\n\nBody text.\n\nEnd.");
    }

    #[test]
    fn test_origin_points_into_source() {
        let raw = "12\nPage 1\nThe compressor must be checked before start.";
        let cleaned = clean_with_origin(raw);
        assert_eq!(cleaned.text, "The compressor must be checked before start.");
        assert_eq!(cleaned.char_count(), 44);

        let (start, end) = cleaned.source_range((0, 44));
        assert_eq!((start, end), (10, 54));
        let slice: String = raw.chars().skip(start).take(end - start).collect();
        assert_eq!(slice, cleaned.text);
    }

    #[test]
    fn test_origin_across_crlf_and_collapsed_blanks() {
        let raw = "Intro.\r\n\r\n\r\nBody.";
        let cleaned = clean_with_origin(raw);
        assert_eq!(cleaned.text, "Intro.\n\nBody.");
        // "Body." starts after the three CRLF pairs.
        assert_eq!(cleaned.source_range((8, 13)), (12, 17));
    }

    #[test]
    fn test_clean_text_keeps_single_paragraph_break() {
        let raw = "First paragraph.\n\nSecond paragraph.";
        assert_eq!(clean_text(raw), raw);
    }
}
