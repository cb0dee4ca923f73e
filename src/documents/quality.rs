//! Quality predicate for candidate text.
//!
//! A segment passes when its length is within bounds, enough of it is
//! alphanumeric or CJK, and it ends on a terminal punctuation mark.
//! The same predicate re-validates generated answers and questions.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::config::QualityConfig;

/// Why a candidate was rejected.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Rejection {
    TooShort { len: usize, min: usize },
    TooLong { len: usize, max: usize },
    LowDensity { ratio: f32, threshold: f32 },
    Unterminated,
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rejection::TooShort { len, min } => write!(f, "too short ({len} < {min} chars)"),
            Rejection::TooLong { len, max } => write!(f, "too long ({len} > {max} chars)"),
            Rejection::LowDensity { ratio, threshold } => {
                write!(f, "low density ({ratio:.2} < {threshold:.2})")
            }
            Rejection::Unterminated => write!(f, "does not end with terminal punctuation"),
        }
    }
}

/// Returns true when `text` passes every quality check.
pub fn is_quality(text: &str, config: &QualityConfig) -> bool {
    evaluate(text, config, false).is_ok()
}

/// Run the checks in order and report the first failure.
///
/// `allow_unterminated` skips the punctuation check for oversized verbatim
/// tokens such as URLs. Length and density still apply.
pub fn evaluate(text: &str, config: &QualityConfig, allow_unterminated: bool) -> Result<(), Rejection> {
    let len = text.chars().count();
    if len < config.min_len {
        return Err(Rejection::TooShort {
            len,
            min: config.min_len,
        });
    }
    if len > config.max_len {
        return Err(Rejection::TooLong {
            len,
            max: config.max_len,
        });
    }

    let ratio = density(text);
    if ratio < config.density_threshold {
        return Err(Rejection::LowDensity {
            ratio,
            threshold: config.density_threshold,
        });
    }

    if !allow_unterminated && !ends_terminated(text, &config.terminal_marks) {
        return Err(Rejection::Unterminated);
    }

    Ok(())
}

/// Ratio of alphanumeric or CJK characters to all characters. Empty text is 0.
pub fn density(text: &str) -> f32 {
    let mut total = 0usize;
    let mut meaningful = 0usize;
    for c in text.chars() {
        total += 1;
        if is_meaningful(c) {
            meaningful += 1;
        }
    }
    if total == 0 {
        0.0
    } else {
        meaningful as f32 / total as f32
    }
}

fn ends_terminated(text: &str, marks: &[char]) -> bool {
    text.trim_end()
        .chars()
        .next_back()
        .is_some_and(|c| marks.contains(&c))
}

fn is_meaningful(c: char) -> bool {
    c.is_alphanumeric() || is_cjk(c)
}

/// CJK ideographs, kana and hangul syllables.
pub fn is_cjk(c: char) -> bool {
    matches!(c as u32,
        0x3040..=0x30FF
        | 0x3400..=0x4DBF
        | 0x4E00..=0x9FFF
        | 0xAC00..=0xD7AF
        | 0xF900..=0xFAFF
        | 0x20000..=0x2A6DF)
}

/// Rejection tallies collected while building chunks.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RejectionCounts {
    pub too_short: usize,
    pub too_long: usize,
    pub low_density: usize,
    pub unterminated: usize,
}

impl RejectionCounts {
    pub fn record(&mut self, rejection: &Rejection) {
        match rejection {
            Rejection::TooShort { .. } => self.too_short += 1,
            Rejection::TooLong { .. } => self.too_long += 1,
            Rejection::LowDensity { .. } => self.low_density += 1,
            Rejection::Unterminated => self.unterminated += 1,
        }
    }

    pub fn merge(&mut self, other: &RejectionCounts) {
        self.too_short += other.too_short;
        self.too_long += other.too_long;
        self.low_density += other.low_density;
        self.unterminated += other.unterminated;
    }

    pub fn total(&self) -> usize {
        self.too_short + self.too_long + self.low_density + self.unterminated
    }
}
