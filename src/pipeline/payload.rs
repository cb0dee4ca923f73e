//! Stage payloads.
//!
//! Each stage produces one payload variant. Payloads serialize as plain
//! objects (`{"keywords": [...]}`, `{"questions": [...]}`, ...) and the empty
//! payload as `null`; the owning record's `stage` says which one to expect.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::types::Stage;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(untagged)]
pub enum StagePayload {
    Keywords {
        keywords: Vec<String>,
    },
    Questions {
        questions: Vec<Question>,
    },
    Answers {
        answers: Vec<Answer>,
    },
    Critique {
        reviews: Vec<Review>,
    },
    #[default]
    Empty,
}

impl StagePayload {
    /// Whether this payload is the variant `stage` produces.
    pub fn matches(&self, stage: Stage) -> bool {
        matches!(
            (self, stage),
            (StagePayload::Keywords { .. }, Stage::Keyword)
                | (StagePayload::Questions { .. }, Stage::Question)
                | (StagePayload::Answers { .. }, Stage::Answer)
                | (StagePayload::Critique { .. }, Stage::Critique)
        )
    }

    pub fn is_empty(&self) -> bool {
        match self {
            StagePayload::Keywords { keywords } => keywords.is_empty(),
            StagePayload::Questions { questions } => questions.is_empty(),
            StagePayload::Answers { answers } => answers.is_empty(),
            StagePayload::Critique { reviews } => reviews.is_empty(),
            StagePayload::Empty => true,
        }
    }

    pub fn keywords(&self) -> &[String] {
        match self {
            StagePayload::Keywords { keywords } => keywords,
            _ => &[],
        }
    }

    pub fn questions(&self) -> &[Question] {
        match self {
            StagePayload::Questions { questions } => questions,
            _ => &[],
        }
    }

    pub fn answers(&self) -> &[Answer] {
        match self {
            StagePayload::Answers { answers } => answers,
            _ => &[],
        }
    }

    pub fn reviews(&self) -> &[Review] {
        match self {
            StagePayload::Critique { reviews } => reviews,
            _ => &[],
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    Easy,
    #[default]
    Medium,
    Hard,
}

impl Difficulty {
    /// Lenient parse for model output; unknown values become `Medium`.
    pub fn parse_lenient(value: &str) -> Self {
        match value.trim().to_lowercase().as_str() {
            "easy" | "simple" | "簡單" | "简单" | "易" => Difficulty::Easy,
            "hard" | "difficult" | "困難" | "困难" | "難" | "难" => Difficulty::Hard,
            _ => Difficulty::Medium,
        }
    }
}

/// Where a question came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuestionOrigin {
    /// Generic question about the chunk.
    Base,
    /// Question targeting one extracted keyword.
    Keyword,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Question {
    pub text: String,
    pub lang: String,
    #[serde(default)]
    pub difficulty: Difficulty,
    #[serde(default)]
    pub topic: String,
    pub origin: QuestionOrigin,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keyword: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Answer {
    pub question: String,
    pub lang: String,
    pub text: String,
    #[serde(default)]
    pub citations: Vec<String>,
    #[serde(default)]
    pub has_citation: bool,
    #[serde(default)]
    pub confidence: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    Correct,
    Partial,
    Wrong,
    Insufficient,
}

impl Verdict {
    /// Verdict implied by a rubric total when the model gives none.
    pub fn from_total(total: u8) -> Self {
        match total {
            16.. => Verdict::Correct,
            13..=15 => Verdict::Partial,
            9..=12 => Verdict::Insufficient,
            _ => Verdict::Wrong,
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Verdict::Correct => "correct",
            Verdict::Partial => "partial",
            Verdict::Wrong => "wrong",
            Verdict::Insufficient => "insufficient",
        };
        f.write_str(s)
    }
}

impl FromStr for Verdict {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "correct" => Ok(Verdict::Correct),
            "partial" | "partially correct" => Ok(Verdict::Partial),
            "wrong" | "incorrect" => Ok(Verdict::Wrong),
            "insufficient" | "insufficient context" => Ok(Verdict::Insufficient),
            other => Err(format!("unknown verdict '{other}'")),
        }
    }
}

/// Rubric scores, each 1 to 5.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RubricScores {
    pub relevance: u8,
    pub groundedness: u8,
    pub standalone: u8,
    pub accuracy: u8,
}

impl RubricScores {
    /// Passing total on the 4 to 20 scale.
    pub const PASS_TOTAL: u8 = 13;

    /// Clamp every score into 1..=5.
    pub fn clamped(self) -> Self {
        let c = |v: u8| v.clamp(1, 5);
        Self {
            relevance: c(self.relevance),
            groundedness: c(self.groundedness),
            standalone: c(self.standalone),
            accuracy: c(self.accuracy),
        }
    }

    pub fn total(&self) -> u8 {
        self.relevance + self.groundedness + self.standalone + self.accuracy
    }

    /// Total divided by the maximum of 20.
    pub fn normalized(&self) -> f32 {
        f32::from(self.total()) / 20.0
    }

    pub fn passes(&self) -> bool {
        self.total() >= Self::PASS_TOTAL
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Review {
    pub question: String,
    pub verdict: Verdict,
    pub reason: String,
    pub scores: RubricScores,
    /// Normalized rubric total in [0, 1].
    pub score: f32,
    pub passed: bool,
}

impl Review {
    pub fn new(question: String, scores: RubricScores, verdict: Option<Verdict>, reason: String) -> Self {
        let scores = scores.clamped();
        Self {
            question,
            verdict: verdict.unwrap_or_else(|| Verdict::from_total(scores.total())),
            reason,
            score: scores.normalized(),
            passed: scores.passes(),
            scores,
        }
    }
}
