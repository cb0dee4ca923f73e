//! Post-generation quality gate.
//!
//! Text-bearing payloads are filtered item by item with the payload quality
//! predicate; a payload left with nothing is rejected. Critique payloads pass
//! when at least one review clears the score threshold without a `wrong`
//! verdict.

use crate::backend::BackendError;
use crate::documents::{QualityConfig, evaluate};

use super::payload::{StagePayload, Verdict};
use super::types::Stage;

#[derive(Debug, Clone, PartialEq)]
pub enum Validation {
    Accepted(StagePayload),
    /// Not an error: the record is written `filtered_out`.
    Rejected { payload: StagePayload, reason: String },
}

#[derive(Debug, Clone)]
pub struct PayloadValidator {
    quality: QualityConfig,
    threshold: f32,
}

impl PayloadValidator {
    pub fn new(quality: QualityConfig, threshold: f32) -> Self {
        Self { quality, threshold }
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    /// Judge `payload` as output of `stage`.
    ///
    /// A payload of the wrong shape is a malformed response, not a quality
    /// rejection, so it goes back to the retry machine.
    pub fn validate(&self, stage: Stage, payload: StagePayload) -> Result<Validation, BackendError> {
        if !payload.matches(stage) {
            return Err(BackendError::malformed(format!(
                "payload does not match the {stage} stage"
            )));
        }

        Ok(match payload {
            StagePayload::Keywords { keywords } => {
                let keywords: Vec<String> = keywords
                    .into_iter()
                    .map(|k| k.trim().to_string())
                    .filter(|k| !k.is_empty())
                    .collect();
                if keywords.is_empty() {
                    Validation::Rejected {
                        payload: StagePayload::Keywords { keywords },
                        reason: "no keywords".to_string(),
                    }
                } else {
                    Validation::Accepted(StagePayload::Keywords { keywords })
                }
            }
            StagePayload::Questions { questions } => {
                let total = questions.len();
                let mut first_rejection = None;
                let kept: Vec<_> = questions
                    .into_iter()
                    .filter(|q| match evaluate(&q.text, &self.quality, false) {
                        Ok(()) => true,
                        Err(rejection) => {
                            first_rejection.get_or_insert(rejection);
                            false
                        }
                    })
                    .collect();
                if kept.is_empty() {
                    Validation::Rejected {
                        payload: StagePayload::Questions { questions: kept },
                        reason: rejection_reason("questions", total, first_rejection),
                    }
                } else {
                    Validation::Accepted(StagePayload::Questions { questions: kept })
                }
            }
            StagePayload::Answers { answers } => {
                let total = answers.len();
                let mut first_rejection = None;
                let kept: Vec<_> = answers
                    .into_iter()
                    .filter(|a| match evaluate(&a.text, &self.quality, false) {
                        Ok(()) => true,
                        Err(rejection) => {
                            first_rejection.get_or_insert(rejection);
                            false
                        }
                    })
                    .collect();
                if kept.is_empty() {
                    Validation::Rejected {
                        payload: StagePayload::Answers { answers: kept },
                        reason: rejection_reason("answers", total, first_rejection),
                    }
                } else {
                    Validation::Accepted(StagePayload::Answers { answers: kept })
                }
            }
            StagePayload::Critique { reviews } => {
                let passing = reviews
                    .iter()
                    .any(|r| r.score >= self.threshold && r.verdict != Verdict::Wrong);
                if passing {
                    Validation::Accepted(StagePayload::Critique { reviews })
                } else {
                    let best = reviews.iter().map(|r| r.score).fold(0.0_f32, f32::max);
                    Validation::Rejected {
                        reason: format!(
                            "no review reached the quality threshold {:.2} (best {:.2})",
                            self.threshold, best
                        ),
                        payload: StagePayload::Critique { reviews },
                    }
                }
            }
            StagePayload::Empty => Validation::Rejected {
                payload: StagePayload::Empty,
                reason: "empty payload".to_string(),
            },
        })
    }
}

fn rejection_reason(
    what: &str,
    total: usize,
    first: Option<crate::documents::Rejection>,
) -> String {
    match first {
        Some(rejection) => format!("all {total} {what} failed quality checks ({rejection})"),
        None => format!("no {what} generated"),
    }
}
