//! Core types for the generation pipeline.
//!
//! Stage records are the unit of persistence: one line per attempt outcome,
//! joined across stages by `chunk_id`, last write wins per (chunk, stage).

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;

use super::payload::{Answer, Question, StagePayload};
use crate::config::ConfigError;
use crate::documents::{Chunk, ChunkId, InputError};
use crate::store::StoreError;

/// Generation stages in pipeline order.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    #[default]
    Keyword,
    Question,
    Answer,
    Critique,
}

impl Stage {
    pub const ALL: [Stage; 4] = [Stage::Keyword, Stage::Question, Stage::Answer, Stage::Critique];

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Keyword => "keyword",
            Stage::Question => "question",
            Stage::Answer => "answer",
            Stage::Critique => "critique",
        }
    }

    /// Stage whose records feed this one.
    pub fn previous(&self) -> Option<Stage> {
        match self {
            Stage::Keyword => None,
            Stage::Question => Some(Stage::Keyword),
            Stage::Answer => Some(Stage::Question),
            Stage::Critique => Some(Stage::Answer),
        }
    }

    pub fn next(&self) -> Option<Stage> {
        match self {
            Stage::Keyword => Some(Stage::Question),
            Stage::Question => Some(Stage::Answer),
            Stage::Answer => Some(Stage::Critique),
            Stage::Critique => None,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Stage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "keyword" | "keywords" => Ok(Stage::Keyword),
            "question" | "questions" => Ok(Stage::Question),
            "answer" | "answers" => Ok(Stage::Answer),
            "critique" | "review" => Ok(Stage::Critique),
            other => Err(format!(
                "unknown stage '{other}' (expected keyword, question, answer or critique)"
            )),
        }
    }
}

/// Outcome recorded for one chunk at one stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordStatus {
    Ok,
    /// An attempt failed and another is scheduled. Superseded later.
    Retried,
    Failed,
    FilteredOut,
}

impl RecordStatus {
    /// A record that ends processing for its (chunk, stage).
    pub fn is_terminal(&self) -> bool {
        !matches!(self, RecordStatus::Retried)
    }

    /// A terminal record that must not be reprocessed on resume.
    pub fn is_done(&self) -> bool {
        matches!(self, RecordStatus::Ok | RecordStatus::FilteredOut)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RecordStatus::Ok => "ok",
            RecordStatus::Retried => "retried",
            RecordStatus::Failed => "failed",
            RecordStatus::FilteredOut => "filtered_out",
        }
    }
}

impl fmt::Display for RecordStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageRecord {
    pub chunk_id: ChunkId,
    pub stage: Stage,
    #[serde(default)]
    pub payload: StagePayload,
    pub status: RecordStatus,
    pub attempt_count: u32,
    /// Last error for failed and retried records, rejection reason for filtered ones.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StageRecord {
    pub fn ok(chunk_id: ChunkId, stage: Stage, payload: StagePayload, attempt_count: u32) -> Self {
        Self {
            chunk_id,
            stage,
            payload,
            status: RecordStatus::Ok,
            attempt_count,
            error: None,
        }
    }

    pub fn filtered(
        chunk_id: ChunkId,
        stage: Stage,
        payload: StagePayload,
        attempt_count: u32,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            chunk_id,
            stage,
            payload,
            status: RecordStatus::FilteredOut,
            attempt_count,
            error: Some(reason.into()),
        }
    }

    pub fn failed(chunk_id: ChunkId, stage: Stage, attempt_count: u32, error: impl Into<String>) -> Self {
        Self {
            chunk_id,
            stage,
            payload: StagePayload::Empty,
            status: RecordStatus::Failed,
            attempt_count,
            error: Some(error.into()),
        }
    }

    pub fn retried(chunk_id: ChunkId, stage: Stage, attempt_count: u32, error: impl Into<String>) -> Self {
        Self {
            chunk_id,
            stage,
            payload: StagePayload::Empty,
            status: RecordStatus::Retried,
            attempt_count,
            error: Some(error.into()),
        }
    }
}

/// Payloads from earlier stages handed to a generation call.
///
/// Only `ok` upstream records contribute; anything else leaves the field empty.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Upstream {
    pub keywords: Vec<String>,
    pub questions: Vec<Question>,
    pub answers: Vec<Answer>,
}

impl Upstream {
    /// Extract what `record` contributes to the stage after it.
    pub fn from_record(record: &StageRecord) -> Self {
        if record.status != RecordStatus::Ok {
            return Self::default();
        }
        Self {
            keywords: record.payload.keywords().to_vec(),
            questions: record.payload.questions().to_vec(),
            answers: record.payload.answers().to_vec(),
        }
    }
}

/// One unit of work for a stage runner.
#[derive(Debug, Clone)]
pub struct StageInput {
    pub chunk: Arc<Chunk>,
    pub upstream: Upstream,
}

impl StageInput {
    pub fn new(chunk: Arc<Chunk>, upstream: Upstream) -> Self {
        Self { chunk, upstream }
    }
}

/// Errors that abort a pipeline run.
///
/// Per-chunk generation failures never appear here; they become records.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigError),

    #[error("Artifact store error: {0}")]
    Store(#[from] StoreError),

    #[error("Input error: {0}")]
    Input(#[from] InputError),

    #[error(
        "Inputs changed since chunks were built ({changed}); rerun with --force to rebuild all artifacts"
    )]
    StaleChunks { changed: String },

    #[error("No chunks available at {0}; run the chunk step first")]
    MissingChunks(String),

    #[error("Worker task failed: {0}")]
    Worker(String),
}

pub type PipelineResult<T> = Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_order() {
        assert_eq!(Stage::Keyword.previous(), None);
        assert_eq!(Stage::Critique.previous(), Some(Stage::Answer));
        assert_eq!(Stage::Question.next(), Some(Stage::Answer));
        let mut order = Stage::ALL.to_vec();
        order.reverse();
        order.sort();
        assert_eq!(order, Stage::ALL.to_vec());
    }

    #[test]
    fn test_stage_from_str() {
        assert_eq!("Keywords".parse::<Stage>(), Ok(Stage::Keyword));
        assert_eq!("critique".parse::<Stage>(), Ok(Stage::Critique));
        assert!("summary".parse::<Stage>().is_err());
    }

    #[test]
    fn test_status_classification() {
        assert!(RecordStatus::Ok.is_done());
        assert!(RecordStatus::FilteredOut.is_done());
        assert!(!RecordStatus::Failed.is_done());
        assert!(RecordStatus::Failed.is_terminal());
        assert!(!RecordStatus::Retried.is_terminal());
    }

    #[test]
    fn test_record_wire_format() {
        let record = StageRecord::ok(
            ChunkId::new(4),
            Stage::Keyword,
            StagePayload::Keywords {
                keywords: vec!["k1".into()],
            },
            1,
        );
        let json = serde_json::to_string(&record).unwrap();
        assert_eq!(
            json,
            r#"{"chunk_id":4,"stage":"keyword","payload":{"keywords":["k1"]},"status":"ok","attempt_count":1}"#
        );
    }

    #[test]
    fn test_failed_record_has_empty_payload() {
        let record = StageRecord::failed(ChunkId::new(1), Stage::Answer, 3, "backend down");
        let json = serde_json::to_string(&record).unwrap();
        assert!(json.contains(r#""payload":null"#));
        assert!(json.contains(r#""status":"failed""#));
        let back: StageRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back, record);
    }

    #[test]
    fn test_upstream_ignores_non_ok_records() {
        let record = StageRecord::filtered(
            ChunkId::new(1),
            Stage::Keyword,
            StagePayload::Keywords {
                keywords: vec!["x".into()],
            },
            1,
            "rejected",
        );
        assert_eq!(Upstream::from_record(&record), Upstream::default());
    }
}
