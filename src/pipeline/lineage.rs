//! Joins chunks and their stage records into `corpus.jsonl` lines.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

use super::payload::{Question, Review, RubricScores, Verdict};
use super::types::{RecordStatus, Stage, StageRecord};
use crate::documents::{Chunk, ChunkId};
use crate::store::StageLog;

/// One answered question and, when reviewed, its critique.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QaPair {
    pub question: String,
    pub lang: String,
    pub answer: String,
    #[serde(default)]
    pub citations: Vec<String>,
    pub confidence: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verdict: Option<Verdict>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scores: Option<RubricScores>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl QaPair {
    fn review(&mut self, review: &Review) {
        self.verdict = Some(review.verdict);
        self.scores = Some(review.scores);
        self.score = Some(review.score);
        self.reason = Some(review.reason.clone());
    }
}

/// Everything known about one chunk after a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineageRecord {
    pub chunk_id: ChunkId,
    pub source: String,
    #[serde(default)]
    pub page: Option<u32>,
    pub text: String,
    pub char_offset_start: usize,
    pub char_offset_end: usize,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub questions: Vec<Question>,
    #[serde(default)]
    pub qa_pairs: Vec<QaPair>,
    /// Latest status per stage that has a record for this chunk.
    pub status: BTreeMap<Stage, RecordStatus>,
}

impl LineageRecord {
    fn new(chunk: &Chunk) -> Self {
        Self {
            chunk_id: chunk.chunk_id,
            source: chunk.source.clone(),
            page: chunk.page,
            text: chunk.text.clone(),
            char_offset_start: chunk.char_offset_start,
            char_offset_end: chunk.char_offset_end,
            keywords: Vec::new(),
            questions: Vec::new(),
            qa_pairs: Vec::new(),
            status: BTreeMap::new(),
        }
    }

    /// Critique accepted at least one pair of this chunk.
    pub fn is_verified(&self) -> bool {
        self.status.get(&Stage::Critique) == Some(&RecordStatus::Ok)
    }
}

/// Build one record per chunk, in chunk order.
///
/// Payloads are taken from `ok` records. Reviews are also taken from
/// `filtered_out` critique records so rejected pairs keep their verdicts.
pub fn assemble(chunks: &[Arc<Chunk>], logs: &BTreeMap<Stage, StageLog>) -> Vec<LineageRecord> {
    let latest = |stage: Stage, id: ChunkId| latest_record(logs, stage, id);

    chunks
        .iter()
        .map(|chunk| {
            let id = chunk.chunk_id;
            let mut record = LineageRecord::new(chunk);

            for stage in Stage::ALL {
                if let Some(found) = latest(stage, id) {
                    record.status.insert(stage, found.status);
                }
            }

            let ok = |stage: Stage| latest(stage, id).filter(|r| r.status == RecordStatus::Ok);

            if let Some(found) = ok(Stage::Keyword) {
                record.keywords = found.payload.keywords().to_vec();
            }
            if let Some(found) = ok(Stage::Question) {
                record.questions = found.payload.questions().to_vec();
            }
            if let Some(found) = ok(Stage::Answer) {
                record.qa_pairs = found
                    .payload
                    .answers()
                    .iter()
                    .map(|answer| QaPair {
                        question: answer.question.clone(),
                        lang: answer.lang.clone(),
                        answer: answer.text.clone(),
                        citations: answer.citations.clone(),
                        confidence: answer.confidence,
                        verdict: None,
                        scores: None,
                        score: None,
                        reason: None,
                    })
                    .collect();
            }

            let reviews = latest(Stage::Critique, id)
                .filter(|r| matches!(r.status, RecordStatus::Ok | RecordStatus::FilteredOut))
                .map(|r| r.payload.reviews())
                .unwrap_or_default();
            for review in reviews {
                if let Some(pair) = record
                    .qa_pairs
                    .iter_mut()
                    .find(|p| p.question == review.question && p.verdict.is_none())
                {
                    pair.review(review);
                }
            }

            record
        })
        .collect()
}

fn latest_record(logs: &BTreeMap<Stage, StageLog>, stage: Stage, id: ChunkId) -> Option<&StageRecord> {
    logs.get(&stage).and_then(|log| log.latest(id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::payload::{Answer, Difficulty, QuestionOrigin, StagePayload};

    fn chunk(id: u32) -> Arc<Chunk> {
        Arc::new(Chunk {
            chunk_id: ChunkId::new(id),
            source: "manual.txt".into(),
            page: Some(1),
            text: "Check the oil level weekly.".into(),
            char_offset_start: 0,
            char_offset_end: 27,
            oversized: false,
        })
    }

    fn log(records: Vec<StageRecord>) -> StageLog {
        let mut log = StageLog::default();
        for record in records {
            log.apply(record);
        }
        log
    }

    #[test]
    fn test_assemble_joins_by_chunk_id() {
        let id = ChunkId::new(0);
        let question = Question {
            text: "How often is the oil level checked?".into(),
            lang: "en".into(),
            difficulty: Difficulty::Easy,
            topic: "oil".into(),
            origin: QuestionOrigin::Keyword,
            keyword: Some("oil".into()),
        };
        let answer = Answer {
            question: question.text.clone(),
            lang: "en".into(),
            text: "Weekly, according to the passage.".into(),
            citations: vec!["chunk:0".into()],
            has_citation: true,
            confidence: 0.9,
        };
        let review = Review::new(
            question.text.clone(),
            RubricScores {
                relevance: 5,
                groundedness: 5,
                standalone: 4,
                accuracy: 5,
            },
            None,
            "Grounded.".into(),
        );

        let mut logs = BTreeMap::new();
        logs.insert(
            Stage::Keyword,
            log(vec![StageRecord::ok(id, Stage::Keyword, StagePayload::Keywords { keywords: vec!["oil".into()] }, 1)]),
        );
        logs.insert(
            Stage::Question,
            log(vec![StageRecord::ok(id, Stage::Question, StagePayload::Questions { questions: vec![question] }, 1)]),
        );
        logs.insert(
            Stage::Answer,
            log(vec![StageRecord::ok(id, Stage::Answer, StagePayload::Answers { answers: vec![answer] }, 2)]),
        );
        logs.insert(
            Stage::Critique,
            log(vec![StageRecord::ok(id, Stage::Critique, StagePayload::Critique { reviews: vec![review] }, 1)]),
        );

        let records = assemble(&[chunk(0), chunk(1)], &logs);
        assert_eq!(records.len(), 2);

        let first = &records[0];
        assert_eq!(first.keywords, vec!["oil"]);
        assert_eq!(first.questions.len(), 1);
        assert_eq!(first.qa_pairs.len(), 1);
        assert_eq!(first.qa_pairs[0].verdict, Some(Verdict::Correct));
        assert!((first.qa_pairs[0].score.unwrap() - 0.95).abs() < 1e-6);
        assert!(first.is_verified());

        let second = &records[1];
        assert!(second.status.is_empty());
        assert!(second.qa_pairs.is_empty());
    }

    #[test]
    fn test_failed_records_contribute_status_only() {
        let id = ChunkId::new(0);
        let mut logs = BTreeMap::new();
        logs.insert(
            Stage::Keyword,
            log(vec![StageRecord::failed(id, Stage::Keyword, 3, "backend down")]),
        );
        let records = assemble(&[chunk(0)], &logs);
        assert!(records[0].keywords.is_empty());
        assert_eq!(records[0].status[&Stage::Keyword], RecordStatus::Failed);

        let json = serde_json::to_value(&records[0]).unwrap();
        assert_eq!(json["status"]["keyword"], "failed");
    }
}
