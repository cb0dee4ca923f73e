//! Run summary written to `run_summary.json` and the artifact status report.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use super::types::{RecordStatus, Stage};
use crate::documents::{BuildStats, Chunk, ChunkId};
use crate::io::ExitCode;
use crate::store::{ArtifactStore, StageLog, StoreResult};

/// Counts for one stage after a run.
///
/// `ok`, `failed` and `filtered_out` cover every chunk of the corpus, resumed
/// records included. `processed` and `attempts` cover this run only.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StageSummary {
    pub stage: Stage,
    /// Chunks already done before this run.
    pub skipped: usize,
    /// Chunks whose predecessor stage has no terminal record.
    pub blocked: usize,
    /// Chunks handed to the runner or resolved without a backend call.
    pub processed: usize,
    pub ok: usize,
    pub failed: usize,
    pub filtered_out: usize,
    pub attempts: u64,
    pub retries: u64,
    pub wall_time_secs: f64,
    /// Every input processed in this run failed.
    #[serde(default)]
    pub all_failed: bool,
}

impl StageSummary {
    pub fn new(stage: Stage) -> Self {
        Self {
            stage,
            ..Default::default()
        }
    }

    /// Fill the corpus-wide counts from `log`, restricted to `chunk_ids`.
    pub fn count_from(&mut self, log: &StageLog, chunk_ids: &BTreeSet<ChunkId>) {
        let counts = StageCounts::from_log(self.stage, log, chunk_ids);
        self.ok = counts.ok;
        self.failed = counts.failed;
        self.filtered_out = counts.filtered_out;
    }
}

/// Record of one pipeline invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub started_at: String,
    pub finished_at: String,
    pub backend: String,
    pub chunks: usize,
    pub stages: Vec<StageSummary>,
    /// All selected stages reached a terminal record for every input chunk.
    pub completed: bool,
    #[serde(default)]
    pub cancelled: bool,
    /// Stage at which the run stopped because all of its inputs failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aborted_stage: Option<Stage>,
    /// First selected stage that left chunks without a record because their
    /// predecessor stage had none.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blocked_stage: Option<Stage>,
    /// Lines written to `corpus.jsonl`.
    #[serde(default)]
    pub corpus_records: usize,
}

impl RunSummary {
    pub fn new(backend: impl Into<String>, chunks: usize) -> Self {
        let now = chrono::Utc::now().to_rfc3339();
        Self {
            started_at: now.clone(),
            finished_at: now,
            backend: backend.into(),
            chunks,
            stages: Vec::new(),
            completed: false,
            cancelled: false,
            aborted_stage: None,
            blocked_stage: None,
            corpus_records: 0,
        }
    }

    pub fn finish(&mut self) {
        self.finished_at = chrono::Utc::now().to_rfc3339();
    }

    pub fn stage(&self, stage: Stage) -> Option<&StageSummary> {
        self.stages.iter().find(|s| s.stage == stage)
    }

    /// Process exit code for this run.
    pub fn exit_code(&self) -> ExitCode {
        if self.cancelled {
            ExitCode::Interrupted
        } else if self.aborted_stage.is_some() {
            ExitCode::BackendUnavailable
        } else if self.blocked_stage.is_some() {
            ExitCode::GeneralError
        } else {
            ExitCode::Success
        }
    }
}

/// Latest-record counts for one stage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StageCounts {
    pub stage: Stage,
    pub ok: usize,
    pub failed: usize,
    pub filtered_out: usize,
    /// Latest record is `retried`: interrupted mid-retry.
    pub retried: usize,
    pub missing: usize,
}

impl StageCounts {
    pub fn from_log(stage: Stage, log: &StageLog, chunk_ids: &BTreeSet<ChunkId>) -> Self {
        let mut counts = Self {
            stage,
            ..Default::default()
        };
        for id in chunk_ids {
            match log.latest(*id).map(|r| r.status) {
                Some(RecordStatus::Ok) => counts.ok += 1,
                Some(RecordStatus::Failed) => counts.failed += 1,
                Some(RecordStatus::FilteredOut) => counts.filtered_out += 1,
                Some(RecordStatus::Retried) => counts.retried += 1,
                None => counts.missing += 1,
            }
        }
        counts
    }
}

/// Length statistics over the chunk artifact.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ChunkStats {
    pub count: usize,
    pub sources: usize,
    pub avg_len: f64,
    pub min_len: usize,
    pub max_len: usize,
    pub oversized: usize,
}

impl ChunkStats {
    pub fn from_chunks(chunks: &[Chunk]) -> Self {
        if chunks.is_empty() {
            return Self::default();
        }
        let lengths: Vec<usize> = chunks.iter().map(Chunk::char_count).collect();
        let sources: BTreeSet<&str> = chunks.iter().map(|c| c.source.as_str()).collect();
        Self {
            count: chunks.len(),
            sources: sources.len(),
            avg_len: lengths.iter().sum::<usize>() as f64 / lengths.len() as f64,
            min_len: lengths.iter().copied().min().unwrap_or(0),
            max_len: lengths.iter().copied().max().unwrap_or(0),
            oversized: chunks.iter().filter(|c| c.oversized).count(),
        }
    }
}

/// Everything `status` reports about an output directory.
#[derive(Debug, Clone, Serialize)]
pub struct ArtifactStatus {
    pub output: String,
    pub chunks: Option<ChunkStats>,
    /// Stats of the build that produced the chunks, when the manifest has them.
    pub build: Option<BuildStats>,
    pub stages: Vec<StageCounts>,
    pub last_run: Option<RunSummary>,
}

impl ArtifactStatus {
    pub fn collect(store: &ArtifactStore) -> StoreResult<Self> {
        let chunks = store.read_chunks()?;
        let build = store.read_manifest()?.and_then(|m| m.stats);
        let chunk_ids: BTreeSet<ChunkId> = chunks
            .iter()
            .flatten()
            .map(|c| c.chunk_id)
            .collect();

        let mut stages = Vec::new();
        for stage in Stage::ALL {
            let log = store.load_stage(stage)?;
            if log.lines > 0 {
                stages.push(StageCounts::from_log(stage, &log, &chunk_ids));
            }
        }

        Ok(Self {
            output: store.root().display().to_string(),
            chunks: chunks.as_deref().map(ChunkStats::from_chunks),
            build,
            stages,
            // Unreadable summaries are reported as absent.
            last_run: store.read_summary().unwrap_or_else(|e| {
                tracing::warn!(target: "store", "ignoring run summary: {e}");
                None
            }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{StagePayload, StageRecord};

    fn chunk(id: u32, text: &str, source: &str) -> Chunk {
        Chunk {
            chunk_id: ChunkId::new(id),
            source: source.into(),
            page: None,
            text: text.into(),
            char_offset_start: 0,
            char_offset_end: text.chars().count(),
            oversized: false,
        }
    }

    #[test]
    fn test_chunk_stats() {
        let chunks = vec![
            chunk(0, "abcd.", "a.txt"),
            chunk(1, "abcdefghi.", "a.txt"),
            chunk(2, "油位正常。", "b.txt"),
        ];
        let stats = ChunkStats::from_chunks(&chunks);
        assert_eq!(stats.count, 3);
        assert_eq!(stats.sources, 2);
        assert_eq!(stats.min_len, 5);
        assert_eq!(stats.max_len, 10);
        assert!((stats.avg_len - 20.0 / 3.0).abs() < 1e-9);
        assert_eq!(ChunkStats::from_chunks(&[]), ChunkStats::default());
    }

    #[test]
    fn test_stage_counts_restricted_to_corpus() {
        let mut log = StageLog::default();
        let keywords = StagePayload::Keywords {
            keywords: vec!["k".into()],
        };
        log.apply(StageRecord::ok(ChunkId::new(0), Stage::Keyword, keywords.clone(), 1));
        log.apply(StageRecord::retried(ChunkId::new(1), Stage::Keyword, 1, "down"));
        log.apply(StageRecord::ok(ChunkId::new(9), Stage::Keyword, keywords, 1));

        let ids: BTreeSet<ChunkId> = (0..3).map(ChunkId::new).collect();
        let counts = StageCounts::from_log(Stage::Keyword, &log, &ids);
        assert_eq!(counts.ok, 1);
        assert_eq!(counts.retried, 1);
        assert_eq!(counts.missing, 1);
    }

    #[test]
    fn test_exit_code() {
        let mut summary = RunSummary::new("mock", 3);
        assert_eq!(summary.exit_code(), ExitCode::Success);
        summary.blocked_stage = Some(Stage::Question);
        assert_eq!(summary.exit_code(), ExitCode::GeneralError);
        summary.aborted_stage = Some(Stage::Answer);
        assert_eq!(summary.exit_code(), ExitCode::BackendUnavailable);
        summary.cancelled = true;
        assert_eq!(summary.exit_code(), ExitCode::Interrupted);
    }
}
