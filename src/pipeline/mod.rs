//! Staged generation pipeline.
//!
//! ```text
//! chunking -> keyword -> question -> answer -> critique -> done
//! ```
//!
//! The orchestrator runs one stage at a time over every eligible chunk. A
//! stage starts only after the previous one produced a terminal record for
//! each of its inputs. Stage files are reloaded at start, so a rerun picks up
//! where an interrupted one stopped: `ok` and `filtered_out` records are kept,
//! `failed` and `retried` ones are processed again.

pub mod config;
pub mod lineage;
pub mod metrics;
pub mod payload;
pub mod retry;
pub mod runner;
pub mod summary;
pub mod types;
pub mod validate;

pub use config::RunnerConfig;
pub use lineage::{LineageRecord, QaPair, assemble};
pub use metrics::{PipelineReport, StageMetrics, StageSnapshot, StageTracker};
pub use payload::{
    Answer, Difficulty, Question, QuestionOrigin, Review, RubricScores, StagePayload, Verdict,
};
pub use retry::{CallState, RetryMachine, RetryPolicy};
pub use runner::{RecordSink, StageOutcome, StageRunner};
pub use summary::{ArtifactStatus, ChunkStats, RunSummary, StageCounts, StageSummary};
pub use types::{
    PipelineError, PipelineResult, RecordStatus, Stage, StageInput, StageRecord, Upstream,
};
pub use validate::{PayloadValidator, Validation};

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::backend::InferenceBackend;
use crate::config::Settings;
use crate::documents::{
    BuildStats, Chunk, ChunkBuilder, ChunkId, InputError, InputManifest, load_directory,
};
use crate::store::{ArtifactStore, StageLog};

const FALLBACK_QUESTION_EN: &str = "Summarize the key points of this passage.";
const FALLBACK_QUESTION_ZH: &str = "請總結這段內容的重點。";
const NO_ANSWERS: &str = "no answers to review";

/// Position of a run in the stage sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Chunking,
    Generating(Stage),
    Done,
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineState::Chunking => f.write_str("chunking"),
            PipelineState::Generating(stage) => write!(f, "{stage}"),
            PipelineState::Done => f.write_str("done"),
        }
    }
}

/// Chunks a run works on.
#[derive(Debug, Clone)]
pub struct ChunkSet {
    pub chunks: Vec<Arc<Chunk>>,
    /// Loaded from an earlier build instead of rebuilt.
    pub reused: bool,
    pub stats: Option<BuildStats>,
}

/// Work selected for one stage.
#[derive(Debug, Default)]
struct StagePlan {
    inputs: Vec<StageInput>,
    /// Records written without a backend call.
    direct: Vec<StageRecord>,
    skipped: usize,
    blocked: usize,
}

/// Pick the chunks `stage` still has to process and their upstream payloads.
fn plan_stage(
    stage: Stage,
    chunks: &[Arc<Chunk>],
    current: &StageLog,
    previous: Option<&StageLog>,
    language: &str,
) -> StagePlan {
    let mut plan = StagePlan::default();

    for chunk in chunks {
        let id = chunk.chunk_id;
        // Records with no attempts were written without a backend call and
        // are revisited once the upstream stage has something to offer.
        let placeholder = match current.latest(id) {
            Some(record) if record.status.is_done() && record.attempt_count > 0 => {
                plan.skipped += 1;
                continue;
            }
            Some(record) => record.status.is_done(),
            None => false,
        };

        let upstream = match previous {
            None => Upstream::default(),
            Some(log) => match log.latest(id) {
                Some(record) if record.status.is_terminal() => Upstream::from_record(record),
                _ if placeholder => {
                    plan.skipped += 1;
                    continue;
                }
                _ => {
                    plan.blocked += 1;
                    continue;
                }
            },
        };

        match stage {
            Stage::Answer if upstream.questions.is_empty() => {
                let upstream = Upstream {
                    questions: vec![fallback_question(language)],
                    ..upstream
                };
                plan.inputs.push(StageInput::new(Arc::clone(chunk), upstream));
            }
            Stage::Critique if upstream.answers.is_empty() && placeholder => plan.skipped += 1,
            Stage::Critique if upstream.answers.is_empty() => {
                plan.direct.push(StageRecord::filtered(
                    id,
                    stage,
                    StagePayload::Empty,
                    0,
                    NO_ANSWERS,
                ));
            }
            _ => plan.inputs.push(StageInput::new(Arc::clone(chunk), upstream)),
        }
    }
    plan
}

fn fallback_question(language: &str) -> Question {
    let zh = language.starts_with("zh");
    Question {
        text: if zh { FALLBACK_QUESTION_ZH } else { FALLBACK_QUESTION_EN }.to_string(),
        lang: language.to_string(),
        difficulty: Difficulty::Medium,
        topic: if zh { "重點摘要" } else { "summary" }.to_string(),
        origin: QuestionOrigin::Base,
        keyword: None,
    }
}

/// Drives a full run against one output directory.
pub struct Pipeline {
    settings: Settings,
    backend: Arc<dyn InferenceBackend>,
    store: ArtifactStore,
    runner_config: RunnerConfig,
    cancel: CancellationToken,
    show_progress: bool,
}

impl Pipeline {
    pub fn new(settings: Settings, backend: Arc<dyn InferenceBackend>) -> Self {
        let store = ArtifactStore::new(settings.output_path());
        let runner_config = RunnerConfig::from_settings(&settings);
        let show_progress = settings.generation.show_progress;
        Self {
            settings,
            backend,
            store,
            runner_config,
            cancel: CancellationToken::new(),
            show_progress,
        }
    }

    pub fn with_runner_config(mut self, config: RunnerConfig) -> Self {
        self.runner_config = config;
        self
    }

    /// Stop dispatching when `token` is cancelled. Records already produced
    /// are kept.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn with_progress(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }

    pub fn store(&self) -> &ArtifactStore {
        &self.store
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Build chunks from the input directory, or reuse the ones on disk.
    ///
    /// Existing chunks are reused when the manifest matches the current inputs
    /// and chunking settings. A mismatch rebuilds them unless stage records
    /// exist, since those refer to the old chunk ids. `force` clears every
    /// artifact first.
    pub fn prepare_chunks(&self, force: bool) -> PipelineResult<ChunkSet> {
        tracing::info!(target: "pipeline", "state: {}", PipelineState::Chunking);
        if force {
            self.store.reset()?;
        }

        let existing = self.store.read_chunks()?;
        let previous = self.store.read_manifest()?;
        let input = self.settings.input_path();

        let corpus = match load_directory(&input) {
            Ok(corpus) => corpus,
            Err(InputError::MissingDirectory(path)) if existing.is_some() => {
                tracing::warn!(
                    target: "pipeline",
                    "input directory {} not found, reusing existing chunks",
                    path.display()
                );
                return Ok(reused(existing.unwrap_or_default(), previous));
            }
            Err(e) => return Err(e.into()),
        };
        let manifest = InputManifest::new(&corpus.files, &self.settings.chunking);

        match (existing, previous) {
            (Some(chunks), Some(previous)) if previous.matches(&manifest) => {
                tracing::info!(
                    target: "pipeline",
                    "inputs unchanged, reusing {} chunks",
                    chunks.len()
                );
                return Ok(reused(chunks, Some(previous)));
            }
            (Some(chunks), None) => {
                tracing::warn!(
                    target: "pipeline",
                    "{} has no manifest, reusing {} chunks without verifying inputs",
                    self.store.chunks_path().display(),
                    chunks.len()
                );
                return Ok(reused(chunks, None));
            }
            (Some(_), Some(previous)) if self.store.has_stage_artifacts() => {
                let mut changed = manifest.changed_sources(&previous);
                if changed.is_empty() {
                    changed.push("chunking settings".to_string());
                }
                return Err(PipelineError::StaleChunks {
                    changed: changed.join(", "),
                });
            }
            (None, _) if self.store.has_stage_artifacts() => {
                return Err(PipelineError::StaleChunks {
                    changed: format!("{} is missing", self.store.chunks_path().display()),
                });
            }
            _ => {}
        }

        let builder = ChunkBuilder::new(self.settings.chunking.clone());
        let build = builder.build(&corpus.pages);
        if build.chunks.is_empty() {
            tracing::warn!(
                target: "pipeline",
                "no chunks produced from {} ({} pages)",
                input.display(),
                build.stats.pages
            );
        }

        self.store.write_chunks(&build.chunks)?;
        self.store
            .write_manifest(&manifest.with_stats(build.stats.clone()))?;

        Ok(ChunkSet {
            chunks: build.chunks.into_iter().map(Arc::new).collect(),
            reused: false,
            stats: Some(build.stats),
        })
    }

    /// Chunks written by an earlier `chunk` step.
    pub fn load_chunks(&self) -> PipelineResult<Vec<Arc<Chunk>>> {
        match self.store.read_chunks()? {
            Some(chunks) => Ok(chunks.into_iter().map(Arc::new).collect()),
            None => Err(PipelineError::MissingChunks(
                self.store.chunks_path().display().to_string(),
            )),
        }
    }

    /// Prepare chunks and run every configured stage.
    pub async fn run(&self, force: bool) -> PipelineResult<RunSummary> {
        let set = self.prepare_chunks(force)?;
        let stages = self.settings.generation.stages.clone();
        self.run_stages(&set.chunks, &stages).await
    }

    /// Run the selected stages over `chunks` in pipeline order.
    ///
    /// Writes `corpus.jsonl` when every selected stage has a terminal record
    /// for every chunk, and `run_summary.json` in every case.
    pub async fn run_stages(
        &self,
        chunks: &[Arc<Chunk>],
        stages: &[Stage],
    ) -> PipelineResult<RunSummary> {
        let started = Instant::now();
        let selected: BTreeSet<Stage> = stages.iter().copied().collect();
        let chunk_ids: BTreeSet<ChunkId> = chunks.iter().map(|c| c.chunk_id).collect();
        let language = self.runner_config.primary_language().to_string();

        self.store.ensure_dirs()?;
        let mut logs: BTreeMap<Stage, StageLog> = self.store.load_stages().await?;
        for (stage, log) in logs.iter().filter(|(_, log)| log.skipped > 0) {
            tracing::warn!(
                target: "pipeline",
                "{stage}: skipped {} unreadable record(s)",
                log.skipped
            );
        }

        let mut summary = RunSummary::new(self.backend.name(), chunks.len());
        let mut report = self
            .runner_config
            .pipeline_tracing
            .then(|| PipelineReport::new(self.store.root().display().to_string()));

        for stage in Stage::ALL.into_iter().filter(|s| selected.contains(s)) {
            if self.cancel.is_cancelled() {
                summary.cancelled = true;
                break;
            }
            tracing::info!(target: "pipeline", "state: {}", PipelineState::Generating(stage));
            let stage_started = Instant::now();

            let plan = {
                let empty = StageLog::default();
                let current = logs.get(&stage).unwrap_or(&empty);
                let previous = stage.previous().and_then(|p| logs.get(&p));
                plan_stage(stage, chunks, current, previous, &language)
            };
            if plan.blocked > 0 {
                tracing::warn!(
                    target: "pipeline",
                    "{stage}: {} chunk(s) have no terminal {} record and are skipped",
                    plan.blocked,
                    stage.previous().map(|p| p.as_str()).unwrap_or("upstream")
                );
            }

            let mut stage_summary = StageSummary::new(stage);
            stage_summary.skipped = plan.skipped;
            stage_summary.blocked = plan.blocked;
            stage_summary.processed = plan.inputs.len() + plan.direct.len();

            let mut terminal = plan.direct.clone();
            let mut cancelled = false;

            if stage_summary.processed > 0 {
                let mut writer = self.store.stage_writer(stage).await?;
                for record in &plan.direct {
                    writer.write(record).await?;
                }

                if !plan.inputs.is_empty() {
                    let input_count = plan.inputs.len();
                    let mut runner =
                        StageRunner::new(Arc::clone(&self.backend), self.runner_config.clone())
                            .with_cancellation(self.cancel.clone());
                    if let Some(bar) = crate::io::progress::stage_bar(self.show_progress) {
                        runner = runner.with_progress(bar);
                    }

                    let outcome = runner.run(stage, plan.inputs, &mut writer).await?;
                    stage_summary.attempts = outcome.metrics.attempts;
                    stage_summary.retries = outcome.metrics.retries;
                    stage_summary.all_failed = !outcome.cancelled
                        && plan.direct.is_empty()
                        && outcome.metrics.failed == input_count;
                    cancelled = outcome.cancelled;
                    terminal.extend(outcome.records);
                    if let Some(report) = report.as_mut() {
                        report.add_stage(outcome.metrics);
                    }
                }
                writer.finish().await?;
            }

            if let Some(log) = logs.get_mut(&stage) {
                for record in terminal {
                    log.apply(record);
                }
                stage_summary.count_from(log, &chunk_ids);
            }
            stage_summary.wall_time_secs = stage_started.elapsed().as_secs_f64();
            tracing::info!(
                target: "pipeline",
                "{stage}: {} ok, {} failed, {} filtered_out ({} skipped, {} blocked)",
                stage_summary.ok,
                stage_summary.failed,
                stage_summary.filtered_out,
                stage_summary.skipped,
                stage_summary.blocked
            );

            if stage_summary.blocked > 0 && summary.blocked_stage.is_none() {
                summary.blocked_stage = Some(stage);
            }
            let all_failed = stage_summary.all_failed;
            summary.stages.push(stage_summary);

            if cancelled {
                summary.cancelled = true;
                tracing::warn!(target: "pipeline", "{stage}: interrupted, records so far are kept");
                break;
            }
            if all_failed {
                summary.aborted_stage = Some(stage);
                tracing::error!(
                    target: "pipeline",
                    "{stage}: every input failed, remaining stages skipped"
                );
                break;
            }
        }

        if let Some(stage) = summary.blocked_stage.filter(|_| !summary.cancelled) {
            tracing::warn!(
                target: "pipeline",
                "{stage}: not every chunk reached a terminal record, corpus not written"
            );
        } else if !summary.cancelled && summary.aborted_stage.is_none() {
            tracing::info!(target: "pipeline", "state: {}", PipelineState::Done);
            let records = assemble(chunks, &logs);
            self.store.write_corpus(&records)?;
            summary.corpus_records = records.len();
            crate::log_event!("pipeline", "corpus written", "{} records", records.len());
            summary.completed = true;
        }

        summary.finish();
        self.store.write_summary(&summary)?;

        if let Some(mut report) = report {
            report.finalize(started.elapsed());
            report.log();
        }
        Ok(summary)
    }
}

fn reused(chunks: Vec<Chunk>, manifest: Option<InputManifest>) -> ChunkSet {
    ChunkSet {
        chunks: chunks.into_iter().map(Arc::new).collect(),
        reused: true,
        stats: manifest.and_then(|m| m.stats),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(id: u32) -> Arc<Chunk> {
        Arc::new(Chunk {
            chunk_id: ChunkId::new(id),
            source: "a.txt".into(),
            page: None,
            text: format!("Passage number {id}."),
            char_offset_start: 0,
            char_offset_end: 18,
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
    fn test_plan_skips_done_and_blocks_missing_predecessor() {
        let chunks: Vec<_> = (0..4).map(chunk).collect();
        let keywords = StagePayload::Keywords {
            keywords: vec!["pump".into()],
        };
        let previous = log(vec![
            StageRecord::ok(ChunkId::new(0), Stage::Keyword, keywords.clone(), 1),
            StageRecord::ok(ChunkId::new(1), Stage::Keyword, keywords, 1),
            StageRecord::failed(ChunkId::new(2), Stage::Keyword, 3, "down"),
            StageRecord::retried(ChunkId::new(3), Stage::Keyword, 1, "down"),
        ]);
        let current = log(vec![StageRecord::ok(
            ChunkId::new(0),
            Stage::Question,
            StagePayload::Questions { questions: vec![fallback_question("en")] },
            1,
        )]);

        let plan = plan_stage(Stage::Question, &chunks, &current, Some(&previous), "en");
        assert_eq!(plan.skipped, 1);
        assert_eq!(plan.blocked, 1);
        assert_eq!(plan.inputs.len(), 2);
        assert_eq!(plan.inputs[0].upstream.keywords, vec!["pump"]);
        // A failed keyword record still lets question generation run on raw text.
        assert!(plan.inputs[1].upstream.keywords.is_empty());
    }

    #[test]
    fn test_plan_answer_fallback_question() {
        let chunks = vec![chunk(0)];
        let previous = log(vec![StageRecord::filtered(
            ChunkId::new(0),
            Stage::Question,
            StagePayload::Questions { questions: vec![] },
            1,
            "no questions generated",
        )]);
        let plan = plan_stage(Stage::Answer, &chunks, &StageLog::default(), Some(&previous), "zh");
        assert_eq!(plan.inputs.len(), 1);
        let questions = &plan.inputs[0].upstream.questions;
        assert_eq!(questions.len(), 1);
        assert_eq!(questions[0].text, FALLBACK_QUESTION_ZH);
        assert_eq!(questions[0].lang, "zh");
    }

    #[test]
    fn test_plan_critique_without_answers() {
        let chunks = vec![chunk(0)];
        let previous = log(vec![StageRecord::failed(ChunkId::new(0), Stage::Answer, 3, "down")]);
        let plan = plan_stage(Stage::Critique, &chunks, &StageLog::default(), Some(&previous), "en");
        assert!(plan.inputs.is_empty());
        assert_eq!(plan.direct.len(), 1);
        assert_eq!(plan.direct[0].status, RecordStatus::FilteredOut);
        assert_eq!(plan.direct[0].attempt_count, 0);
        assert_eq!(plan.direct[0].error.as_deref(), Some(NO_ANSWERS));
    }

    #[test]
    fn test_plan_revisits_placeholder_once_answers_exist() {
        let chunks = vec![chunk(0), chunk(1)];
        let current = log(vec![
            StageRecord::filtered(ChunkId::new(0), Stage::Critique, StagePayload::Empty, 0, NO_ANSWERS),
            StageRecord::filtered(ChunkId::new(1), Stage::Critique, StagePayload::Empty, 0, NO_ANSWERS),
        ]);
        let answers = StagePayload::Answers {
            answers: vec![Answer {
                question: FALLBACK_QUESTION_EN.into(),
                lang: "en".into(),
                text: "The passage numbers itself.".into(),
                citations: vec!["chunk:0".into()],
                has_citation: true,
                confidence: 0.7,
            }],
        };
        let previous = log(vec![
            StageRecord::ok(ChunkId::new(0), Stage::Answer, answers, 2),
            StageRecord::failed(ChunkId::new(1), Stage::Answer, 1, "down"),
        ]);

        let plan = plan_stage(Stage::Critique, &chunks, &current, Some(&previous), "en");
        assert_eq!(plan.inputs.len(), 1);
        assert_eq!(plan.inputs[0].chunk.chunk_id, ChunkId::new(0));
        assert!(plan.direct.is_empty());
        assert_eq!(plan.skipped, 1);
    }

    #[test]
    fn test_state_display() {
        assert_eq!(PipelineState::Chunking.to_string(), "chunking");
        assert_eq!(PipelineState::Generating(Stage::Answer).to_string(), "answer");
        assert_eq!(PipelineState::Done.to_string(), "done");
    }
}
