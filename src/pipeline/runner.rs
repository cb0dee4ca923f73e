//! Parallel executor for one generation stage.
//!
//! ```text
//! dispatcher --(semaphore, W permits)--> workers (JoinSet)
//!                                            |
//!                                   mpsc<RunnerEvent>
//!                                            v
//!                                 writer loop -> RecordSink
//! ```
//!
//! Workers share only the backend, the configuration and the counters. A
//! single writer owns the sink, so records land as whole lines in the order
//! they complete, or in input order when `ordered_output` is set. Failures of
//! individual inputs become records; only sink I/O errors and worker panics
//! abort the stage.

use async_trait::async_trait;
use indicatif::ProgressBar;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::{Semaphore, mpsc};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use super::config::RunnerConfig;
use super::metrics::{StageMetrics, StageTracker};
use super::retry::{CallState, RetryMachine};
use super::types::{PipelineError, PipelineResult, Stage, StageInput, StageRecord};
use super::validate::Validation;
use crate::backend::{BackendError, GenerationRequest, InferenceBackend};
use crate::store::{JsonlWriter, StoreResult};

/// Destination for records as they complete.
#[async_trait]
pub trait RecordSink: Send {
    async fn accept(&mut self, record: &StageRecord) -> StoreResult<()>;
}

#[async_trait]
impl RecordSink for JsonlWriter {
    async fn accept(&mut self, record: &StageRecord) -> StoreResult<()> {
        self.write(record).await
    }
}

#[async_trait]
impl RecordSink for Vec<StageRecord> {
    async fn accept(&mut self, record: &StageRecord) -> StoreResult<()> {
        self.push(record.clone());
        Ok(())
    }
}

/// Result of running one stage over its inputs.
#[derive(Debug)]
pub struct StageOutcome {
    pub metrics: StageMetrics,
    /// Terminal records, in the order they were written.
    pub records: Vec<StageRecord>,
    /// Dispatch stopped early; some inputs have no terminal record.
    pub cancelled: bool,
}

enum RunnerEvent {
    Retried(StageRecord),
    Terminal { index: usize, record: StageRecord },
}

/// Everything a worker task needs, cheap to clone.
#[derive(Clone)]
struct WorkerContext {
    stage: Stage,
    backend: Arc<dyn InferenceBackend>,
    config: Arc<RunnerConfig>,
    tracker: Arc<StageTracker>,
    events: mpsc::Sender<RunnerEvent>,
    cancel: CancellationToken,
}

impl WorkerContext {
    async fn send(&self, event: RunnerEvent) {
        // A closed channel means the writer already gave up on this stage.
        let _ = self.events.send(event).await;
    }

    async fn process(self, index: usize, input: StageInput) {
        let chunk_id = input.chunk.chunk_id;
        let stage = self.stage;
        let mut machine = RetryMachine::new(self.config.policy);

        loop {
            if self.cancel.is_cancelled() {
                tracing::debug!(target: "runner", "chunk {chunk_id} {stage}: interrupted");
                return;
            }

            let attempt = machine.begin_attempt();
            let request = GenerationRequest {
                stage,
                chunk: &input.chunk,
                upstream: &input.upstream,
                language: self.config.primary_language(),
                languages: &self.config.languages,
                options: &self.config.options,
            };

            self.tracker.call_started();
            let result =
                tokio::time::timeout(self.config.call_timeout, self.backend.generate(&request))
                    .await;
            self.tracker.call_finished();

            let result = result.unwrap_or_else(|_| {
                Err(BackendError::unavailable(format!(
                    "call timed out after {:.1}s",
                    self.config.call_timeout.as_secs_f64()
                )))
            });
            let outcome =
                result.and_then(|payload| self.config.validator.validate(stage, payload));

            let error = match outcome {
                Ok(Validation::Accepted(payload)) => {
                    machine.on_success();
                    let record = StageRecord::ok(chunk_id, stage, payload, attempt);
                    self.send(RunnerEvent::Terminal { index, record }).await;
                    return;
                }
                Ok(Validation::Rejected { payload, reason }) => {
                    machine.on_success();
                    tracing::debug!(target: "runner", "chunk {chunk_id} {stage}: filtered out: {reason}");
                    let record = StageRecord::filtered(chunk_id, stage, payload, attempt, reason);
                    self.send(RunnerEvent::Terminal { index, record }).await;
                    return;
                }
                Err(error) => error,
            };

            let message = error.to_string();
            match machine.on_error(error).clone() {
                CallState::Retrying { retry, delay } => {
                    self.tracker.record_retry();
                    crate::debug_event!(
                        "runner",
                        "retry",
                        "chunk {chunk_id} {stage}: attempt {attempt} failed ({message}), retry {retry} in {}ms",
                        delay.as_millis()
                    );
                    let record = StageRecord::retried(chunk_id, stage, attempt, message);
                    self.send(RunnerEvent::Retried(record)).await;

                    if !delay.is_zero() {
                        tokio::select! {
                            _ = self.cancel.cancelled() => {
                                tracing::debug!(target: "runner", "chunk {chunk_id} {stage}: interrupted during backoff");
                                return;
                            }
                            _ = tokio::time::sleep(delay) => {}
                        }
                    }
                }
                _ => {
                    tracing::warn!(
                        target: "runner",
                        "chunk {chunk_id} {stage}: failed after {attempt} attempt(s): {message}"
                    );
                    let record = StageRecord::failed(chunk_id, stage, attempt, message);
                    self.send(RunnerEvent::Terminal { index, record }).await;
                    return;
                }
            }
        }
    }
}

/// Applies one stage to a batch of inputs with bounded concurrency.
pub struct StageRunner {
    backend: Arc<dyn InferenceBackend>,
    config: Arc<RunnerConfig>,
    cancel: CancellationToken,
    progress: Option<ProgressBar>,
}

impl StageRunner {
    pub fn new(backend: Arc<dyn InferenceBackend>, config: RunnerConfig) -> Self {
        Self {
            backend,
            config: Arc::new(config),
            cancel: CancellationToken::new(),
            progress: None,
        }
    }

    /// Stop dispatching when `token` is cancelled.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn with_progress(mut self, bar: ProgressBar) -> Self {
        self.progress = Some(bar);
        self
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    /// Fresh counters for a run of `stage` over `inputs` inputs.
    ///
    /// Keep a clone to watch a [`run_tracked`](Self::run_tracked) call while
    /// it is in progress.
    pub fn tracker(&self, stage: Stage, inputs: usize) -> Arc<StageTracker> {
        Arc::new(StageTracker::new(
            stage,
            self.config.worker_count.max(1),
            inputs,
        ))
    }

    /// Run `stage` over `inputs`, handing every record to `sink`.
    pub async fn run<S: RecordSink>(
        &self,
        stage: Stage,
        inputs: Vec<StageInput>,
        sink: &mut S,
    ) -> PipelineResult<StageOutcome> {
        let tracker = self.tracker(stage, inputs.len());
        self.run_tracked(tracker, inputs, sink).await
    }

    /// Like [`run`](Self::run), updating `tracker` as calls start and finish.
    pub async fn run_tracked<S: RecordSink>(
        &self,
        tracker: Arc<StageTracker>,
        inputs: Vec<StageInput>,
        sink: &mut S,
    ) -> PipelineResult<StageOutcome> {
        let stage = tracker.stage();
        let workers = self.config.worker_count.max(1);
        let cancel = self.cancel.child_token();
        let (events, mut rx) = mpsc::channel(workers * 4);

        tracing::info!(
            target: "runner",
            "{stage}: {} inputs, {workers} workers, backend {}",
            inputs.len(),
            self.backend.name()
        );
        if let Some(bar) = &self.progress {
            bar.set_length(inputs.len() as u64);
            bar.set_position(0);
            bar.set_message(stage.as_str());
        }

        let context = WorkerContext {
            stage,
            backend: Arc::clone(&self.backend),
            config: Arc::clone(&self.config),
            tracker: Arc::clone(&tracker),
            events,
            cancel: cancel.clone(),
        };
        let dispatcher = tokio::spawn(dispatch(context, inputs, workers));

        let ordered = self.config.ordered_output;
        let mut pending: BTreeMap<usize, StageRecord> = BTreeMap::new();
        let mut next_index = 0;
        let mut records = Vec::new();
        let mut write_error = None;

        while let Some(event) = rx.recv().await {
            let written = match event {
                RunnerEvent::Retried(record) => sink.accept(&record).await,
                RunnerEvent::Terminal { index, record } => {
                    tracker.record_outcome(record.status);
                    if let Some(bar) = &self.progress {
                        let snapshot = tracker.snapshot();
                        bar.set_position(snapshot.completed as u64);
                        bar.set_message(format!(
                            "{stage} {:.0}%",
                            snapshot.utilization() * 100.0
                        ));
                    }
                    if ordered {
                        pending.insert(index, record);
                        flush_ready(&mut pending, &mut next_index, sink, &mut records).await
                    } else {
                        let result = sink.accept(&record).await;
                        records.push(record);
                        result
                    }
                }
            };
            if let Err(e) = written {
                tracing::error!(target: "runner", "{stage}: cannot persist record: {e}");
                cancel.cancel();
                write_error = Some(e);
                break;
            }
        }
        drop(rx);

        let panics = dispatcher
            .await
            .map_err(|e| PipelineError::Worker(format!("{stage} dispatcher: {e}")))?;

        if let Some(e) = write_error {
            return Err(e.into());
        }
        // Inputs interrupted by cancellation leave gaps; write what is buffered.
        for (_, record) in std::mem::take(&mut pending) {
            sink.accept(&record).await?;
            records.push(record);
        }
        if panics > 0 {
            return Err(PipelineError::Worker(format!(
                "{panics} {stage} worker(s) panicked"
            )));
        }

        if let Some(bar) = &self.progress {
            bar.finish_and_clear();
        }
        let metrics = tracker.finalize();
        tracing::info!(
            target: "runner",
            "{stage}: {} ok, {} failed, {} filtered in {:.2}s ({:.1}/s)",
            metrics.ok,
            metrics.failed,
            metrics.filtered,
            metrics.wall_time.as_secs_f64(),
            metrics.throughput()
        );

        Ok(StageOutcome {
            metrics,
            records,
            cancelled: self.cancel.is_cancelled(),
        })
    }
}

/// Feed inputs to workers as permits free up. Returns the number of panicked workers.
async fn dispatch(context: WorkerContext, inputs: Vec<StageInput>, workers: usize) -> usize {
    let semaphore = Arc::new(Semaphore::new(workers));
    let mut tasks = JoinSet::new();

    for (index, input) in inputs.into_iter().enumerate() {
        let permit = tokio::select! {
            biased;
            _ = context.cancel.cancelled() => break,
            permit = Arc::clone(&semaphore).acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
        };
        context.tracker.record_dispatch();
        let worker = context.clone();
        tasks.spawn(async move {
            let _permit = permit;
            worker.process(index, input).await;
        });
    }
    drop(context);

    let mut panics = 0;
    while let Some(joined) = tasks.join_next().await {
        if let Err(e) = joined {
            tracing::error!(target: "runner", "worker task failed: {e}");
            panics += 1;
        }
    }
    panics
}

async fn flush_ready<S: RecordSink>(
    pending: &mut BTreeMap<usize, StageRecord>,
    next_index: &mut usize,
    sink: &mut S,
    records: &mut Vec<StageRecord>,
) -> StoreResult<()> {
    while let Some(record) = pending.remove(&*next_index) {
        sink.accept(&record).await?;
        records.push(record);
        *next_index += 1;
    }
    Ok(())
}
