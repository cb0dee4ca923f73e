//! Stage metrics collection and reporting.
//!
//! Tracks dispatch, completion, outcome counts and retries for each stage
//! while it runs, plus process memory, to show where generation time goes.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use sysinfo::{Pid, ProcessRefreshKind, System};

use super::types::{RecordStatus, Stage};

/// Final metrics for one stage run.
#[derive(Debug, Clone)]
pub struct StageMetrics {
    pub stage: Stage,
    /// Worker slots available
    pub workers: usize,
    /// Total wall clock time
    pub wall_time: Duration,
    /// Inputs handed to the runner
    pub inputs: usize,
    pub completed: usize,
    pub ok: usize,
    pub failed: usize,
    pub filtered: usize,
    /// Backend calls made, retries included
    pub attempts: u64,
    pub retries: u64,
    /// Most calls ever in flight at once
    pub peak_in_flight: usize,
}

impl StageMetrics {
    /// Completed inputs per second.
    pub fn throughput(&self) -> f64 {
        let secs = self.wall_time.as_secs_f64();
        if secs > 0.0 {
            self.completed as f64 / secs
        } else {
            0.0
        }
    }

    /// Calculate percentage of total pipeline time.
    pub fn percentage_of(&self, total: Duration) -> f64 {
        if total.as_nanos() > 0 {
            (self.wall_time.as_nanos() as f64 / total.as_nanos() as f64) * 100.0
        } else {
            0.0
        }
    }
}

/// Point-in-time view of a running stage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StageSnapshot {
    pub workers: usize,
    pub inputs: usize,
    pub dispatched: usize,
    pub in_flight: usize,
    pub completed: usize,
    pub ok: usize,
    pub failed: usize,
    pub filtered: usize,
    pub attempts: u64,
    pub elapsed: Duration,
}

impl StageSnapshot {
    /// Completed inputs per second so far.
    pub fn throughput(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.completed as f64 / secs
        } else {
            0.0
        }
    }

    /// Share of worker slots currently waiting on the backend, 0.0 to 1.0.
    pub fn utilization(&self) -> f64 {
        if self.workers == 0 {
            0.0
        } else {
            (self.in_flight as f64 / self.workers as f64).min(1.0)
        }
    }
}

/// Thread-safe counters updated by workers while a stage runs.
#[derive(Debug)]
pub struct StageTracker {
    stage: Stage,
    workers: usize,
    start: Instant,
    inputs: usize,
    dispatched: AtomicUsize,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
    completed: AtomicUsize,
    ok: AtomicUsize,
    failed: AtomicUsize,
    filtered: AtomicUsize,
    attempts: AtomicU64,
    retries: AtomicU64,
}

impl StageTracker {
    pub fn new(stage: Stage, workers: usize, inputs: usize) -> Self {
        Self {
            stage,
            workers,
            start: Instant::now(),
            inputs,
            dispatched: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            peak_in_flight: AtomicUsize::new(0),
            completed: AtomicUsize::new(0),
            ok: AtomicUsize::new(0),
            failed: AtomicUsize::new(0),
            filtered: AtomicUsize::new(0),
            attempts: AtomicU64::new(0),
            retries: AtomicU64::new(0),
        }
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    /// An input was handed to a worker.
    pub fn record_dispatch(&self) {
        self.dispatched.fetch_add(1, Ordering::Relaxed);
    }

    /// A backend call started.
    pub fn call_started(&self) {
        let now = self.in_flight.fetch_add(1, Ordering::Relaxed) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::Relaxed);
        self.attempts.fetch_add(1, Ordering::Relaxed);
    }

    /// A backend call returned, timed out or was abandoned.
    pub fn call_finished(&self) {
        self.in_flight.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn record_retry(&self) {
        self.retries.fetch_add(1, Ordering::Relaxed);
    }

    /// A terminal record was produced.
    pub fn record_outcome(&self, status: RecordStatus) {
        let counter = match status {
            RecordStatus::Ok => &self.ok,
            RecordStatus::Failed => &self.failed,
            RecordStatus::FilteredOut => &self.filtered,
            RecordStatus::Retried => return,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        self.completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StageSnapshot {
        StageSnapshot {
            workers: self.workers,
            inputs: self.inputs,
            dispatched: self.dispatched.load(Ordering::Relaxed),
            in_flight: self.in_flight.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            ok: self.ok.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            filtered: self.filtered.load(Ordering::Relaxed),
            attempts: self.attempts.load(Ordering::Relaxed),
            elapsed: self.start.elapsed(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Freeze the counters into metrics.
    pub fn finalize(&self) -> StageMetrics {
        let snap = self.snapshot();
        StageMetrics {
            stage: self.stage,
            workers: self.workers,
            wall_time: self.start.elapsed(),
            inputs: snap.inputs,
            completed: snap.completed,
            ok: snap.ok,
            failed: snap.failed,
            filtered: snap.filtered,
            attempts: snap.attempts,
            retries: self.retries.load(Ordering::Relaxed),
            peak_in_flight: self.peak_in_flight.load(Ordering::Relaxed),
        }
    }
}

/// Memory snapshot from sysinfo.
#[derive(Debug, Clone, Copy, Default)]
pub struct MemorySnapshot {
    /// Resident set size in bytes
    pub rss: u64,
    /// Virtual memory in bytes
    pub virtual_mem: u64,
}

impl MemorySnapshot {
    /// Get current process memory usage.
    pub fn current() -> Self {
        let mut sys = System::new();
        let pid = Pid::from_u32(std::process::id());
        sys.refresh_processes_specifics(
            sysinfo::ProcessesToUpdate::Some(&[pid]),
            true,
            ProcessRefreshKind::nothing().with_memory(),
        );

        if let Some(process) = sys.process(pid) {
            Self {
                rss: process.memory(),
                virtual_mem: process.virtual_memory(),
            }
        } else {
            Self::default()
        }
    }

    /// Format RSS as human-readable string.
    pub fn rss_human(&self) -> String {
        format_bytes(self.rss)
    }
}

/// Format bytes as human-readable string.
pub fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.1}GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1}MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1}KB", bytes as f64 / KB as f64)
    } else {
        format!("{bytes}B")
    }
}

/// Metrics for every stage of one run.
#[derive(Debug, Default)]
pub struct PipelineReport {
    /// Output directory of the run
    pub output: String,
    pub stages: Vec<StageMetrics>,
    pub memory_start: MemorySnapshot,
    pub memory_end: MemorySnapshot,
    pub total_time: Duration,
}

impl PipelineReport {
    pub fn new(output: impl Into<String>) -> Self {
        Self {
            output: output.into(),
            stages: Vec::new(),
            memory_start: MemorySnapshot::current(),
            memory_end: MemorySnapshot::default(),
            total_time: Duration::ZERO,
        }
    }

    pub fn add_stage(&mut self, metrics: StageMetrics) {
        self.stages.push(metrics);
    }

    pub fn finalize(&mut self, total_time: Duration) {
        self.total_time = total_time;
        self.memory_end = MemorySnapshot::current();
    }

    /// Stage with the longest wall time.
    pub fn bottleneck(&self) -> Option<&StageMetrics> {
        self.stages.iter().max_by_key(|s| s.wall_time)
    }

    /// Log the report using tracing.
    pub fn log(&self) {
        tracing::info!(target: "pipeline", "========================================");
        tracing::info!(target: "pipeline", "PIPELINE TRACE: {}", self.output);
        tracing::info!(target: "pipeline", "========================================");
        tracing::info!(target: "pipeline",
            "{:<10} {:>7} {:>10} {:>12} {:>6} {:>6} {:>6} {:>8} {:>6}",
            "Stage", "Workers", "Time", "Throughput", "Ok", "Fail", "Filt", "Attempts", "Peak"
        );
        tracing::info!(target: "pipeline", "{}", "-".repeat(84));

        for stage in &self.stages {
            let throughput = if stage.completed > 0 {
                format!("{:.1}/s", stage.throughput())
            } else {
                "-".to_string()
            };

            tracing::info!(target: "pipeline",
                "{:<10} {:>7} {:>10} {:>12} {:>6} {:>6} {:>6} {:>8} {:>6}",
                stage.stage.as_str(),
                stage.workers,
                format!("{:.2}s", stage.wall_time.as_secs_f64()),
                throughput,
                stage.ok,
                stage.failed,
                stage.filtered,
                stage.attempts,
                stage.peak_in_flight
            );
        }

        tracing::info!(target: "pipeline", "{}", "-".repeat(84));

        let mem_delta = self.memory_end.rss.saturating_sub(self.memory_start.rss);
        let bottleneck = self
            .bottleneck()
            .map(|s| format!("{} ({:.0}%)", s.stage, s.percentage_of(self.total_time)))
            .unwrap_or_else(|| "-".to_string());

        tracing::info!(target: "pipeline",
            "Total: {:.2}s | Memory: {} -> {} (+{}) | Bottleneck: {}",
            self.total_time.as_secs_f64(),
            self.memory_start.rss_human(),
            self.memory_end.rss_human(),
            format_bytes(mem_delta),
            bottleneck
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_tracker() {
        let tracker = StageTracker::new(Stage::Answer, 4, 3);

        for _ in 0..3 {
            tracker.record_dispatch();
        }
        tracker.call_started();
        tracker.call_started();
        let running = tracker.snapshot();
        assert_eq!(running.in_flight, 2);
        assert_eq!(running.dispatched, 3);
        assert!((running.utilization() - 0.5).abs() < 1e-9);
        tracker.call_finished();
        tracker.record_retry();
        tracker.call_started();
        tracker.call_finished();
        tracker.call_finished();

        tracker.record_outcome(RecordStatus::Ok);
        tracker.record_outcome(RecordStatus::Retried);
        tracker.record_outcome(RecordStatus::Failed);
        tracker.record_outcome(RecordStatus::FilteredOut);

        std::thread::sleep(Duration::from_millis(10));

        let metrics = tracker.finalize();
        assert_eq!(metrics.stage, Stage::Answer);
        assert_eq!(metrics.workers, 4);
        assert_eq!(metrics.inputs, 3);
        assert_eq!(metrics.completed, 3);
        assert_eq!((metrics.ok, metrics.failed, metrics.filtered), (1, 1, 1));
        assert_eq!(metrics.attempts, 3);
        assert_eq!(metrics.retries, 1);
        assert_eq!(metrics.peak_in_flight, 2);
        assert!(metrics.wall_time >= Duration::from_millis(10));
        assert!(metrics.throughput() > 0.0);
    }

    #[test]
    fn test_memory_snapshot() {
        let snapshot = MemorySnapshot::current();
        // Should have some memory usage
        assert!(snapshot.rss > 0);
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(500), "500B");
        assert_eq!(format_bytes(1500), "1.5KB");
        assert_eq!(format_bytes(1_500_000), "1.4MB");
        assert_eq!(format_bytes(1_500_000_000), "1.4GB");
    }
}
