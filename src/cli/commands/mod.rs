//! Command implementations for the CLI.
//!
//! Each command is implemented in its own module and returns the process
//! exit code.

pub mod chunk;
pub mod generate;
pub mod init;
pub mod run;
pub mod status;

use std::sync::Arc;

use crate::backend::{self, InferenceBackend};
use crate::config::Settings;
use crate::io::ExitCode;
use crate::pipeline::{PipelineError, RunSummary};

/// Resolve the configured backend, reporting failures as configuration errors.
pub(crate) fn resolve_backend(settings: &Settings) -> Result<Arc<dyn InferenceBackend>, ExitCode> {
    backend::from_settings(settings).map_err(|e| {
        eprintln!("Configuration error: {e}");
        ExitCode::ConfigError
    })
}

/// Report a fatal pipeline error and map it to an exit code.
pub(crate) fn report_error(error: &PipelineError) -> ExitCode {
    eprintln!("Error: {error}");
    match error {
        PipelineError::Configuration(_) => ExitCode::ConfigError,
        _ => ExitCode::GeneralError,
    }
}

/// Print per-stage counts of a finished run.
pub(crate) fn print_summary(summary: &RunSummary) {
    println!(
        "{:<10} {:>6} {:>8} {:>12} {:>8} {:>8} {:>9}",
        "Stage", "Ok", "Failed", "Filtered", "Skipped", "Blocked", "Attempts"
    );
    for stage in &summary.stages {
        println!(
            "{:<10} {:>6} {:>8} {:>12} {:>8} {:>8} {:>9}",
            stage.stage.as_str(),
            stage.ok,
            stage.failed,
            stage.filtered_out,
            stage.skipped,
            stage.blocked,
            stage.attempts
        );
    }

    if summary.cancelled {
        println!("Interrupted. Rerun the same command to resume.");
    } else if let Some(stage) = summary.aborted_stage {
        println!("Every {stage} input failed; later stages were not run.");
    } else if let Some(stage) = summary.blocked_stage {
        let previous = stage.previous().map(|p| p.as_str()).unwrap_or("upstream");
        println!("Some chunks have no terminal {previous} record; run that stage before {stage}.");
    } else if summary.completed {
        println!(
            "Wrote {} lineage records for {} chunks.",
            summary.corpus_records, summary.chunks
        );
    }
}
