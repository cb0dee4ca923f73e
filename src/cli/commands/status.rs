//! Status command - summarize the artifacts in an output directory.

use crate::config::Settings;
use crate::io::ExitCode;
use crate::pipeline::ArtifactStatus;
use crate::store::ArtifactStore;

pub fn run(settings: &Settings, json: bool) -> ExitCode {
    let store = ArtifactStore::new(settings.output_path());
    let status = match ArtifactStatus::collect(&store) {
        Ok(status) => status,
        Err(e) => {
            eprintln!("Error: {e}");
            return ExitCode::GeneralError;
        }
    };

    if json {
        return match serde_json::to_string_pretty(&status) {
            Ok(text) => {
                println!("{text}");
                ExitCode::Success
            }
            Err(e) => {
                eprintln!("Error: {e}");
                ExitCode::GeneralError
            }
        };
    }

    println!("Artifacts in {}", status.output);
    println!("{}", "=".repeat(50));

    match &status.chunks {
        Some(chunks) => {
            println!(
                "Chunks: {} from {} source(s), length avg {:.1} / min {} / max {}, oversized {}",
                chunks.count,
                chunks.sources,
                chunks.avg_len,
                chunks.min_len,
                chunks.max_len,
                chunks.oversized
            );
        }
        None => println!("Chunks: none (run 'quadchain chunk' first)"),
    }
    if let Some(build) = &status.build {
        let rejected = &build.rejected;
        println!(
            "Rejected segments: {} (too short {}, too long {}, low density {}, unterminated {})",
            rejected.total(),
            rejected.too_short,
            rejected.too_long,
            rejected.low_density,
            rejected.unterminated
        );
    }

    if status.stages.is_empty() {
        println!("Stages: no records yet");
    } else {
        println!();
        println!(
            "{:<10} {:>6} {:>8} {:>12} {:>8} {:>8}",
            "Stage", "Ok", "Failed", "Filtered", "Retried", "Missing"
        );
        for counts in &status.stages {
            println!(
                "{:<10} {:>6} {:>8} {:>12} {:>8} {:>8}",
                counts.stage.as_str(),
                counts.ok,
                counts.failed,
                counts.filtered_out,
                counts.retried,
                counts.missing
            );
        }
    }

    if let Some(run) = &status.last_run {
        println!();
        let state = if run.cancelled {
            "interrupted".to_string()
        } else if let Some(stage) = run.aborted_stage {
            format!("aborted at {stage}")
        } else if run.completed {
            "completed".to_string()
        } else {
            "incomplete".to_string()
        };
        println!(
            "Last run: {} ({state}), backend {}, {} chunks, {} lineage records",
            run.finished_at, run.backend, run.chunks, run.corpus_records
        );
    }
    ExitCode::Success
}
