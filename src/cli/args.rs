//! CLI argument parsing using clap.
//!
//! Contains the Cli struct, the Commands enum and the flag groups shared by
//! the pipeline commands.

use clap::{
    Args, Parser, Subcommand,
    builder::styling::{AnsiColor, Effects, Styles},
};
use std::path::{Path, PathBuf};

use crate::backend::BackendMode;
use crate::config::Settings;
use crate::pipeline::Stage;

fn clap_cargo_style() -> Styles {
    Styles::styled()
        .header(AnsiColor::Cyan.on_default() | Effects::BOLD)
        .usage(AnsiColor::Cyan.on_default() | Effects::BOLD)
        .literal(AnsiColor::Green.on_default())
        .placeholder(AnsiColor::Green.on_default())
}

const AFTER_HELP: &str = "\
Quick Start:
  $ quadchain init                        # Create .quadchain/settings.toml
  $ quadchain chunk -i datasets -o corpus # Build chunks.jsonl
  $ quadchain generate -o corpus          # Run keyword, question, answer, critique
  $ quadchain run --backend remote        # Chunk and generate in one go
  $ quadchain status -o corpus            # Inspect artifacts";

/// Staged QA corpus generation
#[derive(Parser, Debug)]
#[command(
    name = "quadchain",
    version = env!("CARGO_PKG_VERSION"),
    about = "Chunk extracted documents and generate keyword, question, answer and critique records",
    next_line_help = true,
    styles = clap_cargo_style(),
    after_help = AFTER_HELP
)]
pub struct Cli {
    /// Path to custom settings.toml file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Disable progress bars
    #[arg(long, global = true)]
    pub no_progress: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Set up .quadchain directory with default configuration
    Init {
        /// Force overwrite existing configuration
        #[arg(short, long)]
        force: bool,
    },

    /// Display active settings
    Config,

    /// Split input documents into chunks
    Chunk {
        #[command(flatten)]
        paths: PathArgs,

        /// Discard existing artifacts and rebuild
        #[arg(short, long)]
        force: bool,
    },

    /// Run generation stages over existing chunks
    Generate {
        /// Output directory holding chunks.jsonl
        #[arg(short, long)]
        output: Option<PathBuf>,

        #[command(flatten)]
        generation: GenerationArgs,
    },

    /// Chunk inputs, then run every selected stage
    Run {
        #[command(flatten)]
        paths: PathArgs,

        #[command(flatten)]
        generation: GenerationArgs,

        /// Discard existing artifacts and start over
        #[arg(short, long)]
        force: bool,
    },

    /// Show chunk statistics and per-stage record counts
    Status {
        /// Output directory to inspect
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },
}

/// Input and output directory overrides.
#[derive(Args, Debug, Clone, Default)]
pub struct PathArgs {
    /// Directory of extracted documents
    #[arg(short, long)]
    pub input: Option<PathBuf>,

    /// Directory for chunk, stage and corpus artifacts
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

impl PathArgs {
    pub fn apply(&self, settings: &mut Settings) {
        if let Some(input) = &self.input {
            settings.input_dir = absolute(input);
        }
        if let Some(output) = &self.output {
            settings.output_dir = absolute(output);
        }
    }
}

/// Generation overrides shared by `generate` and `run`.
#[derive(Args, Debug, Clone, Default)]
pub struct GenerationArgs {
    /// Stages to run, comma separated (keyword,question,answer,critique)
    #[arg(long, value_delimiter = ',')]
    pub stages: Vec<Stage>,

    /// Concurrent backend calls
    #[arg(short, long)]
    pub workers: Option<usize>,

    /// Inference backend (mock or remote)
    #[arg(long)]
    pub backend: Option<BackendMode>,

    /// Retries per input after the first attempt
    #[arg(long)]
    pub max_retries: Option<u32>,

    /// Write stage records in input order
    #[arg(long)]
    pub ordered: bool,
}

impl GenerationArgs {
    pub fn apply(&self, settings: &mut Settings) {
        let generation = &mut settings.generation;
        if !self.stages.is_empty() {
            generation.stages = self.stages.clone();
        }
        if let Some(workers) = self.workers {
            generation.worker_count = workers;
        }
        if let Some(max_retries) = self.max_retries {
            generation.max_retries = max_retries;
        }
        if self.ordered {
            generation.ordered_output = true;
        }
        if let Some(mode) = self.backend {
            settings.backend.mode = mode;
        }
    }
}

impl Cli {
    /// Apply command-line overrides on top of loaded settings.
    pub fn apply_overrides(&self, settings: &mut Settings) {
        if self.no_progress {
            settings.generation.show_progress = false;
        }
        match &self.command {
            Commands::Chunk { paths, .. } => paths.apply(settings),
            Commands::Generate { output, generation } => {
                if let Some(output) = output {
                    settings.output_dir = absolute(output);
                }
                generation.apply(settings);
            }
            Commands::Run {
                paths, generation, ..
            } => {
                paths.apply(settings);
                generation.apply(settings);
            }
            Commands::Status {
                output: Some(output),
                ..
            } => settings.output_dir = absolute(output),
            _ => {}
        }
    }
}

/// Command-line paths are relative to the working directory, not the workspace.
fn absolute(path: &Path) -> PathBuf {
    std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_run_flags() {
        let cli = Cli::try_parse_from([
            "quadchain",
            "run",
            "--input",
            "/data/in",
            "-o",
            "/data/out",
            "--stages",
            "keyword,question",
            "--workers",
            "16",
            "--backend",
            "remote",
            "--max-retries",
            "4",
            "--no-progress",
        ])
        .unwrap();

        let mut settings = Settings::default();
        cli.apply_overrides(&mut settings);
        assert_eq!(settings.input_dir, PathBuf::from("/data/in"));
        assert_eq!(settings.output_dir, PathBuf::from("/data/out"));
        assert_eq!(settings.generation.stages, vec![Stage::Keyword, Stage::Question]);
        assert_eq!(settings.generation.worker_count, 16);
        assert_eq!(settings.generation.max_retries, 4);
        assert_eq!(settings.backend.mode, BackendMode::Remote);
        assert!(!settings.generation.show_progress);
    }

    #[test]
    fn test_unknown_stage_rejected() {
        let result = Cli::try_parse_from(["quadchain", "generate", "--stages", "summary"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_defaults_untouched_without_flags() {
        let cli = Cli::try_parse_from(["quadchain", "generate"]).unwrap();
        let mut settings = Settings::default();
        cli.apply_overrides(&mut settings);
        assert_eq!(settings.generation.stages, Settings::default().generation.stages);
        assert!(settings.generation.show_progress);
    }
}
