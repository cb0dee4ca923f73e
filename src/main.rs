use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;

use quadchain::cli::commands;
use quadchain::cli::{Cli, Commands};
use quadchain::config::Settings;
use quadchain::io::ExitCode;
use quadchain::logging;

#[tokio::main]
async fn main() -> std::process::ExitCode {
    let cli = Cli::parse();

    if let Commands::Init { force } = cli.command {
        let root = match init_root() {
            Ok(root) => root,
            Err(e) => {
                eprintln!("Error: {e:#}");
                return ExitCode::GeneralError.into();
            }
        };
        return commands::init::run_init(&root, force).into();
    }

    let loaded = match &cli.config {
        Some(path) => Settings::load_from(path),
        None => Settings::load(),
    };
    let mut settings = match loaded {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("Configuration error: {e}");
            return ExitCode::ConfigError.into();
        }
    };
    cli.apply_overrides(&mut settings);
    if let Err(e) = settings.validate() {
        eprintln!("Configuration error: {e}");
        return ExitCode::ConfigError.into();
    }

    logging::init_with_config(&settings.logging);
    tracing::debug!(target: "cli", "effective output directory {}", settings.output_path().display());

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!(target: "cli", "interrupt received, finishing in-flight calls");
            on_signal.cancel();
        }
    });

    let code = match cli.command {
        Commands::Init { .. } => ExitCode::Success,
        Commands::Config => commands::init::run_config(&settings),
        Commands::Chunk { force, .. } => commands::chunk::run(settings, force),
        Commands::Generate { .. } => commands::generate::run(settings, cancel).await,
        Commands::Run { force, .. } => commands::run::run(settings, force, cancel).await,
        Commands::Status { json, .. } => commands::status::run(&settings, json),
    };
    code.into()
}

/// Directory `init` writes `.quadchain/` into.
fn init_root() -> anyhow::Result<PathBuf> {
    std::env::current_dir().context("cannot determine the current directory")
}
