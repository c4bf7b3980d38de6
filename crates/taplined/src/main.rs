//! taplined — change-data-capture daemon
//!
//! `taplined <config.json>` subscribes to a MySQL/MariaDB binlog or a
//! PostgreSQL logical replication slot, decodes the stream into row events
//! and fans them out to the configured sinks.
//!
//! Exit codes: 0 after a clean shutdown on SIGINT/SIGTERM, 1 on a startup
//! failure or an unrecoverable stream error.

use std::fs::File;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing::error;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::Layer;

use crate::config::LoggingConfig;

mod config;
mod run;

#[derive(Parser)]
#[command(name = "taplined", about = "Replicates database changes to configured sinks")]
struct Args {
    /// Path to the JSON configuration file.
    config: PathBuf,
}

fn main() -> ExitCode {
    let args = Args::parse();

    let app_config = match config::load_config(&args.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("taplined: {e}");
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = init_tracing(&app_config.logging) {
        eprintln!("taplined: cannot initialize logging: {e}");
        return ExitCode::FAILURE;
    }

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(e) => {
            error!(error = %e, "cannot build runtime");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run::run(app_config)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "pipeline failed");
            ExitCode::FAILURE
        }
    }
}

/// Stdout layer at the configured stdout level, plus an optional file
/// layer at the file level.
fn init_tracing(logging: &LoggingConfig) -> Result<(), String> {
    let stdout_level = parse_level(logging.stdout_level())?;
    let stdout_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stdout)
        .with_filter(stdout_level);

    let file_layer = match &logging.log_file {
        Some(path) if !path.is_empty() => {
            let file = File::options()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|e| format!("cannot open log file {path}: {e}"))?;
            let level = parse_level(logging.file_level())?;
            Some(
                tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .with_writer(Arc::new(file))
                    .with_filter(level),
            )
        }
        _ => None,
    };

    tracing_subscriber::registry()
        .with(stdout_layer)
        .with(file_layer)
        .init();
    Ok(())
}

fn parse_level(text: &str) -> Result<LevelFilter, String> {
    text.to_ascii_lowercase()
        .parse::<LevelFilter>()
        .map_err(|_| format!("unknown log level: {text}"))
}
