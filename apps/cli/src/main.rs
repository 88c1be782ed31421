//! streamup command-line entry point.

mod app;
mod config;
mod tui;

use std::fs::OpenOptions;
use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Mutex;

use anyhow::Context;
use clap::Parser;
use streamup_protocol::{FailureKind, UploadOutcome};
use tracing_subscriber::EnvFilter;

use crate::config::{Args, Config};

/// Exit status for a cancelled upload (128 + SIGINT).
const EXIT_CANCELLED: u8 = 130;

fn main() -> ExitCode {
    let args = Args::parse();
    match run(args) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("streamup: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> anyhow::Result<ExitCode> {
    let config_path = args.config.clone().unwrap_or_else(config::config_path);
    let tui = !args.no_tui && std::io::stdout().is_terminal();

    // Initialize structured logging.
    init_logging(tui, &config_path)?;
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "starting streamup");

    // Load and resolve configuration before any network activity.
    let mut config = Config::load_from(&config_path)?;
    let settings = config::resolve(&args, &config)?;
    if let Err(e) = config::remember_account_id(&mut config, &settings, &config_path) {
        tracing::warn!("could not save account id: {e}");
    }

    let rt = tokio::runtime::Runtime::new()?;
    let finished = rt.block_on(app::run(settings, tui))?;

    if args.json {
        println!("{}", serde_json::to_string(&finished.outcome)?);
        eprintln!("{}", finished.summary);
    } else {
        println!("{}", finished.summary);
    }

    Ok(ExitCode::from(exit_status(&finished.outcome)))
}

/// Logs go to stderr, or to a file next to the config while the terminal
/// display owns the screen.
fn init_logging(tui: bool, config_path: &Path) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    if tui {
        let path = log_path(config_path);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("failed to open log file {}", path.display()))?;
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_ansi(false)
            .with_writer(Mutex::new(file))
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }
    Ok(())
}

fn log_path(config_path: &Path) -> PathBuf {
    config_path
        .parent()
        .unwrap_or_else(|| Path::new("."))
        .join("streamup.log")
}

fn exit_status(outcome: &UploadOutcome) -> u8 {
    if outcome.completed {
        return 0;
    }
    match &outcome.error {
        Some(e) if e.kind == FailureKind::Cancelled => EXIT_CANCELLED,
        _ => 1,
    }
}
