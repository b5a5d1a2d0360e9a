//! `fslogger` — наблюдение за папками из командной строки.
//!
//! Запускает одну сессию и останавливает её по Ctrl-C.

use std::path::PathBuf;
use std::sync::mpsc;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser, ValueHint};
use log::info;

use fslogger_rust::config::{self, TimestampFormat, DEFAULT_LATENCY, DEFAULT_TIMESTAMP_FORMAT};
use fslogger_rust::logging::init_logging;
use fslogger_rust::{Watcher, WatcherOptions, WatcherSettings, WriteMode};

/// Log filesystem changes together with the process and user that made them.
#[derive(Debug, Parser)]
#[command(name = "fslogger", version, about, long_about = None)]
struct Cli {
    /// Folders to watch
    #[arg(required = true, value_hint = ValueHint::DirPath)]
    folders: Vec<PathBuf>,

    /// Resume cursor (event id printed when a previous session stopped)
    #[arg(long)]
    since_when: Option<u64>,

    /// Batching window in seconds
    #[arg(long, default_value_t = DEFAULT_LATENCY)]
    latency: f64,

    /// Destination log file (created if absent, appended otherwise)
    #[arg(long, env = "FSLOGGER_LOG", value_hint = ValueHint::FilePath)]
    log_path: Option<PathBuf>,

    /// Watch only the folders themselves, not their subfolders
    #[arg(long, action = ArgAction::SetTrue)]
    dont_check_subfolders: bool,

    /// Skip process/user attribution entirely
    #[arg(long, action = ArgAction::SetTrue)]
    dont_search_pid_user: bool,

    /// Flush every record before handling the next event
    #[arg(long, action = ArgAction::SetTrue)]
    sync_writes: bool,

    /// strftime pattern for event timestamps (no spaces)
    #[arg(long, default_value = DEFAULT_TIMESTAMP_FORMAT)]
    timestamp_format: String,
}

fn main() -> Result<()> {
    init_logging();
    let cli = Cli::parse();

    let log_path = match cli.log_path {
        Some(path) => path,
        None => config::default_log_path().context("cannot determine default log location")?,
    };

    let options = WatcherOptions {
        folders: cli.folders,
        since_when: cli.since_when,
        latency: cli.latency,
        log_path: log_path.clone(),
        dont_check_subfolders: cli.dont_check_subfolders,
        dont_search_pid_user: cli.dont_search_pid_user,
        write_mode: if cli.sync_writes {
            WriteMode::Sync
        } else {
            WriteMode::Async
        },
        timestamp_format: TimestampFormat::new(cli.timestamp_format)?,
    };

    let settings = WatcherSettings::open(options)
        .with_context(|| format!("cannot open log file {}", log_path.display()))?;

    let mut watcher = Watcher::new();
    watcher.start(settings).context("failed to start watcher")?;
    info!("Logging to {} (Ctrl-C to stop)", log_path.display());

    let (stop_tx, stop_rx) = mpsc::channel::<()>();
    ctrlc::set_handler(move || {
        let _ = stop_tx.send(());
    })
    .context("failed to install Ctrl-C handler")?;

    let _ = stop_rx.recv();
    watcher.stop()?;
    info!("Resume with --since-when {}", watcher.last_event_id());
    Ok(())
}
