//! Logging setup
//!
//! Human-readable output goes to stderr; everything at the active level is
//! also appended to a daily-rolling file under the data directory.

use anyhow::{Context, Result};
use once_cell::sync::OnceCell;
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Keeps the file writer flushing for the life of the process
static LOG_GUARD: OnceCell<WorkerGuard> = OnceCell::new();

/// Log file name prefix inside the log directory
pub const LOG_FILE_NAME: &str = "games-store.log";

/// Install the global subscriber.
///
/// `RUST_LOG` takes precedence; otherwise `games_store=info`, or
/// `games_store=debug` when `verbose` is set.
pub fn init(log_dir: &Path, verbose: bool) -> Result<()> {
    std::fs::create_dir_all(log_dir)
        .with_context(|| format!("Failed to create log directory {}", log_dir.display()))?;

    let file_appender = tracing_appender::rolling::daily(log_dir, LOG_FILE_NAME);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
    let _ = LOG_GUARD.set(guard);

    let default_directive = if verbose {
        "games_store=debug"
    } else {
        "games_store=info"
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false).compact())
        .with(
            fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_file(true)
                .with_line_number(true),
        )
        .try_init()
        .context("Failed to install tracing subscriber")?;

    Ok(())
}
