//! Logging bootstrap: compact console output on stderr plus a full log
//! file per run.

use std::io::IsTerminal;
use std::path::Path;

use once_cell::sync::OnceCell;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

// Keeps the non-blocking writer alive for the lifetime of the process.
static WORKER_GUARD: OnceCell<WorkerGuard> = OnceCell::new();

pub const DEFAULT_CONSOLE_LEVEL: LevelFilter = LevelFilter::INFO;
pub const DEFAULT_FILE_LEVEL: LevelFilter = LevelFilter::DEBUG;

/// Initializes the global subscriber. Call once, before any work.
pub fn init_logging(console_level: LevelFilter, log_file: &Path, file_level: LevelFilter) {
    let console_filter = EnvFilter::builder()
        .with_default_directive(console_level.into())
        .from_env_lossy();
    let file_filter = EnvFilter::builder()
        .with_default_directive(file_level.into())
        .from_env_lossy();

    let appender = tracing_appender::rolling::never(
        log_file.parent().unwrap_or_else(|| Path::new(".")),
        log_file.file_name().unwrap_or_else(|| "recode.log".as_ref()),
    );
    let (non_blocking, guard) = tracing_appender::non_blocking(appender);
    WORKER_GUARD
        .set(guard)
        .expect("logging initialized twice");

    let subscriber = tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_ansi(false)
                .with_target(true)
                .with_writer(non_blocking)
                .with_filter(file_filter),
        )
        .with(
            fmt::layer()
                .compact()
                .with_ansi(std::io::stderr().is_terminal())
                .with_target(false)
                .without_time()
                .with_writer(std::io::stderr)
                .with_filter(console_filter),
        );

    tracing::subscriber::set_global_default(subscriber)
        .expect("failed to set the global subscriber");

    tracing::debug!("logging initialized, log file: {}", log_file.display());
}
