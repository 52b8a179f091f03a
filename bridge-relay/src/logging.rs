//! Log setup: stderr plus daily-rotated files.

use crate::error::{BridgeError, Result};
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Log file name prefix inside the log directory.
pub const LOG_FILE: &str = "brbridge.log";

/// Filter from `RUST_LOG`, falling back to `level`, then to `info`.
pub fn log_filter(level: &str) -> EnvFilter {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return filter;
    }
    EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Install the global subscriber. With `log_dir`, lines are also written to
/// a daily-rotated file there; keep the returned guard alive until exit so
/// buffered lines are flushed.
pub fn init_logging(level: &str, log_dir: Option<&Path>) -> Result<Option<WorkerGuard>> {
    let stderr = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    let Some(log_dir) = log_dir else {
        tracing_subscriber::registry()
            .with(log_filter(level))
            .with(stderr)
            .try_init()
            .map_err(|e| BridgeError::Logging(e.to_string()))?;
        return Ok(None);
    };

    std::fs::create_dir_all(log_dir)?;
    let file_appender = tracing_appender::rolling::daily(log_dir, LOG_FILE);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::registry()
        .with(log_filter(level))
        .with(stderr)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false),
        )
        .try_init()
        .map_err(|e| BridgeError::Logging(e.to_string()))?;
    Ok(Some(guard))
}
