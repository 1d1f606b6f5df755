//! Logging initialization
//!
//! Console output through an `EnvFilter` (RUST_LOG wins over the passed
//! default), with an optional daily-rolling file layer. The non-blocking
//! writer guard is parked in a static so file logging survives for the
//! process lifetime.

use std::path::Path;

use anyhow::{anyhow, Result};
use once_cell::sync::OnceCell;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

static LOG_GUARD: OnceCell<WorkerGuard> = OnceCell::new();

/// Initialize console logging. Safe to call once per process.
pub fn init(default_filter: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true))
        .try_init()
        .map_err(|e| anyhow!("failed to initialize logging: {e}"))
}

/// Initialize console logging plus a daily-rolling log file in `log_dir`.
pub fn init_with_file(default_filter: &str, log_dir: &Path) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter));

    std::fs::create_dir_all(log_dir)?;
    let file_appender = tracing_appender::rolling::daily(log_dir, "case-crawler.log");
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);
    LOG_GUARD
        .set(guard)
        .map_err(|_| anyhow!("logging already initialized"))?;

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true))
        .with(fmt::layer().with_writer(file_writer).with_ansi(false))
        .try_init()
        .map_err(|e| anyhow!("failed to initialize logging: {e}"))
}
