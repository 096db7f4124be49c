//! Shared tracing setup for the bot binary (feature `tracing-init`).
//!
//! Installs an env-filtered fmt layer on stderr plus a daily-rolling file
//! appender under `<data_dir>/<app_name>/logs/`. Returns a guard that must be
//! held for the lifetime of the process so buffered log lines flush on exit.

use std::path::PathBuf;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Keeps the non-blocking appender worker alive. Drop flushes pending lines.
pub struct TracingGuard {
    _worker: WorkerGuard,
}

fn log_dir(app_name: &str) -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(app_name)
        .join("logs")
}

/// Initialises the global subscriber: `RUST_LOG` filter (default `info`),
/// human-readable stderr output, JSON-free daily file output.
///
/// Safe to call once per process; a second call is a no-op (the global
/// subscriber can only be set once).
pub fn init_tracing(app_name: &str) -> std::io::Result<TracingGuard> {
    let dir = log_dir(app_name);
    std::fs::create_dir_all(&dir)?;

    let file_appender = tracing_appender::rolling::daily(&dir, format!("{app_name}.log"));
    let (file_writer, worker) = tracing_appender::non_blocking(file_appender);

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_filter(filter),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(file_writer)
                .with_ansi(false)
                .with_filter(
                    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
                ),
        )
        .try_init();

    Ok(TracingGuard { _worker: worker })
}
