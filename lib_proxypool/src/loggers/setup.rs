//! Installs the global `tracing` subscriber.

use std::path::Path;

use anyhow::Context;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::{non_blocking, rolling};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Builds the filter: `RUST_LOG` wins, then `log_level`, then `info`.
pub fn build_filter(log_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Console layer plus a JSON layer into `<log_dir>/<app_name>.<date>`.
///
/// Keep the returned guard alive for the life of the process; dropping it stops the
/// background writer and flushes what is buffered.
pub fn setup_logging(log_dir: &Path, log_level: &str, app_name: &str) -> anyhow::Result<WorkerGuard> {
    std::fs::create_dir_all(log_dir)
        .with_context(|| format!("cannot create log directory {}", log_dir.display()))?;

    let file_appender = rolling::daily(log_dir, app_name);
    let (writer, guard) = non_blocking(file_appender);

    let console_layer = fmt::layer().with_target(true).with_ansi(true);
    let file_layer = fmt::layer().with_ansi(false).with_writer(writer).json();

    tracing_subscriber::registry()
        .with(build_filter(log_level))
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .context("global tracing subscriber already installed")?;

    info!(log_dir = %log_dir.display(), level = log_level, "logging initialized");
    Ok(guard)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bad_level_falls_back() {
        // An unparsable directive must not panic.
        let _ = build_filter("not==valid");
    }

    #[test]
    fn creates_log_directory() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("nested/logs");
        let _guard = setup_logging(&nested, "debug", "proxypool_test");
        assert!(nested.is_dir());
    }
}
