//! Tracing subscriber setup: human-readable stderr plus an optional rolling file log.

use crate::config::LoggingConfig;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// File name prefix for the daily-rolling log.
pub const LOG_FILE_PREFIX: &str = "surveyor.log";

fn stderr_filter(config: &LoggingConfig) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level))
}

/// Install the global subscriber.
///
/// The returned guard flushes the non-blocking file writer on drop and must
/// be held for as long as logging is needed. Installing twice is a no-op.
pub fn init_tracing(config: &LoggingConfig) -> Option<WorkerGuard> {
    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_filter(stderr_filter(config))
        .boxed();

    let Some(dir) = config.dir.as_ref() else {
        let _ = tracing_subscriber::registry().with(stderr_layer).try_init();
        return None;
    };

    if let Err(e) = std::fs::create_dir_all(dir) {
        let _ = tracing_subscriber::registry().with(stderr_layer).try_init();
        tracing::warn!(dir = %dir.display(), error = %e, "Log directory unavailable, logging to stderr only");
        return None;
    }

    let file_appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
    let file_layer = if config.json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_writer(non_blocking)
            .with_filter(EnvFilter::new("debug"))
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_ansi(false)
            .with_writer(non_blocking)
            .with_filter(EnvFilter::new("debug"))
            .boxed()
    };

    let _ = tracing_subscriber::registry()
        .with(stderr_layer)
        .with(file_layer)
        .try_init();
    Some(guard)
}
