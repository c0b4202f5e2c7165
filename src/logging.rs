use std::path::Path;

use anyhow::Context;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

pub const LOG_FILE_PREFIX: &str = "couplefy.log";

/// Installs JSON logging on stderr, plus a daily-rotated file sink when `log_dir` is set.
///
/// Stdout is left to command output. The returned guard flushes the file sink
/// on drop and must be held for the life of the process. Calling this twice
/// is harmless; the second subscriber is simply not installed.
pub fn init(filter: &str, log_dir: Option<&Path>) -> anyhow::Result<Option<WorkerGuard>> {
    let _ = tracing_log::LogTracer::init();

    let stderr_layer = fmt::layer()
        .json()
        .with_target(true)
        .with_timer(UtcTime::rfc_3339())
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::new(filter));

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("create log directory {}", dir.display()))?;
            let appender = RollingFileAppender::new(Rotation::DAILY, dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .json()
                .with_target(true)
                .with_ansi(false)
                .with_timer(UtcTime::rfc_3339())
                .with_writer(writer)
                .with_filter(EnvFilter::new(filter));
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    let _ = tracing_subscriber::registry()
        .with(stderr_layer)
        .with(file_layer)
        .try_init();

    tracing::info!(
        target: "couplefy",
        event = "logging_ready",
        filter = %filter,
        file_sink = log_dir.is_some()
    );
    Ok(guard)
}

/// Invite codes are bearer secrets; logs only ever see the first two characters.
pub fn code_hint(code: &str) -> String {
    let head: String = code.chars().take(2).collect();
    format!("{head}…")
}
