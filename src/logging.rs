use anyhow::Result;
use std::path::Path;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::{non_blocking, rolling};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer, Registry};

use crate::config::LoggingConfig;

/// Initialize structured logging.
///
/// Console output goes to stderr, as text or JSON per `config.format`. When a
/// file path is configured, a daily-rolling JSON file is written next to it.
/// Keep the returned guard alive for as long as file logging should flush.
pub fn init_logging(config: &LoggingConfig) -> Result<Option<WorkerGuard>> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .map_err(|e| anyhow::anyhow!("Failed to create log filter: {}", e))?;

    let console_layer = if config.format == "json" {
        tracing_subscriber::fmt::layer().with_writer(std::io::stderr).with_target(true).json().boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_ansi(true)
            .with_target(true)
            .with_thread_names(true)
            .boxed()
    };

    let registry = Registry::default().with(env_filter).with(console_layer);

    let guard = if let Some(log_path) = config.file_path.as_deref() {
        let directory = log_path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or_else(|| Path::new("."));
        let file_name = log_path.file_name().map_or_else(|| "journey.log".into(), |n| n.to_string_lossy());
        let file_appender = rolling::daily(directory, file_name.as_ref());
        let (non_blocking_appender, guard) = non_blocking(file_appender);

        let file_layer = tracing_subscriber::fmt::layer()
            .with_writer(non_blocking_appender)
            .with_ansi(false)
            .with_target(true)
            .with_thread_ids(true)
            .json();

        registry.with(file_layer).try_init()?;
        Some(guard)
    } else {
        registry.try_init()?;
        None
    };

    info!(level = %config.level, format = %config.format, "Logging system initialized");
    Ok(guard)
}

/// Performance timing utilities
#[derive(Debug)]
pub struct OperationTimer {
    operation: String,
    start: std::time::Instant,
    finished: bool,
}

impl OperationTimer {
    #[must_use]
    pub fn new(operation: &str) -> Self {
        Self { operation: operation.to_string(), start: std::time::Instant::now(), finished: false }
    }

    /// Log and return the elapsed time.
    pub fn finish(mut self) -> std::time::Duration {
        self.finished = true;
        let elapsed = self.start.elapsed();
        tracing::info!(operation = %self.operation, duration_ms = elapsed.as_millis() as u64, "Operation completed");
        elapsed
    }
}

impl Drop for OperationTimer {
    fn drop(&mut self) {
        if !self.finished && !std::thread::panicking() {
            tracing::debug!(
                operation = %self.operation,
                duration_ms = self.start.elapsed().as_millis() as u64,
                "Operation finished"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timer_reports_elapsed() {
        let timer = OperationTimer::new("tick");
        std::thread::sleep(std::time::Duration::from_millis(2));
        assert!(timer.finish() >= std::time::Duration::from_millis(2));
    }
}
