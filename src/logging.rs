/// Logging setup for the assembly pipeline.
///
/// Initializes tracing with console output plus an optional daily rolling
/// file appender, in both plain-text and JSON layouts.
use std::path::Path;

use tracing::{info, Level};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::LoggingConfig;
use crate::error::{AssembleError, AssembleResult};

pub fn init_logging(config: &LoggingConfig) -> AssembleResult<Option<WorkerGuard>> {
    let _log_level = parse_log_level(&config.level)?;

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("spoki_assemble={}", config.level)));

    let guard = if config.file_logging {
        let log_dir = Path::new(&config.log_dir);
        if !log_dir.exists() {
            std::fs::create_dir_all(log_dir)?;
        }

        let file_appender = tracing_appender::rolling::RollingFileAppender::builder()
            .rotation(tracing_appender::rolling::Rotation::DAILY)
            .filename_prefix("assemble")
            .filename_suffix("log")
            .max_log_files(config.max_files)
            .build(log_dir)
            .map_err(|e| AssembleError::output(format!("failed to create file appender: {e}")))?;

        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

        if config.format == "json" {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().json().with_target(true).with_writer(std::io::stdout))
                .with(fmt::layer().json().with_target(true).with_writer(non_blocking))
                .init();
        } else {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().with_target(true).with_writer(std::io::stdout))
                .with(fmt::layer().with_target(true).with_writer(non_blocking))
                .init();
        }

        Some(guard)
    } else if config.format == "json" {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().json().with_target(true))
            .init();
        None
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().with_target(true))
            .init();
        None
    };

    info!(
        level = %config.level,
        format = %config.format,
        file_logging = config.file_logging,
        "logging initialized"
    );

    Ok(guard)
}

fn parse_log_level(level: &str) -> AssembleResult<Level> {
    match level.to_lowercase().as_str() {
        "trace" => Ok(Level::TRACE),
        "debug" => Ok(Level::DEBUG),
        "info" => Ok(Level::INFO),
        "warn" => Ok(Level::WARN),
        "error" => Ok(Level::ERROR),
        _ => Err(AssembleError::validation_error(
            "log_level",
            format!("invalid log level: {level}"),
        )),
    }
}

/// Logs a matcher-pipeline batch transition: batch id, bucket sizes touched,
/// and how many events were emitted.
#[macro_export]
macro_rules! log_batch_progress {
    ($batch_id:expr, $emitted:expr, $pending:expr) => {
        tracing::info!(
            batch_id = $batch_id,
            emitted = $emitted,
            pending = $pending,
            "batch processed"
        );
    };
}

pub struct PerformanceLogger {
    start_time: std::time::Instant,
    operation: String,
}

impl PerformanceLogger {
    pub fn new(operation: String) -> Self {
        Self {
            start_time: std::time::Instant::now(),
            operation,
        }
    }

    pub fn log_duration(self) {
        let duration = self.start_time.elapsed();
        tracing::debug!(
            operation = %self.operation,
            duration_ms = duration.as_millis(),
            "operation completed"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_log_level_accepts_known_levels() {
        assert!(matches!(parse_log_level("info"), Ok(Level::INFO)));
        assert!(matches!(parse_log_level("DEBUG"), Ok(Level::DEBUG)));
        assert!(parse_log_level("bogus").is_err());
    }

    #[test]
    fn performance_logger_logs_on_drop() {
        let logger = PerformanceLogger::new("test_op".to_string());
        std::thread::sleep(std::time::Duration::from_millis(5));
        logger.log_duration();
    }
}
