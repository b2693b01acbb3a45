/// Error handling for the event assembly pipeline.
///
/// Mirrors the error taxonomy in the design: transient stream gaps and line
/// corruption are recoverable and logged, invariant violations are not
/// wrapped in a `Result` at all (they panic, since they encode programmer
/// bugs rather than bad input).
use thiserror::Error;
use tracing::{error, warn};

/// Main error type for the assembly pipeline.
#[derive(Error, Debug)]
pub enum AssembleError {
    /// Configuration errors.
    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),

    /// I/O errors.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization errors.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A line could not be parsed at all; the offending line is dropped.
    #[error("line corruption in {source_file}: {reason}")]
    LineCorruption { source_file: String, reason: String },

    /// A record was missing a required field or had the wrong shape.
    #[error("schema mismatch in {source_file}: {reason}")]
    SchemaMismatch { source_file: String, reason: String },

    /// A record's batch id fell outside the live window.
    #[error("ordering anomaly: {reason}")]
    OrderingAnomaly { reason: String },

    /// A value failed basic validation (CLI args, config).
    #[error("validation error: {field} - {reason}")]
    Validation { field: String, reason: String },

    /// An output file could not be written.
    #[error("output error: {message}")]
    Output { message: String },
}

/// Result type alias for assembly pipeline operations.
pub type AssembleResult<T> = Result<T, AssembleError>;

impl AssembleError {
    pub fn line_corruption<S1: Into<String>, S2: Into<String>>(
        source_file: S1,
        reason: S2,
    ) -> Self {
        AssembleError::LineCorruption {
            source_file: source_file.into(),
            reason: reason.into(),
        }
    }

    pub fn schema_mismatch<S1: Into<String>, S2: Into<String>>(
        source_file: S1,
        reason: S2,
    ) -> Self {
        AssembleError::SchemaMismatch {
            source_file: source_file.into(),
            reason: reason.into(),
        }
    }

    pub fn ordering_anomaly<S: Into<String>>(reason: S) -> Self {
        AssembleError::OrderingAnomaly {
            reason: reason.into(),
        }
    }

    pub fn validation_error<S1: Into<String>, S2: Into<String>>(field: S1, reason: S2) -> Self {
        AssembleError::Validation {
            field: field.into(),
            reason: reason.into(),
        }
    }

    pub fn output<S: Into<String>>(message: S) -> Self {
        AssembleError::Output {
            message: message.into(),
        }
    }

    /// Log this error at the appropriate level, per the taxonomy: schema and
    /// line issues are warnings (locally recovered), everything else is an
    /// error.
    pub fn log(&self) {
        match self {
            AssembleError::LineCorruption { .. } | AssembleError::SchemaMismatch { .. } => {
                warn!("{}", self);
            }
            _ => error!("{}", self),
        }
    }

    /// Whether this error reflects a transient condition a retry could fix.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AssembleError::LineCorruption { .. } | AssembleError::Io(_)
        )
    }

    /// Classifies this error for logging/alerting, following
    /// `nrmap::error::ScanError`'s `severity()`.
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            AssembleError::Config(_) => ErrorSeverity::Critical,
            AssembleError::Io(_) | AssembleError::Output { .. } => ErrorSeverity::High,
            AssembleError::Json(_)
            | AssembleError::OrderingAnomaly { .. }
            | AssembleError::Validation { .. } => ErrorSeverity::Medium,
            AssembleError::LineCorruption { .. } | AssembleError::SchemaMismatch { .. } => {
                ErrorSeverity::Low
            }
        }
    }
}

/// Error severity levels, ordered low to critical.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorSeverity {
    Low,
    Medium,
    High,
    Critical,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_mismatch_carries_context() {
        let err = AssembleError::schema_mismatch("events.csv", "missing column 'ttl'");
        assert!(matches!(err, AssembleError::SchemaMismatch { .. }));
        assert!(err.to_string().contains("events.csv"));
    }

    #[test]
    fn line_corruption_is_retryable() {
        let err = AssembleError::line_corruption("events.json", "unterminated string");
        assert!(err.is_retryable());
    }

    #[test]
    fn validation_error_is_not_retryable() {
        let err = AssembleError::validation_error("probe_timeout", "must be positive");
        assert!(!err.is_retryable());
    }

    #[test]
    fn validation_error_severity_is_medium() {
        let err = AssembleError::validation_error("probe_timeout", "must be positive");
        assert_eq!(err.severity(), ErrorSeverity::Medium);
    }

    #[test]
    fn line_corruption_severity_is_low() {
        let err = AssembleError::line_corruption("events.json", "unterminated string");
        assert_eq!(err.severity(), ErrorSeverity::Low);
    }
}
