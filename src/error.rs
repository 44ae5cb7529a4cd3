//! Unified error handling for switchyard
//!
//! Every error surfaced by the routing core carries a stable categorical
//! [`ErrorCode`] so callers can tell "retry is safe" apart from "the outcome of
//! the in-flight operation is unknown".

use std::fmt;
use thiserror::Error;

pub use crate::config::ConfigError;

/// Main error type for switchyard operations
#[derive(Debug, Error)]
pub enum SwitchyardError {
    /// A connection switch was requested while a transaction is open
    #[error("Transaction safety violation: {message}")]
    TransactionSafetyViolation { message: String },

    /// No candidate host for the required role could be connected
    #[error("Connection unavailable: {message}")]
    ConnectionUnavailable { message: String },

    /// The physical writer changed underneath the logical connection
    #[error("Failover occurred: {message}")]
    FailoverOccurred { message: String, in_transaction: bool },

    /// Disposing a cached resource failed
    #[error("Resource disposal failed: {message}")]
    ResourceDisposal { message: String },

    /// A pooled connection kept failing its liveness check
    #[error("Connection validation failed after {attempts} attempts: {source}")]
    ValidationRetryExhausted {
        attempts: usize,
        #[source]
        source: Box<SwitchyardError>,
    },

    /// Error reported by the underlying database driver
    #[error("Driver error: {message}")]
    Driver {
        message: String,
        sql_state: Option<String>,
    },

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Timeout errors
    #[error("Operation timed out: {operation}")]
    Timeout { operation: String },

    /// Internal errors (should not happen in normal operation)
    #[error("Internal error: {message}")]
    Internal { message: String },
}

/// Result type alias for switchyard operations
pub type SwitchyardResult<T> = Result<T, SwitchyardError>;

/// Stable categorical error codes, SQLSTATE-style
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorCode {
    /// 25001: active SQL transaction
    ActiveTransaction,
    /// 08001: unable to establish a connection
    UnableToConnect,
    /// 08S02: failover completed, statement must be re-issued
    FailoverSuccess,
    /// 08007: failover completed during a transaction, outcome unknown
    TransactionResolutionUnknown,
    /// 08006: connection failure
    ConnectionFailure,
    /// HYT00: timeout expired
    Timeout,
    /// HY000: general error
    General,
    /// Driver supplied state
    Driver(String),
}

impl ErrorCode {
    pub fn as_str(&self) -> &str {
        match self {
            ErrorCode::ActiveTransaction => "25001",
            ErrorCode::UnableToConnect => "08001",
            ErrorCode::FailoverSuccess => "08S02",
            ErrorCode::TransactionResolutionUnknown => "08007",
            ErrorCode::ConnectionFailure => "08006",
            ErrorCode::Timeout => "HYT00",
            ErrorCode::General => "HY000",
            ErrorCode::Driver(state) => state,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Outcome class of an error, matched on by plugins instead of subtype checks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Nothing has been executed; the caller may retry
    Recoverable,
    /// The connection was repaired but the triggering operation failed
    FailoverOccurred,
    /// Usage or internal error; retrying will not help
    Fatal,
}

/// Convenience methods for creating specific error types
impl SwitchyardError {
    pub fn transaction_safety<S: Into<String>>(message: S) -> Self {
        SwitchyardError::TransactionSafetyViolation {
            message: message.into(),
        }
    }

    pub fn connection_unavailable<S: Into<String>>(message: S) -> Self {
        SwitchyardError::ConnectionUnavailable {
            message: message.into(),
        }
    }

    pub fn failover<S: Into<String>>(message: S, in_transaction: bool) -> Self {
        SwitchyardError::FailoverOccurred {
            message: message.into(),
            in_transaction,
        }
    }

    pub fn disposal<S: Into<String>>(message: S) -> Self {
        SwitchyardError::ResourceDisposal {
            message: message.into(),
        }
    }

    pub fn driver<S: Into<String>>(message: S, sql_state: Option<&str>) -> Self {
        SwitchyardError::Driver {
            message: message.into(),
            sql_state: sql_state.map(str::to_string),
        }
    }

    pub fn timeout<S: Into<String>>(operation: S) -> Self {
        SwitchyardError::Timeout {
            operation: operation.into(),
        }
    }

    pub fn internal<S: Into<String>>(message: S) -> Self {
        SwitchyardError::Internal {
            message: message.into(),
        }
    }

    /// Stable code exposed to calling code
    pub fn code(&self) -> ErrorCode {
        match self {
            SwitchyardError::TransactionSafetyViolation { .. } => ErrorCode::ActiveTransaction,
            SwitchyardError::ConnectionUnavailable { .. } => ErrorCode::UnableToConnect,
            SwitchyardError::FailoverOccurred {
                in_transaction: true,
                ..
            } => ErrorCode::TransactionResolutionUnknown,
            SwitchyardError::FailoverOccurred { .. } => ErrorCode::FailoverSuccess,
            SwitchyardError::ValidationRetryExhausted { .. } => ErrorCode::ConnectionFailure,
            SwitchyardError::Timeout { .. } => ErrorCode::Timeout,
            SwitchyardError::Driver {
                sql_state: Some(state),
                ..
            } => ErrorCode::Driver(state.clone()),
            _ => ErrorCode::General,
        }
    }

    pub fn class(&self) -> ErrorClass {
        match self {
            SwitchyardError::FailoverOccurred { .. } => ErrorClass::FailoverOccurred,
            SwitchyardError::ConnectionUnavailable { .. }
            | SwitchyardError::ValidationRetryExhausted { .. }
            | SwitchyardError::Timeout { .. } => ErrorClass::Recoverable,
            SwitchyardError::Driver { sql_state, .. } => match sql_state.as_deref() {
                // Class 08 is connection exception
                Some(state) if state.starts_with("08") => ErrorClass::Recoverable,
                _ => ErrorClass::Fatal,
            },
            _ => ErrorClass::Fatal,
        }
    }

    pub fn is_failover(&self) -> bool {
        self.class() == ErrorClass::FailoverOccurred
    }

    /// Check if this error is recoverable (can retry)
    pub fn is_retry_safe(&self) -> bool {
        self.class() == ErrorClass::Recoverable
    }

    /// Get error severity level
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            SwitchyardError::Config(_) => ErrorSeverity::Critical,
            SwitchyardError::Internal { .. } => ErrorSeverity::Critical,
            SwitchyardError::TransactionSafetyViolation { .. } => ErrorSeverity::Error,
            SwitchyardError::ConnectionUnavailable { .. } => ErrorSeverity::Warning,
            SwitchyardError::FailoverOccurred { .. } => ErrorSeverity::Warning,
            SwitchyardError::ResourceDisposal { .. } => ErrorSeverity::Info,
            SwitchyardError::Timeout { .. } => ErrorSeverity::Warning,
            _ => ErrorSeverity::Error,
        }
    }
}

/// Error severity levels for logging and monitoring
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSeverity {
    /// Critical errors that require immediate attention
    Critical,
    /// Errors that affect functionality but don't crash the system
    Error,
    /// Warnings about potential issues
    Warning,
    /// Informational messages about recoverable issues
    Info,
}

impl fmt::Display for ErrorSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorSeverity::Critical => write!(f, "CRITICAL"),
            ErrorSeverity::Error => write!(f, "ERROR"),
            ErrorSeverity::Warning => write!(f, "WARNING"),
            ErrorSeverity::Info => write!(f, "INFO"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let error = SwitchyardError::connection_unavailable("writer down");
        assert!(matches!(error, SwitchyardError::ConnectionUnavailable { .. }));
        assert_eq!(error.to_string(), "Connection unavailable: writer down");
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(
            SwitchyardError::transaction_safety("x").code().as_str(),
            "25001"
        );
        assert_eq!(
            SwitchyardError::connection_unavailable("x").code().as_str(),
            "08001"
        );
        assert_eq!(SwitchyardError::failover("x", false).code().as_str(), "08S02");
        assert_eq!(SwitchyardError::failover("x", true).code().as_str(), "08007");
        assert_eq!(
            SwitchyardError::driver("x", Some("40001")).code(),
            ErrorCode::Driver("40001".to_string())
        );
        assert_eq!(SwitchyardError::driver("x", None).code(), ErrorCode::General);
    }

    #[test]
    fn test_error_class() {
        assert!(SwitchyardError::failover("x", false).is_failover());
        assert!(SwitchyardError::connection_unavailable("x").is_retry_safe());
        assert!(!SwitchyardError::transaction_safety("x").is_retry_safe());
        assert!(SwitchyardError::driver("x", Some("08006")).is_retry_safe());
        assert_eq!(
            SwitchyardError::driver("x", Some("42000")).class(),
            ErrorClass::Fatal
        );
    }

    #[test]
    fn test_validation_retry_exhausted_wraps_source() {
        let error = SwitchyardError::ValidationRetryExhausted {
            attempts: 10,
            source: Box::new(SwitchyardError::connection_unavailable("invalid")),
        };
        assert_eq!(error.code(), ErrorCode::ConnectionFailure);
        let source = std::error::Error::source(&error).map(|s| s.to_string());
        assert_eq!(source.as_deref(), Some("Connection unavailable: invalid"));
    }

    #[test]
    fn test_error_severity() {
        let config_error =
            SwitchyardError::Config(ConfigError::ValidationError("test".to_string()));
        assert_eq!(config_error.severity(), ErrorSeverity::Critical);
        assert_eq!(
            SwitchyardError::disposal("close failed").severity(),
            ErrorSeverity::Info
        );
        assert_eq!(ErrorSeverity::Warning.to_string(), "WARNING");
    }
}
