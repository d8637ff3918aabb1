//! Error types for the multi-source access layer.
//!
//! This module defines all error types using `thiserror` for ergonomic error handling.
//! Variants carry enough context (data source name, database index, suggestion) for
//! callers to tell configuration mistakes apart from backend failures.

use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum KvError {
    #[error("Invalid configuration: {message}")]
    Configuration { message: String },

    #[error("Connection failed: {message}")]
    Connection { message: String, suggestion: String },

    #[error("Authentication failed: {message}")]
    Authentication { message: String },

    #[error("Data source '{name}' not found: {hint}")]
    DataSourceNotFound { name: String, hint: String },

    #[error("Unsupported operation: {operation} - {reason}")]
    UnsupportedOperation { operation: String, reason: String },

    #[error("Data source '{name}' is already registered")]
    DuplicateRegistration { name: String },

    #[error("Command failed: {message}")]
    Command { message: String },

    #[error("Timeout: {operation}{}", describe_elapsed(.elapsed))]
    Timeout {
        operation: String,
        /// Time spent before giving up, when the caller measured it.
        elapsed: Option<Duration>,
    },

    #[error("Database scope error: {message}")]
    Scope { message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl KvError {
    /// Create a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create a connection error with a helpful suggestion.
    pub fn connection(message: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
            suggestion: suggestion.into(),
        }
    }

    /// Create an authentication error.
    pub fn authentication(message: impl Into<String>) -> Self {
        Self::Authentication {
            message: message.into(),
        }
    }

    /// Create a data source not found error.
    pub fn data_source_not_found(name: impl Into<String>, hint: impl Into<String>) -> Self {
        Self::DataSourceNotFound {
            name: name.into(),
            hint: hint.into(),
        }
    }

    /// Create an unsupported operation error.
    pub fn unsupported(operation: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::UnsupportedOperation {
            operation: operation.into(),
            reason: reason.into(),
        }
    }

    /// Create a duplicate registration error.
    pub fn duplicate_registration(name: impl Into<String>) -> Self {
        Self::DuplicateRegistration { name: name.into() }
    }

    /// Create a command error.
    pub fn command(message: impl Into<String>) -> Self {
        Self::Command {
            message: message.into(),
        }
    }

    /// Create a timeout error for an operation that gave up after `elapsed`.
    pub fn timeout(operation: impl Into<String>, elapsed: Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            elapsed: Some(elapsed),
        }
    }

    /// Convert a pool checkout failure, recording how long the checkout waited.
    pub fn pool_checkout(err: deadpool_redis::PoolError, waited: Duration) -> Self {
        match err {
            deadpool_redis::PoolError::Timeout(kind) => {
                KvError::timeout(format!("connection pool {:?}", kind), waited)
            }
            other => KvError::from(other),
        }
    }

    /// Create a scope error.
    pub fn scope(message: impl Into<String>) -> Self {
        Self::Scope {
            message: message.into(),
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Get the suggestion for this error, if available.
    pub fn suggestion(&self) -> Option<&str> {
        match self {
            Self::Connection { suggestion, .. } => Some(suggestion),
            Self::Authentication { .. } => {
                Some("Verify the username and password configured for this data source")
            }
            Self::DataSourceNotFound { hint, .. } => Some(hint),
            Self::DuplicateRegistration { .. } => {
                Some("Choose a different data source name or use the existing one")
            }
            _ => None,
        }
    }

    /// Check if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Connection { .. } | Self::Timeout { .. })
    }
}

/// Convert redis client errors to KvError.
impl From<redis::RedisError> for KvError {
    fn from(err: redis::RedisError) -> Self {
        if err.is_timeout() {
            return KvError::Timeout {
                operation: "redis command".to_string(),
                elapsed: None,
            };
        }
        if err.is_connection_refusal() || err.is_connection_dropped() || err.is_io_error() {
            return KvError::connection(
                format!("I/O error: {}", err),
                "Check network connectivity and that the Redis server is running",
            );
        }
        match err.kind() {
            redis::ErrorKind::AuthenticationFailed => KvError::authentication(err.to_string()),
            redis::ErrorKind::InvalidClientConfig => KvError::configuration(err.to_string()),
            _ => KvError::command(err.to_string()),
        }
    }
}

/// Convert pool checkout errors to KvError.
impl From<deadpool_redis::PoolError> for KvError {
    fn from(err: deadpool_redis::PoolError) -> Self {
        match err {
            deadpool_redis::PoolError::Timeout(kind) => KvError::Timeout {
                operation: format!("connection pool {:?}", kind),
                elapsed: None,
            },
            deadpool_redis::PoolError::Backend(e) => KvError::from(e),
            deadpool_redis::PoolError::Closed => {
                KvError::connection("Connection pool is closed", "Re-register the data source")
            }
            other => KvError::connection(
                format!("Failed to get connection from pool: {}", other),
                "Check the pool configuration and Redis server status",
            ),
        }
    }
}

/// Convert pool construction errors to KvError.
impl From<deadpool_redis::CreatePoolError> for KvError {
    fn from(err: deadpool_redis::CreatePoolError) -> Self {
        KvError::configuration(format!("Failed to create Redis pool: {}", err))
    }
}

fn describe_elapsed(elapsed: &Option<Duration>) -> String {
    match elapsed {
        Some(elapsed) => format!(" exceeded {:.1}s", elapsed.as_secs_f64()),
        None => String::new(),
    }
}

/// Result type alias for multi-source operations.
pub type KvResult<T> = Result<T, KvError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = KvError::connection("Failed to connect", "Check credentials");
        assert!(err.to_string().contains("Connection failed"));

        let err = KvError::data_source_not_found("source3", "register it first");
        assert!(err.to_string().contains("source3"));
    }

    #[test]
    fn test_error_suggestion() {
        let err = KvError::connection("refused", "Start the server");
        assert_eq!(err.suggestion(), Some("Start the server"));

        let err = KvError::data_source_not_found("missing", "Register the data source");
        assert_eq!(err.suggestion(), Some("Register the data source"));

        assert!(KvError::command("WRONGTYPE").suggestion().is_none());
    }

    #[test]
    fn test_error_retryable() {
        assert!(KvError::timeout("get", Duration::from_secs(3)).is_retryable());
        assert!(KvError::connection("err", "sugg").is_retryable());
        assert!(!KvError::unsupported("select db 3", "cluster mode").is_retryable());
        assert!(!KvError::duplicate_registration("source1").is_retryable());
    }

    #[test]
    fn test_redis_response_error_maps_to_command() {
        let err = redis::RedisError::from((redis::ErrorKind::TypeError, "bad type"));
        assert!(matches!(KvError::from(err), KvError::Command { .. }));
    }

    #[test]
    fn test_redis_auth_error_is_not_retryable() {
        let err = redis::RedisError::from((redis::ErrorKind::AuthenticationFailed, "denied"));
        let converted = KvError::from(err);
        assert!(matches!(converted, KvError::Authentication { .. }));
        assert!(!converted.is_retryable());
        assert!(converted.suggestion().unwrap().contains("password"));
    }

    #[test]
    fn test_timeout_reports_measured_elapsed() {
        let err = KvError::timeout("connection pool Wait", Duration::from_millis(2500));
        assert_eq!(err.to_string(), "Timeout: connection pool Wait exceeded 2.5s");
        assert!(err.is_retryable());

        // Unmeasured timeouts do not invent a duration
        let io = std::io::Error::new(std::io::ErrorKind::TimedOut, "read timed out");
        let err = KvError::from(redis::RedisError::from(io));
        assert!(matches!(err, KvError::Timeout { elapsed: None, .. }));
        assert_eq!(err.to_string(), "Timeout: redis command");
    }
}
