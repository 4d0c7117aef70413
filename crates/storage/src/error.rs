//! Storage error types and result alias.
//!
//! This module defines the error types that can occur during key/value store
//! operations. Every [`KeyValueStore`](crate::KeyValueStore) implementation
//! must map its internal errors to these variants.
//!
//! # Error Types
//!
//! - [`StorageError::Connection`] - Network or connection-related failures
//! - [`StorageError::Serialization`] - Data encoding/decoding failures
//! - [`StorageError::WrongType`] - A list operation hit a plain value, or vice versa
//! - [`StorageError::Internal`] - Backend-specific internal errors
//! - [`StorageError::Timeout`] - Operation exceeded time limit
//!
//! # Example
//!
//! ```
//! use medianest_storage::{StorageError, StorageResult};
//!
//! fn lookup(_key: &str) -> StorageResult<Vec<u8>> {
//!     Err(StorageError::connection("store unreachable"))
//! }
//! ```

use std::sync::Arc;

use thiserror::Error;

/// A boxed error type for source chain tracking.
pub type BoxError = Arc<dyn std::error::Error + Send + Sync>;

/// Result type alias for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during storage operations.
///
/// Errors preserve their source chain via the `#[source]` attribute, enabling
/// debugging tools to display the full error context.
///
/// # Non-exhaustive
///
/// This enum is marked `#[non_exhaustive]`. New variants may be added in
/// future minor releases without a semver-breaking change. Downstream match
/// expressions must include a wildcard arm (`_ =>`).
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StorageError {
    /// Connection or network error.
    ///
    /// This error indicates a failure to communicate with the store, such as
    /// a dropped connection or a refused connection.
    #[error("Connection error: {message}")]
    Connection {
        /// Description of the connection error.
        message: String,
        /// The underlying error that caused this connection failure.
        #[source]
        source: Option<BoxError>,
    },

    /// Serialization or deserialization error.
    #[error("Serialization error: {message}")]
    Serialization {
        /// Description of the serialization error.
        message: String,
        /// The underlying error that caused serialization to fail.
        #[source]
        source: Option<BoxError>,
    },

    /// The key holds a value of a different shape than the operation expects
    /// (for example `list_push` on a plain value).
    #[error("Wrong value type at key: {key}")]
    WrongType {
        /// The offending key.
        key: String,
    },

    /// Internal store error.
    #[error("Internal error: {message}")]
    Internal {
        /// Description of the internal error.
        message: String,
        /// The underlying error that caused this internal failure.
        #[source]
        source: Option<BoxError>,
    },

    /// Operation timed out.
    #[error("Operation timeout")]
    Timeout,
}

impl StorageError {
    /// Creates a new `Connection` error with the given message.
    #[must_use]
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection { message: message.into(), source: None }
    }

    /// Creates a new `Connection` error with a message and source error.
    #[must_use]
    pub fn connection_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Connection { message: message.into(), source: Some(Arc::new(source)) }
    }

    /// Creates a new `Serialization` error with the given message.
    #[must_use]
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization { message: message.into(), source: None }
    }

    /// Creates a new `Serialization` error with a message and source error.
    #[must_use]
    pub fn serialization_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Serialization { message: message.into(), source: Some(Arc::new(source)) }
    }

    /// Creates a new `WrongType` error for the given key.
    #[must_use]
    pub fn wrong_type(key: &[u8]) -> Self {
        Self::WrongType { key: String::from_utf8_lossy(key).into_owned() }
    }

    /// Creates a new `Internal` error with the given message.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal { message: message.into(), source: None }
    }

    /// Creates a new `Timeout` error.
    #[must_use]
    pub fn timeout() -> Self {
        Self::Timeout
    }

    /// Whether a retry of the same operation could plausibly succeed.
    ///
    /// Only connection failures and timeouts are transient. Serialization
    /// failures and type errors are deterministic.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Connection { .. } | Self::Timeout)
    }
}

/// Errors raised while validating configuration values.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum ConfigError {
    /// A numeric or duration field is below its allowed minimum.
    #[error("{field} must be at least {min}, got {value}")]
    BelowMinimum {
        /// Name of the offending field.
        field: &'static str,
        /// The rejected value, rendered for display.
        value: String,
        /// The minimum accepted value, rendered for display.
        min: String,
    },

    /// A field holds a value that is not accepted for another reason.
    #[error("invalid {field}: {reason}")]
    Invalid {
        /// Name of the offending field.
        field: &'static str,
        /// Why the value was rejected.
        reason: String,
    },
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use std::error::Error;

    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(StorageError::Timeout.to_string(), "Operation timeout");
        assert_eq!(
            StorageError::connection("refused").to_string(),
            "Connection error: refused"
        );
        assert_eq!(StorageError::wrong_type(b"audit:1").to_string(), "Wrong value type at key: audit:1");
    }

    #[test]
    fn test_transient_classification() {
        assert!(StorageError::Timeout.is_transient());
        assert!(StorageError::connection("reset").is_transient());
        assert!(!StorageError::serialization("bad json").is_transient());
        assert!(!StorageError::wrong_type(b"k").is_transient());
        assert!(!StorageError::internal("corrupt index").is_transient());
    }

    #[test]
    fn test_source_chain_preserved() {
        let err = StorageError::connection_with_source("pool exhausted", StorageError::Timeout);
        let source = err.source().expect("source exists");
        assert_eq!(source.to_string(), "Operation timeout");
    }

    #[test]
    fn test_config_error_display() {
        let err = ConfigError::BelowMinimum {
            field: "cache_ttl",
            value: "0ms".to_owned(),
            min: "1s".to_owned(),
        };
        assert_eq!(err.to_string(), "cache_ttl must be at least 1s, got 0ms");
    }
}
