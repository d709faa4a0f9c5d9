//! Error types for the offline download core
//!
//! This module defines error types using thiserror for ergonomic error handling.
//! Errors are categorized by domain (configuration, storage, transfer, files)
//! so callers can react to a class of failure without matching every variant.
//!
//! The download executor is the single place that separates deliberate aborts
//! (pause/cancel) from real transfer failures; [`OfflineError::is_abort`] is
//! the predicate it uses for that classification.

use thiserror::Error;

/// Result type alias using our OfflineError type
pub type Result<T> = std::result::Result<T, OfflineError>;

/// Main error type for the offline download core
#[derive(Error, Debug)]
pub enum OfflineError {
    // ===== Configuration Errors =====

    /// No media source is attached; enqueue requires an active connection
    #[error("No active media source connection")]
    NoActiveSource,

    /// Operation is not valid for the record's current status
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Configuration value is invalid or incomplete
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    // ===== Resource Errors =====

    /// Not enough free space at the download location for the estimated size
    #[error("Insufficient disk space (need {need} bytes, have {have} bytes)")]
    InsufficientSpace { need: u64, have: u64 },

    // ===== Transfer Errors =====

    /// Generic transfer failure
    #[error("Transfer failed: {0}")]
    TransferFailed(String),

    /// Network connectivity error
    #[error("Network error: {message}")]
    NetworkError {
        message: String,
        /// Whether this error might be transient
        is_transient: bool,
    },

    /// Server returned an unexpected status code
    #[error("Server responded with unexpected status code: {0}")]
    UnexpectedStatusCode(u16),

    /// Invalid download URL format or protocol
    #[error("Invalid download URL: {0}")]
    InvalidDownloadUrl(String),

    /// Transfer was aborted via the cancellation token; not a failure
    #[error("Transfer aborted")]
    Aborted,

    // ===== Storage Errors =====

    /// Persisted record not found
    #[error("Record not found: {0}")]
    RecordNotFound(String),

    /// Key-value store operation failed
    #[error("Storage error: {0}")]
    Storage(String),

    /// Generic file I/O error
    #[error("File I/O error: {0}")]
    FileIo(String),

    /// Invalid file path
    #[error("Invalid path: {0}")]
    InvalidPath(String),

    // ===== Input Errors =====

    /// Generic input validation error
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    // ===== External Library Errors =====

    /// HTTP client error from reqwest
    #[error("HTTP client error: {0}")]
    Reqwest(#[from] reqwest::Error),

    /// JSON serialization/deserialization error
    #[error("JSON serialization error: {0}")]
    SerdeJson(#[from] serde_json::Error),

    /// Database driver error from sqlx
    #[error("Database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    /// Standard I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl OfflineError {
    /// Create an InvalidState error with a message
    pub fn invalid_state<S: Into<String>>(message: S) -> Self {
        OfflineError::InvalidState(message.into())
    }

    /// Create a RecordNotFound error with a resource name
    pub fn not_found<S: Into<String>>(resource: S) -> Self {
        OfflineError::RecordNotFound(resource.into())
    }

    /// Create a NetworkError
    pub fn network_error<S: Into<String>>(message: S, is_transient: bool) -> Self {
        OfflineError::NetworkError {
            message: message.into(),
            is_transient,
        }
    }

    /// Create a FileIo error with a message
    pub fn file_io<S: Into<String>>(message: S) -> Self {
        OfflineError::FileIo(message.into())
    }

    /// Check whether this error represents a deliberate abort rather than
    /// a failure. Aborts leave the record status to the queue manager.
    pub fn is_abort(&self) -> bool {
        matches!(self, OfflineError::Aborted)
    }

    /// Check if error is transient (might succeed on a user-triggered retry)
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            OfflineError::NetworkError { is_transient: true, .. }
                | OfflineError::UnexpectedStatusCode(500..=599)
        )
    }

    /// Check if error is related to file/disk operations
    pub fn is_file_error(&self) -> bool {
        matches!(
            self,
            OfflineError::FileIo(_)
                | OfflineError::InvalidPath(_)
                | OfflineError::InsufficientSpace { .. }
                | OfflineError::Io(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn abort_is_not_transient() {
        assert!(OfflineError::Aborted.is_abort());
        assert!(!OfflineError::Aborted.is_transient());
    }

    #[test]
    fn server_errors_are_transient() {
        assert!(OfflineError::UnexpectedStatusCode(503).is_transient());
        assert!(!OfflineError::UnexpectedStatusCode(404).is_transient());
    }
}
