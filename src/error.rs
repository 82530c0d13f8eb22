//! Error types for notesync.
//!
//! `NoteError` is the crate-wide error. `RemoteError` is the closed set of
//! outcomes the remote data API can report, so the sync engine branches on a
//! tag instead of inspecting error payloads.

use thiserror::Error;

/// Result type alias for notesync operations
pub type NoteResult<T> = Result<T, NoteError>;

/// Main error type for notesync operations
#[derive(Error, Debug)]
pub enum NoteError {
    #[error("Validation error in {field}: {message}")]
    Validation { field: String, message: String },

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Database operation failed: {0}")]
    DatabaseOperation(String),

    #[error("Remote error: {0}")]
    Remote(#[from] RemoteError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl NoteError {
    /// Create a new validation error
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        NoteError::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Create a new database operation error
    pub fn database_op(message: impl Into<String>) -> Self {
        NoteError::DatabaseOperation(message.into())
    }

    /// True when the failure came from an unreachable remote store
    pub fn is_network(&self) -> bool {
        matches!(self, NoteError::Remote(RemoteError::Network(_)))
    }
}

/// Outcome classes reported by the remote data API.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RemoteError {
    /// Transport failure, timeout or server-side outage. Transient.
    #[error("network unavailable: {0}")]
    Network(String),

    /// The scoped query matched no row (deleted or reassigned concurrently).
    #[error("no matching row")]
    NotFound,

    /// Explicit denial from the remote store.
    #[error("rejected ({status}): {message}")]
    Rejected { status: u16, message: String },
}

impl RemoteError {
    pub fn rejected(status: u16, message: impl Into<String>) -> Self {
        RemoteError::Rejected {
            status,
            message: message.into(),
        }
    }

    /// Classify an HTTP status code returned by the data API.
    ///
    /// Timeouts, throttling and server errors are transient; any other
    /// non-success status is an explicit denial.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        match status {
            408 | 429 | 500..=599 => RemoteError::Network(format!("HTTP {}", status)),
            _ => RemoteError::rejected(status, message),
        }
    }
}
