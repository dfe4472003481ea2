//! Unified error handling for the sehat crate
//!
//! Unit-level failures (one page, one hospital, one doctor) are caught by the
//! orchestrator, counted, and left for the next run to retry. Phase-level
//! failures (store unreachable, listing root unreachable) propagate to the
//! caller. [`Error::is_recoverable`] encodes that split.

use std::io;
use thiserror::Error;

/// Errors raised while fetching a page from the listing site
#[derive(Error, Debug)]
pub enum FetchError {
    /// HTTP request error
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Server returned a non-success status
    #[error("Server error: {0}")]
    ServerError(u16),

    /// Request timeout
    #[error("Request timeout")]
    Timeout,

    /// Maximum retry attempts exceeded
    #[error("Maximum retry attempts exceeded")]
    MaxRetriesExceeded,

    /// Invalid URL
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
}

/// Errors raised while extracting fields from a fetched page
#[derive(Error, Debug)]
pub enum ParseError {
    /// A field required to build the record was absent
    #[error("Required field `{field}` not found on {url}")]
    FieldNotFound { field: &'static str, url: String },

    /// Page did not look like the expected page kind
    #[error("Unexpected page layout at {0}")]
    UnexpectedLayout(String),

    /// A URL embedded in the page could not be understood
    #[error("Invalid URL in page: {0}")]
    InvalidUrl(String),
}

/// Errors raised by the entity store
#[derive(Error, Debug)]
pub enum StoreError {
    /// Underlying SQLite failure
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// A status write attempted a transition not in the transition table.
    /// Indicates a data-model bug, never a transient condition.
    #[error("Invalid status transition for {key}: {from} -> {to}")]
    InvalidTransition {
        key: String,
        from: &'static str,
        to: &'static str,
    },

    /// Stored document failed to deserialize
    #[error("Corrupt document for {key}: {source}")]
    CorruptDocument {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Unified error type for the sehat crate
#[derive(Error, Debug)]
pub enum Error {
    /// Fetch-specific errors
    #[error("Fetch error: {0}")]
    Fetch(#[from] FetchError),

    /// Parse-specific errors
    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),

    /// Entity store errors
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration errors
    #[error("Config error: {0}")]
    Config(String),

    /// Generic error with context
    #[error("{context}")]
    Other {
        context: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl Error {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a generic error with context
    pub fn other(context: impl Into<String>) -> Self {
        Self::Other {
            context: context.into(),
            source: None,
        }
    }

    /// Whether a unit hitting this error should be retried on the next run.
    ///
    /// Recoverable errors leave the unit in its current status; unrecoverable
    /// ones indicate a bug and are logged at error level before the phase
    /// moves on.
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Fetch(_) => true,
            Self::Parse(_) => true,
            Self::Store(StoreError::Sqlite(_)) => true,
            Self::Store(StoreError::InvalidTransition { .. }) => false,
            Self::Store(StoreError::CorruptDocument { .. }) => false,
            Self::Io(_) => true,
            Self::Json(_) => false,
            Self::Config(_) => false,
            Self::Other { .. } => false,
        }
    }
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Self::Store(StoreError::Sqlite(err))
    }
}

/// Result type alias using the unified Error type
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fetch_errors_are_recoverable() {
        let err = Error::Fetch(FetchError::Timeout);
        assert!(err.is_recoverable());
    }

    #[test]
    fn test_invalid_transition_is_fatal() {
        let err = Error::Store(StoreError::InvalidTransition {
            key: "https://example.com/doctors/x".into(),
            from: "processed",
            to: "pending",
        });
        assert!(!err.is_recoverable());
    }

    #[test]
    fn test_config_error() {
        let err = Error::config("SEHAT_WORKERS must be >= 1");
        assert!(!err.is_recoverable());
    }
}
