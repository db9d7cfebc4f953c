//! Store errors
//!
//! Every fault that crosses the public API is one of these variants. Absence
//! (missing key, nothing to update) is never an error; it is `Ok(None)` or
//! `Ok(false)` at the call site.

use thiserror::Error;

/// Result alias used throughout the crate.
pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    /// No endpoint could be resolved, or a configuration value is malformed.
    /// Never retried automatically.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Handshake, transport or timeout failure, or the link was closed.
    #[error("connection error: {0}")]
    Connection(String),

    /// The server rejected a command or replied with an unexpected shape.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Caller input failed a precondition. Raised before any network call.
    #[error("validation error: {0}")]
    Validation(String),

    /// A merge target exists but is not a mapping.
    #[error("type mismatch at {key}: expected a mapping, found {found}")]
    TypeMismatch { key: String, found: &'static str },

    /// A typed value could not be converted to or from JSON.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    /// Connection failures may succeed on a later attempt; nothing else will.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Connection(_))
    }
}

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        StoreError::Connection(err.to_string())
    }
}
