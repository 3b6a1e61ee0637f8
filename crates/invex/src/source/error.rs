//! Message source error types.

use thiserror::Error;

/// Errors that can occur against the inbound message store.
#[derive(Error, Debug)]
pub enum SourceError {
    /// The source cannot be reached (network/connection failure).
    #[error("Message source unavailable: {0}")]
    Unavailable(String),

    /// Authentication was rejected.
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    /// The requested message does not exist.
    #[error("Message '{0}' not found")]
    NotFound(String),

    /// The operation timed out.
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// The message payload could not be parsed.
    #[error("Failed to parse message: {0}")]
    Parse(String),

    /// The source does not implement this capability.
    #[error("Operation '{0}' not supported by this source")]
    Unsupported(String),
}

impl SourceError {
    /// Whether a retry could reasonably succeed. Connectivity and timeout
    /// failures are transient; auth, missing messages and parse failures
    /// are not.
    pub fn is_transient(&self) -> bool {
        matches!(self, SourceError::Unavailable(_) | SourceError::Timeout(_))
    }
}

/// Result type for source operations.
pub type Result<T> = std::result::Result<T, SourceError>;
