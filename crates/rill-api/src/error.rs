//! Error types for rill-api

use thiserror::Error;

/// Result type alias using rill-api Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur when talking to the chat backend
#[derive(Error, Debug)]
pub enum Error {
    /// HTTP request failed
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The endpoint returned a non-ok status
    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    /// The distinguished 403 from the chat endpoint: the request quota is
    /// used up. Callers re-validate the token instead of treating this as
    /// a generic failure.
    #[error("quota exhausted: {message}")]
    QuotaExhausted { message: String },

    /// Token validation failed
    #[error("authentication failed: {0}")]
    Auth(String),

    /// Response did not have the expected shape
    #[error("unexpected response: {0}")]
    UnexpectedResponse(String),
}

impl Error {
    /// Create an API error from a status code and message
    pub fn api(status: u16, message: impl Into<String>) -> Self {
        Self::Api {
            status,
            message: message.into(),
        }
    }

    /// Check if this error is the quota-exhausted signal
    pub fn is_quota_exhausted(&self) -> bool {
        matches!(self, Error::QuotaExhausted { .. })
    }
}
