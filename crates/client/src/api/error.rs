//! Upstream analytics API client error types.

use std::sync::Arc;

/// Errors from the search-analytics API client.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Missing SEARCHLENS_API_KEY environment variable.
    #[error("missing API key: SEARCHLENS_API_KEY not set")]
    MissingApiKey,

    /// Invalid query request parameters.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Authentication failed (invalid API key).
    #[error("authentication failed: invalid API key")]
    AuthError,

    /// Rate limited by the upstream API.
    #[error("rate limited: too many requests")]
    RateLimited,

    /// HTTP error response.
    #[error("HTTP error: {status}")]
    HttpError { status: u16 },

    /// Request timeout.
    #[error("request timeout")]
    Timeout,

    /// Network error.
    #[error("network error: {0}")]
    Network(Arc<reqwest::Error>),

    /// Response parse error.
    #[error("parse error: {0}")]
    Parse(String),
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() { ApiError::Timeout } else { ApiError::Network(Arc::new(err)) }
    }
}
