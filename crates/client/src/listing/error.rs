//! Listing API client error types.

use crate::limiter::LimitError;

/// Errors from the listing API client.
#[derive(Debug, thiserror::Error)]
pub enum ListingError {
    /// No API key was configured.
    #[error("missing API key: set RENTSCOUT_API_KEY or RAPIDAPI_KEY")]
    MissingApiKey,

    /// Authentication failed (401/403).
    #[error("authorization failed with status {status}: {message}; check RENTSCOUT_API_KEY")]
    Unauthorized { status: u16, message: String },

    /// Terminal HTTP error response.
    #[error("{label}: HTTP {status}: {message}")]
    Http { label: String, status: u16, message: String },

    /// Every retry was rate limited or hit a network failure.
    #[error(transparent)]
    Exhausted(LimitError),

    /// Response body was not valid JSON.
    #[error("parse error: {0}")]
    Parse(String),
}

impl From<LimitError> for ListingError {
    fn from(err: LimitError) -> Self {
        match err {
            LimitError::Rejected { status: status @ (401 | 403), message, .. } => {
                ListingError::Unauthorized { status, message }
            }
            LimitError::Rejected { label, status, message, .. } => ListingError::Http { label, status, message },
            exhausted @ LimitError::Exhausted { .. } => ListingError::Exhausted(exhausted),
        }
    }
}
