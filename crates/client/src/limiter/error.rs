//! Rate limiter error types.

use crate::transport::TransportError;

/// Terminal outcomes of [`super::AdaptiveLimiter::execute_with_retry`].
#[derive(Debug, thiserror::Error)]
pub enum LimitError {
    /// The server refused the request in a way retrying will not fix.
    #[error("{label}: rejected with status {status} on attempt {attempt}: {message}")]
    Rejected { label: String, status: u16, attempt: u32, message: String },

    /// Every attempt was rate limited or failed at the network level.
    #[error("{label}: retries exhausted after {attempts} attempts")]
    Exhausted {
        label: String,
        attempts: u32,
        #[source]
        last_error: Option<TransportError>,
    },
}

impl LimitError {
    pub fn label(&self) -> &str {
        match self {
            LimitError::Rejected { label, .. } | LimitError::Exhausted { label, .. } => label,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_error_display() {
        let err = LimitError::Rejected { label: "page 2".into(), status: 403, attempt: 1, message: "forbidden".into() };
        assert_eq!(err.to_string(), "page 2: rejected with status 403 on attempt 1: forbidden");

        let err = LimitError::Exhausted { label: "page 3".into(), attempts: 5, last_error: None };
        assert!(err.to_string().contains("5 attempts"));
        assert_eq!(err.label(), "page 3");
    }

    #[test]
    fn test_exhausted_keeps_source() {
        let err = LimitError::Exhausted { label: "page 1".into(), attempts: 2, last_error: Some(TransportError::Timeout) };
        assert!(err.source().is_some());
    }
}
