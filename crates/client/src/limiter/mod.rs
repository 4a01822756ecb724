//! Outbound request pacing.
//!
//! [`TokenBucket`] spaces requests; [`AdaptiveLimiter`] wraps each request in
//! a retry loop and tunes the bucket's rate from what the server says.

mod adaptive;
mod bucket;
mod error;

pub use adaptive::{AdaptiveLimiter, LimitedResponse, LimiterStats, Verdict};
pub use bucket::TokenBucket;
pub use error::LimitError;
