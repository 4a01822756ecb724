//! Client code for rentscout.
//!
//! This crate provides the HTTP transport, the shared rate limiter, the
//! listing API client with its paginator, and the ingestion pipeline used by
//! the CLI.

pub mod limiter;
pub mod listing;
pub mod pipeline;
pub mod transport;

#[cfg(test)]
mod testing;

pub use limiter::{AdaptiveLimiter, LimitError, LimitedResponse, LimiterStats, TokenBucket, Verdict};
pub use listing::{ListingClient, ListingConfig, ListingError, Paginator, split_locations};
pub use pipeline::{Pipeline, PipelineError, PipelineReport};
pub use transport::{HttpRequest, HttpResponse, ReqwestTransport, Transport, TransportError};
