//! Core types and shared functionality for rentscout.
//!
//! This crate provides:
//! - Layered configuration
//! - The two-tier request cache
//! - Tabular frames, schema loading and content-addressed identity
//! - The SQLite listing store and CSV export
//! - Unified error types

pub mod cache;
pub mod config;
pub mod error;
pub mod export;
pub mod frame;
pub mod identity;
pub mod schema;
pub mod store;

pub use cache::{CacheStats, RequestCache};
pub use config::{AppConfig, ListingProfile};
pub use error::Error;
pub use frame::{Cell, Frame, Record};
pub use identity::IdentityAssigner;
pub use schema::{Schema, SchemaRegistry};
pub use store::{PersistOutcome, Store, TableSpec, TableStatus};
