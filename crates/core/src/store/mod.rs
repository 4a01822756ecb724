//! SQLite persistence for listing tables.
//!
//! This module provides the listing store using SQLite with async access via
//! tokio-rusqlite. It supports:
//!
//! - Table creation from the logical schema
//! - In-place rebuilds when the physical table drifts from the schema
//! - A unique index over the natural-key columns
//! - Deduplicating upserts that refresh existing rows instead of repeating them

pub mod connection;
pub mod table;
pub mod upsert;

pub use connection::{Store, TableColumn, quote_ident};
pub use table::{FRESHNESS_COLUMN, TableSpec, TableStatus};
pub use upsert::PersistOutcome;
