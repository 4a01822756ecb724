//! Unified error types for the rentscout core.
//!
//! Cache I/O failures are deliberately absent: the request cache recovers
//! from them locally and never hands them to callers.

use std::path::PathBuf;

use tokio_rusqlite::rusqlite;

/// Unified error type for schema, store and export operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Database operation failed.
    #[error("STORE_ERROR: {0}")]
    Database(tokio_rusqlite::Error),

    /// An in-place table rebuild could not be completed; the live table is unchanged.
    #[error("STORE_ERROR: rebuild of {table} failed: {reason}")]
    RebuildFailed { table: String, reason: String },

    /// A table was written to before `ensure_table` created it.
    #[error("STORE_ERROR: table {0} does not exist")]
    TableMissing(String),

    /// An identifier cannot be used as a SQL table or column name.
    #[error("INVALID_IDENTIFIER: {0}")]
    InvalidIdentifier(String),

    /// The schema source file does not exist.
    #[error("SCHEMA_NOT_FOUND: {}", .0.display())]
    SchemaNotFound(PathBuf),

    /// The schema source exists but cannot be read as a schema.
    #[error("SCHEMA_INVALID: {0}")]
    SchemaInvalid(String),

    /// Filesystem access outside SQLite failed.
    #[error("IO_ERROR: {0}")]
    Io(#[from] std::io::Error),

    /// Writing an export artifact failed.
    #[error("EXPORT_FAILED: {0}")]
    Export(String),
}

impl From<tokio_rusqlite::Error<Error>> for Error {
    fn from(err: tokio_rusqlite::Error<Error>) -> Self {
        match err {
            tokio_rusqlite::Error::Error(e) => e,
            tokio_rusqlite::Error::ConnectionClosed => Error::Database(tokio_rusqlite::Error::ConnectionClosed),
            tokio_rusqlite::Error::Close(c) => Error::Database(tokio_rusqlite::Error::Close(c)),
            _ => Error::Database(tokio_rusqlite::Error::ConnectionClosed),
        }
    }
}

impl From<tokio_rusqlite::Error<rusqlite::Error>> for Error {
    fn from(err: tokio_rusqlite::Error<rusqlite::Error>) -> Self {
        Error::Database(err)
    }
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Error::Database(tokio_rusqlite::Error::Error(err))
    }
}
