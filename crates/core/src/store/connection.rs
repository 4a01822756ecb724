//! Database connection management with pragma configuration.
//!
//! This module handles opening the SQLite listings database and applying the
//! pragmas every connection needs.

use std::path::Path;

use tokio_rusqlite::{Connection, params};

use crate::Error;
use crate::frame::Cell;

const PRAGMAS: &str = "PRAGMA journal_mode=WAL;
     PRAGMA synchronous=NORMAL;
     PRAGMA temp_store=MEMORY;";

/// Listings database handle.
///
/// Wraps a tokio-rusqlite Connection that runs database operations
/// on a background thread.
#[derive(Clone, Debug)]
pub struct Store {
    pub(crate) conn: Connection,
}

/// One physical column as reported by `PRAGMA table_info`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableColumn {
    pub name: String,
    pub declared_type: String,
    /// Position within the primary key, 0 when not part of it.
    pub pk: i64,
}

impl Store {
    /// Open a database at the specified path, creating the file if needed.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let conn = Connection::open(path).await.map_err(|e| Error::Database(e.into()))?;
        Self::configure(conn).await
    }

    /// Open an in-memory database for testing.
    pub async fn open_in_memory() -> Result<Self, Error> {
        let conn = Connection::open_in_memory()
            .await
            .map_err(|e| Error::Database(e.into()))?;
        Self::configure(conn).await
    }

    async fn configure(conn: Connection) -> Result<Self, Error> {
        conn.call(|conn| {
            conn.execute_batch(PRAGMAS)?;
            Ok(())
        })
        .await
        .map_err(Error::Database)?;

        Ok(Self { conn })
    }

    /// Whether a table named `table` exists.
    pub async fn table_exists(&self, table: &str) -> Result<bool, Error> {
        let table = table.to_string();
        self.conn
            .call(move |conn| -> Result<bool, Error> { table_exists(conn, &table) })
            .await
            .map_err(Error::from)
    }

    /// Physical columns of `table` in declaration order; empty if the table is absent.
    pub async fn columns(&self, table: &str) -> Result<Vec<TableColumn>, Error> {
        let table = table.to_string();
        self.conn
            .call(move |conn| -> Result<Vec<TableColumn>, Error> { table_columns(conn, &table) })
            .await
            .map_err(Error::from)
    }

    /// Number of rows in `table`.
    pub async fn row_count(&self, table: &str) -> Result<u64, Error> {
        let sql = format!("SELECT COUNT(*) FROM {}", quote_ident(table)?);
        self.conn
            .call(move |conn| -> Result<u64, Error> {
                let count: i64 = conn.query_row(&sql, [], |row| row.get(0))?;
                Ok(count as u64)
            })
            .await
            .map_err(Error::from)
    }

    /// Every row of `table` as cells, in rowid order, with the column names.
    pub async fn fetch_all(&self, table: &str) -> Result<(Vec<String>, Vec<Vec<Cell>>), Error> {
        let sql = format!("SELECT * FROM {} ORDER BY rowid", quote_ident(table)?);
        self.conn
            .call(move |conn| -> Result<(Vec<String>, Vec<Vec<Cell>>), Error> {
                let mut stmt = conn.prepare(&sql)?;
                let names: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
                let width = names.len();
                let rows = stmt
                    .query_map([], |row| (0..width).map(|idx| row.get::<_, Cell>(idx)).collect())?
                    .collect::<Result<Vec<Vec<Cell>>, _>>()?;
                Ok((names, rows))
            })
            .await
            .map_err(Error::from)
    }
}

pub(crate) fn table_exists(conn: &tokio_rusqlite::rusqlite::Connection, table: &str) -> Result<bool, Error> {
    let exists: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1)",
        params![table],
        |row| row.get(0),
    )?;
    Ok(exists)
}

pub(crate) fn table_columns(
    conn: &tokio_rusqlite::rusqlite::Connection,
    table: &str,
) -> Result<Vec<TableColumn>, Error> {
    let mut stmt = conn.prepare("SELECT name, type, pk FROM pragma_table_info(?1) ORDER BY cid")?;
    let columns = stmt
        .query_map(params![table], |row| {
            Ok(TableColumn { name: row.get(0)?, declared_type: row.get(1)?, pk: row.get(2)? })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(columns)
}

/// Double-quote an identifier for SQL, rejecting names that cannot be quoted safely.
pub fn quote_ident(name: &str) -> Result<String, Error> {
    if name.trim().is_empty() || name.contains('"') || name.contains('\0') {
        return Err(Error::InvalidIdentifier(name.to_string()));
    }
    Ok(format!("\"{name}\""))
}
