//! Table creation and in-place schema migration.
//!
//! SQLite cannot retype columns or attach a primary key with `ALTER TABLE`,
//! so a table whose physical shape drifts from the logical schema is rebuilt:
//! renamed aside, recreated, repopulated with re-derived keys, and the aside
//! copy dropped, all inside one transaction.

use std::collections::{HashMap, HashSet};

use tokio_rusqlite::rusqlite::{self, params_from_iter};

use super::connection::{Store, TableColumn, quote_ident, table_columns, table_exists};
use crate::Error;
use crate::frame::Cell;
use crate::identity::{KEY_JOINER, PRIMARY_KEY_COLUMN, hash_seed, natural_key_seed};
use crate::schema::{ColumnType, Schema, SchemaColumn};

/// Column refreshed on re-ingestion instead of inserting a duplicate row.
pub const FRESHNESS_COLUMN: &str = "INGESTION_DATE";

/// Everything the store needs to know about one destination table.
#[derive(Debug, Clone)]
pub struct TableSpec {
    pub name: String,
    pub schema: Schema,
    pub unique_key_columns: Vec<String>,
    pub primary_key: String,
    pub freshness_column: String,
}

impl TableSpec {
    /// Describe a table; the primary key column is appended to the schema if absent.
    pub fn new(name: impl Into<String>, schema: Schema, unique_key_columns: Vec<String>) -> Self {
        let schema = ensure_primary_key(schema, PRIMARY_KEY_COLUMN);
        Self {
            name: name.into(),
            schema,
            unique_key_columns,
            primary_key: PRIMARY_KEY_COLUMN.to_string(),
            freshness_column: FRESHNESS_COLUMN.to_string(),
        }
    }

    /// Aside name used while rebuilding.
    pub fn legacy_name(&self) -> String {
        format!("{}__legacy_pk", self.name)
    }

    /// Name of the unique index over the given key columns.
    pub fn index_name(&self, columns: &[String]) -> String {
        format!("ux_{}_{}", self.name, columns.join("_").to_lowercase())
    }

    fn create_sql(&self) -> Result<String, Error> {
        let mut defs = Vec::with_capacity(self.schema.len());
        for column in self.schema.columns() {
            let ident = quote_ident(&column.name)?;
            if column.name == self.primary_key {
                defs.push(format!("{ident} TEXT PRIMARY KEY"));
            } else {
                defs.push(format!("{ident} {}", column.column_type.sql_type()));
            }
        }
        Ok(format!("CREATE TABLE IF NOT EXISTS {} ({})", quote_ident(&self.name)?, defs.join(", ")))
    }

    /// Why the physical table disagrees with the schema, if it does.
    fn drift(&self, physical: &[TableColumn]) -> Option<String> {
        let by_name: HashMap<&str, &TableColumn> = physical.iter().map(|c| (c.name.as_str(), c)).collect();

        let pk_ok = physical.iter().filter(|c| c.pk > 0).map(|c| c.name.as_str()).eq([self.primary_key.as_str()]);
        if !pk_ok {
            return Some(format!("primary key is not {}", self.primary_key));
        }

        for column in self.schema.columns() {
            match by_name.get(column.name.as_str()) {
                None => return Some(format!("missing column {}", column.name)),
                Some(actual) if column.name != self.primary_key
                    && !column.column_type.matches_declared(&actual.declared_type) =>
                {
                    return Some(format!(
                        "column {} is {} but should be {}",
                        column.name,
                        actual.declared_type,
                        column.column_type.sql_type()
                    ));
                }
                Some(_) => {}
            }
        }
        None
    }
}

fn ensure_primary_key(schema: Schema, pk: &str) -> Schema {
    if schema.contains(pk) {
        return schema;
    }
    let mut columns = schema.columns().to_vec();
    columns.push(SchemaColumn { name: pk.to_string(), column_type: ColumnType::Text, required: true });
    Schema::new(columns)
}

/// Outcome of [`Store::ensure_table`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TableStatus {
    pub created: bool,
    pub rebuilt: bool,
    /// Rows carried across a rebuild.
    pub migrated_rows: usize,
    /// Unique index over the key columns, when one applies.
    pub index: Option<String>,
}

impl Store {
    /// Create the table, rebuild it if its shape drifted, and ensure the unique key index.
    ///
    /// # Errors
    ///
    /// Returns `Error::RebuildFailed` if a rebuild cannot complete; the
    /// transaction is rolled back and the live table is left as it was.
    pub async fn ensure_table(&self, spec: &TableSpec) -> Result<TableStatus, Error> {
        let table_name = spec.name.clone();
        let spec = spec.clone();
        let status = self
            .conn
            .call(move |conn| -> Result<TableStatus, Error> {
                let mut status = TableStatus::default();

                if !table_exists(conn, &spec.name)? {
                    conn.execute(&spec.create_sql()?, [])?;
                    status.created = true;
                    tracing::info!(table = %spec.name, columns = spec.schema.len(), "created table");
                } else if let Some(reason) = spec.drift(&table_columns(conn, &spec.name)?) {
                    tracing::info!(table = %spec.name, reason = %reason, "rebuilding table");
                    status.migrated_rows = rebuild(conn, &spec).map_err(|e| Error::RebuildFailed {
                        table: spec.name.clone(),
                        reason: e.to_string(),
                    })?;
                    status.rebuilt = true;
                }

                status.index = ensure_unique_index(conn, &spec)?;
                Ok(status)
            })
            .await
            .map_err(Error::from)?;

        if status.rebuilt {
            tracing::info!(table = %table_name, rows = status.migrated_rows, "table rebuilt");
        }
        Ok(status)
    }
}

/// Swap the live table for one matching the schema, carrying every row across.
fn rebuild(conn: &mut rusqlite::Connection, spec: &TableSpec) -> Result<usize, Error> {
    let live = quote_ident(&spec.name)?;
    let aside = quote_ident(&spec.legacy_name())?;
    let columns = spec.schema.names();
    let quoted: Vec<String> = columns.iter().map(|c| quote_ident(c)).collect::<Result<_, _>>()?;
    let insert_sql = format!(
        "INSERT INTO {live} ({}) VALUES ({})",
        quoted.join(", "),
        vec!["?"; quoted.len()].join(", ")
    );

    let tx = conn.transaction()?;
    tx.execute(&format!("DROP TABLE IF EXISTS {aside}"), [])?;
    tx.execute(&format!("ALTER TABLE {live} RENAME TO {aside}"), [])?;
    tx.execute(&spec.create_sql()?, [])?;

    let mut copied = 0;
    {
        let mut select = tx.prepare(&format!("SELECT rowid AS __rowid, * FROM {aside}"))?;
        let legacy: Vec<String> = select.column_names().into_iter().map(String::from).collect();
        let position: HashMap<&str, usize> = legacy.iter().enumerate().map(|(i, n)| (n.as_str(), i)).collect();
        let width = legacy.len();
        let rows = select
            .query_map([], |row| (0..width).map(|idx| row.get::<_, Cell>(idx)).collect::<Result<Vec<Cell>, _>>())?
            .collect::<Result<Vec<_>, _>>()?;

        let key_positions: Vec<usize> =
            spec.unique_key_columns.iter().filter_map(|c| position.get(c.as_str()).copied()).collect();
        let mut insert = tx.prepare(&insert_sql)?;
        let mut seen: HashSet<String> = HashSet::new();

        for row in rows {
            let rowid = row[0].key_text();
            let seed = natural_key_seed(key_positions.iter().map(|idx| &row[*idx]));
            let mut pk = hash_seed(if seed.is_empty() { &rowid } else { &seed });
            if !seen.insert(pk.clone()) {
                pk = hash_seed(&format!("{seed}{KEY_JOINER}{rowid}"));
                seen.insert(pk.clone());
            }

            let values: Vec<Cell> = columns
                .iter()
                .map(|name| {
                    if *name == spec.primary_key {
                        Cell::Text(pk.clone())
                    } else {
                        position.get(name.as_str()).map(|idx| row[*idx].clone()).unwrap_or_else(Cell::empty)
                    }
                })
                .collect();
            insert.execute(params_from_iter(values.iter()))?;
            copied += 1;
        }
    }

    tx.execute(&format!("DROP TABLE {aside}"), [])?;
    tx.commit()?;
    Ok(copied)
}

/// Create the unique index over the key columns present in the table.
///
/// Skipped with a warning when existing rows already repeat a key.
fn ensure_unique_index(conn: &rusqlite::Connection, spec: &TableSpec) -> Result<Option<String>, Error> {
    let existing: HashSet<String> = table_columns(conn, &spec.name)?.into_iter().map(|c| c.name).collect();
    let applicable: Vec<String> =
        spec.unique_key_columns.iter().filter(|c| existing.contains(c.as_str())).cloned().collect();
    if applicable.is_empty() {
        return Ok(None);
    }

    let index = spec.index_name(&applicable);
    let present: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM pragma_index_list(?1) WHERE name = ?2)",
        [&spec.name, &index],
        |row| row.get(0),
    )?;
    if present {
        return Ok(Some(index));
    }

    let table = quote_ident(&spec.name)?;
    let cols = applicable.iter().map(|c| quote_ident(c)).collect::<Result<Vec<_>, _>>()?.join(", ");
    let duplicated: bool = conn.query_row(
        &format!("SELECT EXISTS(SELECT 1 FROM {table} GROUP BY {cols} HAVING COUNT(*) > 1)"),
        [],
        |row| row.get(0),
    )?;
    if duplicated {
        tracing::warn!(table = %spec.name, index = %index, "existing rows repeat the unique key; index not created");
        return Ok(None);
    }

    conn.execute(&format!("CREATE UNIQUE INDEX IF NOT EXISTS {} ON {table} ({cols})", quote_ident(&index)?), [])?;
    tracing::info!(table = %spec.name, index = %index, "created unique index");
    Ok(Some(index))
}
