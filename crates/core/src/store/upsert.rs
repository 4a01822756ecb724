//! Idempotent row persistence.

use std::collections::{HashMap, HashSet};

use tokio_rusqlite::rusqlite::{self, params, params_from_iter};

use super::connection::{Store, quote_ident, table_columns, table_exists};
use super::table::TableSpec;
use crate::Error;
use crate::frame::{Cell, Frame};
use crate::identity::{IdentityAssigner, KEY_JOINER, natural_key_seed};

/// What [`Store::persist`] did with a batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PersistOutcome {
    pub inserted: usize,
    /// Existing rows whose freshness column was refreshed.
    pub updated: usize,
    /// Incoming rows dropped as repeats within the batch.
    pub duplicates_dropped: usize,
}

/// Normalized natural key; empty when every key value is blank.
fn compound_key(row: &[Cell], positions: &[usize]) -> String {
    natural_key_seed(positions.iter().map(|idx| &row[*idx]))
}

fn full_row_key(row: &[Cell]) -> String {
    row.iter().map(Cell::key_text).collect::<Vec<_>>().join(KEY_JOINER)
}

/// Rowids of stored rows, by normalized natural key and by primary key.
#[derive(Debug, Default)]
struct StoredKeys {
    by_key: HashMap<String, Vec<i64>>,
    by_pk: HashMap<String, i64>,
}

impl StoredKeys {
    fn load(conn: &rusqlite::Connection, table: &str, pk: &str, key_columns: &[String]) -> Result<Self, Error> {
        let mut selected = vec![quote_ident(pk)?];
        for column in key_columns {
            selected.push(quote_ident(column)?);
        }
        let mut select = conn.prepare(&format!("SELECT rowid, {} FROM {table}", selected.join(", ")))?;
        let width = selected.len();
        let rows = select
            .query_map([], |row| {
                let rowid: i64 = row.get(0)?;
                let cells = (1..=width).map(|idx| row.get::<_, Cell>(idx)).collect::<Result<Vec<Cell>, _>>()?;
                Ok((rowid, cells))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut stored = Self::default();
        for (rowid, cells) in rows {
            let key = natural_key_seed(&cells[1..]);
            if !key.is_empty() {
                stored.by_key.entry(key).or_default().push(rowid);
            }
            if !cells[0].is_blank() {
                stored.by_pk.insert(cells[0].key_text(), rowid);
            }
        }
        Ok(stored)
    }

    /// Stored rows sharing the incoming row's natural key, else its primary key.
    fn matches(&self, key: &str, pk: &Cell) -> Option<Vec<i64>> {
        if !key.is_empty()
            && let Some(rowids) = self.by_key.get(key)
        {
            return Some(rowids.clone());
        }
        self.by_pk.get(&pk.key_text()).map(|rowid| vec![*rowid])
    }
}

impl Store {
    /// Persist a frame into an existing table.
    ///
    /// Rows are keyed by the table's unique key columns that the frame carries,
    /// compared trimmed and case-insensitively. Repeats within the batch are
    /// dropped (first wins); keys already stored only have their freshness
    /// column refreshed; the rest are inserted, padded to the table's physical
    /// columns. Without key columns, exact duplicate rows are dropped and the
    /// remainder appended.
    ///
    /// # Errors
    ///
    /// Returns `Error::TableMissing` if `ensure_table` has not created the table.
    pub async fn persist(&self, spec: &TableSpec, frame: &Frame) -> Result<PersistOutcome, Error> {
        if frame.is_empty() {
            return Ok(PersistOutcome::default());
        }

        let mut frame = frame.clone();
        IdentityAssigner::new(&spec.primary_key).assign(&mut frame, &spec.unique_key_columns);
        let pk_position = frame.ensure_column(&spec.primary_key, Cell::empty());

        let key_columns: Vec<String> =
            spec.unique_key_columns.iter().filter(|c| frame.column_index(c).is_some()).cloned().collect();
        let key_positions: Vec<usize> = key_columns.iter().filter_map(|c| frame.column_index(c)).collect();

        let mut seen_keys = HashSet::new();
        let mut seen_pks = HashSet::new();
        let mut outcome = PersistOutcome::default();
        let rows: Vec<(String, Vec<Cell>)> = frame
            .rows()
            .iter()
            .filter_map(|row| {
                let key = if key_positions.is_empty() { String::new() } else { compound_key(row, &key_positions) };
                let dedup_key = if key_positions.is_empty() { full_row_key(row) } else { key.clone() };
                let pk_fresh = seen_pks.insert(row[pk_position].key_text());
                let key_fresh = dedup_key.is_empty() || seen_keys.insert(dedup_key);
                if pk_fresh && key_fresh {
                    Some((key, row.clone()))
                } else {
                    outcome.duplicates_dropped += 1;
                    None
                }
            })
            .collect();

        let target = spec.clone();
        let frame_columns = frame.columns().to_vec();
        let result = self
            .conn
            .call(move |conn| -> Result<PersistOutcome, Error> {
                if !table_exists(conn, &target.name)? {
                    return Err(Error::TableMissing(target.name.clone()));
                }
                let table = quote_ident(&target.name)?;
                let physical: Vec<String> = table_columns(conn, &target.name)?.into_iter().map(|c| c.name).collect();

                let tx = conn.transaction()?;
                let mut pending = Vec::with_capacity(rows.len());

                if key_columns.is_empty() {
                    pending.extend(rows.into_iter().map(|(_, row)| row));
                } else {
                    let stored_keys = StoredKeys::load(&tx, &table, &target.primary_key, &key_columns)?;
                    let mut stored = Vec::new();
                    for (key, row) in rows {
                        match stored_keys.matches(&key, &row[pk_position]) {
                            Some(rowids) => stored.push((rowids, row)),
                            None => pending.push(row),
                        }
                    }

                    let freshness = frame_columns.iter().position(|c| *c == target.freshness_column);
                    if let Some(freshness) = freshness.filter(|_| physical.contains(&target.freshness_column)) {
                        let mut update = tx.prepare(&format!(
                            "UPDATE {table} SET {} = ? WHERE rowid = ?",
                            quote_ident(&target.freshness_column)?
                        ))?;
                        for (rowids, row) in &stored {
                            let mut touched = 0;
                            for rowid in rowids {
                                touched += update.execute(params![&row[freshness], rowid])?;
                            }
                            if touched > 0 {
                                outcome.updated += 1;
                            }
                        }
                    }
                }

                if !pending.is_empty() {
                    let positions: Vec<Option<usize>> =
                        physical.iter().map(|name| frame_columns.iter().position(|c| c == name)).collect();
                    let quoted = physical.iter().map(|c| quote_ident(c)).collect::<Result<Vec<_>, _>>()?;
                    let verb = if key_columns.is_empty() { "INSERT OR IGNORE" } else { "INSERT" };
                    let mut insert = tx.prepare(&format!(
                        "{verb} INTO {table} ({}) VALUES ({})",
                        quoted.join(", "),
                        vec!["?"; quoted.len()].join(", ")
                    ))?;
                    let empty = Cell::empty();
                    for row in &pending {
                        let values = positions.iter().map(|pos| pos.map(|p| &row[p]).unwrap_or(&empty));
                        outcome.inserted += insert.execute(params_from_iter(values))?;
                    }
                }

                tx.commit()?;
                Ok(outcome)
            })
            .await
            .map_err(Error::from)?;

        tracing::info!(
            table = %spec.name,
            inserted = result.inserted,
            updated = result.updated,
            duplicates = result.duplicates_dropped,
            "persisted rows"
        );
        Ok(result)
    }
}
