//! Content-addressed primary keys.
//!
//! A row's key is the uppercased SHA-256 hex digest of its natural-key
//! values, so the same listing always receives the same key no matter how
//! often or in which order it is ingested.

use sha2::{Digest, Sha256};

use crate::frame::{Cell, Frame};

/// Separator between natural-key values in a seed.
pub const KEY_JOINER: &str = "__||__";

/// Default primary key column.
pub const PRIMARY_KEY_COLUMN: &str = "RECORD_ID";

/// Uppercased hex SHA-256 of `seed`.
pub fn hash_seed(seed: &str) -> String {
    hex::encode_upper(Sha256::digest(seed.as_bytes()))
}

/// Seed from natural-key values: uppercased, trimmed and joined.
///
/// Returns an empty string when every value is blank.
pub fn natural_key_seed<'a>(values: impl IntoIterator<Item = &'a Cell>) -> String {
    let parts: Vec<String> = values.into_iter().map(|c| c.key_text().trim().to_uppercase()).collect();
    if parts.iter().all(String::is_empty) {
        return String::new();
    }
    parts.join(KEY_JOINER)
}

/// Fills a frame's primary key column from natural keys.
#[derive(Debug, Clone)]
pub struct IdentityAssigner {
    pk_column: String,
}

impl Default for IdentityAssigner {
    fn default() -> Self {
        Self::new(PRIMARY_KEY_COLUMN)
    }
}

impl IdentityAssigner {
    pub fn new(pk_column: impl Into<String>) -> Self {
        Self { pk_column: pk_column.into() }
    }

    /// Assign keys to rows whose primary key is blank; returns how many were assigned.
    ///
    /// Key columns missing from the frame are skipped. When none of them are
    /// present the whole row (minus the key column) forms the seed. A row whose
    /// natural-key values are all blank is seeded with its position instead.
    pub fn assign<S: AsRef<str>>(&self, frame: &mut Frame, natural_key_columns: &[S]) -> usize {
        let pk = frame.ensure_column(&self.pk_column, Cell::empty());
        let key_positions: Vec<usize> = natural_key_columns
            .iter()
            .filter_map(|c| frame.column_index(c.as_ref()))
            .filter(|idx| *idx != pk)
            .collect();
        let content_positions: Vec<usize> = (0..frame.columns().len()).filter(|idx| *idx != pk).collect();
        let positions = if key_positions.is_empty() { &content_positions } else { &key_positions };

        let mut assigned = 0;
        for row in 0..frame.len() {
            let cells = &frame.rows()[row];
            if !cells[pk].is_blank() {
                continue;
            }
            let mut seed = natural_key_seed(positions.iter().map(|idx| &cells[*idx]));
            if seed.is_empty() {
                seed = row.to_string();
            }
            frame.set(row, pk, Cell::Text(hash_seed(&seed)));
            assigned += 1;
        }
        assigned
    }
}
