//! Tabular frames built from schema-less listing records.
//!
//! Records arrive as open JSON maps of arbitrary depth. A [`Frame`] flattens
//! them into named columns of [`Cell`]s so the schema registry, identity
//! assigner and store can work on rows without knowing the record shape.

use std::collections::HashMap;
use std::fmt;

use serde_json::{Map, Value};
use tokio_rusqlite::rusqlite::types::{FromSql, FromSqlResult, ToSql, ToSqlOutput, ValueRef};

use crate::schema::normalize_column_names;

/// One listing as returned by the API.
pub type Record = Map<String, Value>;

/// A single scalar value in a frame or table row.
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
}

impl Cell {
    /// The empty-string sentinel used for absent columns.
    pub fn empty() -> Self {
        Cell::Text(String::new())
    }

    /// True for nulls and whitespace-only text.
    pub fn is_blank(&self) -> bool {
        match self {
            Cell::Null => true,
            Cell::Text(s) => s.trim().is_empty(),
            _ => false,
        }
    }

    /// Textual form used when cells take part in keys.
    ///
    /// Nulls render as the empty string so a missing value and a blank value
    /// compare equal.
    pub fn key_text(&self) -> String {
        match self {
            Cell::Null => String::new(),
            Cell::Integer(i) => i.to_string(),
            Cell::Real(f) => f.to_string(),
            Cell::Text(s) => s.clone(),
        }
    }

    fn from_json(value: &Value) -> Self {
        match value {
            Value::Null => Cell::Null,
            Value::Bool(b) => Cell::Integer(i64::from(*b)),
            Value::Number(n) => match n.as_i64() {
                Some(i) => Cell::Integer(i),
                None => n.as_f64().map(Cell::Real).unwrap_or_else(|| Cell::Text(n.to_string())),
            },
            Value::String(s) => Cell::Text(s.clone()),
            other => Cell::Text(other.to_string()),
        }
    }
}

impl fmt::Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key_text())
    }
}

impl From<&str> for Cell {
    fn from(value: &str) -> Self {
        Cell::Text(value.to_string())
    }
}

impl From<String> for Cell {
    fn from(value: String) -> Self {
        Cell::Text(value)
    }
}

impl From<i64> for Cell {
    fn from(value: i64) -> Self {
        Cell::Integer(value)
    }
}

impl From<f64> for Cell {
    fn from(value: f64) -> Self {
        Cell::Real(value)
    }
}

impl ToSql for Cell {
    fn to_sql(&self) -> tokio_rusqlite::rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            Cell::Null => ToSqlOutput::Borrowed(ValueRef::Null),
            Cell::Integer(i) => ToSqlOutput::Borrowed(ValueRef::Integer(*i)),
            Cell::Real(f) => ToSqlOutput::Borrowed(ValueRef::Real(*f)),
            Cell::Text(s) => ToSqlOutput::Borrowed(ValueRef::Text(s.as_bytes())),
        })
    }
}

impl FromSql for Cell {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        Ok(match value {
            ValueRef::Null => Cell::Null,
            ValueRef::Integer(i) => Cell::Integer(i),
            ValueRef::Real(f) => Cell::Real(f),
            ValueRef::Text(t) | ValueRef::Blob(t) => Cell::Text(String::from_utf8_lossy(t).into_owned()),
        })
    }
}

/// Column-ordered rows of cells.
///
/// Every row has exactly one cell per column.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Frame {
    columns: Vec<String>,
    rows: Vec<Vec<Cell>>,
}

impl Frame {
    /// Build a frame from rows of `(column, cell)` pairs.
    ///
    /// Columns are ordered by first appearance; cells missing from a row are null.
    pub fn from_pairs<I, R, K>(rows: I) -> Self
    where
        I: IntoIterator<Item = R>,
        R: IntoIterator<Item = (K, Cell)>,
        K: Into<String>,
    {
        let mut frame = Frame::default();
        let mut index: HashMap<String, usize> = HashMap::new();
        for row in rows {
            let mut cells = vec![Cell::Null; frame.columns.len()];
            for (name, cell) in row {
                let name = name.into();
                let idx = match index.get(&name) {
                    Some(idx) => *idx,
                    None => {
                        let idx = frame.columns.len();
                        index.insert(name.clone(), idx);
                        frame.columns.push(name);
                        for existing in &mut frame.rows {
                            existing.push(Cell::Null);
                        }
                        cells.push(Cell::Null);
                        idx
                    }
                };
                cells[idx] = cell;
            }
            frame.rows.push(cells);
        }
        frame
    }

    /// Flatten API records into a frame.
    ///
    /// Nested maps become `parent__child` columns. The list under `units_key`
    /// is expanded into `<field>_<n>` columns, `n` counting from 1 in list
    /// order. Any other list is stored as JSON text.
    pub fn from_records(records: &[Record], units_key: &str) -> Self {
        Self::from_pairs(records.iter().map(|record| {
            let mut pairs = Vec::new();
            for (key, value) in record {
                if key == units_key && value.is_array() {
                    continue;
                }
                flatten_into(&mut pairs, key, value);
            }
            if let Some(Value::Array(units)) = record.get(units_key) {
                for (n, unit) in units.iter().enumerate() {
                    let Value::Object(unit) = unit else { continue };
                    let mut unit_pairs = Vec::new();
                    for (key, value) in unit {
                        flatten_into(&mut unit_pairs, key, value);
                    }
                    pairs.extend(unit_pairs.into_iter().map(|(name, cell)| (format!("{name}_{}", n + 1), cell)));
                }
            }
            pairs
        }))
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<Cell>] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Position of a column by exact name.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// Cell at `row` in column `name`, if both exist.
    pub fn get(&self, row: usize, name: &str) -> Option<&Cell> {
        let col = self.column_index(name)?;
        self.rows.get(row).map(|r| &r[col])
    }

    /// Add a column filled with `fill`, or leave an existing one untouched.
    ///
    /// Returns the column position.
    pub fn ensure_column(&mut self, name: &str, fill: Cell) -> usize {
        if let Some(idx) = self.column_index(name) {
            return idx;
        }
        self.columns.push(name.to_string());
        for row in &mut self.rows {
            row.push(fill.clone());
        }
        self.columns.len() - 1
    }

    /// Set every row's `name` cell to `value`, adding the column if needed.
    pub fn set_column(&mut self, name: &str, value: Cell) {
        let idx = self.ensure_column(name, value.clone());
        for row in &mut self.rows {
            row[idx] = value.clone();
        }
    }

    /// Overwrite one cell. Panics on an out-of-range row, like slice indexing.
    pub fn set(&mut self, row: usize, col: usize, value: Cell) {
        self.rows[row][col] = value;
    }

    /// Rename columns to their canonical form.
    pub fn normalize_columns(&mut self) {
        self.columns = normalize_column_names(&self.columns);
    }

    /// Uppercase text cells; nulls become empty text, numbers are untouched.
    pub fn uppercase_text(&mut self) {
        for row in &mut self.rows {
            for cell in row.iter_mut() {
                if matches!(cell, Cell::Null) {
                    *cell = Cell::empty();
                } else if let Cell::Text(s) = cell {
                    *s = s.to_uppercase();
                }
            }
        }
    }

    /// Copy `fallback` into a new `target` column when `target` is absent.
    ///
    /// Returns true if the column was added.
    pub fn fill_from_fallback(&mut self, target: &str, fallback: &str) -> bool {
        if self.column_index(target).is_some() {
            return false;
        }
        let Some(src) = self.column_index(fallback) else {
            return false;
        };
        self.columns.push(target.to_string());
        for row in &mut self.rows {
            let value = row[src].clone();
            row.push(value);
        }
        true
    }

    /// Project onto `columns` in order, filling absent ones with `fill` and
    /// dropping everything else.
    pub fn reindex(&self, columns: &[String], fill: &Cell) -> Frame {
        let positions: Vec<Option<usize>> = columns.iter().map(|c| self.column_index(c)).collect();
        let rows = self
            .rows
            .iter()
            .map(|row| {
                positions
                    .iter()
                    .map(|pos| pos.map(|p| row[p].clone()).unwrap_or_else(|| fill.clone()))
                    .collect()
            })
            .collect();
        Frame { columns: columns.to_vec(), rows }
    }
}

fn flatten_into(out: &mut Vec<(String, Cell)>, prefix: &str, value: &Value) {
    match value {
        Value::Object(map) => {
            for (key, nested) in map {
                flatten_into(out, &format!("{prefix}__{key}"), nested);
            }
        }
        other => out.push((prefix.to_string(), Cell::from_json(other))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(value: Value) -> Record {
        match value {
            Value::Object(map) => map,
            _ => panic!("fixture must be an object"),
        }
    }

    #[test]
    fn test_flatten_nested_and_units() {
        let records = vec![record(json!({
            "zpid": 42,
            "address": "1 Main St",
            "latLong": {"latitude": 36.1, "longitude": -86.7},
            "units": [
                {"price": "$1,650+", "beds": "1"},
                {"price": "$2,100+", "beds": "2"}
            ],
            "photos": ["a.jpg", "b.jpg"]
        }))];

        let frame = Frame::from_records(&records, "units");
        assert_eq!(
            frame.columns(),
            &["zpid", "address", "latLong__latitude", "latLong__longitude", "photos", "price_1", "beds_1", "price_2", "beds_2"]
        );
        assert_eq!(frame.get(0, "zpid"), Some(&Cell::Integer(42)));
        assert_eq!(frame.get(0, "latLong__longitude"), Some(&Cell::Real(-86.7)));
        assert_eq!(frame.get(0, "price_2"), Some(&Cell::Text("$2,100+".into())));
        assert_eq!(frame.get(0, "photos"), Some(&Cell::Text(r#"["a.jpg","b.jpg"]"#.into())));
    }

    #[test]
    fn test_flatten_is_deterministic() {
        let records = vec![
            record(json!({"a": 1, "b": {"c": 2}})),
            record(json!({"b": {"c": 3}, "d": "x"})),
        ];
        let first = Frame::from_records(&records, "units");
        let second = Frame::from_records(&records, "units");
        assert_eq!(first, second);
        assert_eq!(first.columns(), &["a", "b__c", "d"]);
        assert_eq!(first.get(1, "a"), Some(&Cell::Null));
    }

    #[test]
    fn test_uppercase_keeps_numbers() {
        let mut frame = Frame::from_pairs(vec![vec![
            ("ADDRESS", Cell::from("1 main st")),
            ("PRICE", Cell::Integer(100)),
            ("NOTE", Cell::Null),
        ]]);
        frame.uppercase_text();
        assert_eq!(frame.get(0, "ADDRESS"), Some(&Cell::Text("1 MAIN ST".into())));
        assert_eq!(frame.get(0, "PRICE"), Some(&Cell::Integer(100)));
        assert_eq!(frame.get(0, "NOTE"), Some(&Cell::empty()));
    }

    #[test]
    fn test_fill_from_fallback() {
        let mut frame = Frame::from_pairs(vec![vec![("PRICE_1", Cell::from("$1,650+"))]]);
        assert!(frame.fill_from_fallback("PRICE", "PRICE_1"));
        assert!(!frame.fill_from_fallback("PRICE", "PRICE_1"));
        assert!(!frame.fill_from_fallback("BEDS", "BEDS_1"));
        assert_eq!(frame.get(0, "PRICE"), Some(&Cell::Text("$1,650+".into())));
    }

    #[test]
    fn test_reindex_fills_and_drops() {
        let frame = Frame::from_pairs(vec![vec![("A", Cell::Integer(1)), ("B", Cell::Integer(2))]]);
        let out = frame.reindex(&["B".to_string(), "C".to_string()], &Cell::empty());
        assert_eq!(out.columns(), &["B", "C"]);
        assert_eq!(out.rows()[0], vec![Cell::Integer(2), Cell::empty()]);
    }

    #[test]
    fn test_key_text() {
        assert_eq!(Cell::Null.key_text(), "");
        assert_eq!(Cell::Integer(7).key_text(), "7");
        assert_eq!(Cell::Real(100.0).key_text(), "100");
        assert!(Cell::from("  ").is_blank());
        assert!(!Cell::Integer(0).is_blank());
    }
}
