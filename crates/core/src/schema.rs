//! Logical table schema loaded from a tabular source.
//!
//! The source is a CSV file with a name column, a `needed?` flag column
//! (`Y` marks a required column) and an optional `dtype` column. Only
//! required columns make it into the [`Schema`], in file order.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;

use crate::Error;
use crate::frame::{Cell, Frame};

const NAME_HEADERS: &[&str] = &["name", "column"];
const REQUIRED_HEADERS: &[&str] = &["needed?", "needed", "required", "required?"];
const TYPE_HEADERS: &[&str] = &["dtype", "type"];

/// The closed set of logical column types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Integer,
    Decimal,
    Text,
    /// Lists and other structured values stored as text.
    Blob,
}

impl ColumnType {
    /// Parse a declared logical type; anything unrecognized is text.
    pub fn from_declared(value: &str) -> Self {
        match value.trim().to_uppercase().as_str() {
            "INTEGER" | "INT" => ColumnType::Integer,
            "DECIMAL" | "NUMERIC" | "FLOAT" | "REAL" => ColumnType::Decimal,
            "LIST/BLOB" | "BLOB" | "LIST" => ColumnType::Blob,
            _ => ColumnType::Text,
        }
    }

    /// SQLite type used when creating the column.
    pub fn sql_type(self) -> &'static str {
        match self {
            ColumnType::Integer => "INTEGER",
            ColumnType::Decimal => "REAL",
            ColumnType::Text | ColumnType::Blob => "TEXT",
        }
    }

    /// Whether a column physically declared as `actual` stores this type.
    ///
    /// Matching follows SQLite affinity rules loosely: `BIGINT` satisfies
    /// integer, `DOUBLE` satisfies decimal, `VARCHAR` satisfies text.
    pub fn matches_declared(self, actual: &str) -> bool {
        let actual = actual.to_uppercase();
        match self {
            ColumnType::Integer => actual.contains("INT"),
            ColumnType::Decimal => ["REAL", "NUMERIC", "DECIMAL", "DOUBLE", "FLOAT"]
                .iter()
                .any(|t| actual.contains(t)),
            ColumnType::Text | ColumnType::Blob => ["TEXT", "CHAR", "CLOB"].iter().any(|t| actual.contains(t)),
        }
    }
}

/// One column of the logical schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaColumn {
    pub name: String,
    pub column_type: ColumnType,
    pub required: bool,
}

/// Ordered logical schema; the single source of truth for table columns.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Schema {
    columns: Vec<SchemaColumn>,
}

impl Schema {
    pub fn new(columns: Vec<SchemaColumn>) -> Self {
        Self { columns }
    }

    /// Build a schema of required columns from `(name, type)` pairs, names
    /// normalized and deduplicated.
    pub fn from_declared<'a>(columns: impl IntoIterator<Item = (&'a str, ColumnType)>) -> Self {
        let (names, types): (Vec<&str>, Vec<ColumnType>) = columns.into_iter().unzip();
        let columns = normalize_column_names(&names)
            .into_iter()
            .zip(types)
            .map(|(name, column_type)| SchemaColumn { name, column_type, required: true })
            .collect();
        Self { columns }
    }

    pub fn columns(&self) -> &[SchemaColumn] {
        &self.columns
    }

    pub fn names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    pub fn column(&self, name: &str) -> Option<&SchemaColumn> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.column(name).is_some()
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Append text columns not already present; the first occurrence wins.
    pub fn with_extra_columns<S: AsRef<str>>(mut self, extra: &[S]) -> Self {
        for name in normalize_column_names(extra) {
            if !self.contains(&name) {
                self.columns.push(SchemaColumn { name, column_type: ColumnType::Text, required: true });
            }
        }
        self
    }
}

/// Loads the logical schema from its CSV source.
#[derive(Debug, Clone)]
pub struct SchemaRegistry {
    path: PathBuf,
}

impl SchemaRegistry {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Read the schema source, keep required columns and append `extra_columns`.
    ///
    /// # Errors
    ///
    /// Returns `Error::SchemaNotFound` if the file is missing and
    /// `Error::SchemaInvalid` if it lacks the name or flag header or cannot be parsed.
    pub fn load<S: AsRef<str>>(&self, extra_columns: &[S]) -> Result<Schema, Error> {
        if !self.path.exists() {
            return Err(Error::SchemaNotFound(self.path.clone()));
        }

        let mut reader = csv::ReaderBuilder::new()
            .flexible(true)
            .trim(csv::Trim::All)
            .from_path(&self.path)
            .map_err(|e| Error::SchemaInvalid(e.to_string()))?;

        let headers = reader.headers().map_err(|e| Error::SchemaInvalid(e.to_string()))?.clone();
        let find = |candidates: &[&str]| {
            headers
                .iter()
                .position(|h| candidates.iter().any(|c| h.eq_ignore_ascii_case(c)))
        };
        let name_idx = find(NAME_HEADERS).ok_or_else(|| Error::SchemaInvalid("missing name column".into()))?;
        let required_idx =
            find(REQUIRED_HEADERS).ok_or_else(|| Error::SchemaInvalid("missing needed? column".into()))?;
        let type_idx = find(TYPE_HEADERS);

        let mut declared: Vec<(String, ColumnType)> = Vec::new();
        for record in reader.records() {
            let record = record.map_err(|e| Error::SchemaInvalid(e.to_string()))?;
            let required = record.get(required_idx).is_some_and(|v| v.eq_ignore_ascii_case("Y"));
            let name = record.get(name_idx).unwrap_or_default();
            if !required || name.is_empty() {
                continue;
            }
            let column_type = type_idx
                .and_then(|idx| record.get(idx))
                .filter(|v| !v.is_empty())
                .map(ColumnType::from_declared)
                .unwrap_or(ColumnType::Text);
            declared.push((name.to_string(), column_type));
        }

        let schema = Schema::from_declared(declared.iter().map(|(n, t)| (n.as_str(), *t)));
        let schema = schema.with_extra_columns(extra_columns);

        tracing::debug!(path = %self.path.display(), columns = schema.len(), "loaded schema");
        Ok(schema)
    }
}

/// Canonicalize column names: trim, uppercase, `.` to `__`, and suffix
/// repeats with `_1`, `_2`, ... in first-seen order.
pub fn normalize_column_names<I, S>(columns: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut seen: HashMap<String, usize> = HashMap::new();
    let mut taken: HashSet<String> = HashSet::new();
    let mut normalized = Vec::new();
    for raw in columns {
        let base = raw.as_ref().trim().to_uppercase().replace('.', "__");
        let count = seen.entry(base.clone()).or_insert(0);
        let mut name = if *count == 0 { base.clone() } else { format!("{base}_{count}") };
        *count += 1;
        while !taken.insert(name.clone()) {
            let count = seen.entry(base.clone()).or_insert(0);
            name = format!("{base}_{count}");
            *count += 1;
        }
        normalized.push(name);
    }
    normalized
}

/// Reindex a frame onto the schema's columns.
///
/// Frame columns are normalized first. Schema columns the frame lacks are
/// filled with the empty-string sentinel; frame columns outside the schema
/// are dropped.
pub fn align(frame: &Frame, schema: &Schema) -> Frame {
    let mut normalized = frame.clone();
    normalized.normalize_columns();
    normalized.reindex(&schema.names(), &Cell::empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_schema(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_normalize_column_names() {
        let names = normalize_column_names(["detailUrl", " price ", "latLong.latitude", "PRICE", "price"]);
        assert_eq!(names, vec!["DETAILURL", "PRICE", "LATLONG__LATITUDE", "PRICE_1", "PRICE_2"]);
    }

    #[test]
    fn test_normalize_avoids_existing_suffix() {
        let names = normalize_column_names(["a", "a_1", "a"]);
        assert_eq!(names, vec!["A", "A_1", "A_2"]);
    }

    #[test]
    fn test_load_filters_required_and_appends_extras() {
        let file = write_schema(
            "name,needed?,dtype\n\
             detailUrl,Y,STRING\n\
             price,Y,INTEGER\n\
             photos,N,LIST/BLOB\n\
             latLong.latitude,y,DECIMAL\n\
             address,Y,\n",
        );
        let schema = SchemaRegistry::new(file.path()).load(&["INGESTION_DATE", "RECORD_ID", "PRICE"]).unwrap();

        assert_eq!(
            schema.names(),
            vec!["DETAILURL", "PRICE", "LATLONG__LATITUDE", "ADDRESS", "INGESTION_DATE", "RECORD_ID"]
        );
        assert_eq!(schema.column("PRICE").unwrap().column_type, ColumnType::Integer);
        assert_eq!(schema.column("LATLONG__LATITUDE").unwrap().column_type, ColumnType::Decimal);
        assert_eq!(schema.column("ADDRESS").unwrap().column_type, ColumnType::Text);
    }

    #[test]
    fn test_load_missing_file() {
        let result = SchemaRegistry::new("/nonexistent/schema.csv").load::<&str>(&[]);
        assert!(matches!(result, Err(Error::SchemaNotFound(_))));
    }

    #[test]
    fn test_load_missing_flag_column() {
        let file = write_schema("name,dtype\nprice,INTEGER\n");
        let result = SchemaRegistry::new(file.path()).load::<&str>(&[]);
        assert!(matches!(result, Err(Error::SchemaInvalid(_))));
    }

    #[test]
    fn test_column_type_matching() {
        assert!(ColumnType::Integer.matches_declared("BIGINT"));
        assert!(!ColumnType::Integer.matches_declared("TEXT"));
        assert!(ColumnType::Decimal.matches_declared("double"));
        assert!(ColumnType::Blob.matches_declared("VARCHAR(20)"));
        assert!(!ColumnType::Text.matches_declared(""));
        assert_eq!(ColumnType::from_declared("numeric"), ColumnType::Decimal);
        assert_eq!(ColumnType::from_declared("whatever"), ColumnType::Text);
    }

    #[test]
    fn test_align_reindexes_to_schema() {
        let schema = Schema::from_declared([("DETAILURL", ColumnType::Text), ("PRICE", ColumnType::Integer)]);
        let frame = Frame::from_pairs(vec![vec![("price", Cell::Integer(100)), ("extra", Cell::from("x"))]]);
        let aligned = align(&frame, &schema);
        assert_eq!(aligned.columns(), &["DETAILURL", "PRICE"]);
        assert_eq!(aligned.rows()[0], vec![Cell::empty(), Cell::Integer(100)]);
    }
}
