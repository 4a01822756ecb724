//! End-to-end ingestion: fetch, shape, persist, export.

use std::path::PathBuf;
use std::sync::Arc;

use rentscout_core::identity::PRIMARY_KEY_COLUMN;
use rentscout_core::schema::align;
use rentscout_core::store::FRESHNESS_COLUMN;
use rentscout_core::{
    AppConfig, Cell, Frame, IdentityAssigner, ListingProfile, Record, RequestCache, SchemaRegistry, Store, TableSpec,
};
use serde::Serialize;
use serde_json::Value;
use tokio::task::JoinSet;

use crate::listing::{ListingClient, ListingError, Paginator, split_locations};

/// Columns filled from the first unit when a listing lacks them.
const UNIT_FALLBACK_COLUMNS: [(&str, &str); 3] =
    [("PRICE", "PRICE_1"), ("BEDS", "BEDS_1"), ("BATHROOMS", "BATHROOMS_1")];

/// Errors that abort an ingestion run.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    Listing(#[from] ListingError),

    #[error(transparent)]
    Core(#[from] rentscout_core::Error),

    #[error("fetch task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Summary of one profile run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PipelineReport {
    pub profile: String,
    pub table: String,
    pub records_fetched: usize,
    pub inserted: usize,
    pub updated: usize,
    pub csv_path: Option<PathBuf>,
}

/// Runs listing profiles against one client, cache and store.
#[derive(Debug, Clone)]
pub struct Pipeline {
    client: ListingClient,
    cache: Option<Arc<RequestCache>>,
    store: Store,
    config: Arc<AppConfig>,
}

impl Pipeline {
    pub fn new(client: ListingClient, store: Store, config: Arc<AppConfig>) -> Self {
        Self { client, cache: None, store, config }
    }

    pub fn with_cache(mut self, cache: Arc<RequestCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Fetch every configured location for `profile` and persist the result.
    ///
    /// `stamp` is written to the freshness column and names the CSV export.
    /// A run that fetches nothing persists nothing and reports zero records.
    ///
    /// # Errors
    ///
    /// Terminal request failures, schema problems and store failures abort
    /// the run.
    pub async fn run(&self, profile: &ListingProfile, stamp: &str) -> Result<PipelineReport, PipelineError> {
        tracing::info!(profile = %profile.name, table = %profile.table_name, "starting pipeline");
        let mut report =
            PipelineReport { profile: profile.name.clone(), table: profile.table_name.clone(), ..Default::default() };

        let records = self.fetch_all(profile).await?;
        report.records_fetched = records.len();
        if records.is_empty() {
            tracing::warn!(profile = %profile.name, "no records fetched; skipping persistence");
            return Ok(report);
        }

        let frame = build_frame(&records, &self.config.units_key, stamp, &profile.unique_key_columns);
        let schema = SchemaRegistry::new(&self.config.schema_path).load(&[FRESHNESS_COLUMN, PRIMARY_KEY_COLUMN])?;
        let aligned = align(&frame, &schema);

        let spec = TableSpec::new(&profile.table_name, schema, profile.unique_key_columns.clone());
        self.store.ensure_table(&spec).await?;
        let outcome = self.store.persist(&spec, &aligned).await?;
        report.inserted = outcome.inserted;
        report.updated = outcome.updated;

        let csv_path =
            rentscout_core::export::export_csv(&aligned, &self.config.export_dir, &profile.csv_prefix, stamp)?;
        tracing::info!(table = %profile.table_name, path = %csv_path.display(), "exported CSV");
        report.csv_path = Some(csv_path);

        Ok(report)
    }

    /// Records for every location, in location order.
    ///
    /// Locations run in batches; each batch is fetched concurrently. With no
    /// locations configured the base query runs once.
    async fn fetch_all(&self, profile: &ListingProfile) -> Result<Vec<Record>, PipelineError> {
        let locations = split_locations(&self.config.locations, None);
        let targets: Vec<Option<String>> =
            if locations.is_empty() { vec![None] } else { locations.into_iter().map(Some).collect() };
        let batch_size = self.config.batch_size.max(1);
        let batches = targets.len().div_ceil(batch_size);

        let mut records = Vec::new();
        for (n, batch) in targets.chunks(batch_size).enumerate() {
            tracing::info!(batch = n + 1, of = batches, "processing batch");

            let mut tasks = JoinSet::new();
            for (idx, location) in batch.iter().cloned().enumerate() {
                let client = self.client.clone();
                let cache = self.cache.clone();
                let max_pages = self.config.max_pages;
                let mut params = profile.params.clone();
                if let Some(location) = &location {
                    params.insert("location".into(), Value::from(location.as_str()));
                }

                tasks.spawn(async move {
                    let fetched = Paginator::new(&client, cache.as_deref()).collect(params, max_pages).await?;
                    tracing::info!(
                        location = location.as_deref().unwrap_or("base query"),
                        records = fetched.len(),
                        "retrieved records"
                    );
                    Ok::<_, ListingError>((idx, fetched))
                });
            }

            let mut fetched = Vec::with_capacity(batch.len());
            while let Some(joined) = tasks.join_next().await {
                fetched.push(joined??);
            }
            fetched.sort_by_key(|(idx, _)| *idx);
            records.extend(fetched.into_iter().flat_map(|(_, batch_records)| batch_records));
        }

        if let Some(cache) = &self.cache {
            let stats = cache.stats();
            tracing::info!(hits = stats.hits, misses = stats.misses, hit_rate = stats.hit_rate, "cache stats");
        }
        tracing::info!(profile = %profile.name, records = records.len(), "total aggregated results");
        Ok(records)
    }
}

/// Shape fetched records into a frame ready for alignment.
fn build_frame(records: &[Record], units_key: &str, stamp: &str, unique_key_columns: &[String]) -> Frame {
    let mut frame = Frame::from_records(records, units_key);
    frame.normalize_columns();
    for (target, fallback) in UNIT_FALLBACK_COLUMNS {
        frame.fill_from_fallback(target, fallback);
    }
    frame.set_column(FRESHNESS_COLUMN, Cell::from(stamp));
    frame.uppercase_text();
    IdentityAssigner::default().assign(&mut frame, unique_key_columns);
    frame
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(value: Value) -> Record {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_build_frame_shapes_records() {
        let records = vec![
            record(json!({"detailUrl": "/b/1", "address": "1 Main St", "units": [{"price": "$1,650+", "beds": "1"}]})),
            record(json!({"detailUrl": "/b/2", "address": "2 Oak Ave", "units": []})),
        ];
        let frame = build_frame(&records, "units", "20240115", &["DETAILURL".to_string()]);

        assert_eq!(frame.get(0, "PRICE"), Some(&Cell::from("$1,650+")));
        assert_eq!(frame.get(0, "BEDS"), Some(&Cell::from("1")));
        assert!(frame.get(1, "PRICE").unwrap().is_blank());
        assert_eq!(frame.get(0, "ADDRESS"), Some(&Cell::from("1 MAIN ST")));
        assert_eq!(frame.get(1, "INGESTION_DATE"), Some(&Cell::from("20240115")));

        let first = frame.get(0, PRIMARY_KEY_COLUMN).unwrap();
        let second = frame.get(1, PRIMARY_KEY_COLUMN).unwrap();
        assert!(!first.is_blank());
        assert_ne!(first, second);
    }
}
