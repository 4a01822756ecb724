//! Application configuration with layered loading.
//!
//! This module provides configuration management using figment for layered
//! configuration loading from multiple sources:
//!
//! 1. Environment variables (RENTSCOUT_*)
//! 2. TOML config file (if RENTSCOUT_CONFIG_FILE set)
//! 3. Built-in defaults

use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

mod limits;
mod validation;

pub use limits::{CacheConfig, LimiterConfig};
pub use validation::ConfigError;

/// One listing type to ingest: its query parameters and destination table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListingProfile {
    /// Short name used to select the profile on the command line.
    pub name: String,
    /// Destination table.
    pub table_name: String,
    /// Prefix of the CSV export file name.
    pub csv_prefix: String,
    /// Natural-key columns that identify a listing.
    pub unique_key_columns: Vec<String>,
    /// Base query parameters sent with every page request.
    #[serde(default)]
    pub params: Map<String, Value>,
}

impl ListingProfile {
    /// Rental listings keyed by their detail URL.
    pub fn rent() -> Self {
        Self {
            name: "rent".into(),
            table_name: "NashvilleRents01".into(),
            csv_prefix: "nsh-rent".into(),
            unique_key_columns: vec!["DETAILURL".into()],
            params: object(json!({
                "status_type": "ForRent",
                "rentMinPrice": 1600,
                "rentMaxPrice": 3300,
                "bedsMin": 1,
                "bedsMax": 4,
                "sqftMin": 700,
                "sqftMax": 3500
            })),
        }
    }

    /// For-sale listings keyed by address.
    pub fn for_sale() -> Self {
        Self {
            name: "forsale".into(),
            table_name: "NashvilleForSale01".into(),
            csv_prefix: "nsh-forsale".into(),
            unique_key_columns: vec!["ADDRESS".into()],
            params: object(json!({
                "status_type": "ForSale",
                "minPrice": 200000,
                "maxPrice": 800000,
                "bedsMin": 2,
                "bedsMax": 5
            })),
        }
    }
}

fn object(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

/// Application configuration with layered loading.
///
/// Loading precedence (highest wins):
/// 1. Environment variables (RENTSCOUT_*)
/// 2. TOML config file (if RENTSCOUT_CONFIG_FILE set)
/// 3. Built-in defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Listing API key.
    ///
    /// Set via RENTSCOUT_API_KEY (or RAPIDAPI_KEY). Required only when fetching.
    #[serde(default)]
    pub api_key: Option<String>,

    /// Listing search endpoint.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Value of the API host header.
    #[serde(default = "default_api_host")]
    pub api_host: String,

    /// Path to the SQLite listings database.
    ///
    /// Set via RENTSCOUT_DB_PATH environment variable.
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    /// Path to the CSV schema source.
    #[serde(default = "default_schema_path")]
    pub schema_path: PathBuf,

    /// Directory receiving CSV exports.
    #[serde(default = "default_export_dir")]
    pub export_dir: PathBuf,

    /// HTTP request timeout in milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Page ceiling per location.
    #[serde(default = "default_max_pages")]
    pub max_pages: u32,

    /// Locations fetched concurrently per batch.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Semicolon-separated locations; empty runs the base query once.
    #[serde(default)]
    pub locations: String,

    /// Record key holding the per-unit sub-entity list.
    #[serde(default = "default_units_key")]
    pub units_key: String,

    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub limiter: LimiterConfig,

    #[serde(default = "default_profiles")]
    pub profiles: Vec<ListingProfile>,
}

fn default_base_url() -> String {
    "https://zillow-com1.p.rapidapi.com/propertyExtendedSearch".into()
}

fn default_api_host() -> String {
    "zillow-com1.p.rapidapi.com".into()
}

fn default_db_path() -> PathBuf {
    PathBuf::from("./rentscout.sqlite")
}

fn default_schema_path() -> PathBuf {
    PathBuf::from("./schema/listing-schema.csv")
}

fn default_export_dir() -> PathBuf {
    PathBuf::from("./exports")
}

fn default_timeout_ms() -> u64 {
    30_000
}

fn default_max_pages() -> u32 {
    10
}

fn default_batch_size() -> usize {
    5
}

fn default_units_key() -> String {
    "units".into()
}

fn default_profiles() -> Vec<ListingProfile> {
    vec![ListingProfile::rent(), ListingProfile::for_sale()]
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: default_base_url(),
            api_host: default_api_host(),
            db_path: default_db_path(),
            schema_path: default_schema_path(),
            export_dir: default_export_dir(),
            timeout_ms: default_timeout_ms(),
            max_pages: default_max_pages(),
            batch_size: default_batch_size(),
            locations: String::new(),
            units_key: default_units_key(),
            cache: CacheConfig::default(),
            limiter: LimiterConfig::default(),
            profiles: default_profiles(),
        }
    }
}

impl AppConfig {
    /// Timeout as Duration for use with reqwest/tokio.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Load configuration from all sources with layered precedence.
    ///
    /// Priority (highest wins):
    /// 1. Environment variables prefixed with `RENTSCOUT_`
    /// 2. TOML file from `config_file`, or `RENTSCOUT_CONFIG_FILE` when `None`
    /// 3. Built-in defaults via `Default::default()`
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if:
    /// - Configuration file cannot be read
    /// - Environment variables cannot be parsed
    /// - Validation fails after loading
    pub fn load(config_file: Option<&Path>) -> Result<Self, ConfigError> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));

        let config_path = config_file
            .map(Path::to_path_buf)
            .or_else(|| std::env::var_os("RENTSCOUT_CONFIG_FILE").map(PathBuf::from));
        if let Some(path) = config_path {
            figment = figment.merge(Toml::file(path));
        }

        figment = figment.merge(
            Env::prefixed("RENTSCOUT_")
                .ignore(&["CONFIG_FILE"])
                .map(|key| key.as_str().to_lowercase().into())
                .split("__"),
        );

        let mut config: Self = figment.extract().map_err(|e| ConfigError::LoadFailed(e.to_string()))?;

        if config.api_key.is_none() {
            config.api_key = std::env::var("RAPIDAPI_KEY").ok().filter(|key| !key.trim().is_empty());
        }

        config.validate()?;

        Ok(config)
    }

    /// Check if the API key is available (for deferred validation).
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Missing` if the API key is not set.
    pub fn require_api_key(&self) -> Result<&str, ConfigError> {
        self.api_key.as_deref().ok_or_else(|| ConfigError::Missing {
            field: "api_key".into(),
            hint: "Set RENTSCOUT_API_KEY or RAPIDAPI_KEY environment variable".into(),
        })
    }

    /// Find a configured profile by name.
    pub fn profile(&self, name: &str) -> Option<&ListingProfile> {
        self.profiles.iter().find(|p| p.name.eq_ignore_ascii_case(name))
    }
}
