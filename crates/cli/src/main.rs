//! rentscout entry point.
//!
//! Fetches listing profiles through one shared limiter and cache, persists
//! them to SQLite and exports a CSV per profile. Logs go to stderr.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use rentscout_client::{AdaptiveLimiter, ListingClient, ListingConfig, Pipeline, ReqwestTransport};
use rentscout_core::{AppConfig, RequestCache, Store};
use tracing_subscriber::EnvFilter;

/// Ingest property listings into SQLite and CSV.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// TOML configuration file
    #[arg(long, env = "RENTSCOUT_CONFIG_FILE")]
    config: Option<PathBuf>,

    /// Profile to run; repeat for several (default: all configured)
    #[arg(long = "profile")]
    profiles: Vec<String>,

    /// Semicolon-separated locations, overriding configuration
    #[arg(long)]
    locations: Option<String>,

    /// Page ceiling per location, overriding configuration
    #[arg(long)]
    max_pages: Option<u32>,

    /// Emit logs as JSON
    #[arg(long)]
    json: bool,
}

fn init_logging(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();
    init_logging(args.json);

    let mut config = AppConfig::load(args.config.as_deref())?;
    if let Some(locations) = args.locations {
        config.locations = locations;
    }
    if let Some(max_pages) = args.max_pages {
        config.max_pages = max_pages;
    }
    config.validate()?;

    let profiles = if args.profiles.is_empty() {
        config.profiles.clone()
    } else {
        args.profiles
            .iter()
            .map(|name| config.profile(name).cloned().with_context(|| format!("unknown profile: {name}")))
            .collect::<Result<Vec<_>>>()?
    };

    let transport = Arc::new(ReqwestTransport::new()?);
    let limiter = Arc::new(AdaptiveLimiter::new(config.limiter.clone()));
    let client = ListingClient::new(ListingConfig::from_app(&config)?, transport, Arc::clone(&limiter));
    let store = Store::open(&config.db_path).await?;
    let config = Arc::new(config);

    let mut pipeline = Pipeline::new(client, store, Arc::clone(&config));
    if config.cache.enabled {
        pipeline = pipeline.with_cache(Arc::new(RequestCache::from_config(&config.cache)));
    }

    let stamp = chrono::Local::now().format("%Y%m%d").to_string();
    for profile in &profiles {
        let report = pipeline.run(profile, &stamp).await.with_context(|| format!("{} pipeline failed", profile.name))?;
        tracing::info!(
            profile = %report.profile,
            table = %report.table,
            fetched = report.records_fetched,
            inserted = report.inserted,
            updated = report.updated,
            csv = ?report.csv_path,
            "pipeline completed"
        );
    }

    let stats = limiter.stats();
    tracing::info!(rate = stats.rate, retries = stats.total_retries, "all pipelines completed");
    Ok(())
}
