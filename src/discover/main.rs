//! One-shot venue discovery from the command line.
//!
//! Prints the `{count, venues}` response as pretty JSON on stdout; logs go to
//! stderr.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use tamarack::dispatch::{parse_bbox, DEFAULT_LIMIT};
use tamarack::{Config, DiscoveryRequest, DispatchController, PoiKind};

#[derive(Parser, Debug)]
#[command(name = "discover")]
#[command(about = "Discover venues for a place or bounding box")]
struct Args {
    /// Place name to geocode, e.g. "Paris" or "Lyon, France"
    #[arg(short, long, default_value = "")]
    place: String,

    /// Venue kind: restaurant, cafe, bar, historic, museum, park, attraction, viewpoint
    #[arg(short, long, default_value = "restaurant")]
    kind: PoiKind,

    #[arg(long)]
    cuisine: Option<String>,

    /// Only keep venues whose name contains this text
    #[arg(long)]
    name_contains: Option<String>,

    /// Exclude known chain brands
    #[arg(long)]
    local_only: bool,

    #[arg(short, long, default_value_t = DEFAULT_LIMIT)]
    limit: usize,

    /// Search area as west,south,east,north (skips geocoding)
    #[arg(long, value_parser = parse_bbox, allow_hyphen_values = true)]
    bbox: Option<[f64; 4]>,

    /// TOML config file; defaults plus environment keys when omitted
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Delete cache entries older than this many days, then exit
    #[arg(long, value_name = "DAYS")]
    prune_cache: Option<u64>,

    /// Also print the per-provider report to stderr
    #[arg(long)]
    report: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let config = match &args.config {
        Some(path) => Config::load_from_file(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => Config::from_env().context("Invalid default configuration")?,
    };

    let engine = DispatchController::from_config(&config)?;

    if let Some(days) = args.prune_cache {
        let removed = engine
            .cache()
            .prune(Duration::from_secs(days * 24 * 3600))
            .context("Failed to prune cache")?;
        info!("Removed {} cache entries older than {} days", removed, days);
        return Ok(());
    }

    let request = DiscoveryRequest {
        place: args.place,
        poi_kind: args.kind,
        cuisine: args.cuisine,
        name_contains: args.name_contains,
        local_only: args.local_only,
        limit: args.limit,
        bbox: args.bbox,
    };

    let (response, report) = engine.discover_with_report(&request).await?;

    if report.all_providers_failed() {
        warn!("Every provider failed; the result is empty");
    }
    if args.report {
        eprintln!("{}", serde_json::to_string_pretty(&report)?);
    }
    println!("{}", serde_json::to_string_pretty(&response)?);

    Ok(())
}
