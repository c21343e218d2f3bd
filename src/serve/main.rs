//! HTTP server for venue discovery.
//!
//! `GET /v1/discover` takes query-string parameters, `POST /v1/discover` the
//! same request as a JSON body. Both answer `{count, venues}`.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::Json,
    routing::get,
    Router,
};
use clap::Parser;
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use tamarack::dispatch::{parse_bbox, DEFAULT_LIMIT};
use tamarack::{Config, DiscoveryRequest, DiscoveryResponse, DispatchController, PoiKind};

/// Upper bound on `limit` accepted over HTTP
const MAX_LIMIT: usize = 100;

#[derive(Parser, Debug)]
#[command(name = "serve")]
#[command(about = "Venue discovery server")]
struct Args {
    /// Listen address
    #[arg(short, long, default_value = "0.0.0.0:3000")]
    listen: String,

    /// TOML config file; defaults plus environment keys when omitted
    #[arg(short, long)]
    config: Option<PathBuf>,
}

struct AppState {
    engine: DispatchController,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();

    let config = match &args.config {
        Some(path) => Config::load_from_file(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => Config::from_env().context("Invalid default configuration")?,
    };

    info!("Tamarack discovery server");
    let engine = DispatchController::from_config(&config)?;
    info!(
        "Overall provider deadline {:?}, cache at {}",
        engine.overall_timeout(),
        engine.cache().dir().display()
    );

    let state = Arc::new(AppState { engine });

    let app = Router::new()
        .route("/health", get(health_handler))
        .route("/v1/discover", get(discover_get_handler).post(discover_post_handler))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    info!("Starting server on {}", args.listen);

    let listener = tokio::net::TcpListener::bind(&args.listen)
        .await
        .with_context(|| format!("Failed to bind {}", args.listen))?;
    axum::serve(listener, app).await?;

    Ok(())
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    providers: Vec<&'static str>,
    cached_extents: usize,
}

async fn health_handler(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        providers: state
            .engine
            .adapters()
            .iter()
            .map(|a| a.provider().as_str())
            .collect(),
        cached_extents: state.engine.cache().indexed_extents(),
    })
}

/// Query-string form of [`DiscoveryRequest`]; `bbox` is `west,south,east,north`
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct DiscoverQueryParams {
    #[serde(default)]
    place: String,
    poi_kind: Option<String>,
    cuisine: Option<String>,
    name_contains: Option<String>,
    #[serde(default)]
    local_only: bool,
    limit: Option<usize>,
    bbox: Option<String>,
}

impl DiscoverQueryParams {
    fn into_request(self) -> Result<DiscoveryRequest, String> {
        let poi_kind: PoiKind = match self.poi_kind.as_deref() {
            Some(kind) => kind.parse()?,
            None => Default::default(),
        };
        let bbox = self.bbox.as_deref().map(parse_bbox).transpose()?;
        Ok(DiscoveryRequest {
            place: self.place,
            poi_kind,
            cuisine: self.cuisine,
            name_contains: self.name_contains,
            local_only: self.local_only,
            limit: self.limit.unwrap_or(DEFAULT_LIMIT),
            bbox,
        })
    }
}

async fn discover_get_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<DiscoverQueryParams>,
) -> Result<Json<DiscoveryResponse>, (StatusCode, String)> {
    let request = params
        .into_request()
        .map_err(|e| (StatusCode::BAD_REQUEST, e))?;
    run_discovery(&state, request).await
}

async fn discover_post_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<DiscoveryRequest>,
) -> Result<Json<DiscoveryResponse>, (StatusCode, String)> {
    run_discovery(&state, request).await
}

async fn run_discovery(
    state: &AppState,
    mut request: DiscoveryRequest,
) -> Result<Json<DiscoveryResponse>, (StatusCode, String)> {
    request.limit = request.limit.min(MAX_LIMIT);

    match state.engine.discover_with_report(&request).await {
        Ok((response, report)) => {
            info!(
                count = response.count,
                candidates = report.candidates,
                elapsed_ms = report.elapsed_ms,
                "Discovery for '{}' complete",
                request.place
            );
            Ok(Json(response))
        }
        Err(e) => {
            warn!("Rejected discovery request: {}", e);
            Err((StatusCode::BAD_REQUEST, e.to_string()))
        }
    }
}
