//! Discovery fan-out: geocode, run every adapter under one deadline, merge, rank.
//!
//! Provider failures never surface as errors. A provider that fails or misses
//! the deadline contributes nothing and is recorded in the [`DiscoveryReport`].

use anyhow::Context;
use serde::{Deserialize, Deserializer, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::cache::CacheStore;
use crate::config::Config;
use crate::dedupe::DedupeEngine;
use crate::error::DiscoveryError;
use crate::geocode::GeocodeResolver;
use crate::http::HttpClient;
use crate::models::{BBox, Filter, GeocodeResult, Poi, PoiKind, Provider};
use crate::providers::{
    build_adapters, run_cached, CachePolicy, ProviderAdapter, ProviderOutcome, ProviderQuery,
};
use crate::ranking::RankingEngine;

pub const DEFAULT_LIMIT: usize = 10;

/// `max(20 × limit, 600)`: candidates kept before dedupe
pub fn pool_cap(limit: usize) -> usize {
    limit.saturating_mul(20).max(600)
}

/// Parse `"west,south,east,north"`
pub fn parse_bbox(raw: &str) -> Result<[f64; 4], String> {
    let values = raw
        .split(',')
        .map(|v| v.trim().parse::<f64>())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| format!("invalid bbox '{}': {}", raw, e))?;
    <[f64; 4]>::try_from(values)
        .map_err(|v| format!("bbox needs 4 values (west,south,east,north), got {}", v.len()))
}

fn deserialize_kind<'de, D>(deserializer: D) -> Result<PoiKind, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    raw.parse().map_err(serde::de::Error::custom)
}

fn default_limit() -> usize {
    DEFAULT_LIMIT
}

/// One discovery as callers send it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveryRequest {
    #[serde(default)]
    pub place: String,

    #[serde(default, deserialize_with = "deserialize_kind")]
    pub poi_kind: PoiKind,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cuisine: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name_contains: Option<String>,

    #[serde(default)]
    pub local_only: bool,

    #[serde(default = "default_limit")]
    pub limit: usize,

    /// `[west, south, east, north]`; skips geocoding when present
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bbox: Option<[f64; 4]>,
}

impl DiscoveryRequest {
    pub fn new(place: impl Into<String>, poi_kind: PoiKind) -> Self {
        Self {
            place: place.into(),
            poi_kind,
            cuisine: None,
            name_contains: None,
            local_only: false,
            limit: DEFAULT_LIMIT,
            bbox: None,
        }
    }

    pub fn with_cuisine(mut self, cuisine: impl Into<String>) -> Self {
        self.cuisine = Some(cuisine.into());
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_bbox(mut self, bbox: [f64; 4]) -> Self {
        self.bbox = Some(bbox);
        self
    }

    pub fn filter(&self) -> Filter {
        Filter {
            kind: self.poi_kind,
            cuisine: self.cuisine.clone().filter(|c| !c.trim().is_empty()),
            name_contains: self.name_contains.clone().filter(|n| !n.trim().is_empty()),
            local_only: self.local_only,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DiscoveryResponse {
    pub count: usize,
    pub venues: Vec<Poi>,
}

impl DiscoveryResponse {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn from_venues(venues: Vec<Poi>) -> Self {
        Self {
            count: venues.len(),
            venues,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProviderStatus {
    pub provider: Provider,
    #[serde(flatten)]
    pub outcome: ProviderOutcome,
}

/// What happened during one discovery
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveryReport {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bbox: Option<BBox>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub geocode: Option<GeocodeResult>,
    pub providers: Vec<ProviderStatus>,
    /// Candidates handed to dedupe
    pub candidates: usize,
    /// Venues left after dedupe, before truncation
    pub merged: usize,
    pub elapsed_ms: u64,
}

impl DiscoveryReport {
    /// Every provider failed or timed out with no cache fallback
    pub fn all_providers_failed(&self) -> bool {
        !self.providers.is_empty() && self.providers.iter().all(|p| p.outcome.is_failure())
    }

    pub fn outcome(&self, provider: Provider) -> Option<&ProviderOutcome> {
        self.providers
            .iter()
            .find(|p| p.provider == provider)
            .map(|p| &p.outcome)
    }
}

pub struct DispatchController {
    adapters: Vec<Arc<dyn ProviderAdapter>>,
    resolver: Arc<GeocodeResolver>,
    cache: Arc<CacheStore>,
    policy: CachePolicy,
    overall_timeout: Duration,
    worker_pool_size: usize,
    dedupe: DedupeEngine,
    ranking: RankingEngine,
}

impl DispatchController {
    pub fn new(
        config: &Config,
        adapters: Vec<Arc<dyn ProviderAdapter>>,
        resolver: Arc<GeocodeResolver>,
        cache: Arc<CacheStore>,
    ) -> Self {
        Self {
            adapters,
            resolver,
            cache,
            policy: CachePolicy::from_config(config),
            overall_timeout: config.overall_timeout(),
            worker_pool_size: config.engine.worker_pool_size.max(1),
            dedupe: DedupeEngine::default(),
            ranking: RankingEngine,
        }
    }

    /// Full engine from configuration: shared HTTP client, cache, geocoder and
    /// every enabled adapter
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let http = HttpClient::new(&config.http).context("Failed to build HTTP client")?;
        let cache = Arc::new(
            CacheStore::from_config(&config.cache)
                .with_context(|| format!("Failed to open cache at {}", config.cache.dir.display()))?,
        );
        let resolver = Arc::new(GeocodeResolver::new(config, http.clone(), Arc::clone(&cache)));
        let adapters = build_adapters(config, &http);
        info!(
            "Discovery engine ready with {} provider(s): {}",
            adapters.len(),
            adapters
                .iter()
                .map(|a| a.provider().as_str())
                .collect::<Vec<_>>()
                .join(", ")
        );
        Ok(Self::new(config, adapters, resolver, cache))
    }

    pub fn with_timeout(mut self, overall_timeout: Duration) -> Self {
        self.overall_timeout = overall_timeout;
        self
    }

    pub fn overall_timeout(&self) -> Duration {
        self.overall_timeout
    }

    pub fn adapters(&self) -> &[Arc<dyn ProviderAdapter>] {
        &self.adapters
    }

    pub fn cache(&self) -> &CacheStore {
        &self.cache
    }

    pub async fn discover(
        &self,
        request: &DiscoveryRequest,
    ) -> Result<DiscoveryResponse, DiscoveryError> {
        self.discover_with_report(request)
            .await
            .map(|(response, _)| response)
    }

    #[instrument(skip_all, fields(place = %request.place, kind = %request.poi_kind, limit = request.limit))]
    pub async fn discover_with_report(
        &self,
        request: &DiscoveryRequest,
    ) -> Result<(DiscoveryResponse, DiscoveryReport), DiscoveryError> {
        let started = Instant::now();
        let deadline = started + self.overall_timeout;
        let mut report = DiscoveryReport::default();

        if request.limit == 0 {
            return Err(DiscoveryError::InvalidLimit);
        }
        let place = request.place.trim();
        let cancel = CancellationToken::new();

        let bbox = match request.bbox {
            Some(bbox) => BBox::try_from(bbox)?,
            None if place.is_empty() => return Err(DiscoveryError::NoLocation),
            None => {
                let resolved =
                    tokio::time::timeout_at(deadline, self.resolver.geocode(place, &cancel)).await;
                let area = match resolved {
                    Ok(Some(result)) => {
                        let area = result.search_area();
                        report.geocode = Some(result);
                        area
                    }
                    Ok(None) => None,
                    Err(_) => {
                        cancel.cancel();
                        warn!("Geocoding '{}' did not finish before the deadline", place);
                        None
                    }
                };
                match area {
                    Some(area) => area,
                    None => {
                        warn!("No location found for '{}', returning no results", place);
                        report.elapsed_ms = elapsed_ms(started);
                        return Ok((DiscoveryResponse::empty(), report));
                    }
                }
            }
        };
        report.bbox = Some(bbox);

        let mut query = ProviderQuery::new(bbox, request.filter(), request.limit);
        if !place.is_empty() {
            query = query.with_place(place);
        }

        let (batches, outcomes) = self.fan_out(Arc::new(query), deadline, &cancel).await;
        report.providers = self
            .adapters
            .iter()
            .zip(outcomes)
            .map(|(adapter, outcome)| ProviderStatus {
                provider: adapter.provider(),
                outcome,
            })
            .collect();

        let candidates: Vec<Poi> = batches
            .into_iter()
            .flatten()
            .take(pool_cap(request.limit))
            .collect();
        report.candidates = candidates.len();

        let merged = self.dedupe.merge(candidates);
        report.merged = merged.len();
        let venues = self.ranking.rank(merged, request.limit);
        report.elapsed_ms = elapsed_ms(started);

        if report.all_providers_failed() {
            warn!("All providers failed or timed out");
        }
        info!(
            candidates = report.candidates,
            merged = report.merged,
            returned = venues.len(),
            elapsed_ms = report.elapsed_ms,
            "Discovery finished"
        );

        Ok((DiscoveryResponse::from_venues(venues), report))
    }

    /// Run every adapter on the worker pool until all finish or `deadline` passes.
    ///
    /// Returns per-adapter batches in adapter order, and one outcome per adapter.
    async fn fan_out(
        &self,
        query: Arc<ProviderQuery>,
        deadline: Instant,
        cancel: &CancellationToken,
    ) -> (Vec<Vec<Poi>>, Vec<ProviderOutcome>) {
        let permits = Arc::new(Semaphore::new(self.worker_pool_size));
        let mut tasks = JoinSet::new();

        for (idx, adapter) in self.adapters.iter().enumerate() {
            let adapter = Arc::clone(adapter);
            let query = Arc::clone(&query);
            let cache = Arc::clone(&self.cache);
            let permits = Arc::clone(&permits);
            let token = cancel.child_token();
            let policy = self.policy;

            tasks.spawn(async move {
                let _permit = tokio::select! {
                    permit = permits.acquire_owned() => match permit {
                        Ok(permit) => permit,
                        Err(_) => {
                            let reason = "worker pool closed".to_string();
                            return (idx, Vec::new(), ProviderOutcome::Failed { reason });
                        }
                    },
                    _ = token.cancelled() => return (idx, Vec::new(), ProviderOutcome::TimedOut),
                };
                let (pois, outcome) =
                    run_cached(adapter.as_ref(), &query, &cache, policy, &token).await;
                (idx, pois, outcome)
            });
        }

        let mut batches: Vec<Vec<Poi>> = vec![Vec::new(); self.adapters.len()];
        let mut outcomes: Vec<Option<ProviderOutcome>> = vec![None; self.adapters.len()];
        let mut timed_out = false;

        loop {
            tokio::select! {
                joined = tasks.join_next() => match joined {
                    Some(Ok((idx, pois, outcome))) => {
                        debug!(provider = %self.adapters[idx].provider(), ?outcome, "Provider finished");
                        batches[idx] = pois;
                        outcomes[idx] = Some(outcome);
                    }
                    Some(Err(e)) => warn!("Provider task failed: {}", e),
                    None => break,
                },
                _ = tokio::time::sleep_until(deadline) => {
                    timed_out = true;
                    break;
                }
            }
        }

        if timed_out {
            cancel.cancel();
            for (idx, outcome) in outcomes.iter().enumerate() {
                if outcome.is_none() {
                    warn!(
                        provider = %self.adapters[idx].provider(),
                        "Provider did not finish within {:?}, dropping it",
                        self.overall_timeout
                    );
                }
            }
        }
        tasks.abort_all();

        let outcomes = outcomes
            .into_iter()
            .map(|outcome| match outcome {
                Some(outcome) => outcome,
                None if timed_out => ProviderOutcome::TimedOut,
                None => ProviderOutcome::Failed {
                    reason: "provider task aborted".to_string(),
                },
            })
            .collect();

        (batches, outcomes)
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}
