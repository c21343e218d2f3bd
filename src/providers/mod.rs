//! Provider adapters: one per upstream POI source.
//!
//! Adapters only know how to build a native query and map the native
//! response. Caching, rate limiting, fallbacks, filtering and capping are
//! applied uniformly by [`run_cached`].

pub mod opentripmap;
pub mod overpass;
pub mod places;
pub mod websearch;

use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cache::{CacheHit, CacheKey, CacheStore};
use crate::config::{Config, ProviderSettings};
use crate::error::ProviderError;
use crate::http::HttpClient;
use crate::models::{BBox, Filter, Poi, Provider};

pub use opentripmap::OpenTripMapAdapter;
pub use overpass::OverpassAdapter;
pub use places::PlacesAdapter;
pub use websearch::WebSearchAdapter;

/// Everything an adapter gets for one discovery
#[derive(Debug, Clone)]
pub struct ProviderQuery {
    pub bbox: BBox,
    pub filter: Filter,
    /// Place name as the caller typed it, for text-based upstreams
    pub place: Option<String>,
    pub limit: usize,
}

impl ProviderQuery {
    pub fn new(bbox: BBox, filter: Filter, limit: usize) -> Self {
        Self {
            bbox,
            filter,
            place: None,
            limit,
        }
    }

    pub fn with_place(mut self, place: impl Into<String>) -> Self {
        self.place = Some(place.into());
        self
    }

    /// Most results one adapter may hand to dedupe
    pub fn cap(&self) -> usize {
        adapter_cap(self.limit)
    }
}

/// `max(10 × limit, 200)`
pub fn adapter_cap(limit: usize) -> usize {
    limit.saturating_mul(10).max(200)
}

#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    fn provider(&self) -> Provider;

    /// The exact provider-native query; its hash is the cache key
    fn canonical_query(&self, query: &ProviderQuery) -> String;

    /// Live call(s) to the upstream. Must return promptly once `cancel` fires.
    async fn discover(
        &self,
        query: &ProviderQuery,
        cancel: &CancellationToken,
    ) -> Result<Vec<Poi>, ProviderError>;

    /// Minimum interval between live calls, shared by every process using the cache
    fn rate_limit_interval(&self) -> Duration {
        Duration::ZERO
    }
}

/// A native upstream record, one variant per provider
#[derive(Debug, Clone)]
pub enum ProviderRecord {
    Osm(overpass::OverpassElement),
    Places(places::PlaceResult),
    Otm(opentripmap::OtmPlace),
    Web(websearch::WebResult),
}

impl ProviderRecord {
    pub fn provider(&self) -> Provider {
        match self {
            ProviderRecord::Osm(_) => Provider::Osm,
            ProviderRecord::Places(_) => Provider::Places,
            ProviderRecord::Otm(_) => Provider::Otm,
            ProviderRecord::Web(_) => Provider::Web,
        }
    }

    /// Map into the unified record; `None` when the record has no usable name
    pub fn into_poi(self) -> Option<Poi> {
        let raw = self.raw();
        let mut poi = match self {
            ProviderRecord::Osm(r) => r.into_poi(),
            ProviderRecord::Places(r) => r.into_poi(),
            ProviderRecord::Otm(r) => r.into_poi(),
            ProviderRecord::Web(r) => r.into_poi(),
        }?;
        poi.raw = raw;
        Some(poi)
    }

    fn raw(&self) -> serde_json::Value {
        let value = match self {
            ProviderRecord::Osm(r) => serde_json::to_value(r),
            ProviderRecord::Places(r) => serde_json::to_value(r),
            ProviderRecord::Otm(r) => serde_json::to_value(r),
            ProviderRecord::Web(r) => serde_json::to_value(r),
        };
        value.unwrap_or(serde_json::Value::Null)
    }
}

/// Map a batch of native records, dropping the unusable ones
pub fn records_into_pois<I>(records: I) -> Vec<Poi>
where
    I: IntoIterator<Item = ProviderRecord>,
{
    records.into_iter().filter_map(ProviderRecord::into_poi).collect()
}

/// How one provider contributed to a discovery
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ProviderOutcome {
    /// Live call succeeded
    Ok { count: usize },
    /// Fresh cache entry for the same query
    Cached { count: usize },
    /// Live call failed, expired entry for the same query used
    Stale { count: usize },
    /// Live call failed, a recent overlapping result set was filtered to the bbox
    Overlap { count: usize },
    Failed { reason: String },
    TimedOut,
}

impl ProviderOutcome {
    pub fn count(&self) -> usize {
        match self {
            ProviderOutcome::Ok { count }
            | ProviderOutcome::Cached { count }
            | ProviderOutcome::Stale { count }
            | ProviderOutcome::Overlap { count } => *count,
            ProviderOutcome::Failed { .. } | ProviderOutcome::TimedOut => 0,
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, ProviderOutcome::Failed { .. } | ProviderOutcome::TimedOut)
    }
}

/// Cache and fallback policy shared by every adapter
#[derive(Debug, Clone, Copy)]
pub struct CachePolicy {
    pub overlap_max_age: Duration,
}

impl CachePolicy {
    pub fn from_config(config: &Config) -> Self {
        Self {
            overlap_max_age: Duration::from_secs(config.cache.overlap_max_age_secs),
        }
    }
}

impl Default for CachePolicy {
    fn default() -> Self {
        Self {
            overlap_max_age: Duration::from_secs(7 * 24 * 3600),
        }
    }
}

/// Run one adapter through the cache.
///
/// Fresh entry → rate limit → live call → (on failure) stale entry for the same
/// query → freshest overlapping entry no older than `overlap_max_age`, filtered
/// to the bbox → nothing. Every path ends with `Filter::admits` and the cap.
pub async fn run_cached(
    adapter: &dyn ProviderAdapter,
    query: &ProviderQuery,
    cache: &CacheStore,
    policy: CachePolicy,
    cancel: &CancellationToken,
) -> (Vec<Poi>, ProviderOutcome) {
    let provider = adapter.provider();
    let key = CacheKey::new(
        provider.as_str(),
        query.filter.scope(),
        adapter.canonical_query(query),
    );

    if let Some(hit) = cache.get_fresh(&key).await {
        if let Some(pois) = decode_hit(provider, hit) {
            let pois = finish(pois, query);
            debug!(provider = %provider, count = pois.len(), "Fresh cache hit");
            let count = pois.len();
            return (pois, ProviderOutcome::Cached { count });
        }
    }

    let live = match cache
        .rate_limiter(provider.as_str(), adapter.rate_limit_interval())
        .wait_turn(cancel)
        .await
    {
        Ok(()) => adapter.discover(query, cancel).await,
        Err(e) => Err(e),
    };

    let error = match live {
        Ok(pois) => {
            let extent = BBox::extent_of(
                pois.iter()
                    .filter(|p| p.has_coordinates())
                    .map(|p| (p.lat, p.lon)),
            );
            match serde_json::to_value(&pois) {
                Ok(payload) => {
                    if let Err(e) = cache.put(&key, payload, extent).await {
                        warn!(provider = %provider, "Failed to cache results: {}", e);
                    }
                }
                Err(e) => warn!(provider = %provider, "Failed to serialize results: {}", e),
            }
            let pois = finish(pois, query);
            info!(provider = %provider, count = pois.len(), "Live results");
            let count = pois.len();
            return (pois, ProviderOutcome::Ok { count });
        }
        Err(e) => e,
    };

    if matches!(error, ProviderError::Cancelled) {
        debug!(provider = %provider, "Cancelled before completing");
        return (Vec::new(), ProviderOutcome::TimedOut);
    }
    warn!(provider = %provider, "Live call failed: {}", error);

    if let Some(hit) = cache.get(&key).await {
        if let Some(pois) = decode_hit(provider, hit) {
            let pois = finish(pois, query);
            info!(provider = %provider, count = pois.len(), "Serving stale cache entry");
            let count = pois.len();
            return (pois, ProviderOutcome::Stale { count });
        }
    }

    if let Some(hit) = cache
        .find_overlapping(provider.as_str(), &query.filter.scope(), &query.bbox, policy.overlap_max_age)
        .await
    {
        if let Some(pois) = decode_hit(provider, hit) {
            let inside: Vec<Poi> = pois
                .into_iter()
                .filter(|p| p.has_coordinates() && query.bbox.contains(p.lat, p.lon))
                .collect();
            let pois = finish(inside, query);
            info!(provider = %provider, count = pois.len(), "Serving overlapping cache entry");
            let count = pois.len();
            return (pois, ProviderOutcome::Overlap { count });
        }
    }

    (
        Vec::new(),
        ProviderOutcome::Failed {
            reason: error.to_string(),
        },
    )
}

fn decode_hit(provider: Provider, hit: CacheHit) -> Option<Vec<Poi>> {
    match serde_json::from_value::<Vec<Poi>>(hit.payload) {
        Ok(pois) => Some(pois),
        Err(e) => {
            warn!(provider = %provider, "Ignoring malformed cached payload: {}", e);
            None
        }
    }
}

/// Apply the filter and the per-adapter cap
fn finish(pois: Vec<Poi>, query: &ProviderQuery) -> Vec<Poi> {
    pois.into_iter()
        .filter(|p| query.filter.admits(p))
        .take(query.cap())
        .collect()
}

/// Adapters enabled by `config`. Keyed upstreams without a key are skipped.
/// API key for an enabled keyed provider
fn required_key(settings: &ProviderSettings, provider: Provider) -> Result<&str, ProviderError> {
    settings.key().ok_or(ProviderError::MissingApiKey(provider))
}

pub fn build_adapters(config: &Config, http: &HttpClient) -> Vec<Arc<dyn ProviderAdapter>> {
    let providers = &config.providers;
    let mut adapters: Vec<Arc<dyn ProviderAdapter>> = Vec::new();

    if providers.overpass.enabled {
        adapters.push(Arc::new(OverpassAdapter::new(
            http.clone(),
            providers.overpass.endpoint_or(overpass::DEFAULT_ENDPOINT),
            providers
                .overpass
                .interval_or(config.default_rate_limit_interval()),
        )));
    }

    if providers.places.enabled {
        match required_key(&providers.places, Provider::Places) {
            Ok(key) => adapters.push(Arc::new(PlacesAdapter::new(
                http.clone(),
                providers.places.endpoint_or(places::DEFAULT_ENDPOINT),
                key,
                Duration::from_millis(config.engine.detail_delay_ms),
                providers.places.interval_or(Duration::ZERO),
            ))),
            Err(e) => info!("Skipping places adapter: {}", e),
        }
    }

    if providers.opentripmap.enabled {
        match required_key(&providers.opentripmap, Provider::Otm) {
            Ok(key) => adapters.push(Arc::new(OpenTripMapAdapter::new(
                http.clone(),
                providers.opentripmap.endpoint_or(opentripmap::DEFAULT_ENDPOINT),
                key,
                config.engine.detail_concurrency,
                Duration::from_millis(config.engine.detail_delay_ms),
                providers.opentripmap.interval_or(Duration::ZERO),
            ))),
            Err(e) => info!("Skipping otm adapter: {}", e),
        }
    }

    if providers.websearch.enabled {
        match required_key(&providers.websearch, Provider::Web) {
            Ok(key) => adapters.push(Arc::new(WebSearchAdapter::new(
                http.clone(),
                providers.websearch.endpoint_or(websearch::DEFAULT_ENDPOINT),
                key,
                providers
                    .websearch
                    .interval_or(websearch::DEFAULT_INTERVAL),
            ))),
            Err(e) => info!("Skipping web adapter: {}", e),
        }
    }

    adapters
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheEntry;
    use crate::models::PoiKind;
    use chrono::Utc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    struct FixedAdapter {
        result: Result<Vec<Poi>, ()>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ProviderAdapter for FixedAdapter {
        fn provider(&self) -> Provider {
            Provider::Osm
        }

        fn canonical_query(&self, query: &ProviderQuery) -> String {
            format!("fixed {} {}", query.filter.kind, query.bbox)
        }

        async fn discover(
            &self,
            _query: &ProviderQuery,
            _cancel: &CancellationToken,
        ) -> Result<Vec<Poi>, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.result
                .clone()
                .map_err(|_| ProviderError::Status { status: 503, body: String::new() })
        }
    }

    fn adapter(result: Result<Vec<Poi>, ()>) -> FixedAdapter {
        FixedAdapter {
            result,
            calls: AtomicUsize::new(0),
        }
    }

    fn venue(name: &str, lat: f64, lon: f64) -> Poi {
        Poi::new(Provider::Osm, name).with_coordinates(lat, lon)
    }

    fn paris() -> BBox {
        BBox::new(2.22, 48.81, 2.47, 48.90).unwrap()
    }

    #[test]
    fn test_adapter_cap() {
        assert_eq!(adapter_cap(5), 200);
        assert_eq!(adapter_cap(20), 200);
        assert_eq!(adapter_cap(50), 500);
    }

    #[tokio::test]
    async fn test_live_then_cached() {
        let dir = TempDir::new().unwrap();
        let cache = CacheStore::open(dir.path(), Duration::from_secs(3600)).unwrap();
        let stub = adapter(Ok(vec![venue("Chez Janou", 48.857, 2.367)]));
        let query = ProviderQuery::new(paris(), Filter::new(PoiKind::Restaurant), 5);
        let cancel = CancellationToken::new();

        let (pois, outcome) = run_cached(&stub, &query, &cache, CachePolicy::default(), &cancel).await;
        assert_eq!(pois.len(), 1);
        assert_eq!(outcome, ProviderOutcome::Ok { count: 1 });

        let (pois, outcome) = run_cached(&stub, &query, &cache, CachePolicy::default(), &cancel).await;
        assert_eq!(pois.len(), 1);
        assert_eq!(outcome, ProviderOutcome::Cached { count: 1 });
        assert_eq!(stub.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failure_without_cache() {
        let dir = TempDir::new().unwrap();
        let cache = CacheStore::open(dir.path(), Duration::from_secs(3600)).unwrap();
        let stub = adapter(Err(()));
        let query = ProviderQuery::new(paris(), Filter::default(), 5);

        let (pois, outcome) =
            run_cached(&stub, &query, &cache, CachePolicy::default(), &CancellationToken::new()).await;
        assert!(pois.is_empty());
        assert!(matches!(outcome, ProviderOutcome::Failed { .. }));
    }

    #[tokio::test]
    async fn test_overlap_is_filtered_to_bbox_and_filter() {
        let dir = TempDir::new().unwrap();
        let cache = CacheStore::open(dir.path(), Duration::from_secs(3600)).unwrap();

        let city_wide = vec![
            venue("Le Marais Bistro", 48.859, 2.362),
            venue("Montmartre Table", 48.886, 2.341),
            venue("Subway", 48.860, 2.360),
        ];
        let key = CacheKey::new("osm", "restaurant", "city-wide query");
        let mut entry = CacheEntry::new(
            &key,
            serde_json::to_value(&city_wide).unwrap(),
            BBox::extent_of(city_wide.iter().map(|p| (p.lat, p.lon))),
            Duration::from_secs(3600),
        );
        entry.fetched_at = Utc::now() - chrono::Duration::days(2);
        cache.insert_entry(entry).await.unwrap();

        let marais = BBox::new(2.35, 48.85, 2.37, 48.865).unwrap();
        let filter = Filter::new(PoiKind::Restaurant).local_only(true);
        let query = ProviderQuery::new(marais, filter, 5);
        let stub = adapter(Err(()));

        let (pois, outcome) =
            run_cached(&stub, &query, &cache, CachePolicy::default(), &CancellationToken::new()).await;
        assert_eq!(outcome, ProviderOutcome::Overlap { count: 1 });
        assert_eq!(pois[0].name, "Le Marais Bistro");
    }

    #[tokio::test]
    async fn test_cancelled_reports_timeout() {
        let dir = TempDir::new().unwrap();
        let cache = CacheStore::open(dir.path(), Duration::from_secs(3600)).unwrap();

        struct Hanging;

        #[async_trait]
        impl ProviderAdapter for Hanging {
            fn provider(&self) -> Provider {
                Provider::Web
            }
            fn canonical_query(&self, _query: &ProviderQuery) -> String {
                "hang".into()
            }
            async fn discover(
                &self,
                _query: &ProviderQuery,
                cancel: &CancellationToken,
            ) -> Result<Vec<Poi>, ProviderError> {
                cancel.cancelled().await;
                Err(ProviderError::Cancelled)
            }
        }

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });
        let query = ProviderQuery::new(paris(), Filter::default(), 5);
        let (pois, outcome) = run_cached(&Hanging, &query, &cache, CachePolicy::default(), &cancel).await;
        assert!(pois.is_empty());
        assert_eq!(outcome, ProviderOutcome::TimedOut);
    }

    #[test]
    fn test_record_union_keeps_raw() {
        let element: overpass::OverpassElement = serde_json::from_str(
            r#"{"type": "node", "id": 1, "lat": 48.85, "lon": 2.35, "tags": {"name": "Café A", "amenity": "cafe"}}"#,
        )
        .unwrap();
        let record = ProviderRecord::Osm(element);
        assert_eq!(record.provider(), Provider::Osm);
        let poi = record.into_poi().unwrap();
        assert_eq!(poi.raw["id"], 1);
        assert_eq!(poi.provider, Provider::Osm);
    }

    #[test]
    fn test_build_adapters_skips_keyless() {
        let config = Config::default();
        let http = HttpClient::new(&config.http).unwrap();
        let adapters = build_adapters(&config, &http);
        // only the keyless Overpass adapter is usable out of the box
        assert_eq!(adapters.len(), 1);
        assert_eq!(adapters[0].provider(), Provider::Osm);
    }

    #[test]
    fn test_keyless_provider_reports_missing_key() {
        let mut config = Config::default();
        let error = required_key(&config.providers.places, Provider::Places).unwrap_err();
        assert!(matches!(error, ProviderError::MissingApiKey(Provider::Places)));
        assert_eq!(error.to_string(), "no API key configured for places");
        assert!(!error.is_transient());

        config.providers.places.api_key = Some("   ".into());
        assert!(required_key(&config.providers.places, Provider::Places).is_err());
        config.providers.places.api_key = Some("k".into());
        assert_eq!(required_key(&config.providers.places, Provider::Places).unwrap(), "k");
    }
}
