//! Place name to bounding box.
//!
//! Cascade, first success wins:
//! cache → seed by slug → seed scan → keyed geocoders → Nominatim → built-in table.
//! Every source failure is logged and skipped. A result that is returned always
//! carries a valid `west < east, south < north` box.

pub mod fallback;
pub mod remote;
pub mod seeds;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::cache::{CacheKey, CacheStore};
use crate::config::Config;
use crate::error::GeocodeError;
use crate::http::HttpClient;
use crate::models::{is_valid_coordinate, normalize_name, BBox, GeocodeResult, GeocodeSource};

pub use remote::RemoteGeocoder;
pub use seeds::{slugify, SeedStore};

const CACHE_NAMESPACE: &str = "geocode";
const CACHE_SCOPE: &str = "place";

/// Nominatim's usage policy allows one request per second
const NOMINATIM_INTERVAL: Duration = Duration::from_secs(1);

pub struct GeocodeResolver {
    cache: Arc<CacheStore>,
    seeds: SeedStore,
    remotes: Vec<RemoteGeocoder>,
    http: Option<HttpClient>,
    ttl: Duration,
}

impl GeocodeResolver {
    /// Resolver with every configured source
    pub fn new(config: &Config, http: HttpClient, cache: Arc<CacheStore>) -> Self {
        let geocode = &config.geocode;
        let mut remotes = Vec::new();
        if let Some(key) = geocode.geoapify.key() {
            remotes.push(RemoteGeocoder::Geoapify {
                endpoint: geocode.geoapify.endpoint_or(remote::GEOAPIFY_ENDPOINT).to_string(),
                api_key: key.to_string(),
            });
        }
        if let Some(key) = geocode.opencage.key() {
            remotes.push(RemoteGeocoder::OpenCage {
                endpoint: geocode.opencage.endpoint_or(remote::OPENCAGE_ENDPOINT).to_string(),
                api_key: key.to_string(),
            });
        }
        if let Some(key) = geocode.locationiq.key() {
            remotes.push(RemoteGeocoder::LocationIq {
                endpoint: geocode.locationiq.endpoint_or(remote::LOCATIONIQ_ENDPOINT).to_string(),
                api_key: key.to_string(),
            });
        }
        if geocode.nominatim.enabled {
            remotes.push(RemoteGeocoder::Nominatim {
                endpoint: geocode.nominatim.endpoint_or(remote::NOMINATIM_ENDPOINT).to_string(),
            });
        }

        info!(
            "Geocoder sources: seeds at {}, {} remote geocoder(s), {} built-in cities",
            geocode.seed_dir.display(),
            remotes.len(),
            fallback::city_count()
        );

        Self {
            cache,
            seeds: SeedStore::new(&geocode.seed_dir),
            remotes,
            http: Some(http),
            ttl: Duration::from_secs(config.cache.geocode_ttl_secs),
        }
    }

    /// Resolver that never touches the network: cache, seeds and built-ins only
    pub fn offline<P: AsRef<Path>>(cache: Arc<CacheStore>, seed_dir: P) -> Self {
        Self {
            cache,
            seeds: SeedStore::new(seed_dir),
            remotes: Vec::new(),
            http: None,
            ttl: Duration::from_secs(30 * 24 * 3600),
        }
    }

    pub fn remotes(&self) -> &[RemoteGeocoder] {
        &self.remotes
    }

    /// Bounding box to search for `place`, `None` when no source knows it
    pub async fn resolve_bbox(&self, place: &str, cancel: &CancellationToken) -> Option<BBox> {
        self.geocode(place, cancel).await.and_then(|r| r.search_area())
    }

    #[instrument(skip(self, cancel))]
    pub async fn geocode(&self, place: &str, cancel: &CancellationToken) -> Option<GeocodeResult> {
        let normalized = normalize_name(place);
        if normalized.is_empty() {
            return None;
        }
        let key = CacheKey::new(CACHE_NAMESPACE, CACHE_SCOPE, normalized.as_str());

        if let Some(hit) = self.cache.get_fresh(&key).await {
            match serde_json::from_value::<GeocodeResult>(hit.payload) {
                Ok(mut result) if usable(&result) => {
                    debug!("Geocode cache hit for '{}'", place);
                    result.source = GeocodeSource::Cache;
                    return Some(result);
                }
                Ok(_) => warn!("Ignoring unusable cached geocode for '{}'", place),
                Err(e) => warn!("Ignoring malformed cached geocode for '{}': {}", place, e),
            }
        }

        match self.seeds.by_slug(place).await {
            Ok(Some(result)) if usable(&result) => return Some(result),
            Ok(_) => {}
            Err(e) => warn!("Seed lookup by slug failed for '{}': {}", place, e),
        }

        match self.seeds.scan(place).await {
            Ok(Some(result)) if usable(&result) => return Some(result),
            Ok(_) => {}
            Err(e) => warn!("Seed scan failed for '{}': {}", place, e),
        }

        if let Some(result) = self.lookup_remote(place, cancel).await {
            if let Err(e) = self.remember(&key, &result).await {
                warn!("Failed to cache geocode for '{}': {}", place, e);
            }
            return Some(result);
        }

        let builtin = fallback::lookup(place);
        if builtin.is_none() {
            warn!("No geocoding source could resolve '{}'", place);
        }
        builtin
    }

    async fn lookup_remote(&self, place: &str, cancel: &CancellationToken) -> Option<GeocodeResult> {
        let http = self.http.as_ref()?;
        for geocoder in &self.remotes {
            if cancel.is_cancelled() {
                return None;
            }
            if matches!(geocoder, RemoteGeocoder::Nominatim { .. }) {
                let limiter = self.cache.rate_limiter("nominatim", NOMINATIM_INTERVAL);
                if limiter.wait_turn(cancel).await.is_err() {
                    return None;
                }
            }
            match geocoder.lookup(http, place, cancel).await {
                Ok(result) if usable(&result) => {
                    info!("Resolved '{}' via {}", place, geocoder.source());
                    return Some(result);
                }
                Ok(_) => warn!("{} returned an unusable result for '{}'", geocoder.source(), place),
                Err(GeocodeError::NotFound(_)) => {
                    debug!("{} has no result for '{}'", geocoder.source(), place)
                }
                Err(e) => warn!("{} failed for '{}': {}", geocoder.source(), place, e),
            }
        }
        None
    }

    async fn remember(&self, key: &CacheKey, result: &GeocodeResult) -> Result<(), crate::error::CacheError> {
        let payload = serde_json::to_value(result)?;
        self.cache.put_with_ttl(key, payload, None, self.ttl).await
    }
}

/// Valid point, and a search area that is a real box
fn usable(result: &GeocodeResult) -> bool {
    is_valid_coordinate(result.lat, result.lon) && result.search_area().is_some()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn resolver(dir: &TempDir) -> GeocodeResolver {
        let cache = Arc::new(CacheStore::open(dir.path().join("cache"), Duration::from_secs(3600)).unwrap());
        GeocodeResolver::offline(cache, dir.path().join("seeds"))
    }

    #[tokio::test]
    async fn test_seed_beats_builtin() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("seeds")).unwrap();
        fs::write(
            dir.path().join("seeds/paris.json"),
            r#"{"displayName": "Paris (seed)", "lat": 48.85, "lon": 2.35, "bbox": [2.3, 48.8, 2.4, 48.9]}"#,
        )
        .unwrap();

        let result = resolver(&dir).geocode("Paris", &CancellationToken::new()).await.unwrap();
        assert_eq!(result.source, GeocodeSource::Seed);
        assert_eq!(result.display_name, "Paris (seed)");
    }

    #[tokio::test]
    async fn test_builtin_fallback_and_unknown() {
        let dir = TempDir::new().unwrap();
        let resolver = resolver(&dir);
        let cancel = CancellationToken::new();

        let result = resolver.geocode("Berlin, Germany", &cancel).await.unwrap();
        assert_eq!(result.source, GeocodeSource::Builtin);
        assert!(resolver.geocode("Atlantis", &cancel).await.is_none());
        assert!(resolver.geocode("   ", &cancel).await.is_none());
    }

    #[tokio::test]
    async fn test_fresh_cache_answers_first() {
        let dir = TempDir::new().unwrap();
        let resolver = resolver(&dir);
        let cached = GeocodeResult {
            lat: 43.6,
            lon: 1.44,
            display_name: "Toulouse".into(),
            bbox: None,
            source: GeocodeSource::Nominatim,
        };
        let key = CacheKey::new(CACHE_NAMESPACE, CACHE_SCOPE, "toulouse");
        resolver.remember(&key, &cached).await.unwrap();

        let result = resolver.geocode("TOULOUSE", &CancellationToken::new()).await.unwrap();
        assert_eq!(result.source, GeocodeSource::Cache);
        let area = resolver.resolve_bbox("Toulouse", &CancellationToken::new()).await.unwrap();
        assert!(area.contains(43.6, 1.44));
    }

    #[tokio::test]
    async fn test_never_returns_inverted_box() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("seeds")).unwrap();
        // an inverted seed must be skipped, not returned
        fs::write(
            dir.path().join("seeds/rome.json"),
            r#"{"displayName": "Rome", "lat": 41.9, "lon": 12.5, "bbox": [12.6, 41.7, 12.3, 42.0]}"#,
        )
        .unwrap();
        let resolver = resolver(&dir);
        let cancel = CancellationToken::new();

        let places = [
            "Rome", "Paris", "paris france", "Tokyo", "São Paulo", "", "???", "Nowhere Town",
            "new york city", "Sydney", "Buenos Aires", "x",
        ];
        for place in places {
            if let Some(bbox) = resolver.resolve_bbox(place, &cancel).await {
                assert!(bbox.west() < bbox.east(), "{}", place);
                assert!(bbox.south() < bbox.north(), "{}", place);
            }
        }
        let rome = resolver.geocode("Rome", &cancel).await.unwrap();
        assert_eq!(rome.source, GeocodeSource::Builtin);
    }
}
