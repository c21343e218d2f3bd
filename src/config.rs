//! Engine configuration, loaded from TOML with environment overrides for API keys.

use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

use crate::error::ConfigError;

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct Config {
    pub engine: EngineConfig,
    pub cache: CacheConfig,
    pub http: HttpConfig,
    pub geocode: GeocodeConfig,
    pub providers: ProvidersConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct EngineConfig {
    pub overall_timeout_secs: u64,
    pub worker_pool_size: usize,
    pub detail_concurrency: usize,
    pub detail_delay_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            overall_timeout_secs: 12,
            worker_pool_size: 4,
            detail_concurrency: 8,
            detail_delay_ms: 100,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct CacheConfig {
    pub dir: PathBuf,
    pub ttl_secs: u64,
    pub geocode_ttl_secs: u64,
    pub overlap_max_age_secs: u64,
    pub rate_limit_interval_ms: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("cache"),
            ttl_secs: 6 * 3600,
            geocode_ttl_secs: 30 * 24 * 3600,
            overlap_max_age_secs: 7 * 24 * 3600,
            rate_limit_interval_ms: 5_000,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct HttpConfig {
    pub user_agent: String,
    pub request_timeout_secs: u64,
    pub max_attempts: u32,
    pub base_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            user_agent: concat!("tamarack/", env!("CARGO_PKG_VERSION")).to_string(),
            request_timeout_secs: 10,
            max_attempts: 3,
            base_backoff_ms: 250,
            max_backoff_ms: 4_000,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct GeocodeConfig {
    pub seed_dir: PathBuf,
    pub geoapify: KeyedEndpoint,
    pub opencage: KeyedEndpoint,
    pub locationiq: KeyedEndpoint,
    pub nominatim: OpenEndpoint,
}

impl Default for GeocodeConfig {
    fn default() -> Self {
        Self {
            seed_dir: PathBuf::from("data/seeds"),
            geoapify: KeyedEndpoint::default(),
            opencage: KeyedEndpoint::default(),
            locationiq: KeyedEndpoint::default(),
            nominatim: OpenEndpoint::default(),
        }
    }
}

/// An upstream that requires an API key
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct KeyedEndpoint {
    pub endpoint: Option<String>,
    pub api_key: Option<String>,
}

impl KeyedEndpoint {
    /// The key, if present and non-blank
    pub fn key(&self) -> Option<&str> {
        non_blank(self.api_key.as_deref())
    }

    pub fn endpoint_or<'a>(&'a self, default: &'a str) -> &'a str {
        non_blank(self.endpoint.as_deref()).unwrap_or(default)
    }
}

/// A keyless upstream that can be switched off
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct OpenEndpoint {
    pub endpoint: Option<String>,
    pub enabled: bool,
}

impl Default for OpenEndpoint {
    fn default() -> Self {
        Self {
            endpoint: None,
            enabled: true,
        }
    }
}

impl OpenEndpoint {
    pub fn endpoint_or<'a>(&'a self, default: &'a str) -> &'a str {
        non_blank(self.endpoint.as_deref()).unwrap_or(default)
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct ProvidersConfig {
    pub overpass: ProviderSettings,
    pub places: ProviderSettings,
    pub opentripmap: ProviderSettings,
    pub websearch: ProviderSettings,
}

/// Per-provider switches. Unset fields fall back to the adapter's own defaults.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ProviderSettings {
    pub enabled: bool,
    pub endpoint: Option<String>,
    pub api_key: Option<String>,
    /// Overrides the adapter's default minimum interval between live calls
    pub rate_limit_interval_ms: Option<u64>,
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            endpoint: None,
            api_key: None,
            rate_limit_interval_ms: None,
        }
    }
}

impl ProviderSettings {
    pub fn key(&self) -> Option<&str> {
        non_blank(self.api_key.as_deref())
    }

    pub fn endpoint_or<'a>(&'a self, default: &'a str) -> &'a str {
        non_blank(self.endpoint.as_deref()).unwrap_or(default)
    }

    pub fn interval_or(&self, default: Duration) -> Duration {
        self.rate_limit_interval_ms
            .map(Duration::from_millis)
            .unwrap_or(default)
    }
}

impl Config {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&content)?;
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    /// Defaults plus environment keys, for running without a config file
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Config::default();
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    /// Fill API keys missing from the file with environment variables
    pub fn apply_env(&mut self) {
        fill_from_env(&mut self.geocode.geoapify.api_key, "GEOAPIFY_API_KEY");
        fill_from_env(&mut self.geocode.opencage.api_key, "OPENCAGE_API_KEY");
        fill_from_env(&mut self.geocode.locationiq.api_key, "LOCATIONIQ_API_KEY");
        fill_from_env(&mut self.providers.places.api_key, "GOOGLE_PLACES_API_KEY");
        fill_from_env(&mut self.providers.opentripmap.api_key, "OPENTRIPMAP_API_KEY");
        fill_from_env(&mut self.providers.websearch.api_key, "BRAVE_SEARCH_API_KEY");
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.engine.worker_pool_size == 0 {
            return Err(invalid("engine.worker_pool_size", "must be at least 1"));
        }
        if self.engine.detail_concurrency == 0 {
            return Err(invalid("engine.detail_concurrency", "must be at least 1"));
        }
        if self.engine.overall_timeout_secs == 0 {
            return Err(invalid("engine.overall_timeout_secs", "must be at least 1"));
        }
        if self.http.max_attempts == 0 {
            return Err(invalid("http.max_attempts", "must be at least 1"));
        }
        if self.http.request_timeout_secs == 0 {
            return Err(invalid("http.request_timeout_secs", "must be at least 1"));
        }
        if self.cache.ttl_secs == 0 {
            return Err(invalid("cache.ttl_secs", "must be at least 1"));
        }
        Ok(())
    }

    pub fn overall_timeout(&self) -> Duration {
        Duration::from_secs(self.engine.overall_timeout_secs)
    }

    /// Default minimum interval between live calls to keyless public endpoints
    pub fn default_rate_limit_interval(&self) -> Duration {
        Duration::from_millis(self.cache.rate_limit_interval_ms)
    }
}

fn invalid(field: &'static str, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        field,
        reason: reason.to_string(),
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

fn fill_from_env(slot: &mut Option<String>, var: &str) {
    if slot.as_deref().is_some_and(|k| !k.trim().is_empty()) {
        return;
    }
    if let Ok(value) = std::env::var(var) {
        if !value.trim().is_empty() {
            debug!("Using {} from environment", var);
            *slot = Some(value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_file_uses_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.engine.worker_pool_size, 4);
        assert_eq!(config.engine.detail_concurrency, 8);
        assert_eq!(config.cache.ttl_secs, 21_600);
        assert_eq!(config.cache.rate_limit_interval_ms, 5_000);
        assert!(config.providers.overpass.enabled);
        assert!(config.geocode.nominatim.enabled);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_tables() {
        let config: Config = toml::from_str(
            r#"
            [engine]
            overall_timeout_secs = 3

            [providers.places]
            api_key = "abc"

            [providers.websearch]
            enabled = false
            "#,
        )
        .unwrap();
        assert_eq!(config.overall_timeout(), Duration::from_secs(3));
        assert_eq!(config.engine.worker_pool_size, 4);
        assert_eq!(config.providers.places.key(), Some("abc"));
        assert!(config.providers.places.enabled);
        assert_eq!(config.providers.places.endpoint_or("https://default"), "https://default");
        assert!(!config.providers.websearch.enabled);
    }

    #[test]
    fn test_rate_limit_override() {
        let config: Config = toml::from_str(
            r#"
            [providers.overpass]
            rate_limit_interval_ms = 250
            "#,
        )
        .unwrap();
        let fallback = config.default_rate_limit_interval();
        assert_eq!(fallback, Duration::from_secs(5));
        assert_eq!(
            config.providers.overpass.interval_or(fallback),
            Duration::from_millis(250)
        );
        assert_eq!(config.providers.places.interval_or(Duration::ZERO), Duration::ZERO);
    }

    #[test]
    fn test_validate_rejects_zero_pool() {
        let mut config = Config::default();
        config.engine.worker_pool_size = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { field: "engine.worker_pool_size", .. })
        ));
    }

    #[test]
    fn test_blank_key_is_absent() {
        let endpoint = KeyedEndpoint {
            endpoint: None,
            api_key: Some("  ".into()),
        };
        assert_eq!(endpoint.key(), None);
    }
}
