//! Error types for the discovery engine.
//!
//! Only [`DiscoveryError`] and [`ConfigError`] ever reach a caller. Provider,
//! geocoder and cache failures are logged and degrade to partial results.

use thiserror::Error;

use crate::models::{BBoxError, Provider};

/// Failure inside a single provider adapter. Dropped by the dispatcher.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("upstream returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("failed to parse upstream response: {0}")]
    Parse(String),

    #[error("invalid endpoint URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("no API key configured for {0}")]
    MissingApiKey(Provider),

    #[error("request cancelled")]
    Cancelled,

    #[error("upstream request timed out")]
    Timeout,
}

impl ProviderError {
    /// Classify a transport failure, splitting out per-request timeouts
    pub fn from_transport(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            ProviderError::Timeout
        } else {
            ProviderError::Http(error)
        }
    }

    /// Whether another attempt could plausibly succeed
    pub fn is_transient(&self) -> bool {
        match self {
            ProviderError::Timeout => true,
            ProviderError::Http(e) => e.is_timeout() || e.is_connect(),
            ProviderError::Status { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

/// Failure of one geocoding source. Always swallowed by the resolver.
#[derive(Debug, Error)]
pub enum GeocodeError {
    #[error("geocoder request failed: {0}")]
    Provider(#[from] ProviderError),

    #[error("no result for '{0}'")]
    NotFound(String),

    #[error("geocoder returned an unusable extent: {0}")]
    BadExtent(#[from] BBoxError),

    #[error("failed to read seed data: {0}")]
    Seed(String),
}

/// Failure reading or writing the on-disk cache
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("corrupt cache entry {path}: {reason}")]
    Corrupt { path: String, reason: String },

    #[error("failed to serialize cache entry: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("failed to persist cache entry: {0}")]
    Persist(#[from] tempfile::PersistError),
}

/// Errors `DispatchController::discover` returns. Everything else degrades.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("invalid bbox: {0}")]
    InvalidBBox(#[from] BBoxError),

    #[error("limit must be at least 1")]
    InvalidLimit,

    #[error("no place or bbox given")]
    NoLocation,
}

/// Configuration problems. Callers abort on these.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Read(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}
