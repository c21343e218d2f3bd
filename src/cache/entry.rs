//! On-disk cache entries: one JSON file per hashed canonical query.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::NamedTempFile;

use crate::error::CacheError;
use crate::models::BBox;

/// Identifies one upstream query
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    /// Provider or geocoder name; also the rate-limit namespace
    pub namespace: String,
    /// Kind of search, so overlap reuse never crosses kinds
    pub scope: String,
    /// The exact provider-native query string
    pub query: String,
}

impl CacheKey {
    pub fn new(
        namespace: impl Into<String>,
        scope: impl Into<String>,
        query: impl Into<String>,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            scope: scope.into(),
            query: query.into(),
        }
    }

    /// Hex SHA-256 of `namespace \n query`
    pub fn hash(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.namespace.as_bytes());
        hasher.update(b"\n");
        hasher.update(self.query.as_bytes());
        format!("{:x}", hasher.finalize())
    }

    pub fn file_name(&self) -> String {
        format!("{}.json", self.hash())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    pub query_hash: String,
    pub namespace: String,
    #[serde(default)]
    pub scope: String,
    pub query: String,
    pub fetched_at: DateTime<Utc>,
    pub ttl_secs: u64,
    /// Bounding extent of the coordinates in `payload`, if any
    #[serde(default)]
    pub extent: Option<BBox>,
    pub payload: serde_json::Value,
}

impl CacheEntry {
    pub fn new(key: &CacheKey, payload: serde_json::Value, extent: Option<BBox>, ttl: Duration) -> Self {
        Self {
            query_hash: key.hash(),
            namespace: key.namespace.clone(),
            scope: key.scope.clone(),
            query: key.query.clone(),
            fetched_at: Utc::now(),
            ttl_secs: ttl.as_secs(),
            extent,
            payload,
        }
    }

    /// Time since the entry was fetched; zero if `fetched_at` is in the future
    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        (now - self.fetched_at).to_std().unwrap_or(Duration::ZERO)
    }

    pub fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        self.age(now) < Duration::from_secs(self.ttl_secs)
    }

    /// Blocking read, for startup and maintenance scans
    pub fn read(path: &Path) -> Result<Self, CacheError> {
        let bytes = fs::read(path)?;
        Self::decode(path, &bytes)
    }

    pub async fn load(path: &Path) -> Result<Self, CacheError> {
        let bytes = tokio::fs::read(path).await?;
        Self::decode(path, &bytes)
    }

    fn decode(path: &Path, bytes: &[u8]) -> Result<Self, CacheError> {
        serde_json::from_slice(bytes).map_err(|e| CacheError::Corrupt {
            path: path.display().to_string(),
            reason: e.to_string(),
        })
    }

    /// Write the whole entry into `dir` via a temp file and rename
    pub fn write_atomic(&self, dir: &Path) -> Result<PathBuf, CacheError> {
        let path = dir.join(format!("{}.json", self.query_hash));
        let mut tmp = NamedTempFile::new_in(dir)?;
        serde_json::to_writer(&mut tmp, self)?;
        tmp.flush()?;
        tmp.persist(&path)?;
        Ok(path)
    }
}
