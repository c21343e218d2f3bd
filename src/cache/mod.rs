//! Disk-backed TTL cache for upstream calls.
//!
//! Entries are whole files replaced atomically, so concurrent readers never see
//! a partial write. The directory has no other locking. A corrupt or unreadable
//! entry is logged and behaves as a miss.
//!
//! Lookups and writes made while serving are async: reads go through
//! `tokio::fs`, and the temp-file write runs on the blocking pool. Opening and
//! pruning scan the whole directory synchronously.

pub mod entry;
pub mod index;
pub mod rate_limit;

use chrono::{DateTime, Utc};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::config::CacheConfig;
use crate::error::CacheError;
use crate::models::BBox;

pub use entry::{CacheEntry, CacheKey};
pub use index::{ExtentIndex, IndexedExtent};
pub use rate_limit::RateLimiter;

/// A cached payload and whether it is still inside its TTL
#[derive(Debug, Clone)]
pub struct CacheHit {
    pub payload: serde_json::Value,
    pub fresh: bool,
    pub fetched_at: DateTime<Utc>,
    pub extent: Option<BBox>,
}

impl CacheHit {
    fn from_entry(entry: CacheEntry, now: DateTime<Utc>) -> Self {
        Self {
            fresh: entry.is_fresh(now),
            fetched_at: entry.fetched_at,
            extent: entry.extent,
            payload: entry.payload,
        }
    }
}

pub struct CacheStore {
    dir: PathBuf,
    ttl: Duration,
    index: Mutex<ExtentIndex>,
}

impl CacheStore {
    /// Open (creating if needed) a cache directory and index the extents found in it
    pub fn open<P: AsRef<Path>>(dir: P, ttl: Duration) -> Result<Self, CacheError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;

        let mut extents = Vec::new();
        let mut corrupt = 0usize;
        for path in entry_files(&dir) {
            match CacheEntry::read(&path) {
                Ok(entry) => {
                    if let Some(extent) = entry.extent {
                        extents.push(IndexedExtent::new(
                            entry.query_hash,
                            entry.namespace,
                            entry.scope,
                            &extent,
                        ));
                    }
                }
                Err(e) => {
                    corrupt += 1;
                    debug!("Skipping unreadable cache entry: {}", e);
                }
            }
        }

        let index = ExtentIndex::build(extents);
        info!(
            "Opened cache at {} ({} indexed extents, {} unreadable entries)",
            dir.display(),
            index.len(),
            corrupt
        );

        Ok(Self {
            dir,
            ttl,
            index: Mutex::new(index),
        })
    }

    pub fn from_config(config: &CacheConfig) -> Result<Self, CacheError> {
        Self::open(&config.dir, Duration::from_secs(config.ttl_secs))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Entry for `key`, fresh or stale
    pub async fn get(&self, key: &CacheKey) -> Option<CacheHit> {
        let path = self.dir.join(key.file_name());
        match CacheEntry::load(&path).await {
            Ok(entry) if entry.query == key.query && entry.namespace == key.namespace => {
                Some(CacheHit::from_entry(entry, Utc::now()))
            }
            Ok(_) => {
                warn!("Cache entry {} does not match its key, ignoring", path.display());
                None
            }
            Err(CacheError::Io(e)) if e.kind() == ErrorKind::NotFound => None,
            Err(e) => {
                warn!("Treating cache entry as a miss: {}", e);
                None
            }
        }
    }

    /// Entry for `key` only if still inside its TTL
    pub async fn get_fresh(&self, key: &CacheKey) -> Option<CacheHit> {
        self.get(key).await.filter(|hit| hit.fresh)
    }

    /// Store `payload` under `key` with the store's default TTL
    pub async fn put(
        &self,
        key: &CacheKey,
        payload: serde_json::Value,
        extent: Option<BBox>,
    ) -> Result<(), CacheError> {
        self.put_with_ttl(key, payload, extent, self.ttl).await
    }

    pub async fn put_with_ttl(
        &self,
        key: &CacheKey,
        payload: serde_json::Value,
        extent: Option<BBox>,
        ttl: Duration,
    ) -> Result<(), CacheError> {
        self.insert_entry(CacheEntry::new(key, payload, extent, ttl)).await
    }

    /// Write a complete entry, replacing any previous one with the same hash
    pub async fn insert_entry(&self, entry: CacheEntry) -> Result<(), CacheError> {
        let dir = self.dir.clone();
        let entry = tokio::task::spawn_blocking(move || entry.write_atomic(&dir).map(|_| entry))
            .await
            .map_err(|e| CacheError::Io(std::io::Error::other(e)))??;
        let mut index = self.lock_index();
        match entry.extent {
            Some(extent) => index.insert(IndexedExtent::new(
                entry.query_hash,
                entry.namespace,
                entry.scope,
                &extent,
            )),
            None => index.remove(&entry.query_hash),
        }
        Ok(())
    }

    /// Freshest entry in `namespace`/`scope` no older than `max_age` whose
    /// result extent overlaps `bbox`
    pub async fn find_overlapping(
        &self,
        namespace: &str,
        scope: &str,
        bbox: &BBox,
        max_age: Duration,
    ) -> Option<CacheHit> {
        let candidates = self.lock_index().candidates(namespace, scope, bbox);
        let now = Utc::now();

        let mut best: Option<CacheEntry> = None;
        for hash in candidates {
            let path = self.dir.join(format!("{}.json", hash));
            let entry = match CacheEntry::load(&path).await {
                Ok(entry) => entry,
                Err(e) => {
                    debug!("Overlap candidate {} unreadable: {}", hash, e);
                    self.lock_index().remove(&hash);
                    continue;
                }
            };
            if entry.age(now) > max_age {
                continue;
            }
            if best.as_ref().map_or(true, |b| entry.fetched_at > b.fetched_at) {
                best = Some(entry);
            }
        }

        best.map(|entry| CacheHit::from_entry(entry, now))
    }

    /// Delete entries older than `max_age`, plus unreadable ones. Returns how many were removed.
    pub fn prune(&self, max_age: Duration) -> Result<usize, CacheError> {
        let now = Utc::now();
        let mut removed = 0;
        for path in entry_files(&self.dir) {
            let expired_hash = match CacheEntry::read(&path) {
                Ok(entry) if entry.age(now) > max_age => Some(entry.query_hash),
                Ok(_) => continue,
                Err(e) => {
                    warn!("Removing unreadable cache entry: {}", e);
                    None
                }
            };
            match fs::remove_file(&path) {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            }
            if let Some(hash) = expired_hash {
                self.lock_index().remove(&hash);
            }
        }
        info!("Pruned {} cache entries from {}", removed, self.dir.display());
        Ok(removed)
    }

    /// Rate limiter for one upstream, sharing this store's directory
    pub fn rate_limiter(&self, namespace: &str, interval: Duration) -> RateLimiter {
        RateLimiter::new(&self.dir, namespace, interval)
    }

    pub fn indexed_extents(&self) -> usize {
        self.lock_index().len()
    }

    fn lock_index(&self) -> MutexGuard<'_, ExtentIndex> {
        self.index.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Cache entry files directly inside `dir`
fn entry_files(dir: &Path) -> impl Iterator<Item = PathBuf> {
    WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .filter(|p| p.extension().is_some_and(|ext| ext == "json"))
}
