//! Minimum interval between live calls to one upstream, shared through a
//! timestamp file.
//!
//! The file is read, then written, with no lock in between. Two callers that
//! read the same timestamp both proceed, so the limit can be under-enforced
//! under contention. The worst case is extra upstream traffic.

use chrono::Utc;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::ProviderError;
use crate::http::pause;

#[derive(Debug, Clone)]
pub struct RateLimiter {
    path: PathBuf,
    interval: Duration,
}

impl RateLimiter {
    pub fn new(dir: &Path, namespace: &str, interval: Duration) -> Self {
        Self {
            path: dir.join(format!(".ratelimit-{}", namespace)),
            interval,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// How long a caller would have to wait right now
    pub async fn remaining(&self) -> Duration {
        let Some(last) = self.last_request_ms().await else {
            return Duration::ZERO;
        };
        let elapsed_ms = Utc::now().timestamp_millis().saturating_sub(last).max(0) as u64;
        self.interval.saturating_sub(Duration::from_millis(elapsed_ms))
    }

    /// Wait until the interval since the last recorded call has passed, then record this one
    pub async fn wait_turn(&self, cancel: &CancellationToken) -> Result<(), ProviderError> {
        if self.interval.is_zero() {
            return Ok(());
        }
        let wait = self.remaining().await;
        if !wait.is_zero() {
            debug!("Rate limited on {}, waiting {:?}", self.path.display(), wait);
            pause(wait, cancel).await?;
        }
        self.record().await;
        Ok(())
    }

    async fn last_request_ms(&self) -> Option<i64> {
        let content = tokio::fs::read_to_string(&self.path).await.ok()?;
        content.trim().parse().ok()
    }

    async fn record(&self) {
        let now = Utc::now().timestamp_millis().to_string();
        if let Err(e) = tokio::fs::write(&self.path, now).await {
            warn!("Failed to write rate-limit file {}: {}", self.path.display(), e);
        }
    }
}
