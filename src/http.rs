//! Shared HTTP client used by every adapter and remote geocoder.
//!
//! Retries live here and nowhere else: connect/timeout failures, 429 and 5xx
//! are retried with exponential backoff plus jitter, other statuses fail
//! immediately. Every attempt and every backoff sleep races the caller's
//! cancellation token.

use rand::Rng;
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::HttpConfig;
use crate::error::ProviderError;

/// Longest error body kept in [`ProviderError::Status`]
const MAX_ERROR_BODY: usize = 512;

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_backoff: Duration,
    pub max_backoff: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &HttpConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_backoff: Duration::from_millis(config.base_backoff_ms),
            max_backoff: Duration::from_millis(config.max_backoff_ms),
        }
    }

    /// Single attempt, no sleeping
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            base_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
        }
    }

    /// Delay before the attempt following `attempt` (1-based), without jitter
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }

    /// `base_delay` plus up to half of it again at random
    pub fn backoff(&self, attempt: u32) -> Duration {
        let delay = self.base_delay(attempt);
        let jitter_ms = (delay.as_millis() / 2) as u64;
        if jitter_ms == 0 {
            return delay;
        }
        let jitter = rand::thread_rng().gen_range(0..=jitter_ms);
        delay + Duration::from_millis(jitter)
    }
}

#[derive(Debug, Clone)]
pub struct HttpClient {
    client: Client,
    retry: RetryPolicy,
}

impl HttpClient {
    pub fn new(config: &HttpConfig) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .user_agent(config.user_agent.clone())
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .gzip(true)
            .build()?;
        Ok(Self {
            client,
            retry: RetryPolicy::from_config(config),
        })
    }

    /// Wrap an already-built client
    pub fn with_client(client: Client, retry: RetryPolicy) -> Self {
        Self { client, retry }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    /// Send a request built fresh by `build` on every attempt and decode the JSON body
    pub async fn send_json<T, F>(&self, build: F, cancel: &CancellationToken) -> Result<T, ProviderError>
    where
        T: DeserializeOwned,
        F: Fn(&Client) -> RequestBuilder,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            if cancel.is_cancelled() {
                return Err(ProviderError::Cancelled);
            }

            let result = tokio::select! {
                _ = cancel.cancelled() => return Err(ProviderError::Cancelled),
                r = fetch_json::<T>(build(&self.client)) => r,
            };

            match result {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt < self.retry.max_attempts => {
                    let delay = self.retry.backoff(attempt);
                    warn!(
                        "Request failed (attempt {}/{}), retrying in {:?}: {}",
                        attempt, self.retry.max_attempts, delay, e
                    );
                    pause(delay, cancel).await?;
                }
                Err(e) => {
                    debug!("Request failed after {} attempt(s): {}", attempt, e);
                    return Err(e);
                }
            }
        }
    }
}

async fn fetch_json<T: DeserializeOwned>(request: RequestBuilder) -> Result<T, ProviderError> {
    let response = request.send().await.map_err(ProviderError::from_transport)?;
    let status = response.status();
    if !status.is_success() {
        let mut body = response.text().await.unwrap_or_default();
        if body.len() > MAX_ERROR_BODY {
            let mut cut = MAX_ERROR_BODY;
            while !body.is_char_boundary(cut) {
                cut -= 1;
            }
            body.truncate(cut);
        }
        return Err(ProviderError::Status {
            status: status.as_u16(),
            body,
        });
    }
    let bytes = response.bytes().await.map_err(ProviderError::from_transport)?;
    serde_json::from_slice(&bytes).map_err(|e| ProviderError::Parse(e.to_string()))
}

/// Sleep for `delay` unless cancelled first
pub async fn pause(delay: Duration, cancel: &CancellationToken) -> Result<(), ProviderError> {
    if delay.is_zero() {
        return if cancel.is_cancelled() {
            Err(ProviderError::Cancelled)
        } else {
            Ok(())
        };
    }
    tokio::select! {
        _ = cancel.cancelled() => Err(ProviderError::Cancelled),
        _ = tokio::time::sleep(delay) => Ok(()),
    }
}

/// Spaces successive calls at least `spacing` apart, however many callers
/// share it. The first call goes through immediately.
#[derive(Debug)]
pub struct Pacer {
    ticks: Option<Mutex<Interval>>,
}

impl Pacer {
    pub fn new(spacing: Duration) -> Self {
        let ticks = (!spacing.is_zero()).then(|| {
            let mut interval = tokio::time::interval(spacing);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            Mutex::new(interval)
        });
        Self { ticks }
    }

    /// Wait for this caller's turn unless cancelled first
    pub async fn wait(&self, cancel: &CancellationToken) -> Result<(), ProviderError> {
        let Some(ticks) = &self.ticks else {
            return pause(Duration::ZERO, cancel).await;
        };
        tokio::select! {
            _ = cancel.cancelled() => Err(ProviderError::Cancelled),
            _ = async { ticks.lock().await.tick().await } => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{http::StatusCode, routing::get, Json, Router};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_backoff: Duration::from_millis(10),
            max_backoff: Duration::from_millis(40),
        }
    }

    fn local_client(retry: RetryPolicy) -> HttpClient {
        let client = Client::builder().no_proxy().build().unwrap();
        HttpClient::with_client(client, retry)
    }

    async fn spawn(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let p = policy(5);
        assert_eq!(p.base_delay(1), Duration::from_millis(10));
        assert_eq!(p.base_delay(2), Duration::from_millis(20));
        assert_eq!(p.base_delay(3), Duration::from_millis(40));
        assert_eq!(p.base_delay(8), Duration::from_millis(40));

        for attempt in 1..5 {
            let d = p.backoff(attempt);
            let base = p.base_delay(attempt);
            assert!(d >= base && d <= base + base / 2);
        }
    }

    #[tokio::test]
    async fn test_cancelled_before_send() {
        let http = local_client(policy(3));
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result: Result<serde_json::Value, _> = http
            .send_json(|c| c.get("http://127.0.0.1:9/never"), &cancel)
            .await;
        assert!(matches!(result, Err(ProviderError::Cancelled)));
    }

    #[tokio::test]
    async fn test_retries_server_errors() {
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let app = Router::new().route(
            "/flaky",
            get(move || {
                let counter = counter.clone();
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                        Err(StatusCode::SERVICE_UNAVAILABLE)
                    } else {
                        Ok(Json(serde_json::json!({ "ok": true })))
                    }
                }
            }),
        );
        let base = spawn(app).await;

        let http = local_client(policy(3));
        let url = format!("{}/flaky", base);
        let value: serde_json::Value = http
            .send_json(|c| c.get(&url), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(value["ok"], true);
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_client_errors_are_not_retried() {
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let app = Router::new().route(
            "/missing",
            get(move || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    (StatusCode::NOT_FOUND, "nope")
                }
            }),
        );
        let base = spawn(app).await;

        let http = local_client(policy(3));
        let url = format!("{}/missing", base);
        let result: Result<serde_json::Value, _> =
            http.send_json(|c| c.get(&url), &CancellationToken::new()).await;
        assert!(matches!(result, Err(ProviderError::Status { status: 404, .. })));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_slow_upstream_times_out_and_is_retried() {
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let app = Router::new().route(
            "/slow",
            get(move || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    Json(serde_json::json!({ "ok": true }))
                }
            }),
        );
        let base = spawn(app).await;

        let client = Client::builder()
            .no_proxy()
            .timeout(Duration::from_millis(100))
            .build()
            .unwrap();
        let http = HttpClient::with_client(client, policy(2));
        let url = format!("{}/slow", base);
        let result: Result<serde_json::Value, _> =
            http.send_json(|c| c.get(&url), &CancellationToken::new()).await;

        let error = result.unwrap_err();
        assert!(matches!(error, ProviderError::Timeout));
        assert!(error.is_transient());
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_pacer_spaces_concurrent_callers() {
        let pacer = Arc::new(Pacer::new(Duration::from_millis(30)));
        let cancel = CancellationToken::new();
        let started = std::time::Instant::now();

        let waits = (0..4).map(|_| {
            let pacer = pacer.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                pacer.wait(&cancel).await.unwrap();
                started.elapsed()
            })
        });
        let mut offsets = Vec::new();
        for wait in waits.collect::<Vec<_>>() {
            offsets.push(wait.await.unwrap());
        }
        offsets.sort();

        assert!(offsets[0] < Duration::from_millis(30));
        for pair in offsets.windows(2) {
            assert!(pair[1] - pair[0] >= Duration::from_millis(25));
        }
    }

    #[tokio::test]
    async fn test_pause_is_cancellable() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });
        let started = std::time::Instant::now();
        let result = pause(Duration::from_secs(30), &cancel).await;
        assert!(matches!(result, Err(ProviderError::Cancelled)));
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
