//! Web-search fallback (Brave Search API). Results are pages, not places, so
//! they carry no coordinates.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};
use url::Url;

use super::{records_into_pois, ProviderAdapter, ProviderQuery, ProviderRecord};
use crate::error::ProviderError;
use crate::http::HttpClient;
use crate::models::{Poi, Provider};

pub const DEFAULT_ENDPOINT: &str = "https://api.search.brave.com/res/v1/web/search";
pub const DEFAULT_INTERVAL: Duration = Duration::from_millis(1000);

const RESULT_COUNT: u32 = 20;

/// Review and listing sites: their pages describe a venue but are not its website
const AGGREGATOR_HOSTS: &[&str] = &[
    "tripadvisor.", "yelp.", "thefork.", "lafourchette.", "opentable.", "google.",
    "facebook.com", "instagram.com", "timeout.com", "foursquare.com", "zomato.com",
    "ubereats.com", "deliveroo.", "justeat.", "doordash.com", "wikipedia.org",
    "michelin.com", "booking.com", "restaurantguru.com",
];

pub struct WebSearchAdapter {
    http: HttpClient,
    endpoint: String,
    api_key: String,
    rate_limit: Duration,
}

impl WebSearchAdapter {
    pub fn new(http: HttpClient, endpoint: &str, api_key: &str, rate_limit: Duration) -> Self {
        Self {
            http,
            endpoint: endpoint.to_string(),
            api_key: api_key.to_string(),
            rate_limit,
        }
    }
}

/// `"<cuisine> <kind> in <place>"`, or near the bbox centre when no place was given
pub fn search_text(query: &ProviderQuery) -> String {
    let kind = query.filter.kind.search_phrase();
    let what = match query.filter.cuisine().filter(|_| query.filter.kind.is_food()) {
        Some(cuisine) => format!("{} {}", cuisine, kind),
        None => kind.to_string(),
    };
    match query.place.as_deref().map(str::trim).filter(|p| !p.is_empty()) {
        Some(place) => format!("{} in {}", what, place),
        None => {
            let (lat, lon) = query.bbox.center();
            format!("{} near {:.4},{:.4}", what, lat, lon)
        }
    }
}

#[async_trait]
impl ProviderAdapter for WebSearchAdapter {
    fn provider(&self) -> Provider {
        Provider::Web
    }

    fn canonical_query(&self, query: &ProviderQuery) -> String {
        search_text(query)
    }

    fn rate_limit_interval(&self) -> Duration {
        self.rate_limit
    }

    #[instrument(skip_all, fields(kind = %query.filter.kind))]
    async fn discover(
        &self,
        query: &ProviderQuery,
        cancel: &CancellationToken,
    ) -> Result<Vec<Poi>, ProviderError> {
        let text = search_text(query);
        let count = RESULT_COUNT.to_string();
        let url = Url::parse_with_params(&self.endpoint, &[("q", text.as_str()), ("count", count.as_str())])?;

        let response: BraveResponse = self
            .http
            .send_json(
                |c| {
                    c.get(url.clone())
                        .header("Accept", "application/json")
                        .header("X-Subscription-Token", &self.api_key)
                },
                cancel,
            )
            .await?;

        let results = response.web.map(|w| w.results).unwrap_or_default();
        debug!("Web search for '{}' returned {} results", text, results.len());
        Ok(records_into_pois(results.into_iter().map(ProviderRecord::Web)))
    }
}

#[derive(Debug, Deserialize)]
struct BraveResponse {
    web: Option<BraveWeb>,
}

#[derive(Debug, Deserialize)]
struct BraveWeb {
    #[serde(default)]
    results: Vec<WebResult>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebResult {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub description: String,
}

/// Venue name from a page title: the part before the first separator
fn title_to_name(title: &str) -> &str {
    const SEPARATORS: [&str; 5] = [" - ", " | ", " – ", " — ", " · "];
    let end = SEPARATORS
        .iter()
        .filter_map(|sep| title.find(sep))
        .min()
        .unwrap_or(title.len());
    title[..end].trim()
}

fn is_aggregator(url: &str) -> bool {
    let Ok(parsed) = Url::parse(url) else {
        return false;
    };
    let host = parsed.host_str().unwrap_or_default().to_lowercase();
    AGGREGATOR_HOSTS.iter().any(|a| host.contains(a))
}

impl WebResult {
    pub(crate) fn into_poi(self) -> Option<Poi> {
        let name = title_to_name(&self.title);
        if name.is_empty() {
            return None;
        }
        let mut poi = Poi::new(Provider::Web, name);
        if !self.url.is_empty() && !is_aggregator(&self.url) {
            poi.website = self.url.clone();
        }
        poi.source_url = self.url;
        if !self.description.is_empty() {
            poi.tags.insert("description".into(), self.description);
        }
        Some(poi)
    }
}
