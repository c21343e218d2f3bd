//! Commercial places API (Google Places API, Text Search (New)).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

use super::{records_into_pois, ProviderAdapter, ProviderQuery, ProviderRecord};
use crate::error::ProviderError;
use crate::http::{pause, HttpClient};
use crate::models::{BudgetTier, Poi, PoiKind, Provider};

pub const DEFAULT_ENDPOINT: &str = "https://places.googleapis.com/v1/places:searchText";

const FIELD_MASK: &str = "places.id,places.displayName,places.formattedAddress,places.location,\
places.websiteUri,places.googleMapsUri,places.rating,places.priceLevel,places.types,\
places.primaryType,nextPageToken";

const MAX_PAGES: usize = 3;
const PAGE_SIZE: u32 = 20;

pub struct PlacesAdapter {
    http: HttpClient,
    endpoint: String,
    api_key: String,
    page_delay: Duration,
    rate_limit: Duration,
}

impl PlacesAdapter {
    pub fn new(
        http: HttpClient,
        endpoint: &str,
        api_key: &str,
        page_delay: Duration,
        rate_limit: Duration,
    ) -> Self {
        Self {
            http,
            endpoint: endpoint.to_string(),
            api_key: api_key.to_string(),
            page_delay,
            rate_limit,
        }
    }
}

/// Place type used as `includedType`, when the kind has one
fn included_type(kind: PoiKind) -> Option<&'static str> {
    match kind {
        PoiKind::Restaurant => Some("restaurant"),
        PoiKind::Cafe => Some("cafe"),
        PoiKind::Bar => Some("bar"),
        PoiKind::Museum => Some("museum"),
        PoiKind::Park => Some("park"),
        PoiKind::Attraction => Some("tourist_attraction"),
        PoiKind::Historic => Some("historical_landmark"),
        PoiKind::Viewpoint => None,
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct SearchTextRequest {
    text_query: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    included_type: Option<&'static str>,
    location_restriction: LocationRestriction,
    page_size: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    page_token: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
struct LocationRestriction {
    rectangle: Rectangle,
}

#[derive(Debug, Clone, Serialize)]
struct Rectangle {
    low: LatLng,
    high: LatLng,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct LatLng {
    pub latitude: f64,
    pub longitude: f64,
}

fn build_request(query: &ProviderQuery) -> SearchTextRequest {
    let text_query = match query.filter.cuisine().filter(|_| query.filter.kind.is_food()) {
        Some(cuisine) => format!("{} {}", cuisine, query.filter.kind.search_phrase()),
        None => query.filter.kind.search_phrase().to_string(),
    };
    SearchTextRequest {
        text_query,
        included_type: included_type(query.filter.kind),
        location_restriction: LocationRestriction {
            rectangle: Rectangle {
                low: LatLng {
                    latitude: query.bbox.south(),
                    longitude: query.bbox.west(),
                },
                high: LatLng {
                    latitude: query.bbox.north(),
                    longitude: query.bbox.east(),
                },
            },
        },
        page_size: PAGE_SIZE,
        page_token: None,
    }
}

#[async_trait]
impl ProviderAdapter for PlacesAdapter {
    fn provider(&self) -> Provider {
        Provider::Places
    }

    fn canonical_query(&self, query: &ProviderQuery) -> String {
        // the key is not part of the query's identity
        let request = build_request(query);
        let rect = &request.location_restriction.rectangle;
        format!(
            "{}?textQuery={}&includedType={}&low={:.6},{:.6}&high={:.6},{:.6}&pageSize={}",
            self.endpoint,
            request.text_query,
            request.included_type.unwrap_or_default(),
            rect.low.latitude,
            rect.low.longitude,
            rect.high.latitude,
            rect.high.longitude,
            request.page_size
        )
    }

    fn rate_limit_interval(&self) -> Duration {
        self.rate_limit
    }

    #[instrument(skip_all, fields(bbox = %query.bbox, kind = %query.filter.kind))]
    async fn discover(
        &self,
        query: &ProviderQuery,
        cancel: &CancellationToken,
    ) -> Result<Vec<Poi>, ProviderError> {
        let mut request = build_request(query);
        let mut records = Vec::new();

        for page in 0..MAX_PAGES {
            if page > 0 {
                pause(self.page_delay, cancel).await?;
            }
            let response: SearchTextResponse = self
                .http
                .send_json(
                    |c| {
                        c.post(&self.endpoint)
                            .header("X-Goog-Api-Key", &self.api_key)
                            .header("X-Goog-FieldMask", FIELD_MASK)
                            .json(&request)
                    },
                    cancel,
                )
                .await?;

            debug!("Places page {} returned {} results", page + 1, response.places.len());
            records.extend(response.places);

            match response.next_page_token {
                Some(token) if !token.is_empty() && records.len() < query.cap() => {
                    request.page_token = Some(token);
                }
                _ => break,
            }
        }

        Ok(records_into_pois(records.into_iter().map(ProviderRecord::Places)))
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchTextResponse {
    #[serde(default)]
    places: Vec<PlaceResult>,
    next_page_token: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaceResult {
    #[serde(default)]
    pub id: String,
    pub display_name: Option<LocalizedText>,
    #[serde(default)]
    pub formatted_address: String,
    pub location: Option<LatLng>,
    #[serde(default)]
    pub website_uri: String,
    #[serde(default)]
    pub google_maps_uri: String,
    pub rating: Option<f64>,
    pub price_level: Option<String>,
    #[serde(default)]
    pub types: Vec<String>,
    pub primary_type: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalizedText {
    #[serde(default)]
    pub text: String,
}

fn price_level(level: &str) -> Option<u8> {
    match level {
        "PRICE_LEVEL_FREE" => Some(0),
        "PRICE_LEVEL_INEXPENSIVE" => Some(1),
        "PRICE_LEVEL_MODERATE" => Some(2),
        "PRICE_LEVEL_EXPENSIVE" => Some(3),
        "PRICE_LEVEL_VERY_EXPENSIVE" => Some(4),
        _ => None,
    }
}

impl PlaceResult {
    pub(crate) fn into_poi(self) -> Option<Poi> {
        let name = self
            .display_name
            .map(|d| d.text.trim().to_string())
            .filter(|n| !n.is_empty())?;
        let mut poi = Poi::new(Provider::Places, name);

        poi.set_coordinates(
            self.location.map(|l| l.latitude),
            self.location.map(|l| l.longitude),
        );
        poi.id = self.id;
        poi.address = self.formatted_address;
        poi.website = self.website_uri;
        poi.source_url = self.google_maps_uri;
        poi.rating = self.rating.filter(|r| r.is_finite());
        poi.budget_tier = self
            .price_level
            .as_deref()
            .and_then(price_level)
            .and_then(BudgetTier::from_price_level);
        poi.amenity_kind = self
            .primary_type
            .clone()
            .or_else(|| self.types.first().cloned())
            .unwrap_or_default();
        if !self.types.is_empty() {
            poi.tags.insert("types".into(), self.types.join(";"));
        }
        if let Some(primary) = self.primary_type {
            poi.tags.insert("primaryType".into(), primary);
        }
        Some(poi)
    }
}
