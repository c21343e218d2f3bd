//! OpenTripMap POI database: one bbox listing, then one detail call per result.
//!
//! Detail calls run as futures inside the adapter's own task. A semaphore
//! bounds how many are in flight and a shared pacer keeps consecutive starts
//! a fixed delay apart. They share the caller's cancellation token, so none of
//! them outlives the discovery that started it.

use async_trait::async_trait;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};
use url::Url;

use super::{records_into_pois, ProviderAdapter, ProviderQuery, ProviderRecord};
use crate::error::ProviderError;
use crate::http::{HttpClient, Pacer};
use crate::models::{Poi, PoiKind, Provider};

pub const DEFAULT_ENDPOINT: &str = "https://api.opentripmap.com/0.1/en/places";

pub struct OpenTripMapAdapter {
    http: HttpClient,
    endpoint: String,
    api_key: String,
    detail_concurrency: usize,
    detail_delay: Duration,
    rate_limit: Duration,
}

impl OpenTripMapAdapter {
    pub fn new(
        http: HttpClient,
        endpoint: &str,
        api_key: &str,
        detail_concurrency: usize,
        detail_delay: Duration,
        rate_limit: Duration,
    ) -> Self {
        Self {
            http,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            detail_concurrency: detail_concurrency.max(1),
            detail_delay,
            rate_limit,
        }
    }

    fn listing_url(&self, query: &ProviderQuery) -> Result<Url, ProviderError> {
        let bbox = &query.bbox;
        let url = Url::parse_with_params(
            &format!("{}/bbox", self.endpoint),
            &[
                ("lon_min", format!("{:.6}", bbox.west())),
                ("lat_min", format!("{:.6}", bbox.south())),
                ("lon_max", format!("{:.6}", bbox.east())),
                ("lat_max", format!("{:.6}", bbox.north())),
                ("kinds", otm_kinds(query.filter.kind).to_string()),
                ("format", "json".to_string()),
                ("limit", query.cap().to_string()),
                ("apikey", self.api_key.clone()),
            ],
        )?;
        Ok(url)
    }

    fn detail_url(&self, xid: &str) -> Result<Url, ProviderError> {
        let mut url = Url::parse(&format!("{}/xid/", self.endpoint))?.join(xid)?;
        url.query_pairs_mut().append_pair("apikey", &self.api_key);
        Ok(url)
    }

    /// Fetch details for every listed place, enriching those that answer
    async fn enrich(&self, places: Vec<OtmPlace>, cancel: &CancellationToken) -> Vec<OtmPlace> {
        let semaphore = Arc::new(Semaphore::new(self.detail_concurrency));
        let pacer = Pacer::new(self.detail_delay);

        let fetches = places.into_iter().map(|place| {
            let semaphore = semaphore.clone();
            let pacer = &pacer;
            async move {
                let Ok(_permit) = semaphore.acquire().await else {
                    return place;
                };
                if cancel.is_cancelled() || place.xid.is_empty() {
                    return place;
                }
                if pacer.wait(cancel).await.is_err() {
                    return place;
                }
                let url = match self.detail_url(&place.xid) {
                    Ok(url) => url,
                    Err(e) => {
                        warn!("Bad OpenTripMap detail URL for {}: {}", place.xid, e);
                        return place;
                    }
                };
                match self
                    .http
                    .send_json::<OtmDetail, _>(|c| c.get(url.clone()), cancel)
                    .await
                {
                    Ok(detail) => place.with_detail(detail),
                    Err(ProviderError::Cancelled) => place,
                    Err(e) => {
                        debug!("OpenTripMap detail for {} failed: {}", place.xid, e);
                        place
                    }
                }
            }
        });

        join_all(fetches).await
    }
}

/// OpenTripMap category list for a kind
fn otm_kinds(kind: PoiKind) -> &'static str {
    match kind {
        PoiKind::Restaurant => "restaurants",
        PoiKind::Cafe => "cafes",
        PoiKind::Bar => "bars,pubs",
        PoiKind::Historic => "historic",
        PoiKind::Museum => "museums",
        PoiKind::Park => "gardens_and_parks",
        PoiKind::Attraction => "interesting_places",
        PoiKind::Viewpoint => "view_points",
    }
}

#[async_trait]
impl ProviderAdapter for OpenTripMapAdapter {
    fn provider(&self) -> Provider {
        Provider::Otm
    }

    fn canonical_query(&self, query: &ProviderQuery) -> String {
        // the key is not part of the query's identity
        let bbox = &query.bbox;
        format!(
            "{}/bbox?lon_min={:.6}&lat_min={:.6}&lon_max={:.6}&lat_max={:.6}&kinds={}&limit={}",
            self.endpoint,
            bbox.west(),
            bbox.south(),
            bbox.east(),
            bbox.north(),
            otm_kinds(query.filter.kind),
            query.cap()
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
        let url = self.listing_url(query)?;
        let mut places: Vec<OtmPlace> = self.http.send_json(|c| c.get(url.clone()), cancel).await?;

        // unnamed entries are useless and not worth a detail call
        places.retain(|p| !p.name.trim().is_empty());
        places.truncate(query.cap());
        debug!("OpenTripMap listed {} named places", places.len());

        let places = self.enrich(places, cancel).await;
        if cancel.is_cancelled() {
            return Err(ProviderError::Cancelled);
        }
        Ok(records_into_pois(places.into_iter().map(ProviderRecord::Otm)))
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct OtmPoint {
    pub lon: f64,
    pub lat: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OtmAddress {
    pub house_number: Option<String>,
    pub road: Option<String>,
    pub postcode: Option<String>,
    pub city: Option<String>,
}

impl OtmAddress {
    fn format(&self) -> String {
        let street = match (&self.house_number, &self.road) {
            (Some(n), Some(r)) => Some(format!("{} {}", n, r)),
            (None, Some(r)) => Some(r.clone()),
            _ => None,
        };
        let locality = match (&self.postcode, &self.city) {
            (Some(p), Some(c)) => Some(format!("{} {}", p, c)),
            (None, Some(c)) => Some(c.clone()),
            _ => None,
        };
        [street, locality].into_iter().flatten().collect::<Vec<_>>().join(", ")
    }
}

/// A listing row, optionally enriched with its detail record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OtmPlace {
    #[serde(default)]
    pub xid: String,
    #[serde(default)]
    pub name: String,
    /// Popularity 0..=7 in listings, "3h"-style strings in details
    pub rate: Option<serde_json::Value>,
    #[serde(default)]
    pub kinds: String,
    pub point: Option<OtmPoint>,
    #[serde(default)]
    pub osm: Option<String>,
    #[serde(default)]
    pub wikidata: Option<String>,
    #[serde(default)]
    pub detail: Option<OtmDetail>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OtmDetail {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub address: Option<OtmAddress>,
    /// The venue's own site
    #[serde(default)]
    pub url: Option<String>,
    /// OpenTripMap's page for the venue
    #[serde(default)]
    pub otm: Option<String>,
    #[serde(default)]
    pub wikipedia: Option<String>,
    pub point: Option<OtmPoint>,
}

impl OtmPlace {
    fn with_detail(mut self, detail: OtmDetail) -> Self {
        self.detail = Some(detail);
        self
    }

    pub(crate) fn into_poi(self) -> Option<Poi> {
        let name = self.name.trim();
        if name.is_empty() {
            return None;
        }
        let mut poi = Poi::new(Provider::Otm, name);

        let point = self.point.or(self.detail.as_ref().and_then(|d| d.point));
        poi.set_coordinates(point.map(|p| p.lat), point.map(|p| p.lon));
        poi.id = self.xid.clone();
        poi.amenity_kind = self.kinds.split(',').next().unwrap_or_default().to_string();
        if !self.kinds.is_empty() {
            poi.tags.insert("kinds".into(), self.kinds.clone());
        }
        if let Some(rate) = self.rate.as_ref().map(rate_text).filter(|r| !r.is_empty()) {
            poi.tags.insert("otm:rate".into(), rate);
        }
        if let Some(wikidata) = self.wikidata {
            poi.tags.insert("wikidata".into(), wikidata);
        }

        match self.detail {
            Some(detail) => {
                poi.address = detail.address.map(|a| a.format()).unwrap_or_default();
                poi.website = detail.url.unwrap_or_default();
                poi.source_url = detail.otm.unwrap_or_else(|| otm_page(&self.xid));
                if let Some(wikipedia) = detail.wikipedia {
                    poi.tags.insert("wikipedia".into(), wikipedia);
                }
            }
            None => poi.source_url = otm_page(&self.xid),
        }
        Some(poi)
    }
}

fn otm_page(xid: &str) -> String {
    if xid.is_empty() {
        String::new()
    } else {
        format!("https://opentripmap.com/en/card/{}", xid)
    }
}

fn rate_text(rate: &serde_json::Value) -> String {
    match rate {
        serde_json::Value::String(s) => s.trim().to_string(),
        serde_json::Value::Number(n) => n.to_string(),
        _ => String::new(),
    }
}
