//! OpenStreetMap via the Overpass API.

use async_trait::async_trait;
use regex::Regex;
use reqwest::header::CONTENT_TYPE;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::LazyLock;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};
use url::form_urlencoded;

use super::{records_into_pois, ProviderAdapter, ProviderQuery, ProviderRecord};
use crate::error::ProviderError;
use crate::http::HttpClient;
use crate::models::{BBox, Poi, PoiKind, Provider};

pub const DEFAULT_ENDPOINT: &str = "https://overpass-api.de/api/interpreter";

/// Server-side query timeout, seconds
const QUERY_TIMEOUT: u32 = 25;

static QL_UNSAFE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^\p{L}\p{N} _-]").expect("static regex"));

pub struct OverpassAdapter {
    http: HttpClient,
    endpoint: String,
    rate_limit: Duration,
}

impl OverpassAdapter {
    pub fn new(http: HttpClient, endpoint: &str, rate_limit: Duration) -> Self {
        Self {
            http,
            endpoint: endpoint.to_string(),
            rate_limit,
        }
    }
}

/// Tag selectors for a kind, each becoming one node/way/relation clause
fn tag_selectors(kind: PoiKind) -> &'static [&'static str] {
    match kind {
        PoiKind::Restaurant => &[r#"["amenity"="restaurant"]"#],
        PoiKind::Cafe => &[r#"["amenity"="cafe"]"#],
        PoiKind::Bar => &[r#"["amenity"~"^(bar|pub)$"]"#],
        PoiKind::Historic => &[r#"["historic"]["name"]"#],
        PoiKind::Museum => &[r#"["tourism"="museum"]"#],
        PoiKind::Park => &[r#"["leisure"="park"]["name"]"#],
        PoiKind::Attraction => &[r#"["tourism"="attraction"]"#, r#"["tourism"="artwork"]["name"]"#],
        PoiKind::Viewpoint => &[r#"["tourism"="viewpoint"]"#],
    }
}

/// Overpass wants `(south, west, north, east)`
fn ql_bbox(bbox: &BBox) -> String {
    format!(
        "({:.6},{:.6},{:.6},{:.6})",
        bbox.south(),
        bbox.west(),
        bbox.north(),
        bbox.east()
    )
}

/// Overpass QL for a bbox and filter
pub fn build_query(query: &ProviderQuery) -> String {
    let area = ql_bbox(&query.bbox);
    let cuisine = query
        .filter
        .cuisine()
        .filter(|_| query.filter.kind.is_food())
        .map(|c| QL_UNSAFE.replace_all(&c, "").trim().to_string())
        .filter(|c| !c.is_empty())
        .map(|c| format!(r#"["cuisine"~"{}",i]"#, c))
        .unwrap_or_default();

    let mut ql = format!("[out:json][timeout:{}];\n(\n", QUERY_TIMEOUT);
    for selector in tag_selectors(query.filter.kind) {
        for element in ["node", "way", "relation"] {
            ql.push_str(&format!("  {}{}{}{};\n", element, selector, cuisine, area));
        }
    }
    ql.push_str(");\nout center tags;");
    ql
}

#[async_trait]
impl ProviderAdapter for OverpassAdapter {
    fn provider(&self) -> Provider {
        Provider::Osm
    }

    fn canonical_query(&self, query: &ProviderQuery) -> String {
        build_query(query)
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
        let ql = build_query(query);
        let body = form_urlencoded::Serializer::new(String::new())
            .append_pair("data", &ql)
            .finish();

        let response: OverpassResponse = self
            .http
            .send_json(
                |c| {
                    c.post(&self.endpoint)
                        .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
                        .body(body.clone())
                },
                cancel,
            )
            .await?;

        debug!("Overpass returned {} elements", response.elements.len());
        Ok(records_into_pois(
            response.elements.into_iter().map(ProviderRecord::Osm),
        ))
    }
}

#[derive(Debug, Deserialize)]
pub struct OverpassResponse {
    #[serde(default)]
    pub elements: Vec<OverpassElement>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OverpassElement {
    #[serde(rename = "type")]
    pub element_type: String,
    pub id: i64,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    /// Present on ways and relations with `out center`
    pub center: Option<OverpassCenter>,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct OverpassCenter {
    pub lat: f64,
    pub lon: f64,
}

impl OverpassElement {
    fn tag(&self, key: &str) -> Option<&str> {
        self.tags
            .get(key)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    }

    fn address(&self) -> String {
        let street = match (self.tag("addr:housenumber"), self.tag("addr:street")) {
            (Some(number), Some(street)) => Some(format!("{} {}", number, street)),
            (None, Some(street)) => Some(street.to_string()),
            _ => None,
        };
        let locality = match (self.tag("addr:postcode"), self.tag("addr:city")) {
            (Some(postcode), Some(city)) => Some(format!("{} {}", postcode, city)),
            (None, Some(city)) => Some(city.to_string()),
            (Some(postcode), None) => Some(postcode.to_string()),
            _ => None,
        };
        [street, locality].into_iter().flatten().collect::<Vec<_>>().join(", ")
    }

    pub(crate) fn into_poi(self) -> Option<Poi> {
        let name = self.tag("name")?.to_string();
        let mut poi = Poi::new(Provider::Osm, name);

        let (lat, lon) = match (self.lat, self.lon, self.center) {
            (Some(lat), Some(lon), _) => (Some(lat), Some(lon)),
            (_, _, Some(center)) => (Some(center.lat), Some(center.lon)),
            _ => (None, None),
        };
        poi.set_coordinates(lat, lon);

        poi.id = format!("{}/{}", self.element_type, self.id);
        poi.source_url = format!(
            "https://www.openstreetmap.org/{}/{}",
            self.element_type, self.id
        );
        poi.address = self.address();
        poi.website = ["website", "contact:website", "url"]
            .iter()
            .find_map(|k| self.tag(k))
            .unwrap_or_default()
            .to_string();
        poi.amenity_kind = ["amenity", "tourism", "historic", "leisure"]
            .iter()
            .find_map(|k| self.tag(k))
            .unwrap_or_default()
            .to_string();
        poi.tags = self.tags;
        Some(poi)
    }
}
