//! Remote geocoders. Each response shape gets its own typed struct; extents are
//! converted to `(west, south, east, north)` here and nowhere else.

use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use url::Url;

use crate::error::{GeocodeError, ProviderError};
use crate::http::HttpClient;
use crate::models::{is_valid_coordinate, BBox, GeocodeResult, GeocodeSource};

pub const GEOAPIFY_ENDPOINT: &str = "https://api.geoapify.com/v1/geocode/search";
pub const OPENCAGE_ENDPOINT: &str = "https://api.opencagedata.com/geocode/v1/json";
pub const LOCATIONIQ_ENDPOINT: &str = "https://us1.locationiq.com/v1/search";
pub const NOMINATIM_ENDPOINT: &str = "https://nominatim.openstreetmap.org/search";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteGeocoder {
    Geoapify { endpoint: String, api_key: String },
    OpenCage { endpoint: String, api_key: String },
    LocationIq { endpoint: String, api_key: String },
    Nominatim { endpoint: String },
}

impl RemoteGeocoder {
    pub fn source(&self) -> GeocodeSource {
        match self {
            RemoteGeocoder::Geoapify { .. } => GeocodeSource::Geoapify,
            RemoteGeocoder::OpenCage { .. } => GeocodeSource::OpenCage,
            RemoteGeocoder::LocationIq { .. } => GeocodeSource::LocationIq,
            RemoteGeocoder::Nominatim { .. } => GeocodeSource::Nominatim,
        }
    }

    /// Full request URL for `place`
    pub fn request_url(&self, place: &str) -> Result<Url, ProviderError> {
        let url = match self {
            RemoteGeocoder::Geoapify { endpoint, api_key } => Url::parse_with_params(
                endpoint,
                &[("text", place), ("format", "json"), ("limit", "1"), ("apiKey", api_key)],
            )?,
            RemoteGeocoder::OpenCage { endpoint, api_key } => Url::parse_with_params(
                endpoint,
                &[("q", place), ("key", api_key), ("limit", "1"), ("no_annotations", "1")],
            )?,
            RemoteGeocoder::LocationIq { endpoint, api_key } => Url::parse_with_params(
                endpoint,
                &[("q", place), ("key", api_key), ("format", "json"), ("limit", "1")],
            )?,
            RemoteGeocoder::Nominatim { endpoint } => Url::parse_with_params(
                endpoint,
                &[("q", place), ("format", "jsonv2"), ("limit", "1")],
            )?,
        };
        Ok(url)
    }

    pub async fn lookup(
        &self,
        http: &HttpClient,
        place: &str,
        cancel: &CancellationToken,
    ) -> Result<GeocodeResult, GeocodeError> {
        let url = self.request_url(place)?;
        debug!("Geocoding '{}' via {}", place, self.source());

        let source = self.source();
        let located = match self {
            RemoteGeocoder::Geoapify { .. } => {
                let body: GeoapifyResponse = http.send_json(|c| c.get(url.clone()), cancel).await?;
                body.results.into_iter().next().map(Located::from)
            }
            RemoteGeocoder::OpenCage { .. } => {
                let body: OpenCageResponse = http.send_json(|c| c.get(url.clone()), cancel).await?;
                body.results.into_iter().next().map(Located::from)
            }
            RemoteGeocoder::LocationIq { .. } | RemoteGeocoder::Nominatim { .. } => {
                let body: Vec<NominatimPlace> =
                    http.send_json(|c| c.get(url.clone()), cancel).await?;
                body.into_iter().next().map(Located::from)
            }
        };

        located
            .ok_or_else(|| GeocodeError::NotFound(place.to_string()))?
            .into_result(place, source)
    }
}

/// Common shape every geocoder response is reduced to
#[derive(Debug)]
struct Located {
    lat: Option<f64>,
    lon: Option<f64>,
    display_name: String,
    /// west, south, east, north
    extent: Option<[f64; 4]>,
}

impl Located {
    fn into_result(self, place: &str, source: GeocodeSource) -> Result<GeocodeResult, GeocodeError> {
        let (lat, lon) = match (self.lat, self.lon) {
            (Some(lat), Some(lon)) if is_valid_coordinate(lat, lon) => (lat, lon),
            _ => return Err(GeocodeError::NotFound(place.to_string())),
        };
        let bbox = match self.extent.map(BBox::try_from) {
            Some(Ok(bbox)) => Some(bbox),
            Some(Err(e)) => {
                warn!("{} returned an unusable extent for '{}': {}", source, place, e);
                None
            }
            None => None,
        };
        Ok(GeocodeResult {
            lat,
            lon,
            display_name: if self.display_name.is_empty() {
                place.to_string()
            } else {
                self.display_name
            },
            bbox,
            source,
        })
    }
}

#[derive(Debug, Deserialize)]
struct GeoapifyResponse {
    #[serde(default)]
    results: Vec<GeoapifyResult>,
}

#[derive(Debug, Deserialize)]
struct GeoapifyResult {
    lat: Option<f64>,
    lon: Option<f64>,
    #[serde(default)]
    formatted: String,
    bbox: Option<GeoapifyBBox>,
}

#[derive(Debug, Deserialize)]
struct GeoapifyBBox {
    lon1: f64,
    lat1: f64,
    lon2: f64,
    lat2: f64,
}

impl From<GeoapifyResult> for Located {
    fn from(r: GeoapifyResult) -> Self {
        Located {
            lat: r.lat,
            lon: r.lon,
            display_name: r.formatted,
            extent: r.bbox.map(|b| {
                [
                    b.lon1.min(b.lon2),
                    b.lat1.min(b.lat2),
                    b.lon1.max(b.lon2),
                    b.lat1.max(b.lat2),
                ]
            }),
        }
    }
}

#[derive(Debug, Deserialize)]
struct OpenCageResponse {
    #[serde(default)]
    results: Vec<OpenCageResult>,
}

#[derive(Debug, Deserialize)]
struct OpenCageResult {
    geometry: Option<OpenCagePoint>,
    #[serde(default)]
    formatted: String,
    bounds: Option<OpenCageBounds>,
}

#[derive(Debug, Deserialize)]
struct OpenCagePoint {
    lat: f64,
    lng: f64,
}

#[derive(Debug, Deserialize)]
struct OpenCageBounds {
    northeast: OpenCagePoint,
    southwest: OpenCagePoint,
}

impl From<OpenCageResult> for Located {
    fn from(r: OpenCageResult) -> Self {
        Located {
            lat: r.geometry.as_ref().map(|g| g.lat),
            lon: r.geometry.as_ref().map(|g| g.lng),
            display_name: r.formatted,
            extent: r
                .bounds
                .map(|b| [b.southwest.lng, b.southwest.lat, b.northeast.lng, b.northeast.lat]),
        }
    }
}

/// Nominatim-style result, also served by LocationIQ. Numbers arrive as strings.
#[derive(Debug, Deserialize)]
struct NominatimPlace {
    lat: Option<String>,
    lon: Option<String>,
    #[serde(default)]
    display_name: String,
    /// south, north, west, east
    #[serde(default)]
    boundingbox: Vec<String>,
}

impl From<NominatimPlace> for Located {
    fn from(r: NominatimPlace) -> Self {
        let parse = |s: &Option<String>| s.as_deref().and_then(|v| v.trim().parse::<f64>().ok());
        let extent = match r
            .boundingbox
            .iter()
            .map(|v| v.trim().parse::<f64>())
            .collect::<Result<Vec<_>, _>>()
        {
            Ok(v) if v.len() == 4 => Some([v[2], v[0], v[3], v[1]]),
            _ => None,
        };
        Located {
            lat: parse(&r.lat),
            lon: parse(&r.lon),
            display_name: r.display_name,
            extent,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nominatim_axis_order() {
        let body: Vec<NominatimPlace> = serde_json::from_str(
            r#"[{"lat": "48.8588897", "lon": "2.3200410", "display_name": "Paris, France",
                 "boundingbox": ["48.8155755", "48.9021560", "2.2241220", "2.4697602"]}]"#,
        )
        .unwrap();
        let located = Located::from(body.into_iter().next().unwrap());
        let result = located.into_result("Paris", GeocodeSource::Nominatim).unwrap();
        let bbox = result.bbox.unwrap();
        assert_eq!(bbox.west(), 2.2241220);
        assert_eq!(bbox.south(), 48.8155755);
        assert_eq!(bbox.east(), 2.4697602);
        assert_eq!(bbox.north(), 48.9021560);
    }

    #[test]
    fn test_opencage_bounds() {
        let body: OpenCageResponse = serde_json::from_str(
            r#"{"results": [{"geometry": {"lat": 45.76, "lng": 4.83}, "formatted": "Lyon",
                "bounds": {"northeast": {"lat": 45.80, "lng": 4.90}, "southwest": {"lat": 45.70, "lng": 4.77}}}]}"#,
        )
        .unwrap();
        let result = Located::from(body.results.into_iter().next().unwrap())
            .into_result("Lyon", GeocodeSource::OpenCage)
            .unwrap();
        assert_eq!(result.bbox.unwrap().as_array(), [4.77, 45.70, 4.90, 45.80]);
    }

    #[test]
    fn test_geoapify_bbox_corners_any_order() {
        let body: GeoapifyResponse = serde_json::from_str(
            r#"{"results": [{"lat": 41.9, "lon": 12.5, "formatted": "Rome",
                "bbox": {"lon1": 12.6, "lat1": 42.0, "lon2": 12.3, "lat2": 41.7}}]}"#,
        )
        .unwrap();
        let result = Located::from(body.results.into_iter().next().unwrap())
            .into_result("Rome", GeocodeSource::Geoapify)
            .unwrap();
        let bbox = result.bbox.unwrap();
        assert!(bbox.west() < bbox.east() && bbox.south() < bbox.north());
    }

    #[test]
    fn test_degenerate_extent_dropped_point_kept() {
        let located = Located {
            lat: Some(10.0),
            lon: Some(10.0),
            display_name: String::new(),
            extent: Some([10.0, 10.0, 10.0, 10.0]),
        };
        let result = located.into_result("Somewhere", GeocodeSource::LocationIq).unwrap();
        assert!(result.bbox.is_none());
        assert_eq!(result.display_name, "Somewhere");
        assert!(result.search_area().is_some());
    }

    #[test]
    fn test_missing_point_is_not_found() {
        let located = Located {
            lat: None,
            lon: Some(10.0),
            display_name: "x".into(),
            extent: None,
        };
        assert!(matches!(
            located.into_result("x", GeocodeSource::Nominatim),
            Err(GeocodeError::NotFound(_))
        ));
    }

    #[test]
    fn test_request_url_encodes_place() {
        let geocoder = RemoteGeocoder::Nominatim {
            endpoint: NOMINATIM_ENDPOINT.to_string(),
        };
        let url = geocoder.request_url("São Paulo & co").unwrap();
        let q = url.query_pairs().find(|(k, _)| k == "q").unwrap().1.into_owned();
        assert_eq!(q, "São Paulo & co");
    }
}
