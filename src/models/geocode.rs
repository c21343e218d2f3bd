//! Geocoding result types.

use serde::{Deserialize, Serialize};

use super::BBox;

/// Half-span used when a geocoder returns a point but no extent (≈ a city centre)
pub const DEFAULT_POINT_HALF_SPAN_M: f64 = 5_000.0;

/// Which source resolved a place name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GeocodeSource {
    Cache,
    Seed,
    Geoapify,
    OpenCage,
    LocationIq,
    Nominatim,
    Builtin,
}

impl std::fmt::Display for GeocodeSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GeocodeSource::Cache => write!(f, "cache"),
            GeocodeSource::Seed => write!(f, "seed"),
            GeocodeSource::Geoapify => write!(f, "geoapify"),
            GeocodeSource::OpenCage => write!(f, "opencage"),
            GeocodeSource::LocationIq => write!(f, "locationiq"),
            GeocodeSource::Nominatim => write!(f, "nominatim"),
            GeocodeSource::Builtin => write!(f, "builtin"),
        }
    }
}

/// A resolved place. Immutable once produced; cached by normalized query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeocodeResult {
    pub lat: f64,
    pub lon: f64,
    pub display_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bbox: Option<BBox>,
    pub source: GeocodeSource,
}

impl GeocodeResult {
    /// The result's own extent, or a box around its point
    pub fn search_area(&self) -> Option<BBox> {
        self.bbox
            .or_else(|| BBox::around(self.lat, self.lon, DEFAULT_POINT_HALF_SPAN_M).ok())
    }
}
