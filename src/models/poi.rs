//! Unified point-of-interest record produced by every provider adapter.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::LazyLock;

static NON_ALPHANUMERIC: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^\p{L}\p{N}\s]").expect("static regex"));
static WHITESPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").expect("static regex"));

/// Upstream data source a POI came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    /// OpenStreetMap via Overpass
    Osm,
    /// Commercial places API
    Places,
    /// Web-search fallback
    Web,
    /// OpenTripMap POI database
    Otm,
}

impl Provider {
    /// Stable lowercase name, also used as cache and rate-limit namespace
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Osm => "osm",
            Provider::Places => "places",
            Provider::Web => "web",
            Provider::Otm => "otm",
        }
    }

    pub fn all() -> &'static [Provider] {
        &[Provider::Osm, Provider::Places, Provider::Otm, Provider::Web]
    }
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Coarse price bracket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BudgetTier {
    Cheap,
    Mid,
    Expensive,
}

impl BudgetTier {
    /// Map a 0..=4 price level (0 = free, 4 = very expensive)
    pub fn from_price_level(level: u8) -> Option<Self> {
        match level {
            0 | 1 => Some(BudgetTier::Cheap),
            2 => Some(BudgetTier::Mid),
            3 | 4 => Some(BudgetTier::Expensive),
            _ => None,
        }
    }

    /// Map a `$`-style symbol string ("$", "$$", "€€€", ...)
    pub fn from_symbols(symbols: &str) -> Option<Self> {
        let count = symbols
            .chars()
            .filter(|c| matches!(c, '$' | '€' | '£' | '¥'))
            .count();
        match count {
            1 => Some(BudgetTier::Cheap),
            2 => Some(BudgetTier::Mid),
            3 | 4 => Some(BudgetTier::Expensive),
            _ => None,
        }
    }
}

/// A single venue, normalized across providers.
///
/// Coordinates are either both valid WGS84 values or both zero. Use
/// [`Poi::set_coordinates`] rather than writing `lat`/`lon` directly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Poi {
    /// Provider-local identifier, empty when the provider has none
    #[serde(default)]
    pub id: String,

    pub name: String,

    #[serde(default)]
    pub lat: f64,

    #[serde(default)]
    pub lon: f64,

    #[serde(default)]
    pub address: String,

    /// The venue's own website
    #[serde(default)]
    pub website: String,

    /// The provider's canonical page for this venue
    #[serde(default, rename = "sourceURL")]
    pub source_url: String,

    /// Provider vocabulary preserved as-is
    #[serde(default)]
    pub tags: BTreeMap<String, String>,

    #[serde(default)]
    pub amenity_kind: String,

    pub provider: Provider,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rating: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub budget_tier: Option<BudgetTier>,

    /// Original provider payload
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub raw: serde_json::Value,
}

impl Poi {
    /// Create a POI with only a provider and a name; everything else defaulted
    pub fn new(provider: Provider, name: impl Into<String>) -> Self {
        Self {
            id: String::new(),
            name: name.into(),
            lat: 0.0,
            lon: 0.0,
            address: String::new(),
            website: String::new(),
            source_url: String::new(),
            tags: BTreeMap::new(),
            amenity_kind: String::new(),
            provider,
            rating: None,
            budget_tier: None,
            raw: serde_json::Value::Null,
        }
    }

    /// Set both coordinates, or clear both when either is missing or invalid
    pub fn set_coordinates(&mut self, lat: Option<f64>, lon: Option<f64>) {
        match (lat, lon) {
            (Some(lat), Some(lon)) if is_valid_coordinate(lat, lon) => {
                self.lat = lat;
                self.lon = lon;
            }
            _ => {
                self.lat = 0.0;
                self.lon = 0.0;
            }
        }
    }

    pub fn with_coordinates(mut self, lat: f64, lon: f64) -> Self {
        self.set_coordinates(Some(lat), Some(lon));
        self
    }

    pub fn has_coordinates(&self) -> bool {
        is_valid_coordinate(self.lat, self.lon)
    }

    pub fn has_website(&self) -> bool {
        !self.website.trim().is_empty()
    }

    pub fn tag(&self, key: &str) -> Option<&str> {
        self.tags.get(key).map(String::as_str)
    }

    /// Normalized form of the name used for matching
    pub fn normalized_name(&self) -> String {
        normalize_name(&self.name)
    }
}

/// Both values finite, inside WGS84 range, and not the (0, 0) "unknown" marker.
pub fn is_valid_coordinate(lat: f64, lon: f64) -> bool {
    lat.is_finite()
        && lon.is_finite()
        && (-90.0..=90.0).contains(&lat)
        && (-180.0..=180.0).contains(&lon)
        && !(lat == 0.0 && lon == 0.0)
}

/// Lowercase, strip non-alphanumerics, collapse whitespace
pub fn normalize_name(name: &str) -> String {
    let lowered = name.to_lowercase();
    let stripped = NON_ALPHANUMERIC.replace_all(&lowered, "");
    WHITESPACE.replace_all(stripped.trim(), " ").into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_name() {
        assert_eq!(normalize_name("  Trattoria   Roma! "), "trattoria roma");
        assert_eq!(normalize_name("McDonald's"), "mcdonalds");
        assert_eq!(normalize_name("Café de Flore"), "café de flore");
        assert_eq!(normalize_name("Chick-fil-A"), "chickfila");
    }

    #[test]
    fn test_coordinates_never_mixed() {
        let mut poi = Poi::new(Provider::Osm, "x");
        poi.set_coordinates(Some(48.85), None);
        assert_eq!((poi.lat, poi.lon), (0.0, 0.0));

        poi.set_coordinates(Some(48.85), Some(200.0));
        assert_eq!((poi.lat, poi.lon), (0.0, 0.0));
        assert!(!poi.has_coordinates());

        poi.set_coordinates(Some(48.85), Some(2.35));
        assert!(poi.has_coordinates());
    }

    #[test]
    fn test_budget_tier_mapping() {
        assert_eq!(BudgetTier::from_price_level(1), Some(BudgetTier::Cheap));
        assert_eq!(BudgetTier::from_price_level(2), Some(BudgetTier::Mid));
        assert_eq!(BudgetTier::from_price_level(4), Some(BudgetTier::Expensive));
        assert_eq!(BudgetTier::from_price_level(9), None);
        assert_eq!(BudgetTier::from_symbols("€€"), Some(BudgetTier::Mid));
        assert_eq!(BudgetTier::from_symbols(""), None);
    }

    #[test]
    fn test_serialized_field_names() {
        let poi = Poi::new(Provider::Places, "Roma").with_coordinates(48.0, 2.0);
        let json = serde_json::to_value(&poi).unwrap();
        assert_eq!(json["provider"], "places");
        assert!(json.get("sourceURL").is_some());
        assert!(json.get("amenityKind").is_some());
        assert!(json.get("rating").is_none());
        assert!(json.get("raw").is_none());
    }
}
