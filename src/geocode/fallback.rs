//! Built-in city extents, the last geocoding resort when every other source fails.

use crate::models::{normalize_name, BBox, GeocodeResult, GeocodeSource};

struct BuiltinCity {
    /// Normalized canonical name first, then aliases
    names: &'static [&'static str],
    display: &'static str,
    /// west, south, east, north
    bbox: [f64; 4],
}

const BUILTIN_CITIES: &[BuiltinCity] = &[
    BuiltinCity { names: &["paris"], display: "Paris, France", bbox: [2.2241, 48.8156, 2.4699, 48.9022] },
    BuiltinCity { names: &["london"], display: "London, United Kingdom", bbox: [-0.5103, 51.2868, 0.3340, 51.6919] },
    BuiltinCity { names: &["new york", "nyc", "new york city"], display: "New York, USA", bbox: [-74.2591, 40.4774, -73.7004, 40.9176] },
    BuiltinCity { names: &["los angeles"], display: "Los Angeles, USA", bbox: [-118.6682, 33.7037, -118.1553, 34.3373] },
    BuiltinCity { names: &["san francisco"], display: "San Francisco, USA", bbox: [-122.5149, 37.7081, -122.3570, 37.8324] },
    BuiltinCity { names: &["chicago"], display: "Chicago, USA", bbox: [-87.9401, 41.6445, -87.5237, 42.0230] },
    BuiltinCity { names: &["boston"], display: "Boston, USA", bbox: [-71.1912, 42.2279, -70.9860, 42.3974] },
    BuiltinCity { names: &["washington", "washington dc"], display: "Washington, D.C., USA", bbox: [-77.1198, 38.7916, -76.9094, 38.9958] },
    BuiltinCity { names: &["seattle"], display: "Seattle, USA", bbox: [-122.4596, 47.4810, -122.2244, 47.7341] },
    BuiltinCity { names: &["miami"], display: "Miami, USA", bbox: [-80.3197, 25.7091, -80.1392, 25.8556] },
    BuiltinCity { names: &["toronto"], display: "Toronto, Canada", bbox: [-79.6393, 43.5810, -79.1156, 43.8555] },
    BuiltinCity { names: &["montreal", "montréal"], display: "Montréal, Canada", bbox: [-73.9741, 45.4100, -73.4742, 45.7047] },
    BuiltinCity { names: &["vancouver"], display: "Vancouver, Canada", bbox: [-123.2248, 49.1989, -123.0232, 49.3170] },
    BuiltinCity { names: &["mexico city", "ciudad de méxico", "cdmx"], display: "Mexico City, Mexico", bbox: [-99.3649, 19.0482, -98.9403, 19.5927] },
    BuiltinCity { names: &["rome", "roma"], display: "Rome, Italy", bbox: [12.3430, 41.7690, 12.6390, 41.9960] },
    BuiltinCity { names: &["milan", "milano"], display: "Milan, Italy", bbox: [9.0408, 45.3867, 9.2781, 45.5358] },
    BuiltinCity { names: &["florence", "firenze"], display: "Florence, Italy", bbox: [11.1497, 43.7279, 11.3374, 43.8330] },
    BuiltinCity { names: &["madrid"], display: "Madrid, Spain", bbox: [-3.8890, 40.3121, -3.5179, 40.6437] },
    BuiltinCity { names: &["barcelona"], display: "Barcelona, Spain", bbox: [2.0525, 41.3170, 2.2280, 41.4682] },
    BuiltinCity { names: &["lisbon", "lisboa"], display: "Lisbon, Portugal", bbox: [-9.2298, 38.6914, -9.0863, 38.7958] },
    BuiltinCity { names: &["berlin"], display: "Berlin, Germany", bbox: [13.0884, 52.3383, 13.7611, 52.6755] },
    BuiltinCity { names: &["munich", "münchen", "munchen"], display: "Munich, Germany", bbox: [11.3608, 48.0616, 11.7229, 48.2482] },
    BuiltinCity { names: &["amsterdam"], display: "Amsterdam, Netherlands", bbox: [4.7287, 52.2782, 5.0791, 52.4311] },
    BuiltinCity { names: &["brussels", "bruxelles"], display: "Brussels, Belgium", bbox: [4.3139, 50.7963, 4.4370, 50.9137] },
    BuiltinCity { names: &["vienna", "wien"], display: "Vienna, Austria", bbox: [16.1826, 48.1183, 16.5775, 48.3231] },
    BuiltinCity { names: &["prague", "praha"], display: "Prague, Czechia", bbox: [14.2244, 49.9419, 14.7068, 50.1774] },
    BuiltinCity { names: &["zurich", "zürich"], display: "Zürich, Switzerland", bbox: [8.4480, 47.3202, 8.6254, 47.4347] },
    BuiltinCity { names: &["copenhagen", "københavn"], display: "Copenhagen, Denmark", bbox: [12.4530, 55.6150, 12.6500, 55.7270] },
    BuiltinCity { names: &["stockholm"], display: "Stockholm, Sweden", bbox: [17.7606, 59.2244, 18.2001, 59.4414] },
    BuiltinCity { names: &["dublin"], display: "Dublin, Ireland", bbox: [-6.3872, 53.2987, -6.1145, 53.4110] },
    BuiltinCity { names: &["edinburgh"], display: "Edinburgh, United Kingdom", bbox: [-3.4495, 55.8819, -3.0778, 56.0034] },
    BuiltinCity { names: &["athens", "athina"], display: "Athens, Greece", bbox: [23.6850, 37.9430, 23.7900, 38.0250] },
    BuiltinCity { names: &["istanbul"], display: "Istanbul, Türkiye", bbox: [28.5960, 40.8020, 29.4260, 41.2300] },
    BuiltinCity { names: &["tokyo"], display: "Tokyo, Japan", bbox: [139.5630, 35.5200, 139.9190, 35.8180] },
    BuiltinCity { names: &["kyoto"], display: "Kyoto, Japan", bbox: [135.6200, 34.9000, 135.8500, 35.1000] },
    BuiltinCity { names: &["seoul"], display: "Seoul, South Korea", bbox: [126.7645, 37.4133, 127.1839, 37.7151] },
    BuiltinCity { names: &["hong kong"], display: "Hong Kong", bbox: [113.8259, 22.1535, 114.4307, 22.5619] },
    BuiltinCity { names: &["singapore"], display: "Singapore", bbox: [103.6057, 1.1587, 104.0885, 1.4707] },
    BuiltinCity { names: &["bangkok"], display: "Bangkok, Thailand", bbox: [100.3279, 13.4939, 100.9385, 13.9551] },
    BuiltinCity { names: &["sydney"], display: "Sydney, Australia", bbox: [150.5209, -34.1183, 151.3430, -33.5781] },
    BuiltinCity { names: &["melbourne"], display: "Melbourne, Australia", bbox: [144.5937, -38.4339, 145.5125, -37.5113] },
    BuiltinCity { names: &["buenos aires"], display: "Buenos Aires, Argentina", bbox: [-58.5315, -34.7056, -58.3354, -34.5266] },
    BuiltinCity { names: &["rio de janeiro"], display: "Rio de Janeiro, Brazil", bbox: [-43.7955, -23.0828, -43.0990, -22.7460] },
    BuiltinCity { names: &["sao paulo", "são paulo"], display: "São Paulo, Brazil", bbox: [-46.8254, -24.0084, -46.3650, -23.3567] },
    BuiltinCity { names: &["cape town"], display: "Cape Town, South Africa", bbox: [18.3074, -34.3583, 18.9352, -33.4712] },
    BuiltinCity { names: &["marrakech", "marrakesh"], display: "Marrakesh, Morocco", bbox: [-8.0900, 31.5700, -7.9300, 31.6900] },
    BuiltinCity { names: &["dubai"], display: "Dubai, UAE", bbox: [54.8900, 24.7900, 55.5650, 25.3580] },
];

/// Match a place against the built-in table.
///
/// A name matches when the normalized query equals it or starts with it
/// followed by a space ("paris france" matches "paris"). The longest matching
/// name wins.
pub fn lookup(place: &str) -> Option<GeocodeResult> {
    let query = normalize_name(place);
    if query.is_empty() {
        return None;
    }

    let (city, _) = BUILTIN_CITIES
        .iter()
        .flat_map(|city| city.names.iter().map(move |name| (city, *name)))
        .filter(|(_, name)| query == *name || query.starts_with(&format!("{} ", name)))
        .max_by_key(|(_, name)| name.len())?;

    let bbox = BBox::try_from(city.bbox).ok()?;
    let (lat, lon) = bbox.center();
    Some(GeocodeResult {
        lat,
        lon,
        display_name: city.display.to_string(),
        bbox: Some(bbox),
        source: GeocodeSource::Builtin,
    })
}

pub fn city_count() -> usize {
    BUILTIN_CITIES.len()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_builtin_box_is_valid() {
        for city in BUILTIN_CITIES {
            assert!(BBox::try_from(city.bbox).is_ok(), "{}", city.display);
            for name in city.names {
                assert_eq!(normalize_name(name), *name, "{} is not normalized", name);
            }
        }
        assert!(city_count() >= 40);
    }

    #[test]
    fn test_exact_and_prefix() {
        assert_eq!(lookup("Paris").unwrap().display_name, "Paris, France");
        assert_eq!(lookup("paris, France").unwrap().display_name, "Paris, France");
        assert_eq!(lookup("  NEW YORK city ").unwrap().display_name, "New York, USA");
        assert!(lookup("Parisville").is_none());
        assert!(lookup("").is_none());
    }

    #[test]
    fn test_multi_word_prefix() {
        let rio = lookup("Rio de Janeiro, Brazil").unwrap();
        assert_eq!(rio.display_name, "Rio de Janeiro, Brazil");
        assert_eq!(lookup("São Paulo").unwrap().display_name, "São Paulo, Brazil");
        assert!(lookup("Rio Grande").is_none());
    }

    #[test]
    fn test_center_inside_box() {
        let tokyo = lookup("tokyo").unwrap();
        assert!(tokyo.bbox.unwrap().contains(tokyo.lat, tokyo.lon));
    }
}
