//! Bounding boxes in canonical `(west, south, east, north)` order.
//!
//! Adapters that need another axis order convert at their own boundary; the
//! rest of the crate only ever sees this type.

use geo::{BoundingRect, Coord, Intersects, MultiPoint, Point, Rect};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Metres per degree of latitude on the 6,371 km sphere
const METRES_PER_DEGREE: f64 = 111_194.9;

/// Padding applied to the extent of a single point so it stays non-degenerate
const MIN_EXTENT_PAD_DEG: f64 = 0.0005;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum BBoxError {
    #[error("bbox coordinates must be finite")]
    NotFinite,

    #[error("bbox coordinates out of WGS84 range")]
    OutOfRange,

    #[error("bbox is inverted or empty: west={west} south={south} east={east} north={north}")]
    Inverted {
        west: f64,
        south: f64,
        east: f64,
        north: f64,
    },
}

/// Axis-aligned bounding box, `west < east && south < north` always holds
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "[f64; 4]", into = "[f64; 4]")]
pub struct BBox {
    west: f64,
    south: f64,
    east: f64,
    north: f64,
}

impl BBox {
    pub fn new(west: f64, south: f64, east: f64, north: f64) -> Result<Self, BBoxError> {
        if ![west, south, east, north].iter().all(|v| v.is_finite()) {
            return Err(BBoxError::NotFinite);
        }
        if !(-180.0..=180.0).contains(&west)
            || !(-180.0..=180.0).contains(&east)
            || !(-90.0..=90.0).contains(&south)
            || !(-90.0..=90.0).contains(&north)
        {
            return Err(BBoxError::OutOfRange);
        }
        if west >= east || south >= north {
            return Err(BBoxError::Inverted {
                west,
                south,
                east,
                north,
            });
        }
        Ok(Self {
            west,
            south,
            east,
            north,
        })
    }

    /// Square-ish box of `half_span_m` metres around a point, clamped to WGS84
    pub fn around(lat: f64, lon: f64, half_span_m: f64) -> Result<Self, BBoxError> {
        let dlat = half_span_m / METRES_PER_DEGREE;
        let dlon = half_span_m / (METRES_PER_DEGREE * lat.to_radians().cos().max(0.01));
        Self::new(
            (lon - dlon).max(-180.0),
            (lat - dlat).max(-90.0),
            (lon + dlon).min(180.0),
            (lat + dlat).min(90.0),
        )
    }

    /// Extent of a set of `(lat, lon)` points; a single point gets a small pad
    pub fn extent_of<I>(points: I) -> Option<Self>
    where
        I: IntoIterator<Item = (f64, f64)>,
    {
        let multi: MultiPoint<f64> = points
            .into_iter()
            .map(|(lat, lon)| Point::new(lon, lat))
            .collect();
        let rect = multi.bounding_rect()?;
        let (min, max) = (rect.min(), rect.max());
        let pad_x = if max.x - min.x < MIN_EXTENT_PAD_DEG { MIN_EXTENT_PAD_DEG } else { 0.0 };
        let pad_y = if max.y - min.y < MIN_EXTENT_PAD_DEG { MIN_EXTENT_PAD_DEG } else { 0.0 };
        Self::new(
            (min.x - pad_x).max(-180.0),
            (min.y - pad_y).max(-90.0),
            (max.x + pad_x).min(180.0),
            (max.y + pad_y).min(90.0),
        )
        .ok()
    }

    pub fn west(&self) -> f64 {
        self.west
    }

    pub fn south(&self) -> f64 {
        self.south
    }

    pub fn east(&self) -> f64 {
        self.east
    }

    pub fn north(&self) -> f64 {
        self.north
    }

    /// `(lat, lon)` of the centre
    pub fn center(&self) -> (f64, f64) {
        ((self.south + self.north) / 2.0, (self.west + self.east) / 2.0)
    }

    /// Inclusive point containment
    pub fn contains(&self, lat: f64, lon: f64) -> bool {
        (self.south..=self.north).contains(&lat) && (self.west..=self.east).contains(&lon)
    }

    pub fn intersects(&self, other: &BBox) -> bool {
        self.to_rect().intersects(&other.to_rect())
    }

    pub fn to_rect(&self) -> Rect<f64> {
        Rect::new(
            Coord {
                x: self.west,
                y: self.south,
            },
            Coord {
                x: self.east,
                y: self.north,
            },
        )
    }

    pub fn as_array(&self) -> [f64; 4] {
        [self.west, self.south, self.east, self.north]
    }
}

impl TryFrom<[f64; 4]> for BBox {
    type Error = BBoxError;

    fn try_from(v: [f64; 4]) -> Result<Self, Self::Error> {
        BBox::new(v[0], v[1], v[2], v[3])
    }
}

impl From<BBox> for [f64; 4] {
    fn from(b: BBox) -> Self {
        b.as_array()
    }
}

impl std::fmt::Display for BBox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{:.5},{:.5},{:.5},{:.5}",
            self.west, self.south, self.east, self.north
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_inverted_and_degenerate() {
        assert!(matches!(
            BBox::new(2.4, 48.8, 2.2, 48.9),
            Err(BBoxError::Inverted { .. })
        ));
        assert!(BBox::new(2.2, 48.8, 2.2, 48.9).is_err());
        assert!(BBox::new(2.2, 48.9, 2.4, 48.9).is_err());
        assert_eq!(BBox::new(f64::NAN, 0.0, 1.0, 1.0), Err(BBoxError::NotFinite));
        assert_eq!(BBox::new(-181.0, 0.0, 1.0, 1.0), Err(BBoxError::OutOfRange));
    }

    #[test]
    fn test_serde_as_array() {
        let b = BBox::new(2.22, 48.81, 2.47, 48.90).unwrap();
        let json = serde_json::to_string(&b).unwrap();
        assert_eq!(json, "[2.22,48.81,2.47,48.9]");

        let back: BBox = serde_json::from_str(&json).unwrap();
        assert_eq!(back, b);

        let inverted: Result<BBox, _> = serde_json::from_str("[2.47,48.81,2.22,48.90]");
        assert!(inverted.is_err());
    }

    #[test]
    fn test_contains_and_intersects() {
        let city = BBox::new(2.22, 48.81, 2.47, 48.90).unwrap();
        let quarter = BBox::new(2.33, 48.84, 2.36, 48.86).unwrap();
        let elsewhere = BBox::new(13.0, 52.3, 13.7, 52.7).unwrap();

        assert!(city.contains(48.85, 2.35));
        assert!(city.contains(48.81, 2.22));
        assert!(!quarter.contains(48.88, 2.35));
        assert!(city.intersects(&quarter));
        assert!(!city.intersects(&elsewhere));
    }

    #[test]
    fn test_around_and_extent() {
        let b = BBox::around(48.8566, 2.3522, 1000.0).unwrap();
        assert!(b.contains(48.8566, 2.3522));
        assert!(b.north() - b.south() > 0.017 && b.north() - b.south() < 0.019);

        let single = BBox::extent_of([(48.85, 2.35)]).unwrap();
        assert!(single.contains(48.85, 2.35));

        let many = BBox::extent_of([(48.85, 2.35), (48.86, 2.30)]).unwrap();
        assert_eq!(many.west(), 2.30);
        assert_eq!(many.north(), 48.86);

        assert!(BBox::extent_of(std::iter::empty()).is_none());
    }
}
