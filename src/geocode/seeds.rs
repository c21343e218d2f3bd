//! Local seed files: `<seed_dir>/<slug>.json`, one place per file.
//!
//! The slug lookup reads through `tokio::fs`. The alias scan walks the whole
//! directory, so it runs on the blocking pool.
//!
//! ```json
//! { "displayName": "Paris, France", "lat": 48.8566, "lon": 2.3522,
//!   "bbox": [2.2241, 48.8156, 2.4699, 48.9022], "aliases": ["Paname"] }
//! ```

use serde::Deserialize;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::debug;
use walkdir::WalkDir;

use crate::error::GeocodeError;
use crate::models::{is_valid_coordinate, normalize_name, BBox, GeocodeResult, GeocodeSource};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SeedPlace {
    display_name: String,
    lat: f64,
    lon: f64,
    #[serde(default)]
    bbox: Option<[f64; 4]>,
    #[serde(default)]
    aliases: Vec<String>,
}

impl SeedPlace {
    fn matches(&self, place: &str) -> bool {
        let wanted = place.trim().to_lowercase();
        std::iter::once(&self.display_name)
            .chain(self.aliases.iter())
            .any(|name| name.trim().to_lowercase() == wanted)
    }

    fn into_result(self) -> Result<GeocodeResult, GeocodeError> {
        if !is_valid_coordinate(self.lat, self.lon) {
            return Err(GeocodeError::Seed(format!(
                "invalid coordinates for '{}'",
                self.display_name
            )));
        }
        let bbox = match self.bbox {
            Some(b) => Some(BBox::try_from(b)?),
            None => None,
        };
        Ok(GeocodeResult {
            lat: self.lat,
            lon: self.lon,
            display_name: self.display_name,
            bbox,
            source: GeocodeSource::Seed,
        })
    }
}

/// File-name slug for a place: normalized name with spaces as dashes
pub fn slugify(place: &str) -> String {
    normalize_name(place).replace(' ', "-")
}

#[derive(Debug, Clone)]
pub struct SeedStore {
    dir: PathBuf,
}

impl SeedStore {
    pub fn new<P: AsRef<Path>>(dir: P) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    /// Seed stored under the place's slug
    pub async fn by_slug(&self, place: &str) -> Result<Option<GeocodeResult>, GeocodeError> {
        let slug = slugify(place);
        if slug.is_empty() {
            return Ok(None);
        }
        let path = self.dir.join(format!("{}.json", slug));
        match tokio::fs::read(&path).await {
            Ok(bytes) => parse_seed(&path, &bytes)?.into_result().map(Some),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(GeocodeError::Seed(format!("{}: {}", path.display(), e))),
        }
    }

    /// First seed file whose display name or alias equals `place`
    pub async fn scan(&self, place: &str) -> Result<Option<GeocodeResult>, GeocodeError> {
        let store = self.clone();
        let place = place.to_string();
        tokio::task::spawn_blocking(move || store.scan_blocking(&place))
            .await
            .map_err(|e| GeocodeError::Seed(format!("seed scan aborted: {}", e)))?
    }

    fn scan_blocking(&self, place: &str) -> Result<Option<GeocodeResult>, GeocodeError> {
        if !self.dir.is_dir() {
            return Ok(None);
        }
        for entry in WalkDir::new(&self.dir).follow_links(true).sort_by_file_name() {
            let entry = entry.map_err(|e| GeocodeError::Seed(e.to_string()))?;
            let path = entry.path();
            if !path.is_file() || path.extension().is_none_or(|ext| ext != "json") {
                continue;
            }
            let bytes = match fs::read(path) {
                Ok(bytes) => bytes,
                Err(e) => {
                    debug!("Skipping seed {}: {}", path.display(), e);
                    continue;
                }
            };
            match parse_seed(path, &bytes) {
                Ok(seed) if seed.matches(place) => return seed.into_result().map(Some),
                Ok(_) => {}
                Err(e) => debug!("Skipping seed: {}", e),
            }
        }
        Ok(None)
    }
}

fn parse_seed(path: &Path, bytes: &[u8]) -> Result<SeedPlace, GeocodeError> {
    serde_json::from_slice(bytes)
        .map_err(|e| GeocodeError::Seed(format!("{}: {}", path.display(), e)))
}
