//! Cross-provider deduplication.
//!
//! Two passes per incoming POI, first-seen wins as the representative:
//!
//! 1. Exact URL: a POI whose canonical website was already seen folds into
//!    that cluster.
//! 2. Name + proximity: among clusters with the same normalized name, merge if
//!    both have coordinates and are under the distance threshold. Without
//!    coordinates, merge only when both websites are set and equal, or when
//!    websites are missing and the raw names are identical.
//!
//! Folding never changes a representative's name, coordinates or URLs, so
//! merging an already merged list changes nothing.

use std::collections::HashMap;
use url::Url;

use crate::models::Poi;

/// Same-name venues closer than this are one venue
pub const MERGE_DISTANCE_M: f64 = 150.0;

pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Great-circle distance in metres
pub fn haversine_m(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let dlat = (lat2 - lat1).to_radians();
    let dlon = (lon2 - lon1).to_radians();

    let a = (dlat / 2.0).sin().powi(2)
        + lat1.to_radians().cos() * lat2.to_radians().cos() * (dlon / 2.0).sin().powi(2);

    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());

    EARTH_RADIUS_M * c
}

/// Comparable form of a URL: lowercase host without `www.`, no scheme,
/// fragment or trailing slash
pub fn normalize_url(raw: &str) -> Option<String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    let parsed = Url::parse(raw).or_else(|_| Url::parse(&format!("http://{}", raw)));
    let normalized = match parsed {
        Ok(url) if url.host_str().is_some() => {
            let host = url.host_str().unwrap_or_default().to_lowercase();
            let host = host.strip_prefix("www.").unwrap_or(&host).to_string();
            let mut out = format!("{}{}", host, url.path().trim_end_matches('/'));
            if let Some(query) = url.query().filter(|q| !q.is_empty()) {
                out.push('?');
                out.push_str(query);
            }
            out
        }
        _ => raw.trim_end_matches('/').to_lowercase(),
    };
    Some(normalized)
}

/// The venue's own website if it has one, otherwise the provider page
pub fn canonical_website(poi: &Poi) -> Option<String> {
    normalize_url(&poi.website).or_else(|| normalize_url(&poi.source_url))
}

/// One physical venue: a representative plus the POIs folded into it
#[derive(Debug, Clone)]
pub struct DedupeCluster {
    pub representative: Poi,
    pub members: Vec<Poi>,
}

impl DedupeCluster {
    fn new(poi: Poi) -> Self {
        Self {
            representative: poi,
            members: Vec::new(),
        }
    }

    /// Fold `poi` in, filling only the representative's empty secondary fields
    fn absorb(&mut self, poi: Poi) {
        let rep = &mut self.representative;
        if rep.rating.is_none() {
            rep.rating = poi.rating;
        }
        if rep.budget_tier.is_none() {
            rep.budget_tier = poi.budget_tier;
        }
        if rep.address.trim().is_empty() && !poi.address.trim().is_empty() {
            rep.address = poi.address.clone();
        }
        if rep.amenity_kind.is_empty() {
            rep.amenity_kind = poi.amenity_kind.clone();
        }
        for (key, value) in &poi.tags {
            rep.tags.entry(key.clone()).or_insert_with(|| value.clone());
        }
        self.members.push(poi);
    }

    /// Providers that reported this venue, representative first
    pub fn providers(&self) -> Vec<crate::models::Provider> {
        let mut providers = vec![self.representative.provider];
        for member in &self.members {
            if !providers.contains(&member.provider) {
                providers.push(member.provider);
            }
        }
        providers
    }
}

#[derive(Debug, Clone, Copy)]
pub struct DedupeEngine {
    threshold_m: f64,
}

impl Default for DedupeEngine {
    fn default() -> Self {
        Self {
            threshold_m: MERGE_DISTANCE_M,
        }
    }
}

impl DedupeEngine {
    pub fn with_threshold(threshold_m: f64) -> Self {
        Self { threshold_m }
    }

    /// Deduplicated representatives, in first-seen order
    pub fn merge(&self, pois: Vec<Poi>) -> Vec<Poi> {
        self.cluster(pois)
            .into_iter()
            .map(|c| c.representative)
            .collect()
    }

    pub fn cluster(&self, pois: Vec<Poi>) -> Vec<DedupeCluster> {
        let mut clusters: Vec<DedupeCluster> = Vec::new();
        let mut url_owner: HashMap<String, usize> = HashMap::new();
        let mut by_name: HashMap<String, Vec<usize>> = HashMap::new();

        for poi in pois {
            let url = canonical_website(&poi);

            if let Some(&idx) = url.as_ref().and_then(|u| url_owner.get(u)) {
                clusters[idx].absorb(poi);
                continue;
            }

            let name = poi.normalized_name();
            let matched = if name.is_empty() {
                None
            } else {
                by_name.get(&name).and_then(|candidates| {
                    candidates
                        .iter()
                        .copied()
                        .find(|&i| self.same_venue(&clusters[i].representative, &poi))
                })
            };

            let idx = match matched {
                Some(idx) => {
                    clusters[idx].absorb(poi);
                    idx
                }
                None => {
                    clusters.push(DedupeCluster::new(poi));
                    let idx = clusters.len() - 1;
                    if !name.is_empty() {
                        by_name.entry(name).or_default().push(idx);
                    }
                    idx
                }
            };
            if let Some(url) = url {
                url_owner.entry(url).or_insert(idx);
            }
        }

        clusters
    }

    /// Same-named POIs `a` and `b` describe one venue
    fn same_venue(&self, a: &Poi, b: &Poi) -> bool {
        if a.has_coordinates() && b.has_coordinates() {
            return haversine_m(a.lat, a.lon, b.lat, b.lon) < self.threshold_m;
        }
        match (normalize_url(&a.website), normalize_url(&b.website)) {
            (Some(wa), Some(wb)) => wa == wb,
            _ => a.name.trim() == b.name.trim(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{BudgetTier, Provider};

    const PARIS: (f64, f64) = (48.8566, 2.3522);

    /// Point `metres` due north of `PARIS`
    fn north_of_paris(metres: f64) -> (f64, f64) {
        (PARIS.0 + (metres / EARTH_RADIUS_M).to_degrees(), PARIS.1)
    }

    fn at(provider: Provider, name: &str, (lat, lon): (f64, f64)) -> Poi {
        Poi::new(provider, name).with_coordinates(lat, lon)
    }

    fn with_site(provider: Provider, name: &str, website: &str) -> Poi {
        let mut poi = Poi::new(provider, name);
        poi.website = website.to_string();
        poi
    }

    #[test]
    fn test_haversine() {
        let (lat, lon) = north_of_paris(1000.0);
        let d = haversine_m(PARIS.0, PARIS.1, lat, lon);
        assert!((d - 1000.0).abs() < 1e-6);
        assert_eq!(haversine_m(10.0, 10.0, 10.0, 10.0), 0.0);
    }

    #[test]
    fn test_threshold_boundary() {
        let engine = DedupeEngine::default();

        let near = vec![
            at(Provider::Osm, "Café Central", PARIS),
            at(Provider::Places, "Cafe Central", north_of_paris(149.0)),
        ];
        assert_eq!(engine.merge(near).len(), 1);

        let far = vec![
            at(Provider::Osm, "Café Central", PARIS),
            at(Provider::Places, "Café Central", north_of_paris(151.0)),
        ];
        assert_eq!(engine.merge(far).len(), 2);
    }

    #[test]
    fn test_trattoria_roma_40m() {
        let merged = DedupeEngine::default().merge(vec![
            at(Provider::Osm, "Trattoria Roma", PARIS),
            at(Provider::Places, "TRATTORIA ROMA!", north_of_paris(40.0)),
        ]);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].provider, Provider::Osm);
    }

    #[test]
    fn test_no_coordinates_different_websites_never_merge() {
        let merged = DedupeEngine::default().merge(vec![
            with_site(Provider::Web, "Le Petit Bistro", "https://petitbistro-lyon.fr"),
            with_site(Provider::Web, "Le Petit Bistro", "https://petitbistro-paris.fr"),
        ]);
        assert_eq!(merged.len(), 2);
    }

    #[test]
    fn test_no_coordinates_falls_back_to_exact_name() {
        let engine = DedupeEngine::default();
        let exact = engine.merge(vec![
            Poi::new(Provider::Web, "Le Petit Bistro"),
            with_site(Provider::Otm, "Le Petit Bistro", "https://petitbistro.fr"),
        ]);
        assert_eq!(exact.len(), 1);

        let only_normalized = engine.merge(vec![
            Poi::new(Provider::Web, "Le Petit Bistro"),
            Poi::new(Provider::Otm, "le petit bistro"),
        ]);
        assert_eq!(only_normalized.len(), 2);
    }

    #[test]
    fn test_url_pass_ignores_name() {
        let merged = DedupeEngine::default().merge(vec![
            with_site(Provider::Osm, "Trattoria Roma", "https://www.TrattoriaRoma.fr/"),
            with_site(Provider::Web, "Trattoria Roma - Paris 4e", "http://trattoriaroma.fr"),
        ]);
        assert_eq!(merged.len(), 1);
    }

    #[test]
    fn test_representative_enriched_not_rewritten() {
        let osm = at(Provider::Osm, "Trattoria Roma", PARIS);
        let mut places = at(Provider::Places, "Trattoria Roma", north_of_paris(30.0));
        places.rating = Some(4.5);
        places.budget_tier = Some(BudgetTier::Mid);
        places.address = "14 Rue de Rivoli".into();
        places.website = "https://trattoriaroma.fr".into();

        let clusters = DedupeEngine::default().cluster(vec![osm.clone(), places]);
        assert_eq!(clusters.len(), 1);
        let rep = &clusters[0].representative;
        assert_eq!((rep.lat, rep.lon), (osm.lat, osm.lon));
        assert_eq!(rep.website, "");
        assert_eq!(rep.rating, Some(4.5));
        assert_eq!(rep.budget_tier, Some(BudgetTier::Mid));
        assert_eq!(rep.address, "14 Rue de Rivoli");
        assert_eq!(clusters[0].providers(), vec![Provider::Osm, Provider::Places]);
    }

    #[test]
    fn test_merge_is_idempotent() {
        let mut shared_site = at(Provider::Web, "Bistro Alpha", north_of_paris(500.0));
        shared_site.website = "https://alpha.example".into();

        let input = vec![
            at(Provider::Osm, "Trattoria Roma", PARIS),
            at(Provider::Places, "Trattoria Roma", north_of_paris(100.0)),
            at(Provider::Places, "Trattoria Roma", north_of_paris(220.0)),
            at(Provider::Otm, "Trattoria Roma", north_of_paris(320.0)),
            with_site(Provider::Osm, "Bistro Alpha", "https://alpha.example/"),
            shared_site,
            Poi::new(Provider::Web, "Bistro Beta"),
            Poi::new(Provider::Web, "bistro beta"),
            with_site(Provider::Web, "Bistro Beta", "https://beta.example"),
            Poi::new(Provider::Web, "!!!"),
            Poi::new(Provider::Web, "???"),
        ];

        let engine = DedupeEngine::default();
        let once = engine.merge(input);
        let twice = engine.merge(once.clone());
        assert_eq!(once, twice);
    }

    #[test]
    fn test_normalize_url() {
        assert_eq!(
            normalize_url("https://www.Example.com/menu/?lang=fr#top").as_deref(),
            Some("example.com/menu?lang=fr")
        );
        assert_eq!(normalize_url("example.com/").as_deref(), Some("example.com"));
        assert_eq!(normalize_url("   "), None);
    }
}
