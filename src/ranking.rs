//! Scoring and ordering of the merged venue list.

use std::cmp::Ordering;

use crate::models::{Poi, Provider};

const RATING_WEIGHT: f64 = 2.0;
const WEBSITE_BONUS: f64 = 5.0;

/// Fixed trust weight per source
pub fn provider_bonus(provider: Provider) -> f64 {
    match provider {
        Provider::Osm => 10.0,
        Provider::Web => 2.0,
        Provider::Places | Provider::Otm => 0.0,
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct RankingEngine;

impl RankingEngine {
    pub fn score(&self, poi: &Poi) -> f64 {
        let rating = poi.rating.filter(|r| r.is_finite()).unwrap_or(0.0);
        let website = if poi.has_website() { WEBSITE_BONUS } else { 0.0 };
        rating * RATING_WEIGHT + website + provider_bonus(poi.provider)
    }

    /// Stable sort by descending score, truncated to `limit`
    pub fn rank(&self, pois: Vec<Poi>, limit: usize) -> Vec<Poi> {
        let mut scored: Vec<(f64, Poi)> = pois.into_iter().map(|p| (self.score(&p), p)).collect();
        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(Ordering::Equal));
        scored.truncate(limit);
        scored.into_iter().map(|(_, p)| p).collect()
    }
}
