//! Discovery filters: POI kind, cuisine/name narrowing, chain exclusion.

use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::LazyLock;

use super::poi::{normalize_name, Poi};

/// Kind of venue being searched for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PoiKind {
    #[default]
    Restaurant,
    Cafe,
    Bar,
    Historic,
    Museum,
    Park,
    Attraction,
    Viewpoint,
}

impl PoiKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PoiKind::Restaurant => "restaurant",
            PoiKind::Cafe => "cafe",
            PoiKind::Bar => "bar",
            PoiKind::Historic => "historic",
            PoiKind::Museum => "museum",
            PoiKind::Park => "park",
            PoiKind::Attraction => "attraction",
            PoiKind::Viewpoint => "viewpoint",
        }
    }

    /// Human phrasing used in free-text queries
    pub fn search_phrase(&self) -> &'static str {
        match self {
            PoiKind::Restaurant => "restaurants",
            PoiKind::Cafe => "cafes",
            PoiKind::Bar => "bars",
            PoiKind::Historic => "historic sites",
            PoiKind::Museum => "museums",
            PoiKind::Park => "parks",
            PoiKind::Attraction => "attractions",
            PoiKind::Viewpoint => "viewpoints",
        }
    }

    pub fn is_food(&self) -> bool {
        matches!(self, PoiKind::Restaurant | PoiKind::Cafe | PoiKind::Bar)
    }
}

impl std::fmt::Display for PoiKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PoiKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "restaurant" | "restaurants" | "food" | "dining" => Ok(PoiKind::Restaurant),
            "cafe" | "cafes" | "café" | "coffee" => Ok(PoiKind::Cafe),
            "bar" | "bars" | "pub" | "pubs" => Ok(PoiKind::Bar),
            "historic" | "history" | "historical" => Ok(PoiKind::Historic),
            "museum" | "museums" => Ok(PoiKind::Museum),
            "park" | "parks" => Ok(PoiKind::Park),
            "attraction" | "attractions" | "tourism" => Ok(PoiKind::Attraction),
            "viewpoint" | "viewpoints" => Ok(PoiKind::Viewpoint),
            other => Err(format!("unknown POI kind '{}'", other)),
        }
    }
}

/// What to discover inside a bbox
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Filter {
    pub kind: PoiKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cuisine: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name_contains: Option<String>,
    /// Exclude known chain brands
    #[serde(default)]
    pub local_only: bool,
}

impl Filter {
    pub fn new(kind: PoiKind) -> Self {
        Self {
            kind,
            ..Default::default()
        }
    }

    pub fn with_cuisine(mut self, cuisine: impl Into<String>) -> Self {
        self.cuisine = Some(cuisine.into());
        self
    }

    pub fn local_only(mut self, local_only: bool) -> Self {
        self.local_only = local_only;
        self
    }

    /// Cuisine lowercased and trimmed, `None` when blank
    pub fn cuisine(&self) -> Option<String> {
        self.cuisine
            .as_deref()
            .map(|c| c.trim().to_lowercase())
            .filter(|c| !c.is_empty())
    }

    /// Whether a mapped POI passes this filter.
    ///
    /// A POI that carries a `cuisine` tag must match the requested cuisine;
    /// POIs without one are admitted since the upstream query was already
    /// narrowed by cuisine.
    pub fn admits(&self, poi: &Poi) -> bool {
        if poi.name.trim().is_empty() {
            return false;
        }
        if self.local_only && is_chain(&poi.name) {
            return false;
        }
        if let Some(cuisine) = self.cuisine() {
            if let Some(tagged) = poi.tag("cuisine") {
                let tagged = tagged.to_lowercase();
                let matches = tagged
                    .split([';', ','])
                    .any(|c| c.trim().contains(&cuisine))
                    || poi.name.to_lowercase().contains(&cuisine);
                if !matches {
                    return false;
                }
            }
        }
        if let Some(needle) = self.name_contains.as_deref() {
            let needle = needle.trim().to_lowercase();
            if !needle.is_empty() && !poi.name.to_lowercase().contains(&needle) {
                return false;
            }
        }
        true
    }

    /// Stable key used to scope cache entries to one kind of search
    pub fn scope(&self) -> String {
        self.kind.as_str().to_string()
    }
}

/// Whether a venue name belongs to a known chain brand (whole-word match)
pub fn is_chain(name: &str) -> bool {
    let padded = format!(" {} ", normalize_name(name));
    CHAIN_PATTERNS.iter().any(|pattern| padded.contains(pattern.as_str()))
}

/// `CHAIN_KEYWORDS` normalized once and padded for whole-word matching
static CHAIN_PATTERNS: LazyLock<Vec<String>> = LazyLock::new(|| {
    CHAIN_KEYWORDS
        .iter()
        .map(|keyword| normalize_name(keyword))
        .filter(|keyword| !keyword.is_empty())
        .map(|keyword| format!(" {} ", keyword))
        .collect()
});

/// Chain and franchise brands excluded by `local_only`
pub const CHAIN_KEYWORDS: &[&str] = &[
    // Global fast food and coffee
    "McDonald's", "Burger King", "KFC", "Subway", "Starbucks", "Pizza Hut",
    "Domino's", "Taco Bell", "Wendy's", "Dunkin'", "Dunkin Donuts", "Costa Coffee",
    "Pret A Manger", "Nando's", "Five Guys", "Chipotle", "Panera Bread", "Tim Hortons",
    "Papa John's", "Little Caesars", "Popeyes", "Chick-fil-A", "Arby's", "Sonic Drive-In",
    "Dairy Queen", "Jack in the Box", "Carl's Jr", "Hardee's", "Whataburger", "In-N-Out",
    "Shake Shack", "Panda Express", "Krispy Kreme", "Baskin-Robbins", "Cold Stone",
    "Cinnabon", "Auntie Anne's", "Sbarro", "Hard Rock Cafe", "Planet Hollywood",
    "Rainforest Cafe", "Hooters",
    // US casual dining
    "Olive Garden", "Applebee's", "Chili's", "TGI Fridays", "Red Lobster",
    "Outback Steakhouse", "Denny's", "IHOP", "Cracker Barrel", "Buffalo Wild Wings",
    "Texas Roadhouse", "Cheesecake Factory", "P.F. Chang's", "Red Robin", "Ruby Tuesday",
    "Bob Evans", "Perkins", "Waffle House", "Huddle House", "Golden Corral",
    "LongHorn Steakhouse", "BJ's Restaurant", "Yard House", "Maggiano's", "Carrabba's",
    "Bonefish Grill", "California Pizza Kitchen", "Buca di Beppo", "Famous Dave's",
    "Logan's Roadhouse", "Ruth's Chris", "Morton's", "Fleming's", "Capital Grille",
    // US quick service
    "Jimmy John's", "Jersey Mike's", "Firehouse Subs", "Quiznos", "Wingstop", "Zaxby's",
    "Bojangles", "Culver's", "Dutch Bros", "Peet's Coffee", "Caribou Coffee", "Qdoba",
    "Moe's Southwest Grill", "El Pollo Loco", "Del Taco", "Taco John's", "Church's Chicken",
    "White Castle", "Krystal Burgers", "Checkers Drive-In", "Rally's", "Steak n Shake", "Freddy's",
    "Raising Cane's", "Noodles & Company", "Sweetgreen", "Potbelly", "Schlotzsky's",
    "McAlister's", "Jason's Deli", "Einstein Bros", "Bruegger's", "Au Bon Pain",
    "Corner Bakery", "Jamba Juice", "Smoothie King", "Tropical Smoothie", "Dickey's",
    // UK and Ireland
    "Greggs", "Wagamama", "Pizza Express", "Zizzi", "Ask Italian", "Prezzo",
    "Frankie & Benny's", "Harvester", "Toby Carvery", "Wetherspoon", "Itsu", "Yo! Sushi",
    "Caffè Nero", "Leon Restaurants", "Bella Italia", "Byron Burger", "Gourmet Burger Kitchen",
    // Continental Europe
    "Boulangerie Paul", "Paul Boulangerie", "Le Pain Quotidien", "Vapiano", "Hippopotamus",
    "Buffalo Grill", "Courtepaille",
    "Flunch", "Quick Burger", "Léon de Bruxelles", "Del Arte", "Columbus Café", "Brioche Dorée",
    "La Mie Câline", "Nordsee", "Kamps", "Backwerk", "Telepizza", "100 Montaditos",
    "Foster's Hollywood", "VIPS", "Rodilla", "Goiko", "Autogrill", "Spizzico",
    "Old Wild West", "Max Burgers", "Espresso House", "Joe & the Juice",
    // Asia-Pacific
    "Jollibee", "Mos Burger", "Lotteria", "Yoshinoya", "Sukiya", "Matsuya",
    "CoCo Ichibanya", "Saizeriya", "Gusto Family Restaurant", "Ootoya", "Din Tai Fung", "Hungry Jack's",
    "Red Rooster", "Oporto", "Guzman y Gomez", "Grill'd", "Boost Juice", "Chowking",
    "Mang Inasal", "Shakey's",
    // Canada
    "Mary Brown's", "Harvey's", "Swiss Chalet", "A&W", "Second Cup", "St-Hubert",
    "Boston Pizza", "East Side Mario's", "Montana's", "Kelsey's", "The Keg", "Earls",
    "Cactus Club", "Moxie's", "Milestones",
];
