//! Core data models shared by every stage of discovery.

pub mod bbox;
pub mod filter;
pub mod geocode;
pub mod poi;

pub use bbox::{BBox, BBoxError};
pub use filter::{is_chain, Filter, PoiKind, CHAIN_KEYWORDS};
pub use geocode::{GeocodeResult, GeocodeSource};
pub use poi::{is_valid_coordinate, normalize_name, BudgetTier, Poi, Provider};
