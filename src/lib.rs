//! Tamarack - multi-provider point-of-interest discovery
//!
//! Resolves a place to a bounding box, queries several geographic data
//! sources concurrently under one deadline, then merges and ranks what came
//! back. Shared by the `serve` and `discover` binaries.

pub mod cache;
pub mod config;
pub mod dedupe;
pub mod dispatch;
pub mod error;
pub mod geocode;
pub mod http;
pub mod models;
pub mod providers;
pub mod ranking;

pub use config::Config;
pub use dispatch::{DispatchController, DiscoveryReport, DiscoveryRequest, DiscoveryResponse};
pub use models::{BBox, Filter, Poi, PoiKind, Provider};
