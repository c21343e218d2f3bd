//! R-tree over the extents of cached result sets.

use rstar::{RTree, RTreeObject, AABB};
use std::collections::HashMap;

use crate::models::BBox;

#[derive(Debug, Clone, PartialEq)]
pub struct IndexedExtent {
    pub query_hash: String,
    pub namespace: String,
    pub scope: String,
    envelope: AABB<[f64; 2]>,
}

impl RTreeObject for IndexedExtent {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        self.envelope
    }
}

impl IndexedExtent {
    pub fn new(
        query_hash: impl Into<String>,
        namespace: impl Into<String>,
        scope: impl Into<String>,
        extent: &BBox,
    ) -> Self {
        Self {
            query_hash: query_hash.into(),
            namespace: namespace.into(),
            scope: scope.into(),
            envelope: envelope_of(extent),
        }
    }
}

fn envelope_of(bbox: &BBox) -> AABB<[f64; 2]> {
    AABB::from_corners([bbox.west(), bbox.south()], [bbox.east(), bbox.north()])
}

/// Extents keyed by query hash, so a refreshed entry replaces its old extent
#[derive(Default)]
pub struct ExtentIndex {
    tree: RTree<IndexedExtent>,
    by_hash: HashMap<String, IndexedExtent>,
}

impl ExtentIndex {
    pub fn build(extents: Vec<IndexedExtent>) -> Self {
        let mut by_hash = HashMap::with_capacity(extents.len());
        for extent in extents {
            by_hash.insert(extent.query_hash.clone(), extent);
        }
        let tree = RTree::bulk_load(by_hash.values().cloned().collect());
        Self { tree, by_hash }
    }

    pub fn insert(&mut self, extent: IndexedExtent) {
        self.remove(&extent.query_hash);
        self.tree.insert(extent.clone());
        self.by_hash.insert(extent.query_hash.clone(), extent);
    }

    pub fn remove(&mut self, query_hash: &str) {
        if let Some(old) = self.by_hash.remove(query_hash) {
            self.tree.remove(&old);
        }
    }

    /// Hashes of entries in `namespace`/`scope` whose extent intersects `bbox`
    pub fn candidates(&self, namespace: &str, scope: &str, bbox: &BBox) -> Vec<String> {
        self.tree
            .locate_in_envelope_intersecting(&envelope_of(bbox))
            .filter(|e| e.namespace == namespace && e.scope == scope)
            .map(|e| e.query_hash.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.tree.size()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
