use crate::feature::FeatureId;
use crate::geometry::Envelope;
use rstar::{AABB, RTree, RTreeObject};

/// A feature envelope entry in the R-tree
#[derive(Debug, Clone, PartialEq)]
pub struct IndexedFeature {
    pub fid: FeatureId,
    pub envelope: Envelope,
}

impl RTreeObject for IndexedFeature {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        to_aabb(&self.envelope)
    }
}

fn to_aabb(envelope: &Envelope) -> AABB<[f64; 2]> {
    AABB::from_corners(
        [envelope.min_x, envelope.min_y],
        [envelope.max_x, envelope.max_y],
    )
}

/// Envelope index over the features of an in-memory store.
///
/// The index only narrows candidates; callers still run the exact geometry
/// predicate on what it returns.
#[derive(Debug, Clone, Default)]
pub struct FeatureIndex {
    rtree: RTree<IndexedFeature>,
}

impl FeatureIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build an index in one pass from existing entries.
    pub fn bulk_load(entries: Vec<IndexedFeature>) -> Self {
        Self {
            rtree: RTree::bulk_load(entries),
        }
    }

    pub fn insert(&mut self, fid: FeatureId, envelope: Envelope) {
        self.rtree.insert(IndexedFeature { fid, envelope });
    }

    /// Remove an entry; `envelope` must be the one it was inserted with.
    pub fn remove(&mut self, fid: FeatureId, envelope: Envelope) -> bool {
        self.rtree
            .remove(&IndexedFeature { fid, envelope })
            .is_some()
    }

    /// Features whose envelope intersects `envelope`.
    pub fn candidates(&self, envelope: &Envelope) -> Vec<FeatureId> {
        self.rtree
            .locate_in_envelope_intersecting(&to_aabb(envelope))
            .map(|item| item.fid)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.rtree.size()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_candidates() {
        let mut index = FeatureIndex::new();
        index.insert(1, Envelope::new(0.0, 0.0, 1.0, 1.0));
        index.insert(2, Envelope::new(5.0, 5.0, 6.0, 6.0));
        index.insert(3, Envelope::new(0.5, 0.5, 0.5, 0.5));

        let mut hits = index.candidates(&Envelope::new(-1.0, -1.0, 2.0, 2.0));
        hits.sort();
        assert_eq!(hits, vec![1, 3]);
        assert_eq!(index.len(), 3);
    }

    #[test]
    fn test_remove() {
        let mut index = FeatureIndex::new();
        let env = Envelope::new(0.0, 0.0, 1.0, 1.0);
        index.insert(1, env);
        assert!(!index.remove(1, Envelope::new(0.0, 0.0, 2.0, 2.0)));
        assert!(index.remove(1, env));
        assert!(index.is_empty());
    }

    #[test]
    fn test_bulk_load() {
        let entries = (0..100)
            .map(|i| IndexedFeature {
                fid: i,
                envelope: Envelope::new(i as f64, 0.0, i as f64 + 0.5, 0.5),
            })
            .collect();
        let index = FeatureIndex::bulk_load(entries);
        assert_eq!(index.candidates(&Envelope::new(10.2, 0.0, 12.1, 1.0)).len(), 3);
    }
}
