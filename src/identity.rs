//! Persistent feature ids for tile-local features.
//!
//! Both directions of the bijection live behind one lock so they can never
//! disagree. Ids are handed out monotonically and are never reused.

use crate::error::{FeatureError, Result};
use crate::feature::{FeatureId, FeatureSetId};
use crate::tile_grid::TileKey;
use rustc_hash::FxHashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Where a tile feature lives: its tile, its feature set and its id within
/// that layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TileFeatureKey {
    pub tile: TileKey,
    pub fsid: FeatureSetId,
    pub local_id: u64,
}

#[derive(Debug)]
struct IdentityInner {
    forward: FxHashMap<TileFeatureKey, FeatureId>,
    inverse: FxHashMap<FeatureId, TileFeatureKey>,
    next_fid: FeatureId,
}

#[derive(Debug)]
pub struct IdentityTable {
    inner: RwLock<IdentityInner>,
}

impl Default for IdentityTable {
    fn default() -> Self {
        Self::new()
    }
}

impl IdentityTable {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(IdentityInner {
                forward: FxHashMap::default(),
                inverse: FxHashMap::default(),
                next_fid: 1,
            }),
        }
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, IdentityInner>> {
        self.inner
            .read()
            .map_err(|_| FeatureError::Lock("Failed to acquire read lock".to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, IdentityInner>> {
        self.inner
            .write()
            .map_err(|_| FeatureError::Lock("Failed to acquire write lock".to_string()))
    }

    /// The fid of `key`, assigning the next one on first sight.
    pub fn resolve(&self, key: TileFeatureKey) -> Result<FeatureId> {
        if let Some(fid) = self.read()?.forward.get(&key) {
            return Ok(*fid);
        }

        let mut inner = self.write()?;
        // another session may have assigned it between the two locks
        if let Some(fid) = inner.forward.get(&key) {
            return Ok(*fid);
        }
        let fid = inner.next_fid;
        inner.next_fid += 1;
        inner.forward.insert(key, fid);
        inner.inverse.insert(fid, key);
        if fid % 100_000 == 0 {
            tracing::debug!(identities = fid, "feature identity table growing");
        }
        Ok(fid)
    }

    pub fn lookup(&self, fid: FeatureId) -> Result<Option<TileFeatureKey>> {
        Ok(self.read()?.inverse.get(&fid).copied())
    }

    pub fn len(&self) -> usize {
        self.read().map(|inner| inner.forward.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    fn key(local_id: u64) -> TileFeatureKey {
        TileFeatureKey {
            tile: TileKey::new(3, 4, 2),
            fsid: 1,
            local_id,
        }
    }

    #[test]
    fn test_resolve_is_stable() {
        let table = IdentityTable::new();
        let a = table.resolve(key(7)).unwrap();
        let b = table.resolve(key(8)).unwrap();
        assert_eq!((a, b), (1, 2));
        assert_eq!(table.resolve(key(7)).unwrap(), a);
        assert_eq!(table.lookup(b).unwrap(), Some(key(8)));
        assert_eq!(table.lookup(99).unwrap(), None);
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_same_local_id_in_other_layer() {
        let table = IdentityTable::new();
        let roads = table.resolve(key(1)).unwrap();
        let water = table
            .resolve(TileFeatureKey {
                fsid: 2,
                ..key(1)
            })
            .unwrap();
        assert_ne!(roads, water);
    }

    #[test]
    fn test_concurrent_resolution_is_bijective() {
        let table = Arc::new(IdentityTable::new());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let table = Arc::clone(&table);
                thread::spawn(move || {
                    (0..500)
                        .map(|i| table.resolve(key(i)).unwrap())
                        .collect::<Vec<_>>()
                })
            })
            .collect();
        let results: Vec<Vec<FeatureId>> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        for other in &results[1..] {
            assert_eq!(other, &results[0]);
        }
        assert_eq!(table.len(), 500);
        for (i, fid) in results[0].iter().enumerate() {
            assert_eq!(table.lookup(*fid).unwrap(), Some(key(i as u64)));
        }
    }
}
