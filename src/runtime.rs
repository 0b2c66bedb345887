//! Fully mutable in-memory feature data store.

use crate::cursor::{FeatureCursor, FeatureSetCursor, VecCursor, paginate_feature_sets, paginate_features};
use crate::error::{FeatureError, Result};
use crate::feature::{Feature, FeatureDefinition, FeatureId, FeatureSet, FeatureSetId};
use crate::index::{FeatureIndex, IndexedFeature};
use crate::query::{
    FeatureQueryParameters, FeatureSetQueryParameters, matches_feature, matches_feature_set,
    matches_set, matches_spatial_filter,
};
use crate::store::{ContentChangedDispatcher, FeatureDataStore, ModificationFlags, VisibilityFlags};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::thread::{self, ThreadId};

#[derive(Debug, Clone)]
struct SetRecord {
    set: FeatureSet,
    visible: bool,
    read_only: bool,
}

#[derive(Debug, Clone)]
struct FeatureRecord {
    feature: Feature,
    visible: bool,
}

#[derive(Debug, Clone)]
struct RuntimeInner {
    sets: BTreeMap<FeatureSetId, SetRecord>,
    features: BTreeMap<FeatureId, FeatureRecord>,
    index: FeatureIndex,
    next_fsid: FeatureSetId,
    next_fid: FeatureId,
    closed: bool,
}

impl RuntimeInner {
    fn new() -> Self {
        Self {
            sets: BTreeMap::new(),
            features: BTreeMap::new(),
            index: FeatureIndex::new(),
            next_fsid: 1,
            next_fid: 1,
            closed: false,
        }
    }

    fn set(&self, fsid: FeatureSetId) -> Result<&SetRecord> {
        self.sets
            .get(&fsid)
            .ok_or_else(|| FeatureError::not_found(format!("feature set {}", fsid)))
    }

    fn set_mut(&mut self, fsid: FeatureSetId) -> Result<&mut SetRecord> {
        self.sets
            .get_mut(&fsid)
            .ok_or_else(|| FeatureError::not_found(format!("feature set {}", fsid)))
    }

    fn writable_set(&self, fsid: FeatureSetId) -> Result<&SetRecord> {
        let record = self.set(fsid)?;
        if record.read_only {
            return Err(FeatureError::unsupported(format!(
                "feature set {} is read-only",
                fsid
            )));
        }
        Ok(record)
    }

    fn feature(&self, fid: FeatureId) -> Result<&FeatureRecord> {
        self.features
            .get(&fid)
            .ok_or_else(|| FeatureError::not_found(format!("feature {}", fid)))
    }

    fn index_feature(&mut self, feature: &Feature) {
        if let Some(envelope) = feature.envelope() {
            self.index.insert(feature.fid, envelope);
        }
    }

    fn unindex_feature(&mut self, feature: &Feature) {
        if let Some(envelope) = feature.envelope() {
            self.index.remove(feature.fid, envelope);
        }
    }

    fn remove_feature(&mut self, fid: FeatureId) {
        if let Some(record) = self.features.remove(&fid) {
            self.unindex_feature(&record.feature);
        }
    }

    fn remove_set(&mut self, fsid: FeatureSetId) {
        self.sets.remove(&fsid);
        let doomed: Vec<FeatureId> = self
            .features
            .values()
            .filter(|r| r.feature.fsid == fsid)
            .map(|r| r.feature.fid)
            .collect();
        for fid in doomed {
            self.remove_feature(fid);
        }
    }

    fn reindex(&mut self) {
        let entries = self
            .features
            .values()
            .filter_map(|r| {
                r.feature.envelope().map(|envelope| IndexedFeature {
                    fid: r.feature.fid,
                    envelope,
                })
            })
            .collect();
        self.index = FeatureIndex::bulk_load(entries);
    }

    fn select_features(&self, params: &FeatureQueryParameters) -> Vec<&FeatureRecord> {
        if self.closed {
            return Vec::new();
        }
        let by_id = params.ids.is_some();
        let candidates: Box<dyn Iterator<Item = &FeatureRecord> + '_> =
            match (&params.ids, params.spatial_envelope()) {
                (Some(ids), _) => Box::new(ids.iter().filter_map(|fid| self.features.get(fid))),
                (None, Some(envelope)) => {
                    let mut fids = self.index.candidates(&envelope);
                    fids.sort_unstable();
                    Box::new(fids.into_iter().filter_map(move |fid| self.features.get(&fid)))
                }
                (None, None) => Box::new(self.features.values()),
            };

        candidates
            .filter(|record| {
                let Some(set) = self.sets.get(&record.feature.fsid) else {
                    return false;
                };
                if !matches_feature_set(params, set.set.fsid, &set.set.name)
                    || !matches_feature(params, &record.feature)
                {
                    return false;
                }
                if params.visible_only && !(record.visible && set.visible) {
                    return false;
                }
                if !by_id {
                    if let Some(resolution) = params.max_resolution {
                        if !set.set.is_relevant_at(resolution) {
                            return false;
                        }
                    }
                    if !matches_spatial_filter(params.spatial_filter.as_ref(), &record.feature) {
                        return false;
                    }
                }
                true
            })
            .collect()
    }

    fn select_sets(&self, params: &FeatureSetQueryParameters) -> Vec<&SetRecord> {
        if self.closed {
            return Vec::new();
        }
        self.sets
            .values()
            .filter(|r| matches_set(params, &r.set) && (!params.visible_only || r.visible))
            .collect()
    }
}

#[derive(Debug)]
struct BulkState {
    owner: ThreadId,
    snapshot: RuntimeInner,
    dirty: bool,
}

/// In-memory feature data store supporting every mutation.
///
/// Bulk modifications snapshot the store when they begin; ending one
/// unsuccessfully restores the snapshot. Content-changed listeners hear once
/// per mutating call, or once per successful bulk modification.
///
/// # Examples
///
/// ```rust
/// use spatio_features::{FeatureDataStore, FeatureDefinition, FeatureQueryParameters,
///     RuntimeFeatureDataStore, geometry::parse_wkt};
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let store = RuntimeFeatureDataStore::new();
/// let pois = store.insert_feature_set("user", "pins", "pois", 0.0, 0.0)?;
/// store.insert_feature(pois.fsid, &FeatureDefinition::new("home").with_wkt("POINT(5 5)"))?;
///
/// let params = FeatureQueryParameters::new()
///     .with_spatial_filter(parse_wkt("POLYGON((0 0, 10 0, 10 10, 0 10, 0 0))")?);
/// assert_eq!(store.query_features_count(&params)?, 1);
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct RuntimeFeatureDataStore {
    uri: String,
    inner: Arc<RwLock<RuntimeInner>>,
    bulk: Mutex<Option<BulkState>>,
    dispatcher: ContentChangedDispatcher,
}

impl Default for RuntimeFeatureDataStore {
    fn default() -> Self {
        Self::new()
    }
}

impl RuntimeFeatureDataStore {
    pub fn new() -> Self {
        Self::with_uri(":memory:")
    }

    pub fn with_uri(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            inner: Arc::new(RwLock::new(RuntimeInner::new())),
            bulk: Mutex::new(None),
            dispatcher: ContentChangedDispatcher::new(),
        }
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, RuntimeInner>> {
        self.inner
            .read()
            .map_err(|_| FeatureError::Lock("Failed to acquire read lock".to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, RuntimeInner>> {
        self.inner
            .write()
            .map_err(|_| FeatureError::Lock("Failed to acquire write lock".to_string()))
    }

    fn bulk_state(&self) -> Result<MutexGuard<'_, Option<BulkState>>> {
        self.bulk
            .lock()
            .map_err(|_| FeatureError::Lock("Failed to acquire bulk state".to_string()))
    }

    /// Run a mutation and notify listeners (or mark the bulk dirty).
    fn mutate<R>(&self, f: impl FnOnce(&mut RuntimeInner) -> Result<R>) -> Result<R> {
        let in_bulk = {
            let bulk = self.bulk_state()?;
            match bulk.as_ref() {
                Some(state) if state.owner != thread::current().id() => {
                    return Err(FeatureError::illegal_state(
                        "bulk modification is owned by another thread",
                    ));
                }
                Some(_) => true,
                None => false,
            }
        };

        let result = {
            let mut inner = self.write()?;
            if inner.closed {
                return Err(FeatureError::illegal_state("store is closed"));
            }
            f(&mut inner)?
        };

        if in_bulk {
            if let Some(state) = self.bulk_state()?.as_mut() {
                state.dirty = true;
            }
        } else {
            self.dispatcher.dispatch(&self.uri);
        }
        Ok(result)
    }

    /// Number of features currently held.
    pub fn feature_count(&self) -> usize {
        self.read().map(|inner| inner.features.len()).unwrap_or(0)
    }
}

impl FeatureDataStore for RuntimeFeatureDataStore {
    fn uri(&self) -> &str {
        &self.uri
    }

    fn get_feature(&self, fid: FeatureId) -> Result<Feature> {
        Ok(self.read()?.feature(fid)?.feature.clone())
    }

    fn query_features(&self, params: &FeatureQueryParameters) -> Result<Box<dyn FeatureCursor>> {
        let rows: Vec<Feature> = self
            .read()?
            .select_features(params)
            .into_iter()
            .map(|r| r.feature.clone())
            .collect();
        Ok(paginate_features(
            Box::new(VecCursor::new(rows)),
            params.limit,
            params.offset,
        ))
    }

    fn query_features_count(&self, params: &FeatureQueryParameters) -> Result<usize> {
        let matched = self.read()?.select_features(params).len();
        let after_offset = matched.saturating_sub(params.offset);
        Ok(params.limit.map_or(after_offset, |limit| after_offset.min(limit)))
    }

    fn get_feature_set(&self, fsid: FeatureSetId) -> Result<FeatureSet> {
        Ok(self.read()?.set(fsid)?.set.clone())
    }

    fn query_feature_sets(
        &self,
        params: &FeatureSetQueryParameters,
    ) -> Result<Box<dyn FeatureSetCursor>> {
        let rows: Vec<FeatureSet> = self
            .read()?
            .select_sets(params)
            .into_iter()
            .map(|r| r.set.clone())
            .collect();
        Ok(paginate_feature_sets(
            Box::new(VecCursor::new(rows)),
            params.limit,
            params.offset,
        ))
    }

    fn is_feature_visible(&self, fid: FeatureId) -> Result<bool> {
        Ok(self.read()?.feature(fid)?.visible)
    }

    fn is_feature_set_visible(&self, fsid: FeatureSetId) -> Result<bool> {
        Ok(self.read()?.set(fsid)?.visible)
    }

    fn is_feature_read_only(&self, fid: FeatureId) -> Result<bool> {
        let inner = self.read()?;
        let fsid = inner.feature(fid)?.feature.fsid;
        Ok(inner.set(fsid)?.read_only)
    }

    fn is_feature_set_read_only(&self, fsid: FeatureSetId) -> Result<bool> {
        Ok(self.read()?.set(fsid)?.read_only)
    }

    fn is_available(&self) -> bool {
        self.read().map(|inner| !inner.closed).unwrap_or(false)
    }

    fn refresh(&self) -> Result<()> {
        let mut inner = self.write()?;
        inner.reindex();
        Ok(())
    }

    fn close(&self) -> Result<()> {
        let mut inner = self.write()?;
        inner.closed = true;
        inner.features.clear();
        inner.sets.clear();
        inner.index = FeatureIndex::new();
        Ok(())
    }

    fn modification_flags(&self) -> ModificationFlags {
        ModificationFlags::ALL
    }

    fn visibility_flags(&self) -> VisibilityFlags {
        VisibilityFlags::FEATURE_SET | VisibilityFlags::FEATURE
    }

    fn content_changed(&self) -> &ContentChangedDispatcher {
        &self.dispatcher
    }

    fn begin_bulk_modification(&self) -> Result<()> {
        let mut bulk = self.bulk_state()?;
        if bulk.is_some() {
            return Err(FeatureError::illegal_state(
                "bulk modification already in progress",
            ));
        }
        let snapshot = self.read()?.clone();
        *bulk = Some(BulkState {
            owner: thread::current().id(),
            snapshot,
            dirty: false,
        });
        Ok(())
    }

    fn end_bulk_modification(&self, successful: bool) -> Result<()> {
        let state = {
            let mut bulk = self.bulk_state()?;
            match bulk.as_ref() {
                None => {
                    return Err(FeatureError::illegal_state("no bulk modification in progress"));
                }
                Some(state) if state.owner != thread::current().id() => {
                    return Err(FeatureError::illegal_state(
                        "bulk modification is owned by another thread",
                    ));
                }
                Some(_) => {}
            }
            match bulk.take() {
                Some(state) => state,
                None => return Err(FeatureError::illegal_state("no bulk modification in progress")),
            }
        };

        if successful {
            if state.dirty {
                self.dispatcher.dispatch(&self.uri);
            }
            return Ok(());
        }

        let mut inner = self.write()?;
        let (next_fid, next_fsid, closed) = (inner.next_fid, inner.next_fsid, inner.closed);
        *inner = state.snapshot;
        // identifiers handed out during the bulk stay consumed
        inner.next_fid = next_fid;
        inner.next_fsid = next_fsid;
        inner.closed = closed;
        tracing::debug!(uri = %self.uri, "bulk modification rolled back");
        Ok(())
    }

    fn is_in_bulk_modification(&self) -> bool {
        self.bulk_state().map(|b| b.is_some()).unwrap_or(false)
    }

    fn insert_feature_set(
        &self,
        provider: &str,
        set_type: &str,
        name: &str,
        min_resolution: f64,
        max_resolution: f64,
    ) -> Result<FeatureSet> {
        if name.is_empty() {
            return Err(FeatureError::invalid("feature set name must not be empty"));
        }
        self.mutate(|inner| {
            let fsid = inner.next_fsid;
            inner.next_fsid += 1;
            let set = FeatureSet {
                fsid,
                provider: provider.to_string(),
                set_type: set_type.to_string(),
                name: name.to_string(),
                min_resolution,
                max_resolution,
                version: 1,
            };
            inner.sets.insert(
                fsid,
                SetRecord {
                    set: set.clone(),
                    visible: true,
                    read_only: false,
                },
            );
            Ok(set)
        })
    }

    fn update_feature_set(
        &self,
        fsid: FeatureSetId,
        name: &str,
        min_resolution: f64,
        max_resolution: f64,
    ) -> Result<FeatureSet> {
        self.mutate(|inner| {
            inner.writable_set(fsid)?;
            let record = inner.set_mut(fsid)?;
            record.set.name = name.to_string();
            record.set.min_resolution = min_resolution;
            record.set.max_resolution = max_resolution;
            record.set.version += 1;
            Ok(record.set.clone())
        })
    }

    fn delete_feature_set(&self, fsid: FeatureSetId) -> Result<()> {
        self.mutate(|inner| {
            inner.writable_set(fsid)?;
            inner.remove_set(fsid);
            Ok(())
        })
    }

    fn delete_all_feature_sets(&self) -> Result<()> {
        self.mutate(|inner| {
            if let Some(record) = inner.sets.values().find(|r| r.read_only) {
                return Err(FeatureError::unsupported(format!(
                    "feature set {} is read-only",
                    record.set.fsid
                )));
            }
            inner.sets.clear();
            inner.features.clear();
            inner.index = FeatureIndex::new();
            Ok(())
        })
    }

    fn insert_feature(&self, fsid: FeatureSetId, definition: &FeatureDefinition) -> Result<Feature> {
        self.mutate(|inner| {
            inner.writable_set(fsid)?;
            let feature = definition.materialize(inner.next_fid, fsid, 1)?;
            inner.next_fid += 1;
            inner.index_feature(&feature);
            inner.features.insert(
                feature.fid,
                FeatureRecord {
                    feature: feature.clone(),
                    visible: true,
                },
            );
            Ok(feature)
        })
    }

    fn update_feature(&self, fid: FeatureId, definition: &FeatureDefinition) -> Result<Feature> {
        self.mutate(|inner| {
            let (fsid, version) = {
                let record = inner.feature(fid)?;
                (record.feature.fsid, record.feature.version)
            };
            inner.writable_set(fsid)?;
            let feature = definition.materialize(fid, fsid, version + 1)?;

            let old = inner.feature(fid)?.feature.clone();
            inner.unindex_feature(&old);
            inner.index_feature(&feature);
            if let Some(record) = inner.features.get_mut(&fid) {
                record.feature = feature.clone();
            }
            Ok(feature)
        })
    }

    fn delete_feature(&self, fid: FeatureId) -> Result<()> {
        self.mutate(|inner| {
            let fsid = inner.feature(fid)?.feature.fsid;
            inner.writable_set(fsid)?;
            inner.remove_feature(fid);
            Ok(())
        })
    }

    fn delete_all_features(&self, fsid: FeatureSetId) -> Result<()> {
        self.mutate(|inner| {
            inner.writable_set(fsid)?;
            let doomed: Vec<FeatureId> = inner
                .features
                .values()
                .filter(|r| r.feature.fsid == fsid)
                .map(|r| r.feature.fid)
                .collect();
            for fid in doomed {
                inner.remove_feature(fid);
            }
            Ok(())
        })
    }

    fn set_feature_visible(&self, fid: FeatureId, visible: bool) -> Result<()> {
        self.mutate(|inner| {
            inner.feature(fid)?;
            if let Some(record) = inner.features.get_mut(&fid) {
                record.visible = visible;
            }
            Ok(())
        })
    }

    fn set_features_visible(&self, params: &FeatureQueryParameters, visible: bool) -> Result<()> {
        self.mutate(|inner| {
            let fids: Vec<FeatureId> = inner
                .select_features(params)
                .into_iter()
                .map(|r| r.feature.fid)
                .skip(params.offset)
                .take(params.limit.unwrap_or(usize::MAX))
                .collect();
            for fid in fids {
                if let Some(record) = inner.features.get_mut(&fid) {
                    record.visible = visible;
                }
            }
            Ok(())
        })
    }

    fn set_feature_set_visible(&self, fsid: FeatureSetId, visible: bool) -> Result<()> {
        self.mutate(|inner| {
            inner.set_mut(fsid)?.visible = visible;
            Ok(())
        })
    }

    fn set_feature_sets_visible(
        &self,
        params: &FeatureSetQueryParameters,
        visible: bool,
    ) -> Result<()> {
        self.mutate(|inner| {
            let fsids: Vec<FeatureSetId> = inner
                .select_sets(params)
                .into_iter()
                .map(|r| r.set.fsid)
                .skip(params.offset)
                .take(params.limit.unwrap_or(usize::MAX))
                .collect();
            for fsid in fsids {
                inner.set_mut(fsid)?.visible = visible;
            }
            Ok(())
        })
    }

    fn set_feature_set_read_only(&self, fsid: FeatureSetId, read_only: bool) -> Result<()> {
        self.mutate(|inner| {
            inner.set_mut(fsid)?.read_only = read_only;
            Ok(())
        })
    }

    fn set_feature_sets_read_only(
        &self,
        params: &FeatureSetQueryParameters,
        read_only: bool,
    ) -> Result<()> {
        self.mutate(|inner| {
            let fsids: Vec<FeatureSetId> = inner
                .select_sets(params)
                .into_iter()
                .map(|r| r.set.fsid)
                .skip(params.offset)
                .take(params.limit.unwrap_or(usize::MAX))
                .collect();
            for fsid in fsids {
                inner.set_mut(fsid)?.read_only = read_only;
            }
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_ids_are_monotonic() {
        let store = RuntimeFeatureDataStore::new();
        let set = store.insert_feature_set("p", "t", "a", 0.0, 0.0).unwrap();
        let f1 = store.insert_feature(set.fsid, &FeatureDefinition::new("1")).unwrap();
        store.delete_feature(f1.fid).unwrap();
        let f2 = store.insert_feature(set.fsid, &FeatureDefinition::new("2")).unwrap();
        assert_eq!(f1.fid, 1);
        assert_eq!(f2.fid, 2);
        assert_eq!(store.get_feature(1).unwrap_err().kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_update_bumps_version_and_reindexes() {
        let store = RuntimeFeatureDataStore::new();
        let set = store.insert_feature_set("p", "t", "a", 0.0, 0.0).unwrap();
        let f = store
            .insert_feature(set.fsid, &FeatureDefinition::new("pin").with_wkt("POINT(1 1)"))
            .unwrap();
        let updated = store
            .update_feature(f.fid, &FeatureDefinition::new("pin").with_wkt("POINT(50 50)"))
            .unwrap();
        assert_eq!(updated.version, 2);

        let near_origin = FeatureQueryParameters::new().with_spatial_filter(
            crate::geometry::parse_wkt("POLYGON((0 0, 2 0, 2 2, 0 2, 0 0))").unwrap(),
        );
        assert_eq!(store.query_features_count(&near_origin).unwrap(), 0);
    }

    #[test]
    fn test_closed_store() {
        let store = RuntimeFeatureDataStore::new();
        store.insert_feature_set("p", "t", "a", 0.0, 0.0).unwrap();
        store.close().unwrap();
        assert!(!store.is_available());
        assert_eq!(
            store
                .query_feature_sets_count(&FeatureSetQueryParameters::new())
                .unwrap(),
            0
        );
        assert_eq!(
            store
                .insert_feature_set("p", "t", "b", 0.0, 0.0)
                .unwrap_err()
                .kind(),
            ErrorKind::IllegalState
        );
    }
}
