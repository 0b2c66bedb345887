//! The contract every feature data store implements.
//!
//! Queries, visibility and lifecycle are required. Mutation hooks have
//! default implementations that reject the request with `Unsupported`, so a
//! read-only store only implements what it actually supports.

use crate::cursor::{FeatureCursor, FeatureSetCursor};
use crate::error::{FeatureError, Result};
use crate::feature::{Feature, FeatureDefinition, FeatureId, FeatureSet, FeatureSetId};
use crate::query::{FeatureQueryParameters, FeatureSetQueryParameters};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// Mutations a store accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ModificationFlags(u32);

impl ModificationFlags {
    pub const NONE: Self = Self(0);
    pub const FEATURE_SET_INSERT: Self = Self(1 << 0);
    pub const FEATURE_SET_UPDATE: Self = Self(1 << 1);
    pub const FEATURE_SET_DELETE: Self = Self(1 << 2);
    pub const FEATURE_INSERT: Self = Self(1 << 3);
    pub const FEATURE_UPDATE: Self = Self(1 << 4);
    pub const FEATURE_DELETE: Self = Self(1 << 5);
    pub const BULK_MODIFICATIONS: Self = Self(1 << 6);
    pub const ALL: Self = Self(0x7f);

    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn bits(self) -> u32 {
        self.0
    }
}

impl std::ops::BitOr for ModificationFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// Granularity at which a store tracks visibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct VisibilityFlags(u32);

impl VisibilityFlags {
    pub const NONE: Self = Self(0);
    pub const FEATURE_SET: Self = Self(1 << 0);
    pub const FEATURE: Self = Self(1 << 1);

    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for VisibilityFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

pub type ListenerId = u64;

/// Callback receiving the URI of the store whose content changed.
pub type ContentChangedCallback = Arc<dyn Fn(&str) + Send + Sync>;

/// Registry of content-changed listeners.
#[derive(Default)]
pub struct ContentChangedDispatcher {
    listeners: Mutex<Vec<(ListenerId, ContentChangedCallback)>>,
    next_id: AtomicU64,
}

impl std::fmt::Debug for ContentChangedDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let count = self.listeners.lock().map(|l| l.len()).unwrap_or(0);
        f.debug_struct("ContentChangedDispatcher")
            .field("listeners", &count)
            .finish()
    }
}

impl ContentChangedDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_listener(&self, callback: ContentChangedCallback) -> Result<ListenerId> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        self.listeners
            .lock()
            .map_err(|_| FeatureError::Lock("Failed to acquire listener lock".to_string()))?
            .push((id, callback));
        Ok(id)
    }

    pub fn remove_listener(&self, id: ListenerId) -> Result<bool> {
        let mut listeners = self
            .listeners
            .lock()
            .map_err(|_| FeatureError::Lock("Failed to acquire listener lock".to_string()))?;
        let before = listeners.len();
        listeners.retain(|(lid, _)| *lid != id);
        Ok(listeners.len() != before)
    }

    /// Invoke every listener. Callbacks run outside the registry lock so they
    /// may add or remove listeners.
    pub fn dispatch(&self, uri: &str) {
        let snapshot: Vec<ContentChangedCallback> = match self.listeners.lock() {
            Ok(listeners) => listeners.iter().map(|(_, cb)| Arc::clone(cb)).collect(),
            Err(_) => {
                tracing::warn!(uri, "listener registry poisoned, dropping notification");
                return;
            }
        };
        for callback in snapshot {
            callback(uri);
        }
    }
}

fn unsupported<T>(what: &str) -> Result<T> {
    Err(FeatureError::unsupported(format!("{} is not supported by this store", what)))
}

/// A queryable collection of feature sets and their features.
pub trait FeatureDataStore: Send + Sync {
    /// Identifies the store's backing source.
    fn uri(&self) -> &str;

    fn get_feature(&self, fid: FeatureId) -> Result<Feature>;

    fn query_features(&self, params: &FeatureQueryParameters) -> Result<Box<dyn FeatureCursor>>;

    fn query_all_features(&self) -> Result<Box<dyn FeatureCursor>> {
        self.query_features(&FeatureQueryParameters::default())
    }

    fn query_features_count(&self, params: &FeatureQueryParameters) -> Result<usize> {
        let mut cursor = self.query_features(params)?;
        let mut count = 0;
        while cursor.move_to_next()? {
            count += 1;
        }
        Ok(count)
    }

    fn get_feature_set(&self, fsid: FeatureSetId) -> Result<FeatureSet>;

    fn query_feature_sets(
        &self,
        params: &FeatureSetQueryParameters,
    ) -> Result<Box<dyn FeatureSetCursor>>;

    fn query_all_feature_sets(&self) -> Result<Box<dyn FeatureSetCursor>> {
        self.query_feature_sets(&FeatureSetQueryParameters::default())
    }

    fn query_feature_sets_count(&self, params: &FeatureSetQueryParameters) -> Result<usize> {
        let mut cursor = self.query_feature_sets(params)?;
        let mut count = 0;
        while cursor.move_to_next()? {
            count += 1;
        }
        Ok(count)
    }

    fn is_feature_visible(&self, fid: FeatureId) -> Result<bool>;

    fn is_feature_set_visible(&self, fsid: FeatureSetId) -> Result<bool>;

    fn is_feature_read_only(&self, fid: FeatureId) -> Result<bool>;

    fn is_feature_set_read_only(&self, fsid: FeatureSetId) -> Result<bool>;

    fn is_available(&self) -> bool;

    fn refresh(&self) -> Result<()>;

    fn close(&self) -> Result<()>;

    fn modification_flags(&self) -> ModificationFlags {
        ModificationFlags::NONE
    }

    fn visibility_flags(&self) -> VisibilityFlags;

    fn content_changed(&self) -> &ContentChangedDispatcher;

    fn add_content_changed_listener(&self, callback: ContentChangedCallback) -> Result<ListenerId> {
        self.content_changed().add_listener(callback)
    }

    fn remove_content_changed_listener(&self, id: ListenerId) -> Result<bool> {
        self.content_changed().remove_listener(id)
    }

    // ---- bulk modification ----

    fn begin_bulk_modification(&self) -> Result<()> {
        unsupported("bulk modification")
    }

    /// End the bulk modification; `successful == false` rolls back every
    /// mutation issued since the matching begin.
    fn end_bulk_modification(&self, _successful: bool) -> Result<()> {
        unsupported("bulk modification")
    }

    fn is_in_bulk_modification(&self) -> bool {
        false
    }

    // ---- feature sets ----

    fn insert_feature_set(
        &self,
        _provider: &str,
        _set_type: &str,
        _name: &str,
        _min_resolution: f64,
        _max_resolution: f64,
    ) -> Result<FeatureSet> {
        unsupported("feature set insert")
    }

    fn update_feature_set(
        &self,
        _fsid: FeatureSetId,
        _name: &str,
        _min_resolution: f64,
        _max_resolution: f64,
    ) -> Result<FeatureSet> {
        unsupported("feature set update")
    }

    fn delete_feature_set(&self, _fsid: FeatureSetId) -> Result<()> {
        unsupported("feature set delete")
    }

    fn delete_all_feature_sets(&self) -> Result<()> {
        unsupported("feature set delete")
    }

    // ---- features ----

    fn insert_feature(&self, _fsid: FeatureSetId, _definition: &FeatureDefinition) -> Result<Feature> {
        unsupported("feature insert")
    }

    fn update_feature(&self, _fid: FeatureId, _definition: &FeatureDefinition) -> Result<Feature> {
        unsupported("feature update")
    }

    fn delete_feature(&self, _fid: FeatureId) -> Result<()> {
        unsupported("feature delete")
    }

    fn delete_all_features(&self, _fsid: FeatureSetId) -> Result<()> {
        unsupported("feature delete")
    }

    // ---- visibility and read-only state ----

    fn set_feature_visible(&self, _fid: FeatureId, _visible: bool) -> Result<()> {
        unsupported("feature visibility")
    }

    fn set_features_visible(&self, _params: &FeatureQueryParameters, _visible: bool) -> Result<()> {
        unsupported("feature visibility")
    }

    fn set_feature_set_visible(&self, _fsid: FeatureSetId, _visible: bool) -> Result<()> {
        unsupported("feature set visibility")
    }

    fn set_feature_sets_visible(
        &self,
        _params: &FeatureSetQueryParameters,
        _visible: bool,
    ) -> Result<()> {
        unsupported("feature set visibility")
    }

    fn set_feature_set_read_only(&self, _fsid: FeatureSetId, _read_only: bool) -> Result<()> {
        unsupported("feature set read-only state")
    }

    fn set_feature_sets_read_only(
        &self,
        _params: &FeatureSetQueryParameters,
        _read_only: bool,
    ) -> Result<()> {
        unsupported("feature set read-only state")
    }
}
