//! Handle-addressed geometry workspace.
//!
//! A [`GeometryWorkspace`] owns every geometry it creates; callers only ever
//! hold [`GeometryHandle`]s. Handles carry the workspace generation in their
//! upper bits so that a handle issued before [`GeometryWorkspace::clear`] is
//! rejected in O(1) instead of silently aliasing a newer geometry.

use crate::batch::WorkspaceBatch;
use crate::codec::{self, BlobInfo};
use crate::error::{FeatureError, Result};
use crate::geometry::{self, Envelope, GeometryClass};
use crate::ops;
use geo::{Coord, Geometry};
use rustc_hash::FxHashMap;
use std::fmt;
use std::num::NonZeroU64;
use std::sync::{Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

const SEQ_BITS: u32 = 40;
const SEQ_MASK: u64 = (1 << SEQ_BITS) - 1;
const GENERATION_MASK: u64 = (1 << (64 - SEQ_BITS)) - 1;

/// Opaque, non-zero name of a geometry inside a [`GeometryWorkspace`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GeometryHandle(NonZeroU64);

impl GeometryHandle {
    fn new(generation: u64, seq: u64) -> Option<Self> {
        NonZeroU64::new(((generation & GENERATION_MASK) << SEQ_BITS) | (seq & SEQ_MASK)).map(Self)
    }

    /// Rebuild a handle from its raw value; `0` is never a valid handle.
    pub fn from_raw(raw: u64) -> Option<Self> {
        NonZeroU64::new(raw).map(Self)
    }

    pub fn get(self) -> u64 {
        self.0.get()
    }

    fn generation(self) -> u64 {
        self.0.get() >> SEQ_BITS
    }

    fn seq(self) -> u64 {
        self.0.get() & SEQ_MASK
    }
}

impl fmt::Display for GeometryHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.generation(), self.seq())
    }
}

/// A stored geometry plus the blob header it was created from.
#[derive(Debug, Clone)]
pub(crate) struct Entry {
    pub(crate) geometry: Geometry<f64>,
    pub(crate) blob: BlobInfo,
}

impl Entry {
    fn new(geometry: Geometry<f64>) -> Self {
        Self {
            geometry,
            blob: BlobInfo::default(),
        }
    }
}

#[derive(Debug)]
struct WorkspaceInner {
    generation: u64,
    next_seq: u64,
    entries: FxHashMap<u64, Entry>,
    batch: Option<WorkspaceBatch>,
}

impl WorkspaceInner {
    fn resolve(&self, handle: GeometryHandle) -> Result<&Entry> {
        if handle.generation() != self.generation & GENERATION_MASK {
            return Err(FeatureError::invalid(format!(
                "stale geometry handle {}",
                handle
            )));
        }
        let seq = handle.seq();
        if let Some(batch) = self.batch.as_ref().filter(|b| b.is_owner()) {
            match batch.lookup(seq) {
                Some(Some(entry)) => return Ok(entry),
                Some(None) => {
                    return Err(FeatureError::invalid(format!(
                        "geometry handle {} was deleted",
                        handle
                    )));
                }
                None => {}
            }
        }
        self.entries
            .get(&seq)
            .ok_or_else(|| FeatureError::invalid(format!("unknown geometry handle {}", handle)))
    }

    fn check_mutable(&self) -> Result<()> {
        match &self.batch {
            Some(batch) => batch.check_owner(),
            None => Ok(()),
        }
    }

    fn put(&mut self, seq: u64, entry: Option<Entry>) {
        match self.batch.as_mut() {
            Some(batch) => batch.stage(seq, entry),
            None => match entry {
                Some(entry) => {
                    self.entries.insert(seq, entry);
                }
                None => {
                    self.entries.remove(&seq);
                }
            },
        }
    }
}

/// Arena of geometries addressed by [`GeometryHandle`].
///
/// The workspace is meant to be confined to one thread at a time. While a
/// batch is active only the thread that began it may mutate, and only that
/// thread observes the pending changes.
///
/// # Examples
///
/// ```rust
/// use spatio_features::{GeometryClass, GeometryWorkspace};
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let gw = GeometryWorkspace::new();
/// let one = gw.create_geometry_from_wkt("POLYGON((0 0, 10 0, 10 10, 0 10, 0 0))")?;
/// let two = gw.create_geometry_from_wkt("POLYGON((5 0, 25 0, 25 10, 5 10, 5 0))")?;
///
/// assert!(gw.intersects(one, two)?);
/// let overlap = gw.create_intersection(one, two)?;
/// assert_eq!(gw.geometry_type(overlap)?, GeometryClass::Polygon);
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct GeometryWorkspace {
    inner: RwLock<WorkspaceInner>,
    envelopes: Mutex<FxHashMap<u64, Option<Envelope>>>,
}

impl Default for GeometryWorkspace {
    fn default() -> Self {
        Self::new()
    }
}

impl GeometryWorkspace {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(WorkspaceInner {
                generation: 0,
                next_seq: 1,
                entries: FxHashMap::default(),
                batch: None,
            }),
            envelopes: Mutex::new(FxHashMap::default()),
        }
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, WorkspaceInner>> {
        self.inner
            .read()
            .map_err(|_| FeatureError::Lock("Failed to acquire read lock".to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, WorkspaceInner>> {
        self.inner
            .write()
            .map_err(|_| FeatureError::Lock("Failed to acquire write lock".to_string()))
    }

    fn cache(&self) -> Result<MutexGuard<'_, FxHashMap<u64, Option<Envelope>>>> {
        self.envelopes
            .lock()
            .map_err(|_| FeatureError::Lock("Failed to acquire envelope cache".to_string()))
    }

    fn forget_envelope(&self, seq: u64) -> Result<()> {
        self.cache()?.remove(&seq);
        Ok(())
    }

    fn insert(&self, entry: Entry) -> Result<GeometryHandle> {
        let mut inner = self.write()?;
        inner.check_mutable()?;
        let seq = inner.next_seq;
        if seq > SEQ_MASK {
            return Err(FeatureError::OutOfMemory);
        }
        let handle = GeometryHandle::new(inner.generation, seq).ok_or(FeatureError::OutOfMemory)?;
        inner.next_seq += 1;
        inner.put(seq, Some(entry));
        Ok(handle)
    }

    fn replace(&self, handle: GeometryHandle, entry: Entry) -> Result<()> {
        let mut inner = self.write()?;
        inner.check_mutable()?;
        inner.resolve(handle)?;
        inner.put(handle.seq(), Some(entry));
        drop(inner);
        self.forget_envelope(handle.seq())
    }

    /// Run `f` against a live geometry without copying it out.
    pub(crate) fn with_geometry<R>(
        &self,
        handle: GeometryHandle,
        f: impl FnOnce(&Geometry<f64>) -> R,
    ) -> Result<R> {
        let inner = self.read()?;
        Ok(f(&inner.resolve(handle)?.geometry))
    }

    fn derive(
        &self,
        handle: GeometryHandle,
        f: impl FnOnce(&Geometry<f64>) -> Result<Geometry<f64>>,
    ) -> Result<Entry> {
        let inner = self.read()?;
        let source = inner.resolve(handle)?;
        Ok(Entry {
            geometry: f(&source.geometry)?,
            blob: source.blob,
        })
    }

    fn derive2(
        &self,
        a: GeometryHandle,
        b: GeometryHandle,
        f: impl FnOnce(&Geometry<f64>, &Geometry<f64>) -> Result<Geometry<f64>>,
    ) -> Result<Entry> {
        let inner = self.read()?;
        let first = inner.resolve(a)?;
        let second = inner.resolve(b)?;
        Ok(Entry {
            geometry: f(&first.geometry, &second.geometry)?,
            blob: first.blob,
        })
    }

    // ---- creation ----

    pub fn create_geometry(&self, geometry: Geometry<f64>) -> Result<GeometryHandle> {
        self.insert(Entry::new(geometry::canonicalize(geometry)))
    }

    pub fn create_geometry_from_wkt(&self, wkt: &str) -> Result<GeometryHandle> {
        self.insert(Entry::new(geometry::parse_wkt(wkt)?))
    }

    pub fn create_geometry_from_wkb(&self, wkb: &[u8]) -> Result<GeometryHandle> {
        self.insert(Entry::new(codec::read_wkb(wkb)?))
    }

    /// Create from a SpatiaLite blob, remembering its SRID and byte order.
    pub fn create_geometry_from_blob(&self, blob: &[u8]) -> Result<GeometryHandle> {
        let (geometry, info) = codec::read_blob(blob)?;
        self.insert(Entry {
            geometry,
            blob: info,
        })
    }

    /// Create the closed quadrilateral `a, b, c, d, a`.
    pub fn create_polygon(
        &self,
        a: Coord<f64>,
        b: Coord<f64>,
        c: Coord<f64>,
        d: Coord<f64>,
    ) -> Result<GeometryHandle> {
        self.insert(Entry::new(Geometry::Polygon(geometry::quad(a, b, c, d))))
    }

    pub fn update_polygon(
        &self,
        handle: GeometryHandle,
        a: Coord<f64>,
        b: Coord<f64>,
        c: Coord<f64>,
        d: Coord<f64>,
    ) -> Result<()> {
        self.replace(
            handle,
            Entry::new(Geometry::Polygon(geometry::quad(a, b, c, d))),
        )
    }

    pub fn update_geometry(&self, handle: GeometryHandle, geometry: Geometry<f64>) -> Result<()> {
        self.replace(handle, Entry::new(geometry::canonicalize(geometry)))
    }

    pub fn update_geometry_from_blob(&self, handle: GeometryHandle, blob: &[u8]) -> Result<()> {
        let (geometry, info) = codec::read_blob(blob)?;
        self.replace(
            handle,
            Entry {
                geometry,
                blob: info,
            },
        )
    }

    pub fn delete_geometry(&self, handle: GeometryHandle) -> Result<()> {
        let mut inner = self.write()?;
        inner.check_mutable()?;
        inner.resolve(handle)?;
        inner.put(handle.seq(), None);
        drop(inner);
        self.forget_envelope(handle.seq())
    }

    // ---- introspection ----

    pub fn geometry_type(&self, handle: GeometryHandle) -> Result<GeometryClass> {
        self.with_geometry(handle, GeometryClass::of)
    }

    pub fn geometry_as_wkt(&self, handle: GeometryHandle) -> Result<String> {
        self.with_geometry(handle, geometry::to_wkt)
    }

    pub fn geometry_as_wkb(&self, handle: GeometryHandle) -> Result<Vec<u8>> {
        self.with_geometry(handle, codec::write_wkb)
    }

    pub fn geometry_as_blob(&self, handle: GeometryHandle) -> Result<Vec<u8>> {
        let inner = self.read()?;
        let entry = inner.resolve(handle)?;
        Ok(codec::write_blob(&entry.geometry, entry.blob))
    }

    /// An owned copy of the geometry.
    pub fn geometry(&self, handle: GeometryHandle) -> Result<Geometry<f64>> {
        self.with_geometry(handle, Clone::clone)
    }

    /// Bounding box of the geometry, `None` when it is empty.
    ///
    /// Envelopes are memoized outside of batches.
    pub fn envelope(&self, handle: GeometryHandle) -> Result<Option<Envelope>> {
        let inner = self.read()?;
        let entry = inner.resolve(handle)?;
        if inner.batch.is_some() {
            return Ok(Envelope::of(&entry.geometry));
        }
        let mut cache = self.cache()?;
        Ok(*cache
            .entry(handle.seq())
            .or_insert_with(|| Envelope::of(&entry.geometry)))
    }

    /// Number of live geometries as seen by the calling thread.
    pub fn len(&self) -> usize {
        let Ok(inner) = self.read() else {
            return 0;
        };
        let base = inner.entries.len();
        match inner.batch.as_ref().filter(|b| b.is_owner()) {
            Some(batch) => {
                let delta = batch.live_delta(|seq| inner.entries.contains_key(&seq));
                (base as isize + delta).max(0) as usize
            }
            None => base,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // ---- predicates ----

    pub fn intersects(&self, a: GeometryHandle, b: GeometryHandle) -> Result<bool> {
        let inner = self.read()?;
        let first = inner.resolve(a)?;
        let second = inner.resolve(b)?;
        Ok(ops::intersects(&first.geometry, &second.geometry))
    }

    pub fn contains(&self, a: GeometryHandle, b: GeometryHandle) -> Result<bool> {
        let inner = self.read()?;
        let first = inner.resolve(a)?;
        let second = inner.resolve(b)?;
        Ok(ops::contains(&first.geometry, &second.geometry))
    }

    // ---- derived geometries ----

    pub fn create_intersection(&self, a: GeometryHandle, b: GeometryHandle) -> Result<GeometryHandle> {
        let entry = self.derive2(a, b, ops::intersection)?;
        self.insert(entry)
    }

    pub fn update_intersection(
        &self,
        a: GeometryHandle,
        b: GeometryHandle,
        dst: GeometryHandle,
    ) -> Result<()> {
        let entry = self.derive2(a, b, ops::intersection)?;
        self.replace(dst, entry)
    }

    pub fn create_union(&self, a: GeometryHandle, b: GeometryHandle) -> Result<GeometryHandle> {
        let entry = self.derive2(a, b, ops::union)?;
        self.insert(entry)
    }

    pub fn update_union(&self, a: GeometryHandle, b: GeometryHandle, dst: GeometryHandle) -> Result<()> {
        let entry = self.derive2(a, b, ops::union)?;
        self.replace(dst, entry)
    }

    /// Dissolve every member of a collection into one geometry.
    pub fn create_unary_union(&self, collection: GeometryHandle) -> Result<GeometryHandle> {
        let entry = self.derive(collection, ops::unary_union)?;
        self.insert(entry)
    }

    pub fn update_unary_union(&self, collection: GeometryHandle, dst: GeometryHandle) -> Result<()> {
        let entry = self.derive(collection, ops::unary_union)?;
        self.replace(dst, entry)
    }

    pub fn create_difference(&self, a: GeometryHandle, b: GeometryHandle) -> Result<GeometryHandle> {
        let entry = self.derive2(a, b, ops::difference)?;
        self.insert(entry)
    }

    pub fn update_difference(
        &self,
        a: GeometryHandle,
        b: GeometryHandle,
        dst: GeometryHandle,
    ) -> Result<()> {
        let entry = self.derive2(a, b, ops::difference)?;
        self.replace(dst, entry)
    }

    /// Simplify with `tolerance` in the geometry's own linear units.
    pub fn create_simplify(
        &self,
        handle: GeometryHandle,
        tolerance: f64,
        preserve_topology: bool,
    ) -> Result<GeometryHandle> {
        let entry = self.derive(handle, |g| ops::simplify(g, tolerance, preserve_topology))?;
        self.insert(entry)
    }

    pub fn update_simplify(
        &self,
        handle: GeometryHandle,
        tolerance: f64,
        preserve_topology: bool,
        dst: GeometryHandle,
    ) -> Result<()> {
        let entry = self.derive(handle, |g| ops::simplify(g, tolerance, preserve_topology))?;
        self.replace(dst, entry)
    }

    pub fn create_buffer(&self, handle: GeometryHandle, distance: f64) -> Result<GeometryHandle> {
        let entry = self.derive(handle, |g| ops::buffer(g, distance))?;
        self.insert(entry)
    }

    pub fn update_buffer(&self, handle: GeometryHandle, distance: f64, dst: GeometryHandle) -> Result<()> {
        let entry = self.derive(handle, |g| ops::buffer(g, distance))?;
        self.replace(dst, entry)
    }

    // ---- lifecycle ----

    /// Drop memoized state. Handles stay valid.
    pub fn clear_cache(&self) -> Result<()> {
        self.cache()?.clear();
        Ok(())
    }

    /// Invalidate every outstanding handle and release all geometries.
    pub fn clear(&self) -> Result<()> {
        let mut inner = self.write()?;
        if inner.batch.is_some() {
            return Err(FeatureError::illegal_state(
                "cannot clear geometry workspace during a batch",
            ));
        }
        inner.generation = inner.generation.wrapping_add(1);
        inner.entries.clear();
        drop(inner);
        self.clear_cache()
    }

    pub fn begin_batch(&self) -> Result<()> {
        let mut inner = self.write()?;
        if inner.batch.is_some() {
            return Err(FeatureError::illegal_state(
                "geometry workspace batch already active",
            ));
        }
        inner.batch = Some(WorkspaceBatch::begin());
        Ok(())
    }

    /// Merge (`commit == true`) or discard every mutation since
    /// [`begin_batch`](Self::begin_batch).
    pub fn end_batch(&self, commit: bool) -> Result<()> {
        let mut inner = self.write()?;
        let batch = match inner.batch.take() {
            Some(batch) => batch,
            None => {
                return Err(FeatureError::illegal_state(
                    "no geometry workspace batch active",
                ));
            }
        };
        if let Err(e) = batch.check_owner() {
            inner.batch = Some(batch);
            return Err(e);
        }

        let changes = batch.len();
        if commit {
            let mut touched = Vec::with_capacity(changes);
            for (seq, entry) in batch.into_changes() {
                touched.push(seq);
                inner.put(seq, entry);
            }
            drop(inner);
            let mut cache = self.cache()?;
            for seq in touched {
                cache.remove(&seq);
            }
        }
        tracing::debug!(changes, commit, "geometry workspace batch ended");
        Ok(())
    }

    pub fn is_batch_active(&self) -> bool {
        self.read().map(|inner| inner.batch.is_some()).unwrap_or(false)
    }
}
