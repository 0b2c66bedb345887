use crate::error::{FeatureError, Result};
use crate::workspace::Entry;
use rustc_hash::FxHashMap;
use std::thread::{self, ThreadId};

/// Pending mutations of a geometry workspace batch.
///
/// The batch owns an overlay keyed by handle sequence number. `Some(entry)`
/// is a created or updated geometry, `None` marks a deletion. Only the thread
/// that began the batch sees the overlay; everyone else keeps reading the
/// committed state until the batch ends.
///
/// # Examples
///
/// ```rust
/// use spatio_features::GeometryWorkspace;
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let gw = GeometryWorkspace::new();
/// let a = gw.create_geometry_from_wkt("POINT(1 2)")?;
///
/// gw.begin_batch()?;
/// gw.delete_geometry(a)?;
/// let b = gw.create_geometry_from_wkt("POINT(3 4)")?;
/// gw.end_batch(false)?;
///
/// // rolled back: a survives, b never existed
/// assert!(gw.geometry_as_wkt(a).is_ok());
/// assert!(gw.geometry_as_wkt(b).is_err());
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub(crate) struct WorkspaceBatch {
    owner: ThreadId,
    overlay: FxHashMap<u64, Option<Entry>>,
}

impl WorkspaceBatch {
    pub(crate) fn begin() -> Self {
        Self {
            owner: thread::current().id(),
            overlay: FxHashMap::default(),
        }
    }

    /// Whether the calling thread started this batch.
    pub(crate) fn is_owner(&self) -> bool {
        thread::current().id() == self.owner
    }

    pub(crate) fn check_owner(&self) -> Result<()> {
        if self.is_owner() {
            Ok(())
        } else {
            Err(FeatureError::illegal_state(
                "geometry workspace batch is owned by another thread",
            ))
        }
    }

    /// Stage a create/update (`Some`) or a delete (`None`).
    pub(crate) fn stage(&mut self, seq: u64, entry: Option<Entry>) {
        self.overlay.insert(seq, entry);
    }

    /// `None` when the batch never touched `seq`, `Some(None)` when it was
    /// deleted inside the batch.
    pub(crate) fn lookup(&self, seq: u64) -> Option<Option<&Entry>> {
        self.overlay.get(&seq).map(|e| e.as_ref())
    }

    pub(crate) fn live_delta(&self, base_contains: impl Fn(u64) -> bool) -> isize {
        self.overlay
            .iter()
            .map(|(seq, entry)| match (entry.is_some(), base_contains(*seq)) {
                (true, false) => 1,
                (false, true) => -1,
                _ => 0,
            })
            .sum()
    }

    pub(crate) fn len(&self) -> usize {
        self.overlay.len()
    }

    pub(crate) fn into_changes(self) -> impl Iterator<Item = (u64, Option<Entry>)> {
        self.overlay.into_iter()
    }
}
