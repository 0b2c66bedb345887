//! Read-only feature store over an MBTiles archive of vector tiles.
//!
//! Each layer declared in the archive metadata is one feature set. Features
//! are decoded from tiles on demand and receive persistent ids the first time
//! they are seen; the only mutable state is feature-set visibility, which is
//! persisted to a small log in the working directory.

use crate::cursor::{
    FeatureCursor, FeatureSetCursor, VecCursor, paginate_feature_sets, paginate_features,
};
use crate::error::{FeatureError, Result};
use crate::feature::{AltitudeMode, Feature, FeatureId, FeatureSet, FeatureSetId};
use crate::filter::{SpatialFilter, SpatialFilterSet};
use crate::geometry::Envelope;
use crate::identity::{IdentityTable, TileFeatureKey};
use crate::mbtiles::{ArchiveInfo, MbTilesArchive};
use crate::mvt::{self, DecodedFeature, DecodedLayer};
use crate::persistence::VisibilityLog;
use crate::query::{
    FeatureQueryParameters, FeatureSetQueryParameters, matches_feature, matches_feature_set,
    matches_set,
};
use crate::store::{ContentChangedDispatcher, FeatureDataStore, VisibilityFlags};
use crate::tile_grid::{TileKey, TileRange, tile_resolution, zoom_for_resolution};
use crate::types::Config;
use rustc_hash::FxHashMap;
use smallvec::SmallVec;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

pub const PROVIDER: &str = "MVT";
pub const SET_TYPE: &str = "MVT";

#[derive(Debug)]
struct TiledState {
    archive: Option<MbTilesArchive>,
    info: Option<ArchiveInfo>,
    sets: BTreeMap<FeatureSetId, FeatureSet>,
    /// Every layer name ever seen, so a layer keeps its fsid across refreshes
    fsids: FxHashMap<String, FeatureSetId>,
    next_fsid: FeatureSetId,
    visibility: BTreeMap<FeatureSetId, bool>,
    closed: bool,
}

impl TiledState {
    fn is_visible(&self, fsid: FeatureSetId) -> bool {
        self.visibility.get(&fsid).copied().unwrap_or(true)
    }

    fn set(&self, fsid: FeatureSetId) -> Result<&FeatureSet> {
        self.sets
            .get(&fsid)
            .ok_or_else(|| FeatureError::not_found(format!("feature set {}", fsid)))
    }

    /// Rebuild the feature-set table from the archive metadata.
    fn load_catalog(&mut self, archive: &MbTilesArchive) -> Result<()> {
        let info = archive.read_info()?;
        let min_resolution = tile_resolution(i32::from(info.min_zoom.max(1)) - 1);

        let mut sets = BTreeMap::new();
        for name in &info.layers {
            let fsid = match self.fsids.get(name) {
                Some(fsid) => *fsid,
                None => {
                    let fsid = self.next_fsid;
                    self.next_fsid += 1;
                    self.fsids.insert(name.clone(), fsid);
                    fsid
                }
            };
            sets.insert(
                fsid,
                FeatureSet {
                    fsid,
                    provider: PROVIDER.to_string(),
                    set_type: SET_TYPE.to_string(),
                    name: name.clone(),
                    min_resolution,
                    max_resolution: 0.0,
                    version: 1,
                },
            );
        }

        tracing::debug!(
            archive = %archive.path().display(),
            min_zoom = info.min_zoom,
            max_zoom = info.max_zoom,
            layers = sets.len(),
            "loaded archive catalog"
        );
        self.sets = sets;
        self.info = Some(info);
        Ok(())
    }

    /// Layer name to fsid for the sets a feature query selects. Known layers
    /// the query filters out map to `None`. Resolution relevance does not
    /// apply to id lookups.
    fn layer_selection(&self, params: &FeatureQueryParameters) -> FxHashMap<String, Option<FeatureSetId>> {
        let by_id = params.ids.is_some();
        self.sets
            .values()
            .map(|set| {
                let selected = matches_feature_set(params, set.fsid, &set.name)
                    && (!params.visible_only || self.is_visible(set.fsid))
                    && (by_id
                        || params
                            .max_resolution
                            .is_none_or(|resolution| set.is_relevant_at(resolution)));
                (set.name.clone(), selected.then_some(set.fsid))
            })
            .collect()
    }
}

/// Feature store backed by an MBTiles archive of Mapbox Vector Tiles.
///
/// A store whose archive could not be opened stays unavailable: queries
/// return no rows rather than failing.
///
/// # Examples
///
/// ```rust,no_run
/// use spatio_features::{FeatureDataStore, FeatureQueryParameters, TiledStoreBuilder};
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let store = TiledStoreBuilder::new("basemap.mbtiles")
///     .working_dir("/var/lib/basemap")
///     .build()?;
///
/// let params = FeatureQueryParameters::new()
///     .with_feature_set_names(["water"])
///     .with_max_resolution(150.0);
/// let mut cursor = store.query_features(&params)?;
/// while cursor.move_to_next()? {
///     println!("{} {:?}", cursor.fid()?, cursor.feature()?.name);
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct TiledFeatureDataStore {
    uri: String,
    path: PathBuf,
    config: Arc<Config>,
    visibility_log: Option<VisibilityLog>,
    state: RwLock<TiledState>,
    identities: Arc<IdentityTable>,
    dispatcher: ContentChangedDispatcher,
}

impl TiledFeatureDataStore {
    /// Open the archive at `path`.
    ///
    /// `working_dir` holds the visibility log; without one visibility changes
    /// last only as long as the store. Only an invalid `config` or an
    /// unreadable visibility log is an error. An archive that cannot be
    /// opened yields an unavailable store.
    pub fn open(
        path: impl AsRef<Path>,
        working_dir: Option<&Path>,
        config: Config,
    ) -> Result<Self> {
        config.validate()?;
        let path = path.as_ref().to_path_buf();

        let visibility_log =
            working_dir.map(|dir| VisibilityLog::new(dir.join(&config.visibility_log_name)));
        let visibility = match &visibility_log {
            Some(log) => log.replay()?,
            None => BTreeMap::new(),
        };

        let mut state = TiledState {
            archive: None,
            info: None,
            sets: BTreeMap::new(),
            fsids: FxHashMap::default(),
            next_fsid: 1,
            visibility,
            closed: false,
        };
        match MbTilesArchive::open(&path) {
            Ok(archive) => match state.load_catalog(&archive) {
                Ok(()) => state.archive = Some(archive),
                Err(e) => tracing::warn!(
                    archive = %path.display(),
                    error = %e,
                    "failed to read archive metadata, store is unavailable"
                ),
            },
            Err(e) => tracing::warn!(
                archive = %path.display(),
                error = %e,
                "failed to open archive, store is unavailable"
            ),
        }

        Ok(Self {
            uri: path.display().to_string(),
            path,
            config: Arc::new(config),
            visibility_log,
            state: RwLock::new(state),
            identities: Arc::new(IdentityTable::new()),
            dispatcher: ContentChangedDispatcher::new(),
        })
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, TiledState>> {
        self.state
            .read()
            .map_err(|_| FeatureError::Lock("Failed to acquire read lock".to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, TiledState>> {
        self.state
            .write()
            .map_err(|_| FeatureError::Lock("Failed to acquire write lock".to_string()))
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Number of tile features that have been assigned a persistent id.
    pub fn feature_identity_count(&self) -> usize {
        self.identities.len()
    }

    /// Zoom range, bounds and layers of the open archive.
    pub fn archive_info(&self) -> Option<ArchiveInfo> {
        self.read().ok().and_then(|state| state.info.clone())
    }

    /// Tiles a non-id query would visit.
    fn tile_range(info: &ArchiveInfo, params: &FeatureQueryParameters) -> Option<TileRange> {
        let zoom = params
            .max_resolution
            .map_or(info.max_zoom, zoom_for_resolution)
            .clamp(info.min_zoom, info.max_zoom);
        let envelope = params.spatial_envelope().unwrap_or_else(Envelope::world);
        let populated = info.bounds?.at_coarser_zoom(zoom);
        TileRange::covering(zoom, &envelope).intersect(&populated)
    }

    fn query_by_ids(
        &self,
        state: &TiledState,
        archive: &MbTilesArchive,
        params: &FeatureQueryParameters,
        ids: &BTreeSet<FeatureId>,
    ) -> Result<Vec<Feature>> {
        let selection = state.layer_selection(params);
        let mut by_tile: BTreeMap<TileKey, Vec<(FeatureId, TileFeatureKey)>> = BTreeMap::new();
        for fid in ids {
            match self.identities.lookup(*fid)? {
                Some(key) => by_tile.entry(key.tile).or_default().push((*fid, key)),
                None => tracing::debug!(fid, "skipping unknown feature id"),
            }
        }

        let mut rows = Vec::new();
        for (tile, wanted) in by_tile {
            let Some(layers) = fetch_tile(archive, tile, &self.config)? else {
                continue;
            };
            for (fid, key) in wanted {
                let Some(set) = state.sets.get(&key.fsid) else {
                    continue;
                };
                if selection.get(&set.name).copied().flatten().is_none() {
                    continue;
                }
                let found = layers
                    .iter()
                    .find(|layer| layer.name == set.name)
                    .and_then(|layer| layer.feature(key.local_id));
                if let Some(decoded) = found {
                    let feature = materialize(fid, key.fsid, decoded.clone());
                    if matches_feature(params, &feature) {
                        rows.push(feature);
                    }
                }
            }
        }
        Ok(rows)
    }
}

/// Read and decode one tile. Missing, empty and undecodable tiles are `None`.
fn fetch_tile(
    archive: &MbTilesArchive,
    key: TileKey,
    config: &Config,
) -> Result<Option<Vec<DecodedLayer>>> {
    let Some(data) = archive.tile_data(key)? else {
        return Ok(None);
    };
    if data.is_empty() {
        tracing::debug!(tile = %key, "skipping empty tile");
        return Ok(None);
    }
    match mvt::decode_tile(&data, key, config) {
        Ok(layers) => Ok(Some(layers)),
        Err(e) => {
            tracing::warn!(tile = %key, error = %e, "skipping undecodable tile");
            Ok(None)
        }
    }
}

fn materialize(fid: FeatureId, fsid: FeatureSetId, decoded: DecodedFeature) -> Feature {
    Feature {
        fid,
        fsid,
        name: decoded.name,
        geometry: decoded.geometry,
        altitude_mode: AltitudeMode::ClampToGround,
        extrude: 0.0,
        style: None,
        attributes: decoded.attributes,
        version: 1,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    ResolvingTile,
    DecodingTile,
    Streaming,
    Done,
}

/// Decode state of the tile a session is streaming. Dropped as soon as the
/// tile is exhausted.
struct OpenTile {
    label: String,
    key: TileKey,
    layers: Vec<DecodedLayer>,
    /// fsid per layer of this tile, `None` for layers the query skips
    translation: SmallVec<[Option<FeatureSetId>; 8]>,
    layer: usize,
    feature: usize,
}

/// Cursor driving one feature query over the archive's tiles.
pub struct TileSessionCursor {
    archive: MbTilesArchive,
    config: Arc<Config>,
    identities: Arc<IdentityTable>,
    selection: FxHashMap<String, Option<FeatureSetId>>,
    params: FeatureQueryParameters,
    filter: Option<SpatialFilterSet>,
    tiles: std::vec::IntoIter<TileKey>,
    open: Option<OpenTile>,
    current: Option<Feature>,
    state: SessionState,
}

impl std::fmt::Debug for TileSessionCursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TileSessionCursor")
            .field("archive", &self.archive.id())
            .field("state", &self.state)
            .field("tile", &self.open.as_ref().map(|t| t.label.as_str()))
            .field("remaining_tiles", &self.tiles.len())
            .finish()
    }
}

impl TileSessionCursor {
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Decode `key` and build its translation table. `None` skips the tile.
    fn open_tile(&self, key: TileKey) -> Result<Option<OpenTile>> {
        let label = format!("{}/{}/{}/{}", self.archive.id(), key.z, key.y, key.x);
        let Some(layers) = fetch_tile(&self.archive, key, &self.config)? else {
            return Ok(None);
        };

        let mut translation = SmallVec::with_capacity(layers.len());
        for layer in &layers {
            match self.selection.get(&layer.name) {
                Some(fsid) => translation.push(*fsid),
                None => {
                    tracing::warn!(tile = %label, layer = %layer.name, "skipping tile with undeclared layer");
                    return Ok(None);
                }
            }
        }
        if translation.iter().all(Option::is_none) {
            return Ok(None);
        }

        Ok(Some(OpenTile {
            label,
            key,
            layers,
            translation,
            layer: 0,
            feature: 0,
        }))
    }

    /// Next accepted feature of the open tile.
    fn next_in_tile(&mut self) -> Result<Option<Feature>> {
        let Some(tile) = self.open.as_mut() else {
            return Ok(None);
        };
        while tile.layer < tile.layers.len() {
            let Some(fsid) = tile.translation[tile.layer] else {
                tile.layer += 1;
                tile.feature = 0;
                continue;
            };
            let layer = &mut tile.layers[tile.layer];
            if tile.feature >= layer.features.len() {
                tile.layer += 1;
                tile.feature = 0;
                continue;
            }
            let placeholder = DecodedFeature {
                local_id: layer.features[tile.feature].local_id,
                name: None,
                geometry: None,
                attributes: Default::default(),
            };
            let decoded = std::mem::replace(&mut layer.features[tile.feature], placeholder);
            tile.feature += 1;

            let key = TileFeatureKey {
                tile: tile.key,
                fsid,
                local_id: decoded.local_id,
            };
            // fid 0 is never assigned; the real id is stamped once accepted
            let mut feature = materialize(0, fsid, decoded);
            if !matches_feature(&self.params, &feature) {
                continue;
            }
            if let Some(filter) = &self.filter {
                match filter.accept_feature(&feature) {
                    Ok(true) => {}
                    Ok(false) => continue,
                    Err(e) => {
                        tracing::warn!(tile = %tile.label, error = %e, "spatial filter failed, skipping rest of tile");
                        return Ok(None);
                    }
                }
            }
            feature.fid = self.identities.resolve(key)?;
            return Ok(Some(feature));
        }
        Ok(None)
    }
}

impl FeatureCursor for TileSessionCursor {
    fn move_to_next(&mut self) -> Result<bool> {
        loop {
            match self.state {
                SessionState::Done => return Ok(false),
                SessionState::Idle | SessionState::ResolvingTile | SessionState::DecodingTile => {
                    self.state = SessionState::ResolvingTile;
                    let Some(key) = self.tiles.next() else {
                        self.open = None;
                        self.current = None;
                        self.state = SessionState::Done;
                        return Ok(false);
                    };
                    self.state = SessionState::DecodingTile;
                    match self.open_tile(key) {
                        Ok(Some(tile)) => {
                            tracing::trace!(tile = %tile.label, "streaming tile");
                            self.open = Some(tile);
                            self.state = SessionState::Streaming;
                        }
                        Ok(None) => self.state = SessionState::ResolvingTile,
                        Err(e) => {
                            self.open = None;
                            self.current = None;
                            self.state = SessionState::Done;
                            return Err(e);
                        }
                    }
                }
                SessionState::Streaming => match self.next_in_tile()? {
                    Some(feature) => {
                        self.current = Some(feature);
                        return Ok(true);
                    }
                    None => {
                        self.open = None;
                        self.state = SessionState::ResolvingTile;
                    }
                },
            }
        }
    }

    fn feature(&self) -> Result<&Feature> {
        match (&self.current, self.state) {
            (Some(feature), SessionState::Streaming) => Ok(feature),
            _ => Err(FeatureError::illegal_state("cursor is not positioned on a row")),
        }
    }
}

impl FeatureDataStore for TiledFeatureDataStore {
    fn uri(&self) -> &str {
        &self.uri
    }

    fn get_feature(&self, fid: FeatureId) -> Result<Feature> {
        let params = FeatureQueryParameters::new().with_ids([fid]);
        let state = self.read()?;
        let archive = state
            .archive
            .clone()
            .ok_or_else(|| FeatureError::not_found(format!("feature {}", fid)))?;
        let ids = BTreeSet::from([fid]);
        self.query_by_ids(&state, &archive, &params, &ids)?
            .pop()
            .ok_or_else(|| FeatureError::not_found(format!("feature {}", fid)))
    }

    fn query_features(&self, params: &FeatureQueryParameters) -> Result<Box<dyn FeatureCursor>> {
        let state = self.read()?;
        let (Some(archive), Some(info)) = (state.archive.clone(), state.info.as_ref()) else {
            return Ok(Box::new(VecCursor::<Feature>::empty()));
        };

        if let Some(ids) = &params.ids {
            let rows = self.query_by_ids(&state, &archive, params, ids)?;
            return Ok(paginate_features(
                Box::new(VecCursor::new(rows)),
                params.limit,
                params.offset,
            ));
        }

        let selection = state.layer_selection(params);
        let Some(range) = Self::tile_range(info, params) else {
            return Ok(Box::new(VecCursor::<Feature>::empty()));
        };
        if selection.values().all(Option::is_none) {
            return Ok(Box::new(VecCursor::<Feature>::empty()));
        }
        drop(state);

        let filter = match (&params.spatial_filter, self.config.exact_spatial_filter) {
            (Some(geometry), true) => {
                let mut filters = SpatialFilterSet::new();
                filters.set_filters(&[SpatialFilter::include(geometry.clone())])?;
                Some(filters)
            }
            _ => None,
        };

        let tiles = archive.tiles_in_range(&range)?;
        tracing::debug!(
            zoom = range.zoom,
            tiles = tiles.len(),
            "starting tile session"
        );
        let cursor = TileSessionCursor {
            archive,
            config: Arc::clone(&self.config),
            identities: Arc::clone(&self.identities),
            selection,
            params: params.clone(),
            filter,
            tiles: tiles.into_iter(),
            open: None,
            current: None,
            state: SessionState::Idle,
        };
        Ok(paginate_features(Box::new(cursor), params.limit, params.offset))
    }

    fn get_feature_set(&self, fsid: FeatureSetId) -> Result<FeatureSet> {
        Ok(self.read()?.set(fsid)?.clone())
    }

    fn query_feature_sets(
        &self,
        params: &FeatureSetQueryParameters,
    ) -> Result<Box<dyn FeatureSetCursor>> {
        let state = self.read()?;
        let rows: Vec<FeatureSet> = state
            .sets
            .values()
            .filter(|set| {
                matches_set(params, set) && (!params.visible_only || state.is_visible(set.fsid))
            })
            .cloned()
            .collect();
        Ok(paginate_feature_sets(
            Box::new(VecCursor::new(rows)),
            params.limit,
            params.offset,
        ))
    }

    fn is_feature_visible(&self, fid: FeatureId) -> Result<bool> {
        let key = self
            .identities
            .lookup(fid)?
            .ok_or_else(|| FeatureError::not_found(format!("feature {}", fid)))?;
        Ok(self.read()?.is_visible(key.fsid))
    }

    fn is_feature_set_visible(&self, fsid: FeatureSetId) -> Result<bool> {
        let state = self.read()?;
        state.set(fsid)?;
        Ok(state.is_visible(fsid))
    }

    fn is_feature_read_only(&self, fid: FeatureId) -> Result<bool> {
        match self.identities.lookup(fid)? {
            Some(_) => Ok(true),
            None => Err(FeatureError::not_found(format!("feature {}", fid))),
        }
    }

    fn is_feature_set_read_only(&self, fsid: FeatureSetId) -> Result<bool> {
        self.read()?.set(fsid)?;
        Ok(true)
    }

    fn is_available(&self) -> bool {
        self.read()
            .map(|state| state.archive.is_some())
            .unwrap_or(false)
    }

    fn refresh(&self) -> Result<()> {
        {
            let mut state = self.write()?;
            if state.closed {
                return Err(FeatureError::illegal_state("store is closed"));
            }
            let archive = match state.archive.clone() {
                Some(archive) => archive,
                None => MbTilesArchive::open(&self.path)?,
            };
            state.load_catalog(&archive)?;
            state.archive = Some(archive);
        }
        self.dispatcher.dispatch(&self.uri);
        Ok(())
    }

    fn close(&self) -> Result<()> {
        let mut state = self.write()?;
        state.archive = None;
        state.info = None;
        state.sets.clear();
        state.closed = true;
        Ok(())
    }

    fn visibility_flags(&self) -> VisibilityFlags {
        VisibilityFlags::FEATURE_SET
    }

    fn content_changed(&self) -> &ContentChangedDispatcher {
        &self.dispatcher
    }

    fn set_feature_set_visible(&self, fsid: FeatureSetId, visible: bool) -> Result<()> {
        let params = FeatureSetQueryParameters::new().with_ids([fsid]);
        if self.apply_visibility(&params, visible)? == 0 {
            self.read()?.set(fsid)?;
        }
        Ok(())
    }

    fn set_feature_sets_visible(
        &self,
        params: &FeatureSetQueryParameters,
        visible: bool,
    ) -> Result<()> {
        self.apply_visibility(params, visible).map(|_| ())
    }
}

impl TiledFeatureDataStore {
    /// Set the visibility of every matching set, persist, then notify.
    /// Returns how many sets changed.
    fn apply_visibility(&self, params: &FeatureSetQueryParameters, visible: bool) -> Result<usize> {
        let changed = {
            let mut state = self.write()?;
            let targets: Vec<FeatureSetId> = state
                .sets
                .values()
                .filter(|set| matches_set(params, set) && state.is_visible(set.fsid) != visible)
                .map(|set| set.fsid)
                .collect();
            if targets.is_empty() {
                return Ok(0);
            }

            let mut next = state.visibility.clone();
            for fsid in &targets {
                next.insert(*fsid, visible);
            }
            if let Some(log) = &self.visibility_log {
                log.rewrite(&next)?;
            }
            state.visibility = next;
            targets.len()
        };
        tracing::debug!(changed, visible, "feature set visibility updated");
        self.dispatcher.dispatch(&self.uri);
        Ok(changed)
    }
}
