//! Read-only access to MBTiles archives.
//!
//! The `tiles` table stores rows bottom-up (TMS); everything this module
//! returns is already flipped to XYZ.

use crate::error::{FeatureError, Result};
use crate::tile_grid::{TileKey, TileRange, flip_row};
use rusqlite::types::ValueRef;
use rusqlite::{Connection, OpenFlags, OptionalExtension, params};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

static NEXT_ARCHIVE_ID: AtomicU64 = AtomicU64::new(1);

/// Zoom range, populated extent and declared layers of an archive.
#[derive(Debug, Clone, PartialEq)]
pub struct ArchiveInfo {
    pub min_zoom: u8,
    pub max_zoom: u8,
    /// Populated tile extent at `max_zoom`, `None` for an archive without tiles
    pub bounds: Option<TileRange>,
    /// `vector_layers[].id` from the `json` metadata entry, in declaration order
    pub layers: Vec<String>,
}

/// Shared handle to an open archive.
#[derive(Debug, Clone)]
pub struct MbTilesArchive {
    conn: Arc<Mutex<Connection>>,
    path: PathBuf,
    id: u64,
}

impl MbTilesArchive {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let flags = OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_URI;
        let conn = Connection::open_with_flags(&path, flags)?;
        if !table_exists(&conn, "tiles")? {
            return Err(FeatureError::invalid(format!(
                "{} has no tiles table",
                path.display()
            )));
        }
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path,
            id: NEXT_ARCHIVE_ID.fetch_add(1, Ordering::Relaxed),
        })
    }

    /// Process-unique id, used to label tile decode sessions.
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| FeatureError::Lock("Failed to acquire archive connection".to_string()))
    }

    pub fn read_info(&self) -> Result<ArchiveInfo> {
        let conn = self.conn()?;

        let (min_zoom, max_zoom): (Option<i64>, Option<i64>) = conn.query_row(
            "SELECT min(zoom_level), max(zoom_level) FROM tiles",
            [],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )?;
        let min_zoom = zoom_level(min_zoom.unwrap_or(0))?;
        let max_zoom = zoom_level(max_zoom.unwrap_or(0))?;

        let extent: (Option<i64>, Option<i64>, Option<i64>, Option<i64>) = conn.query_row(
            "SELECT min(tile_column), max(tile_column), min(tile_row), max(tile_row) \
             FROM tiles WHERE zoom_level = ?1",
            params![max_zoom],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?)),
        )?;
        let bounds = match extent {
            (Some(min_col), Some(max_col), Some(min_row), Some(max_row)) => Some(TileRange {
                zoom: max_zoom,
                min_x: tile_index(min_col)?,
                max_x: tile_index(max_col)?,
                min_y: xyz_row(max_zoom, tile_index(max_row)?)?,
                max_y: xyz_row(max_zoom, tile_index(min_row)?)?,
            }),
            _ => None,
        };

        let json: Option<String> = if table_exists(&conn, "metadata")? {
            conn.query_row(
                "SELECT value FROM metadata WHERE name = 'json' LIMIT 1",
                [],
                |r| r.get(0),
            )
            .optional()?
        } else {
            None
        };
        let layers = match json {
            Some(json) => parse_vector_layers(&json),
            None => Vec::new(),
        };

        Ok(ArchiveInfo {
            min_zoom,
            max_zoom,
            bounds,
            layers,
        })
    }

    /// Every stored tile inside `range`, ordered by column then XYZ row.
    pub fn tiles_in_range(&self, range: &TileRange) -> Result<Vec<TileKey>> {
        let z = range.zoom;
        let conn = self.conn()?;
        let mut stmt = conn.prepare_cached(
            "SELECT tile_column, tile_row FROM tiles \
             WHERE zoom_level = ?1 AND tile_column BETWEEN ?2 AND ?3 AND tile_row BETWEEN ?4 AND ?5",
        )?;
        let rows = stmt.query_map(
            params![
                z,
                range.min_x,
                range.max_x,
                xyz_row(z, range.max_y)?,
                xyz_row(z, range.min_y)?
            ],
            |r| Ok((r.get::<_, i64>(0)?, r.get::<_, i64>(1)?)),
        )?;

        let mut keys = Vec::new();
        for row in rows {
            let (col, row) = row?;
            match flip_row(z, tile_index(row)?) {
                Some(y) => keys.push(TileKey::new(z, tile_index(col)?, y)),
                None => tracing::warn!(zoom = z, row, "skipping tile row outside the grid"),
            }
        }
        keys.sort();
        Ok(keys)
    }

    /// Raw payload of one tile, `None` if the archive does not store it or
    /// stores something other than a blob.
    pub fn tile_data(&self, key: TileKey) -> Result<Option<Vec<u8>>> {
        let Some(row) = flip_row(key.z, key.y) else {
            return Ok(None);
        };
        let conn = self.conn()?;
        let mut stmt = conn.prepare_cached(
            "SELECT tile_data FROM tiles \
             WHERE zoom_level = ?1 AND tile_column = ?2 AND tile_row = ?3 LIMIT 1",
        )?;
        let data = stmt
            .query_row(params![key.z, key.x, row], |r| {
                Ok(match r.get_ref(0)? {
                    ValueRef::Blob(data) => Some(data.to_vec()),
                    ValueRef::Null => None,
                    other => {
                        tracing::warn!(
                            tile = %key,
                            column_type = %other.data_type(),
                            "ignoring non-blob tile_data"
                        );
                        None
                    }
                })
            })
            .optional()?;
        Ok(data.flatten())
    }
}

fn table_exists(conn: &Connection, name: &str) -> Result<bool> {
    let count: i64 = conn.query_row(
        "SELECT count(*) FROM sqlite_master WHERE type IN ('table', 'view') AND name = ?1",
        params![name],
        |r| r.get(0),
    )?;
    Ok(count > 0)
}

fn xyz_row(zoom: u8, row: u32) -> Result<u32> {
    flip_row(zoom, row)
        .ok_or_else(|| FeatureError::Decode(format!("tile row {} out of range at zoom {}", row, zoom)))
}

fn zoom_level(v: i64) -> Result<u8> {
    u8::try_from(v)
        .ok()
        .filter(|z| *z <= crate::tile_grid::MAX_ZOOM)
        .ok_or_else(|| FeatureError::Decode(format!("invalid zoom level {}", v)))
}

fn tile_index(v: i64) -> Result<u32> {
    u32::try_from(v).map_err(|_| FeatureError::Decode(format!("invalid tile index {}", v)))
}

/// Layer ids from MBTiles `json` metadata. Malformed JSON yields no layers.
pub fn parse_vector_layers(json: &str) -> Vec<String> {
    let value: serde_json::Value = match serde_json::from_str(json) {
        Ok(value) => value,
        Err(e) => {
            tracing::warn!(error = %e, "ignoring malformed MBTiles json metadata");
            return Vec::new();
        }
    };
    value
        .get("vector_layers")
        .and_then(|layers| layers.as_array())
        .map(|layers| {
            layers
                .iter()
                .filter_map(|layer| layer.get("id").and_then(|id| id.as_str()))
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}
