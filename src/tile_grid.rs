//! Web Mercator ("slippy map") tile grid math.
//!
//! Tile rows are top-left origin (XYZ) throughout; archive rows are flipped
//! at the storage boundary.

use crate::geometry::Envelope;
use std::f64::consts::PI;

/// Latitude limit of the Web Mercator projection.
pub const MAX_LAT: f64 = 85.05112878;
pub const MIN_LAT: f64 = -85.05112878;

/// Highest zoom level the grid math accepts.
pub const MAX_ZOOM: u8 = 30;

/// Ground resolution of zoom level 0, in meters/pixel, for 256px tiles.
pub const ZOOM0_RESOLUTION: f64 = 156543.03392804097;

/// Nominal resolution of a zoom level.
#[inline]
pub fn tile_resolution(zoom: i32) -> f64 {
    ZOOM0_RESOLUTION / 2f64.powi(zoom)
}

/// The coarsest zoom level whose resolution is at least as fine as
/// `resolution`. Never negative.
#[inline]
pub fn zoom_for_resolution(resolution: f64) -> u8 {
    if !resolution.is_finite() || resolution <= 0.0 {
        return MAX_ZOOM;
    }
    // tolerate rounding when the resolution is exactly a level's nominal one
    let level = ((ZOOM0_RESOLUTION / resolution).log2() - 1e-9).ceil();
    level.clamp(0.0, MAX_ZOOM as f64) as u8
}

#[inline]
pub fn tile_x(zoom: u8, lon: f64) -> u32 {
    let n = 1u64 << zoom;
    let x = ((lon + 180.0) / 360.0 * n as f64).floor();
    x.clamp(0.0, (n - 1) as f64) as u32
}

#[inline]
pub fn tile_y(zoom: u8, lat: f64) -> u32 {
    let n = 1u64 << zoom;
    let lat_rad = lat.clamp(MIN_LAT, MAX_LAT).to_radians();
    let y = ((1.0 - lat_rad.tan().asinh() / PI) / 2.0 * n as f64).floor();
    y.clamp(0.0, (n - 1) as f64) as u32
}

/// Longitude of the west edge of column `x`.
#[inline]
pub fn tile_lon(zoom: u8, x: f64) -> f64 {
    x / (1u64 << zoom) as f64 * 360.0 - 180.0
}

/// Latitude of the north edge of row `y`.
#[inline]
pub fn tile_lat(zoom: u8, y: f64) -> f64 {
    let n = (1u64 << zoom) as f64;
    (PI * (1.0 - 2.0 * y / n)).sinh().atan().to_degrees()
}

/// Convert an archive (TMS, bottom-up) row to an XYZ row and back. `None`
/// when `row` does not exist at `zoom`.
#[inline]
pub fn flip_row(zoom: u8, row: u32) -> Option<u32> {
    let rows = 1u64.checked_shl(u32::from(zoom))?;
    rows.checked_sub(u64::from(row) + 1)
        .and_then(|flipped| u32::try_from(flipped).ok())
}

/// Geographic bounds of a tile.
pub fn tile_envelope(zoom: u8, x: u32, y: u32) -> Envelope {
    Envelope::new(
        tile_lon(zoom, x as f64),
        tile_lat(zoom, (y + 1) as f64),
        tile_lon(zoom, (x + 1) as f64),
        tile_lat(zoom, y as f64),
    )
}

/// Address of one tile in XYZ convention.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TileKey {
    pub z: u8,
    pub x: u32,
    pub y: u32,
}

impl TileKey {
    pub fn new(z: u8, x: u32, y: u32) -> Self {
        Self { z, x, y }
    }
}

impl std::fmt::Display for TileKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.z, self.x, self.y)
    }
}

/// Inclusive XYZ tile bounds at one zoom level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileRange {
    pub zoom: u8,
    pub min_x: u32,
    pub min_y: u32,
    pub max_x: u32,
    pub max_y: u32,
}

impl TileRange {
    /// Tiles covering `envelope` at `zoom`.
    pub fn covering(zoom: u8, envelope: &Envelope) -> Self {
        Self {
            zoom,
            min_x: tile_x(zoom, envelope.min_x),
            max_x: tile_x(zoom, envelope.max_x),
            // north edge is the smaller row
            min_y: tile_y(zoom, envelope.max_y),
            max_y: tile_y(zoom, envelope.min_y),
        }
    }

    /// The same area expressed at the coarser `zoom`.
    pub fn at_coarser_zoom(&self, zoom: u8) -> Self {
        let shift = self.zoom.saturating_sub(zoom);
        Self {
            zoom,
            min_x: self.min_x >> shift,
            min_y: self.min_y >> shift,
            max_x: self.max_x >> shift,
            max_y: self.max_y >> shift,
        }
    }

    /// Intersection of two ranges at the same zoom, `None` when disjoint.
    pub fn intersect(&self, other: &TileRange) -> Option<TileRange> {
        debug_assert_eq!(self.zoom, other.zoom);
        let range = TileRange {
            zoom: self.zoom,
            min_x: self.min_x.max(other.min_x),
            min_y: self.min_y.max(other.min_y),
            max_x: self.max_x.min(other.max_x),
            max_y: self.max_y.min(other.max_y),
        };
        (range.min_x <= range.max_x && range.min_y <= range.max_y).then_some(range)
    }

    pub fn contains(&self, x: u32, y: u32) -> bool {
        (self.min_x..=self.max_x).contains(&x) && (self.min_y..=self.max_y).contains(&y)
    }

    pub fn tile_count(&self) -> u64 {
        (self.max_x - self.min_x + 1) as u64 * (self.max_y - self.min_y + 1) as u64
    }
}
