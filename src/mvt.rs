//! Mapbox Vector Tile payloads.
//!
//! Message types mirror `vector_tile.proto` (version 2.1). Decoding turns one
//! tile payload into per-layer features with WGS84 geometries; the encoding
//! helpers at the bottom build payloads for fixtures and benchmarks.

use crate::attributes::{AttributeSet, AttributeValue};
use crate::error::{FeatureError, Result};
use crate::tile_grid::{TileKey, tile_lat, tile_lon};
use crate::types::Config;
use bytes::BufMut;
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use geo::{Coord, Geometry, LineString, MultiLineString, MultiPoint, MultiPolygon, Point, Polygon};
use prost::Message;
use std::io::{Read, Write};

pub const DEFAULT_EXTENT: u32 = 4096;

const CMD_MOVE_TO: u32 = 1;
const CMD_LINE_TO: u32 = 2;
const CMD_CLOSE_PATH: u32 = 7;

#[derive(Clone, PartialEq, Message)]
pub struct Tile {
    #[prost(message, repeated, tag = "3")]
    pub layers: Vec<Layer>,
}

#[derive(Clone, PartialEq, Message)]
pub struct Layer {
    #[prost(uint32, required, tag = "15")]
    pub version: u32,
    #[prost(string, required, tag = "1")]
    pub name: String,
    #[prost(message, repeated, tag = "2")]
    pub features: Vec<TileFeature>,
    #[prost(string, repeated, tag = "3")]
    pub keys: Vec<String>,
    #[prost(message, repeated, tag = "4")]
    pub values: Vec<TileValue>,
    #[prost(uint32, optional, tag = "5")]
    pub extent: Option<u32>,
}

#[derive(Clone, PartialEq, Message)]
pub struct TileFeature {
    #[prost(uint64, optional, tag = "1")]
    pub id: Option<u64>,
    #[prost(uint32, repeated, packed = "true", tag = "2")]
    pub tags: Vec<u32>,
    #[prost(enumeration = "GeomType", optional, tag = "3")]
    pub r#type: Option<i32>,
    #[prost(uint32, repeated, packed = "true", tag = "4")]
    pub geometry: Vec<u32>,
}

#[derive(Clone, PartialEq, Message)]
pub struct TileValue {
    #[prost(string, optional, tag = "1")]
    pub string_value: Option<String>,
    #[prost(float, optional, tag = "2")]
    pub float_value: Option<f32>,
    #[prost(double, optional, tag = "3")]
    pub double_value: Option<f64>,
    #[prost(int64, optional, tag = "4")]
    pub int_value: Option<i64>,
    #[prost(uint64, optional, tag = "5")]
    pub uint_value: Option<u64>,
    #[prost(sint64, optional, tag = "6")]
    pub sint_value: Option<i64>,
    #[prost(bool, optional, tag = "7")]
    pub bool_value: Option<bool>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum GeomType {
    Unknown = 0,
    Point = 1,
    LineString = 2,
    Polygon = 3,
}

/// One feature of a decoded layer.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedFeature {
    /// The encoded feature id, or the feature's ordinal within its layer.
    pub local_id: u64,
    pub name: Option<String>,
    pub geometry: Option<Geometry<f64>>,
    pub attributes: AttributeSet,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DecodedLayer {
    pub name: String,
    pub features: Vec<DecodedFeature>,
}

impl DecodedLayer {
    /// First feature carrying `local_id`.
    pub fn feature(&self, local_id: u64) -> Option<&DecodedFeature> {
        self.features.iter().find(|f| f.local_id == local_id)
    }
}

fn is_gzip(data: &[u8]) -> bool {
    data.len() >= 2 && data[0] == 0x1f && data[1] == 0x8b
}

/// Inflate a gzip payload; other payloads are returned unchanged.
fn inflate(data: &[u8], max_bytes: usize) -> Result<Vec<u8>> {
    if data.len() > max_bytes {
        return Err(FeatureError::Decode(format!(
            "tile payload of {} bytes exceeds the {} byte limit",
            data.len(),
            max_bytes
        )));
    }
    if !is_gzip(data) {
        return Ok(data.to_vec());
    }
    let mut out = Vec::new();
    GzDecoder::new(data)
        .take(max_bytes as u64 + 1)
        .read_to_end(&mut out)
        .map_err(|e| FeatureError::Decode(format!("gzip: {}", e)))?;
    if out.len() > max_bytes {
        return Err(FeatureError::Decode(format!(
            "inflated tile exceeds the {} byte limit",
            max_bytes
        )));
    }
    Ok(out)
}

/// Decode a tile payload addressed at `key`.
pub fn decode_tile(data: &[u8], key: TileKey, config: &Config) -> Result<Vec<DecodedLayer>> {
    if data.is_empty() {
        return Err(FeatureError::Decode("empty tile payload".to_string()));
    }
    let raw = inflate(data, config.max_tile_bytes)?;
    let tile = Tile::decode(raw.as_slice())
        .map_err(|e| FeatureError::Decode(format!("tile {}: {}", key, e)))?;

    tile.layers
        .iter()
        .map(|layer| decode_layer(layer, key, config))
        .collect()
}

fn decode_layer(layer: &Layer, key: TileKey, config: &Config) -> Result<DecodedLayer> {
    let extent = layer.extent.unwrap_or(DEFAULT_EXTENT);
    if extent == 0 {
        return Err(FeatureError::Decode(format!("layer {} has zero extent", layer.name)));
    }
    let project = |x: i64, y: i64| -> Coord<f64> {
        let fx = key.x as f64 + x as f64 / extent as f64;
        let fy = key.y as f64 + y as f64 / extent as f64;
        Coord {
            x: tile_lon(key.z, fx),
            y: tile_lat(key.z, fy),
        }
    };

    let mut features = Vec::with_capacity(layer.features.len());
    for (ordinal, feature) in layer.features.iter().enumerate() {
        let attributes = decode_tags(layer, &feature.tags)?;
        let name = attributes
            .get_string(&config.feature_name_attribute)
            .ok()
            .flatten()
            .map(str::to_string);
        let geometry = decode_geometry(feature.r#type(), &feature.geometry, &project)?;
        features.push(DecodedFeature {
            local_id: feature.id.unwrap_or(ordinal as u64),
            name,
            geometry,
            attributes,
        });
    }

    Ok(DecodedLayer {
        name: layer.name.clone(),
        features,
    })
}

fn decode_tags(layer: &Layer, tags: &[u32]) -> Result<AttributeSet> {
    if tags.len() % 2 != 0 {
        return Err(FeatureError::Decode("odd tag count".to_string()));
    }
    let mut attributes = AttributeSet::new();
    for pair in tags.chunks_exact(2) {
        let key = layer
            .keys
            .get(pair[0] as usize)
            .ok_or_else(|| FeatureError::Decode(format!("tag key index {} out of range", pair[0])))?;
        let value = layer.values.get(pair[1] as usize).ok_or_else(|| {
            FeatureError::Decode(format!("tag value index {} out of range", pair[1]))
        })?;
        if let Some(value) = attribute_value(value) {
            attributes.set(key.clone(), value);
        }
    }
    Ok(attributes)
}

fn attribute_value(value: &TileValue) -> Option<AttributeValue> {
    if let Some(s) = &value.string_value {
        return Some(AttributeValue::String(Some(s.clone())));
    }
    if let Some(f) = value.float_value {
        return Some(AttributeValue::Double(Some(f as f64)));
    }
    if let Some(d) = value.double_value {
        return Some(AttributeValue::Double(Some(d)));
    }
    if let Some(i) = value.int_value.or(value.sint_value) {
        return Some(AttributeValue::Long(Some(i)));
    }
    if let Some(u) = value.uint_value {
        return Some(match i64::try_from(u) {
            Ok(i) => AttributeValue::Long(Some(i)),
            Err(_) => AttributeValue::Double(Some(u as f64)),
        });
    }
    value
        .bool_value
        .map(|b| AttributeValue::Int(Some(i32::from(b))))
}

#[inline]
fn unzigzag(v: u32) -> i64 {
    ((v >> 1) as i64) ^ -((v & 1) as i64)
}

/// Command stream split into paths of tile-local coordinates.
fn decode_paths(commands: &[u32]) -> Result<Vec<(Vec<(i64, i64)>, bool)>> {
    let mut paths: Vec<(Vec<(i64, i64)>, bool)> = Vec::new();
    let (mut x, mut y) = (0i64, 0i64);
    let mut i = 0;
    while i < commands.len() {
        let id = commands[i] & 0x7;
        let count = (commands[i] >> 3) as usize;
        i += 1;
        match id {
            CMD_MOVE_TO | CMD_LINE_TO => {
                if commands.len() < i + count * 2 {
                    return Err(FeatureError::Decode("truncated geometry command".to_string()));
                }
                for _ in 0..count {
                    x = x
                        .checked_add(unzigzag(commands[i]))
                        .ok_or_else(|| FeatureError::Decode("geometry cursor overflow".to_string()))?;
                    y = y
                        .checked_add(unzigzag(commands[i + 1]))
                        .ok_or_else(|| FeatureError::Decode("geometry cursor overflow".to_string()))?;
                    i += 2;
                    if id == CMD_MOVE_TO {
                        paths.push((vec![(x, y)], false));
                    } else {
                        let path = paths.last_mut().ok_or_else(|| {
                            FeatureError::Decode("LineTo before MoveTo".to_string())
                        })?;
                        path.0.push((x, y));
                    }
                }
            }
            CMD_CLOSE_PATH => {
                let path = paths
                    .last_mut()
                    .ok_or_else(|| FeatureError::Decode("ClosePath before MoveTo".to_string()))?;
                path.1 = true;
            }
            other => {
                return Err(FeatureError::Decode(format!("unknown geometry command {}", other)));
            }
        }
    }
    Ok(paths)
}

/// Twice the signed area in tile coordinates (y down).
///
/// Accumulated in i128: cursor positions of a hostile tile exceed the range
/// whose products fit in i64.
fn signed_area(ring: &[(i64, i64)]) -> i128 {
    let mut sum = 0i128;
    for i in 0..ring.len() {
        let (x1, y1) = ring[i];
        let (x2, y2) = ring[(i + 1) % ring.len()];
        sum += i128::from(x1) * i128::from(y2) - i128::from(x2) * i128::from(y1);
    }
    sum
}

fn decode_geometry(
    geom_type: GeomType,
    commands: &[u32],
    project: &impl Fn(i64, i64) -> Coord<f64>,
) -> Result<Option<Geometry<f64>>> {
    let paths = decode_paths(commands)?;
    if paths.is_empty() {
        return Ok(None);
    }
    let to_line = |path: &[(i64, i64)]| -> LineString<f64> {
        LineString::new(path.iter().map(|(x, y)| project(*x, *y)).collect())
    };

    let geometry = match geom_type {
        GeomType::Unknown => return Ok(None),
        GeomType::Point => {
            let mut points: Vec<Point<f64>> = paths
                .iter()
                .flat_map(|(path, _)| path.iter().map(|(x, y)| Point::from(project(*x, *y))))
                .collect();
            if points.len() == 1 {
                Geometry::Point(points.remove(0))
            } else {
                Geometry::MultiPoint(MultiPoint::new(points))
            }
        }
        GeomType::LineString => {
            let mut lines: Vec<LineString<f64>> = paths
                .iter()
                .filter(|(path, _)| path.len() >= 2)
                .map(|(path, _)| to_line(path))
                .collect();
            match lines.len() {
                0 => return Ok(None),
                1 => Geometry::LineString(lines.remove(0)),
                _ => Geometry::MultiLineString(MultiLineString::new(lines)),
            }
        }
        GeomType::Polygon => {
            let mut polygons: Vec<Polygon<f64>> = Vec::new();
            for (path, _) in &paths {
                let area = signed_area(path);
                if path.len() < 3 || area == 0 {
                    continue;
                }
                let mut ring = to_line(path);
                ring.close();
                if area > 0 {
                    polygons.push(Polygon::new(ring, Vec::new()));
                } else if let Some(outer) = polygons.last_mut() {
                    outer.interiors_push(ring);
                } else {
                    return Err(FeatureError::Decode(
                        "polygon interior ring without exterior".to_string(),
                    ));
                }
            }
            match polygons.len() {
                0 => return Ok(None),
                1 => Geometry::Polygon(polygons.remove(0)),
                _ => Geometry::MultiPolygon(MultiPolygon::new(polygons)),
            }
        }
    };
    Ok(Some(geometry))
}

// ---- encoding ----

#[inline]
fn command(id: u32, count: usize) -> u32 {
    (id & 0x7) | ((count as u32) << 3)
}

#[inline]
fn zigzag(v: i64) -> u32 {
    ((v << 1) ^ (v >> 63)) as u32
}

/// Command stream for a single point.
pub fn point_commands(x: i32, y: i32) -> Vec<u32> {
    vec![command(CMD_MOVE_TO, 1), zigzag(x as i64), zigzag(y as i64)]
}

/// Command stream for a line string.
pub fn line_commands(points: &[(i32, i32)]) -> Vec<u32> {
    let mut out = Vec::with_capacity(points.len() * 2 + 2);
    push_path(&mut out, points, (0, 0));
    out
}

/// Command stream for a polygon: the exterior first (clockwise on screen),
/// then holes. Rings are given without the closing vertex.
pub fn polygon_commands(rings: &[Vec<(i32, i32)>]) -> Vec<u32> {
    let mut out = Vec::new();
    let mut cursor = (0, 0);
    for ring in rings {
        cursor = push_path(&mut out, ring, cursor);
        out.push(command(CMD_CLOSE_PATH, 1));
    }
    out
}

fn push_path(out: &mut Vec<u32>, points: &[(i32, i32)], mut cursor: (i64, i64)) -> (i64, i64) {
    for (i, (x, y)) in points.iter().enumerate() {
        if i == 0 {
            out.push(command(CMD_MOVE_TO, 1));
        } else if i == 1 {
            out.push(command(CMD_LINE_TO, points.len() - 1));
        }
        let (x, y) = (*x as i64, *y as i64);
        out.push(zigzag(x - cursor.0));
        out.push(zigzag(y - cursor.1));
        cursor = (x, y);
    }
    cursor
}

/// Incrementally assembles one encoded layer.
#[derive(Debug, Clone)]
pub struct LayerBuilder {
    layer: Layer,
}

impl LayerBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            layer: Layer {
                version: 2,
                name: name.into(),
                extent: Some(DEFAULT_EXTENT),
                ..Layer::default()
            },
        }
    }

    fn key_index(&mut self, key: &str) -> u32 {
        match self.layer.keys.iter().position(|k| k == key) {
            Some(i) => i as u32,
            None => {
                self.layer.keys.push(key.to_string());
                (self.layer.keys.len() - 1) as u32
            }
        }
    }

    fn value_index(&mut self, value: TileValue) -> u32 {
        match self.layer.values.iter().position(|v| *v == value) {
            Some(i) => i as u32,
            None => {
                self.layer.values.push(value);
                (self.layer.values.len() - 1) as u32
            }
        }
    }

    /// Append a feature with string properties.
    pub fn feature(
        mut self,
        id: Option<u64>,
        geom_type: GeomType,
        geometry: Vec<u32>,
        properties: &[(&str, &str)],
    ) -> Self {
        let mut tags = Vec::with_capacity(properties.len() * 2);
        for (key, value) in properties {
            tags.push(self.key_index(key));
            tags.push(self.value_index(TileValue {
                string_value: Some(value.to_string()),
                ..TileValue::default()
            }));
        }
        let mut feature = TileFeature {
            id,
            tags,
            r#type: None,
            geometry,
        };
        feature.set_type(geom_type);
        self.layer.features.push(feature);
        self
    }

    pub fn build(self) -> Layer {
        self.layer
    }
}

/// Encode layers into a tile payload, optionally gzip-compressed.
pub fn encode_tile(layers: Vec<Layer>, gzip: bool) -> Result<Vec<u8>> {
    let tile = Tile { layers };
    let mut raw = Vec::with_capacity(tile.encoded_len());
    tile.encode(&mut raw)
        .map_err(|e| FeatureError::Decode(format!("tile encode: {}", e)))?;
    if !gzip {
        return Ok(raw);
    }
    let mut encoder = GzEncoder::new(Vec::new().writer(), Compression::default());
    encoder.write_all(&raw)?;
    Ok(encoder.finish()?.into_inner())
}
