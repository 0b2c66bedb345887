//! Binary geometry codecs: OGC WKB and the SpatiaLite geometry blob.
//!
//! Both readers accept either byte order. The WKB writer always emits
//! little-endian; the blob writer emits whatever byte order the caller asks
//! for so a blob read from an external source can be re-emitted unchanged.

use crate::error::{FeatureError, Result};
use crate::geometry::{Envelope, canonicalize, empty};
use bytes::{Buf, BufMut, BytesMut};
use geo::{
    Coord, Geometry, GeometryCollection, LineString, MultiLineString, MultiPoint, MultiPolygon,
    Point, Polygon,
};
use serde::{Deserialize, Serialize};

const BLOB_START: u8 = 0x00;
const BLOB_MBR_END: u8 = 0x7C;
const BLOB_ENTITY: u8 = 0x69;
const BLOB_END: u8 = 0xFE;

const EWKB_Z: u32 = 0x8000_0000;
const EWKB_M: u32 = 0x4000_0000;
const EWKB_SRID: u32 = 0x2000_0000;

const MAX_NESTING: usize = 32;

/// SRID stamped on blobs for geometries that did not come from a blob.
pub const DEFAULT_SRID: i32 = 4326;

/// Byte order of a binary geometry encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ByteOrder {
    BigEndian,
    #[default]
    LittleEndian,
}

impl ByteOrder {
    fn from_flag(flag: u8) -> Result<Self> {
        match flag {
            0 => Ok(ByteOrder::BigEndian),
            1 => Ok(ByteOrder::LittleEndian),
            other => Err(FeatureError::Decode(format!(
                "invalid byte order flag 0x{:02x}",
                other
            ))),
        }
    }

    fn flag(self) -> u8 {
        match self {
            ByteOrder::BigEndian => 0,
            ByteOrder::LittleEndian => 1,
        }
    }
}

/// Header fields of a SpatiaLite blob that are not part of the geometry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlobInfo {
    pub srid: i32,
    pub byte_order: ByteOrder,
}

impl Default for BlobInfo {
    fn default() -> Self {
        Self {
            srid: DEFAULT_SRID,
            byte_order: ByteOrder::LittleEndian,
        }
    }
}

struct Reader<'a> {
    buf: &'a [u8],
    order: ByteOrder,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self {
            buf,
            order: ByteOrder::LittleEndian,
        }
    }

    fn need(&self, n: usize) -> Result<()> {
        if self.buf.remaining() < n {
            return Err(FeatureError::Decode(format!(
                "truncated geometry: needed {} bytes, {} left",
                n,
                self.buf.remaining()
            )));
        }
        Ok(())
    }

    fn u8(&mut self) -> Result<u8> {
        self.need(1)?;
        Ok(self.buf.get_u8())
    }

    fn u32(&mut self) -> Result<u32> {
        self.need(4)?;
        Ok(match self.order {
            ByteOrder::BigEndian => self.buf.get_u32(),
            ByteOrder::LittleEndian => self.buf.get_u32_le(),
        })
    }

    fn i32(&mut self) -> Result<i32> {
        self.need(4)?;
        Ok(match self.order {
            ByteOrder::BigEndian => self.buf.get_i32(),
            ByteOrder::LittleEndian => self.buf.get_i32_le(),
        })
    }

    fn f64(&mut self) -> Result<f64> {
        self.need(8)?;
        Ok(match self.order {
            ByteOrder::BigEndian => self.buf.get_f64(),
            ByteOrder::LittleEndian => self.buf.get_f64_le(),
        })
    }

    /// Element count, rejected when the payload cannot possibly hold it.
    fn count(&mut self, min_item_bytes: usize) -> Result<usize> {
        let n = self.u32()? as usize;
        if n.saturating_mul(min_item_bytes) > self.buf.remaining() {
            return Err(FeatureError::Decode(format!(
                "element count {} exceeds payload",
                n
            )));
        }
        Ok(n)
    }

    fn coord(&mut self, extra: usize) -> Result<Coord<f64>> {
        let x = self.f64()?;
        let y = self.f64()?;
        for _ in 0..extra {
            self.f64()?;
        }
        Ok(Coord { x, y })
    }

    fn coords(&mut self, extra: usize) -> Result<LineString<f64>> {
        let n = self.count(16 + 8 * extra)?;
        let mut coords = Vec::with_capacity(n);
        for _ in 0..n {
            coords.push(self.coord(extra)?);
        }
        Ok(LineString::new(coords))
    }

    fn polygon(&mut self, extra: usize) -> Result<Polygon<f64>> {
        let rings = self.count(4)?;
        if rings == 0 {
            return Ok(Polygon::new(LineString::new(Vec::new()), Vec::new()));
        }
        let exterior = self.coords(extra)?;
        let mut interiors = Vec::with_capacity(rings - 1);
        for _ in 1..rings {
            interiors.push(self.coords(extra)?);
        }
        Ok(Polygon::new(exterior, interiors))
    }
}

struct Writer {
    buf: BytesMut,
    order: ByteOrder,
}

impl Writer {
    fn new(order: ByteOrder) -> Self {
        Self {
            buf: BytesMut::new(),
            order,
        }
    }

    fn u8(&mut self, v: u8) {
        self.buf.put_u8(v);
    }

    fn u32(&mut self, v: u32) {
        match self.order {
            ByteOrder::BigEndian => self.buf.put_u32(v),
            ByteOrder::LittleEndian => self.buf.put_u32_le(v),
        }
    }

    fn i32(&mut self, v: i32) {
        match self.order {
            ByteOrder::BigEndian => self.buf.put_i32(v),
            ByteOrder::LittleEndian => self.buf.put_i32_le(v),
        }
    }

    fn f64(&mut self, v: f64) {
        match self.order {
            ByteOrder::BigEndian => self.buf.put_f64(v),
            ByteOrder::LittleEndian => self.buf.put_f64_le(v),
        }
    }

    fn coord(&mut self, c: &Coord<f64>) {
        self.f64(c.x);
        self.f64(c.y);
    }

    fn coords(&mut self, line: &LineString<f64>) {
        self.u32(line.0.len() as u32);
        for c in &line.0 {
            self.coord(c);
        }
    }

    fn polygon(&mut self, polygon: &Polygon<f64>) {
        if polygon.exterior().0.is_empty() {
            self.u32(0);
            return;
        }
        self.u32(1 + polygon.interiors().len() as u32);
        self.coords(polygon.exterior());
        for ring in polygon.interiors() {
            self.coords(ring);
        }
    }

    fn finish(self) -> Vec<u8> {
        self.buf.to_vec()
    }
}

/// Assemble decoded members into the multi geometry named by `class`.
fn collect_members(class: u32, members: Vec<Geometry<f64>>) -> Result<Geometry<f64>> {
    let mismatch = |what: &str| FeatureError::Decode(format!("non-{} member in multi geometry", what));
    match class {
        4 => members
            .into_iter()
            .map(|m| match m {
                Geometry::Point(p) => Ok(p),
                _ => Err(mismatch("point")),
            })
            .collect::<Result<Vec<Point<f64>>>>()
            .map(|v| Geometry::MultiPoint(MultiPoint::new(v))),
        5 => members
            .into_iter()
            .map(|m| match m {
                Geometry::LineString(l) => Ok(l),
                _ => Err(mismatch("linestring")),
            })
            .collect::<Result<Vec<LineString<f64>>>>()
            .map(|v| Geometry::MultiLineString(MultiLineString::new(v))),
        6 => members
            .into_iter()
            .map(|m| match m {
                Geometry::Polygon(p) => Ok(p),
                _ => Err(mismatch("polygon")),
            })
            .collect::<Result<Vec<Polygon<f64>>>>()
            .map(|v| Geometry::MultiPolygon(MultiPolygon::new(v))),
        _ => Ok(Geometry::GeometryCollection(GeometryCollection::new_from(
            members,
        ))),
    }
}

/// Decode OGC WKB (ISO or EWKB flavoured) into a canonical geometry.
pub fn read_wkb(data: &[u8]) -> Result<Geometry<f64>> {
    let mut reader = Reader::new(data);
    let geometry = read_wkb_geometry(&mut reader, 0)?;
    Ok(canonicalize(geometry))
}

fn read_wkb_geometry(r: &mut Reader<'_>, depth: usize) -> Result<Geometry<f64>> {
    if depth > MAX_NESTING {
        return Err(FeatureError::Decode("WKB nesting too deep".into()));
    }
    r.order = ByteOrder::from_flag(r.u8()?)?;
    let raw = r.u32()?;

    let mut extra = 0;
    if raw & EWKB_Z != 0 {
        extra += 1;
    }
    if raw & EWKB_M != 0 {
        extra += 1;
    }
    if raw & EWKB_SRID != 0 {
        r.i32()?;
    }
    let code = raw & 0x0FFF_FFFF;
    extra += match code / 1000 {
        0 => 0,
        1 | 2 => 1,
        3 => 2,
        _ => {
            return Err(FeatureError::Decode(format!(
                "unsupported WKB type code {}",
                code
            )));
        }
    };

    match code % 1000 {
        1 => {
            let c = r.coord(extra)?;
            if c.x.is_nan() && c.y.is_nan() {
                Ok(empty())
            } else {
                Ok(Geometry::Point(Point(c)))
            }
        }
        2 => Ok(Geometry::LineString(r.coords(extra)?)),
        3 => Ok(Geometry::Polygon(r.polygon(extra)?)),
        base @ 4..=7 => {
            let n = r.count(5)?;
            let mut members = Vec::with_capacity(n);
            for _ in 0..n {
                members.push(read_wkb_geometry(r, depth + 1)?);
            }
            collect_members(base, members)
        }
        other => Err(FeatureError::Decode(format!(
            "unsupported WKB geometry type {}",
            other
        ))),
    }
}

/// Encode a geometry as little-endian 2D WKB.
pub fn write_wkb(geometry: &Geometry<f64>) -> Vec<u8> {
    let mut w = Writer::new(ByteOrder::LittleEndian);
    put_wkb(&mut w, geometry);
    w.finish()
}

fn put_wkb(w: &mut Writer, geometry: &Geometry<f64>) {
    w.u8(w.order.flag());
    match geometry {
        Geometry::Point(p) => {
            w.u32(1);
            w.coord(&p.0);
        }
        Geometry::Line(line) => {
            w.u32(2);
            w.coords(&LineString::new(vec![line.start, line.end]));
        }
        Geometry::LineString(line) => {
            w.u32(2);
            w.coords(line);
        }
        Geometry::Polygon(polygon) => {
            w.u32(3);
            w.polygon(polygon);
        }
        Geometry::Rect(rect) => {
            w.u32(3);
            w.polygon(&rect.to_polygon());
        }
        Geometry::Triangle(triangle) => {
            w.u32(3);
            w.polygon(&triangle.to_polygon());
        }
        Geometry::MultiPoint(points) => {
            w.u32(4);
            w.u32(points.0.len() as u32);
            for p in &points.0 {
                put_wkb(w, &Geometry::Point(*p));
            }
        }
        Geometry::MultiLineString(lines) => {
            w.u32(5);
            w.u32(lines.0.len() as u32);
            for line in &lines.0 {
                put_wkb(w, &Geometry::LineString(line.clone()));
            }
        }
        Geometry::MultiPolygon(polygons) => {
            w.u32(6);
            w.u32(polygons.0.len() as u32);
            for polygon in &polygons.0 {
                put_wkb(w, &Geometry::Polygon(polygon.clone()));
            }
        }
        Geometry::GeometryCollection(collection) => {
            w.u32(7);
            w.u32(collection.0.len() as u32);
            for child in &collection.0 {
                put_wkb(w, child);
            }
        }
    }
}

/// Decode a SpatiaLite geometry blob.
pub fn read_blob(data: &[u8]) -> Result<(Geometry<f64>, BlobInfo)> {
    let mut r = Reader::new(data);
    if r.u8()? != BLOB_START {
        return Err(FeatureError::Decode("missing blob start marker".into()));
    }
    r.order = ByteOrder::from_flag(r.u8()?)?;
    let srid = r.i32()?;
    for _ in 0..4 {
        r.f64()?; // MBR, recomputed on write
    }
    if r.u8()? != BLOB_MBR_END {
        return Err(FeatureError::Decode("missing blob MBR end marker".into()));
    }

    let (base, extra) = blob_class(r.i32()?)?;
    let geometry = match base {
        1..=3 => read_blob_simple(&mut r, base, extra)?,
        _ => {
            let n = r.count(5)?;
            let mut members = Vec::with_capacity(n);
            for _ in 0..n {
                if r.u8()? != BLOB_ENTITY {
                    return Err(FeatureError::Decode("missing blob entity marker".into()));
                }
                let (member_base, member_extra) = blob_class(r.i32()?)?;
                if member_base > 3 {
                    return Err(FeatureError::Decode(
                        "nested collection inside blob".into(),
                    ));
                }
                members.push(read_blob_simple(&mut r, member_base, member_extra)?);
            }
            collect_members(base, members)?
        }
    };

    if r.u8()? != BLOB_END {
        return Err(FeatureError::Decode("missing blob end marker".into()));
    }

    Ok((
        geometry,
        BlobInfo {
            srid,
            byte_order: r.order,
        },
    ))
}

fn blob_class(class: i32) -> Result<(u32, usize)> {
    if !(1..4000).contains(&class) {
        return Err(FeatureError::Decode(format!(
            "unsupported blob class {}",
            class
        )));
    }
    let class = class as u32;
    let base = class % 1000;
    if !(1..=7).contains(&base) {
        return Err(FeatureError::Decode(format!(
            "unsupported blob class {}",
            class
        )));
    }
    let extra = match class / 1000 {
        0 => 0,
        1 | 2 => 1,
        _ => 2,
    };
    Ok((base, extra))
}

fn read_blob_simple(r: &mut Reader<'_>, base: u32, extra: usize) -> Result<Geometry<f64>> {
    Ok(match base {
        1 => Geometry::Point(Point(r.coord(extra)?)),
        2 => Geometry::LineString(r.coords(extra)?),
        _ => Geometry::Polygon(r.polygon(extra)?),
    })
}

/// Encode a geometry as a 2D SpatiaLite blob.
pub fn write_blob(geometry: &Geometry<f64>, info: BlobInfo) -> Vec<u8> {
    let mut w = Writer::new(info.byte_order);
    let mbr = Envelope::of(geometry).unwrap_or(Envelope::new(0.0, 0.0, 0.0, 0.0));

    w.u8(BLOB_START);
    w.u8(info.byte_order.flag());
    w.i32(info.srid);
    w.f64(mbr.min_x);
    w.f64(mbr.min_y);
    w.f64(mbr.max_x);
    w.f64(mbr.max_y);
    w.u8(BLOB_MBR_END);

    match canonicalize(geometry.clone()) {
        Geometry::Point(p) => {
            w.i32(1);
            w.coord(&p.0);
        }
        Geometry::LineString(line) => {
            w.i32(2);
            w.coords(&line);
        }
        Geometry::Polygon(polygon) => {
            w.i32(3);
            w.polygon(&polygon);
        }
        Geometry::MultiPoint(points) => {
            let members: Vec<_> = points.0.into_iter().map(Geometry::Point).collect();
            put_blob_entities(&mut w, 4, &members);
        }
        Geometry::MultiLineString(lines) => {
            let members: Vec<_> = lines.0.into_iter().map(Geometry::LineString).collect();
            put_blob_entities(&mut w, 5, &members);
        }
        Geometry::MultiPolygon(polygons) => {
            let members: Vec<_> = polygons.0.into_iter().map(Geometry::Polygon).collect();
            put_blob_entities(&mut w, 6, &members);
        }
        other => {
            let mut members = Vec::new();
            simple_members(other, &mut members);
            put_blob_entities(&mut w, 7, &members);
        }
    }

    w.u8(BLOB_END);
    w.finish()
}

fn put_blob_entities(w: &mut Writer, class: i32, members: &[Geometry<f64>]) {
    w.i32(class);
    w.u32(members.len() as u32);
    for member in members {
        w.u8(BLOB_ENTITY);
        match member {
            Geometry::Point(p) => {
                w.i32(1);
                w.coord(&p.0);
            }
            Geometry::LineString(line) => {
                w.i32(2);
                w.coords(line);
            }
            Geometry::Polygon(polygon) => {
                w.i32(3);
                w.polygon(polygon);
            }
            // simple_members only yields the three simple classes
            _ => {}
        }
    }
}

/// Expand a geometry into the point, line and polygon members a blob
/// collection can carry.
fn simple_members(geometry: Geometry<f64>, out: &mut Vec<Geometry<f64>>) {
    match canonicalize(geometry) {
        g @ (Geometry::Point(_) | Geometry::LineString(_) | Geometry::Polygon(_)) => out.push(g),
        Geometry::MultiPoint(points) => out.extend(points.0.into_iter().map(Geometry::Point)),
        Geometry::MultiLineString(lines) => {
            out.extend(lines.0.into_iter().map(Geometry::LineString))
        }
        Geometry::MultiPolygon(polygons) => {
            out.extend(polygons.0.into_iter().map(Geometry::Polygon))
        }
        Geometry::GeometryCollection(collection) => {
            for child in collection.0 {
                simple_members(child, out);
            }
        }
        // canonicalize removed the remaining variants
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{parse_wkt, to_wkt};

    #[test]
    fn test_point_blob_layout() {
        let point = Geometry::Point(Point::new(1.5, -2.0));
        let blob = write_blob(&point, BlobInfo::default());

        assert_eq!(blob.len(), 60);
        assert_eq!(blob[0], BLOB_START);
        assert_eq!(blob[1], 1);
        assert_eq!(&blob[2..6], &DEFAULT_SRID.to_le_bytes());
        assert_eq!(blob[38], BLOB_MBR_END);
        assert_eq!(&blob[39..43], &1i32.to_le_bytes());
        assert_eq!(*blob.last().unwrap(), BLOB_END);
    }

    #[test]
    fn test_big_endian_blob_reemits_identically() {
        let geometry = parse_wkt("MULTIPOLYGON(((0 0, 4 0, 4 4, 0 0)), ((10 10, 12 10, 12 12, 10 10)))")
            .unwrap();
        let info = BlobInfo {
            srid: 3857,
            byte_order: ByteOrder::BigEndian,
        };
        let blob = write_blob(&geometry, info);

        let (decoded, decoded_info) = read_blob(&blob).unwrap();
        assert_eq!(decoded_info, info);
        assert_eq!(decoded, geometry);
        assert_eq!(write_blob(&decoded, decoded_info), blob);
    }

    #[test]
    fn test_collection_blob_expands_multis() {
        let geometry = parse_wkt(
            "GEOMETRYCOLLECTION(POINT(1 1), MULTILINESTRING((0 0, 1 1), (2 2, 3 3)))",
        )
        .unwrap();
        let blob = write_blob(&geometry, BlobInfo::default());
        let (decoded, _) = read_blob(&blob).unwrap();
        assert_eq!(
            to_wkt(&decoded),
            "GEOMETRYCOLLECTION(POINT(1 1), LINESTRING(0 0, 1 1), LINESTRING(2 2, 3 3))"
        );
    }

    #[test]
    fn test_blob_rejects_bad_markers() {
        let mut blob = write_blob(&Geometry::Point(Point::new(0.0, 0.0)), BlobInfo::default());
        let last = blob.len() - 1;
        blob[last] = 0x00;
        assert!(read_blob(&blob).is_err());
        assert!(read_blob(&blob[..20]).is_err());
        assert!(read_blob(&[]).is_err());
    }

    #[test]
    fn test_read_big_endian_wkb_point() {
        let mut data = vec![0u8];
        data.extend_from_slice(&1u32.to_be_bytes());
        data.extend_from_slice(&3.0f64.to_be_bytes());
        data.extend_from_slice(&4.0f64.to_be_bytes());

        let geometry = read_wkb(&data).unwrap();
        assert_eq!(to_wkt(&geometry), "POINT(3 4)");
    }

    #[test]
    fn test_read_ewkb_with_srid_and_z() {
        let mut data = vec![1u8];
        data.extend_from_slice(&(1u32 | EWKB_Z | EWKB_SRID).to_le_bytes());
        data.extend_from_slice(&4326i32.to_le_bytes());
        for v in [7.0f64, 8.0, 99.0] {
            data.extend_from_slice(&v.to_le_bytes());
        }
        assert_eq!(to_wkt(&read_wkb(&data).unwrap()), "POINT(7 8)");
    }

    #[test]
    fn test_wkb_polygon_round_trip() {
        let geometry = parse_wkt("POLYGON((10 10, 10 20, 20 20, 20 15, 10 10))").unwrap();
        let wkb = write_wkb(&geometry);
        assert_eq!(wkb[0], 1);
        assert_eq!(read_wkb(&wkb).unwrap(), geometry);
    }

    #[test]
    fn test_wkb_rejects_oversized_count() {
        let mut data = vec![1u8];
        data.extend_from_slice(&2u32.to_le_bytes());
        data.extend_from_slice(&u32::MAX.to_le_bytes());
        let err = read_wkb(&data).unwrap_err();
        assert!(matches!(err, FeatureError::Decode(_)));
    }
}
