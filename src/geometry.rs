//! Geometry model shared by the workspace, the spatial filters and the stores.
//!
//! The canonical geometry type is [`geo::Geometry<f64>`]. Alternate
//! representations (`Rect`, `Triangle`, `Line`) and nested collections are
//! folded into the canonical shapes on entry via [`canonicalize`], so the rest
//! of the crate only ever sees points, line strings, polygons, their multi
//! variants and flat geometry collections.

use crate::error::{FeatureError, Result};
use geo::{
    BoundingRect, Coord, Geometry, GeometryCollection, LineString, MultiLineString, MultiPoint,
    MultiPolygon, Polygon, Rect,
};
use serde::{Deserialize, Serialize};
use std::fmt::{self, Write as _};
use std::str::FromStr;

/// Geometry class as reported by the workspace.
///
/// Multi geometries are reported as [`GeometryClass::GeometryCollection`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GeometryClass {
    Point,
    LineString,
    Polygon,
    GeometryCollection,
}

impl GeometryClass {
    pub fn of(geometry: &Geometry<f64>) -> Self {
        match geometry {
            Geometry::Point(_) => GeometryClass::Point,
            Geometry::Line(_) | Geometry::LineString(_) => GeometryClass::LineString,
            Geometry::Polygon(_) | Geometry::Rect(_) | Geometry::Triangle(_) => {
                GeometryClass::Polygon
            }
            Geometry::MultiPoint(_)
            | Geometry::MultiLineString(_)
            | Geometry::MultiPolygon(_)
            | Geometry::GeometryCollection(_) => GeometryClass::GeometryCollection,
        }
    }
}

impl fmt::Display for GeometryClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            GeometryClass::Point => "Point",
            GeometryClass::LineString => "LineString",
            GeometryClass::Polygon => "Polygon",
            GeometryClass::GeometryCollection => "GeometryCollection",
        };
        f.write_str(name)
    }
}

/// Axis-aligned bounding box in the active coordinate system.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl Envelope {
    pub fn new(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Self {
        Self {
            min_x,
            min_y,
            max_x,
            max_y,
        }
    }

    /// The full WGS84 extent.
    pub fn world() -> Self {
        Self::new(-180.0, -90.0, 180.0, 90.0)
    }

    /// Envelope of a geometry, `None` when the geometry is empty.
    pub fn of(geometry: &Geometry<f64>) -> Option<Self> {
        geometry.bounding_rect().map(Self::from)
    }

    pub fn union(&self, other: &Envelope) -> Envelope {
        Envelope::new(
            self.min_x.min(other.min_x),
            self.min_y.min(other.min_y),
            self.max_x.max(other.max_x),
            self.max_y.max(other.max_y),
        )
    }

    pub fn intersects(&self, other: &Envelope) -> bool {
        self.min_x <= other.max_x
            && self.max_x >= other.min_x
            && self.min_y <= other.max_y
            && self.max_y >= other.min_y
    }

    pub fn contains(&self, other: &Envelope) -> bool {
        self.min_x <= other.min_x
            && self.max_x >= other.max_x
            && self.min_y <= other.min_y
            && self.max_y >= other.max_y
    }

    pub fn to_polygon(&self) -> Polygon<f64> {
        Rect::new(
            Coord {
                x: self.min_x,
                y: self.min_y,
            },
            Coord {
                x: self.max_x,
                y: self.max_y,
            },
        )
        .to_polygon()
    }
}

impl From<Rect<f64>> for Envelope {
    fn from(rect: Rect<f64>) -> Self {
        Envelope::new(rect.min().x, rect.min().y, rect.max().x, rect.max().y)
    }
}

/// Fold alternate representations into the canonical geometry shapes.
///
/// `Rect` and `Triangle` become polygons, `Line` becomes a two point line
/// string and nested geometry collections are flattened into a single level.
pub fn canonicalize(geometry: Geometry<f64>) -> Geometry<f64> {
    match geometry {
        Geometry::Rect(rect) => Geometry::Polygon(rect.to_polygon()),
        Geometry::Triangle(triangle) => Geometry::Polygon(triangle.to_polygon()),
        Geometry::Line(line) => Geometry::LineString(LineString::new(vec![line.start, line.end])),
        Geometry::GeometryCollection(collection) => {
            let mut flat = Vec::with_capacity(collection.0.len());
            flatten_into(collection, &mut flat);
            Geometry::GeometryCollection(GeometryCollection::new_from(flat))
        }
        other => other,
    }
}

fn flatten_into(collection: GeometryCollection<f64>, out: &mut Vec<Geometry<f64>>) {
    for child in collection.0 {
        match child {
            Geometry::GeometryCollection(nested) => flatten_into(nested, out),
            other => out.push(canonicalize(other)),
        }
    }
}

/// An empty geometry collection, used for empty operation results.
pub fn empty() -> Geometry<f64> {
    Geometry::GeometryCollection(GeometryCollection::new_from(Vec::new()))
}

/// Parse WKT into a canonical geometry.
pub fn parse_wkt(text: &str) -> Result<Geometry<f64>> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(FeatureError::invalid("empty WKT"));
    }
    let parsed = wkt::Wkt::<f64>::from_str(trimmed)
        .map_err(|e| FeatureError::invalid(format!("WKT parse error: {}", e)))?;
    let geometry: Geometry<f64> = parsed
        .try_into()
        .map_err(|e| FeatureError::invalid(format!("WKT conversion error: {:?}", e)))?;
    Ok(canonicalize(geometry))
}

/// Serialize a geometry to compact WKT, e.g. `POLYGON((0 0, 1 0, 1 1, 0 0))`.
pub fn to_wkt(geometry: &Geometry<f64>) -> String {
    let mut out = String::new();
    write_geometry(&mut out, geometry);
    out
}

fn write_geometry(out: &mut String, geometry: &Geometry<f64>) {
    match geometry {
        Geometry::Point(point) => {
            out.push_str("POINT(");
            write_coord(out, &point.0);
            out.push(')');
        }
        Geometry::Line(line) => {
            out.push_str("LINESTRING(");
            write_coord(out, &line.start);
            out.push_str(", ");
            write_coord(out, &line.end);
            out.push(')');
        }
        Geometry::LineString(line) => {
            if line.0.is_empty() {
                out.push_str("LINESTRING EMPTY");
            } else {
                out.push_str("LINESTRING");
                write_coords(out, &line.0);
            }
        }
        Geometry::Polygon(polygon) => {
            if polygon.exterior().0.is_empty() {
                out.push_str("POLYGON EMPTY");
            } else {
                out.push_str("POLYGON");
                write_polygon_body(out, polygon);
            }
        }
        Geometry::Rect(rect) => write_geometry(out, &Geometry::Polygon(rect.to_polygon())),
        Geometry::Triangle(triangle) => {
            write_geometry(out, &Geometry::Polygon(triangle.to_polygon()))
        }
        Geometry::MultiPoint(points) => write_multi_point(out, points),
        Geometry::MultiLineString(lines) => write_multi_line_string(out, lines),
        Geometry::MultiPolygon(polygons) => write_multi_polygon(out, polygons),
        Geometry::GeometryCollection(collection) => {
            if collection.0.is_empty() {
                out.push_str("GEOMETRYCOLLECTION EMPTY");
                return;
            }
            out.push_str("GEOMETRYCOLLECTION(");
            for (i, child) in collection.0.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                write_geometry(out, child);
            }
            out.push(')');
        }
    }
}

fn write_multi_point(out: &mut String, points: &MultiPoint<f64>) {
    if points.0.is_empty() {
        out.push_str("MULTIPOINT EMPTY");
        return;
    }
    out.push_str("MULTIPOINT(");
    for (i, point) in points.0.iter().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        write_coord(out, &point.0);
    }
    out.push(')');
}

fn write_multi_line_string(out: &mut String, lines: &MultiLineString<f64>) {
    if lines.0.is_empty() {
        out.push_str("MULTILINESTRING EMPTY");
        return;
    }
    out.push_str("MULTILINESTRING(");
    for (i, line) in lines.0.iter().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        write_coords(out, &line.0);
    }
    out.push(')');
}

fn write_multi_polygon(out: &mut String, polygons: &MultiPolygon<f64>) {
    if polygons.0.is_empty() {
        out.push_str("MULTIPOLYGON EMPTY");
        return;
    }
    out.push_str("MULTIPOLYGON(");
    for (i, polygon) in polygons.0.iter().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        write_polygon_body(out, polygon);
    }
    out.push(')');
}

fn write_polygon_body(out: &mut String, polygon: &Polygon<f64>) {
    out.push('(');
    write_coords(out, &polygon.exterior().0);
    for ring in polygon.interiors() {
        out.push_str(", ");
        write_coords(out, &ring.0);
    }
    out.push(')');
}

fn write_coords(out: &mut String, coords: &[Coord<f64>]) {
    out.push('(');
    for (i, coord) in coords.iter().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        write_coord(out, coord);
    }
    out.push(')');
}

fn write_coord(out: &mut String, coord: &Coord<f64>) {
    // -0 prints as "-0"
    let x = if coord.x == 0.0 { 0.0 } else { coord.x };
    let y = if coord.y == 0.0 { 0.0 } else { coord.y };
    let _ = write!(out, "{} {}", x, y);
}

/// Build the closed quadrilateral `a, b, c, d, a`.
pub fn quad(a: Coord<f64>, b: Coord<f64>, c: Coord<f64>, d: Coord<f64>) -> Polygon<f64> {
    Polygon::new(LineString::new(vec![a, b, c, d, a]), Vec::new())
}

/// Collect every polygon of a canonical geometry.
pub(crate) fn polygons_of(geometry: &Geometry<f64>) -> Vec<Polygon<f64>> {
    match geometry {
        Geometry::Polygon(polygon) => vec![polygon.clone()],
        Geometry::Rect(rect) => vec![rect.to_polygon()],
        Geometry::Triangle(triangle) => vec![triangle.to_polygon()],
        Geometry::MultiPolygon(polygons) => polygons.0.clone(),
        Geometry::GeometryCollection(collection) => {
            collection.0.iter().flat_map(polygons_of).collect()
        }
        _ => Vec::new(),
    }
}

/// Collect every line string of a canonical geometry.
pub(crate) fn lines_of(geometry: &Geometry<f64>) -> Vec<LineString<f64>> {
    match geometry {
        Geometry::LineString(line) => vec![line.clone()],
        Geometry::Line(line) => vec![LineString::new(vec![line.start, line.end])],
        Geometry::MultiLineString(lines) => lines.0.clone(),
        Geometry::GeometryCollection(collection) => {
            collection.0.iter().flat_map(lines_of).collect()
        }
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::{Point, coord, line_string, polygon};

    #[test]
    fn test_polygon_wkt_round_trip() {
        let text = "POLYGON((10 10, 10 20, 20 20, 20 15, 10 10))";
        let geometry = parse_wkt(text).unwrap();
        assert_eq!(GeometryClass::of(&geometry), GeometryClass::Polygon);
        assert_eq!(to_wkt(&geometry), text);
    }

    #[test]
    fn test_wkt_whitespace_normalized() {
        let geometry = parse_wkt("  LINESTRING ( 0 0 ,1 1,  2.5 -3 ) ").unwrap();
        assert_eq!(to_wkt(&geometry), "LINESTRING(0 0, 1 1, 2.5 -3)");
    }

    #[test]
    fn test_malformed_wkt() {
        assert!(parse_wkt("").is_err());
        assert!(parse_wkt("POLYGON((0 0, 1").is_err());
        assert!(parse_wkt("CIRCLE(0 0, 1)").is_err());
    }

    #[test]
    fn test_polygon_with_hole_wkt() {
        let poly = polygon!(
            exterior: [(x: 0.0, y: 0.0), (x: 4.0, y: 0.0), (x: 4.0, y: 4.0), (x: 0.0, y: 0.0)],
            interiors: [[(x: 1.0, y: 1.0), (x: 2.0, y: 1.0), (x: 2.0, y: 2.0), (x: 1.0, y: 1.0)]],
        );
        assert_eq!(
            to_wkt(&Geometry::Polygon(poly)),
            "POLYGON((0 0, 4 0, 4 4, 0 0), (1 1, 2 1, 2 2, 1 1))"
        );
    }

    #[test]
    fn test_canonicalize_flattens_collections() {
        let inner = Geometry::GeometryCollection(GeometryCollection::new_from(vec![
            Geometry::Point(Point::new(1.0, 2.0)),
            Geometry::Rect(Rect::new(coord! { x: 0.0, y: 0.0 }, coord! { x: 1.0, y: 1.0 })),
        ]));
        let outer = Geometry::GeometryCollection(GeometryCollection::new_from(vec![
            inner,
            Geometry::LineString(line_string![(x: 0.0, y: 0.0), (x: 1.0, y: 1.0)]),
        ]));

        match canonicalize(outer) {
            Geometry::GeometryCollection(flat) => {
                assert_eq!(flat.0.len(), 3);
                assert!(matches!(flat.0[1], Geometry::Polygon(_)));
            }
            other => panic!("expected collection, got {:?}", other),
        }
    }

    #[test]
    fn test_envelope_operations() {
        let a = Envelope::new(0.0, 0.0, 10.0, 10.0);
        let b = Envelope::new(5.0, 5.0, 20.0, 20.0);
        let c = Envelope::new(11.0, 11.0, 12.0, 12.0);

        assert!(a.intersects(&b));
        assert!(!a.intersects(&c));
        assert_eq!(a.union(&c), Envelope::new(0.0, 0.0, 12.0, 12.0));
        assert!(Envelope::world().contains(&a));
    }

    #[test]
    fn test_empty_collection_wkt() {
        assert_eq!(to_wkt(&empty()), "GEOMETRYCOLLECTION EMPTY");
        assert!(Envelope::of(&empty()).is_none());
    }

    #[test]
    fn test_quad_is_closed() {
        let q = quad(
            coord! { x: 0.0, y: 0.0 },
            coord! { x: 1.0, y: 0.0 },
            coord! { x: 1.0, y: 1.0 },
            coord! { x: 0.0, y: 1.0 },
        );
        assert_eq!(q.exterior().0.len(), 5);
        assert_eq!(q.exterior().0.first(), q.exterior().0.last());
    }
}
