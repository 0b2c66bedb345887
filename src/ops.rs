//! Topological operations over canonical geometries.
//!
//! Areal operands are lifted to `MultiPolygon` and handed to geo's boolean
//! operations; lineal operands are clipped against areal ones. Results are
//! normalized so a single polygon comes back as `Polygon` and an empty result
//! comes back as an empty geometry collection. Areal results have a clockwise
//! exterior, counter-clockwise holes, and every ring starts at its lowest
//! vertex (the rightmost one on ties).

use crate::error::{FeatureError, Result};
use crate::geometry::{GeometryClass, empty, lines_of, polygons_of};
use geo::orient::{Direction, Orient};
use geo::{
    BooleanOps, Buffer, Contains, Coord, Geometry, Intersects, LineString, MultiLineString,
    MultiPolygon, Polygon, Simplify, SimplifyVwPreserve,
};

/// Areal view of a geometry, `None` when it contains non-areal parts.
fn as_areal(geometry: &Geometry<f64>) -> Option<MultiPolygon<f64>> {
    match geometry {
        Geometry::Polygon(_)
        | Geometry::MultiPolygon(_)
        | Geometry::Rect(_)
        | Geometry::Triangle(_) => Some(MultiPolygon::new(polygons_of(geometry))),
        Geometry::GeometryCollection(collection)
            if collection.0.iter().all(|g| as_areal(g).is_some()) =>
        {
            Some(MultiPolygon::new(polygons_of(geometry)))
        }
        _ => None,
    }
}

/// Lineal view of a geometry, `None` when it contains non-lineal parts.
fn as_lineal(geometry: &Geometry<f64>) -> Option<MultiLineString<f64>> {
    match geometry {
        Geometry::Line(_) | Geometry::LineString(_) | Geometry::MultiLineString(_) => {
            Some(MultiLineString::new(lines_of(geometry)))
        }
        Geometry::GeometryCollection(collection)
            if !collection.0.is_empty() && collection.0.iter().all(|g| as_lineal(g).is_some()) =>
        {
            Some(MultiLineString::new(lines_of(geometry)))
        }
        _ => None,
    }
}

/// Rotate a closed ring so it starts at its lowest vertex, rightmost on ties.
fn rotate_ring(ring: LineString<f64>) -> LineString<f64> {
    let mut coords: Vec<Coord<f64>> = ring.0;
    if coords.len() < 4 {
        return LineString::new(coords);
    }
    if coords.first() == coords.last() {
        coords.pop();
    }
    let start = coords
        .iter()
        .enumerate()
        .min_by(|(_, a), (_, b)| a.y.total_cmp(&b.y).then(b.x.total_cmp(&a.x)))
        .map_or(0, |(i, _)| i);
    coords.rotate_left(start);
    if let Some(first) = coords.first().copied() {
        coords.push(first);
    }
    LineString::new(coords)
}

fn canonical_rings(polygon: Polygon<f64>) -> Polygon<f64> {
    let (exterior, interiors) = polygon.orient(Direction::Reversed).into_inner();
    Polygon::new(
        rotate_ring(exterior),
        interiors.into_iter().map(rotate_ring).collect(),
    )
}

fn normalize_areal(result: MultiPolygon<f64>) -> Geometry<f64> {
    let mut polygons: Vec<Polygon<f64>> = result
        .0
        .into_iter()
        .filter(|p| !p.exterior().0.is_empty())
        .map(canonical_rings)
        .collect();
    match polygons.len() {
        0 => empty(),
        1 => Geometry::Polygon(polygons.remove(0)),
        _ => Geometry::MultiPolygon(MultiPolygon::new(polygons)),
    }
}

fn normalize_lineal(result: MultiLineString<f64>) -> Geometry<f64> {
    let mut lines: Vec<LineString<f64>> =
        result.0.into_iter().filter(|l| l.0.len() >= 2).collect();
    match lines.len() {
        0 => empty(),
        1 => Geometry::LineString(lines.remove(0)),
        _ => Geometry::MultiLineString(MultiLineString::new(lines)),
    }
}

fn unsupported(op: &str, a: &Geometry<f64>, b: &Geometry<f64>) -> FeatureError {
    FeatureError::unsupported(format!(
        "{} of {} and {}",
        op,
        GeometryClass::of(a),
        GeometryClass::of(b)
    ))
}

pub fn intersects(a: &Geometry<f64>, b: &Geometry<f64>) -> bool {
    a.intersects(b)
}

pub fn contains(a: &Geometry<f64>, b: &Geometry<f64>) -> bool {
    a.contains(b)
}

pub fn intersection(a: &Geometry<f64>, b: &Geometry<f64>) -> Result<Geometry<f64>> {
    match (as_areal(a), as_areal(b)) {
        (Some(pa), Some(pb)) => return Ok(normalize_areal(pa.intersection(&pb))),
        (Some(pa), None) => {
            if let Some(lb) = as_lineal(b) {
                return Ok(normalize_lineal(pa.clip(&lb, false)));
            }
        }
        (None, Some(pb)) => {
            if let Some(la) = as_lineal(a) {
                return Ok(normalize_lineal(pb.clip(&la, false)));
            }
        }
        (None, None) => {}
    }
    Err(unsupported("intersection", a, b))
}

pub fn union(a: &Geometry<f64>, b: &Geometry<f64>) -> Result<Geometry<f64>> {
    match (as_areal(a), as_areal(b)) {
        (Some(pa), Some(pb)) => Ok(normalize_areal(pa.union(&pb))),
        _ => Err(unsupported("union", a, b)),
    }
}

pub fn difference(a: &Geometry<f64>, b: &Geometry<f64>) -> Result<Geometry<f64>> {
    let Some(pb) = as_areal(b) else {
        return Err(unsupported("difference", a, b));
    };
    if let Some(pa) = as_areal(a) {
        return Ok(normalize_areal(pa.difference(&pb)));
    }
    if let Some(la) = as_lineal(a) {
        return Ok(normalize_lineal(pb.clip(&la, true)));
    }
    Err(unsupported("difference", a, b))
}

/// Dissolve the members of a collection into a single geometry.
pub fn unary_union(geometry: &Geometry<f64>) -> Result<Geometry<f64>> {
    let Some(areal) = as_areal(geometry) else {
        return Err(FeatureError::unsupported(format!(
            "unary union of {}",
            GeometryClass::of(geometry)
        )));
    };
    let dissolved = areal
        .0
        .into_iter()
        .fold(MultiPolygon::new(Vec::new()), |acc, polygon| {
            acc.union(&MultiPolygon::new(vec![polygon]))
        });
    Ok(normalize_areal(dissolved))
}

/// Douglas-Peucker simplification, or topology preserving Visvalingam-Whyatt
/// when `preserve_topology` is set.
pub fn simplify(
    geometry: &Geometry<f64>,
    tolerance: f64,
    preserve_topology: bool,
) -> Result<Geometry<f64>> {
    if !tolerance.is_finite() || tolerance < 0.0 {
        return Err(FeatureError::invalid(format!(
            "invalid simplify tolerance {}",
            tolerance
        )));
    }
    Ok(match geometry {
        Geometry::LineString(line) => Geometry::LineString(if preserve_topology {
            line.simplify_vw_preserve(tolerance)
        } else {
            line.simplify(tolerance)
        }),
        Geometry::MultiLineString(lines) => Geometry::MultiLineString(if preserve_topology {
            lines.simplify_vw_preserve(tolerance)
        } else {
            lines.simplify(tolerance)
        }),
        Geometry::Polygon(polygon) => Geometry::Polygon(if preserve_topology {
            polygon.simplify_vw_preserve(tolerance)
        } else {
            polygon.simplify(tolerance)
        }),
        Geometry::MultiPolygon(polygons) => Geometry::MultiPolygon(if preserve_topology {
            polygons.simplify_vw_preserve(tolerance)
        } else {
            polygons.simplify(tolerance)
        }),
        Geometry::GeometryCollection(collection) => {
            let members = collection
                .0
                .iter()
                .map(|g| simplify(g, tolerance, preserve_topology))
                .collect::<Result<Vec<_>>>()?;
            Geometry::GeometryCollection(geo::GeometryCollection::new_from(members))
        }
        other => other.clone(),
    })
}

pub fn buffer(geometry: &Geometry<f64>, distance: f64) -> Result<Geometry<f64>> {
    if !distance.is_finite() {
        return Err(FeatureError::invalid(format!(
            "invalid buffer distance {}",
            distance
        )));
    }
    Ok(normalize_areal(geometry.buffer(distance)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{parse_wkt, to_wkt};
    use geo::Area;

    fn rect(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Geometry<f64> {
        parse_wkt(&format!(
            "POLYGON(({min_x} {min_y}, {max_x} {min_y}, {max_x} {max_y}, {min_x} {max_y}, {min_x} {min_y}))"
        ))
        .unwrap()
    }

    #[test]
    fn test_overlapping_intersection() {
        let one = rect(0.0, 0.0, 10.0, 10.0);
        let two = rect(5.0, 0.0, 25.0, 10.0);
        assert!(intersects(&one, &two));

        let result = intersection(&one, &two).unwrap();
        let Geometry::Polygon(polygon) = &result else {
            panic!("expected polygon, got {}", to_wkt(&result));
        };
        assert!((polygon.unsigned_area() - 50.0).abs() < 1e-9);
        assert_eq!(to_wkt(&result), "POLYGON((10 0, 5 0, 5 10, 10 10, 10 0))");
    }

    #[test]
    fn test_areal_results_have_canonical_rings() {
        let frame = rect(0.0, 0.0, 10.0, 10.0);
        let hole = rect(2.0, 2.0, 4.0, 4.0);
        let result = difference(&frame, &hole).unwrap();
        assert_eq!(
            to_wkt(&result),
            "POLYGON((10 0, 0 0, 0 10, 10 10, 10 0), (4 2, 4 4, 2 4, 2 2, 4 2))"
        );
    }

    #[test]
    fn test_disjoint_intersection_is_empty() {
        let result = intersection(&rect(0.0, 0.0, 1.0, 1.0), &rect(5.0, 5.0, 6.0, 6.0)).unwrap();
        assert_eq!(to_wkt(&result), "GEOMETRYCOLLECTION EMPTY");
    }

    #[test]
    fn test_line_clipped_by_polygon() {
        let line = parse_wkt("LINESTRING(-5 5, 15 5)").unwrap();
        let result = intersection(&rect(0.0, 0.0, 10.0, 10.0), &line).unwrap();
        assert!(matches!(result, Geometry::LineString(_)));

        let outside = difference(&line, &rect(0.0, 0.0, 10.0, 10.0)).unwrap();
        assert!(matches!(outside, Geometry::MultiLineString(_)));
    }

    #[test]
    fn test_point_intersection_unsupported() {
        let a = parse_wkt("POINT(1 1)").unwrap();
        let err = intersection(&a, &a).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Unsupported);
    }

    #[test]
    fn test_union_and_difference_area() {
        let one = rect(0.0, 0.0, 10.0, 10.0);
        let two = rect(5.0, 0.0, 25.0, 10.0);
        let unioned = union(&one, &two).unwrap();
        assert!((unioned.unsigned_area() - 250.0).abs() < 1e-9);

        let diff = difference(&one, &two).unwrap();
        assert!((diff.unsigned_area() - 50.0).abs() < 1e-9);
    }

    #[test]
    fn test_unary_union_dissolves_collection() {
        let collection = parse_wkt(
            "GEOMETRYCOLLECTION(POLYGON((0 0, 2 0, 2 2, 0 2, 0 0)), POLYGON((1 0, 3 0, 3 2, 1 2, 1 0)))",
        )
        .unwrap();
        let result = unary_union(&collection).unwrap();
        assert!(matches!(result, Geometry::Polygon(_)));
        assert!((result.unsigned_area() - 6.0).abs() < 1e-9);

        let points = parse_wkt("MULTIPOINT(0 0, 1 1)").unwrap();
        assert!(unary_union(&points).is_err());
    }

    #[test]
    fn test_simplify_drops_collinear_vertex() {
        let line = parse_wkt("LINESTRING(0 0, 5 0.01, 10 0)").unwrap();
        let simplified = simplify(&line, 0.1, false).unwrap();
        assert_eq!(to_wkt(&simplified), "LINESTRING(0 0, 10 0)");
        assert!(simplify(&line, -1.0, false).is_err());
    }

    #[test]
    fn test_buffer_point() {
        let point = parse_wkt("POINT(0 0)").unwrap();
        let buffered = buffer(&point, 1.0).unwrap();
        assert!(matches!(buffered, Geometry::Polygon(_)));
        let area = buffered.unsigned_area();
        assert!(area > 3.0 && area < 3.2);
    }
}
