use geo::{Area, Geometry, coord};
use spatio_features::{ErrorKind, GeometryClass, GeometryHandle, GeometryWorkspace};
use std::sync::Arc;
use std::thread;

fn area(gw: &GeometryWorkspace, handle: GeometryHandle) -> f64 {
    gw.geometry(handle).unwrap().unsigned_area()
}

#[test]
fn test_wkt_round_trip_through_workspace() {
    let gw = GeometryWorkspace::new();
    let text = "POLYGON((10 10, 10 20, 20 20, 20 15, 10 10))";
    let handle = gw.create_geometry_from_wkt(text).unwrap();

    assert_eq!(gw.geometry_type(handle).unwrap(), GeometryClass::Polygon);
    assert_eq!(gw.geometry_as_wkt(handle).unwrap(), text);

    let envelope = gw.envelope(handle).unwrap().unwrap();
    assert_eq!(
        (envelope.min_x, envelope.min_y, envelope.max_x, envelope.max_y),
        (10.0, 10.0, 20.0, 20.0)
    );
}

#[test]
fn test_overlapping_squares() {
    let gw = GeometryWorkspace::new();
    let one = gw
        .create_geometry_from_wkt("POLYGON((0 0, 10 0, 10 10, 0 10, 0 0))")
        .unwrap();
    let two = gw
        .create_geometry_from_wkt("POLYGON((5 0, 25 0, 25 10, 5 10, 5 0))")
        .unwrap();

    assert!(gw.intersects(one, two).unwrap());
    assert!(!gw.contains(one, two).unwrap());

    let overlap = gw.create_intersection(one, two).unwrap();
    assert_eq!(gw.geometry_type(overlap).unwrap(), GeometryClass::Polygon);
    assert!((area(&gw, overlap) - 50.0).abs() < 1e-9);
    assert_eq!(
        gw.geometry_as_wkt(overlap).unwrap(),
        "POLYGON((10 0, 5 0, 5 10, 10 10, 10 0))"
    );

    let merged = gw.create_union(one, two).unwrap();
    assert!((area(&gw, merged) - 250.0).abs() < 1e-9);

    // update into one of the operands
    gw.update_difference(two, one, two).unwrap();
    assert!((area(&gw, two) - 150.0).abs() < 1e-9);
}

#[test]
fn test_quadrilateral_helpers() {
    let gw = GeometryWorkspace::new();
    let handle = gw
        .create_polygon(
            coord! { x: 0.0, y: 0.0 },
            coord! { x: 4.0, y: 0.0 },
            coord! { x: 4.0, y: 4.0 },
            coord! { x: 0.0, y: 4.0 },
        )
        .unwrap();
    assert!((area(&gw, handle) - 16.0).abs() < 1e-9);

    gw.update_polygon(
        handle,
        coord! { x: 0.0, y: 0.0 },
        coord! { x: 2.0, y: 0.0 },
        coord! { x: 2.0, y: 2.0 },
        coord! { x: 0.0, y: 2.0 },
    )
    .unwrap();
    assert!((area(&gw, handle) - 4.0).abs() < 1e-9);
    assert_eq!(gw.envelope(handle).unwrap().unwrap().max_x, 2.0);
}

#[test]
fn test_blob_and_wkb_exchange() {
    let gw = GeometryWorkspace::new();
    let source = gw
        .create_geometry_from_wkt("LINESTRING(0 0, 1 1, 2 0)")
        .unwrap();

    let wkb = gw.geometry_as_wkb(source).unwrap();
    let from_wkb = gw.create_geometry_from_wkb(&wkb).unwrap();
    assert_eq!(gw.geometry_as_wkt(from_wkb).unwrap(), "LINESTRING(0 0, 1 1, 2 0)");

    let blob = gw.geometry_as_blob(source).unwrap();
    let from_blob = gw.create_geometry_from_blob(&blob).unwrap();
    assert_eq!(gw.geometry_as_blob(from_blob).unwrap(), blob);

    let err = gw.create_geometry_from_blob(&[0x00, 0x01, 0x02]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);
}

#[test]
fn test_deleted_and_cleared_handles_are_rejected() {
    let gw = GeometryWorkspace::new();
    let a = gw.create_geometry_from_wkt("POINT(1 1)").unwrap();
    let b = gw.create_geometry_from_wkt("POINT(2 2)").unwrap();

    gw.delete_geometry(a).unwrap();
    assert_eq!(gw.len(), 1);
    assert_eq!(gw.geometry_as_wkt(a).unwrap_err().kind(), ErrorKind::InvalidArgument);

    gw.clear().unwrap();
    assert!(gw.is_empty());
    assert_eq!(gw.geometry_as_wkt(b).unwrap_err().kind(), ErrorKind::InvalidArgument);
    assert!(GeometryHandle::from_raw(0).is_none());
}

#[test]
fn test_batch_commit_applies_all_changes() {
    let gw = GeometryWorkspace::new();
    let keep = gw.create_geometry_from_wkt("POINT(0 0)").unwrap();
    let doomed = gw.create_geometry_from_wkt("POINT(1 1)").unwrap();

    gw.begin_batch().unwrap();
    gw.update_geometry(keep, Geometry::Point(geo::Point::new(5.0, 5.0)))
        .unwrap();
    gw.delete_geometry(doomed).unwrap();
    let added = gw.create_geometry_from_wkt("POINT(9 9)").unwrap();
    assert_eq!(gw.clear().unwrap_err().kind(), ErrorKind::IllegalState);
    gw.end_batch(true).unwrap();

    assert!(!gw.is_batch_active());
    assert_eq!(gw.geometry_as_wkt(keep).unwrap(), "POINT(5 5)");
    assert!(gw.geometry(doomed).is_err());
    assert_eq!(gw.geometry_as_wkt(added).unwrap(), "POINT(9 9)");
    assert_eq!(gw.len(), 2);
}

#[test]
fn test_batch_rollback_discards_all_changes() {
    let gw = GeometryWorkspace::new();
    let keep = gw.create_geometry_from_wkt("POINT(0 0)").unwrap();

    gw.begin_batch().unwrap();
    gw.update_geometry(keep, Geometry::Point(geo::Point::new(5.0, 5.0)))
        .unwrap();
    let added = gw.create_geometry_from_wkt("POINT(9 9)").unwrap();
    assert_eq!(gw.len(), 2);
    gw.end_batch(false).unwrap();

    assert_eq!(gw.geometry_as_wkt(keep).unwrap(), "POINT(0 0)");
    assert!(gw.geometry(added).is_err());
    assert_eq!(gw.len(), 1);
    assert_eq!(gw.end_batch(true).unwrap_err().kind(), ErrorKind::IllegalState);
}

#[test]
fn test_batch_is_private_to_its_thread() {
    let gw = Arc::new(GeometryWorkspace::new());
    let shared = gw.create_geometry_from_wkt("POINT(0 0)").unwrap();

    gw.begin_batch().unwrap();
    gw.update_geometry(shared, Geometry::Point(geo::Point::new(3.0, 3.0)))
        .unwrap();

    let other = Arc::clone(&gw);
    let (seen, mutation, ending) = thread::spawn(move || {
        (
            other.geometry_as_wkt(shared).unwrap(),
            other.create_geometry_from_wkt("POINT(1 1)").unwrap_err().kind(),
            other.end_batch(true).unwrap_err().kind(),
        )
    })
    .join()
    .unwrap();

    assert_eq!(seen, "POINT(0 0)");
    assert_eq!(mutation, ErrorKind::IllegalState);
    assert_eq!(ending, ErrorKind::IllegalState);
    assert!(gw.is_batch_active());

    gw.end_batch(true).unwrap();
    assert_eq!(gw.geometry_as_wkt(shared).unwrap(), "POINT(3 3)");
}

#[test]
fn test_simplify_and_buffer() {
    let gw = GeometryWorkspace::new();
    let line = gw
        .create_geometry_from_wkt("LINESTRING(0 0, 1 0.01, 2 0, 3 0)")
        .unwrap();
    let simple = gw.create_simplify(line, 0.1, false).unwrap();
    assert_eq!(gw.geometry_as_wkt(simple).unwrap(), "LINESTRING(0 0, 3 0)");

    let point = gw.create_geometry_from_wkt("POINT(0 0)").unwrap();
    let disc = gw.create_buffer(point, 1.0).unwrap();
    assert_eq!(gw.geometry_type(disc).unwrap(), GeometryClass::Polygon);
    let disc_area = area(&gw, disc);
    assert!(disc_area > 3.0 && disc_area < 3.2);
}
