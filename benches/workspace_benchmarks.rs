use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use spatio_features::geometry::parse_wkt;
use spatio_features::mvt::{GeomType, LayerBuilder, decode_tile, encode_tile, point_commands};
use spatio_features::tile_grid::TileKey;
use spatio_features::{
    Config, FeatureDataStore, FeatureDefinition, FeatureQueryParameters, GeometryWorkspace,
    RuntimeFeatureDataStore, SpatialFilter, SpatialFilterSet,
};
use std::time::Duration;

fn square_wkt(min_x: f64, min_y: f64, size: f64) -> String {
    let (max_x, max_y) = (min_x + size, min_y + size);
    format!(
        "POLYGON(({min_x} {min_y}, {max_x} {min_y}, {max_x} {max_y}, {min_x} {max_y}, {min_x} {min_y}))"
    )
}

fn benchmark_workspace_operations(c: &mut Criterion) {
    let mut group = c.benchmark_group("workspace_operations");

    let gw = GeometryWorkspace::new();
    let one = gw.create_geometry_from_wkt(&square_wkt(0.0, 0.0, 10.0)).unwrap();
    let two = gw.create_geometry_from_wkt(&square_wkt(5.0, 0.0, 20.0)).unwrap();
    let dst = gw.create_geometry_from_wkt("POINT(0 0)").unwrap();

    group.bench_function("create_from_wkt", |b| {
        let wkt = square_wkt(1.0, 1.0, 3.0);
        b.iter(|| {
            let handle = gw.create_geometry_from_wkt(black_box(&wkt)).unwrap();
            gw.delete_geometry(handle).unwrap();
        })
    });

    group.bench_function("intersects", |b| {
        b.iter(|| gw.intersects(black_box(one), black_box(two)).unwrap())
    });

    group.bench_function("update_intersection", |b| {
        b.iter(|| gw.update_intersection(black_box(one), black_box(two), dst).unwrap())
    });

    group.bench_function("update_union", |b| {
        b.iter(|| gw.update_union(black_box(one), black_box(two), dst).unwrap())
    });

    group.bench_function("blob_round_trip", |b| {
        let blob = gw.geometry_as_blob(one).unwrap();
        b.iter(|| {
            let handle = gw.create_geometry_from_blob(black_box(&blob)).unwrap();
            gw.delete_geometry(handle).unwrap();
        })
    });

    // Batch of 100 creations committed at once
    group.bench_function("batch_commit_100", |b| {
        b.iter(|| {
            gw.begin_batch().unwrap();
            let handles: Vec<_> = (0..100)
                .map(|i| {
                    gw.create_geometry_from_wkt(&format!("POINT({} {})", i, i))
                        .unwrap()
                })
                .collect();
            gw.end_batch(true).unwrap();
            for handle in handles {
                gw.delete_geometry(handle).unwrap();
            }
        })
    });

    group.finish();
}

fn benchmark_spatial_filters(c: &mut Criterion) {
    let mut group = c.benchmark_group("spatial_filters");

    let mut filters = SpatialFilterSet::new();
    filters
        .set_filters(&[
            SpatialFilter::include(parse_wkt(&square_wkt(0.0, 0.0, 100.0)).unwrap()),
            SpatialFilter::exclude(parse_wkt(&square_wkt(40.0, 40.0, 20.0)).unwrap()),
        ])
        .unwrap();

    let inside = parse_wkt("POINT(10 10)").unwrap();
    let excluded = parse_wkt("POINT(50 50)").unwrap();

    group.bench_function("accept_inside", |b| {
        b.iter(|| filters.accept(black_box(&inside)).unwrap())
    });
    group.bench_function("accept_excluded", |b| {
        b.iter(|| filters.accept(black_box(&excluded)).unwrap())
    });

    group.finish();
}

fn benchmark_runtime_queries(c: &mut Criterion) {
    let mut group = c.benchmark_group("runtime_queries");
    group.measurement_time(Duration::from_secs(10));

    for size in [1_000usize, 10_000] {
        let store = RuntimeFeatureDataStore::new();
        let set = store
            .insert_feature_set("bench", "points", "grid", 0.0, 0.0)
            .unwrap();
        store.begin_bulk_modification().unwrap();
        for i in 0..size {
            let (x, y) = ((i % 100) as f64, (i / 100) as f64);
            store
                .insert_feature(
                    set.fsid,
                    &FeatureDefinition::new(format!("p{}", i)).with_wkt(format!("POINT({} {})", x, y)),
                )
                .unwrap();
        }
        store.end_bulk_modification(true).unwrap();

        let params = FeatureQueryParameters::new()
            .with_spatial_filter(parse_wkt(&square_wkt(10.0, 10.0, 5.0)).unwrap());
        group.bench_with_input(BenchmarkId::new("viewport_count", size), &params, |b, params| {
            b.iter(|| store.query_features_count(black_box(params)).unwrap())
        });
    }

    group.finish();
}

fn benchmark_tile_decoding(c: &mut Criterion) {
    let mut group = c.benchmark_group("tile_decoding");

    let mut layer = LayerBuilder::new("poi");
    for i in 0..500u32 {
        let name = format!("poi {}", i);
        layer = layer.feature(
            Some(i as u64),
            GeomType::Point,
            point_commands((i * 8 % 4096) as i32, (i * 16 % 4096) as i32),
            &[("name", name.as_str())],
        );
    }
    let layers = vec![layer.build()];
    let plain = encode_tile(layers.clone(), false).unwrap();
    let gzipped = encode_tile(layers, true).unwrap();
    let config = Config::default();
    let key = TileKey::new(14, 4823, 6160);

    group.bench_function("decode_plain_500", |b| {
        b.iter(|| decode_tile(black_box(&plain), key, &config).unwrap())
    });
    group.bench_function("decode_gzip_500", |b| {
        b.iter(|| decode_tile(black_box(&gzipped), key, &config).unwrap())
    });

    group.finish();
}

criterion_group!(
    benches,
    benchmark_workspace_operations,
    benchmark_spatial_filters,
    benchmark_runtime_queries,
    benchmark_tile_decoding
);
criterion_main!(benches);
