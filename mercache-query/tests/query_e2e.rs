//! Result-set tests over a hand-built cache, plus a full nearest lookup
//! against a stub backend.

use std::sync::Arc;

use mercache_backend::SparqlBackend;
use mercache_core::{encode_line, FBox, FPoint, GeomCache, IdMapping, I_OFFSET};
use mercache_query::{QueryError, Requestor};

const QUERY: &str = "SELECT ?geometry WHERE { ?s ?p ?geometry }";

/// A cache with one point, one area ring and two open lines:
///
/// - entity 1: point at (100, 100)
/// - entity 2: area ring (0,0)..(2000,2000)
/// - entity 3: two open-line constituents near (5000..8000, 5000)
fn test_cache() -> Arc<GeomCache> {
    let points = vec![FPoint::new(100.0, 100.0)];

    let ring = vec![
        FPoint::new(0.0, 0.0),
        FPoint::new(2000.0, 0.0),
        FPoint::new(2000.0, 2000.0),
        FPoint::new(0.0, 2000.0),
        FPoint::new(0.0, 0.0),
    ];
    let line_a = vec![FPoint::new(5000.0, 5000.0), FPoint::new(6000.0, 5000.0)];
    let line_b = vec![FPoint::new(7000.0, 5000.0), FPoint::new(8000.0, 5000.0)];

    let mut line_points = Vec::new();
    let mut lines = Vec::new();
    for (ring, is_area) in [(&ring, true), (&line_a, false), (&line_b, false)] {
        lines.push(line_points.len() as u64);
        line_points.extend(encode_line(ring, is_area));
    }

    let table = vec![
        IdMapping::new(1, 0),
        IdMapping::new(2, I_OFFSET),
        IdMapping::new(3, I_OFFSET + 1),
        IdMapping::new(3, I_OFFSET + 2),
    ];

    Arc::new(GeomCache::from_parts(points, line_points, lines, table))
}

fn probe_ids() -> Vec<IdMapping> {
    vec![
        IdMapping::new(1, 0),
        IdMapping::new(2, 1),
        IdMapping::new(3, 2),
    ]
}

fn requestor(cache: Arc<GeomCache>) -> Requestor {
    // the backend is only contacted by row fetches
    Requestor::new(cache, SparqlBackend::new("http://127.0.0.1:1"), usize::MAX)
}

#[tokio::test]
async fn test_request_is_idempotent() {
    let req = requestor(test_cache());
    req.request_with_ids(QUERY, probe_ids()).await.unwrap();
    assert_eq!(req.objects().unwrap().len(), 4);

    // a second request is a no-op, even with different ids
    req.request_with_ids(QUERY, Vec::new()).await.unwrap();
    assert_eq!(req.objects().unwrap().len(), 4);
}

#[tokio::test]
async fn test_not_ready_paths() {
    let unbuilt_cache = Arc::new(GeomCache::new());
    let req = requestor(unbuilt_cache);
    assert!(matches!(
        req.request_with_ids(QUERY, Vec::new()).await,
        Err(QueryError::CacheNotReady)
    ));

    let req = requestor(test_cache());
    assert!(matches!(
        req.find_nearest(FPoint::new(0.0, 0.0), 10.0),
        Err(QueryError::CacheNotReady)
    ));
}

#[tokio::test]
async fn test_get_objects_in_box() {
    let req = requestor(test_cache());
    req.request_with_ids(QUERY, probe_ids()).await.unwrap();

    // covers the point and intersects the area ring's bbox
    let hits = req
        .get_objects(&FBox::new(50.0, 50.0, 150.0, 150.0))
        .unwrap();
    assert_eq!(hits, vec![0, 1]);

    // far away from everything
    let hits = req
        .get_objects(&FBox::new(90_000.0, 90_000.0, 91_000.0, 91_000.0))
        .unwrap();
    assert!(hits.is_empty());
}

#[tokio::test]
async fn test_nearest_point_exact_hit() {
    let req = requestor(test_cache());
    req.request_with_ids(QUERY, probe_ids()).await.unwrap();

    let rp = FPoint::new(100.0, 100.0);
    let hit = req.find_nearest(rp, 10.0).unwrap().unwrap();
    assert_eq!(hit.object, 0);
    assert!(hit.distance < 1e-9);
    assert_eq!(hit.visual, rp);
}

#[tokio::test]
async fn test_area_bias_inside_ring() {
    let req = requestor(test_cache());
    req.request_with_ids(QUERY, probe_ids()).await.unwrap();

    // deep inside the ring, far from the point object: the area wins,
    // but its distance is biased to radius / 4
    let rp = FPoint::new(500.0, 500.0);
    let hit = req.find_nearest(rp, 1000.0).unwrap().unwrap();
    assert_eq!(hit.object, 1);
    assert!((hit.distance - 250.0).abs() < 1e-9);
    assert_eq!(hit.visual, rp);

    // close to the point object the bias lets the point outrank the
    // surrounding area
    let rp = FPoint::new(120.0, 120.0);
    let hit = req.find_nearest(rp, 1000.0).unwrap().unwrap();
    assert_eq!(hit.object, 0);
}

#[tokio::test]
async fn test_nearest_projects_onto_line() {
    let req = requestor(test_cache());
    req.request_with_ids(QUERY, probe_ids()).await.unwrap();

    let rp = FPoint::new(5500.0, 5200.0);
    let hit = req.find_nearest(rp, 500.0).unwrap().unwrap();
    assert_eq!(hit.object, 2);
    assert!((hit.distance - 200.0).abs() < 1e-3);
    assert!((hit.visual.x() - 5500.0).abs() < 1.0);
    assert!((hit.visual.y() - 5000.0).abs() < 1.0);
}

#[tokio::test]
async fn test_nearest_over_empty_result() {
    let req = requestor(test_cache());
    req.request_with_ids(QUERY, Vec::new()).await.unwrap();
    assert!(req
        .find_nearest(FPoint::new(100.0, 100.0), 1e9)
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn test_nearest_outside_radius() {
    let req = requestor(test_cache());
    req.request_with_ids(QUERY, probe_ids()).await.unwrap();
    assert!(req
        .find_nearest(FPoint::new(1_000_000.0, 1_000_000.0), 10.0)
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn test_get_geom_reassembles_multi_line() {
    let req = requestor(test_cache());
    req.request_with_ids(QUERY, probe_ids()).await.unwrap();

    // object 2 is the first constituent of entity 3; both lines share
    // result row 2
    let (multi_line, multi_poly) = req.get_geom(2, 100.0).unwrap();
    assert_eq!(multi_line.len(), 2);
    assert!(multi_poly.is_empty());

    // the area object yields a polygon ring
    let (multi_line, multi_poly) = req.get_geom(1, 100.0).unwrap();
    assert!(multi_line.is_empty());
    assert_eq!(multi_poly.len(), 1);
    assert_eq!(multi_poly[0].len(), 5);
}

#[tokio::test]
async fn test_line_point_grid_has_dots() {
    let req = requestor(test_cache());
    req.request_with_ids(QUERY, probe_ids()).await.unwrap();

    let grid = req.line_point_grid().unwrap();
    assert!(!grid.is_empty());
    let dots = grid.cell(0, 0);
    assert!(!dots.is_empty());
}

mod with_stub_backend {
    use super::*;
    use axum::routing::get;
    use axum::Router;

    async fn spawn_stub() -> String {
        let app = Router::new().route(
            "/",
            get(|| async { "?name\t?geometry\nalpha\t\"POINT(1 2)\"\n" }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    #[tokio::test]
    async fn test_get_nearest_fetches_row() {
        let backend = SparqlBackend::new(&spawn_stub().await);
        let req = Requestor::new(test_cache(), backend, usize::MAX);
        req.request_with_ids(QUERY, probe_ids()).await.unwrap();

        let res = req
            .get_nearest(FPoint::new(100.0, 100.0), 10.0)
            .await
            .unwrap();
        assert!(res.found);
        assert_eq!(res.object, 0);
        assert_eq!(res.row[0], ("?name".to_string(), "alpha".to_string()));
        assert!(res.multi_line.is_empty() && res.multi_poly.is_empty());

        let row = req.request_row(0).await.unwrap();
        assert_eq!(row.len(), 2);
    }
}
