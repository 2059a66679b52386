//! End-to-end build against an in-process stub backend.
//!
//! The stub serves the count query, two WKT pages plus the empty
//! terminator page, and the binary id stream, all over the real HTTP
//! client, so the whole build protocol is exercised.

use axum::extract::Query;
use axum::http::HeaderMap;
use axum::routing::get;
use axum::Router;
use mercache_backend::{SparqlBackend, ACCEPT_IDS};
use mercache_core::{GeomId, GeomRef, IdMapping, INVALID_ID};
use mercache_ingest::CacheBuilder;
use std::collections::HashMap;

const GEO_QUERY: &str = "SELECT ?geometry WHERE { ?s ?p ?geometry } ORDER BY ?geometry";
const COUNT_QUERY: &str = "SELECT (COUNT(?geometry) AS ?count) WHERE { ?s ?p ?geometry }";

const SUFFIX: &str = "\"^^<http://www.opengis.net/ont/geosparql#wktLiteral>";

/// One WKT literal per result row, in backend order.
fn wkt_rows() -> Vec<String> {
    vec![
        format!("\"POINT(7.8 48.0){SUFFIX}"),
        format!("\"POINT(7.8 48.0){SUFFIX}"),
        format!("\"MULTILINESTRING((0 0,0.01 0),(0.02 0,0.03 0)){SUFFIX}"),
        format!("\"GARBAGE{SUFFIX}"),
        format!("\"POLYGON((0 0,0.01 0,0.01 0.01,0 0.01,0 0)){SUFFIX}"),
    ]
}

/// Entity ids, one per result row (continuations are not separate rows
/// in the binary protocol view of the same query, so one id per WKT row).
const ROW_QIDS: [u64; 5] = [7, 7, 42, 9, 13];

fn page_of(query: &str) -> (usize, usize) {
    let offset = query
        .split("OFFSET ")
        .nth(1)
        .and_then(|s| s.split_whitespace().next())
        .and_then(|s| s.parse().ok())
        .unwrap_or(0);
    let limit = query
        .split("LIMIT ")
        .nth(1)
        .and_then(|s| s.split_whitespace().next())
        .and_then(|s| s.parse().ok())
        .unwrap_or(usize::MAX);
    (offset, limit)
}

async fn stub_handler(Query(params): Query<HashMap<String, String>>, headers: HeaderMap) -> Vec<u8> {
    let query = params.get("query").cloned().unwrap_or_default();
    let accept = headers
        .get(axum::http::header::ACCEPT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    if accept == ACCEPT_IDS {
        return ROW_QIDS.iter().flat_map(|q| q.to_le_bytes()).collect();
    }

    if query.contains("COUNT") {
        return format!("?count\n{}\n", wkt_rows().len()).into_bytes();
    }

    let (offset, limit) = page_of(&query);
    let mut body = String::from("?geometry\n");
    for row in wkt_rows().iter().skip(offset).take(limit) {
        body.push_str(row);
        body.push('\n');
    }
    body.into_bytes()
}

async fn spawn_stub() -> String {
    let app = Router::new().route("/", get(stub_handler));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

#[tokio::test]
async fn test_full_build() {
    let backend = SparqlBackend::new(&spawn_stub().await);
    let cache = CacheBuilder::new(backend, GEO_QUERY, COUNT_QUERY)
        .build()
        .await
        .unwrap();

    assert!(cache.is_ready());

    // two identical points dedup to one stored point
    assert_eq!(cache.points().len(), 1);
    // two multilinestring constituents + one polygon ring
    assert_eq!(cache.lines().len(), 3);
    assert!(cache.line_is_area(2));

    // one table row per WKT row plus the continuation
    let table = cache.qid_to_id();
    assert_eq!(table.len(), 6);

    // sorted by (qid, id), placeholders all rewritten
    assert!(table.windows(2).all(|w| w[0] <= w[1]));
    assert!(table.iter().all(|m| m.qid >= 7));

    // both constituents of entity 42 share its qid and stay adjacent
    let multi: Vec<&IdMapping> = table.iter().filter(|m| m.qid == 42).collect();
    assert_eq!(multi.len(), 2);
    assert!(multi.iter().all(|m| GeomId(m.id).is_line()));

    // the garbage row survives as a sentinel
    assert!(table.iter().any(|m| m.qid == 9 && m.id == INVALID_ID));

    // joining the full id list resolves every parsable geometry
    let mut probe: Vec<IdMapping> = ROW_QIDS
        .iter()
        .enumerate()
        .map(|(row, &qid)| IdMapping::new(qid, row as u64))
        .collect();
    probe.sort_unstable();
    probe.dedup_by_key(|m| m.qid);
    let objects = cache.rel_objects(&probe);
    // entity 7 -> the deduped point twice (two table rows), 42 -> two
    // lines, 13 -> polygon ring, 9 -> nothing
    assert_eq!(objects.len(), 5);
    assert!(matches!(objects[0].0.classify(), GeomRef::Point(0)));
}
