//! HTTP-level tests against the full router.

mod common;

use axum::http::StatusCode;
use common::*;
use cube_server::config::{DatasetConfig, TileMode};
use cube_server::registry::DatasetState;
use cube_server::state::AppState;
use serde_json::json;
use std::sync::Arc;

/// Tile at z=5 over the north-west corner of the fixture extent.
const INSIDE_TILE: &str = "/wmts/1.0.0/tile/demo/chl/5/7/32.png";

// ============================================================================
// GetTile
// ============================================================================

#[tokio::test]
async fn test_rest_tile_is_png() {
    let dir = tempfile::tempdir().unwrap();
    let (_state, app) = demo_app(dir.path(), TileMode::ChunkCached);

    let response = get(&app, INSIDE_TILE).await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.content_type.as_deref(), Some("image/png"));

    let image = decode_png(&response.body);
    assert_eq!(image.dimensions(), (TILE_SIZE, TILE_SIZE));
    // Top rows lie north of the extent, lower rows inside it.
    assert_eq!(image.get_pixel(0, 0)[3], 0);
    assert_eq!(image.get_pixel(0, 8)[3], 255);
}

#[tokio::test]
async fn test_kvp_and_rest_tiles_match() {
    let dir = tempfile::tempdir().unwrap();
    let (_state, app) = demo_app(dir.path(), TileMode::ChunkCached);

    let rest = get(&app, INSIDE_TILE).await;
    let kvp = get(
        &app,
        "/wmts/kvp?Service=WMTS&Request=GetTile&Version=1.0.0&Layer=demo.chl\
         &TileMatrixSet=demo_TileGrid_16_6&TileMatrix=5&TileRow=7&TileCol=32&Format=image/png",
    )
    .await;
    let path = get(&app, "/tile/demo/chl/5/32/7.png").await;

    assert_eq!(kvp.status, StatusCode::OK);
    assert_eq!(path.status, StatusCode::OK);
    assert_eq!(rest.body, kvp.body);
    assert_eq!(rest.body, path.body);
}

#[tokio::test]
async fn test_tile_outside_extent_is_transparent() {
    let dir = tempfile::tempdir().unwrap();
    let (_state, app) = demo_app(dir.path(), TileMode::DirectRead);

    let response = get(&app, "/wmts/1.0.0/tile/demo/chl/5/0/0.png").await;
    assert_eq!(response.status, StatusCode::OK);
    let image = decode_png(&response.body);
    assert_eq!(image.dimensions(), (TILE_SIZE, TILE_SIZE));
    assert!(image.pixels().all(|p| p[3] == 0));
}

#[tokio::test]
async fn test_time_and_style_change_the_tile() {
    let dir = tempfile::tempdir().unwrap();
    let (_state, app) = demo_app(dir.path(), TileMode::ChunkCached);

    let uri = "/wmts/1.0.0/tile/demo/chl/5/7/32.png?vmin=0&vmax=400";
    let day1 = get(&app, &format!("{}&time=2024-01-01", uri)).await;
    let day1_again = get(&app, &format!("{}&time=2024-01-01T03:00:00Z", uri)).await;
    let gray = get(&app, &format!("{}&time=2024-01-01&cmap=gray", uri)).await;

    assert_eq!(day1.status, StatusCode::OK);
    assert_eq!(day1.body, day1_again.body, "nearest time step");
    assert_ne!(day1.body, gray.body);
}

#[tokio::test]
async fn test_second_request_hits_tile_cache() {
    let dir = tempfile::tempdir().unwrap();
    let (state, app) = demo_app(dir.path(), TileMode::ChunkCached);

    let first = get(&app, INSIDE_TILE).await;
    let second = get(&app, INSIDE_TILE).await;
    assert_eq!(first.body, second.body);

    let stats = state.pipeline.tile_cache().stats();
    assert_eq!(stats.misses, 1);
    assert_eq!(stats.hits, 1);
    assert_eq!(stats.entries, 1);
}

// ============================================================================
// Validation and errors
// ============================================================================

#[tokio::test]
async fn test_validation_errors_precede_dataset_access() {
    let dir = tempfile::tempdir().unwrap();
    let (state, app) = demo_app(dir.path(), TileMode::ChunkCached);

    let cases = [
        ("/wmts/1.0.0/tile/demo/chl/25/0/0.png", "TileOutOfRange"),
        ("/wmts/1.0.0/tile/demo/chl/1/2/0.png", "TileOutOfRange"),
        ("/wmts/1.0.0/tile/demo/chl/1/0/4.png", "TileOutOfRange"),
        ("/wmts/1.0.0/tile/demo/chl/x/0/0.png", "InvalidParameterValue"),
        ("/wmts/1.0.0/tile/demo/chl/1/0/0.jpg", "InvalidParameterValue"),
        ("/wmts/kvp?Service=WMTS&Request=GetTile&Layer=demo.chl&TileMatrix=1&TileCol=0", "MissingParameterValue"),
        ("/wmts/kvp?Service=WMS&Request=GetTile", "InvalidParameterValue"),
    ];
    for (uri, code) in cases {
        let response = get(&app, uri).await;
        assert_eq!(response.status, StatusCode::BAD_REQUEST, "{}", uri);
        assert_eq!(response.content_type.as_deref(), Some("application/xml"));
        assert!(
            response.text().contains(&format!(r#"exceptionCode="{}""#, code)),
            "{}: {}",
            uri,
            response.text()
        );
    }

    assert_eq!(state.registry.stats().opens, 0);
    assert_eq!(state.registry.state("demo"), DatasetState::Unopened);
}

#[tokio::test]
async fn test_rejected_kvp_requests_are_counted() {
    let dir = tempfile::tempdir().unwrap();
    let (state, app) = demo_app(dir.path(), TileMode::DirectRead);

    let missing_row = "/wmts/kvp?Service=WMTS&Request=GetTile&Layer=demo.chl&TileMatrix=1&TileCol=0";
    assert_eq!(get(&app, missing_row).await.status, StatusCode::BAD_REQUEST);
    assert_eq!(
        get(&app, "/wmts/kvp?Service=WMTS&Request=GetMap").await.status,
        StatusCode::BAD_REQUEST
    );

    let snapshot = state.metrics.snapshot().await;
    assert_eq!(snapshot.tile_requests, 1);
    assert_eq!(snapshot.other_requests, 1);
    assert_eq!(snapshot.errors, 2);
}

#[tokio::test]
async fn test_unknown_dataset_and_variable() {
    let dir = tempfile::tempdir().unwrap();
    let (_state, app) = demo_app(dir.path(), TileMode::ChunkCached);

    let response = get(&app, "/wmts/1.0.0/tile/nope/chl/0/0/0.png").await;
    assert_eq!(response.status, StatusCode::NOT_FOUND);
    assert!(response.text().contains("DatasetNotFound"));

    let response = get(&app, "/wmts/1.0.0/tile/demo/sst/0/0/0.png").await;
    assert_eq!(response.status, StatusCode::NOT_FOUND);
    assert!(response.text().contains("VariableNotFound"));
}

#[tokio::test]
async fn test_dataset_specific_checks() {
    let dir = tempfile::tempdir().unwrap();
    let (_state, app) = demo_app(dir.path(), TileMode::ChunkCached);

    // Fixture pyramid has levels 0..=5.
    let response = get(&app, "/wmts/1.0.0/tile/demo/chl/6/0/0.png").await;
    assert_eq!(response.status, StatusCode::BAD_REQUEST);
    assert!(response.text().contains("TileOutOfRange"));

    let response = get(
        &app,
        "/wmts/kvp?Service=WMTS&Request=GetTile&Layer=demo.chl&TileMatrixSet=other\
         &TileMatrix=0&TileRow=0&TileCol=0",
    )
    .await;
    assert_eq!(response.status, StatusCode::BAD_REQUEST);
    assert!(response.text().contains(r#"locator="TileMatrixSet""#));

    let response = get(&app, &format!("{}?time=yesterday", INSIDE_TILE)).await;
    assert_eq!(response.status, StatusCode::BAD_REQUEST);
    assert!(response.text().contains(r#"locator="Time""#));

    let response = get(&app, &format!("{}?cmap=unicorn", INSIDE_TILE)).await;
    assert_eq!(response.status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_get_feature_info_is_not_supported() {
    let dir = tempfile::tempdir().unwrap();
    let (state, app) = demo_app(dir.path(), TileMode::ChunkCached);

    for uri in [
        "/wmts/kvp?Service=WMTS&Request=GetFeatureInfo&Layer=demo.chl",
        "/wmts?SERVICE=WMTS&REQUEST=GetFeatureInfo",
        "/wmts/1.0.0/featureinfo/demo/chl/0/0/0/1/1.json",
    ] {
        let response = get(&app, uri).await;
        assert_eq!(response.status, StatusCode::NOT_IMPLEMENTED, "{}", uri);
        assert!(response
            .text()
            .contains(r#"exceptionCode="OperationNotSupported""#));
    }
    assert_eq!(state.registry.stats().opens, 0);
}

// ============================================================================
// Capabilities and catalog
// ============================================================================

#[tokio::test]
async fn test_capabilities_lists_layers() {
    let dir = tempfile::tempdir().unwrap();
    let good = write_cube(dir.path(), "good.zarr", 2);
    let config = config(
        vec![
            DatasetConfig::new("good", good),
            DatasetConfig::new("broken", dir.path().join("missing.zarr")),
        ],
        TileMode::ChunkCached,
    );
    let state = Arc::new(AppState::new(config));
    let app = router(state.clone());

    let response = get(&app, "/wmts/1.0.0/WMTSCapabilities.xml").await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.content_type.as_deref(), Some("application/xml"));
    let xml = response.text();
    assert!(xml.contains("<ows:Identifier>good.chl</ows:Identifier>"));
    assert!(xml.contains("<ows:Identifier>good.chl_stdev</ows:Identifier>"));
    assert!(xml.contains("good_TileGrid_16_6"));
    assert!(xml.contains("<Value>2024-01-02T00:00:00Z</Value>"));
    assert!(!xml.contains("broken."));

    let kvp = get(&app, "/wmts/kvp?service=wmts&request=GetCapabilities").await;
    assert_eq!(kvp.status, StatusCode::OK);
    assert_eq!(kvp.text(), xml);
}

#[tokio::test]
async fn test_list_and_describe_datasets() {
    let dir = tempfile::tempdir().unwrap();
    let (_state, app) = demo_app(dir.path(), TileMode::ChunkCached);

    let list = get(&app, "/datasets").await.json();
    assert_eq!(list["datasets"][0]["id"], "demo");
    assert_eq!(list["datasets"][0]["state"], "unopened");
    assert!(list["datasets"][0].get("variables").is_none());

    let details = get(&app, "/datasets/demo").await;
    assert_eq!(details.status, StatusCode::OK);
    let details = details.json();
    assert_eq!(details["dims"], json!({"time": 3, "lat": 20, "lon": 20}));
    assert_eq!(details["tile_grid"]["num_levels"], 6);
    assert_eq!(details["linked"], false);
    assert_eq!(details["times"][0], "2024-01-01T00:00:00Z");

    let list = get(&app, "/datasets").await.json();
    assert_eq!(list["datasets"][0]["state"], "open");
    assert_eq!(list["datasets"][0]["variables"], json!(["chl", "chl_stdev"]));

    let missing = get(&app, "/datasets/nope").await;
    assert_eq!(missing.status, StatusCode::NOT_FOUND);
    assert_eq!(missing.json()["error"]["code"], "DatasetNotFound");
}

// ============================================================================
// Time series
// ============================================================================

#[tokio::test]
async fn test_point_time_series() {
    let dir = tempfile::tempdir().unwrap();
    let (_state, app) = demo_app(dir.path(), TileMode::ChunkCached);

    let response = get(&app, "/ts/demo/chl/point?lon=0.25&lat=49.75").await;
    assert_eq!(response.status, StatusCode::OK);
    let body = response.json();
    let results = body["results"].as_array().unwrap();
    assert_eq!(results.len(), 3);
    assert_eq!(results[1]["date"], "2024-01-02T00:00:00Z");
    assert_eq!(results[1]["result"]["average"], 10_000.0);
    assert_eq!(results[1]["result"]["uncertainty"], 0.5);
    assert_eq!(results[1]["result"]["validCount"], 1);

    let limited = get(
        &app,
        "/ts/demo/chl/point?lon=0.25&lat=49.75&startDate=2024-01-02&maxValids=1",
    )
    .await
    .json();
    let results = limited["results"].as_array().unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0]["date"], "2024-01-03T00:00:00Z");

    let bad = get(&app, "/ts/demo/chl/point?lon=0.25").await;
    assert_eq!(bad.status, StatusCode::BAD_REQUEST);
    assert_eq!(bad.json()["error"]["code"], "MissingParameterValue");
}

#[tokio::test]
async fn test_geometry_time_series() {
    let dir = tempfile::tempdir().unwrap();
    let (_state, app) = demo_app(dir.path(), TileMode::ChunkCached);

    // Cells (0,0), (0,1), (1,0), (1,1): values 0, 1, 20, 21 on day one.
    let polygon = json!({
        "type": "Feature",
        "geometry": {
            "type": "Polygon",
            "coordinates": [[[0.0, 49.0], [1.0, 49.0], [1.0, 50.0], [0.0, 50.0], [0.0, 49.0]]]
        }
    });
    let response = post_json(&app, "/ts/demo/chl/geometry?endDate=2024-01-01", polygon).await;
    assert_eq!(response.status, StatusCode::OK);
    let body = response.json();
    let results = body["results"].as_array().unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0]["result"]["average"], 10.5);
    assert_eq!(results[0]["result"]["totalCount"], 4);

    let line = json!({"type": "LineString", "coordinates": [[0.0, 40.0], [1.0, 41.0]]});
    let response = post_json(&app, "/ts/demo/chl/geometry", line).await;
    assert_eq!(response.status, StatusCode::BAD_REQUEST);
    assert_eq!(response.json()["error"]["code"], "InvalidParameterValue");
}

#[tokio::test]
async fn test_geometry_collection_time_series() {
    let dir = tempfile::tempdir().unwrap();
    let (_state, app) = demo_app(dir.path(), TileMode::ChunkCached);

    // Cell (0,0) then the 2x2 block at the north-west corner.
    let collection = json!({
        "type": "GeometryCollection",
        "geometries": [
            {"type": "Point", "coordinates": [0.25, 49.75]},
            {
                "type": "Polygon",
                "coordinates": [[[0.0, 49.0], [1.0, 49.0], [1.0, 50.0], [0.0, 50.0], [0.0, 49.0]]]
            }
        ]
    });
    let response = post_json(&app, "/ts/demo/chl/geometries?endDate=2024-01-01", collection).await;
    assert_eq!(response.status, StatusCode::OK);
    let body = response.json();
    let results = body["results"].as_array().unwrap();
    assert_eq!(results.len(), 2);
    assert_eq!(results[0][0]["result"]["average"], 0.0);
    assert_eq!(results[1][0]["result"]["average"], 10.5);

    let point = json!({"type": "Point", "coordinates": [0.25, 49.75]});
    let response = post_json(&app, "/ts/demo/chl/geometries", point).await;
    assert_eq!(response.status, StatusCode::BAD_REQUEST);
    assert_eq!(response.json()["error"]["code"], "InvalidParameterValue");
}

// ============================================================================
// Coordinates, legends and maintenance
// ============================================================================

#[tokio::test]
async fn test_dataset_coords() {
    let dir = tempfile::tempdir().unwrap();
    let (_state, app) = demo_app(dir.path(), TileMode::DirectRead);

    let time = get(&app, "/datasets/demo/coords/time").await;
    assert_eq!(time.status, StatusCode::OK);
    let time = time.json();
    assert_eq!(time["name"], "time");
    assert_eq!(time["size"], 3);
    assert_eq!(time["coordinates"][0], "2024-01-01T00:00:00Z");
    assert_eq!(time["coordinates"][2], "2024-01-03T00:00:00Z");

    let lat = get(&app, "/datasets/demo/coords/lat").await.json();
    assert_eq!(lat["size"], 20);
    assert_eq!(lat["coordinates"][0], 49.75);
    assert_eq!(lat["coordinates"][19], 40.25);

    let lon = get(&app, "/datasets/demo/coords/lon").await.json();
    assert_eq!(lon["coordinates"][1], 0.75);

    let depth = get(&app, "/datasets/demo/coords/depth").await;
    assert_eq!(depth.status, StatusCode::BAD_REQUEST);
    assert_eq!(depth.json()["error"]["code"], "InvalidParameterValue");

    let missing = get(&app, "/datasets/nope/coords/time").await;
    assert_eq!(missing.status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_variable_legend() {
    let dir = tempfile::tempdir().unwrap();
    let (_state, app) = demo_app(dir.path(), TileMode::DirectRead);

    let response = get(&app, "/datasets/demo/vars/chl/legend.png?vmin=0&vmax=100").await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.content_type.as_deref(), Some("image/png"));
    let image = decode_png(&response.body);
    assert_eq!(image.dimensions(), (256, 16));
    let (left, right) = (image.get_pixel(0, 0), image.get_pixel(255, 0));
    assert_eq!(left[3], 255);
    assert_ne!(left, right);
    assert_eq!(image.get_pixel(0, 15), left);

    let sized = get(&app, "/datasets/demo/vars/chl/legend.png?width=32&height=4&cmap=gray").await;
    assert_eq!(decode_png(&sized.body).dimensions(), (32, 4));

    let cases = [
        ("/datasets/demo/vars/chl/legend.png?vmin=5&vmax=1", StatusCode::BAD_REQUEST),
        ("/datasets/demo/vars/chl/legend.png?width=0", StatusCode::BAD_REQUEST),
        ("/datasets/demo/vars/chl/legend.png?cmap=rainbow-unicorn", StatusCode::BAD_REQUEST),
        ("/datasets/demo/vars/sst/legend.png", StatusCode::NOT_FOUND),
    ];
    for (uri, status) in cases {
        assert_eq!(get(&app, uri).await.status, status, "{}", uri);
    }
}

#[tokio::test]
async fn test_maintenance_update_closes_datasets() {
    let dir = tempfile::tempdir().unwrap();
    let (state, app) = demo_app(dir.path(), TileMode::ChunkCached);

    assert_eq!(get(&app, INSIDE_TILE).await.status, StatusCode::OK);
    let generation = state.registry.open("demo").await.unwrap().generation();
    assert_eq!(state.pipeline.tile_cache().len(), 1);

    let response = get(&app, "/maintenance/update").await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.json(), json!({"action": "update", "closed": 1}));
    assert_eq!(state.registry.state("demo"), DatasetState::Closed);
    assert_eq!(state.pipeline.tile_cache().len(), 0);

    assert_eq!(get(&app, INSIDE_TILE).await.status, StatusCode::OK);
    assert!(state.registry.open("demo").await.unwrap().generation() > generation);

    let unknown = get(&app, "/maintenance/restart").await;
    assert_eq!(unknown.status, StatusCode::BAD_REQUEST);
    assert_eq!(unknown.json()["error"]["code"], "InvalidParameterValue");
}

// ============================================================================
// Health and metrics
// ============================================================================

#[tokio::test]
async fn test_health_and_metrics() {
    let dir = tempfile::tempdir().unwrap();
    let (_state, app) = demo_app(dir.path(), TileMode::ChunkCached);

    let health = get(&app, "/health").await;
    assert_eq!(health.status, StatusCode::OK);
    assert_eq!(health.text(), "OK");

    get(&app, INSIDE_TILE).await;
    let metrics = get(&app, "/metrics").await;
    assert_eq!(metrics.status, StatusCode::OK);
    let text = metrics.text();
    assert!(text.contains("cube_uptime_seconds"));
    assert!(text.contains(r#"cube_cache_bytes{cache="tiles"}"#));
    assert!(text.contains(r#"cube_cache_bytes{cache="chunks"}"#));

    let api = get(&app, "/api/metrics").await.json();
    assert_eq!(api["requests"]["tile_requests"], 1);
    assert_eq!(api["tile_mode"], "chunk_cached");
    assert_eq!(api["registry"]["opens"], 1);
}
