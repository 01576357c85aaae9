//! Shared fixtures for server tests.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use cube_common::BoundingBox;
use cube_server::config::{DatasetConfig, ServerConfig, TileMode};
use cube_server::state::AppState;
use cube_store::{parse_time, CubeMetadata, CubeWriter, VariableSpec, WriteOptions};
use metrics_exporter_prometheus::PrometheusBuilder;
use tile_cache::CacheSize;
use tower::ServiceExt;

pub const TILE_SIZE: u32 = 16;

/// Fixture extent: 20x20 cells of 0.5 degrees.
pub fn bbox() -> BoundingBox {
    BoundingBox::new(0.0, 40.0, 10.0, 50.0)
}

/// Cube with variables `chl` (gradient `t * 10000 + row * 20 + col`) and
/// `chl_stdev` (constant 0.5), daily from 2024-01-01.
pub fn write_cube(dir: &Path, name: &str, times: usize) -> PathBuf {
    write_cube_at(dir, name, times, bbox())
}

/// [`write_cube`] covering another extent with the same 20x20 cells.
pub fn write_cube_at(dir: &Path, name: &str, times: usize, extent: BoundingBox) -> PathBuf {
    let (height, width) = (20usize, 20usize);
    let path = dir.join(name);
    let mut meta = CubeMetadata::new("Test cube", extent);
    meta.times = (0..times)
        .map(|day| parse_time(&format!("2024-01-{:02}", day + 1)).unwrap())
        .collect();
    let writer = CubeWriter::create(&path, &meta, WriteOptions::uncompressed()).unwrap();

    let chl: Vec<f32> = (0..times * height * width)
        .map(|i| {
            let t = i / (height * width);
            let cell = i % (height * width);
            (t * 10_000 + cell) as f32
        })
        .collect();
    let spec = VariableSpec::new("chl", times as u64, height as u64, width as u64, f32::NAN)
        .with_chunk(8, 8)
        .with_attribute("units", "mg m-3")
        .with_attribute("long_name", "Chlorophyll")
        .with_attribute("valid_min", 0.0)
        .with_attribute("color_bar_name", "plasma");
    writer.write_variable(&spec, &chl).unwrap();

    let stdev = vec![0.5f32; times * height * width];
    let spec = VariableSpec::new("chl_stdev", times as u64, height as u64, width as u64, f32::NAN)
        .with_chunk(8, 8);
    writer.write_variable(&spec, &stdev).unwrap();
    path
}

pub fn config(datasets: Vec<DatasetConfig>, tile_mode: TileMode) -> ServerConfig {
    ServerConfig {
        tile_size: TILE_SIZE,
        tile_mode,
        tile_cache_size: CacheSize::bytes(16 * 1024 * 1024),
        chunk_cache_size: CacheSize::bytes(16 * 1024 * 1024),
        datasets,
        ..Default::default()
    }
}

/// State and router serving one fixture cube as `demo`.
pub fn demo_app(dir: &Path, tile_mode: TileMode) -> (Arc<AppState>, Router) {
    let path = write_cube(dir, "demo.zarr", 3);
    let state = Arc::new(AppState::new(config(
        vec![DatasetConfig::new("demo", path)],
        tile_mode,
    )));
    let app = router(state.clone());
    (state, app)
}

pub fn router(state: Arc<AppState>) -> Router {
    let prometheus = PrometheusBuilder::new().build_recorder().handle();
    cube_server::router(state, prometheus)
}

pub struct TestResponse {
    pub status: StatusCode,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}

impl TestResponse {
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn json(&self) -> serde_json::Value {
        serde_json::from_slice(&self.body).unwrap()
    }
}

pub async fn send(app: &Router, request: Request<Body>) -> TestResponse {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let content_type = response
        .headers()
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap()
        .to_vec();
    TestResponse {
        status,
        content_type,
        body,
    }
}

pub async fn get(app: &Router, uri: &str) -> TestResponse {
    send(app, Request::builder().uri(uri).body(Body::empty()).unwrap()).await
}

pub async fn post_json(app: &Router, uri: &str, body: serde_json::Value) -> TestResponse {
    let request = Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    send(app, request).await
}

/// Decode a PNG into RGBA pixels.
pub fn decode_png(bytes: &[u8]) -> image::RgbaImage {
    image::load_from_memory_with_format(bytes, image::ImageFormat::Png)
        .unwrap()
        .to_rgba8()
}
