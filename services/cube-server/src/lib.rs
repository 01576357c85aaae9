//! Tile and time-series server for Zarr data cubes.
//!
//! The library exposes the server's modules and its router for testing.

pub mod capabilities_cache;
pub mod config;
pub mod handlers;
pub mod metrics;
pub mod pipeline;
pub mod registry;
pub mod state;
pub mod timeseries;

use std::sync::Arc;

use axum::{
    extract::Extension,
    routing::{get, post},
    Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use tower_http::{compression::CompressionLayer, cors::CorsLayer, trace::TraceLayer};

use state::AppState;

/// All routes with the shared state and HTTP layers attached.
pub fn router(state: Arc<AppState>, prometheus: PrometheusHandle) -> Router {
    Router::new()
        .route("/datasets", get(handlers::list_datasets_handler))
        .route("/datasets/:id", get(handlers::dataset_details_handler))
        .route(
            "/datasets/:id/coords/:dim",
            get(handlers::dataset_coords_handler),
        )
        .route(
            "/datasets/:id/vars/:variable/legend.png",
            get(handlers::legend_handler),
        )
        .route("/maintenance/:action", get(handlers::maintenance_handler))
        .route(
            "/wmts/1.0.0/WMTSCapabilities.xml",
            get(handlers::wmts_capabilities_handler),
        )
        .route("/wmts", get(handlers::wmts_kvp_handler))
        .route("/wmts/kvp", get(handlers::wmts_kvp_handler))
        .route(
            "/wmts/1.0.0/tile/:dataset/:variable/:z/:row/:col",
            get(handlers::wmts_rest_tile_handler),
        )
        .route(
            "/wmts/1.0.0/featureinfo/*rest",
            get(handlers::wmts_feature_info_handler),
        )
        .route(
            "/tile/:dataset/:variable/:level/:col/:row",
            get(handlers::path_tile_handler),
        )
        .route(
            "/ts/:dataset/:variable/point",
            get(handlers::point_timeseries_handler),
        )
        .route(
            "/ts/:dataset/:variable/geometry",
            post(handlers::geometry_timeseries_handler),
        )
        .route(
            "/ts/:dataset/:variable/geometries",
            post(handlers::geometries_timeseries_handler),
        )
        .route("/health", get(handlers::health_handler))
        .route("/metrics", get(handlers::metrics_handler))
        .route("/api/metrics", get(handlers::api_metrics_handler))
        .layer(Extension(state))
        .layer(Extension(prometheus))
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive())
}
