//! Health checks and metrics endpoints.

use std::fmt::Write;
use std::sync::Arc;

use axum::{
    extract::Extension,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Serialize;
use tile_cache::CacheStatsSnapshot;
use tracing::instrument;

use crate::metrics::MetricsSnapshot;
use crate::registry::RegistryStats;
use crate::state::AppState;

/// GET /health
pub async fn health_handler() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

fn cache_stats(state: &AppState) -> Vec<CacheStatsSnapshot> {
    let mut stats = vec![state.pipeline.tile_cache().stats()];
    if let Some(chunks) = state.pipeline.chunk_cache() {
        stats.push(chunks.stats());
    }
    stats
}

/// GET /metrics - Prometheus text
///
/// Recorder output followed by the collector's own totals.
#[instrument(skip_all)]
pub async fn metrics_handler(
    Extension(state): Extension<Arc<AppState>>,
    Extension(prometheus): Extension<PrometheusHandle>,
) -> Response {
    let caches = cache_stats(&state);
    for stats in &caches {
        state.metrics.record_cache_stats(stats);
    }
    let registry = state.registry.stats();
    state.metrics.record_registry_stats(&registry);
    let snapshot = state.metrics.snapshot().await;

    let mut output = prometheus.render();
    let _ = write!(
        output,
        "# HELP cube_uptime_seconds Seconds since the server started\n# TYPE cube_uptime_seconds gauge\ncube_uptime_seconds {}\n",
        snapshot.uptime_secs
    );
    let _ = write!(
        output,
        "# HELP cube_tile_avg_ms Average tile request duration\n# TYPE cube_tile_avg_ms gauge\ncube_tile_avg_ms {:.3}\n",
        snapshot.tiles.avg_ms
    );
    let _ = write!(
        output,
        "# HELP cube_registry_opens Dataset opens since start\n# TYPE cube_registry_opens counter\ncube_registry_opens {}\n",
        registry.opens
    );
    let _ = write!(
        output,
        "# HELP cube_registry_closes Dataset closes since start\n# TYPE cube_registry_closes counter\ncube_registry_closes {}\n",
        registry.closes
    );
    for stats in &caches {
        let _ = write!(
            output,
            "# HELP cube_cache_bytes Bytes held by a cache\n# TYPE cube_cache_bytes gauge\ncube_cache_bytes{{cache=\"{}\"}} {}\n",
            stats.name, stats.size_bytes
        );
    }

    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        output,
    )
        .into_response()
}

#[derive(Debug, Serialize)]
pub struct ApiMetrics {
    pub requests: MetricsSnapshot,
    pub caches: Vec<CacheStatsSnapshot>,
    pub registry: RegistryStats,
    pub tile_mode: &'static str,
}

/// GET /api/metrics - JSON metrics
pub async fn api_metrics_handler(Extension(state): Extension<Arc<AppState>>) -> Json<ApiMetrics> {
    Json(ApiMetrics {
        requests: state.metrics.snapshot().await,
        caches: cache_stats(&state),
        registry: state.registry.stats(),
        tile_mode: state.pipeline.source_name(),
    })
}
