//! Maintenance actions.

use std::sync::Arc;

use axum::{
    extract::{Extension, Path},
    response::{IntoResponse, Response},
    Json,
};
use cube_common::{CubeError, CubeResult};
use serde::Serialize;
use tracing::{info, instrument};

use super::common::json_error;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct MaintenanceReport {
    pub action: &'static str,
    pub closed: usize,
}

/// GET /maintenance/{action}
///
/// `update` closes every open dataset, so the next request reopens it from
/// disk under a new generation and the caches drop its entries.
#[instrument(skip(state))]
pub async fn maintenance_handler(
    Extension(state): Extension<Arc<AppState>>,
    Path(action): Path<String>,
) -> Response {
    match run(&state, &action).await {
        Ok(report) => Json(report).into_response(),
        Err(e) => json_error(&state, e),
    }
}

async fn run(state: &AppState, action: &str) -> CubeResult<MaintenanceReport> {
    match action {
        "update" => {
            let closed = state.registry.invalidate_all().await;
            info!(closed = closed, "Datasets updated");
            Ok(MaintenanceReport {
                action: "update",
                closed,
            })
        }
        other => Err(CubeError::invalid_parameter(
            "action",
            format!("unknown maintenance action '{}', expected 'update'", other),
        )),
    }
}
