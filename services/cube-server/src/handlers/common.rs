//! Response helpers shared by the handlers.

use axum::{
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use bytes::Bytes;
use cube_common::CubeError;
use serde_json::json;
use tracing::{debug, error};
use wmts_protocol::error_report;

use crate::state::AppState;

/// Tiles of an open dataset generation never change.
const TILE_CACHE_CONTROL: &str = "public, max-age=3600";

pub fn status_of(err: &CubeError) -> StatusCode {
    StatusCode::from_u16(err.http_status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
}

fn log_error(state: &AppState, err: &CubeError) {
    state.metrics.record_error(err.exception_code());
    if err.is_client_error() {
        debug!(code = err.exception_code(), error = %err, "Request rejected");
    } else {
        error!(code = err.exception_code(), error = %err, "Request failed");
    }
}

/// OWS `ExceptionReport` response for a WMTS operation.
pub fn wmts_error(state: &AppState, err: CubeError) -> Response {
    log_error(state, &err);
    (
        status_of(&err),
        [(header::CONTENT_TYPE, "application/xml")],
        error_report(&err),
    )
        .into_response()
}

/// `{"error": {"code", "message"}}` response for a JSON endpoint.
pub fn json_error(state: &AppState, err: CubeError) -> Response {
    log_error(state, &err);
    let body = json!({
        "error": {
            "code": err.exception_code(),
            "message": err.to_string(),
        }
    });
    (status_of(&err), Json(body)).into_response()
}

pub fn xml_response(xml: String) -> Response {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "application/xml")],
        xml,
    )
        .into_response()
}

pub fn png_response(png: Bytes) -> Response {
    (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "image/png"),
            (header::CACHE_CONTROL, TILE_CACHE_CONTROL),
        ],
        png,
    )
        .into_response()
}
