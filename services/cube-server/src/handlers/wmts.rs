//! WMTS request handlers.
//!
//! Three bindings reach the same operations:
//! - KVP: `/wmts/kvp?Service=WMTS&Request=...` (also `/wmts?...`)
//! - RESTful: `/wmts/1.0.0/...`
//! - path tiles: `/tile/{dataset}/{variable}/{level}/{col}/{row}.png`
//!
//! Request parsing runs every dataset-independent check before the registry
//! is consulted.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::{Extension, Path, Query},
    response::Response,
};
use chrono::SecondsFormat;
use cube_common::{CubeError, CubeResult, StyleOverride};
use cube_store::parse_time;
use tracing::{debug, instrument, warn};
use wmts_protocol::{
    parse_kvp, parse_path_tile, parse_wmts_rest_tile, CapabilitiesBuilder, LayerId, LayerInfo,
    Params, StyleInfo, TileRequest, WmtsRequest,
};

use super::common::{png_response, wmts_error, xml_response};
use crate::metrics::Operation;
use crate::pipeline::TileComputationPipeline;
use crate::state::AppState;

type TilePath = (String, String, String, String, String);

/// GET /wmts/kvp, GET /wmts
#[instrument(skip_all)]
pub async fn wmts_kvp_handler(
    Extension(state): Extension<Arc<AppState>>,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    let params = Params::from(query);
    match parse_kvp(&params) {
        Ok(WmtsRequest::GetCapabilities) => capabilities_response(&state).await,
        Ok(WmtsRequest::GetTile(request)) => tile_response(&state, request).await,
        Ok(WmtsRequest::GetFeatureInfo(_)) => feature_info_response(&state),
        Err(e) => {
            let operation = Operation::from_wmts_request(params.get("REQUEST").unwrap_or(""));
            state.metrics.record_request(operation);
            wmts_error(&state, e)
        }
    }
}

/// GET /wmts/1.0.0/WMTSCapabilities.xml
pub async fn wmts_capabilities_handler(Extension(state): Extension<Arc<AppState>>) -> Response {
    capabilities_response(&state).await
}

/// GET /wmts/1.0.0/tile/{dataset}/{variable}/{TileMatrix}/{TileRow}/{TileCol}.png
#[instrument(skip(state, query))]
pub async fn wmts_rest_tile_handler(
    Extension(state): Extension<Arc<AppState>>,
    Path((dataset, variable, tile_matrix, tile_row, tile_col)): Path<TilePath>,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    let params = Params::from(query);
    match parse_wmts_rest_tile(&dataset, &variable, &tile_matrix, &tile_row, &tile_col, &params) {
        Ok(request) => tile_response(&state, request).await,
        Err(e) => {
            state.metrics.record_request(Operation::GetTile);
            wmts_error(&state, e)
        }
    }
}

/// GET /tile/{dataset}/{variable}/{level}/{col}/{row}.{ext}
#[instrument(skip(state, query))]
pub async fn path_tile_handler(
    Extension(state): Extension<Arc<AppState>>,
    Path((dataset, variable, level, col, row)): Path<TilePath>,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    let params = Params::from(query);
    match parse_path_tile(&dataset, &variable, &level, &col, &row, &params) {
        Ok(request) => tile_response(&state, request).await,
        Err(e) => {
            state.metrics.record_request(Operation::GetTile);
            wmts_error(&state, e)
        }
    }
}

/// GET /wmts/1.0.0/featureinfo/...
pub async fn wmts_feature_info_handler(Extension(state): Extension<Arc<AppState>>) -> Response {
    feature_info_response(&state)
}

fn feature_info_response(state: &AppState) -> Response {
    state.metrics.record_request(Operation::GetFeatureInfo);
    wmts_error(
        state,
        CubeError::UnsupportedOperation("GetFeatureInfo".to_string()),
    )
}

async fn capabilities_response(state: &AppState) -> Response {
    state.metrics.record_request(Operation::GetCapabilities);
    match capabilities(state).await {
        Ok(xml) => xml_response(xml),
        Err(e) => wmts_error(state, e),
    }
}

async fn tile_response(state: &AppState, request: TileRequest) -> Response {
    state.metrics.record_request(Operation::GetTile);
    let started = Instant::now();
    match get_tile(state, &request).await {
        Ok(png) => {
            state
                .metrics
                .record_tile(started.elapsed().as_micros() as u64)
                .await;
            png_response(png)
        }
        Err(e) => wmts_error(state, e),
    }
}

async fn get_tile(state: &AppState, request: &TileRequest) -> CubeResult<bytes::Bytes> {
    let LayerId { dataset, variable } = &request.layer;
    let handle = state.registry.open(dataset).await?;

    if let Some(requested) = &request.tile_matrix_set {
        let identifier = &handle.tile_matrix_set().identifier;
        if requested != identifier {
            return Err(CubeError::invalid_parameter(
                "TileMatrixSet",
                format!("layer {} uses '{}', got '{}'", request.layer, identifier, requested),
            ));
        }
    }

    let info = handle
        .variable(variable)
        .map_err(|e| e.into_cube_error(handle.id()))?;
    let time = match request.time.as_deref() {
        None => None,
        Some(value) => Some(parse_time(value).ok_or_else(|| {
            CubeError::invalid_parameter("Time", format!("invalid time '{}'", value))
        })?),
    };
    let time_index = handle.time_index(time);
    let style = TileComputationPipeline::resolve_style(
        info,
        &request.style,
        state.registry.configured_style(handle.id(), variable),
    )?;

    state
        .pipeline
        .compute_tile(handle.clone(), variable, time_index, request.coord, &style)
        .await
}

/// Capabilities of every catalog dataset that opens.
async fn capabilities(state: &AppState) -> CubeResult<String> {
    if let Some(xml) = state.capabilities.get(state.registry.epoch()).await {
        return Ok(xml);
    }

    let mut builder = CapabilitiesBuilder::new(&state.config.title, state.config.base_url());
    let ids: Vec<String> = state.registry.ids().map(str::to_string).collect();
    for id in ids {
        let handle = match state.registry.open(&id).await {
            Ok(handle) => handle,
            Err(e) => {
                warn!(dataset = %id, error = %e, "Dataset left out of capabilities");
                continue;
            }
        };

        let dataset_title = state
            .registry
            .entry(&id)
            .and_then(|entry| entry.title.clone())
            .unwrap_or_else(|| handle.metadata().title.clone());
        let times: Vec<String> = handle
            .times()
            .iter()
            .map(|t| t.to_rfc3339_opts(SecondsFormat::Secs, true))
            .collect();

        for info in handle.variables() {
            let mut styles = vec![StyleInfo::new("default", true)];
            match TileComputationPipeline::resolve_style(
                info,
                &StyleOverride::default(),
                state.registry.configured_style(&id, &info.name),
            ) {
                Ok(style) => styles.push(StyleInfo::new(style.colormap, false)),
                Err(e) => debug!(dataset = %id, variable = %info.name, error = %e, "No default style"),
            }

            builder = builder.layer(LayerInfo {
                layer: LayerId::new(&id, &info.name),
                title: format!(
                    "{}: {}",
                    dataset_title,
                    info.long_name.as_deref().unwrap_or(&info.name)
                ),
                abstract_text: info.units.as_ref().map(|units| format!("Units: {}", units)),
                bbox: *handle.bbox(),
                tile_matrix_set: handle.tile_matrix_set().identifier.clone(),
                times: times.clone(),
                styles,
            });
        }
        builder = builder.tile_matrix_set(handle.tile_matrix_set().clone());
    }

    let xml = builder.build();
    // Opening datasets above moves the epoch; key the document by the final one.
    state
        .capabilities
        .set(xml.clone(), state.registry.epoch())
        .await;
    Ok(xml)
}
