//! Dataset catalog endpoints.

use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    extract::{Extension, Path, Query},
    response::{IntoResponse, Response},
    Json,
};
use chrono::SecondsFormat;
use cube_common::{BoundingBox, CubeError, CubeResult};
use cube_store::{CubeHandle, VariableInfo};
use renderer::{render_values, Colormap};
use serde::Serialize;
use serde_json::Value;
use tracing::instrument;
use wmts_protocol::{parse_tile_options, Params};

use super::common::{json_error, png_response};
use crate::metrics::Operation;
use crate::pipeline::TileComputationPipeline;
use crate::registry::DatasetSummary;
use crate::state::AppState;

const LEGEND_WIDTH: usize = 256;
const LEGEND_HEIGHT: usize = 16;
const LEGEND_MAX_SIZE: usize = 4096;

#[derive(Debug, Serialize)]
pub struct DatasetList {
    pub datasets: Vec<DatasetSummary>,
}

#[derive(Debug, Serialize)]
pub struct Dimensions {
    pub time: u64,
    pub lat: u64,
    pub lon: u64,
}

#[derive(Debug, Serialize)]
pub struct LevelSummary {
    pub index: usize,
    pub resolution: f64,
    pub height: u64,
    pub width: u64,
}

#[derive(Debug, Serialize)]
pub struct TileGrid {
    pub tile_matrix_set: String,
    pub tile_size: u32,
    pub num_levels: u32,
    pub levels: Vec<LevelSummary>,
}

#[derive(Debug, Serialize)]
pub struct DatasetDetails {
    pub id: String,
    pub title: String,
    pub generation: u64,
    pub linked: bool,
    pub dims: Dimensions,
    pub bbox: BoundingBox,
    pub times: Vec<String>,
    pub variables: Vec<VariableInfo>,
    pub tile_grid: TileGrid,
}

impl DatasetDetails {
    fn new(title: String, handle: &CubeHandle) -> Self {
        let (lat, lon) = handle.finest().shape();
        let tms = handle.tile_matrix_set();
        Self {
            id: handle.id().to_string(),
            title,
            generation: handle.generation(),
            linked: handle.linked(),
            dims: Dimensions {
                time: handle.time_steps(),
                lat,
                lon,
            },
            bbox: *handle.bbox(),
            times: handle
                .times()
                .iter()
                .map(|t| t.to_rfc3339_opts(SecondsFormat::Secs, true))
                .collect(),
            variables: handle.variables().cloned().collect(),
            tile_grid: TileGrid {
                tile_matrix_set: tms.identifier.clone(),
                tile_size: tms.tile_size,
                num_levels: tms.num_levels(),
                levels: handle
                    .levels()
                    .iter()
                    .map(|level| {
                        let (height, width) = level.shape();
                        LevelSummary {
                            index: level.index,
                            resolution: level.resolution(),
                            height,
                            width,
                        }
                    })
                    .collect(),
            },
        }
    }
}

/// GET /datasets
pub async fn list_datasets_handler(Extension(state): Extension<Arc<AppState>>) -> Json<DatasetList> {
    state.metrics.record_request(Operation::ListDatasets);
    Json(DatasetList {
        datasets: state.registry.list(),
    })
}

/// GET /datasets/{id} - opens the dataset
#[instrument(skip(state))]
pub async fn dataset_details_handler(
    Extension(state): Extension<Arc<AppState>>,
    Path(id): Path<String>,
) -> Response {
    state.metrics.record_request(Operation::ListDatasets);
    match details(&state, &id).await {
        Ok(details) => Json(details).into_response(),
        Err(e) => json_error(&state, e),
    }
}

async fn details(state: &AppState, id: &str) -> CubeResult<DatasetDetails> {
    let handle = state.registry.open(id).await?;
    let title = state
        .registry
        .entry(handle.id())
        .and_then(|entry| entry.title.clone())
        .unwrap_or_else(|| handle.metadata().title.clone());
    Ok(DatasetDetails::new(title, &handle))
}

/// Coordinate values along one dimension.
#[derive(Debug, Serialize)]
pub struct DatasetCoords {
    pub name: String,
    pub size: usize,
    pub dtype: &'static str,
    pub coordinates: Vec<Value>,
}

impl DatasetCoords {
    /// `time` as RFC 3339 strings; `lat` (north to south) and `lon` as
    /// cell centres of the finest level.
    fn new(handle: &CubeHandle, dim: &str) -> CubeResult<Self> {
        let level = handle.finest();
        let bbox = level.bbox();
        let (height, width) = level.shape();
        let (res_x, res_y) = level.reader.resolution();
        let (dtype, coordinates): (&'static str, Vec<Value>) = match dim {
            "time" => (
                "datetime64[s]",
                handle
                    .times()
                    .iter()
                    .map(|t| Value::from(t.to_rfc3339_opts(SecondsFormat::Secs, true)))
                    .collect(),
            ),
            "lat" => (
                "float64",
                (0..height)
                    .map(|row| Value::from(bbox.max_y - (row as f64 + 0.5) * res_y))
                    .collect(),
            ),
            "lon" => (
                "float64",
                (0..width)
                    .map(|col| Value::from(bbox.min_x + (col as f64 + 0.5) * res_x))
                    .collect(),
            ),
            other => {
                return Err(CubeError::invalid_parameter(
                    "dim",
                    format!(
                        "dimension '{}' has no coordinates in dataset '{}'",
                        other,
                        handle.id()
                    ),
                ))
            }
        };
        Ok(Self {
            name: dim.to_string(),
            size: coordinates.len(),
            dtype,
            coordinates,
        })
    }
}

/// GET /datasets/{id}/coords/{dim} - opens the dataset
#[instrument(skip(state))]
pub async fn dataset_coords_handler(
    Extension(state): Extension<Arc<AppState>>,
    Path((id, dim)): Path<(String, String)>,
) -> Response {
    state.metrics.record_request(Operation::ListDatasets);
    let coords = match state.registry.open(&id).await {
        Ok(handle) => DatasetCoords::new(&handle, &dim),
        Err(e) => Err(e),
    };
    match coords {
        Ok(coords) => Json(coords).into_response(),
        Err(e) => json_error(&state, e),
    }
}

/// GET /datasets/{id}/vars/{variable}/legend.png?vmin&vmax&cmap&width&height
///
/// A horizontal colour bar over the variable's resolved style.
#[instrument(skip(state, query))]
pub async fn legend_handler(
    Extension(state): Extension<Arc<AppState>>,
    Path((id, variable)): Path<(String, String)>,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    state.metrics.record_request(Operation::ListDatasets);
    match legend(&state, &id, &variable, &Params::from(query)).await {
        Ok(png) => png_response(png.into()),
        Err(e) => json_error(&state, e),
    }
}

async fn legend(
    state: &AppState,
    id: &str,
    variable: &str,
    params: &Params,
) -> CubeResult<Vec<u8>> {
    let (_, request) = parse_tile_options(params)?;
    let width = legend_size(params, "WIDTH", LEGEND_WIDTH)?;
    let height = legend_size(params, "HEIGHT", LEGEND_HEIGHT)?;

    let handle = state.registry.open(id).await?;
    let info = handle
        .variable(variable)
        .map_err(|e| e.into_cube_error(handle.id()))?;
    let style = TileComputationPipeline::resolve_style(
        info,
        &request,
        state.registry.configured_style(handle.id(), variable),
    )?;
    let colormap: Colormap = style
        .colormap
        .parse()
        .map_err(|e: renderer::UnknownColormap| CubeError::invalid_parameter("cmap", e.to_string()))?;

    let values = legend_values(style.value_min, style.value_max, width, height);
    render_values(
        &values,
        width,
        height,
        style.value_min as f32,
        style.value_max as f32,
        colormap,
    )
    .map_err(CubeError::RenderError)
}

/// Row-major values rising left to right from `vmin` to `vmax`, sampled at
/// column centres.
fn legend_values(vmin: f64, vmax: f64, width: usize, height: usize) -> Vec<f32> {
    let row: Vec<f32> = (0..width)
        .map(|i| (vmin + (vmax - vmin) * (i as f64 + 0.5) / width as f64) as f32)
        .collect();
    row.repeat(height)
}

fn legend_size(params: &Params, key: &str, default: usize) -> CubeResult<usize> {
    match params.get(key) {
        None => Ok(default),
        Some(value) => value
            .trim()
            .parse::<usize>()
            .ok()
            .filter(|n| (1..=LEGEND_MAX_SIZE).contains(n))
            .ok_or_else(|| {
                CubeError::invalid_parameter(
                    key.to_ascii_lowercase(),
                    format!("expected an integer in 1..={}, got '{}'", LEGEND_MAX_SIZE, value),
                )
            }),
    }
}
