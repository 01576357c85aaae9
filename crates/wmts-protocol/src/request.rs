//! Typed WMTS requests shared by the KVP and RESTful bindings.

use std::fmt;

use cube_common::{CubeError, CubeResult, StyleOverride, TileCoord};

use crate::format::ImageFormat;
use crate::params::Params;

/// WMTS request types.
#[derive(Debug, Clone, PartialEq)]
pub enum WmtsRequest {
    GetCapabilities,
    GetTile(TileRequest),
    GetFeatureInfo(FeatureInfoRequest),
}

/// A layer identifier `<dataset>.<variable>`.
///
/// Split at the last dot, so dataset identifiers may contain dots.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LayerId {
    pub dataset: String,
    pub variable: String,
}

impl LayerId {
    pub fn new(dataset: impl Into<String>, variable: impl Into<String>) -> Self {
        Self {
            dataset: dataset.into(),
            variable: variable.into(),
        }
    }

    pub fn parse(layer: &str) -> CubeResult<Self> {
        match layer.rsplit_once('.') {
            Some((dataset, variable)) if !dataset.is_empty() && !variable.is_empty() => {
                Ok(Self::new(dataset, variable))
            }
            _ => Err(CubeError::invalid_parameter(
                "Layer",
                format!("expected <dataset>.<variable>, got '{}'", layer),
            )),
        }
    }
}

impl fmt::Display for LayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.dataset, self.variable)
    }
}

/// A validated GetTile request.
///
/// The tile coordinate has been checked against the geographic matrix shape;
/// dataset-specific checks (variable, level count) happen once the dataset
/// is open.
#[derive(Debug, Clone, PartialEq)]
pub struct TileRequest {
    pub layer: LayerId,
    pub coord: TileCoord,
    pub format: ImageFormat,
    /// Matrix set named by a KVP request, checked against the dataset's.
    pub tile_matrix_set: Option<String>,
    pub time: Option<String>,
    pub style: StyleOverride,
}

/// GetFeatureInfo is recognised but not implemented.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FeatureInfoRequest {
    pub layer: Option<String>,
}

/// Parse and range-check a tile coordinate given as path or query strings.
pub fn parse_tile_coord(tile_matrix: &str, tile_row: &str, tile_col: &str) -> CubeResult<TileCoord> {
    let z = parse_index("TileMatrix", tile_matrix)?;
    let row = parse_index("TileRow", tile_row)?;
    let col = parse_index("TileCol", tile_col)?;
    let coord = TileCoord::new(z, row, col);
    coord.validate()?;
    Ok(coord)
}

fn parse_index(param: &str, value: &str) -> CubeResult<u32> {
    value.trim().parse::<u32>().map_err(|_| {
        CubeError::invalid_parameter(
            param,
            format!("expected a non-negative integer, got '{}'", value),
        )
    })
}

/// Tile options shared by all bindings: `time`, `vmin`, `vmax`, `cmap`.
///
/// A `style` naming anything but `default` is taken as a colormap unless
/// `cmap` is also given.
pub fn parse_tile_options(params: &Params) -> CubeResult<(Option<String>, StyleOverride)> {
    let time = params.get("TIME").map(str::to_string);
    let style = StyleOverride {
        vmin: parse_float(params, "VMIN")?,
        vmax: parse_float(params, "VMAX")?,
        cmap: params.get("CMAP").map(str::to_string).or_else(|| {
            params
                .get("STYLE")
                .filter(|s| !s.eq_ignore_ascii_case("default"))
                .map(str::to_string)
        }),
    };

    if let (Some(vmin), Some(vmax)) = (style.vmin, style.vmax) {
        if vmin >= vmax {
            return Err(CubeError::invalid_parameter(
                "vmin",
                format!("vmin ({}) must be less than vmax ({})", vmin, vmax),
            ));
        }
    }
    Ok((time, style))
}

fn parse_float(params: &Params, key: &str) -> CubeResult<Option<f64>> {
    params
        .get(key)
        .map(|v| match v.trim().parse::<f64>() {
            Ok(x) if x.is_finite() => Ok(x),
            _ => Err(CubeError::invalid_parameter(
                key.to_ascii_lowercase(),
                format!("expected a number, got '{}'", v),
            )),
        })
        .transpose()
}
