//! WMTS KVP binding.

use cube_common::{CubeError, CubeResult};

use crate::format::ImageFormat;
use crate::params::Params;
use crate::request::{
    parse_tile_coord, parse_tile_options, FeatureInfoRequest, LayerId, TileRequest, WmtsRequest,
};

pub const WMTS_VERSION: &str = "1.0.0";

/// Parse a KVP query (`Service=WMTS&Request=...`) into a typed request.
///
/// Every check that does not need the dataset runs here.
pub fn parse_kvp(params: &Params) -> CubeResult<WmtsRequest> {
    let service = params.require("SERVICE")?;
    if !service.eq_ignore_ascii_case("WMTS") {
        return Err(CubeError::invalid_parameter(
            "Service",
            format!("expected WMTS, got '{}'", service),
        ));
    }

    if let Some(version) = params.get("VERSION") {
        if version != WMTS_VERSION {
            return Err(CubeError::invalid_parameter(
                "Version",
                format!("only {} is supported, got '{}'", WMTS_VERSION, version),
            ));
        }
    }

    let request = params.require("REQUEST")?;
    match request.to_ascii_lowercase().as_str() {
        "getcapabilities" => Ok(WmtsRequest::GetCapabilities),
        "gettile" => parse_get_tile(params).map(WmtsRequest::GetTile),
        "getfeatureinfo" => Ok(WmtsRequest::GetFeatureInfo(FeatureInfoRequest {
            layer: params.get("LAYER").map(str::to_string),
        })),
        _ => Err(CubeError::UnsupportedOperation(format!(
            "Request '{}'",
            request
        ))),
    }
}

fn parse_get_tile(params: &Params) -> CubeResult<TileRequest> {
    let layer = LayerId::parse(params.require("LAYER")?)?;
    let coord = parse_tile_coord(
        params.require("TILEMATRIX")?,
        params.require("TILEROW")?,
        params.require("TILECOL")?,
    )?;
    let format = match params.get("FORMAT") {
        Some(f) => ImageFormat::from_param(f)?,
        None => ImageFormat::Png,
    };
    let (time, style) = parse_tile_options(params)?;

    Ok(TileRequest {
        layer,
        coord,
        format,
        tile_matrix_set: params.get("TILEMATRIXSET").map(str::to_string),
        time,
        style,
    })
}
