//! RESTful tile paths.
//!
//! Two forms are served:
//! - WMTS REST order: `tile/{dataset}/{variable}/{TileMatrix}/{TileRow}/{TileCol}.png`
//! - path form: `tile/{dataset}/{variable}/{level}/{col}/{row}.{ext}`

use cube_common::{CubeError, CubeResult, TileCoord};

use crate::format::ImageFormat;
use crate::params::Params;
use crate::request::{parse_tile_coord, parse_tile_options, LayerId, TileRequest};

/// Split `"<value>.<ext>"` into the value and its image format.
pub fn split_extension<'a>(param: &str, segment: &'a str) -> CubeResult<(&'a str, ImageFormat)> {
    let (value, ext) = segment.rsplit_once('.').ok_or_else(|| {
        CubeError::invalid_parameter(param, format!("missing format extension in '{}'", segment))
    })?;
    Ok((value, ImageFormat::from_extension(ext)?))
}

/// Tile request from the WMTS REST path segments, with query options.
pub fn parse_wmts_rest_tile(
    dataset: &str,
    variable: &str,
    tile_matrix: &str,
    tile_row: &str,
    tile_col_ext: &str,
    query: &Params,
) -> CubeResult<TileRequest> {
    let (tile_col, format) = split_extension("TileCol", tile_col_ext)?;
    let coord = parse_tile_coord(tile_matrix, tile_row, tile_col)?;
    build(dataset, variable, coord, format, query)
}

/// Tile request from the `level/col/row.ext` path form, with query options.
pub fn parse_path_tile(
    dataset: &str,
    variable: &str,
    level: &str,
    col: &str,
    row_ext: &str,
    query: &Params,
) -> CubeResult<TileRequest> {
    let (row, format) = split_extension("TileRow", row_ext)?;
    let coord = parse_tile_coord(level, row, col)?;
    build(dataset, variable, coord, format, query)
}

fn build(
    dataset: &str,
    variable: &str,
    coord: TileCoord,
    format: ImageFormat,
    query: &Params,
) -> CubeResult<TileRequest> {
    let (time, style) = parse_tile_options(query)?;
    Ok(TileRequest {
        layer: LayerId::new(dataset, variable),
        coord,
        format,
        tile_matrix_set: None,
        time,
        style,
    })
}
