//! Value grids to PNG tiles.

use crate::colormap::Colormap;
use crate::png::{create_png_from_palette, transparent_png};

/// Render a row-major grid of values as an indexed PNG.
///
/// NaN values are transparent; everything else is scaled over
/// `[vmin, vmax]` (clamped) through `colormap`.
pub fn render_values(
    values: &[f32],
    width: usize,
    height: usize,
    vmin: f32,
    vmax: f32,
    colormap: Colormap,
) -> Result<Vec<u8>, String> {
    if values.len() != width * height {
        return Err(format!(
            "expected {} values for {}x{} tile, got {}",
            width * height,
            width,
            height,
            values.len()
        ));
    }
    if values.iter().all(|v| v.is_nan()) {
        return transparent_png(width, height);
    }

    let palette = colormap.palette();
    let indices = palette.map_values(values, vmin, vmax);
    create_png_from_palette(&indices, width, height, &palette)
}

/// A fully transparent square tile.
pub fn empty_tile(tile_size: usize) -> Result<Vec<u8>, String> {
    transparent_png(tile_size, tile_size)
}
