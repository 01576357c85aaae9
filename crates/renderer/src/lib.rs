//! Tile rendering: colormaps and PNG encoding.
//!
//! Values are mapped to palette indices through a [`Colormap`] and encoded as
//! indexed PNG, so equal value grids always produce equal bytes.

pub mod colormap;
pub mod png;
pub mod render;

pub use colormap::{Color, Colormap, Palette, UnknownColormap};
pub use render::{empty_tile, render_values};
