//! Common types shared across the cube tile server crates and services.
//!
//! Nothing in here performs I/O: the grid resolver, bounding box math and
//! tile matrix geometry are pure functions so that offline tools and the
//! request path agree on exactly the same numbers.

pub mod bbox;
pub mod error;
pub mod grid;
pub mod style;
pub mod tile;

pub use bbox::BoundingBox;
pub use error::{CubeError, CubeResult};
pub use grid::{
    adjust_bbox, find_grid_specs, list_levels, GridCandidate, GridSpec, LevelInfo, Resolution,
    ResolutionSearch, ResolutionUnit, METERS_PER_DEGREE,
};
pub use style::{StyleOverride, StyleSpec, DEFAULT_COLORMAP};
pub use tile::{TileCoord, TileMatrix, TileMatrixSet, MAX_TILE_MATRIX};
