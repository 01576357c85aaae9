//! Zarr V3 data cube storage.
//!
//! A cube is a Zarr group whose attributes carry the title, bounding box,
//! time coordinates and optional fixed Earth grid, with one
//! `[time, lat, lon]` array per variable, rows ordered north to south.
//!
//! ```text
//! cube.zarr/
//!   zarr.json            group: title, bbox, time, grid
//!   chl/zarr.json        array: units, valid_min, valid_max, ...
//!   chl/c/0/0/0          chunks
//!   chl_stdev/...        optional uncertainty companion
//!
//! cube.levels/
//!   0.zarr | 0.link      finest level, or a link to the original cube
//!   1.zarr               half resolution
//!   2.zarr               ...
//! ```
//!
//! [`CubeHandle`] opens either layout; [`PyramidLevelGenerator`] and
//! [`prune_cube`] are offline maintenance operations.

pub mod config;
pub mod downsample;
pub mod elements;
pub mod error;
pub mod handle;
pub mod levels;
pub mod prune;
pub mod reader;
pub mod types;
pub mod writer;

pub use config::{
    LevelsConfig, TileShape, WriteOptions, ZarrCompression, DEFAULT_LEVEL_TILE_SIZE,
};
pub use downsample::{downsample_2x, DownsampleMethod};
pub use error::{CubeStoreError, Result};
pub use handle::{is_pyramid, CubeHandle, CubeLevel};
pub use levels::{
    default_output, input_tile_shape, level_shapes, LevelShape, LevelsReport,
    PyramidLevelGenerator,
};
pub use prune::{prune_cube, PruneReport, VariablePruneReport};
pub use reader::{discover_variables, CubeReader};
pub use types::{parse_time, CubeMetadata, VariableInfo, Window, STDEV_SUFFIX};
pub use writer::{CubeElement, CubeWriter, VariableSpec};
