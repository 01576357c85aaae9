//! OGC WMTS 1.0.0 protocol layer for data cube tiles.
//!
//! Requests arrive through two bindings, KVP (`Service=WMTS&Request=...`)
//! and RESTful paths, and are parsed into the same typed [`TileRequest`].
//! Everything here is checked without touching a dataset; checks that need
//! cube metadata belong to the server.

pub mod capabilities;
pub mod exception;
pub mod format;
pub mod kvp;
pub mod params;
pub mod request;
pub mod rest;

pub use capabilities::{CapabilitiesBuilder, LayerInfo, StyleInfo};
pub use exception::{error_report, exception_report};
pub use format::ImageFormat;
pub use kvp::{parse_kvp, WMTS_VERSION};
pub use params::Params;
pub use request::{
    parse_tile_coord, parse_tile_options, FeatureInfoRequest, LayerId, TileRequest, WmtsRequest,
};
pub use rest::{parse_path_tile, parse_wmts_rest_tile, split_extension};
