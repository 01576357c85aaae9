//! HTTP request handlers.
//!
//! - `wmts`: GetCapabilities, GetTile, GetFeatureInfo (KVP, REST, path tiles)
//! - `datasets`: dataset catalog, coordinates and legends
//! - `timeseries`: point, geometry and geometry collection time series
//! - `maintenance`: closing datasets on demand
//! - `metrics`: health and Prometheus metrics
//! - `common`: error and image responses

pub mod common;
pub mod datasets;
pub mod maintenance;
pub mod metrics;
pub mod timeseries;
pub mod wmts;

pub use datasets::{
    dataset_coords_handler, dataset_details_handler, legend_handler, list_datasets_handler,
};
pub use maintenance::maintenance_handler;
pub use metrics::{api_metrics_handler, health_handler, metrics_handler};
pub use timeseries::{
    geometries_timeseries_handler, geometry_timeseries_handler, point_timeseries_handler,
};
pub use wmts::{
    path_tile_handler, wmts_capabilities_handler, wmts_feature_info_handler, wmts_kvp_handler,
    wmts_rest_tile_handler,
};
