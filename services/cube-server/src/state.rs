//! Application state shared across handlers.

use std::sync::Arc;

use tracing::info;

use crate::capabilities_cache::CapabilitiesCache;
use crate::config::ServerConfig;
use crate::metrics::MetricsCollector;
use crate::pipeline::TileComputationPipeline;
use crate::registry::{CubeOpener, DatasetRegistry, ZarrOpener};

/// Shared application state.
pub struct AppState {
    pub config: ServerConfig,
    pub registry: Arc<DatasetRegistry>,
    pub pipeline: Arc<TileComputationPipeline>,
    pub capabilities: CapabilitiesCache,
    pub metrics: Arc<MetricsCollector>,
}

impl AppState {
    /// State serving the configured datasets from disk.
    pub fn new(config: ServerConfig) -> Self {
        let opener = Arc::new(ZarrOpener {
            tile_size: config.tile_size,
        });
        Self::with_opener(config, opener)
    }

    /// State with a custom way of opening datasets.
    pub fn with_opener(config: ServerConfig, opener: Arc<dyn CubeOpener>) -> Self {
        let registry = Arc::new(DatasetRegistry::new(
            config.datasets.clone(),
            config.registry_config(),
            opener,
        ));
        let pipeline = Arc::new(TileComputationPipeline::from_config(&config));

        let evict = pipeline.clone();
        registry.on_close(Arc::new(move |dataset: &str, generation: u64| {
            evict.evict_dataset(dataset, generation)
        }));

        info!(
            datasets = config.datasets.len(),
            tile_mode = %config.tile_mode,
            tile_cache = %config.tile_cache_size,
            chunk_cache = %config.chunk_cache_size,
            "Application state initialized"
        );

        Self {
            capabilities: CapabilitiesCache::new(config.capabilities_ttl_secs),
            config,
            registry,
            pipeline,
            metrics: Arc::new(MetricsCollector::new()),
        }
    }
}
