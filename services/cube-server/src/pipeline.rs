//! Tile computation.
//!
//! A tile request resolves to a [`TileKey`]; cache misses are computed on
//! the blocking pool: pick the pyramid level matching the tile's pixel size,
//! read the covering source window through the configured [`TileSource`],
//! sample it nearest-neighbour at pixel centres, mask missing values and
//! encode an indexed PNG.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use cube_common::{CubeError, CubeResult, StyleOverride, StyleSpec, TileCoord};
use cube_store::{CubeHandle, CubeLevel, CubeStoreError, VariableInfo, Window};
use metrics::{counter, histogram};
use renderer::{empty_tile, render_values, Colormap};
use tile_cache::TileCache;
use tracing::{debug, instrument};

use crate::config::{ServerConfig, TileMode};

/// Identity of a rendered tile.
///
/// `generation` changes when a dataset is reopened, so tiles of a replaced
/// cube never match.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TileKey {
    pub dataset: String,
    pub generation: u64,
    pub variable: String,
    pub time_index: u64,
    pub coord: TileCoord,
    pub style: (u64, u64, String),
}

/// Identity of one decoded chunk of one time step.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChunkKey {
    pub dataset: String,
    pub generation: u64,
    pub level: usize,
    pub variable: String,
    pub time_index: u64,
    pub chunk_row: u64,
    pub chunk_col: u64,
}

pub type EncodedTileCache = TileCache<TileKey, Bytes>;
pub type ChunkCache = TileCache<ChunkKey, Arc<Vec<f32>>>;

/// Where tile source values come from.
///
/// Every implementation must return the same values for the same window.
pub trait TileSource: Send + Sync {
    fn name(&self) -> &'static str;

    fn read_window(
        &self,
        handle: &CubeHandle,
        level: &CubeLevel,
        variable: &str,
        time_index: u64,
        window: Window,
    ) -> Result<Vec<f32>, CubeStoreError>;
}

/// Reads exactly the requested window from storage.
#[derive(Debug, Default, Clone, Copy)]
pub struct DirectRead;

impl TileSource for DirectRead {
    fn name(&self) -> &'static str {
        TileMode::DirectRead.as_str()
    }

    fn read_window(
        &self,
        _handle: &CubeHandle,
        level: &CubeLevel,
        variable: &str,
        time_index: u64,
        window: Window,
    ) -> Result<Vec<f32>, CubeStoreError> {
        level.reader.read_window(variable, time_index, window)
    }
}

/// Assembles windows from whole decoded chunks kept in a shared cache.
pub struct ChunkCached {
    chunks: Arc<ChunkCache>,
}

impl ChunkCached {
    pub fn new(chunks: Arc<ChunkCache>) -> Self {
        Self { chunks }
    }

    pub fn chunks(&self) -> &Arc<ChunkCache> {
        &self.chunks
    }

    fn chunk(
        &self,
        handle: &CubeHandle,
        level: &CubeLevel,
        variable: &str,
        time_index: u64,
        chunk_row: u64,
        chunk_col: u64,
    ) -> Result<(Window, Arc<Vec<f32>>), CubeStoreError> {
        let key = ChunkKey {
            dataset: handle.id().to_string(),
            generation: handle.generation(),
            level: level.index,
            variable: variable.to_string(),
            time_index,
            chunk_row,
            chunk_col,
        };
        if let Some(data) = self.chunks.get(&key) {
            let window = level.reader.chunk_window(variable, chunk_row, chunk_col)?;
            return Ok((window, data));
        }

        let (window, data) = level
            .reader
            .read_chunk(variable, time_index, chunk_row, chunk_col)?;
        let data = Arc::new(data);
        // Oversized chunks are still used, just not kept.
        let _ = self.chunks.insert(key, data.clone());
        Ok((window, data))
    }
}

impl TileSource for ChunkCached {
    fn name(&self) -> &'static str {
        TileMode::ChunkCached.as_str()
    }

    fn read_window(
        &self,
        handle: &CubeHandle,
        level: &CubeLevel,
        variable: &str,
        time_index: u64,
        window: Window,
    ) -> Result<Vec<f32>, CubeStoreError> {
        if window.is_empty() {
            return Ok(Vec::new());
        }
        let info = level
            .reader
            .variable(variable)
            .ok_or_else(|| CubeStoreError::VariableNotFound(variable.to_string()))?;
        let (height, width) = level.shape();
        if time_index >= level.reader.time_steps()
            || window.row_end() > height
            || window.col_end() > width
        {
            return Err(CubeStoreError::out_of_bounds(
                format!("t={} {}", time_index, window),
                format!("{}x{}x{}", level.reader.time_steps(), height, width),
            ));
        }

        let (chunk_h, chunk_w) = info.spatial_chunk();
        let mut out = vec![f32::NAN; window.len()];
        for chunk_row in window.row / chunk_h..=(window.row_end() - 1) / chunk_h {
            for chunk_col in window.col / chunk_w..=(window.col_end() - 1) / chunk_w {
                let (chunk, data) =
                    self.chunk(handle, level, variable, time_index, chunk_row, chunk_col)?;

                let row_start = window.row.max(chunk.row);
                let row_end = window.row_end().min(chunk.row_end());
                let col_start = window.col.max(chunk.col);
                let col_end = window.col_end().min(chunk.col_end());
                let run = (col_end - col_start) as usize;

                for row in row_start..row_end {
                    let src = ((row - chunk.row) * chunk.width + (col_start - chunk.col)) as usize;
                    let dst =
                        ((row - window.row) * window.width + (col_start - window.col)) as usize;
                    out[dst..dst + run].copy_from_slice(&data[src..src + run]);
                }
            }
        }
        Ok(out)
    }
}

/// Turns tile requests into PNG bytes, through the encoded tile cache.
pub struct TileComputationPipeline {
    tiles: Arc<EncodedTileCache>,
    chunks: Option<Arc<ChunkCache>>,
    source: Arc<dyn TileSource>,
    /// Highest closed generation per dataset. Tiles of these are not cached.
    closed: parking_lot::Mutex<HashMap<String, u64>>,
}

impl TileComputationPipeline {
    pub fn new(tiles: Arc<EncodedTileCache>, source: Arc<dyn TileSource>) -> Self {
        Self {
            tiles,
            chunks: None,
            source,
            closed: parking_lot::Mutex::new(HashMap::new()),
        }
    }

    /// Pipeline with caches sized and a source chosen by the configuration.
    pub fn from_config(config: &ServerConfig) -> Self {
        let tiles = Arc::new(TileCache::new("tiles", config.tile_cache_size));
        match config.tile_mode {
            TileMode::DirectRead => Self::new(tiles, Arc::new(DirectRead)),
            TileMode::ChunkCached => {
                let chunks = Arc::new(TileCache::new("chunks", config.chunk_cache_size));
                let mut pipeline = Self::new(tiles, Arc::new(ChunkCached::new(chunks.clone())));
                pipeline.chunks = Some(chunks);
                pipeline
            }
        }
    }

    pub fn tile_cache(&self) -> &Arc<EncodedTileCache> {
        &self.tiles
    }

    pub fn chunk_cache(&self) -> Option<&Arc<ChunkCache>> {
        self.chunks.as_ref()
    }

    pub fn source_name(&self) -> &'static str {
        self.source.name()
    }

    /// Drop cached tiles and chunks of a closed dataset handle. Renders of
    /// that handle still in flight are served but no longer cached.
    pub fn evict_dataset(&self, dataset: &str, generation: u64) {
        {
            let mut closed = self.closed.lock();
            let highest = closed.entry(dataset.to_string()).or_insert(generation);
            *highest = (*highest).max(generation);
        }
        let tiles = self
            .tiles
            .remove_where(|k| k.dataset == dataset && k.generation <= generation);
        let chunks = self.chunks.as_ref().map_or(0, |cache| {
            cache.remove_where(|k| k.dataset == dataset && k.generation <= generation)
        });
        if tiles + chunks > 0 {
            debug!(
                dataset = %dataset,
                generation = generation,
                tiles = tiles,
                chunks = chunks,
                "Evicted cached entries of closed dataset"
            );
        }
    }

    fn is_closed(&self, dataset: &str, generation: u64) -> bool {
        self.closed
            .lock()
            .get(dataset)
            .is_some_and(|&highest| generation <= highest)
    }

    /// Resolve the style of a tile: request, then dataset configuration,
    /// then variable metadata, then `(0, 1, viridis)`.
    pub fn resolve_style(
        info: &VariableInfo,
        request: &StyleOverride,
        configured: Option<&StyleOverride>,
    ) -> CubeResult<StyleSpec> {
        let metadata = metadata_style(info);
        let configured = configured.cloned().unwrap_or_default();
        let style = StyleSpec::resolve([request, &configured, &metadata])?;
        style
            .colormap
            .parse::<Colormap>()
            .map_err(|e| CubeError::invalid_parameter("cmap", e.to_string()))?;
        Ok(style)
    }

    /// Compute (or fetch) one tile as PNG bytes.
    #[instrument(skip_all, fields(dataset = %handle.id(), variable = %variable, level = coord.z, row = coord.row, col = coord.col))]
    pub async fn compute_tile(
        &self,
        handle: Arc<CubeHandle>,
        variable: &str,
        time_index: u64,
        coord: TileCoord,
        style: &StyleSpec,
    ) -> CubeResult<Bytes> {
        handle
            .variable(variable)
            .map_err(|e| e.into_cube_error(handle.id()))?;
        handle.tile_matrix_set().validate_coord(&coord)?;
        if time_index >= handle.time_steps() {
            return Err(CubeError::invalid_parameter(
                "Time",
                format!(
                    "time index {} out of range ({} step(s))",
                    time_index,
                    handle.time_steps()
                ),
            ));
        }
        let colormap: Colormap = style
            .colormap
            .parse()
            .map_err(|e: renderer::UnknownColormap| {
                CubeError::invalid_parameter("cmap", e.to_string())
            })?;

        let key = TileKey {
            dataset: handle.id().to_string(),
            generation: handle.generation(),
            variable: variable.to_string(),
            time_index,
            coord,
            style: style.cache_key(),
        };

        if let Some(bytes) = self.tiles.get(&key) {
            counter!("tile_cache_hits_total").increment(1);
            return Ok(bytes);
        }
        counter!("tile_cache_misses_total").increment(1);

        let started = Instant::now();
        let source = self.source.clone();
        let variable_name = variable.to_string();
        let style_spec = style.clone();
        let png = tokio::task::spawn_blocking(move || {
            render_tile(
                source.as_ref(),
                &handle,
                &variable_name,
                time_index,
                coord,
                &style_spec,
                colormap,
            )
        })
        .await
        .map_err(|e| CubeError::InternalError(format!("tile task failed: {}", e)))??;

        let elapsed = started.elapsed();
        histogram!("tile_render_duration_seconds", "mode" => self.source.name())
            .record(elapsed.as_secs_f64());
        debug!(
            bytes = png.len(),
            elapsed_ms = elapsed.as_millis() as u64,
            "Rendered tile"
        );

        let bytes = Bytes::from(png);
        if self.is_closed(&key.dataset, key.generation) {
            debug!(generation = key.generation, "Tile of closed handle served without caching");
        } else if let Err(e) = self.tiles.insert(key, bytes.clone()) {
            debug!(error = %e, "Tile served without caching");
        }
        Ok(bytes)
    }
}

/// Style hints from variable metadata. A value range is only taken when
/// both ends are present; unknown colormap names are ignored.
fn metadata_style(info: &VariableInfo) -> StyleOverride {
    let vmin = info.color_value_min.or(info.valid_min);
    let vmax = info.color_value_max.or(info.valid_max);
    let (vmin, vmax) = match (vmin, vmax) {
        (Some(lo), Some(hi)) if lo < hi => (Some(lo), Some(hi)),
        _ => (None, None),
    };
    let cmap = info
        .color_bar_name
        .as_ref()
        .filter(|name| name.parse::<Colormap>().is_ok())
        .cloned();
    StyleOverride { vmin, vmax, cmap }
}

/// Render a tile synchronously.
pub fn render_tile(
    source: &dyn TileSource,
    handle: &CubeHandle,
    variable: &str,
    time_index: u64,
    coord: TileCoord,
    style: &StyleSpec,
    colormap: Colormap,
) -> CubeResult<Vec<u8>> {
    let size = handle.tile_matrix_set().tile_size as usize;
    let png = match sample_tile(source, handle, variable, time_index, coord)? {
        Some(values) => render_values(
            &values,
            size,
            size,
            style.value_min as f32,
            style.value_max as f32,
            colormap,
        ),
        None => empty_tile(size),
    };
    png.map_err(CubeError::RenderError)
}

/// Source values of a tile, row-major with missing cells as NaN.
///
/// `None` when the tile does not touch the dataset.
pub fn sample_tile(
    source: &dyn TileSource,
    handle: &CubeHandle,
    variable: &str,
    time_index: u64,
    coord: TileCoord,
) -> CubeResult<Option<Vec<f32>>> {
    let tms = handle.tile_matrix_set();
    let tile_bbox = tms.tile_bbox(&coord)?;
    if !tile_bbox.intersects(handle.bbox()) {
        return Ok(None);
    }

    let size = tms.tile_size as usize;
    let pixel = tms.pixel_size(coord.z);
    let level = handle.level_for_resolution(pixel);
    let level_bbox = level.bbox();
    let (height, width) = level.shape();
    let (res_x, res_y) = level.reader.resolution();

    let cols: Vec<Option<u64>> = (0..size)
        .map(|i| {
            let lon = tile_bbox.min_x + (i as f64 + 0.5) * pixel;
            cell_index(lon - level_bbox.min_x, res_x, width)
        })
        .collect();
    let rows: Vec<Option<u64>> = (0..size)
        .map(|j| {
            let lat = tile_bbox.max_y - (j as f64 + 0.5) * pixel;
            cell_index(level_bbox.max_y - lat, res_y, height)
        })
        .collect();

    let to_cube_error = |e: CubeStoreError| e.into_cube_error(handle.id());
    let info = level
        .reader
        .variable(variable)
        .ok_or_else(|| CubeStoreError::VariableNotFound(variable.to_string()))
        .map_err(to_cube_error)?;
    let (chunk_h, chunk_w) = info.spatial_chunk();
    let row_runs = sample_runs(&rows, chunk_h);
    let col_runs = sample_runs(&cols, chunk_w);
    if row_runs.is_empty() || col_runs.is_empty() {
        return Ok(None);
    }
    let row_groups = group_by_run(&rows, &row_runs);
    let col_groups = group_by_run(&cols, &col_runs);

    // Only blocks of chunks holding a sample are read.
    let mut values = vec![f32::NAN; size * size];
    for (&(row0, row1), row_group) in row_runs.iter().zip(&row_groups) {
        for (&(col0, col1), col_group) in col_runs.iter().zip(&col_groups) {
            let window = Window::new(row0, col0, row1 - row0 + 1, col1 - col0 + 1);
            let data = source
                .read_window(handle, level, variable, time_index, window)
                .map_err(to_cube_error)?;
            for &(j, row) in row_group {
                let base = ((row - window.row) * window.width) as usize;
                for &(i, col) in col_group {
                    let value = data[base + (col - window.col) as usize];
                    if !info.is_missing(value) {
                        values[j * size + i] = value;
                    }
                }
            }
        }
    }
    Ok(Some(values))
}

fn cell_index(offset: f64, resolution: f64, count: u64) -> Option<u64> {
    let index = (offset / resolution).floor();
    (index >= 0.0 && index < count as f64).then_some(index as u64)
}

/// Inclusive index ranges covering the sampled cells. A range is split
/// wherever a whole chunk between two samples holds none.
fn sample_runs(indices: &[Option<u64>], chunk: u64) -> Vec<(u64, u64)> {
    let mut sorted: Vec<u64> = indices.iter().flatten().copied().collect();
    sorted.sort_unstable();
    sorted.dedup();

    let chunk = chunk.max(1);
    let mut runs: Vec<(u64, u64)> = Vec::new();
    for index in sorted {
        match runs.last_mut() {
            Some((_, hi)) if index / chunk <= *hi / chunk + 1 => *hi = index,
            _ => runs.push((index, index)),
        }
    }
    runs
}

/// Tile positions of the sampled cells, per run.
fn group_by_run(indices: &[Option<u64>], runs: &[(u64, u64)]) -> Vec<Vec<(usize, u64)>> {
    let mut groups = vec![Vec::new(); runs.len()];
    for (pos, index) in indices.iter().enumerate() {
        let Some(index) = *index else { continue };
        let run = runs.partition_point(|&(_, hi)| hi < index);
        groups[run].push((pos, index));
    }
    groups
}
