//! Removal of chunks holding only the fill value.
//!
//! A chunk that is absent from storage reads back as the array's fill
//! value, so deleting a stored chunk whose elements all equal the fill
//! value leaves the logical content of the array unchanged.

use std::path::Path;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info};
use zarrs::array::Array;
use zarrs_filesystem::FilesystemStore;

use crate::elements::{fill_value_f64, retrieve_chunk_f64_if_exists, same_value, CubeArray};
use crate::error::{CubeStoreError, Result};
use crate::handle::{is_pyramid, level_dir_name};
use crate::reader::discover_variables;

/// Per-variable pruning counts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct VariablePruneReport {
    pub variable: String,
    /// Chunk positions visited.
    pub scanned: u64,
    /// Chunks present in storage that hold only the fill value.
    pub deleted: u64,
    /// Chunks present in storage with at least one other value.
    pub kept: u64,
    /// Chunk positions with nothing stored.
    pub missing: u64,
}

/// Outcome of pruning a cube.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PruneReport {
    pub dry_run: bool,
    pub variables: Vec<VariablePruneReport>,
}

impl PruneReport {
    pub fn scanned(&self) -> u64 {
        self.variables.iter().map(|v| v.scanned).sum()
    }

    pub fn deleted(&self) -> u64 {
        self.variables.iter().map(|v| v.deleted).sum()
    }

    pub fn kept(&self) -> u64 {
        self.variables.iter().map(|v| v.kept).sum()
    }
}

/// Prune a cube, or every stored level of a `.levels` pyramid.
///
/// With `dry_run` nothing is deleted; the report counts what would be.
pub fn prune_cube(path: &Path, dry_run: bool) -> Result<PruneReport> {
    if !path.is_dir() {
        return Err(CubeStoreError::NotFound(path.to_path_buf()));
    }

    let mut report = PruneReport {
        dry_run,
        variables: Vec::new(),
    };

    if is_pyramid(path) {
        // A linked level 0 belongs to another cube and is left alone.
        let mut index = 0;
        loop {
            let dir = path.join(level_dir_name(index));
            if dir.is_dir() {
                let level = prune_single(&dir, dry_run)?;
                report
                    .variables
                    .extend(level.variables.into_iter().map(|mut v| {
                        v.variable = format!("{}/{}", level_dir_name(index), v.variable);
                        v
                    }));
            } else if index > 0 {
                break;
            }
            index += 1;
        }
    } else {
        report = prune_single(path, dry_run)?;
    }

    info!(
        path = %path.display(),
        dry_run = dry_run,
        scanned = report.scanned(),
        deleted = report.deleted(),
        kept = report.kept(),
        "Prune complete"
    );
    Ok(report)
}

fn prune_single(path: &Path, dry_run: bool) -> Result<PruneReport> {
    let store = Arc::new(FilesystemStore::new(path).map_err(CubeStoreError::storage_error)?);
    let mut variables = Vec::new();

    for name in discover_variables(path)? {
        let array = Array::open(store.clone(), &format!("/{}", name))
            .map_err(CubeStoreError::zarr_error)?;
        variables.push(prune_array(&name, &array, dry_run)?);
    }

    Ok(PruneReport { dry_run, variables })
}

/// Prune one array, visiting every chunk position of its chunk grid.
pub fn prune_array(name: &str, array: &CubeArray, dry_run: bool) -> Result<VariablePruneReport> {
    let fill = fill_value_f64(array)?;
    let grid = chunk_grid_shape(array)?;
    let mut report = VariablePruneReport {
        variable: name.to_string(),
        ..Default::default()
    };

    for indices in ChunkIndices::new(grid) {
        report.scanned += 1;
        let Some(values) = retrieve_chunk_f64_if_exists(array, &indices)? else {
            report.missing += 1;
            continue;
        };

        if values.iter().all(|&v| same_value(v, fill)) {
            if !dry_run {
                array
                    .erase_chunk(&indices)
                    .map_err(CubeStoreError::storage_error)?;
            }
            debug!(variable = %name, chunk = ?indices, dry_run = dry_run, "Fill-only chunk");
            report.deleted += 1;
        } else {
            report.kept += 1;
        }
    }

    Ok(report)
}

/// Number of chunks along each dimension.
fn chunk_grid_shape(array: &CubeArray) -> Result<Vec<u64>> {
    let shape = array.shape();
    let origin = vec![0u64; shape.len()];
    let chunk_shape = array
        .chunk_grid()
        .chunk_shape(&origin, shape)
        .map_err(|e| CubeStoreError::invalid_metadata(e.to_string()))?
        .ok_or_else(|| CubeStoreError::invalid_metadata("missing chunk shape"))?;

    Ok(shape
        .iter()
        .zip(chunk_shape.iter())
        .map(|(&n, c)| n.div_ceil(c.get()))
        .collect())
}

/// Row-major iteration over all chunk indices of a grid.
struct ChunkIndices {
    grid: Vec<u64>,
    next: Option<Vec<u64>>,
}

impl ChunkIndices {
    fn new(grid: Vec<u64>) -> Self {
        let next = if grid.iter().all(|&n| n > 0) {
            Some(vec![0; grid.len()])
        } else {
            None
        };
        Self { grid, next }
    }
}

impl Iterator for ChunkIndices {
    type Item = Vec<u64>;

    fn next(&mut self) -> Option<Vec<u64>> {
        let current = self.next.take()?;
        let mut following = current.clone();
        for dim in (0..following.len()).rev() {
            following[dim] += 1;
            if following[dim] < self.grid[dim] {
                self.next = Some(following);
                break;
            }
            following[dim] = 0;
        }
        Some(current)
    }
}
