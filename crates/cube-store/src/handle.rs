//! Opened datasets: a cube, or a pyramid of cubes at decreasing resolution.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use cube_common::{BoundingBox, TileMatrixSet};
use tracing::debug;

use crate::error::{CubeStoreError, Result};
use crate::reader::CubeReader;
use crate::types::{CubeMetadata, VariableInfo};

/// File naming a linked level 0 inside a `.levels` directory.
pub const LINK_FILE: &str = "0.link";

/// Directory name of pyramid level `index` (0 = finest).
pub fn level_dir_name(index: usize) -> String {
    format!("{}.zarr", index)
}

/// One resolution level of a dataset.
#[derive(Debug)]
pub struct CubeLevel {
    /// Storage index: number of halvings from the base (0 = finest).
    pub index: usize,
    pub reader: CubeReader,
}

impl CubeLevel {
    /// Cell height in degrees.
    pub fn resolution(&self) -> f64 {
        self.reader.resolution().1
    }

    pub fn shape(&self) -> (u64, u64) {
        self.reader.shape()
    }

    pub fn bbox(&self) -> &BoundingBox {
        &self.reader.metadata().bbox
    }
}

/// An opened dataset.
///
/// Levels are ordered coarsest first; a plain cube has a single level.
#[derive(Debug)]
pub struct CubeHandle {
    id: String,
    path: PathBuf,
    generation: u64,
    linked: bool,
    levels: Vec<CubeLevel>,
    tile_matrix_set: TileMatrixSet,
}

impl CubeHandle {
    /// Open a cube directory or a `.levels` pyramid.
    ///
    /// Without a `grid` attribute the tile matrix set uses tiles of
    /// `tile_size` pixels and enough levels to reach the finest resolution.
    pub fn open(id: &str, path: impl AsRef<Path>, tile_size: u32) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if !path.exists() {
            return Err(CubeStoreError::NotFound(path));
        }

        let (mut levels, linked) = if is_pyramid(&path) {
            open_pyramid(&path)?
        } else {
            (
                vec![CubeLevel {
                    index: 0,
                    reader: CubeReader::open(&path)?,
                }],
                false,
            )
        };
        // Storage order is finest first
        levels.reverse();

        let finest = levels
            .last()
            .ok_or_else(|| CubeStoreError::invalid_metadata("pyramid has no levels"))?;
        let tile_matrix_set = match &finest.reader.metadata().grid {
            Some(grid) => TileMatrixSet::from_grid_spec(id, grid),
            None => TileMatrixSet::for_resolution(id, tile_size, finest.resolution()),
        }
        .map_err(|e| CubeStoreError::invalid_metadata(e.to_string()))?;

        debug!(
            dataset = %id,
            path = %path.display(),
            levels = levels.len(),
            linked = linked,
            tile_matrix_set = %tile_matrix_set.identifier,
            "Opened cube"
        );

        Ok(Self {
            id: id.to_string(),
            path,
            generation: 0,
            linked,
            levels,
            tile_matrix_set,
        })
    }

    pub fn with_generation(mut self, generation: u64) -> Self {
        self.generation = generation;
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Open generation; a reopened dataset gets a new one.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Whether level 0 is a link to an existing cube rather than a copy.
    pub fn linked(&self) -> bool {
        self.linked
    }

    /// Levels, coarsest first.
    pub fn levels(&self) -> &[CubeLevel] {
        &self.levels
    }

    pub fn finest(&self) -> &CubeLevel {
        // `open` guarantees at least one level
        &self.levels[self.levels.len() - 1]
    }

    pub fn metadata(&self) -> &CubeMetadata {
        self.finest().reader.metadata()
    }

    pub fn bbox(&self) -> &BoundingBox {
        &self.metadata().bbox
    }

    pub fn times(&self) -> &[DateTime<Utc>] {
        &self.metadata().times
    }

    pub fn time_steps(&self) -> u64 {
        self.finest().reader.time_steps()
    }

    pub fn variables(&self) -> impl Iterator<Item = &VariableInfo> {
        self.finest().reader.variables()
    }

    pub fn variable(&self, name: &str) -> Result<&VariableInfo> {
        self.finest()
            .reader
            .variable(name)
            .ok_or_else(|| CubeStoreError::VariableNotFound(name.to_string()))
    }

    pub fn tile_matrix_set(&self) -> &TileMatrixSet {
        &self.tile_matrix_set
    }

    /// The coarsest level at least as fine as `pixel_size` degrees, or the
    /// finest level if none is.
    pub fn level_for_resolution(&self, pixel_size: f64) -> &CubeLevel {
        self.levels
            .iter()
            .find(|level| level.resolution() <= pixel_size * (1.0 + 1e-9))
            .unwrap_or_else(|| self.finest())
    }

    /// Index of the time step nearest to `time`; the last step when `None`.
    pub fn time_index(&self, time: Option<DateTime<Utc>>) -> u64 {
        let last = self.time_steps().saturating_sub(1);
        let Some(time) = time else {
            return last;
        };
        self.times()
            .iter()
            .enumerate()
            .min_by_key(|(_, t)| (**t - time).num_milliseconds().unsigned_abs())
            .map(|(i, _)| i as u64)
            .unwrap_or(last)
    }
}

/// Whether `path` is a `.levels` pyramid directory.
pub fn is_pyramid(path: &Path) -> bool {
    path.join(level_dir_name(0)).is_dir() || path.join(LINK_FILE).is_file()
}

/// Resolve the cube a `0.link` file points to, relative to the pyramid directory.
pub fn read_link(levels_dir: &Path) -> Result<PathBuf> {
    let text = fs::read_to_string(levels_dir.join(LINK_FILE))?;
    let target = PathBuf::from(text.trim());
    if target.as_os_str().is_empty() {
        return Err(CubeStoreError::invalid_metadata(format!(
            "empty {} in {}",
            LINK_FILE,
            levels_dir.display()
        )));
    }
    Ok(if target.is_absolute() {
        target
    } else {
        levels_dir.join(target)
    })
}

/// Open levels in storage order (finest first).
fn open_pyramid(path: &Path) -> Result<(Vec<CubeLevel>, bool)> {
    let level0 = path.join(level_dir_name(0));
    let (base, linked) = if level0.is_dir() {
        (level0, false)
    } else {
        (read_link(path)?, true)
    };

    let mut levels = vec![CubeLevel {
        index: 0,
        reader: CubeReader::open(&base)?,
    }];

    let mut index = 1;
    loop {
        let dir = path.join(level_dir_name(index));
        if !dir.is_dir() {
            break;
        }
        levels.push(CubeLevel {
            index,
            reader: CubeReader::open(&dir)?,
        });
        index += 1;
    }

    Ok((levels, linked))
}
