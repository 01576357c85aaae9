//! Multi-resolution pyramid generation.
//!
//! A pyramid is a directory `<name>.levels/` holding one cube per level:
//! `0.zarr` is the base resolution (or `0.link`, a text file naming an
//! existing cube), and every `k.zarr` halves the spatial shape of
//! `(k-1).zarr`, rounding up. Levels are written to `k.zarr.partial` and
//! renamed when complete, so readers never see a half-written level.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

use serde::Serialize;
use tracing::{info, warn};

use crate::config::{LevelsConfig, TileShape, DEFAULT_LEVEL_TILE_SIZE};
use crate::downsample::{downsample_2x, halved_shape};
use crate::elements::CubeArray;
use crate::error::{CubeStoreError, Result};
use crate::handle::{is_pyramid, level_dir_name, LINK_FILE};
use crate::reader::CubeReader;
use crate::types::{CubeMetadata, VariableInfo};
use crate::writer::{CubeWriter, VariableSpec};
use cube_common::BoundingBox;

const PARTIAL_SUFFIX: &str = ".partial";

/// Shape of one generated level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LevelShape {
    pub index: usize,
    pub height: u64,
    pub width: u64,
}

/// Outcome of a pyramid generation.
#[derive(Debug, Clone, Serialize)]
pub struct LevelsReport {
    pub output: PathBuf,
    pub linked: bool,
    pub tile_size: TileShape,
    pub levels: Vec<LevelShape>,
}

/// Default output for `input`: `<input stem>.levels` next to the input.
pub fn default_output(input: &Path) -> PathBuf {
    let stem = input
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("cube");
    let parent = input.parent().unwrap_or_else(|| Path::new("."));
    parent.join(format!("{}.levels", stem))
}

/// Spatial shapes of all levels, finest first.
///
/// Halving continues while both halved dimensions stay at or above the
/// tile shape, and stops at `max_levels` levels.
pub fn level_shapes(
    height: u64,
    width: u64,
    tile: TileShape,
    max_levels: Option<u32>,
) -> Vec<(u64, u64)> {
    let mut shapes = vec![(height, width)];
    loop {
        if let Some(max) = max_levels {
            if shapes.len() >= max as usize {
                break;
            }
        }
        let (h, w) = shapes[shapes.len() - 1];
        let (nh, nw) = halved_shape(h as usize, w as usize);
        let (nh, nw) = (nh as u64, nw as u64);
        if nh < tile.height || nw < tile.width || (nh, nw) == (h, w) {
            break;
        }
        shapes.push((nh, nw));
    }
    shapes
}

/// Tile shape taken from the spatial chunking of the input's first
/// variable. An input stored as a single spatial chunk counts as unchunked.
pub fn input_tile_shape(reader: &CubeReader) -> TileShape {
    let (height, width) = reader.shape();
    match reader.variables().next().map(VariableInfo::spatial_chunk) {
        Some((chunk_h, chunk_w)) if chunk_h < height || chunk_w < width => {
            TileShape::new(chunk_w, chunk_h)
        }
        _ => TileShape::square(DEFAULT_LEVEL_TILE_SIZE),
    }
}

/// Generates `.levels` pyramids from a single cube.
pub struct PyramidLevelGenerator {
    config: LevelsConfig,
}

struct LevelOutput {
    index: usize,
    height: u64,
    width: u64,
    partial: PathBuf,
    target: PathBuf,
    writer: CubeWriter,
}

impl PyramidLevelGenerator {
    pub fn new(config: LevelsConfig) -> Result<Self> {
        config.validate().map_err(CubeStoreError::ConfigError)?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &LevelsConfig {
        &self.config
    }

    /// Generate the pyramid of `input` into `output` (default `<stem>.levels`).
    ///
    /// Fails if the output exists. On failure the output directory is removed.
    pub fn generate(&self, input: &Path, output: Option<&Path>) -> Result<LevelsReport> {
        if is_pyramid(input) {
            return Err(CubeStoreError::ConfigError(format!(
                "{} is already a pyramid",
                input.display()
            )));
        }
        let reader = CubeReader::open(input)?;

        let output = output
            .map(Path::to_path_buf)
            .unwrap_or_else(|| default_output(input));
        if output.exists() {
            return Err(CubeStoreError::OutputExists(output));
        }

        fs::create_dir_all(&output)?;
        match self.generate_into(&reader, input, &output) {
            Ok(report) => Ok(report),
            Err(err) => {
                if let Err(cleanup) = fs::remove_dir_all(&output) {
                    warn!(
                        output = %output.display(),
                        error = %cleanup,
                        "Failed to remove incomplete pyramid"
                    );
                }
                Err(err)
            }
        }
    }

    fn generate_into(&self, reader: &CubeReader, input: &Path, output: &Path) -> Result<LevelsReport> {
        let start = Instant::now();
        let (height, width) = reader.shape();
        let tile = self
            .config
            .tile_size
            .unwrap_or_else(|| input_tile_shape(reader));
        let shapes = level_shapes(height, width, tile, self.config.max_levels);
        let linked = self.config.link_input;

        info!(
            input = %input.display(),
            output = %output.display(),
            tile_width = tile.width,
            tile_height = tile.height,
            levels = shapes.len(),
            linked = linked,
            method = self.config.method.as_str(),
            "Generating pyramid levels"
        );

        if linked {
            let target = fs::canonicalize(input)?;
            fs::write(output.join(LINK_FILE), target.to_string_lossy().as_bytes())?;
        }

        let first_written = if linked { 1 } else { 0 };
        let mut outputs = Vec::new();
        for (index, &(h, w)) in shapes.iter().enumerate().skip(first_written) {
            let metadata = level_metadata(reader.metadata(), index, h, w, height, width);
            let target = output.join(level_dir_name(index));
            let partial = output.join(format!("{}{}", level_dir_name(index), PARTIAL_SUFFIX));
            let writer = CubeWriter::create(&partial, &metadata, self.config.write)?;
            outputs.push(LevelOutput {
                index,
                height: h,
                width: w,
                partial,
                target,
                writer,
            });
        }

        let variables: Vec<VariableInfo> = reader.variables().cloned().collect();
        for info in &variables {
            self.write_variable(reader, info, tile, &outputs)?;
        }

        for out in &outputs {
            fs::rename(&out.partial, &out.target)?;
            info!(
                level = out.index,
                height = out.height,
                width = out.width,
                "Level complete"
            );
        }

        info!(
            levels = shapes.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Pyramid generation complete"
        );

        Ok(LevelsReport {
            output: output.to_path_buf(),
            linked,
            tile_size: tile,
            levels: shapes
                .iter()
                .enumerate()
                .map(|(index, &(height, width))| LevelShape {
                    index,
                    height,
                    width,
                })
                .collect(),
        })
    }

    /// Downsample every time step of one variable through all levels.
    fn write_variable(
        &self,
        reader: &CubeReader,
        info: &VariableInfo,
        tile: TileShape,
        outputs: &[LevelOutput],
    ) -> Result<()> {
        let two_dimensional = info.shape.len() == 2;

        let arrays: Vec<CubeArray> = outputs
            .iter()
            .map(|out| {
                let mut spec = VariableSpec::new(
                    info.name.clone(),
                    info.time_steps(),
                    out.height,
                    out.width,
                    f32::NAN,
                )
                .with_chunk(tile.height, tile.width)
                .with_attributes(info.to_attributes());
                if two_dimensional {
                    spec = spec.two_dimensional();
                }
                out.writer.create_variable(&spec)
            })
            .collect::<Result<_>>()?;

        let (height, width) = reader.shape();
        for t in 0..info.time_steps() {
            let mut data = reader.read_time_step(&info.name, t)?;
            mask_fill_values(info, &mut data);
            let (mut w, mut h) = (width as usize, height as usize);
            let mut level = 0;

            for (out, array) in outputs.iter().zip(&arrays) {
                while level < out.index {
                    let (next, nw, nh) = downsample_2x(&data, w, h, self.config.method);
                    data = next;
                    w = nw;
                    h = nh;
                    level += 1;
                }
                CubeWriter::write_time_step(array, t, h as u64, w as u64, &data)?;
            }
        }
        Ok(())
    }
}

/// Replace Zarr and CF fill values with NaN.
fn mask_fill_values(info: &VariableInfo, data: &mut [f32]) {
    let fill = info.fill_value as f32;
    let missing = info.missing_value.map(|v| v as f32);
    for v in data.iter_mut() {
        if *v == fill || Some(*v) == missing {
            *v = f32::NAN;
        }
    }
}

/// Root metadata of level `index`: the base extent anchored at its top-left
/// corner, with cells `2^index` times larger.
fn level_metadata(
    base: &CubeMetadata,
    index: usize,
    height: u64,
    width: u64,
    base_height: u64,
    base_width: u64,
) -> CubeMetadata {
    let scale = (1u64 << index) as f64;
    let res_x = base.bbox.width() / base_width as f64 * scale;
    let res_y = base.bbox.height() / base_height as f64 * scale;
    let bbox = if index == 0 {
        base.bbox
    } else {
        BoundingBox::new(
            base.bbox.min_x,
            base.bbox.max_y - height as f64 * res_y,
            base.bbox.min_x + width as f64 * res_x,
            base.bbox.max_y,
        )
    };

    CubeMetadata {
        title: base.title.clone(),
        bbox,
        times: base.times.clone(),
        grid: if index == 0 { base.grid } else { None },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_shapes() {
        let tile = TileShape::square(512);
        assert_eq!(
            level_shapes(2048, 4096, tile, None),
            vec![(2048, 4096), (1024, 2048), (512, 1024)]
        );
        assert_eq!(level_shapes(2048, 4096, tile, Some(2)).len(), 2);
        assert_eq!(level_shapes(100, 100, tile, None), vec![(100, 100)]);
    }

    #[test]
    fn test_level_shapes_round_up() {
        assert_eq!(
            level_shapes(5, 9, TileShape::square(2), None),
            vec![(5, 9), (3, 5), (2, 3)]
        );
    }

    #[test]
    fn test_level_shapes_with_rectangular_tiles() {
        // Width limits first: 4096 -> 2048 -> 1024 stays >= 1024, 512 does not.
        assert_eq!(
            level_shapes(2048, 4096, TileShape::new(1024, 256), None),
            vec![(2048, 4096), (1024, 2048), (512, 1024)]
        );
        assert_eq!(
            level_shapes(2048, 4096, TileShape::new(256, 1024), None),
            vec![(2048, 4096), (1024, 2048)]
        );
    }

    #[test]
    fn test_default_output() {
        assert_eq!(
            default_output(Path::new("/data/cube.zarr")),
            PathBuf::from("/data/cube.levels")
        );
    }
}
