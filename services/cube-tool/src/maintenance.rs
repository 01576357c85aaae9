//! Pyramid generation and pruning reports.

use std::path::{Path, PathBuf};

use comfy_table::{modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL, Table};
use cube_store::{
    DownsampleMethod, LevelsConfig, LevelsReport, PruneReport, PyramidLevelGenerator, TileShape,
};
use tracing::debug;

/// Options of the `level` command.
#[derive(Debug, Clone)]
pub struct LevelArgs {
    pub input: PathBuf,
    pub output: Option<PathBuf>,
    pub link: bool,
    /// `None` takes the input's spatial chunking.
    pub tile_size: Option<TileShape>,
    pub num_levels_max: Option<u32>,
    pub method: String,
}

impl LevelArgs {
    pub fn levels_config(&self) -> anyhow::Result<LevelsConfig> {
        let method = DownsampleMethod::parse(&self.method).ok_or_else(|| {
            anyhow::anyhow!(
                "unknown downsample method '{}', expected mean, max or nearest",
                self.method
            )
        })?;
        if self.num_levels_max == Some(0) {
            anyhow::bail!("<num-levels-max> must be a positive integer");
        }
        if let Some(tile) = self.tile_size {
            if tile.width == 0 || tile.height == 0 {
                anyhow::bail!("<tile-size> must be positive integers");
            }
        }
        Ok(LevelsConfig {
            tile_size: self.tile_size,
            max_levels: self.num_levels_max,
            link_input: self.link,
            method,
            ..Default::default()
        })
    }
}

pub fn run_level(args: &LevelArgs) -> anyhow::Result<LevelsReport> {
    let config = args.levels_config()?;
    debug!(
        input = %args.input.display(),
        tile_size = ?config.tile_size,
        max_levels = ?config.max_levels,
        link = config.link_input,
        method = config.method.as_str(),
        "Generating levels"
    );
    let generator = PyramidLevelGenerator::new(config)?;
    let report = generator.generate(&args.input, args.output.as_deref())?;
    Ok(report)
}

pub fn run_prune(cube: &Path, dry_run: bool) -> anyhow::Result<PruneReport> {
    Ok(cube_store::prune_cube(cube, dry_run)?)
}

fn new_table(header: Vec<&str>) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_header(header);
    table
}

pub fn levels_table(report: &LevelsReport) -> Table {
    let mut table = new_table(vec!["LEVEL", "HEIGHT", "WIDTH", "STORAGE"]);
    for level in &report.levels {
        let storage = if level.index == 0 && report.linked {
            "link"
        } else {
            "zarr"
        };
        table.add_row(vec![
            level.index.to_string(),
            level.height.to_string(),
            level.width.to_string(),
            storage.to_string(),
        ]);
    }
    table
}

pub fn prune_table(report: &PruneReport) -> Table {
    let mut table = new_table(vec!["VARIABLE", "SCANNED", "DELETED", "KEPT", "MISSING"]);
    for v in &report.variables {
        table.add_row(vec![
            v.variable.clone(),
            v.scanned.to_string(),
            v.deleted.to_string(),
            v.kept.to_string(),
            v.missing.to_string(),
        ]);
    }
    table
}

/// Final line of the `level` command.
pub fn levels_summary(report: &LevelsReport) -> String {
    format!(
        "{} level(s) of {}x{} tiles written into {}",
        report.levels.len(),
        report.tile_size.width,
        report.tile_size.height,
        report.output.display()
    )
}

/// Final line of the `prune` command.
pub fn prune_summary(report: &PruneReport) -> String {
    if report.dry_run {
        format!(
            "Dry run, {} block file(s) would be deleted",
            report.deleted()
        )
    } else {
        format!("Done, {} block file(s) deleted", report.deleted())
    }
}
