//! Command line utilities for data cubes.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::{Parser, Subcommand};
use cube_common::{
    adjust_bbox, find_grid_specs, list_levels, BoundingBox, Resolution, ResolutionSearch,
};
use cube_store::TileShape;
use cube_tool::grid::{self, SortKey};
use cube_tool::maintenance::{self, LevelArgs};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "cube-tool")]
#[command(about = "Fixed Earth grids, pyramid levels and chunk pruning for data cubes", long_about = None)]
struct Cli {
    /// Print reports as JSON instead of tables
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fixed Earth grid calculations
    Grid {
        #[command(subcommand)]
        command: GridCommands,
    },

    /// Generate multi-resolution levels
    ///
    /// Every level halves the spatial resolution of the one before it.
    Level {
        /// Input cube
        input: PathBuf,

        /// Output directory, "<input>.levels" if omitted
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Link the input as level 0 instead of converting it
        #[arg(short, long)]
        link: bool,

        /// Spatial tile size as SIZE or WIDTH,HEIGHT; levels stop once a
        /// dimension falls below it. Defaults to the input's spatial chunking,
        /// or 512 if the input is a single chunk.
        #[arg(short, long, value_parser = TileShape::parse)]
        tile_size: Option<TileShape>,

        /// Maximum number of levels to generate
        #[arg(short = 'n', long)]
        num_levels_max: Option<u32>,

        /// Downsampling method: mean, max or nearest
        #[arg(long, default_value = "mean")]
        method: String,
    },

    /// Delete chunks holding only the fill value
    Prune {
        /// Cube or levels directory
        cube: PathBuf,

        /// Count what would be deleted without deleting anything
        #[arg(long)]
        dry_run: bool,
    },
}

#[derive(Subcommand)]
enum GridCommands {
    /// Find grids close to a target resolution, e.g. "300m" or "0.0027deg"
    Res {
        target: String,

        /// Maximum deviation in percent
        #[arg(short = 'D', long, default_value = "5")]
        deviation: f64,

        #[arg(long, default_value = "180")]
        tile_min: u32,

        #[arg(long, default_value = "2560")]
        tile_max: u32,

        #[arg(long, default_value = "0")]
        level_min: u32,

        #[arg(long, value_enum, default_value_t = SortKey::Deviation)]
        sort_by: SortKey,
    },

    /// List the resolutions of every level of a grid
    Levels {
        /// Inverse resolution of level 0, in cells per degree
        inv_res: u64,

        #[arg(short = 'm', long)]
        max_level: u32,
    },

    /// Snap a box onto the grid of an inverse resolution
    Abox {
        /// LON_MIN,LAT_MIN,LON_MAX,LAT_MAX
        #[arg(allow_hyphen_values = true)]
        bbox: String,

        inv_res: u64,
    },
}

fn main() -> ExitCode {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let json = cli.json;
    match cli.command {
        Commands::Grid { command } => run_grid(command, json),
        Commands::Level {
            input,
            output,
            link,
            tile_size,
            num_levels_max,
            method,
        } => {
            let args = LevelArgs {
                input,
                output,
                link,
                tile_size,
                num_levels_max,
                method,
            };
            let report = maintenance::run_level(&args)
                .with_context(|| format!("cannot generate levels of {}", args.input.display()))?;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!("{}", maintenance::levels_table(&report));
                println!("{}", maintenance::levels_summary(&report));
            }
            Ok(())
        }
        Commands::Prune { cube, dry_run } => {
            let report = maintenance::run_prune(&cube, dry_run)
                .with_context(|| format!("cannot prune {}", cube.display()))?;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!("{}", maintenance::prune_table(&report));
                println!("{}", maintenance::prune_summary(&report));
            }
            Ok(())
        }
    }
}

fn run_grid(command: GridCommands, json: bool) -> anyhow::Result<()> {
    match command {
        GridCommands::Res {
            target,
            deviation,
            tile_min,
            tile_max,
            level_min,
            sort_by,
        } => {
            let target = Resolution::parse(&target)?;
            let search = ResolutionSearch {
                min_tile: tile_min,
                max_tile: tile_max,
                min_level: level_min,
            };
            let mut candidates = find_grid_specs(target, deviation, &search)?;
            grid::sort_candidates(&mut candidates, sort_by);
            if json {
                println!("{}", serde_json::to_string_pretty(&candidates)?);
            } else {
                println!(
                    "Target resolution: {:.10} deg ({:.4} m)",
                    target.as_degrees(),
                    target.as_meters()
                );
                println!("{}", grid::resolution_table(&candidates));
                println!("{} grid(s) found", candidates.len());
            }
        }
        GridCommands::Levels { inv_res, max_level } => {
            let levels = list_levels(inv_res, max_level)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&levels)?);
            } else {
                println!("{}", grid::levels_table(&levels));
            }
        }
        GridCommands::Abox { bbox, inv_res } => {
            let original = BoundingBox::parse(&bbox)?;
            let (adjusted, spec) = adjust_bbox(&original, inv_res)?;
            if json {
                let (width, height) = grid::cell_counts(&adjusted, &spec);
                let value = serde_json::json!({
                    "original": original.to_array(),
                    "adjusted": adjusted.to_array(),
                    "grid": spec,
                    "width": width,
                    "height": height,
                });
                println!("{}", serde_json::to_string_pretty(&value)?);
            } else {
                println!("{}", grid::abox_table(&original, &adjusted, &spec));
            }
        }
    }
    Ok(())
}
