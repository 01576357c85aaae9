//! `level` and `prune` against cubes written to a temp directory.

use std::path::{Path, PathBuf};

use cube_common::BoundingBox;
use cube_store::{
    parse_time, CubeMetadata, CubeReader, CubeWriter, TileShape, VariableSpec, WriteOptions,
};
use cube_tool::maintenance::{levels_summary, levels_table, prune_summary, prune_table};
use cube_tool::{run_level, run_prune, LevelArgs};

fn write_cube(dir: &Path) -> PathBuf {
    let path = dir.join("demo.zarr");
    let mut meta = CubeMetadata::new("demo", BoundingBox::new(0.0, 40.0, 10.0, 50.0));
    meta.times = vec![parse_time("2024-01-01").unwrap()];
    let writer = CubeWriter::create(&path, &meta, WriteOptions::uncompressed()).unwrap();

    let mut data: Vec<f32> = (0..256).map(|i| i as f32).collect();
    for row in 0..8 {
        for col in 0..8 {
            data[row * 16 + col] = f32::NAN;
        }
    }
    let spec = VariableSpec::new("chl", 1, 16, 16, f32::NAN).with_chunk(8, 8);
    writer.write_variable(&spec, &data).unwrap();
    path
}

fn level_args(input: PathBuf) -> LevelArgs {
    LevelArgs {
        input,
        output: None,
        link: false,
        tile_size: Some(TileShape::square(4)),
        num_levels_max: None,
        method: "mean".to_string(),
    }
}

#[test]
fn test_level_writes_pyramid() {
    let dir = tempfile::tempdir().unwrap();
    let input = write_cube(dir.path());

    let report = run_level(&level_args(input)).unwrap();
    assert_eq!(report.output, dir.path().join("demo.levels"));
    let shapes: Vec<(u64, u64)> = report.levels.iter().map(|l| (l.height, l.width)).collect();
    assert_eq!(shapes, vec![(16, 16), (8, 8), (4, 4)]);

    let coarsest = CubeReader::open(report.output.join("2.zarr")).unwrap();
    assert!(coarsest.variable("chl").is_some());

    let rendered = levels_table(&report).to_string();
    assert!(rendered.contains("STORAGE"));
    assert!(!rendered.contains("link"));
}

#[test]
fn test_level_tile_size_defaults_to_input_chunks() {
    let dir = tempfile::tempdir().unwrap();
    let mut args = level_args(write_cube(dir.path()));
    args.tile_size = None;

    let report = run_level(&args).unwrap();
    assert_eq!(report.tile_size, TileShape::square(8));
    let shapes: Vec<(u64, u64)> = report.levels.iter().map(|l| (l.height, l.width)).collect();
    assert_eq!(shapes, vec![(16, 16), (8, 8)]);
    assert!(levels_summary(&report).starts_with("2 level(s) of 8x8 tiles"));
}

#[test]
fn test_level_accepts_width_and_height() {
    let dir = tempfile::tempdir().unwrap();
    let mut args = level_args(write_cube(dir.path()));
    args.tile_size = Some(TileShape::parse("8,4").unwrap());

    let report = run_level(&args).unwrap();
    assert_eq!(report.tile_size, TileShape::new(8, 4));
    assert_eq!(report.levels.len(), 2);
    let level1 = CubeReader::open(report.output.join("1.zarr")).unwrap();
    assert_eq!(level1.variable("chl").unwrap().spatial_chunk(), (4, 8));
}

#[test]
fn test_level_link_and_limit() {
    let dir = tempfile::tempdir().unwrap();
    let input = write_cube(dir.path());

    let mut args = level_args(input);
    args.link = true;
    args.num_levels_max = Some(2);
    args.output = Some(dir.path().join("linked.levels"));
    let report = run_level(&args).unwrap();

    assert!(report.linked);
    assert_eq!(report.levels.len(), 2);
    assert!(levels_table(&report).to_string().contains("link"));
}

#[test]
fn test_level_refuses_existing_output() {
    let dir = tempfile::tempdir().unwrap();
    let input = write_cube(dir.path());
    run_level(&level_args(input.clone())).unwrap();
    assert!(run_level(&level_args(input)).is_err());
}

#[test]
fn test_level_rejects_unknown_method() {
    let dir = tempfile::tempdir().unwrap();
    let mut args = level_args(write_cube(dir.path()));
    args.method = "median".to_string();
    assert!(run_level(&args).is_err());
    assert!(!dir.path().join("demo.levels").exists());
}

#[test]
fn test_prune_dry_run_keeps_data() {
    let dir = tempfile::tempdir().unwrap();
    let input = write_cube(dir.path());

    let report = run_prune(&input, true).unwrap();
    assert!(report.dry_run);
    assert_eq!(report.scanned(), 4);
    assert!(prune_summary(&report).starts_with("Dry run, "));
    assert!(prune_table(&report).to_string().contains("chl"));

    let report = run_prune(&input, false).unwrap();
    assert!(prune_summary(&report).starts_with("Done, "));
    assert_eq!(report.kept(), 3);

    let reader = CubeReader::open(&input).unwrap();
    assert!(reader.variable("chl").is_some());
}

#[test]
fn test_prune_missing_cube_fails() {
    let dir = tempfile::tempdir().unwrap();
    assert!(run_prune(&dir.path().join("missing.zarr"), false).is_err());
}
