//! Pruning fill-only chunks.
//!
//! The writer never stores a chunk equal to the fill value, so fill-only
//! chunks are planted by copying a chunk of a "donor" variable that has the
//! same layout but a different fill value.

mod common;

use std::fs;
use std::path::Path;

use common::*;
use cube_common::BoundingBox;
use cube_store::{
    prune_cube, CubeReader, CubeStoreError, CubeWriter, LevelsConfig, PyramidLevelGenerator,
    TileShape, VariableSpec, WriteOptions,
};

fn bbox() -> BoundingBox {
    BoundingBox::new(0.0, 40.0, 8.0, 48.0)
}

/// Copy chunk `key` of `donor` over the same chunk of `target`, then drop the donor.
fn plant_chunk(cube: &Path, donor: &str, target: &str, key: &str) {
    let dest = cube.join(target).join(key);
    fs::create_dir_all(dest.parent().unwrap()).unwrap();
    fs::copy(cube.join(donor).join(key), &dest).unwrap();
    fs::remove_dir_all(cube.join(donor)).unwrap();
}

/// 8x8 float cube, 4x4 chunks: chunk (0, 0) is all NaN and chunk (0, 1)
/// has a single NaN. A NaN-only chunk (0, 0) is planted in storage.
fn float_cube(dir: &Path) -> std::path::PathBuf {
    let path = dir.join("float.zarr");
    let writer =
        CubeWriter::create(&path, &metadata(bbox(), 1), WriteOptions::uncompressed()).unwrap();

    let mut data = gradient(1, 8, 8);
    for row in 0..4 {
        for col in 0..4 {
            data[row * 8 + col] = f32::NAN;
        }
    }
    data[5] = f32::NAN;

    let spec = VariableSpec::new("chl", 1, 8, 8, f32::NAN).with_chunk(4, 4);
    writer.write_variable(&spec, &data).unwrap();

    let donor = VariableSpec::new("donor", 1, 8, 8, 1.0f32).with_chunk(4, 4);
    writer.write_variable(&donor, &vec![f32::NAN; 64]).unwrap();

    plant_chunk(&path, "donor", "chl", "c/0/0/0");
    path
}

// ============================================================================
// Float variables
// ============================================================================

#[test]
fn test_prune_deletes_only_fill_chunks() {
    let dir = tempfile::tempdir().unwrap();
    let path = float_cube(dir.path());
    let planted = path.join("chl/c/0/0/0");
    assert!(planted.is_file());

    let before = CubeReader::open(&path)
        .unwrap()
        .read_time_step("chl", 0)
        .unwrap();

    let report = prune_cube(&path, false).unwrap();
    assert!(!report.dry_run);
    assert_eq!(report.variables.len(), 1);
    let chl = &report.variables[0];
    assert_eq!(chl.variable, "chl");
    assert_eq!(chl.scanned, 4);
    assert_eq!(chl.deleted, 1);
    assert_eq!(chl.kept, 3);
    assert_eq!(chl.missing, 0);

    assert!(!planted.exists());
    assert!(path.join("chl/c/0/0/1").is_file());

    let after = CubeReader::open(&path)
        .unwrap()
        .read_time_step("chl", 0)
        .unwrap();
    assert_same_values(&before, &after);
}

#[test]
fn test_dry_run_deletes_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let path = float_cube(dir.path());

    let report = prune_cube(&path, true).unwrap();
    assert!(report.dry_run);
    assert_eq!(report.deleted(), 1);
    assert!(path.join("chl/c/0/0/0").is_file());
}

#[test]
fn test_second_prune_finds_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let path = float_cube(dir.path());

    prune_cube(&path, false).unwrap();
    let report = prune_cube(&path, false).unwrap();
    assert_eq!(report.deleted(), 0);
    assert_eq!(report.kept(), 3);
    assert_eq!(report.variables[0].missing, 1);
    assert_eq!(report.scanned(), 4);
}

// ============================================================================
// Integer variables
// ============================================================================

#[test]
fn test_prune_integer_fill_value() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("ints.zarr");
    let writer =
        CubeWriter::create(&path, &metadata(bbox(), 2), WriteOptions::uncompressed()).unwrap();

    let data: Vec<i16> = (0..128).map(|v| v as i16).collect();
    let spec = VariableSpec::new("flags", 2, 8, 8, -1i16).with_chunk(8, 8);
    writer.write_variable(&spec, &data).unwrap();

    let donor = VariableSpec::new("donor", 2, 8, 8, 0i16).with_chunk(8, 8);
    writer.write_variable(&donor, &vec![-1i16; 128]).unwrap();
    plant_chunk(&path, "donor", "flags", "c/1/0/0");

    let report = prune_cube(&path, false).unwrap();
    let flags = &report.variables[0];
    assert_eq!(flags.scanned, 2);
    assert_eq!(flags.deleted, 1);
    assert_eq!(flags.kept, 1);
    assert!(!path.join("flags/c/1/0/0").exists());

    let reader = CubeReader::open(&path).unwrap();
    assert!(reader
        .read_time_step("flags", 1)
        .unwrap()
        .iter()
        .all(|&v| v == -1.0));
    assert_eq!(reader.read_time_step("flags", 0).unwrap()[10], 10.0);
}

// ============================================================================
// Pyramids
// ============================================================================

#[test]
fn test_prune_pyramid_skips_linked_level() {
    let dir = tempfile::tempdir().unwrap();
    let input = write_gradient_cube(dir.path(), "demo.zarr", bbox(), 1, 8, 8, 4);
    let config = LevelsConfig {
        tile_size: Some(TileShape::square(4)),
        link_input: true,
        write: WriteOptions::uncompressed(),
        ..Default::default()
    };
    let report = PyramidLevelGenerator::new(config)
        .unwrap()
        .generate(&input, None)
        .unwrap();

    let pruned = prune_cube(&report.output, true).unwrap();
    let names: Vec<&str> = pruned.variables.iter().map(|v| v.variable.as_str()).collect();
    assert_eq!(names, vec!["1.zarr/chl"]);
    assert_eq!(pruned.deleted(), 0);
}

#[test]
fn test_prune_pyramid_visits_every_level() {
    let dir = tempfile::tempdir().unwrap();
    let input = write_gradient_cube(dir.path(), "demo.zarr", bbox(), 1, 8, 8, 4);
    let config = LevelsConfig {
        tile_size: Some(TileShape::square(4)),
        write: WriteOptions::uncompressed(),
        ..Default::default()
    };
    let report = PyramidLevelGenerator::new(config)
        .unwrap()
        .generate(&input, None)
        .unwrap();

    let pruned = prune_cube(&report.output, false).unwrap();
    let names: Vec<&str> = pruned.variables.iter().map(|v| v.variable.as_str()).collect();
    assert_eq!(names, vec!["0.zarr/chl", "1.zarr/chl"]);
    assert_eq!(pruned.scanned(), 4 + 1);
}

#[test]
fn test_prune_missing_cube() {
    let dir = tempfile::tempdir().unwrap();
    assert!(matches!(
        prune_cube(&dir.path().join("missing.zarr"), false),
        Err(CubeStoreError::NotFound(_))
    ));
}
