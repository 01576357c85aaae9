//! Reading cubes written with `CubeWriter`.

mod common;

use common::*;
use cube_common::{BoundingBox, GridSpec};
use cube_store::{
    discover_variables, CubeHandle, CubeReader, CubeStoreError, CubeWriter, VariableSpec, Window,
    WriteOptions,
};

fn bbox() -> BoundingBox {
    BoundingBox::new(0.0, 40.0, 10.0, 50.0)
}

// ============================================================================
// Plain cubes
// ============================================================================

#[test]
fn test_open_reads_metadata() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_gradient_cube(dir.path(), "demo.zarr", bbox(), 3, 20, 20, 8);

    let reader = CubeReader::open(&path).unwrap();
    assert_eq!(reader.shape(), (20, 20));
    assert_eq!(reader.time_steps(), 3);
    assert_eq!(reader.metadata().times.len(), 3);
    assert_eq!(reader.resolution(), (0.5, 0.5));

    let chl = reader.variable("chl").unwrap();
    assert_eq!(chl.dtype, "float32");
    assert_eq!(chl.chunk_shape, vec![1, 8, 8]);
    assert_eq!(chl.chunk_grid(), (3, 3));
    assert_eq!(chl.units.as_deref(), Some("mg m-3"));
    assert_eq!(chl.valid_min, Some(0.0));
    assert!(chl.fill_value.is_nan());
}

#[test]
fn test_read_window_matches_source() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_gradient_cube(dir.path(), "demo.zarr", bbox(), 2, 20, 20, 8);
    let reader = CubeReader::open(&path).unwrap();

    let window = Window::new(5, 7, 4, 3);
    let data = reader.read_window("chl", 1, window).unwrap();
    assert_eq!(data.len(), 12);
    for r in 0..4 {
        for c in 0..3 {
            assert_eq!(data[r * 3 + c], gradient_value(1, 5 + r, 7 + c, 20));
        }
    }
}

#[test]
fn test_read_chunk_is_clipped_at_edge() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_gradient_cube(dir.path(), "demo.zarr", bbox(), 1, 20, 20, 8);
    let reader = CubeReader::open(&path).unwrap();

    let (window, data) = reader.read_chunk("chl", 0, 2, 2).unwrap();
    assert_eq!(window, Window::new(16, 16, 4, 4));
    assert_eq!(data.len(), 16);
    assert_eq!(data[0], gradient_value(0, 16, 16, 20));

    assert!(reader.chunk_window("chl", 3, 0).is_err());
}

#[test]
fn test_read_window_series() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_gradient_cube(dir.path(), "demo.zarr", bbox(), 4, 10, 10, 5);
    let reader = CubeReader::open(&path).unwrap();

    let series = reader
        .read_window_series("chl", Window::new(2, 3, 1, 1))
        .unwrap();
    let expected: Vec<f32> = (0..4).map(|t| gradient_value(t, 2, 3, 10)).collect();
    assert_eq!(series, expected);
}

#[test]
fn test_out_of_bounds_window() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_gradient_cube(dir.path(), "demo.zarr", bbox(), 1, 10, 10, 5);
    let reader = CubeReader::open(&path).unwrap();

    let err = reader
        .read_window("chl", 0, Window::new(8, 8, 4, 4))
        .unwrap_err();
    assert!(matches!(err, CubeStoreError::OutOfBounds { .. }));
    assert!(reader.read_window("chl", 1, Window::new(0, 0, 1, 1)).is_err());
    assert!(matches!(
        reader.read_window("sst", 0, Window::new(0, 0, 1, 1)),
        Err(CubeStoreError::VariableNotFound(_))
    ));
}

// ============================================================================
// Element types
// ============================================================================

#[test]
fn test_integer_variables_read_as_f32() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("ints.zarr");
    let writer = CubeWriter::create(&path, &metadata(bbox(), 1), WriteOptions::default()).unwrap();

    let data: Vec<i16> = (0..16).map(|v| v as i16 - 8).collect();
    let spec = VariableSpec::new("flags", 1, 4, 4, -9999i16).with_chunk(2, 2);
    writer.write_variable(&spec, &data).unwrap();

    let bytes: Vec<u8> = (0..16).map(|v| v as u8 * 10).collect();
    let spec = VariableSpec::new("class", 1, 4, 4, 255u8)
        .with_chunk(4, 4)
        .two_dimensional();
    writer.write_variable(&spec, &bytes).unwrap();

    let reader = CubeReader::open(&path).unwrap();
    let flags = reader.variable("flags").unwrap();
    assert_eq!(flags.dtype, "int16");
    assert_eq!(flags.fill_value, -9999.0);
    assert!(flags.is_missing(-9999.0));

    let values = reader.read_time_step("flags", 0).unwrap();
    assert_eq!(values[0], -8.0);
    assert_eq!(values[15], 7.0);

    let class = reader.variable("class").unwrap();
    assert_eq!(class.shape, vec![4, 4]);
    assert_eq!(class.time_steps(), 1);
    assert_eq!(reader.read_time_step("class", 0).unwrap()[3], 30.0);
}

// ============================================================================
// Discovery and validation
// ============================================================================

#[test]
fn test_discover_variables_ignores_non_arrays() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_gradient_cube(dir.path(), "demo.zarr", bbox(), 1, 4, 4, 4);
    std::fs::create_dir_all(path.join("notes")).unwrap();
    std::fs::write(path.join("README"), "not a variable").unwrap();

    assert_eq!(discover_variables(&path).unwrap(), vec!["chl".to_string()]);
}

#[test]
fn test_missing_cube_is_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let err = CubeReader::open(dir.path().join("nope.zarr")).unwrap_err();
    assert!(matches!(err, CubeStoreError::NotFound(_)));
    assert_eq!(
        err.into_cube_error("nope").exception_code(),
        "DatasetNotFound"
    );
}

#[test]
fn test_time_coordinate_mismatch_is_invalid() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("bad.zarr");
    let writer = CubeWriter::create(&path, &metadata(bbox(), 2), WriteOptions::uncompressed()).unwrap();
    let spec = VariableSpec::new("chl", 3, 2, 2, f32::NAN);
    writer.write_variable(&spec, &[1.0; 12]).unwrap();

    let err = CubeReader::open(&path).unwrap_err();
    assert!(matches!(err, CubeStoreError::InvalidMetadata(_)));
    assert_eq!(err.into_cube_error("bad").exception_code(), "InvalidCube");
}

#[test]
fn test_cube_without_variables_is_invalid() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("empty.zarr");
    CubeWriter::create(&path, &metadata(bbox(), 1), WriteOptions::uncompressed()).unwrap();
    assert!(matches!(
        CubeReader::open(&path),
        Err(CubeStoreError::InvalidMetadata(_))
    ));
}

// ============================================================================
// Handles
// ============================================================================

#[test]
fn test_handle_on_plain_cube() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_gradient_cube(dir.path(), "demo.zarr", bbox(), 3, 40, 40, 16);

    let handle = CubeHandle::open("demo", &path, 256).unwrap().with_generation(7);
    assert_eq!(handle.generation(), 7);
    assert_eq!(handle.levels().len(), 1);
    assert!(!handle.linked());
    assert_eq!(handle.variables().count(), 1);
    assert!(handle.variable("sst").is_err());

    // 0.25 degree cells with 256 pixel tiles: 180/256/2^z <= 0.25 first at z = 2
    let tms = handle.tile_matrix_set();
    assert_eq!(tms.num_levels(), 3);
    assert_eq!(tms.identifier, "demo_TileGrid_256_3");
}

#[test]
fn test_handle_time_index() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_gradient_cube(dir.path(), "demo.zarr", bbox(), 3, 4, 4, 4);
    let handle = CubeHandle::open("demo", &path, 256).unwrap();

    assert_eq!(handle.time_index(None), 2);
    let t = cube_store::parse_time("2024-01-01T20:00:00Z");
    assert_eq!(handle.time_index(t), 1);
    let t = cube_store::parse_time("2023-06-01");
    assert_eq!(handle.time_index(t), 0);
}

#[test]
fn test_handle_uses_grid_attribute() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("grid.zarr");
    let mut meta = metadata(BoundingBox::new(0.0, 0.0, 3.0, 1.5), 1);
    meta.grid = Some(GridSpec::new(180, 2).unwrap());
    let writer = CubeWriter::create(&path, &meta, WriteOptions::uncompressed()).unwrap();
    let spec = VariableSpec::new("chl", 1, 6, 12, f32::NAN);
    writer.write_variable(&spec, &vec![1.0; 72]).unwrap();

    let handle = CubeHandle::open("grid", &path, 256).unwrap();
    let tms = handle.tile_matrix_set();
    assert_eq!(tms.tile_size, 180);
    assert_eq!(tms.num_levels(), 3);
}
