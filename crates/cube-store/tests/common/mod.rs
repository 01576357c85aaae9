//! Shared fixtures for cube storage tests.

#![allow(dead_code)]

use std::path::{Path, PathBuf};

use cube_common::BoundingBox;
use cube_store::{parse_time, CubeMetadata, CubeWriter, VariableSpec, WriteOptions};

/// Metadata for a cube covering `bbox` with daily time steps from 2024-01-01.
pub fn metadata(bbox: BoundingBox, times: usize) -> CubeMetadata {
    let mut meta = CubeMetadata::new("test cube", bbox);
    meta.times = (0..times)
        .map(|day| parse_time(&format!("2024-01-{:02}", day + 1)).unwrap())
        .collect();
    meta
}

/// Value of the gradient fixture at a cell.
pub fn gradient_value(t: usize, row: usize, col: usize, width: usize) -> f32 {
    (t * 10_000 + row * width + col) as f32
}

pub fn gradient(times: usize, height: usize, width: usize) -> Vec<f32> {
    let mut data = Vec::with_capacity(times * height * width);
    for t in 0..times {
        for row in 0..height {
            for col in 0..width {
                data.push(gradient_value(t, row, col, width));
            }
        }
    }
    data
}

/// Write a float32 cube with variable `chl` holding the gradient.
pub fn write_gradient_cube(
    dir: &Path,
    name: &str,
    bbox: BoundingBox,
    times: usize,
    height: usize,
    width: usize,
    chunk: u64,
) -> PathBuf {
    let path = dir.join(name);
    let writer =
        CubeWriter::create(&path, &metadata(bbox, times), WriteOptions::uncompressed()).unwrap();
    let spec = VariableSpec::new("chl", times as u64, height as u64, width as u64, f32::NAN)
        .with_chunk(chunk, chunk)
        .with_attribute("units", "mg m-3")
        .with_attribute("valid_min", 0.0)
        .with_attribute("color_bar_name", "plasma");
    writer
        .write_variable(&spec, &gradient(times, height, width))
        .unwrap();
    path
}

/// Bitwise comparison that treats NaN as equal to NaN.
pub fn assert_same_values(a: &[f32], b: &[f32]) {
    assert_eq!(a.len(), b.len());
    for (i, (x, y)) in a.iter().zip(b).enumerate() {
        assert!(
            x == y || (x.is_nan() && y.is_nan()),
            "value {} differs: {} vs {}",
            i,
            x,
            y
        );
    }
}
