//! Geographic tile matrix sets.
//!
//! Tiling follows the WMTS "GoogleCRS84Quad"-like geographic layout: level 0
//! is two square tiles wide and one high, anchored at the top-left corner
//! `(-180, 90)`, and each level doubles both matrix dimensions.

use serde::{Deserialize, Serialize};

use crate::bbox::BoundingBox;
use crate::error::{CubeError, CubeResult};
use crate::grid::{GridSpec, METERS_PER_DEGREE};

/// Deepest tile matrix accepted in requests.
pub const MAX_TILE_MATRIX: u32 = 24;

/// OGC standardized rendering pixel size in metres.
pub const STANDARD_PIXEL_SIZE_M: f64 = 0.00028;

/// Top-left corner of every matrix (lon, lat).
pub const TOP_LEFT: (f64, f64) = (-180.0, 90.0);

/// Tile coordinate within a matrix set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TileCoord {
    pub z: u32,
    pub row: u32,
    pub col: u32,
}

impl TileCoord {
    pub fn new(z: u32, row: u32, col: u32) -> Self {
        Self { z, row, col }
    }

    /// Check the coordinate against the geographic matrix shape at its level.
    ///
    /// The shape depends only on `z`, so this runs before any dataset is opened.
    pub fn validate(&self) -> CubeResult<()> {
        if self.z > MAX_TILE_MATRIX {
            return Err(CubeError::TileOutOfRange(format!(
                "TileMatrix {} exceeds maximum {}",
                self.z, MAX_TILE_MATRIX
            )));
        }
        let rows = 1u64 << self.z;
        let cols = rows * 2;
        if self.row as u64 >= rows {
            return Err(CubeError::TileOutOfRange(format!(
                "TileRow {} out of range for TileMatrix {} (max: {})",
                self.row,
                self.z,
                rows - 1
            )));
        }
        if self.col as u64 >= cols {
            return Err(CubeError::TileOutOfRange(format!(
                "TileCol {} out of range for TileMatrix {} (max: {})",
                self.col,
                self.z,
                cols - 1
            )));
        }
        Ok(())
    }
}

impl std::fmt::Display for TileCoord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.z, self.row, self.col)
    }
}

/// One level of a tile matrix set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TileMatrix {
    pub identifier: String,
    pub zoom: u32,
    pub matrix_width: u64,
    pub matrix_height: u64,
    pub tile_size: u32,
    /// Pixel size in degrees.
    pub pixel_size: f64,
    pub scale_denominator: f64,
}

/// A geographic tile matrix set for one dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TileMatrixSet {
    pub identifier: String,
    pub tile_size: u32,
    pub matrices: Vec<TileMatrix>,
}

impl TileMatrixSet {
    /// Build a matrix set with levels `0..num_levels`.
    pub fn new(dataset_id: &str, tile_size: u32, num_levels: u32) -> CubeResult<Self> {
        if tile_size == 0 {
            return Err(CubeError::invalid_parameter(
                "tile_size",
                "tile size must be positive",
            ));
        }
        if num_levels == 0 || num_levels > MAX_TILE_MATRIX + 1 {
            return Err(CubeError::invalid_parameter(
                "num_levels",
                format!("must be in 1..={}, got {}", MAX_TILE_MATRIX + 1, num_levels),
            ));
        }

        let matrices = (0..num_levels)
            .map(|z| {
                let pixel_size = pixel_size_at(tile_size, z);
                TileMatrix {
                    identifier: z.to_string(),
                    zoom: z,
                    matrix_width: 2u64 << z,
                    matrix_height: 1u64 << z,
                    tile_size,
                    pixel_size,
                    scale_denominator: pixel_size * METERS_PER_DEGREE / STANDARD_PIXEL_SIZE_M,
                }
            })
            .collect();

        Ok(Self {
            identifier: Self::identifier_for(dataset_id, tile_size, num_levels),
            tile_size,
            matrices,
        })
    }

    /// Matrix set matching a fixed Earth grid: tiles of `spec.tile` pixels,
    /// one matrix per pyramid layer.
    pub fn from_grid_spec(dataset_id: &str, spec: &GridSpec) -> CubeResult<Self> {
        let num_levels = (spec.level + 1).min(MAX_TILE_MATRIX + 1);
        Self::new(dataset_id, spec.tile, num_levels)
    }

    /// Matrix set with enough levels to reach `resolution_deg` at the finest level.
    pub fn for_resolution(
        dataset_id: &str,
        tile_size: u32,
        resolution_deg: f64,
    ) -> CubeResult<Self> {
        if !resolution_deg.is_finite() || resolution_deg <= 0.0 {
            return Err(CubeError::invalid_parameter(
                "resolution",
                format!("resolution must be positive, got {}", resolution_deg),
            ));
        }
        let mut z = 0;
        while z < MAX_TILE_MATRIX && pixel_size_at(tile_size.max(1), z) > resolution_deg * (1.0 + 1e-9) {
            z += 1;
        }
        Self::new(dataset_id, tile_size, z + 1)
    }

    /// `<dataset>_TileGrid_<tile_size>_<num_levels>`
    pub fn identifier_for(dataset_id: &str, tile_size: u32, num_levels: u32) -> String {
        format!("{}_TileGrid_{}_{}", dataset_id, tile_size, num_levels)
    }

    pub fn num_levels(&self) -> u32 {
        self.matrices.len() as u32
    }

    pub fn matrix(&self, z: u32) -> Option<&TileMatrix> {
        self.matrices.get(z as usize)
    }

    /// Look up a matrix by its identifier (the decimal level).
    pub fn matrix_by_identifier(&self, identifier: &str) -> Option<&TileMatrix> {
        self.matrices.iter().find(|m| m.identifier == identifier)
    }

    /// Pixel size in degrees at level `z`.
    pub fn pixel_size(&self, z: u32) -> f64 {
        pixel_size_at(self.tile_size, z)
    }

    /// Check that a coordinate addresses a tile of this set.
    pub fn validate_coord(&self, coord: &TileCoord) -> CubeResult<()> {
        coord.validate()?;
        if coord.z >= self.num_levels() {
            return Err(CubeError::TileOutOfRange(format!(
                "TileMatrix {} out of range for {} (max: {})",
                coord.z,
                self.identifier,
                self.num_levels() - 1
            )));
        }
        Ok(())
    }

    /// Geographic extent of a tile.
    pub fn tile_bbox(&self, coord: &TileCoord) -> CubeResult<BoundingBox> {
        self.validate_coord(coord)?;
        Ok(tile_bbox(coord))
    }
}

/// Geographic extent of a tile; the extent is independent of the tile size.
pub fn tile_bbox(coord: &TileCoord) -> BoundingBox {
    let extent = 180.0 / (1u64 << coord.z) as f64;
    let (left, top) = TOP_LEFT;
    BoundingBox::new(
        left + coord.col as f64 * extent,
        top - (coord.row as f64 + 1.0) * extent,
        left + (coord.col as f64 + 1.0) * extent,
        top - coord.row as f64 * extent,
    )
}

fn pixel_size_at(tile_size: u32, z: u32) -> f64 {
    180.0 / (tile_size as f64 * (1u64 << z) as f64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_zero_shape() {
        let tms = TileMatrixSet::new("demo", 256, 3).unwrap();
        assert_eq!(tms.identifier, "demo_TileGrid_256_3");
        let m0 = tms.matrix(0).unwrap();
        assert_eq!((m0.matrix_width, m0.matrix_height), (2, 1));
        let m2 = tms.matrix(2).unwrap();
        assert_eq!((m2.matrix_width, m2.matrix_height), (8, 4));
        assert_eq!(tms.matrix_by_identifier("2"), Some(m2));
    }

    #[test]
    fn test_tile_bbox() {
        let bbox = tile_bbox(&TileCoord::new(0, 0, 1));
        assert_eq!(bbox.to_array(), [0.0, -90.0, 180.0, 90.0]);

        let bbox = tile_bbox(&TileCoord::new(2, 1, 4));
        assert_eq!(bbox.to_array(), [0.0, 0.0, 45.0, 45.0]);
    }

    #[test]
    fn test_coord_validation() {
        assert!(TileCoord::new(1, 1, 3).validate().is_ok());
        assert!(matches!(
            TileCoord::new(1, 2, 0).validate(),
            Err(CubeError::TileOutOfRange(_))
        ));
        assert!(TileCoord::new(1, 0, 4).validate().is_err());
        assert!(TileCoord::new(25, 0, 0).validate().is_err());
    }

    #[test]
    fn test_from_grid_spec() {
        let spec = GridSpec::from_inv_res(384).unwrap();
        let tms = TileMatrixSet::from_grid_spec("demo", &spec).unwrap();
        assert_eq!(tms.tile_size, 540);
        assert_eq!(tms.num_levels(), 8);
        assert!((tms.pixel_size(7) - spec.resolution_deg()).abs() < 1e-15);
    }

    #[test]
    fn test_for_resolution_reaches_dataset_resolution() {
        let tms = TileMatrixSet::for_resolution("demo", 256, 0.25).unwrap();
        let finest = tms.pixel_size(tms.num_levels() - 1);
        assert!(finest <= 0.25);
        assert!(tms.pixel_size(tms.num_levels() - 2) > 0.25);
    }

    #[test]
    fn test_level_beyond_set_is_out_of_range() {
        let tms = TileMatrixSet::new("demo", 256, 2).unwrap();
        let err = tms.tile_bbox(&TileCoord::new(2, 0, 0)).unwrap_err();
        assert_eq!(err.exception_code(), "TileOutOfRange");
    }

    #[test]
    fn test_scale_denominator() {
        let tms = TileMatrixSet::new("demo", 256, 1).unwrap();
        let expected = 180.0 / 256.0 * METERS_PER_DEGREE / 0.00028;
        assert!((tms.matrices[0].scale_denominator - expected).abs() < 1e-6);
    }
}
