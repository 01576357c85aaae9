//! Configuration for cube writing and pyramid generation.

use serde::{Deserialize, Serialize};

use crate::downsample::DownsampleMethod;

/// Default spatial tile size for pyramid levels.
pub const DEFAULT_LEVEL_TILE_SIZE: u64 = 512;

/// Spatial tile shape of pyramid levels, in cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TileShape {
    pub width: u64,
    pub height: u64,
}

impl TileShape {
    pub fn new(width: u64, height: u64) -> Self {
        Self { width, height }
    }

    pub fn square(size: u64) -> Self {
        Self::new(size, size)
    }

    /// Parse `"SIZE"` or `"WIDTH,HEIGHT"`; both must be positive.
    pub fn parse(value: &str) -> Result<Self, String> {
        let parts: Vec<&str> = value.split(',').map(str::trim).collect();
        let sizes = parts
            .iter()
            .map(|part| part.parse::<u64>().ok().filter(|n| *n > 0))
            .collect::<Option<Vec<u64>>>()
            .ok_or_else(|| format!("tile size must be positive integers, got '{}'", value))?;
        match sizes.as_slice() {
            [size] => Ok(Self::square(*size)),
            [width, height] => Ok(Self::new(*width, *height)),
            _ => Err(format!(
                "tile size must be SIZE or WIDTH,HEIGHT, got '{}'",
                value
            )),
        }
    }
}

/// Compression codec for Zarr chunks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ZarrCompression {
    /// No compression.
    None,
    /// Blosc with LZ4.
    BloscLz4,
    /// Blosc with Zstd (recommended).
    #[default]
    BloscZstd,
}

impl ZarrCompression {
    /// Parse from string (case-insensitive).
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "none" | "off" => Some(Self::None),
            "lz4" | "blosc_lz4" => Some(Self::BloscLz4),
            "zstd" | "blosc_zstd" => Some(Self::BloscZstd),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::BloscLz4 => "blosc_lz4",
            Self::BloscZstd => "blosc_zstd",
        }
    }
}

impl std::fmt::Display for ZarrCompression {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// How chunks are encoded when a cube is written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteOptions {
    pub compression: ZarrCompression,
    /// Compression level (1-9).
    pub compression_level: u8,
    /// Enable byte shuffle filter for better compression.
    pub shuffle: bool,
}

impl Default for WriteOptions {
    fn default() -> Self {
        Self {
            compression: ZarrCompression::BloscZstd,
            compression_level: 1,
            shuffle: true,
        }
    }
}

impl WriteOptions {
    pub fn uncompressed() -> Self {
        Self {
            compression: ZarrCompression::None,
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.compression != ZarrCompression::None
            && (self.compression_level == 0 || self.compression_level > 9)
        {
            return Err("compression_level must be 1-9".to_string());
        }
        Ok(())
    }
}

/// Configuration for multi-resolution pyramid generation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LevelsConfig {
    /// Spatial tile shape; levels stop once a halved dimension falls below
    /// it. `None` takes the input's spatial chunking.
    pub tile_size: Option<TileShape>,

    /// Upper bound on the number of levels, including level 0.
    pub max_levels: Option<u32>,

    /// Reference the input as level 0 instead of rewriting it.
    pub link_input: bool,

    /// 2x2 reduction used for every level above 0.
    pub method: DownsampleMethod,

    pub write: WriteOptions,
}

impl Default for LevelsConfig {
    fn default() -> Self {
        Self {
            tile_size: None,
            max_levels: None,
            link_input: false,
            method: DownsampleMethod::Mean,
            write: WriteOptions::default(),
        }
    }
}

impl LevelsConfig {
    pub fn validate(&self) -> Result<(), String> {
        if let Some(tile) = self.tile_size {
            if tile.width == 0 || tile.height == 0 {
                return Err("tile_size must be > 0".to_string());
            }
        }
        if self.max_levels == Some(0) {
            return Err("max_levels must be > 0".to_string());
        }
        self.write.validate()
    }
}
