//! Tile image formats.

use std::fmt;

use cube_common::{CubeError, CubeResult};
use serde::Serialize;

/// Output formats a tile can be requested in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    #[default]
    Png,
}

impl ImageFormat {
    pub const ALL: [ImageFormat; 1] = [ImageFormat::Png];

    pub fn mime_type(&self) -> &'static str {
        match self {
            ImageFormat::Png => "image/png",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            ImageFormat::Png => "png",
        }
    }

    /// Resolve a `Format` parameter: a MIME type or a bare extension.
    pub fn from_param(value: &str) -> CubeResult<Self> {
        let lower = value.trim().to_ascii_lowercase();
        match lower.as_str() {
            "image/png" | "png" => Ok(ImageFormat::Png),
            _ => Err(CubeError::UnsupportedFormat(value.to_string())),
        }
    }

    /// Resolve a file extension from a REST path.
    pub fn from_extension(ext: &str) -> CubeResult<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "png" => Ok(ImageFormat::Png),
            _ => Err(CubeError::UnsupportedFormat(ext.to_string())),
        }
    }
}

impl fmt::Display for ImageFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.mime_type())
    }
}
