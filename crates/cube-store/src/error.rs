//! Error types for cube storage.

use std::path::PathBuf;

use cube_common::CubeError;
use thiserror::Error;

/// Errors that can occur while reading, writing or maintaining cubes.
#[derive(Error, Debug)]
pub enum CubeStoreError {
    /// The cube path does not exist.
    #[error("cube not found: {0}")]
    NotFound(PathBuf),

    /// Cube metadata is missing or malformed.
    #[error("invalid cube metadata: {0}")]
    InvalidMetadata(String),

    /// A variable is not present in the cube.
    #[error("variable not found: {0}")]
    VariableNotFound(String),

    /// The array element type has no numeric mapping.
    #[error("unsupported data type: {0}")]
    UnsupportedDataType(String),

    /// A requested window lies outside the array.
    #[error("window {requested} is outside array of shape {shape}")]
    OutOfBounds { requested: String, shape: String },

    /// Refusing to overwrite an existing output.
    #[error("output already exists: {0}")]
    OutputExists(PathBuf),

    /// Zarr format error.
    #[error("Zarr format error: {0}")]
    ZarrError(String),

    /// Storage/IO error.
    #[error("storage error: {0}")]
    StorageError(String),

    /// Configuration error.
    #[error("configuration error: {0}")]
    ConfigError(String),
}

impl CubeStoreError {
    pub fn invalid_metadata(msg: impl Into<String>) -> Self {
        Self::InvalidMetadata(msg.into())
    }

    pub fn zarr_error(msg: impl ToString) -> Self {
        Self::ZarrError(msg.to_string())
    }

    pub fn storage_error(msg: impl ToString) -> Self {
        Self::StorageError(msg.to_string())
    }

    pub fn out_of_bounds(requested: impl Into<String>, shape: impl Into<String>) -> Self {
        Self::OutOfBounds {
            requested: requested.into(),
            shape: shape.into(),
        }
    }

    /// Convert into the service error for dataset `dataset`.
    pub fn into_cube_error(self, dataset: &str) -> CubeError {
        match self {
            Self::NotFound(_) => CubeError::DatasetNotFound(dataset.to_string()),
            Self::VariableNotFound(variable) => CubeError::VariableNotFound {
                dataset: dataset.to_string(),
                variable,
            },
            Self::InvalidMetadata(_) | Self::UnsupportedDataType(_) | Self::ZarrError(_) => {
                CubeError::invalid_cube(dataset, self.to_string())
            }
            other => CubeError::InternalError(format!("dataset '{}': {}", dataset, other)),
        }
    }
}

impl From<std::io::Error> for CubeStoreError {
    fn from(err: std::io::Error) -> Self {
        Self::StorageError(err.to_string())
    }
}

impl From<serde_json::Error> for CubeStoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::InvalidMetadata(err.to_string())
    }
}

/// Result type for cube storage operations.
pub type Result<T> = std::result::Result<T, CubeStoreError>;
