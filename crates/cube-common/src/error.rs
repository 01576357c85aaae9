//! Error types for the cube tile server.

use thiserror::Error;

/// Result type alias using CubeError.
pub type CubeResult<T> = Result<T, CubeError>;

/// Primary error type for grid, protocol and data-access operations.
#[derive(Debug, Error)]
pub enum CubeError {
    // === Request validation ===
    #[error("Missing required parameter: {0}")]
    MissingParameter(String),

    #[error("Invalid parameter value for '{param}': {message}")]
    InvalidParameter { param: String, message: String },

    #[error("Tile out of range: {0}")]
    TileOutOfRange(String),

    #[error("Requested format not supported: {0}")]
    UnsupportedFormat(String),

    #[error("Operation not supported: {0}")]
    UnsupportedOperation(String),

    // === Grid ===
    #[error("Invalid bounding box: {0}")]
    InvalidBoundingBox(String),

    #[error("No grid satisfies the constraints: {0}")]
    GridConstraint(String),

    // === Data ===
    #[error("Dataset not found: {0}")]
    DatasetNotFound(String),

    #[error("Variable '{variable}' not found in dataset '{dataset}'")]
    VariableNotFound { dataset: String, variable: String },

    #[error("Invalid cube '{dataset}': {message}")]
    InvalidCube { dataset: String, message: String },

    // === Cache ===
    #[error("Cache capacity exceeded: entry of {size} bytes exceeds budget of {budget} bytes")]
    CacheCapacityExceeded { size: u64, budget: u64 },

    // === Rendering / infrastructure ===
    #[error("Rendering failed: {0}")]
    RenderError(String),

    #[error("Internal server error: {0}")]
    InternalError(String),

    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),
}

impl CubeError {
    /// Shorthand for an `InvalidParameter` error.
    pub fn invalid_parameter(param: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidParameter {
            param: param.into(),
            message: message.into(),
        }
    }

    /// Shorthand for an `InvalidCube` error.
    pub fn invalid_cube(dataset: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidCube {
            dataset: dataset.into(),
            message: message.into(),
        }
    }

    /// Get the OWS exception code for this error.
    ///
    /// Codes are part of the public protocol and must stay stable.
    pub fn exception_code(&self) -> &'static str {
        match self {
            CubeError::MissingParameter(_) => "MissingParameterValue",
            CubeError::InvalidParameter { .. } | CubeError::UnsupportedFormat(_) => {
                "InvalidParameterValue"
            }
            CubeError::TileOutOfRange(_) => "TileOutOfRange",
            CubeError::UnsupportedOperation(_) => "OperationNotSupported",
            CubeError::InvalidBoundingBox(_) => "InvalidBoundingBox",
            CubeError::GridConstraint(_) => "GridConstraintError",
            CubeError::DatasetNotFound(_) => "DatasetNotFound",
            CubeError::VariableNotFound { .. } => "VariableNotFound",
            CubeError::InvalidCube { .. } => "InvalidCube",
            _ => "NoApplicableCode",
        }
    }

    /// Get the HTTP status code for this error.
    pub fn http_status_code(&self) -> u16 {
        match self {
            CubeError::MissingParameter(_)
            | CubeError::InvalidParameter { .. }
            | CubeError::TileOutOfRange(_)
            | CubeError::UnsupportedFormat(_)
            | CubeError::InvalidBoundingBox(_)
            | CubeError::GridConstraint(_) => 400,

            CubeError::DatasetNotFound(_) | CubeError::VariableNotFound { .. } => 404,

            CubeError::UnsupportedOperation(_) => 501,
            CubeError::ServiceUnavailable(_) => 503,

            _ => 500,
        }
    }

    /// Whether the caller can fix the request and retry.
    pub fn is_client_error(&self) -> bool {
        (400..500).contains(&self.http_status_code())
    }
}

impl From<std::io::Error> for CubeError {
    fn from(err: std::io::Error) -> Self {
        CubeError::InternalError(err.to_string())
    }
}

impl From<serde_json::Error> for CubeError {
    fn from(err: serde_json::Error) -> Self {
        CubeError::InternalError(format!("JSON error: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_feature_info_code_is_stable() {
        let err = CubeError::UnsupportedOperation("GetFeatureInfo".to_string());
        assert_eq!(err.exception_code(), "OperationNotSupported");
        assert_eq!(err.http_status_code(), 501);
        assert!(!err.is_client_error());
    }

    #[test]
    fn test_validation_errors_are_4xx() {
        let errors = [
            CubeError::MissingParameter("LAYER".to_string()),
            CubeError::invalid_parameter("TILEMATRIX", "not a number"),
            CubeError::TileOutOfRange("row 9".to_string()),
            CubeError::DatasetNotFound("demo".to_string()),
        ];
        for err in errors {
            assert!(err.is_client_error(), "{err} should be a client error");
        }
    }

    #[test]
    fn test_invalid_cube_carries_dataset() {
        let err = CubeError::invalid_cube("demo", "missing bbox attribute");
        assert_eq!(err.http_status_code(), 500);
        assert!(err.to_string().contains("demo"));
        assert_eq!(err.exception_code(), "InvalidCube");
    }
}
