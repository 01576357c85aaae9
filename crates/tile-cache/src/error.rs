use cube_common::CubeError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TileCacheError {
    #[error("Invalid cache size '{0}': expected an integer with optional B/K/M/G/T suffix, or OFF")]
    InvalidSize(String),

    #[error("Entry of {size} bytes exceeds cache budget of {budget} bytes")]
    CapacityExceeded { size: u64, budget: u64 },
}

impl From<TileCacheError> for CubeError {
    fn from(err: TileCacheError) -> Self {
        match err {
            TileCacheError::InvalidSize(value) => {
                CubeError::invalid_parameter("cache size", value)
            }
            TileCacheError::CapacityExceeded { size, budget } => {
                CubeError::CacheCapacityExceeded { size, budget }
            }
        }
    }
}
