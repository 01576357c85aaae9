//! Element type dispatch.
//!
//! Cubes may store any of the common numeric Zarr data types. Rendering and
//! time series work on `f32`, chunk pruning compares in `f64`, so reads are
//! dispatched on the array data type and widened or narrowed here.

use zarrs::array::{Array, DataType};
use zarrs::array_subset::ArraySubset;
use zarrs_filesystem::FilesystemStore;

use crate::error::{CubeStoreError, Result};

/// A Zarr array on the local filesystem.
pub type CubeArray = Array<FilesystemStore>;

/// Canonical name of a supported data type, or an error.
pub fn dtype_name(data_type: &DataType) -> Result<&'static str> {
    Ok(match data_type {
        DataType::Float32 => "float32",
        DataType::Float64 => "float64",
        DataType::Int8 => "int8",
        DataType::Int16 => "int16",
        DataType::Int32 => "int32",
        DataType::UInt8 => "uint8",
        DataType::UInt16 => "uint16",
        DataType::UInt32 => "uint32",
        other => {
            return Err(CubeStoreError::UnsupportedDataType(format!("{:?}", other)));
        }
    })
}

macro_rules! dispatch_numeric {
    ($data_type:expr, $read:ident) => {
        match $data_type {
            DataType::Float32 => $read!(f32),
            DataType::Float64 => $read!(f64),
            DataType::Int8 => $read!(i8),
            DataType::Int16 => $read!(i16),
            DataType::Int32 => $read!(i32),
            DataType::UInt8 => $read!(u8),
            DataType::UInt16 => $read!(u16),
            DataType::UInt32 => $read!(u32),
            other => {
                return Err(CubeStoreError::UnsupportedDataType(format!("{:?}", other)));
            }
        }
    };
}

/// Read an array subset as `f32`.
pub fn retrieve_subset_f32(array: &CubeArray, subset: &ArraySubset) -> Result<Vec<f32>> {
    macro_rules! read {
        ($t:ty) => {
            array
                .retrieve_array_subset_elements::<$t>(subset)
                .map_err(CubeStoreError::zarr_error)?
                .into_iter()
                .map(|v| v as f32)
                .collect()
        };
    }
    Ok(dispatch_numeric!(array.data_type(), read))
}

/// Read a stored chunk as `f64`; `None` if the chunk was never written.
pub fn retrieve_chunk_f64_if_exists(
    array: &CubeArray,
    chunk_indices: &[u64],
) -> Result<Option<Vec<f64>>> {
    macro_rules! read {
        ($t:ty) => {
            array
                .retrieve_chunk_elements_if_exists::<$t>(chunk_indices)
                .map_err(CubeStoreError::zarr_error)?
                .map(|values| values.into_iter().map(|v| v as f64).collect())
        };
    }
    Ok(dispatch_numeric!(array.data_type(), read))
}

/// The array's Zarr fill value as `f64`.
pub fn fill_value_f64(array: &CubeArray) -> Result<f64> {
    let bytes = array.fill_value().as_ne_bytes();
    macro_rules! read {
        ($t:ty) => {
            <$t>::from_ne_bytes(bytes.try_into().map_err(|_| {
                CubeStoreError::invalid_metadata(format!(
                    "fill value has {} bytes, expected {}",
                    bytes.len(),
                    std::mem::size_of::<$t>()
                ))
            })?) as f64
        };
    }
    Ok(dispatch_numeric!(array.data_type(), read))
}

/// Element equality as used by pruning: NaN equals NaN.
#[inline]
pub fn same_value(a: f64, b: f64) -> bool {
    a == b || (a.is_nan() && b.is_nan())
}
