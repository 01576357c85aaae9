//! Zarr V3 cube writer.
//!
//! Creates the on-disk layout read by [`crate::CubeReader`]: a root group
//! carrying the cube metadata and one `[time, lat, lon]` array per variable.
//! Used by pyramid generation and to build fixtures.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::{Map, Value};
use zarrs::array::codec::bytes_to_bytes::blosc::{
    BloscCodec, BloscCompressionLevel, BloscCompressor, BloscShuffleMode,
};
use zarrs::array::codec::BytesToBytesCodecTraits;
use zarrs::array::{ArrayBuilder, DataType, Element, FillValue};
use zarrs::array_subset::ArraySubset;
use zarrs::group::GroupBuilder;
use zarrs_filesystem::FilesystemStore;

use crate::config::{WriteOptions, ZarrCompression};
use crate::elements::CubeArray;
use crate::error::{CubeStoreError, Result};
use crate::types::CubeMetadata;

/// Numeric element types a cube variable can be written with.
pub trait CubeElement: Element + Copy + Into<FillValue> + 'static {
    const DATA_TYPE: DataType;
}

macro_rules! cube_element {
    ($t:ty, $dt:expr) => {
        impl CubeElement for $t {
            const DATA_TYPE: DataType = $dt;
        }
    };
}

cube_element!(f32, DataType::Float32);
cube_element!(f64, DataType::Float64);
cube_element!(i8, DataType::Int8);
cube_element!(i16, DataType::Int16);
cube_element!(i32, DataType::Int32);
cube_element!(u8, DataType::UInt8);
cube_element!(u16, DataType::UInt16);
cube_element!(u32, DataType::UInt32);

/// Description of a variable to write.
#[derive(Debug, Clone)]
pub struct VariableSpec<T> {
    pub name: String,
    /// Number of time steps; `None` writes a 2D `[lat, lon]` array.
    pub time_steps: Option<u64>,
    pub height: u64,
    pub width: u64,
    /// Spatial chunk shape `(rows, cols)`; clamped to the array shape.
    pub chunk: (u64, u64),
    pub fill_value: T,
    pub attributes: Map<String, Value>,
}

impl<T> VariableSpec<T> {
    pub fn new(name: impl Into<String>, time_steps: u64, height: u64, width: u64, fill_value: T) -> Self {
        Self {
            name: name.into(),
            time_steps: Some(time_steps),
            height,
            width,
            chunk: (height, width),
            fill_value,
            attributes: Map::new(),
        }
    }

    pub fn with_chunk(mut self, rows: u64, cols: u64) -> Self {
        self.chunk = (rows, cols);
        self
    }

    pub fn with_attribute(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.attributes.insert(key.to_string(), value.into());
        self
    }

    pub fn with_attributes(mut self, attributes: Map<String, Value>) -> Self {
        self.attributes.extend(attributes);
        self
    }

    pub fn two_dimensional(mut self) -> Self {
        self.time_steps = None;
        self
    }

    fn shape(&self) -> Vec<u64> {
        match self.time_steps {
            Some(t) => vec![t, self.height, self.width],
            None => vec![self.height, self.width],
        }
    }

    fn chunk_shape(&self) -> Vec<u64> {
        let rows = self.chunk.0.clamp(1, self.height.max(1));
        let cols = self.chunk.1.clamp(1, self.width.max(1));
        match self.time_steps {
            Some(_) => vec![1, rows, cols],
            None => vec![rows, cols],
        }
    }
}

/// Writer for a cube directory.
pub struct CubeWriter {
    path: PathBuf,
    store: Arc<FilesystemStore>,
    options: WriteOptions,
}

impl CubeWriter {
    /// Create a cube at `path` and write its root group.
    ///
    /// The directory is created if missing; existing content is not removed.
    pub fn create(path: impl AsRef<Path>, metadata: &CubeMetadata, options: WriteOptions) -> Result<Self> {
        options.validate().map_err(CubeStoreError::ConfigError)?;
        let path = path.as_ref().to_path_buf();
        std::fs::create_dir_all(&path)?;
        let store = Arc::new(FilesystemStore::new(&path).map_err(CubeStoreError::storage_error)?);

        let group = GroupBuilder::new()
            .attributes(metadata.to_attributes())
            .build(store.clone(), "/")
            .map_err(CubeStoreError::zarr_error)?;
        group.store_metadata().map_err(CubeStoreError::storage_error)?;

        Ok(Self {
            path,
            store,
            options,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Create a variable array and store its metadata, without data.
    ///
    /// Unwritten chunks read as the fill value.
    pub fn create_variable<T: CubeElement>(&self, spec: &VariableSpec<T>) -> Result<CubeArray> {
        let chunk_grid: zarrs::array::ChunkGrid = spec
            .chunk_shape()
            .try_into()
            .map_err(|e| CubeStoreError::ConfigError(format!("{:?}", e)))?;

        let mut binding = ArrayBuilder::new(
            spec.shape(),
            T::DATA_TYPE,
            chunk_grid,
            spec.fill_value.into(),
        );
        let mut builder = binding.attributes(spec.attributes.clone());

        if self.options.compression != ZarrCompression::None {
            let codec = self.create_compression_codec(std::mem::size_of::<T>())?;
            builder = builder.bytes_to_bytes_codecs(vec![codec]);
        }

        let array = builder
            .build(self.store.clone(), &format!("/{}", spec.name))
            .map_err(CubeStoreError::zarr_error)?;
        array
            .store_metadata()
            .map_err(CubeStoreError::storage_error)?;
        Ok(array)
    }

    /// Write a whole variable: `data` is `[time][row][col]` in row-major order,
    /// rows north to south.
    pub fn write_variable<T: CubeElement>(&self, spec: &VariableSpec<T>, data: &[T]) -> Result<()> {
        let shape = spec.shape();
        let expected: u64 = shape.iter().product();
        if data.len() as u64 != expected {
            return Err(CubeStoreError::ConfigError(format!(
                "variable '{}' has {} values, shape {:?} needs {}",
                spec.name,
                data.len(),
                shape,
                expected
            )));
        }

        let array = self.create_variable(spec)?;
        let subset = ArraySubset::new_with_start_shape(vec![0; shape.len()], shape)
            .map_err(CubeStoreError::zarr_error)?;
        array
            .store_array_subset_elements(&subset, data)
            .map_err(CubeStoreError::storage_error)?;
        Ok(())
    }

    /// Write one time step of a `[time, lat, lon]` array created with
    /// [`CubeWriter::create_variable`].
    pub fn write_time_step<T: CubeElement>(
        array: &CubeArray,
        time_index: u64,
        height: u64,
        width: u64,
        data: &[T],
    ) -> Result<()> {
        let (start, shape) = if array.shape().len() == 3 {
            (vec![time_index, 0, 0], vec![1, height, width])
        } else {
            (vec![0, 0], vec![height, width])
        };
        let subset =
            ArraySubset::new_with_start_shape(start, shape).map_err(CubeStoreError::zarr_error)?;
        array
            .store_array_subset_elements(&subset, data)
            .map_err(CubeStoreError::storage_error)?;
        Ok(())
    }

    /// Create the compression codec based on configuration.
    fn create_compression_codec(&self, typesize: usize) -> Result<Arc<dyn BytesToBytesCodecTraits>> {
        let level = BloscCompressionLevel::try_from(self.options.compression_level)
            .map_err(|_| CubeStoreError::ConfigError("Invalid compression level".to_string()))?;

        let (shuffle, typesize) = if self.options.shuffle {
            (BloscShuffleMode::Shuffle, Some(typesize))
        } else {
            (BloscShuffleMode::NoShuffle, None)
        };

        let compressor = match self.options.compression {
            ZarrCompression::None => {
                return Err(CubeStoreError::ConfigError(
                    "No compression configured".to_string(),
                ))
            }
            ZarrCompression::BloscLz4 => BloscCompressor::LZ4,
            ZarrCompression::BloscZstd => BloscCompressor::Zstd,
        };

        let codec = BloscCodec::new(compressor, level, None, shuffle, typesize)
            .map_err(|e| CubeStoreError::ConfigError(e.to_string()))?;

        Ok(Arc::new(codec))
    }
}
