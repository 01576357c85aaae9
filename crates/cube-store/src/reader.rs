//! Zarr V3 cube reader.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use zarrs::array::Array;
use zarrs::array_subset::ArraySubset;
use zarrs::group::Group;
use zarrs_filesystem::FilesystemStore;

use crate::elements::{dtype_name, fill_value_f64, retrieve_subset_f32, CubeArray};
use crate::error::{CubeStoreError, Result};
use crate::types::{CubeMetadata, VariableInfo, Window};

struct VariableArray {
    info: VariableInfo,
    array: CubeArray,
}

/// An opened cube directory: root metadata and its variable arrays.
///
/// All variables share the same spatial shape; reads are synchronous and
/// should run on a blocking thread.
pub struct CubeReader {
    path: PathBuf,
    metadata: CubeMetadata,
    height: u64,
    width: u64,
    time_steps: u64,
    variables: BTreeMap<String, VariableArray>,
}

impl std::fmt::Debug for CubeReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CubeReader")
            .field("path", &self.path)
            .field("height", &self.height)
            .field("width", &self.width)
            .field("variables", &self.variables.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl CubeReader {
    /// Open a cube directory.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if !path.is_dir() {
            return Err(CubeStoreError::NotFound(path));
        }

        let store = Arc::new(FilesystemStore::new(&path).map_err(CubeStoreError::storage_error)?);
        let group = Group::open(store.clone(), "/").map_err(CubeStoreError::zarr_error)?;

        let default_title = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("cube")
            .to_string();
        let metadata = CubeMetadata::from_attributes(group.attributes(), &default_title)?;

        let mut variables = BTreeMap::new();
        for name in discover_variables(&path)? {
            let array = Array::open(store.clone(), &format!("/{}", name))
                .map_err(CubeStoreError::zarr_error)?;
            let info = Self::variable_info(&name, &array)?;
            variables.insert(name, VariableArray { info, array });
        }

        let first = variables.values().next().ok_or_else(|| {
            CubeStoreError::invalid_metadata(format!("no variables in {}", path.display()))
        })?;
        let (height, width) = first.info.spatial_shape();
        let time_steps = first.info.time_steps();

        for var in variables.values() {
            if var.info.spatial_shape() != (height, width) || var.info.time_steps() != time_steps {
                return Err(CubeStoreError::invalid_metadata(format!(
                    "variable '{}' has shape {:?}, expected {} time step(s) of {}x{}",
                    var.info.name, var.info.shape, time_steps, height, width
                )));
            }
        }

        if !metadata.times.is_empty() && metadata.times.len() as u64 != time_steps {
            return Err(CubeStoreError::invalid_metadata(format!(
                "{} time coordinate(s) for {} time step(s)",
                metadata.times.len(),
                time_steps
            )));
        }

        Ok(Self {
            path,
            metadata,
            height,
            width,
            time_steps,
            variables,
        })
    }

    fn variable_info(name: &str, array: &CubeArray) -> Result<VariableInfo> {
        let shape = array.shape().to_vec();
        if shape.len() != 2 && shape.len() != 3 {
            return Err(CubeStoreError::invalid_metadata(format!(
                "variable '{}' must have 2 or 3 dimensions, got {}",
                name,
                shape.len()
            )));
        }
        if shape.iter().any(|&n| n == 0) {
            return Err(CubeStoreError::invalid_metadata(format!(
                "variable '{}' has an empty dimension",
                name
            )));
        }

        let origin = vec![0u64; shape.len()];
        let chunk_shape = array
            .chunk_grid()
            .chunk_shape(&origin, array.shape())
            .map_err(|e| CubeStoreError::invalid_metadata(e.to_string()))?
            .ok_or_else(|| CubeStoreError::invalid_metadata("missing chunk shape"))?
            .iter()
            .map(|n| n.get())
            .collect();

        let dtype = dtype_name(array.data_type())?.to_string();
        let fill_value = fill_value_f64(array)?;

        Ok(VariableInfo::from_attributes(
            name,
            dtype,
            shape,
            chunk_shape,
            fill_value,
            array.attributes(),
        ))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn metadata(&self) -> &CubeMetadata {
        &self.metadata
    }

    /// Spatial shape `(height, width)` shared by all variables.
    pub fn shape(&self) -> (u64, u64) {
        (self.height, self.width)
    }

    pub fn time_steps(&self) -> u64 {
        self.time_steps
    }

    /// Cell size in degrees `(x, y)`.
    pub fn resolution(&self) -> (f64, f64) {
        (
            self.metadata.bbox.width() / self.width as f64,
            self.metadata.bbox.height() / self.height as f64,
        )
    }

    pub fn variables(&self) -> impl Iterator<Item = &VariableInfo> {
        self.variables.values().map(|v| &v.info)
    }

    pub fn variable(&self, name: &str) -> Option<&VariableInfo> {
        self.variables.get(name).map(|v| &v.info)
    }

    fn array(&self, name: &str) -> Result<&VariableArray> {
        self.variables
            .get(name)
            .ok_or_else(|| CubeStoreError::VariableNotFound(name.to_string()))
    }

    /// Read a spatial window of one time step, row-major, rows north to south.
    pub fn read_window(&self, variable: &str, time_index: u64, window: Window) -> Result<Vec<f32>> {
        let var = self.array(variable)?;
        if window.is_empty() {
            return Ok(Vec::new());
        }
        if time_index >= self.time_steps
            || window.row_end() > self.height
            || window.col_end() > self.width
        {
            return Err(CubeStoreError::out_of_bounds(
                format!("t={} {}", time_index, window),
                format!("{}x{}x{}", self.time_steps, self.height, self.width),
            ));
        }

        let (start, shape) = if var.info.shape.len() == 3 {
            (
                vec![time_index, window.row, window.col],
                vec![1, window.height, window.width],
            )
        } else {
            (
                vec![window.row, window.col],
                vec![window.height, window.width],
            )
        };
        let subset =
            ArraySubset::new_with_start_shape(start, shape).map_err(CubeStoreError::zarr_error)?;
        retrieve_subset_f32(&var.array, &subset)
    }

    /// Window covered by chunk `(chunk_row, chunk_col)`, clipped at the array edge.
    pub fn chunk_window(&self, variable: &str, chunk_row: u64, chunk_col: u64) -> Result<Window> {
        let var = self.array(variable)?;
        let (ch, cw) = var.info.spatial_chunk();
        let row = chunk_row * ch;
        let col = chunk_col * cw;
        if row >= self.height || col >= self.width {
            return Err(CubeStoreError::out_of_bounds(
                format!("chunk ({}, {})", chunk_row, chunk_col),
                format!("{}x{}", self.height, self.width),
            ));
        }
        Ok(Window::new(
            row,
            col,
            ch.min(self.height - row),
            cw.min(self.width - col),
        ))
    }

    /// Read one spatial chunk of one time step.
    pub fn read_chunk(
        &self,
        variable: &str,
        time_index: u64,
        chunk_row: u64,
        chunk_col: u64,
    ) -> Result<(Window, Vec<f32>)> {
        let window = self.chunk_window(variable, chunk_row, chunk_col)?;
        let data = self.read_window(variable, time_index, window)?;
        Ok((window, data))
    }

    /// Read one full time step.
    pub fn read_time_step(&self, variable: &str, time_index: u64) -> Result<Vec<f32>> {
        self.read_window(
            variable,
            time_index,
            Window::new(0, 0, self.height, self.width),
        )
    }

    /// Read all time steps of a window, `[time][row][col]`.
    pub fn read_window_series(&self, variable: &str, window: Window) -> Result<Vec<f32>> {
        let var = self.array(variable)?;
        if window.row_end() > self.height || window.col_end() > self.width {
            return Err(CubeStoreError::out_of_bounds(
                window.to_string(),
                format!("{}x{}", self.height, self.width),
            ));
        }
        if var.info.shape.len() == 2 {
            return self.read_window(variable, 0, window);
        }
        let subset = ArraySubset::new_with_start_shape(
            vec![0, window.row, window.col],
            vec![self.time_steps, window.height, window.width],
        )
        .map_err(CubeStoreError::zarr_error)?;
        retrieve_subset_f32(&var.array, &subset)
    }
}

/// Names of the variable arrays directly under a cube directory, sorted.
///
/// A sub-directory is a variable if its `zarr.json` declares `node_type: "array"`.
pub fn discover_variables(path: &Path) -> Result<Vec<String>> {
    let mut names = Vec::new();
    for entry in fs::read_dir(path)? {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        let meta_path = entry.path().join("zarr.json");
        let Ok(text) = fs::read_to_string(&meta_path) else {
            continue;
        };
        let meta: serde_json::Value = serde_json::from_str(&text)?;
        if meta.get("node_type").and_then(|v| v.as_str()) == Some("array") {
            if let Some(name) = entry.file_name().to_str() {
                names.push(name.to_string());
            }
        }
    }
    names.sort();
    Ok(names)
}
