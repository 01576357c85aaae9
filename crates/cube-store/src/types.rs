//! Core types for cube storage.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use cube_common::{BoundingBox, GridSpec};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{CubeStoreError, Result};

/// Name suffix of the companion variable holding per-cell standard deviations.
pub const STDEV_SUFFIX: &str = "_stdev";

/// Root group metadata of a cube.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CubeMetadata {
    pub title: String,
    pub bbox: BoundingBox,
    /// Time coordinates, one per step along the first array dimension.
    pub times: Vec<DateTime<Utc>>,
    /// Fixed Earth grid the cube was produced on, if any.
    pub grid: Option<GridSpec>,
}

impl CubeMetadata {
    pub fn new(title: impl Into<String>, bbox: BoundingBox) -> Self {
        Self {
            title: title.into(),
            bbox,
            times: Vec::new(),
            grid: None,
        }
    }

    /// Serialize into root group attributes.
    pub fn to_attributes(&self) -> Map<String, Value> {
        let mut attrs = Map::new();
        attrs.insert("title".to_string(), Value::from(self.title.clone()));
        attrs.insert("bbox".to_string(), serde_json::json!(self.bbox.to_array()));
        attrs.insert(
            "time".to_string(),
            Value::Array(
                self.times
                    .iter()
                    .map(|t| Value::from(t.to_rfc3339()))
                    .collect(),
            ),
        );
        if let Some(grid) = &self.grid {
            attrs.insert(
                "grid".to_string(),
                serde_json::json!({
                    "tile": grid.tile,
                    "level": grid.level,
                    "inv_res": grid.inv_res,
                }),
            );
        }
        attrs
    }

    /// Parse root group attributes. `title` falls back to `default_title`.
    pub fn from_attributes(attrs: &Map<String, Value>, default_title: &str) -> Result<Self> {
        let title = attrs
            .get("title")
            .and_then(|v| v.as_str())
            .unwrap_or(default_title)
            .to_string();

        let bbox = attrs
            .get("bbox")
            .and_then(|v| v.as_array())
            .and_then(|arr| {
                if arr.len() == 4 {
                    Some(BoundingBox::new(
                        arr[0].as_f64()?,
                        arr[1].as_f64()?,
                        arr[2].as_f64()?,
                        arr[3].as_f64()?,
                    ))
                } else {
                    None
                }
            })
            .ok_or_else(|| {
                CubeStoreError::invalid_metadata("missing or malformed 'bbox' attribute")
            })?;
        if !(bbox.width() > 0.0 && bbox.height() > 0.0) {
            return Err(CubeStoreError::invalid_metadata(format!(
                "empty bbox {}",
                bbox
            )));
        }

        let times = match attrs.get("time") {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Array(values)) => values
                .iter()
                .map(|v| {
                    v.as_str().and_then(parse_time).ok_or_else(|| {
                        CubeStoreError::invalid_metadata(format!("invalid time value {}", v))
                    })
                })
                .collect::<Result<Vec<_>>>()?,
            Some(other) => {
                return Err(CubeStoreError::invalid_metadata(format!(
                    "'time' must be an array, got {}",
                    other
                )))
            }
        };

        let grid = match attrs.get("grid") {
            None | Some(Value::Null) => None,
            Some(value) => {
                let raw: GridAttr = serde_json::from_value(value.clone())?;
                let spec = GridSpec::new(raw.tile, raw.level).map_err(|e| {
                    CubeStoreError::invalid_metadata(format!("invalid grid attribute: {}", e))
                })?;
                if spec.inv_res != raw.inv_res {
                    return Err(CubeStoreError::invalid_metadata(format!(
                        "grid inv_res {} does not match tile {} level {}",
                        raw.inv_res, raw.tile, raw.level
                    )));
                }
                Some(spec)
            }
        };

        Ok(Self {
            title,
            bbox,
            times,
            grid,
        })
    }
}

#[derive(Deserialize)]
struct GridAttr {
    tile: u32,
    level: u32,
    inv_res: u64,
}

/// Metadata of one variable array.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VariableInfo {
    pub name: String,
    pub dtype: String,
    /// Array shape, `[time, lat, lon]` or `[lat, lon]`.
    pub shape: Vec<u64>,
    pub chunk_shape: Vec<u64>,
    /// Zarr fill value, the value of chunks that were never written.
    pub fill_value: f64,
    /// CF `_FillValue` attribute, if it differs from the Zarr fill value.
    pub missing_value: Option<f64>,
    pub valid_min: Option<f64>,
    pub valid_max: Option<f64>,
    pub units: Option<String>,
    pub long_name: Option<String>,
    pub color_bar_name: Option<String>,
    pub color_value_min: Option<f64>,
    pub color_value_max: Option<f64>,
}

impl VariableInfo {
    /// Number of time steps; 2D arrays have one.
    pub fn time_steps(&self) -> u64 {
        if self.shape.len() == 3 {
            self.shape[0]
        } else {
            1
        }
    }

    /// Spatial shape `(height, width)`.
    pub fn spatial_shape(&self) -> (u64, u64) {
        let n = self.shape.len();
        (self.shape[n - 2], self.shape[n - 1])
    }

    /// Spatial chunk shape `(rows, cols)`.
    pub fn spatial_chunk(&self) -> (u64, u64) {
        let n = self.chunk_shape.len();
        (self.chunk_shape[n - 2], self.chunk_shape[n - 1])
    }

    /// Number of chunks along `(rows, cols)`.
    pub fn chunk_grid(&self) -> (u64, u64) {
        let (h, w) = self.spatial_shape();
        let (ch, cw) = self.spatial_chunk();
        (h.div_ceil(ch), w.div_ceil(cw))
    }

    /// Whether a cell value counts as missing: NaN, a fill value, or outside
    /// `[valid_min, valid_max]`.
    pub fn is_missing(&self, value: f32) -> bool {
        if value.is_nan() {
            return true;
        }
        let v = value as f64;
        if !self.fill_value.is_nan() && v == self.fill_value as f32 as f64 {
            return true;
        }
        if let Some(missing) = self.missing_value {
            if v == missing as f32 as f64 {
                return true;
            }
        }
        // Bounds are rounded to f32 like the data, so values on a bound stay valid.
        if let Some(min) = self.valid_min {
            if value < min as f32 {
                return true;
            }
        }
        if let Some(max) = self.valid_max {
            if value > max as f32 {
                return true;
            }
        }
        false
    }

    /// Read variable attributes from array metadata.
    pub(crate) fn from_attributes(
        name: &str,
        dtype: String,
        shape: Vec<u64>,
        chunk_shape: Vec<u64>,
        fill_value: f64,
        attrs: &Map<String, Value>,
    ) -> Self {
        let number = |key: &str| attrs.get(key).and_then(|v| v.as_f64());
        let text = |key: &str| {
            attrs
                .get(key)
                .and_then(|v| v.as_str())
                .map(str::to_string)
        };

        Self {
            name: name.to_string(),
            dtype,
            shape,
            chunk_shape,
            fill_value,
            missing_value: number("_FillValue"),
            valid_min: number("valid_min"),
            valid_max: number("valid_max"),
            units: text("units"),
            long_name: text("long_name"),
            color_bar_name: text("color_bar_name"),
            color_value_min: number("color_value_min"),
            color_value_max: number("color_value_max"),
        }
    }

    /// Variable attributes to propagate when this variable is rewritten.
    pub fn to_attributes(&self) -> Map<String, Value> {
        let mut attrs = Map::new();
        let mut put = |key: &str, value: Option<Value>| {
            if let Some(value) = value {
                attrs.insert(key.to_string(), value);
            }
        };
        put("units", self.units.clone().map(Value::from));
        put("long_name", self.long_name.clone().map(Value::from));
        put("valid_min", self.valid_min.map(Value::from));
        put("valid_max", self.valid_max.map(Value::from));
        put("color_bar_name", self.color_bar_name.clone().map(Value::from));
        put("color_value_min", self.color_value_min.map(Value::from));
        put("color_value_max", self.color_value_max.map(Value::from));
        attrs
    }
}

/// A rectangular spatial window of an array, in cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Window {
    pub row: u64,
    pub col: u64,
    pub height: u64,
    pub width: u64,
}

impl Window {
    pub fn new(row: u64, col: u64, height: u64, width: u64) -> Self {
        Self {
            row,
            col,
            height,
            width,
        }
    }

    pub fn len(&self) -> usize {
        (self.height * self.width) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.height == 0 || self.width == 0
    }

    pub fn row_end(&self) -> u64 {
        self.row + self.height
    }

    pub fn col_end(&self) -> u64 {
        self.col + self.width
    }
}

impl std::fmt::Display for Window {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "rows {}..{} cols {}..{}",
            self.row,
            self.row_end(),
            self.col,
            self.col_end()
        )
    }
}

/// Parse an RFC 3339 timestamp, a naive `YYYY-MM-DDTHH:MM:SS` (taken as UTC)
/// or a plain `YYYY-MM-DD` date (midnight UTC).
pub fn parse_time(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, format) {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}
