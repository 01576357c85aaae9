//! Time-series extraction for points and polygons.
//!
//! Values come from the finest level of a dataset. A point uses its nearest
//! cell; a polygon averages the cells whose centres fall inside it under the
//! even-odd rule. If a `<var>_stdev` companion exists it supplies the
//! uncertainty, averaged over the same cells.

use chrono::{DateTime, SecondsFormat, Utc};
use cube_common::{BoundingBox, CubeError, CubeResult};
use cube_store::{parse_time, CubeHandle, CubeReader, VariableInfo, Window, STDEV_SUFFIX};
use serde::Serialize;
use serde_json::Value;

/// Date range and result limit of a time-series request.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TimeSeriesQuery {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    /// `None` or `-1`: every step; `n > 0`: the last `n` valid steps.
    /// With any value given, steps without a valid average are dropped.
    pub max_valids: Option<i64>,
}

impl TimeSeriesQuery {
    pub fn parse(
        start_date: Option<&str>,
        end_date: Option<&str>,
        max_valids: Option<&str>,
    ) -> CubeResult<Self> {
        let date = |param: &str, value: Option<&str>| -> CubeResult<Option<DateTime<Utc>>> {
            match value.map(str::trim).filter(|v| !v.is_empty()) {
                None => Ok(None),
                Some(v) => parse_time(v).map(Some).ok_or_else(|| {
                    CubeError::invalid_parameter(param, format!("invalid date '{}'", v))
                }),
            }
        };
        let start = date("startDate", start_date)?;
        let end = date("endDate", end_date)?;
        if let (Some(start), Some(end)) = (start, end) {
            if start > end {
                return Err(CubeError::invalid_parameter(
                    "startDate",
                    "startDate must not be after endDate",
                ));
            }
        }

        let max_valids = match max_valids.map(str::trim).filter(|v| !v.is_empty()) {
            None => None,
            Some(v) => {
                let n: i64 = v.parse().map_err(|_| {
                    CubeError::invalid_parameter("maxValids", format!("not an integer: '{}'", v))
                })?;
                if n == 0 || n < -1 {
                    return Err(CubeError::invalid_parameter(
                        "maxValids",
                        "must be either -1 or positive",
                    ));
                }
                Some(n)
            }
        };

        Ok(Self {
            start,
            end,
            max_valids,
        })
    }

    fn includes(&self, time: &DateTime<Utc>) -> bool {
        self.start.map_or(true, |s| *time >= s) && self.end.map_or(true, |e| *time <= e)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeSeriesStatistics {
    pub average: Option<f64>,
    pub uncertainty: Option<f64>,
    pub valid_count: u64,
    pub total_count: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimeSeriesResult {
    pub date: String,
    pub result: TimeSeriesStatistics,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TimeSeries {
    pub results: Vec<TimeSeriesResult>,
}

/// One series per geometry of a collection, in request order.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TimeSeriesCollection {
    pub results: Vec<Vec<TimeSeriesResult>>,
}

/// Geometry of a time-series request.
#[derive(Debug, Clone, PartialEq)]
pub enum Geometry {
    Point { lon: f64, lat: f64 },
    /// Closed rings as `(lon, lat)`; the first is the exterior.
    Polygon(Vec<Vec<(f64, f64)>>),
}

impl Geometry {
    /// Parse a GeoJSON `Point` or `Polygon`, bare or wrapped in a `Feature`.
    pub fn from_geojson(value: &Value) -> CubeResult<Self> {
        let invalid = |msg: &str| CubeError::invalid_parameter("geometry", msg.to_string());

        let geometry = match value.get("type").and_then(Value::as_str) {
            Some("Feature") => value
                .get("geometry")
                .ok_or_else(|| invalid("feature has no geometry"))?,
            _ => value,
        };
        let coordinates = geometry
            .get("coordinates")
            .ok_or_else(|| invalid("missing coordinates"))?;

        match geometry.get("type").and_then(Value::as_str) {
            Some("Point") => {
                let (lon, lat) = position(coordinates).ok_or_else(|| invalid("invalid point"))?;
                Ok(Geometry::Point { lon, lat })
            }
            Some("Polygon") => {
                let rings = coordinates
                    .as_array()
                    .filter(|rings| !rings.is_empty())
                    .ok_or_else(|| invalid("polygon needs at least one ring"))?;
                let mut parsed = Vec::with_capacity(rings.len());
                for ring in rings {
                    let points = ring
                        .as_array()
                        .ok_or_else(|| invalid("ring must be an array of positions"))?
                        .iter()
                        .map(position)
                        .collect::<Option<Vec<_>>>()
                        .ok_or_else(|| invalid("invalid position in ring"))?;
                    if points.len() < 4 {
                        return Err(invalid("ring needs at least 4 positions"));
                    }
                    if points.first() != points.last() {
                        return Err(invalid("ring is not closed"));
                    }
                    parsed.push(points);
                }
                Ok(Geometry::Polygon(parsed))
            }
            Some(other) => Err(CubeError::invalid_parameter(
                "geometry",
                format!("unsupported geometry type '{}'", other),
            )),
            None => Err(invalid("missing geometry type")),
        }
    }

    /// Parse the members of a GeoJSON `GeometryCollection`.
    pub fn collection_from_geojson(value: &Value) -> CubeResult<Vec<Self>> {
        if value.get("type").and_then(Value::as_str) != Some("GeometryCollection") {
            return Err(CubeError::invalid_parameter(
                "geometry",
                "expected a GeometryCollection",
            ));
        }
        value
            .get("geometries")
            .and_then(Value::as_array)
            .ok_or_else(|| {
                CubeError::invalid_parameter("geometry", "collection has no geometries array")
            })?
            .iter()
            .map(Geometry::from_geojson)
            .collect()
    }
}

fn position(value: &Value) -> Option<(f64, f64)> {
    let coords = value.as_array()?;
    let lon = coords.first()?.as_f64()?;
    let lat = coords.get(1)?.as_f64()?;
    (lon.is_finite() && lat.is_finite()).then_some((lon, lat))
}

/// Even-odd rule over all rings, so holes are excluded.
fn contains(rings: &[Vec<(f64, f64)>], x: f64, y: f64) -> bool {
    let mut inside = false;
    for ring in rings {
        for edge in ring.windows(2) {
            let ((x1, y1), (x2, y2)) = (edge[0], edge[1]);
            if (y1 > y) != (y2 > y) && x < (x2 - x1) * (y - y1) / (y2 - y1) + x1 {
                inside = !inside;
            }
        }
    }
    inside
}

/// Extract a time series. Synchronous; run on the blocking pool.
pub fn extract(
    handle: &CubeHandle,
    variable: &str,
    geometry: &Geometry,
    query: &TimeSeriesQuery,
) -> CubeResult<TimeSeries> {
    let to_cube_error = |e: cube_store::CubeStoreError| e.into_cube_error(handle.id());
    let reader = &handle.finest().reader;
    let info = handle.variable(variable).map_err(to_cube_error)?;
    let companion_name = format!("{}{}", variable, STDEV_SUFFIX);
    let companion = reader.variable(&companion_name);

    let Some((window, mask)) = cells(reader, geometry) else {
        return Ok(TimeSeries::default());
    };
    let total_count = mask.iter().filter(|inside| **inside).count() as u64;

    let values = reader
        .read_window_series(variable, window)
        .map_err(to_cube_error)?;
    let uncertainties = match companion {
        Some(_) => Some(
            reader
                .read_window_series(&companion_name, window)
                .map_err(to_cube_error)?,
        ),
        None => None,
    };

    let cells_per_step = window.len();
    let mut steps = Vec::new();
    for (t, time) in handle.times().iter().enumerate() {
        if !query.includes(time) {
            continue;
        }
        let range = t * cells_per_step..(t + 1) * cells_per_step;
        let (average, valid_count) = masked_mean(&values[range.clone()], &mask, info);
        let uncertainty = match (&uncertainties, companion) {
            (Some(data), Some(companion)) => masked_mean(&data[range], &mask, companion).0,
            _ => None,
        };
        steps.push(TimeSeriesResult {
            date: time.to_rfc3339_opts(SecondsFormat::Secs, true),
            result: TimeSeriesStatistics {
                average,
                uncertainty,
                valid_count,
                total_count,
            },
        });
    }

    Ok(TimeSeries {
        results: limit(steps, query.max_valids),
    })
}

/// Extract one series per geometry, reading each from the same handle.
pub fn extract_collection(
    handle: &CubeHandle,
    variable: &str,
    geometries: &[Geometry],
    query: &TimeSeriesQuery,
) -> CubeResult<TimeSeriesCollection> {
    let results = geometries
        .iter()
        .map(|geometry| extract(handle, variable, geometry, query).map(|series| series.results))
        .collect::<CubeResult<_>>()?;
    Ok(TimeSeriesCollection { results })
}

/// Window of finest-level cells covered by the geometry and a mask of the
/// cells inside it; `None` if no cell is.
fn cells(reader: &CubeReader, geometry: &Geometry) -> Option<(Window, Vec<bool>)> {
    let bbox = &reader.metadata().bbox;
    let (height, width) = reader.shape();
    let (res_x, res_y) = reader.resolution();

    match geometry {
        Geometry::Point { lon, lat } => {
            let col = ((lon - bbox.min_x) / res_x).floor();
            let row = ((bbox.max_y - lat) / res_y).floor();
            if col < 0.0 || row < 0.0 || col >= width as f64 || row >= height as f64 {
                return None;
            }
            Some((Window::new(row as u64, col as u64, 1, 1), vec![true]))
        }
        Geometry::Polygon(rings) => {
            let exterior = rings.first()?;
            let extent = exterior.iter().fold(
                BoundingBox::new(f64::MAX, f64::MAX, f64::MIN, f64::MIN),
                |b, &(x, y)| {
                    BoundingBox::new(b.min_x.min(x), b.min_y.min(y), b.max_x.max(x), b.max_y.max(y))
                },
            );
            let clamp = |v: f64, n: u64| v.floor().clamp(0.0, (n - 1) as f64) as u64;
            if extent.max_x < bbox.min_x
                || extent.min_x > bbox.max_x
                || extent.max_y < bbox.min_y
                || extent.min_y > bbox.max_y
            {
                return None;
            }
            let col0 = clamp((extent.min_x - bbox.min_x) / res_x, width);
            let col1 = clamp((extent.max_x - bbox.min_x) / res_x, width);
            let row0 = clamp((bbox.max_y - extent.max_y) / res_y, height);
            let row1 = clamp((bbox.max_y - extent.min_y) / res_y, height);
            let window = Window::new(row0, col0, row1 - row0 + 1, col1 - col0 + 1);

            let mut mask = Vec::with_capacity(window.len());
            for row in window.row..window.row_end() {
                let y = bbox.max_y - (row as f64 + 0.5) * res_y;
                for col in window.col..window.col_end() {
                    let x = bbox.min_x + (col as f64 + 0.5) * res_x;
                    mask.push(contains(rings, x, y));
                }
            }
            mask.iter().any(|inside| *inside).then_some((window, mask))
        }
    }
}

fn masked_mean(values: &[f32], mask: &[bool], info: &VariableInfo) -> (Option<f64>, u64) {
    let (sum, count) = values
        .iter()
        .zip(mask)
        .filter(|(value, inside)| **inside && !info.is_missing(**value))
        .fold((0.0f64, 0u64), |(sum, count), (value, _)| {
            (sum + *value as f64, count + 1)
        });
    if count == 0 {
        (None, 0)
    } else {
        (Some(sum / count as f64), count)
    }
}

fn limit(steps: Vec<TimeSeriesResult>, max_valids: Option<i64>) -> Vec<TimeSeriesResult> {
    let Some(max_valids) = max_valids else {
        return steps;
    };
    let valid: Vec<TimeSeriesResult> = steps
        .into_iter()
        .filter(|step| step.result.average.is_some())
        .collect();
    if max_valids > 0 && valid.len() > max_valids as usize {
        valid[valid.len() - max_valids as usize..].to_vec()
    } else {
        valid
    }
}
