//! Time-series endpoints.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use axum::{
    body::Bytes,
    extract::{Extension, Path, Query},
    response::{IntoResponse, Response},
    Json,
};
use cube_common::{CubeError, CubeResult};
use serde_json::Value;
use tracing::{debug, instrument};

use super::common::json_error;
use crate::metrics::Operation;
use crate::state::AppState;
use crate::timeseries::{
    extract, extract_collection, Geometry, TimeSeries, TimeSeriesCollection, TimeSeriesQuery,
};

/// GET /ts/{dataset}/{variable}/point?lon&lat&startDate&endDate&maxValids
#[instrument(skip(state, query))]
pub async fn point_timeseries_handler(
    Extension(state): Extension<Arc<AppState>>,
    Path((dataset, variable)): Path<(String, String)>,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    let request = parse_point(&query).and_then(|geometry| Ok((geometry, parse_query(&query)?)));
    respond(&state, &dataset, &variable, request).await
}

/// POST /ts/{dataset}/{variable}/geometry with a GeoJSON body
#[instrument(skip(state, query, body))]
pub async fn geometry_timeseries_handler(
    Extension(state): Extension<Arc<AppState>>,
    Path((dataset, variable)): Path<(String, String)>,
    Query(query): Query<HashMap<String, String>>,
    body: Bytes,
) -> Response {
    let request = serde_json::from_slice::<Value>(&body)
        .map_err(|e| CubeError::invalid_parameter("geometry", format!("invalid JSON: {}", e)))
        .and_then(|value| Geometry::from_geojson(&value))
        .and_then(|geometry| Ok((geometry, parse_query(&query)?)));
    respond(&state, &dataset, &variable, request).await
}

/// POST /ts/{dataset}/{variable}/geometries with a GeoJSON `GeometryCollection`
#[instrument(skip(state, query, body))]
pub async fn geometries_timeseries_handler(
    Extension(state): Extension<Arc<AppState>>,
    Path((dataset, variable)): Path<(String, String)>,
    Query(query): Query<HashMap<String, String>>,
    body: Bytes,
) -> Response {
    state.metrics.record_request(Operation::TimeSeries);
    let started = Instant::now();
    let request = serde_json::from_slice::<Value>(&body)
        .map_err(|e| CubeError::invalid_parameter("geometry", format!("invalid JSON: {}", e)))
        .and_then(|value| Geometry::collection_from_geojson(&value))
        .and_then(|geometries| Ok((geometries, parse_query(&query)?)));
    let result = match request {
        Ok((geometries, query)) => {
            timeseries_collection(&state, &dataset, &variable, geometries, query).await
        }
        Err(e) => Err(e),
    };
    match result {
        Ok(collection) => {
            let elapsed = started.elapsed();
            state
                .metrics
                .record_timeseries(elapsed.as_micros() as u64)
                .await;
            debug!(
                geometries = collection.results.len(),
                elapsed_ms = elapsed.as_millis() as u64,
                "Extracted time series collection"
            );
            Json(collection).into_response()
        }
        Err(e) => json_error(&state, e),
    }
}

async fn respond(
    state: &AppState,
    dataset: &str,
    variable: &str,
    request: CubeResult<(Geometry, TimeSeriesQuery)>,
) -> Response {
    state.metrics.record_request(Operation::TimeSeries);
    let started = Instant::now();
    let result = match request {
        Ok((geometry, query)) => timeseries(state, dataset, variable, geometry, query).await,
        Err(e) => Err(e),
    };
    match result {
        Ok(series) => {
            let elapsed = started.elapsed();
            state
                .metrics
                .record_timeseries(elapsed.as_micros() as u64)
                .await;
            debug!(
                steps = series.results.len(),
                elapsed_ms = elapsed.as_millis() as u64,
                "Extracted time series"
            );
            Json(series).into_response()
        }
        Err(e) => json_error(state, e),
    }
}

async fn timeseries(
    state: &AppState,
    dataset: &str,
    variable: &str,
    geometry: Geometry,
    query: TimeSeriesQuery,
) -> CubeResult<TimeSeries> {
    let handle = state.registry.open(dataset).await?;
    let variable = variable.to_string();
    tokio::task::spawn_blocking(move || extract(&handle, &variable, &geometry, &query))
        .await
        .map_err(|e| CubeError::InternalError(format!("time series task failed: {}", e)))?
}

async fn timeseries_collection(
    state: &AppState,
    dataset: &str,
    variable: &str,
    geometries: Vec<Geometry>,
    query: TimeSeriesQuery,
) -> CubeResult<TimeSeriesCollection> {
    let handle = state.registry.open(dataset).await?;
    let variable = variable.to_string();
    tokio::task::spawn_blocking(move || extract_collection(&handle, &variable, &geometries, &query))
        .await
        .map_err(|e| CubeError::InternalError(format!("time series task failed: {}", e)))?
}

fn parse_point(query: &HashMap<String, String>) -> CubeResult<Geometry> {
    let coordinate = |name: &str| -> CubeResult<f64> {
        let value = query
            .get(name)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
            .ok_or_else(|| CubeError::MissingParameter(name.to_string()))?;
        value
            .parse::<f64>()
            .ok()
            .filter(|v| v.is_finite())
            .ok_or_else(|| {
                CubeError::invalid_parameter(name, format!("expected a number, got '{}'", value))
            })
    };
    Ok(Geometry::Point {
        lon: coordinate("lon")?,
        lat: coordinate("lat")?,
    })
}

fn parse_query(query: &HashMap<String, String>) -> CubeResult<TimeSeriesQuery> {
    TimeSeriesQuery::parse(
        query.get("startDate").map(String::as_str),
        query.get("endDate").map(String::as_str),
        query.get("maxValids").map(String::as_str),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn query(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_parse_point() {
        let geometry = parse_point(&query(&[("lon", "10.5"), ("lat", "-3")])).unwrap();
        assert_eq!(geometry, Geometry::Point { lon: 10.5, lat: -3.0 });

        let err = parse_point(&query(&[("lon", "10.5")])).unwrap_err();
        assert!(matches!(err, CubeError::MissingParameter(ref p) if p == "lat"));

        let err = parse_point(&query(&[("lon", "east"), ("lat", "1")])).unwrap_err();
        assert_eq!(err.exception_code(), "InvalidParameterValue");
    }

    #[test]
    fn test_parse_query_rejects_zero_max_valids() {
        let err = parse_query(&query(&[("maxValids", "0")])).unwrap_err();
        assert_eq!(err.exception_code(), "InvalidParameterValue");
        assert_eq!(
            parse_query(&query(&[("maxValids", "-1")])).unwrap().max_valids,
            Some(-1)
        );
    }
}
