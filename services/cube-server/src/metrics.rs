//! Application metrics collection and reporting.

use metrics::{counter, gauge, histogram};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tile_cache::CacheStatsSnapshot;
use tokio::sync::RwLock;

use crate::registry::RegistryStats;

/// Request kinds counted separately.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    GetCapabilities,
    GetTile,
    GetFeatureInfo,
    ListDatasets,
    TimeSeries,
    /// A WMTS request naming no known operation.
    Other,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::GetCapabilities => "GetCapabilities",
            Operation::GetTile => "GetTile",
            Operation::GetFeatureInfo => "GetFeatureInfo",
            Operation::ListDatasets => "ListDatasets",
            Operation::TimeSeries => "TimeSeries",
            Operation::Other => "Other",
        }
    }

    /// The WMTS operation named by a `Request` parameter, ignoring case.
    pub fn from_wmts_request(name: &str) -> Operation {
        [
            Operation::GetCapabilities,
            Operation::GetTile,
            Operation::GetFeatureInfo,
        ]
        .into_iter()
        .find(|op| op.as_str().eq_ignore_ascii_case(name))
        .unwrap_or(Operation::Other)
    }
}

/// Metrics collector for the cube server.
#[derive(Debug)]
pub struct MetricsCollector {
    pub capabilities_requests: AtomicU64,
    pub tile_requests: AtomicU64,
    pub feature_info_requests: AtomicU64,
    pub dataset_requests: AtomicU64,
    pub timeseries_requests: AtomicU64,
    pub other_requests: AtomicU64,
    pub errors: AtomicU64,

    tile_times: RwLock<TimingStats>,
    timeseries_times: RwLock<TimingStats>,

    start_time: Instant,
}

#[derive(Debug, Default)]
struct TimingStats {
    count: u64,
    total_us: u64,
    min_us: u64,
    max_us: u64,
    last_us: u64,
}

impl TimingStats {
    fn record(&mut self, duration_us: u64) {
        self.count += 1;
        self.total_us += duration_us;
        self.last_us = duration_us;
        if self.min_us == 0 || duration_us < self.min_us {
            self.min_us = duration_us;
        }
        if duration_us > self.max_us {
            self.max_us = duration_us;
        }
    }

    fn avg_ms(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            (self.total_us as f64 / self.count as f64) / 1000.0
        }
    }

    fn summary(&self) -> TimingSummary {
        TimingSummary {
            count: self.count,
            avg_ms: self.avg_ms(),
            min_ms: self.min_us as f64 / 1000.0,
            max_ms: self.max_us as f64 / 1000.0,
            last_ms: self.last_us as f64 / 1000.0,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TimingSummary {
    pub count: u64,
    pub avg_ms: f64,
    pub min_ms: f64,
    pub max_ms: f64,
    pub last_ms: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub uptime_secs: u64,
    pub capabilities_requests: u64,
    pub tile_requests: u64,
    pub feature_info_requests: u64,
    pub dataset_requests: u64,
    pub timeseries_requests: u64,
    pub other_requests: u64,
    pub errors: u64,
    pub tiles: TimingSummary,
    pub timeseries: TimingSummary,
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            capabilities_requests: AtomicU64::new(0),
            tile_requests: AtomicU64::new(0),
            feature_info_requests: AtomicU64::new(0),
            dataset_requests: AtomicU64::new(0),
            timeseries_requests: AtomicU64::new(0),
            other_requests: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            tile_times: RwLock::new(TimingStats::default()),
            timeseries_times: RwLock::new(TimingStats::default()),
            start_time: Instant::now(),
        }
    }

    pub fn record_request(&self, operation: Operation) {
        let counter = match operation {
            Operation::GetCapabilities => &self.capabilities_requests,
            Operation::GetTile => &self.tile_requests,
            Operation::GetFeatureInfo => &self.feature_info_requests,
            Operation::ListDatasets => &self.dataset_requests,
            Operation::TimeSeries => &self.timeseries_requests,
            Operation::Other => &self.other_requests,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        counter!("cube_requests_total", "operation" => operation.as_str()).increment(1);
    }

    pub fn record_error(&self, code: &'static str) {
        self.errors.fetch_add(1, Ordering::Relaxed);
        counter!("cube_errors_total", "code" => code).increment(1);
    }

    /// Record a served tile, cached or computed.
    pub async fn record_tile(&self, duration_us: u64) {
        histogram!("tile_request_duration_ms").record(duration_us as f64 / 1000.0);
        self.tile_times.write().await.record(duration_us);
    }

    pub async fn record_timeseries(&self, duration_us: u64) {
        histogram!("timeseries_duration_ms").record(duration_us as f64 / 1000.0);
        self.timeseries_times.write().await.record(duration_us);
    }

    /// Publish cache statistics as gauges, labelled by cache name.
    pub fn record_cache_stats(&self, stats: &CacheStatsSnapshot) {
        let cache = stats.name.clone();
        gauge!("cache_entries", "cache" => cache.clone()).set(stats.entries as f64);
        gauge!("cache_size_bytes", "cache" => cache.clone()).set(stats.size_bytes as f64);
        gauge!("cache_budget_bytes", "cache" => cache.clone()).set(stats.budget_bytes as f64);
        gauge!("cache_hits", "cache" => cache.clone()).set(stats.hits as f64);
        gauge!("cache_misses", "cache" => cache.clone()).set(stats.misses as f64);
        gauge!("cache_evictions", "cache" => cache.clone()).set(stats.evictions as f64);
        gauge!("cache_hit_rate_percent", "cache" => cache).set(stats.hit_rate);
    }

    pub fn record_registry_stats(&self, stats: &RegistryStats) {
        gauge!("datasets_open").set(stats.open_datasets as f64);
        gauge!("dataset_reuses").set(stats.reuses as f64);
    }

    pub async fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            uptime_secs: self.start_time.elapsed().as_secs(),
            capabilities_requests: self.capabilities_requests.load(Ordering::Relaxed),
            tile_requests: self.tile_requests.load(Ordering::Relaxed),
            feature_info_requests: self.feature_info_requests.load(Ordering::Relaxed),
            dataset_requests: self.dataset_requests.load(Ordering::Relaxed),
            timeseries_requests: self.timeseries_requests.load(Ordering::Relaxed),
            other_requests: self.other_requests.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            tiles: self.tile_times.read().await.summary(),
            timeseries: self.timeseries_times.read().await.summary(),
        }
    }
}
