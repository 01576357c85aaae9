//! Dataset registry.
//!
//! Maps dataset identifiers to opened [`CubeHandle`]s. Each identifier owns a
//! slot with its own async mutex, so concurrent first requests for one
//! dataset share a single open while different datasets open in parallel.
//! Handles are closed when their backing files change, when they sit idle
//! past the inactivity TTL, or on explicit invalidation; the next request
//! reopens them under a new generation.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

use cube_common::{CubeError, CubeResult, StyleOverride};
use cube_store::{CubeHandle, CubeStoreError};
use metrics::counter;
use serde::Serialize;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::DatasetConfig;

/// Strategy for opening a dataset. Runs on the blocking pool.
pub trait CubeOpener: Send + Sync + 'static {
    fn open(&self, id: &str, path: &Path) -> Result<CubeHandle, CubeStoreError>;
}

/// Opens Zarr cubes and `.levels` pyramids from the local filesystem.
#[derive(Debug, Clone, Copy)]
pub struct ZarrOpener {
    pub tile_size: u32,
}

impl CubeOpener for ZarrOpener {
    fn open(&self, id: &str, path: &Path) -> Result<CubeHandle, CubeStoreError> {
        CubeHandle::open(id, path, self.tile_size)
    }
}

#[derive(Debug, Clone)]
pub struct RegistryConfig {
    pub inactivity_ttl: Duration,
    pub refresh_interval: Duration,
    pub allow_path_references: bool,
    pub tile_size: u32,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            inactivity_ttl: Duration::from_secs(600),
            refresh_interval: Duration::from_secs(30),
            allow_path_references: false,
            tile_size: 256,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DatasetState {
    Unopened,
    Opening,
    Open,
    Closed,
}

/// A catalog entry with its current state.
#[derive(Debug, Clone, Serialize)]
pub struct DatasetSummary {
    pub id: String,
    pub title: String,
    pub state: DatasetState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub variables: Option<Vec<String>>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RegistryStats {
    pub opens: u64,
    pub failures: u64,
    pub closes: u64,
    pub reuses: u64,
    pub open_datasets: u64,
}

/// Called with the dataset id and generation of every handle that closes.
pub type CloseHook = Arc<dyn Fn(&str, u64) + Send + Sync>;

struct OpenCube {
    handle: Arc<CubeHandle>,
    modified: Option<SystemTime>,
    last_access: Instant,
    checked_at: Instant,
}

#[derive(Debug, Clone)]
struct SlotStatus {
    state: DatasetState,
    variables: Vec<String>,
}

struct Slot {
    cube: Mutex<Option<OpenCube>>,
    status: parking_lot::Mutex<SlotStatus>,
}

impl Slot {
    fn new() -> Self {
        Self {
            cube: Mutex::new(None),
            status: parking_lot::Mutex::new(SlotStatus {
                state: DatasetState::Unopened,
                variables: Vec::new(),
            }),
        }
    }

    fn set_state(&self, state: DatasetState) {
        self.status.lock().state = state;
    }

    fn state(&self) -> DatasetState {
        self.status.lock().state
    }
}

/// Marks a slot `Opening` for as long as it lives. Unless committed, dropping
/// it restores the previous state, so a caller cancelled mid-open leaves no
/// `Opening` slot behind.
struct OpeningGuard<'a> {
    slot: &'a Slot,
    previous: DatasetState,
    committed: bool,
}

impl<'a> OpeningGuard<'a> {
    fn enter(slot: &'a Slot) -> Self {
        let previous = slot.state();
        slot.set_state(DatasetState::Opening);
        Self {
            slot,
            previous,
            committed: false,
        }
    }

    fn commit(mut self) {
        self.committed = true;
    }
}

impl Drop for OpeningGuard<'_> {
    fn drop(&mut self) {
        if !self.committed {
            self.slot.set_state(self.previous);
        }
    }
}

#[derive(Default)]
struct Counters {
    opens: AtomicU64,
    failures: AtomicU64,
    closes: AtomicU64,
    reuses: AtomicU64,
}

pub struct DatasetRegistry {
    catalog: BTreeMap<String, DatasetConfig>,
    config: RegistryConfig,
    opener: Arc<dyn CubeOpener>,
    slots: parking_lot::Mutex<HashMap<String, Arc<Slot>>>,
    generation: AtomicU64,
    epoch: AtomicU64,
    counters: Counters,
    close_hooks: parking_lot::Mutex<Vec<CloseHook>>,
    sweeper: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl DatasetRegistry {
    pub fn new(
        datasets: Vec<DatasetConfig>,
        config: RegistryConfig,
        opener: Arc<dyn CubeOpener>,
    ) -> Self {
        let catalog = datasets
            .into_iter()
            .map(|dataset| (dataset.id.clone(), dataset))
            .collect();
        Self {
            catalog,
            config,
            opener,
            slots: parking_lot::Mutex::new(HashMap::new()),
            generation: AtomicU64::new(0),
            epoch: AtomicU64::new(0),
            counters: Counters::default(),
            close_hooks: parking_lot::Mutex::new(Vec::new()),
            sweeper: parking_lot::Mutex::new(None),
        }
    }

    pub fn on_close(&self, hook: CloseHook) {
        self.close_hooks.lock().push(hook);
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Catalog identifiers, sorted.
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.catalog.keys().map(String::as_str)
    }

    pub fn entry(&self, id: &str) -> Option<&DatasetConfig> {
        self.catalog.get(id)
    }

    /// Default style for a variable from the dataset configuration.
    pub fn configured_style(&self, id: &str, variable: &str) -> Option<&StyleOverride> {
        self.catalog.get(id)?.styles.get(variable)
    }

    /// Check that a dataset can be referenced, without opening it.
    pub fn resolve(&self, name_or_path: &str) -> CubeResult<(String, PathBuf)> {
        if let Some(entry) = self.catalog.get(name_or_path) {
            return Ok((entry.id.clone(), entry.path.clone()));
        }
        if self.config.allow_path_references {
            let path = PathBuf::from(name_or_path);
            if path.exists() {
                return Ok((name_or_path.to_string(), path));
            }
        }
        Err(CubeError::DatasetNotFound(name_or_path.to_string()))
    }

    /// Changes whenever any handle opens or closes.
    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::Acquire)
    }

    fn slot(&self, id: &str) -> Arc<Slot> {
        self.slots
            .lock()
            .entry(id.to_string())
            .or_insert_with(|| Arc::new(Slot::new()))
            .clone()
    }

    /// Get the open handle for a dataset, opening it if needed.
    ///
    /// Concurrent calls for the same identifier wait for one open. A failed
    /// open leaves the slot unopened so the next call retries; a cancelled
    /// one restores the state it found.
    pub async fn open(&self, name_or_path: &str) -> CubeResult<Arc<CubeHandle>> {
        let (id, path) = self.resolve(name_or_path)?;
        let slot = self.slot(&id);
        let mut guard = slot.cube.lock().await;

        if let Some(open) = guard.as_mut() {
            let now = Instant::now();
            let stale = if now.duration_since(open.checked_at) >= self.config.refresh_interval {
                open.checked_at = now;
                is_stale(open, &path, self.config.inactivity_ttl).await
            } else {
                false
            };
            if !stale {
                open.last_access = now;
                self.counters.reuses.fetch_add(1, Ordering::Relaxed);
                return Ok(open.handle.clone());
            }
            if let Some(closed) = guard.take() {
                self.closed(&id, &slot, &closed, "stale");
            }
        }

        let opening = OpeningGuard::enter(&slot);
        let started = Instant::now();
        let opener = self.opener.clone();
        let (open_id, open_path) = (id.clone(), path.clone());
        let result = tokio::task::spawn_blocking(move || opener.open(&open_id, &open_path))
            .await
            .map_err(|e| CubeError::InternalError(format!("open task failed: {}", e)))?;

        let handle = match result {
            Ok(handle) => handle,
            Err(err) => {
                opening.commit();
                slot.set_state(DatasetState::Unopened);
                self.counters.failures.fetch_add(1, Ordering::Relaxed);
                counter!("dataset_open_failures_total").increment(1);
                warn!(dataset = %id, path = %path.display(), error = %err, "Failed to open dataset");
                return Err(err.into_cube_error(&id));
            }
        };

        let modified = modified_time(&path).await;
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        let handle = Arc::new(handle.with_generation(generation));
        let now = Instant::now();
        *guard = Some(OpenCube {
            handle: handle.clone(),
            modified,
            last_access: now,
            checked_at: now,
        });
        opening.commit();
        {
            let mut status = slot.status.lock();
            status.state = DatasetState::Open;
            status.variables = handle.variables().map(|v| v.name.clone()).collect();
        }
        self.epoch.fetch_add(1, Ordering::AcqRel);
        self.counters.opens.fetch_add(1, Ordering::Relaxed);
        counter!("dataset_opens_total").increment(1);
        info!(
            dataset = %id,
            generation = generation,
            levels = handle.levels().len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Opened dataset"
        );
        Ok(handle)
    }

    /// Close a dataset so the next request reopens it. Returns whether it was open.
    pub async fn invalidate(&self, id: &str) -> bool {
        let Some(slot) = self.slots.lock().get(id).cloned() else {
            return false;
        };
        let mut guard = slot.cube.lock().await;
        match guard.take() {
            Some(closed) => {
                self.closed(id, &slot, &closed, "invalidated");
                true
            }
            None => false,
        }
    }

    /// Close every handle that changed on disk or idled past the TTL.
    /// Returns the number closed.
    pub async fn sweep(&self) -> usize {
        let slots: Vec<(String, Arc<Slot>)> = self
            .slots
            .lock()
            .iter()
            .map(|(id, slot)| (id.clone(), slot.clone()))
            .collect();

        let mut closed = 0;
        for (id, slot) in slots {
            // Slots busy opening are fresh by definition.
            let Ok(mut guard) = slot.cube.try_lock() else {
                continue;
            };
            let Some(open) = guard.as_mut() else {
                continue;
            };
            let path = open.handle.path().to_path_buf();
            open.checked_at = Instant::now();
            if is_stale(open, &path, self.config.inactivity_ttl).await {
                if let Some(old) = guard.take() {
                    self.closed(&id, &slot, &old, "stale");
                    closed += 1;
                }
            }
        }
        closed
    }

    /// Start the background refresh sweep.
    pub fn start(self: &Arc<Self>) {
        let mut sweeper = self.sweeper.lock();
        if sweeper.is_some() {
            return;
        }
        let registry = Arc::downgrade(self);
        // A zero interval means "check on every access"; the sweep still needs a period.
        let period = self.config.refresh_interval.max(Duration::from_secs(1));
        *sweeper = Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.tick().await;
            loop {
                interval.tick().await;
                let Some(registry) = registry.upgrade() else {
                    break;
                };
                let closed = registry.sweep().await;
                if closed > 0 {
                    debug!(closed = closed, "Dataset refresh sweep");
                }
            }
        }));
        info!(
            refresh_interval_secs = period.as_secs(),
            inactivity_ttl_secs = self.config.inactivity_ttl.as_secs(),
            "Dataset registry started"
        );
    }

    /// Close every open handle. Returns the number closed.
    pub async fn invalidate_all(&self) -> usize {
        let ids: Vec<String> = self.slots.lock().keys().cloned().collect();
        let mut closed = 0;
        for id in ids {
            if self.invalidate(&id).await {
                closed += 1;
            }
        }
        closed
    }

    /// Stop the sweep and close every open handle.
    pub async fn stop(&self) {
        if let Some(task) = self.sweeper.lock().take() {
            task.abort();
        }
        self.invalidate_all().await;
        info!("Dataset registry stopped");
    }

    /// Catalog entries with their current state.
    pub fn list(&self) -> Vec<DatasetSummary> {
        let slots = self.slots.lock();
        self.catalog
            .values()
            .map(|entry| {
                let status = slots.get(&entry.id).map(|slot| slot.status.lock().clone());
                let (state, variables) = match status {
                    Some(status) if status.state == DatasetState::Open => {
                        (status.state, Some(status.variables))
                    }
                    Some(status) => (status.state, None),
                    None => (DatasetState::Unopened, None),
                };
                DatasetSummary {
                    id: entry.id.clone(),
                    title: entry.title.clone().unwrap_or_else(|| entry.id.clone()),
                    state,
                    variables,
                }
            })
            .collect()
    }

    pub fn state(&self, id: &str) -> DatasetState {
        self.slots
            .lock()
            .get(id)
            .map(|slot| slot.status.lock().state)
            .unwrap_or(DatasetState::Unopened)
    }

    pub fn stats(&self) -> RegistryStats {
        let open_datasets = self
            .slots
            .lock()
            .values()
            .filter(|slot| slot.status.lock().state == DatasetState::Open)
            .count() as u64;
        RegistryStats {
            opens: self.counters.opens.load(Ordering::Relaxed),
            failures: self.counters.failures.load(Ordering::Relaxed),
            closes: self.counters.closes.load(Ordering::Relaxed),
            reuses: self.counters.reuses.load(Ordering::Relaxed),
            open_datasets,
        }
    }

    fn closed(&self, id: &str, slot: &Slot, cube: &OpenCube, reason: &str) {
        {
            let mut status = slot.status.lock();
            status.state = DatasetState::Closed;
            status.variables.clear();
        }
        self.epoch.fetch_add(1, Ordering::AcqRel);
        self.counters.closes.fetch_add(1, Ordering::Relaxed);
        counter!("dataset_closes_total").increment(1);
        let generation = cube.handle.generation();
        info!(dataset = %id, generation = generation, reason = reason, "Closed dataset");
        for hook in self.close_hooks.lock().iter() {
            hook(id, generation);
        }
    }
}

async fn is_stale(open: &OpenCube, path: &Path, inactivity_ttl: Duration) -> bool {
    if open.last_access.elapsed() > inactivity_ttl {
        return true;
    }
    modified_time(path).await != open.modified
}

/// Latest modification time of a dataset directory and its root metadata.
async fn modified_time(path: &Path) -> Option<SystemTime> {
    let mut latest = None;
    for candidate in [
        path.to_path_buf(),
        path.join("zarr.json"),
        path.join(cube_store::handle::LINK_FILE),
    ] {
        if let Ok(meta) = tokio::fs::metadata(&candidate).await {
            if let Ok(modified) = meta.modified() {
                latest = latest.max(Some(modified));
            }
        }
    }
    latest
}
