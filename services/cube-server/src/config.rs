//! Server configuration.
//!
//! Settings are layered: a YAML file (`--config` / `CUBE_CONFIG`) provides
//! the base, then environment variables and command-line flags override
//! individual keys. Flags win over environment variables because clap
//! resolves both into the same argument.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use cube_common::StyleOverride;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tile_cache::CacheSize;

use crate::registry::RegistryConfig;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_yaml::Error,
    },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// How tiles obtain their source values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TileMode {
    /// Assemble windows from decoded chunks kept in a shared cache.
    #[default]
    ChunkCached,
    /// Read exactly the window each tile needs.
    DirectRead,
}

impl TileMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            TileMode::ChunkCached => "chunk_cached",
            TileMode::DirectRead => "direct_read",
        }
    }
}

impl FromStr for TileMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "chunk_cached" => Ok(TileMode::ChunkCached),
            "direct_read" => Ok(TileMode::DirectRead),
            other => Err(ConfigError::Invalid(format!(
                "unknown tile mode '{}', expected chunk_cached or direct_read",
                other
            ))),
        }
    }
}

impl fmt::Display for TileMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One catalog entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetConfig {
    pub id: String,
    pub path: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Per-variable default styles.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub styles: HashMap<String, StyleOverride>,
}

impl DatasetConfig {
    pub fn new(id: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            id: id.into(),
            path: path.into(),
            title: None,
            styles: HashMap::new(),
        }
    }

    /// Parse `id=path` as given to `--dataset`.
    pub fn parse_arg(arg: &str) -> Result<Self, ConfigError> {
        match arg.split_once('=') {
            Some((id, path)) if !id.trim().is_empty() && !path.trim().is_empty() => {
                Ok(Self::new(id.trim(), path.trim()))
            }
            _ => Err(ConfigError::Invalid(format!(
                "dataset must be given as ID=PATH, got '{}'",
                arg
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub listen: String,
    /// Public URL used in capabilities documents; derived from `listen` if unset.
    pub base_url: Option<String>,
    pub title: String,
    pub tile_cache_size: CacheSize,
    pub chunk_cache_size: CacheSize,
    pub tile_mode: TileMode,
    pub tile_size: u32,
    pub inactivity_ttl_secs: u64,
    pub refresh_interval_secs: u64,
    pub capabilities_ttl_secs: u64,
    pub allow_path_references: bool,
    pub datasets: Vec<DatasetConfig>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0:8080".to_string(),
            base_url: None,
            title: "Data Cube Tile Server".to_string(),
            tile_cache_size: CacheSize::bytes(512_000_000),
            chunk_cache_size: CacheSize::bytes(256_000_000),
            tile_mode: TileMode::ChunkCached,
            tile_size: 256,
            inactivity_ttl_secs: 600,
            refresh_interval_secs: 30,
            capabilities_ttl_secs: 120,
            allow_path_references: false,
            datasets: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum LogFormat {
    #[default]
    Json,
    Pretty,
}

#[derive(Parser, Debug)]
#[command(name = "cube-server")]
#[command(about = "WMTS tile and time-series server for Zarr data cubes")]
pub struct ServerArgs {
    /// YAML configuration file
    #[arg(short, long, env = "CUBE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Listen address
    #[arg(short, long, env = "CUBE_LISTEN")]
    pub listen: Option<String>,

    /// Public base URL used in capabilities documents
    #[arg(long, env = "CUBE_BASE_URL")]
    pub base_url: Option<String>,

    /// Serve a dataset, given as ID=PATH (repeatable)
    #[arg(short = 'd', long = "dataset", value_name = "ID=PATH")]
    pub datasets: Vec<String>,

    /// Encoded tile cache budget, e.g. 512M, 2G or OFF
    #[arg(long, env = "CUBE_TILE_CACHE")]
    pub tile_cache: Option<String>,

    /// Decoded chunk cache budget, e.g. 256M or OFF
    #[arg(long, env = "CUBE_CHUNK_CACHE")]
    pub chunk_cache: Option<String>,

    /// Tile source strategy: chunk_cached or direct_read
    #[arg(long, env = "CUBE_TILE_MODE")]
    pub tile_mode: Option<String>,

    /// Tile size in pixels for cubes without a fixed Earth grid
    #[arg(long, env = "CUBE_TILE_SIZE")]
    pub tile_size: Option<u32>,

    /// Close datasets idle for longer than this
    #[arg(long, env = "CUBE_INACTIVITY_TTL_SECS")]
    pub inactivity_ttl_secs: Option<u64>,

    /// Interval of the dataset refresh sweep
    #[arg(long, env = "CUBE_REFRESH_INTERVAL_SECS")]
    pub refresh_interval_secs: Option<u64>,

    /// Lifetime of the cached capabilities document
    #[arg(long, env = "CAPABILITIES_CACHE_TTL_SECS")]
    pub capabilities_ttl_secs: Option<u64>,

    /// Allow datasets to be referenced by filesystem path
    #[arg(long)]
    pub allow_path_references: bool,

    /// Log level, used when RUST_LOG is not set
    #[arg(long, default_value = "info")]
    pub log_level: String,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Json)]
    pub log_format: LogFormat,

    /// Number of tokio worker threads (default: number of CPU cores)
    #[arg(long)]
    pub worker_threads: Option<usize>,
}

impl ServerConfig {
    pub fn from_yaml_str(text: &str, path: &Path) -> Result<Self, ConfigError> {
        serde_yaml::from_str(text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Load a YAML file. Relative dataset paths resolve against the file's directory.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config = Self::from_yaml_str(&text, path)?;
        if let Some(base) = path.parent() {
            for dataset in &mut config.datasets {
                if dataset.path.is_relative() {
                    dataset.path = base.join(&dataset.path);
                }
            }
        }
        Ok(config)
    }

    /// Build the effective configuration from the file named by `args`, if
    /// any, with the overrides in `args` applied, and validate it.
    pub fn load(args: &ServerArgs) -> Result<Self, ConfigError> {
        let mut config = match &args.config {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_args(args)?;
        config.validate()?;
        Ok(config)
    }

    pub fn apply_args(&mut self, args: &ServerArgs) -> Result<(), ConfigError> {
        if let Some(listen) = &args.listen {
            self.listen = listen.clone();
        }
        if let Some(base_url) = &args.base_url {
            self.base_url = Some(base_url.clone());
        }
        if let Some(size) = &args.tile_cache {
            self.tile_cache_size =
                CacheSize::parse(size).map_err(|e| ConfigError::Invalid(e.to_string()))?;
        }
        if let Some(size) = &args.chunk_cache {
            self.chunk_cache_size =
                CacheSize::parse(size).map_err(|e| ConfigError::Invalid(e.to_string()))?;
        }
        if let Some(mode) = &args.tile_mode {
            self.tile_mode = mode.parse()?;
        }
        if let Some(tile_size) = args.tile_size {
            self.tile_size = tile_size;
        }
        if let Some(ttl) = args.inactivity_ttl_secs {
            self.inactivity_ttl_secs = ttl;
        }
        if let Some(interval) = args.refresh_interval_secs {
            self.refresh_interval_secs = interval;
        }
        if let Some(ttl) = args.capabilities_ttl_secs {
            self.capabilities_ttl_secs = ttl;
        }
        if args.allow_path_references {
            self.allow_path_references = true;
        }
        for arg in &args.datasets {
            let dataset = DatasetConfig::parse_arg(arg)?;
            self.datasets.retain(|d| d.id != dataset.id);
            self.datasets.push(dataset);
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.listen.parse::<SocketAddr>().map_err(|e| {
            ConfigError::Invalid(format!("listen address '{}': {}", self.listen, e))
        })?;

        if self.tile_size == 0 || self.tile_size > 4096 {
            return Err(ConfigError::Invalid(format!(
                "tile_size must be in 1..=4096, got {}",
                self.tile_size
            )));
        }
        if self.refresh_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "refresh_interval_secs must be positive".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for dataset in &self.datasets {
            if dataset.id.trim().is_empty() || dataset.id.contains('/') {
                return Err(ConfigError::Invalid(format!(
                    "invalid dataset id '{}'",
                    dataset.id
                )));
            }
            if !seen.insert(dataset.id.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate dataset id '{}'",
                    dataset.id
                )));
            }
            if dataset.path.as_os_str().is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "dataset '{}' has an empty path",
                    dataset.id
                )));
            }
            for (variable, style) in &dataset.styles {
                if let (Some(vmin), Some(vmax)) = (style.vmin, style.vmax) {
                    if vmin >= vmax {
                        return Err(ConfigError::Invalid(format!(
                            "dataset '{}' variable '{}': vmin {} must be less than vmax {}",
                            dataset.id, variable, vmin, vmax
                        )));
                    }
                }
            }
        }
        Ok(())
    }

    /// Base URL for links in capabilities, without a trailing slash.
    pub fn base_url(&self) -> String {
        match &self.base_url {
            Some(url) => url.trim_end_matches('/').to_string(),
            None => {
                let host = self.listen.replace("0.0.0.0", "localhost");
                format!("http://{}", host)
            }
        }
    }

    pub fn registry_config(&self) -> RegistryConfig {
        RegistryConfig {
            inactivity_ttl: Duration::from_secs(self.inactivity_ttl_secs),
            refresh_interval: Duration::from_secs(self.refresh_interval_secs),
            allow_path_references: self.allow_path_references,
            tile_size: self.tile_size,
        }
    }
}
