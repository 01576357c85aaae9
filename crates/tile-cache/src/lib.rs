//! In-memory caches for the cube tile server.
//!
//! Two caches sit on the tile path: one holding encoded PNG tiles and one
//! holding decoded array chunks. Both are instances of the same generic
//! [`TileCache`], budgeted in bytes rather than entries, with least recently
//! used entries evicted first.
//!
//! Budgets are configured with human friendly sizes (`"512M"`, `"2G"`) or
//! switched off entirely (`"OFF"`), see [`CacheSize`].

pub mod cache;
pub mod error;
pub mod size;

pub use cache::{CacheStats, CacheStatsSnapshot, TileCache, Weighted};
pub use error::TileCacheError;
pub use size::CacheSize;
