//! Offline data cube utilities behind the `cube-tool` binary.

pub mod grid;
pub mod maintenance;

pub use grid::SortKey;
pub use maintenance::{LevelArgs, run_level, run_prune};
