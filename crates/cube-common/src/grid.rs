//! Fixed Earth grid resolver.
//!
//! A fixed grid covers the globe with square cells of `1 / inv_res` degrees,
//! where `inv_res` is a positive integer. Grids are organised as pyramids of
//! `level + 1` layers: the coarsest layer is `tile` cells high, every finer
//! layer doubles the height, so the finest layer is `tile * 2^level` cells
//! high and `height = 180 * inv_res`. Because `tile` is a multiple of 180,
//! every layer divides the globe into a whole number of cells and boxes from
//! different datasets snap onto the same lattice.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::bbox::BoundingBox;
use crate::error::{CubeError, CubeResult};

/// Metres per degree along the equator (WGS84 circumference / 360).
pub const METERS_PER_DEGREE: f64 = 40_075_016.685_578_49 / 360.0;

/// Origin of the global grid: lon = -180, lat = -90.
pub const GLOBAL_ORIGIN: (f64, f64) = (-180.0, -90.0);

/// Relative tolerance (in cells) under which an edge counts as already aligned.
const SNAP_EPSILON: f64 = 1e-9;

/// Upper bound on the number of inverse resolutions a single search may visit.
const MAX_SEARCH_SPAN: u64 = 10_000_000;

/// A fixed Earth grid: `tile` cells per tile at level 0, `level` doublings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GridSpec {
    pub tile: u32,
    pub level: u32,
    pub inv_res: u64,
}

impl GridSpec {
    /// Create a grid from a tile size and a pyramid depth.
    pub fn new(tile: u32, level: u32) -> CubeResult<Self> {
        if tile == 0 || tile % 180 != 0 {
            return Err(CubeError::GridConstraint(format!(
                "tile size {} is not a positive multiple of 180",
                tile
            )));
        }
        if level > 32 {
            return Err(CubeError::GridConstraint(format!(
                "level {} is too deep",
                level
            )));
        }
        let height = (tile as u64) << level;
        Ok(Self {
            tile,
            level,
            inv_res: height / 180,
        })
    }

    /// Canonical grid for an inverse resolution: the deepest pyramid,
    /// `level = trailing_zeros(inv_res)`, `tile = 180 * (inv_res >> level)`.
    pub fn from_inv_res(inv_res: u64) -> CubeResult<Self> {
        if inv_res == 0 {
            return Err(CubeError::invalid_parameter(
                "inv_res",
                "inverse resolution must be positive",
            ));
        }
        let level = inv_res.trailing_zeros();
        let tile = 180u64 * (inv_res >> level);
        let tile = u32::try_from(tile).map_err(|_| {
            CubeError::GridConstraint(format!("inverse resolution {} is too large", inv_res))
        })?;
        Self::new(tile, level)
    }

    /// Finest-level height in cells: `tile * 2^level`.
    pub fn height(&self) -> u64 {
        self.height_at(self.level)
    }

    /// Height in cells of pyramid layer `level` (0 = coarsest).
    pub fn height_at(&self, level: u32) -> u64 {
        (self.tile as u64) << level
    }

    /// Finest-level width in cells.
    pub fn width(&self) -> u64 {
        2 * self.height()
    }

    /// Finest-level cell size in degrees.
    pub fn resolution_deg(&self) -> f64 {
        1.0 / self.inv_res as f64
    }

    /// Finest-level cell size in metres at the equator.
    pub fn resolution_m(&self) -> f64 {
        self.resolution_deg() * METERS_PER_DEGREE
    }

    /// Cell size in degrees of pyramid layer `level` (0 = coarsest).
    pub fn resolution_at(&self, level: u32) -> f64 {
        180.0 / self.height_at(level) as f64
    }

    /// Extent in degrees of one level-0 tile cell, `tile / inv_res`.
    ///
    /// Boxes are snapped to multiples of this size so that every pyramid
    /// layer covers them with whole cells.
    pub fn cell_size_deg(&self) -> f64 {
        self.tile as f64 / self.inv_res as f64
    }

    /// Smallest grid-aligned box containing `bbox`, relative to the global origin.
    pub fn adjust_bbox(&self, bbox: &BoundingBox) -> CubeResult<BoundingBox> {
        self.adjust_bbox_with_origin(bbox, GLOBAL_ORIGIN)
    }

    /// Smallest grid-aligned box containing `bbox`, relative to `origin`.
    ///
    /// Min edges round down and max edges round up to the cell lattice, so the
    /// result always contains the input. Already aligned edges stay put.
    pub fn adjust_bbox_with_origin(
        &self,
        bbox: &BoundingBox,
        origin: (f64, f64),
    ) -> CubeResult<BoundingBox> {
        bbox.validate()?;
        let cell = self.cell_size_deg();
        let (x0, y0) = origin;

        Ok(BoundingBox::new(
            snap_edge(bbox.min_x, x0, cell, false),
            snap_edge(bbox.min_y, y0, cell, false),
            snap_edge(bbox.max_x, x0, cell, true),
            snap_edge(bbox.max_y, y0, cell, true),
        ))
    }
}

impl std::fmt::Display for GridSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "tile={} level={} inv_res={}",
            self.tile, self.level, self.inv_res
        )
    }
}

fn snap_edge(value: f64, origin: f64, cell: f64, round_up: bool) -> f64 {
    let q = (value - origin) / cell;
    let nearest = q.round();
    let q = if (q - nearest).abs() <= SNAP_EPSILON * nearest.abs().max(1.0) {
        nearest
    } else {
        q
    };
    let n = if round_up { q.ceil() } else { q.floor() };
    origin + n * cell
}

/// Unit of a resolution value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResolutionUnit {
    Degrees,
    Meters,
}

/// A target resolution in degrees or metres.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Resolution {
    pub value: f64,
    pub unit: ResolutionUnit,
}

impl Resolution {
    pub fn degrees(value: f64) -> Self {
        Self {
            value,
            unit: ResolutionUnit::Degrees,
        }
    }

    pub fn meters(value: f64) -> Self {
        Self {
            value,
            unit: ResolutionUnit::Meters,
        }
    }

    /// Parse `"300m"`, `"300 m"`, `"0.0027"` or `"0.0027deg"`.
    pub fn parse(s: &str) -> CubeResult<Self> {
        let s = s.trim().to_lowercase();
        let (number, unit) = if let Some(n) = s.strip_suffix("deg") {
            (n, ResolutionUnit::Degrees)
        } else if let Some(n) = s.strip_suffix('m') {
            (n, ResolutionUnit::Meters)
        } else {
            (s.as_str(), ResolutionUnit::Degrees)
        };

        let value: f64 = number.trim().parse().map_err(|_| {
            CubeError::invalid_parameter("resolution", format!("cannot parse '{}'", s))
        })?;
        if !value.is_finite() || value <= 0.0 {
            return Err(CubeError::invalid_parameter(
                "resolution",
                format!("resolution must be positive, got {}", value),
            ));
        }
        Ok(Self { value, unit })
    }

    /// The resolution in degrees.
    pub fn as_degrees(&self) -> f64 {
        match self.unit {
            ResolutionUnit::Degrees => self.value,
            ResolutionUnit::Meters => self.value / METERS_PER_DEGREE,
        }
    }

    /// The resolution in metres at the equator.
    pub fn as_meters(&self) -> f64 {
        match self.unit {
            ResolutionUnit::Degrees => self.value * METERS_PER_DEGREE,
            ResolutionUnit::Meters => self.value,
        }
    }
}

impl FromStr for Resolution {
    type Err = CubeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Constraints for a resolution search.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolutionSearch {
    pub min_tile: u32,
    pub max_tile: u32,
    pub min_level: u32,
}

impl Default for ResolutionSearch {
    fn default() -> Self {
        Self {
            min_tile: 180,
            max_tile: 2560,
            min_level: 0,
        }
    }
}

/// One grid satisfying a resolution search.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GridCandidate {
    pub spec: GridSpec,
    pub resolution_deg: f64,
    pub resolution_m: f64,
    /// Signed deviation from the target, in percent.
    pub deviation_pct: f64,
}

/// Find all grids whose resolution lies within `max_deviation_pct` of `target`.
///
/// Candidates are sorted by absolute deviation; among equal deviations the
/// deeper pyramid (larger level) comes first.
pub fn find_grid_specs(
    target: Resolution,
    max_deviation_pct: f64,
    search: &ResolutionSearch,
) -> CubeResult<Vec<GridCandidate>> {
    if !(max_deviation_pct > 0.0 && max_deviation_pct < 100.0) {
        return Err(CubeError::invalid_parameter(
            "deviation",
            format!("must be in (0, 100), got {}", max_deviation_pct),
        ));
    }
    if search.min_tile > search.max_tile {
        return Err(CubeError::invalid_parameter(
            "tile range",
            format!("{} > {}", search.min_tile, search.max_tile),
        ));
    }

    let target_deg = target.as_degrees();
    if !target_deg.is_finite() || target_deg <= 0.0 {
        return Err(CubeError::invalid_parameter(
            "resolution",
            "resolution must be positive",
        ));
    }
    let d = max_deviation_pct / 100.0;
    let lo = (1.0 / (target_deg * (1.0 + d))).ceil().max(1.0) as u64;
    let hi = (1.0 / (target_deg * (1.0 - d))).floor() as u64;
    if hi >= lo && hi - lo > MAX_SEARCH_SPAN {
        return Err(CubeError::GridConstraint(format!(
            "search over {} inverse resolutions is too wide",
            hi - lo
        )));
    }

    let mut candidates = Vec::new();
    for inv_res in lo..=hi {
        let resolution_deg = 1.0 / inv_res as f64;
        let deviation_pct = (resolution_deg - target_deg) / target_deg * 100.0;
        if deviation_pct.abs() > max_deviation_pct + 1e-9 {
            continue;
        }
        for level in 0..=inv_res.trailing_zeros() {
            let tile = 180u64 * (inv_res >> level);
            if tile < search.min_tile as u64 || tile > search.max_tile as u64 {
                continue;
            }
            if level < search.min_level {
                continue;
            }
            let spec = GridSpec {
                tile: tile as u32,
                level,
                inv_res,
            };
            candidates.push(GridCandidate {
                spec,
                resolution_deg,
                resolution_m: resolution_deg * METERS_PER_DEGREE,
                deviation_pct,
            });
        }
    }

    if candidates.is_empty() {
        return Err(CubeError::GridConstraint(format!(
            "no grid within {}% of {} deg (tile {}..={}, min level {})",
            max_deviation_pct, target_deg, search.min_tile, search.max_tile, search.min_level
        )));
    }

    candidates.sort_by(|a, b| {
        a.deviation_pct
            .abs()
            .total_cmp(&b.deviation_pct.abs())
            .then(b.spec.level.cmp(&a.spec.level))
            .then(a.spec.tile.cmp(&b.spec.tile))
    });
    Ok(candidates)
}

/// Resolution of one pyramid level.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LevelInfo {
    pub level: u32,
    pub inv_res: u64,
    pub height: u64,
    pub resolution_deg: f64,
    pub resolution_m: f64,
}

/// List the resolutions of levels `0..=max_level` for a level-0 inverse resolution.
///
/// `res(level) = res(0) / 2^level` with `res(0) = 1 / inv_res`.
pub fn list_levels(inv_res: u64, max_level: u32) -> CubeResult<Vec<LevelInfo>> {
    if inv_res == 0 {
        return Err(CubeError::invalid_parameter(
            "inv_res",
            "inverse resolution must be positive",
        ));
    }
    if max_level > 32 {
        return Err(CubeError::invalid_parameter(
            "max_level",
            format!("{} exceeds 32", max_level),
        ));
    }

    let mut levels = Vec::with_capacity(max_level as usize + 1);
    for level in 0..=max_level {
        let level_inv_res = inv_res.checked_shl(level).ok_or_else(|| {
            CubeError::GridConstraint(format!("level {} overflows inv_res {}", level, inv_res))
        })?;
        let resolution_deg = (1.0 / inv_res as f64) / (1u64 << level) as f64;
        levels.push(LevelInfo {
            level,
            inv_res: level_inv_res,
            height: 180 * level_inv_res,
            resolution_deg,
            resolution_m: resolution_deg * METERS_PER_DEGREE,
        });
    }
    Ok(levels)
}

/// Snap `bbox` onto the canonical grid of `inv_res`.
pub fn adjust_bbox(bbox: &BoundingBox, inv_res: u64) -> CubeResult<(BoundingBox, GridSpec)> {
    let spec = GridSpec::from_inv_res(inv_res)?;
    let adjusted = spec.adjust_bbox(bbox)?;
    Ok((adjusted, spec))
}
