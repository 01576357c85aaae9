//! Tile styling parameters.

use serde::{Deserialize, Serialize};

use crate::error::{CubeError, CubeResult};

/// Colormap used when neither the request, the configuration nor the
/// variable metadata names one.
pub const DEFAULT_COLORMAP: &str = "viridis";

/// Partial style settings from one source (request, configuration or metadata).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StyleOverride {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vmin: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vmax: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cmap: Option<String>,
}

impl StyleOverride {
    pub fn is_empty(&self) -> bool {
        self.vmin.is_none() && self.vmax.is_none() && self.cmap.is_none()
    }

    /// Fill fields missing here from `fallback`.
    pub fn or(self, fallback: &StyleOverride) -> StyleOverride {
        StyleOverride {
            vmin: self.vmin.or(fallback.vmin),
            vmax: self.vmax.or(fallback.vmax),
            cmap: self.cmap.or_else(|| fallback.cmap.clone()),
        }
    }
}

/// A fully resolved tile style.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StyleSpec {
    pub value_min: f64,
    pub value_max: f64,
    pub colormap: String,
}

impl Default for StyleSpec {
    fn default() -> Self {
        Self {
            value_min: 0.0,
            value_max: 1.0,
            colormap: DEFAULT_COLORMAP.to_string(),
        }
    }
}

impl StyleSpec {
    /// Resolve a style from overrides in priority order, first source wins per field.
    ///
    /// Fields no source provides take the defaults `(0, 1, "viridis")`.
    pub fn resolve<'a>(sources: impl IntoIterator<Item = &'a StyleOverride>) -> CubeResult<Self> {
        let merged = sources
            .into_iter()
            .fold(StyleOverride::default(), |acc, next| acc.or(next));
        let defaults = StyleSpec::default();

        let spec = StyleSpec {
            value_min: merged.vmin.unwrap_or(defaults.value_min),
            value_max: merged.vmax.unwrap_or(defaults.value_max),
            colormap: merged.cmap.unwrap_or(defaults.colormap),
        };
        spec.validate()?;
        Ok(spec)
    }

    /// Value range must be finite and non-empty.
    pub fn validate(&self) -> CubeResult<()> {
        if !self.value_min.is_finite() || !self.value_max.is_finite() {
            return Err(CubeError::invalid_parameter(
                "vmin/vmax",
                "value range must be finite",
            ));
        }
        if self.value_min >= self.value_max {
            return Err(CubeError::invalid_parameter(
                "vmin/vmax",
                format!(
                    "vmin ({}) must be less than vmax ({})",
                    self.value_min, self.value_max
                ),
            ));
        }
        Ok(())
    }

    /// Hashable identity of this style for cache keys.
    pub fn cache_key(&self) -> (u64, u64, String) {
        (
            self.value_min.to_bits(),
            self.value_max.to_bits(),
            self.colormap.clone(),
        )
    }
}
