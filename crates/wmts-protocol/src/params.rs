//! Case-insensitive query parameters.

use std::collections::HashMap;

use cube_common::{CubeError, CubeResult};

/// Query parameters keyed by upper-cased name.
///
/// OGC KVP keys are case-insensitive; values are kept as given. Empty
/// values count as absent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Params {
    values: HashMap<String, String>,
}

impl Params {
    pub fn from_pairs<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: AsRef<str>,
        V: Into<String>,
    {
        let values = pairs
            .into_iter()
            .map(|(k, v)| (k.as_ref().to_ascii_uppercase(), v.into()))
            .collect();
        Self { values }
    }

    /// Value of `key` (given in upper case).
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values
            .get(key)
            .map(|v| v.as_str())
            .filter(|v| !v.trim().is_empty())
    }

    pub fn require(&self, key: &str) -> CubeResult<&str> {
        self.get(key)
            .ok_or_else(|| CubeError::MissingParameter(key.to_string()))
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl From<HashMap<String, String>> for Params {
    fn from(map: HashMap<String, String>) -> Self {
        Self::from_pairs(map)
    }
}
