//! Cache size parsing.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::TileCacheError;

/// Values that switch a cache off.
const DISABLED: [&str; 5] = ["OFF", "NONE", "NULL", "FALSE", "0"];

/// A cache budget in bytes, or disabled.
///
/// Parsed from an integer with an optional decimal suffix: `B`, `K` (10^3),
/// `M` (10^6), `G` (10^9) or `T` (10^12), case-insensitive, so `"512M"`,
/// `"512mb"` and `"512000000"` are equal. `OFF`, `NONE`, `NULL`, `FALSE`,
/// `0` and the empty string disable caching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct CacheSize(Option<u64>);

impl CacheSize {
    pub const fn disabled() -> Self {
        CacheSize(None)
    }

    pub const fn bytes(bytes: u64) -> Self {
        if bytes == 0 {
            CacheSize(None)
        } else {
            CacheSize(Some(bytes))
        }
    }

    pub fn parse(value: &str) -> Result<Self, TileCacheError> {
        let normalized = value.trim().to_ascii_uppercase();
        if normalized.is_empty() || DISABLED.contains(&normalized.as_str()) {
            return Ok(Self::disabled());
        }

        let mut digits = normalized.as_str();
        if digits.len() > 1 {
            digits = digits.strip_suffix('B').unwrap_or(digits);
        }
        let (digits, factor) = match digits.chars().last() {
            Some('K') => (&digits[..digits.len() - 1], 1_000u64),
            Some('M') => (&digits[..digits.len() - 1], 1_000_000),
            Some('G') => (&digits[..digits.len() - 1], 1_000_000_000),
            Some('T') => (&digits[..digits.len() - 1], 1_000_000_000_000),
            Some('B') => (&digits[..digits.len() - 1], 1),
            _ => (digits, 1),
        };

        let count: u64 = digits
            .trim()
            .parse()
            .map_err(|_| TileCacheError::InvalidSize(value.to_string()))?;
        let bytes = count
            .checked_mul(factor)
            .ok_or_else(|| TileCacheError::InvalidSize(value.to_string()))?;

        Ok(Self::bytes(bytes))
    }

    /// Budget in bytes, `None` when disabled.
    pub fn as_bytes(&self) -> Option<u64> {
        self.0
    }

    pub fn is_disabled(&self) -> bool {
        self.0.is_none()
    }
}

impl FromStr for CacheSize {
    type Err = TileCacheError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for CacheSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Some(bytes) = self.0 else {
            return write!(f, "OFF");
        };
        for (suffix, factor) in [
            ("T", 1_000_000_000_000u64),
            ("G", 1_000_000_000),
            ("M", 1_000_000),
            ("K", 1_000),
        ] {
            if bytes % factor == 0 {
                return write!(f, "{}{}", bytes / factor, suffix);
            }
        }
        write!(f, "{}B", bytes)
    }
}

impl Serialize for CacheSize {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for CacheSize {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Bytes(u64),
            Flag(bool),
            Text(String),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Bytes(bytes) => Ok(CacheSize::bytes(bytes)),
            Raw::Flag(false) => Ok(CacheSize::disabled()),
            Raw::Flag(true) => Err(serde::de::Error::custom(
                "cache size must be a size or OFF, not true",
            )),
            Raw::Text(text) => CacheSize::parse(&text).map_err(serde::de::Error::custom),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_suffixes() {
        assert_eq!(CacheSize::parse("512M").unwrap().as_bytes(), Some(512_000_000));
        assert_eq!(CacheSize::parse("512mb").unwrap().as_bytes(), Some(512_000_000));
        assert_eq!(CacheSize::parse("2G").unwrap().as_bytes(), Some(2_000_000_000));
        assert_eq!(CacheSize::parse("64k").unwrap().as_bytes(), Some(64_000));
        assert_eq!(CacheSize::parse("1T").unwrap().as_bytes(), Some(1_000_000_000_000));
        assert_eq!(CacheSize::parse("100B").unwrap().as_bytes(), Some(100));
        assert_eq!(CacheSize::parse(" 4096 ").unwrap().as_bytes(), Some(4096));
    }

    #[test]
    fn test_disabled_sentinels() {
        for value in ["OFF", "off", "None", "null", "FALSE", "0", "", "  ", "0M"] {
            assert!(CacheSize::parse(value).unwrap().is_disabled(), "{value:?}");
        }
    }

    #[test]
    fn test_invalid() {
        for value in ["abc", "12X", "-5M", "M", "1.5G", "99999999999999999999"] {
            assert!(CacheSize::parse(value).is_err(), "{value:?}");
        }
        assert!(CacheSize::parse("99999999T").is_err());
    }

    #[test]
    fn test_display() {
        assert_eq!(CacheSize::parse("512M").unwrap().to_string(), "512M");
        assert_eq!(CacheSize::parse("1500").unwrap().to_string(), "1500B");
        assert_eq!(CacheSize::disabled().to_string(), "OFF");
    }

    #[test]
    fn test_deserialize() {
        let size: CacheSize = serde_json::from_str("\"256M\"").unwrap();
        assert_eq!(size.as_bytes(), Some(256_000_000));

        let size: CacheSize = serde_json::from_str("1024").unwrap();
        assert_eq!(size.as_bytes(), Some(1024));

        let size: CacheSize = serde_yaml::from_str("false").unwrap();
        assert!(size.is_disabled());

        let size: CacheSize = serde_yaml::from_str("OFF").unwrap();
        assert!(size.is_disabled());
    }
}
