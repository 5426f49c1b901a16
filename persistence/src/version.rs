//! Schema version strings.

use std::fmt;
use std::str::FromStr;

use crate::error::PersistenceError;

/// A `major.minor.patch` schema version.
///
/// Ordering follows the numeric components, so `0.10.0` sorts after
/// `0.9.0`. Versions are stored in documents as plain strings and parsed
/// on the way in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SchemaVersion {
    major: u32,
    minor: u32,
    patch: u32,
}

impl SchemaVersion {
    /// Create a new schema version.
    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }
}

impl fmt::Display for SchemaVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

impl FromStr for SchemaVersion {
    type Err = PersistenceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split('.');

        let mut next = || -> Result<u32, PersistenceError> {
            parts
                .next()
                .and_then(|p| p.parse().ok())
                .ok_or_else(|| PersistenceError::InvalidVersion(s.to_string()))
        };

        let version = Self {
            major: next()?,
            minor: next()?,
            patch: next()?,
        };

        if parts.next().is_some() {
            return Err(PersistenceError::InvalidVersion(s.to_string()));
        }

        Ok(version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_roundtrip() {
        let v: SchemaVersion = "0.4.0".parse().unwrap();
        assert_eq!(v, SchemaVersion::new(0, 4, 0));
        assert_eq!(v.to_string(), "0.4.0");
    }

    #[test]
    fn test_numeric_ordering() {
        let small: SchemaVersion = "0.9.0".parse().unwrap();
        let large: SchemaVersion = "0.10.0".parse().unwrap();
        assert!(small < large);
    }

    #[test]
    fn test_invalid_strings() {
        assert!("".parse::<SchemaVersion>().is_err());
        assert!("1.2".parse::<SchemaVersion>().is_err());
        assert!("1.2.3.4".parse::<SchemaVersion>().is_err());
        assert!("a.b.c".parse::<SchemaVersion>().is_err());
    }
}
