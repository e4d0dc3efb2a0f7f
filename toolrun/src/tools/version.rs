//! Three-component tool versions.

use crate::errors::RegistryError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// A `MAJOR.MINOR.PATCH` version attached to every tool record.
///
/// Serialized as its dotted string form, e.g. `"1.0.2"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ToolVersion {
    /// Major component.
    pub major: u32,
    /// Minor component.
    pub minor: u32,
    /// Patch component.
    pub patch: u32,
}

impl ToolVersion {
    /// The version every new record starts at.
    pub const INITIAL: Self = Self::new(1, 0, 0);

    /// Creates a version from its components.
    #[must_use]
    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    /// Returns this version with the patch component incremented, or `None`
    /// once the patch component is exhausted.
    #[must_use]
    pub const fn bump_patch(self) -> Option<Self> {
        match self.patch.checked_add(1) {
            Some(patch) => Some(Self::new(self.major, self.minor, patch)),
            None => None,
        }
    }
}

impl Default for ToolVersion {
    fn default() -> Self {
        Self::INITIAL
    }
}

impl fmt::Display for ToolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

impl FromStr for ToolVersion {
    type Err = RegistryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || RegistryError::InvalidVersion {
            version: s.to_string(),
        };

        let mut parts = s.trim().split('.');
        let mut next = || -> Result<u32, RegistryError> {
            parts
                .next()
                .ok_or_else(invalid)?
                .parse::<u32>()
                .map_err(|_| invalid())
        };

        let version = Self::new(next()?, next()?, next()?);
        if parts.next().is_some() {
            return Err(invalid());
        }
        Ok(version)
    }
}

impl Serialize for ToolVersion {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ToolVersion {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}
