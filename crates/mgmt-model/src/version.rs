//! Schema versions

use serde::{Deserialize, Serialize};
use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

/// `major.minor.micro` schema version
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ModelVersion {
    major: u32,
    minor: u32,
    micro: u32,
}

impl ModelVersion {
    /// Create version
    #[inline]
    #[must_use]
    pub const fn new(major: u32, minor: u32, micro: u32) -> Self {
        Self {
            major,
            minor,
            micro,
        }
    }

    /// Major component
    #[inline]
    #[must_use]
    pub fn major(&self) -> u32 {
        self.major
    }

    /// Minor component
    #[inline]
    #[must_use]
    pub fn minor(&self) -> u32 {
        self.minor
    }

    /// Micro component
    #[inline]
    #[must_use]
    pub fn micro(&self) -> u32 {
        self.micro
    }
}

impl Display for ModelVersion {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.micro)
    }
}

impl FromStr for ModelVersion {
    type Err = VersionParseError;

    /// Parse `major[.minor[.micro]]`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = [0_u32; 3];
        let mut count = 0;
        for (i, part) in s.trim().split('.').enumerate() {
            if i >= 3 {
                return Err(VersionParseError(s.to_string()));
            }
            parts[i] = part
                .parse()
                .map_err(|_| VersionParseError(s.to_string()))?;
            count += 1;
        }
        if count == 0 {
            return Err(VersionParseError(s.to_string()));
        }
        Ok(Self::new(parts[0], parts[1], parts[2]))
    }
}

impl TryFrom<String> for ModelVersion {
    type Error = VersionParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ModelVersion> for String {
    fn from(version: ModelVersion) -> Self {
        version.to_string()
    }
}

/// Malformed version string
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid model version: {0}")]
pub struct VersionParseError(String);
