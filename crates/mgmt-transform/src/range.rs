//! Version ranges
//!
//! A transformation rule applies to every peer version inside its
//! [`VersionRange`]. Bounds are inclusive; a missing bound is open.

use mgmt_model::ModelVersion;
use serde::{Deserialize, Serialize};
use std::fmt::{self, Display, Formatter};

/// Inclusive range of peer versions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct VersionRange {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    from: Option<ModelVersion>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    through: Option<ModelVersion>,
}

impl VersionRange {
    /// Every version
    #[inline]
    #[must_use]
    pub const fn all() -> Self {
        Self {
            from: None,
            through: None,
        }
    }

    /// Every version up to and including `through`
    #[inline]
    #[must_use]
    pub const fn up_to(through: ModelVersion) -> Self {
        Self {
            from: None,
            through: Some(through),
        }
    }

    /// Versions between `from` and `through`, both included
    #[inline]
    #[must_use]
    pub const fn between(from: ModelVersion, through: ModelVersion) -> Self {
        Self {
            from: Some(from),
            through: Some(through),
        }
    }

    /// Exactly one version
    #[inline]
    #[must_use]
    pub const fn exactly(version: ModelVersion) -> Self {
        Self::between(version, version)
    }

    /// Lower bound
    #[inline]
    #[must_use]
    pub fn lower(&self) -> Option<ModelVersion> {
        self.from
    }

    /// Upper bound
    #[inline]
    #[must_use]
    pub fn upper(&self) -> Option<ModelVersion> {
        self.through
    }

    /// Check if `version` lies inside the range
    #[must_use]
    pub fn contains(&self, version: ModelVersion) -> bool {
        self.from.map_or(true, |from| version >= from)
            && self.through.map_or(true, |through| version <= through)
    }
}

impl Display for VersionRange {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match (self.from, self.through) {
            (None, None) => f.write_str("*"),
            (Some(from), None) => write!(f, ">={from}"),
            (None, Some(through)) => write!(f, "<={through}"),
            (Some(from), Some(through)) if from == through => write!(f, "{from}"),
            (Some(from), Some(through)) => write!(f, "{from}..={through}"),
        }
    }
}
