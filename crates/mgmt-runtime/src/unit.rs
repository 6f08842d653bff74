//! Runtime units
//!
//! A unit is the running counterpart of one resource. Its name is derived
//! from the resource address, so the same resource always maps to the same
//! unit.

use mgmt_model::{Address, ModelValue};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{self, Display, Formatter};

/// Deterministic unit name
///
/// `/container=bar/cache=foo` becomes `container.bar.cache.foo`; the root
/// resource is `root`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UnitName(String);

impl UnitName {
    /// Derive from an address
    #[must_use]
    pub fn from_address(address: &Address) -> Self {
        if address.is_root() {
            return Self("root".to_string());
        }
        let parts: Vec<&str> = address
            .iter()
            .flat_map(|element| [element.key(), element.value()])
            .collect();
        Self(parts.join("."))
    }

    /// Name as a string
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for UnitName {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&Address> for UnitName {
    fn from(address: &Address) -> Self {
        Self::from_address(address)
    }
}

/// Start mode of a unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum UnitMode {
    /// Started as soon as installed
    #[default]
    Active,
    /// Started on first demand
    OnDemand,
}

impl UnitMode {
    /// Map a configured start mode (`EAGER` / `LAZY`)
    #[must_use]
    pub fn from_start_mode(value: &str) -> Option<Self> {
        match value.to_ascii_uppercase().as_str() {
            "EAGER" => Some(Self::Active),
            "LAZY" => Some(Self::OnDemand),
            _ => None,
        }
    }
}

/// Everything the live-unit collaborator needs to install a unit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitSpec {
    /// Unit name
    pub name: UnitName,
    /// Resource the unit runs
    pub address: Address,
    /// Units that must be running first
    pub depends_on: BTreeSet<UnitName>,
    /// Start mode
    pub mode: UnitMode,
    /// Resolved configuration; child configuration nests under its type key
    pub values: BTreeMap<String, ModelValue>,
}

impl UnitSpec {
    /// Spec with no dependencies or values
    #[must_use]
    pub fn new(address: Address) -> Self {
        Self {
            name: UnitName::from_address(&address),
            address,
            depends_on: BTreeSet::new(),
            mode: UnitMode::Active,
            values: BTreeMap::new(),
        }
    }

    /// Add a dependency
    #[must_use]
    pub fn with_dependency(mut self, dependency: UnitName) -> Self {
        self.depends_on.insert(dependency);
        self
    }

    /// Set a value
    #[must_use]
    pub fn with_value(mut self, name: impl Into<String>, value: impl Into<ModelValue>) -> Self {
        self.values.insert(name.into(), value.into());
        self
    }
}

/// Opaque handle to a running component, issued by the collaborator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UnitHandle(u64);

impl UnitHandle {
    /// Wrap a collaborator-issued id
    #[inline]
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Raw id
    #[inline]
    #[must_use]
    pub const fn id(&self) -> u64 {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_are_deterministic() {
        let address: Address = "/container=bar/cache=foo".parse().unwrap();
        assert_eq!(UnitName::from_address(&address).as_str(), "container.bar.cache.foo");
        assert_eq!(UnitName::from_address(&Address::root()).as_str(), "root");
        assert_eq!(UnitName::from(&address), UnitName::from_address(&address));
    }

    #[test]
    fn start_modes() {
        assert_eq!(UnitMode::from_start_mode("EAGER"), Some(UnitMode::Active));
        assert_eq!(UnitMode::from_start_mode("lazy"), Some(UnitMode::OnDemand));
        assert_eq!(UnitMode::from_start_mode("SOMETIMES"), None);
    }
}
