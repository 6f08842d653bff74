//! Operations
//!
//! An [`Operation`] is an immutable request against one address. It is
//! cloned before any version rewriting.

use crate::address::Address;
use crate::value::ModelValue;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::{self, Display, Formatter};

/// Parameter naming the attribute for attribute operations
pub const NAME: &str = "name";
/// Parameter carrying the new value for `write-attribute`
pub const VALUE: &str = "value";
/// Parameter requesting a recursive `read-resource`
pub const RECURSIVE: &str = "recursive";
/// Parameter requesting defaulted attributes in `read-resource`
pub const INCLUDE_DEFAULTS: &str = "include-defaults";

/// Names of the operations every resource type exposes
pub const IMPLICIT_OPERATIONS: [&str; 7] = [
    "add",
    "remove",
    "read-attribute",
    "write-attribute",
    "undefine-attribute",
    "read-resource",
    "read-resource-description",
];

/// Operation kind
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum OperationKind {
    /// Create a resource
    Add,
    /// Remove a resource and its descendants
    Remove,
    /// Read one attribute
    ReadAttribute,
    /// Write one attribute
    WriteAttribute,
    /// Reset one attribute to its default
    UndefineAttribute,
    /// Read attributes (and optionally children)
    ReadResource,
    /// Read the schema of the resource type
    ReadResourceDescription,
    /// Operation declared by the resource type
    Custom(String),
}

impl OperationKind {
    /// Wire name
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Add => "add",
            Self::Remove => "remove",
            Self::ReadAttribute => "read-attribute",
            Self::WriteAttribute => "write-attribute",
            Self::UndefineAttribute => "undefine-attribute",
            Self::ReadResource => "read-resource",
            Self::ReadResourceDescription => "read-resource-description",
            Self::Custom(name) => name,
        }
    }

    /// Parse a wire name
    #[must_use]
    pub fn from_name(name: &str) -> Self {
        match name {
            "add" => Self::Add,
            "remove" => Self::Remove,
            "read-attribute" => Self::ReadAttribute,
            "write-attribute" => Self::WriteAttribute,
            "undefine-attribute" => Self::UndefineAttribute,
            "read-resource" => Self::ReadResource,
            "read-resource-description" => Self::ReadResourceDescription,
            other => Self::Custom(other.to_string()),
        }
    }

    /// Whether an implicit operation only reads the model
    ///
    /// Custom operations declare this in their definition.
    #[inline]
    #[must_use]
    pub fn is_read_only(&self) -> bool {
        matches!(
            self,
            Self::ReadAttribute | Self::ReadResource | Self::ReadResourceDescription
        )
    }
}

impl Display for OperationKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl Serialize for OperationKind {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.name())
    }
}

impl<'de> Deserialize<'de> for OperationKind {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let name = String::deserialize(deserializer)?;
        Ok(Self::from_name(&name))
    }
}

/// Request against a single resource
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Operation {
    #[serde(rename = "operation")]
    kind: OperationKind,
    address: Address,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    parameters: BTreeMap<String, ModelValue>,
}

impl Operation {
    /// Create operation with no parameters
    #[must_use]
    pub fn new(kind: OperationKind, address: Address) -> Self {
        Self {
            kind,
            address,
            parameters: BTreeMap::new(),
        }
    }

    /// `add` with initial attribute values
    #[must_use]
    pub fn add<K, I>(address: Address, attributes: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, ModelValue)>,
    {
        Self {
            kind: OperationKind::Add,
            address,
            parameters: attributes.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }

    /// `remove`
    #[must_use]
    pub fn remove(address: Address) -> Self {
        Self::new(OperationKind::Remove, address)
    }

    /// `read-attribute`
    #[must_use]
    pub fn read_attribute(address: Address, name: impl Into<String>) -> Self {
        Self::new(OperationKind::ReadAttribute, address).with_parameter(NAME, name.into())
    }

    /// `write-attribute`
    #[must_use]
    pub fn write_attribute(
        address: Address,
        name: impl Into<String>,
        value: impl Into<ModelValue>,
    ) -> Self {
        Self::new(OperationKind::WriteAttribute, address)
            .with_parameter(NAME, name.into())
            .with_parameter(VALUE, value)
    }

    /// `undefine-attribute`
    #[must_use]
    pub fn undefine_attribute(address: Address, name: impl Into<String>) -> Self {
        Self::new(OperationKind::UndefineAttribute, address).with_parameter(NAME, name.into())
    }

    /// `read-resource`
    #[must_use]
    pub fn read_resource(address: Address, recursive: bool) -> Self {
        Self::new(OperationKind::ReadResource, address).with_parameter(RECURSIVE, recursive)
    }

    /// `read-resource-description`
    #[must_use]
    pub fn read_resource_description(address: Address) -> Self {
        Self::new(OperationKind::ReadResourceDescription, address)
    }

    /// Custom operation by name
    #[must_use]
    pub fn custom(name: impl Into<String>, address: Address) -> Self {
        Self::new(OperationKind::Custom(name.into()), address)
    }

    /// Add or replace a parameter
    #[must_use]
    pub fn with_parameter(mut self, name: impl Into<String>, value: impl Into<ModelValue>) -> Self {
        self.parameters.insert(name.into(), value.into());
        self
    }

    /// Operation kind
    #[inline]
    #[must_use]
    pub fn kind(&self) -> &OperationKind {
        &self.kind
    }

    /// Target address
    #[inline]
    #[must_use]
    pub fn address(&self) -> &Address {
        &self.address
    }

    /// All parameters
    #[inline]
    #[must_use]
    pub fn parameters(&self) -> &BTreeMap<String, ModelValue> {
        &self.parameters
    }

    /// Mutable parameters, for rewriting a cloned operation
    #[inline]
    pub fn parameters_mut(&mut self) -> &mut BTreeMap<String, ModelValue> {
        &mut self.parameters
    }

    /// One parameter
    #[inline]
    #[must_use]
    pub fn parameter(&self, name: &str) -> Option<&ModelValue> {
        self.parameters.get(name)
    }

    /// Attribute named by the `name` parameter
    #[inline]
    #[must_use]
    pub fn attribute_name(&self) -> Option<&str> {
        self.parameter(NAME).and_then(ModelValue::as_str)
    }

    /// Boolean flag parameter, `false` when absent
    #[must_use]
    pub fn flag(&self, name: &str) -> bool {
        match self.parameter(name) {
            Some(ModelValue::Boolean(b)) => *b,
            Some(ModelValue::String(s)) => s.eq_ignore_ascii_case("true"),
            _ => false,
        }
    }
}

impl Display for Operation {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.address, self.kind)
    }
}
