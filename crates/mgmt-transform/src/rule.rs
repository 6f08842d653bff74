//! Transformation rules
//!
//! An [`AttributeRule`] is one row of a transformation table: which
//! attribute, on which resource pattern, for which peer versions, and what to
//! do with it. Rules for the same attribute chain in a fixed [`Phase`] order:
//! discard, then reject, then convert, then rename.

use crate::range::VersionRange;
use mgmt_model::{Address, AddressPattern, ModelValue, ModelVersion};
use std::fmt;
use std::sync::Arc;

/// One-way value mapping
pub type ConvertFn = dyn Fn(&ModelValue) -> ModelValue + Send + Sync;

/// Bidirectional value mapping
///
/// `to_old` rewrites a current value for the peer; `to_new` rewrites a value
/// read back from the peer. The pair must be lossless on peer values:
/// `to_old(to_new(v)) == v`.
#[derive(Clone)]
pub struct Converter {
    name: String,
    to_old: Arc<ConvertFn>,
    to_new: Arc<ConvertFn>,
}

impl Converter {
    /// Named converter from two closures
    pub fn new(
        name: impl Into<String>,
        to_old: impl Fn(&ModelValue) -> ModelValue + Send + Sync + 'static,
        to_new: impl Fn(&ModelValue) -> ModelValue + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            to_old: Arc::new(to_old),
            to_new: Arc::new(to_new),
        }
    }

    /// Integer scaling: `new = old * factor`
    ///
    /// Collapsing a current value rounds up so a peer never gets fewer units
    /// than requested, with a floor of one.
    #[must_use]
    pub fn scale(name: impl Into<String>, factor: i64) -> Self {
        let factor = factor.max(1);
        Self::new(
            name,
            move |value| match value.as_i64() {
                Some(current) if !value.is_expression() => {
                    ModelValue::Long(((current + factor - 1) / factor).max(1))
                }
                _ => value.clone(),
            },
            move |value| match value.as_i64() {
                Some(old) if !value.is_expression() => ModelValue::Long(old.saturating_mul(factor)),
                _ => value.clone(),
            },
        )
    }

    /// Converter name (for logging)
    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Rewrite a current value for the peer
    #[must_use]
    pub fn to_old(&self, value: &ModelValue) -> ModelValue {
        (self.to_old)(value)
    }

    /// Rewrite a peer value into the current form
    #[must_use]
    pub fn to_new(&self, value: &ModelValue) -> ModelValue {
        (self.to_new)(value)
    }
}

impl fmt::Debug for Converter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Converter").field("name", &self.name).finish()
    }
}

/// Why an attribute cannot be sent to a peer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    /// Value holds an unresolved expression
    Expression,
    /// Attribute is set but the peer has no equivalent
    Defined,
    /// Value is not supported by the peer
    Value(ModelValue),
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Expression => f.write_str("expressions are not supported"),
            Self::Defined => f.write_str("attribute is not supported"),
            Self::Value(value) => write!(f, "value {value} is not supported"),
        }
    }
}

/// Chaining phase, in application order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Phase {
    /// Silently drop the attribute
    Discard,
    /// Fail the operation
    Reject,
    /// Rewrite the value
    Convert,
    /// Rewrite the name
    Rename,
}

/// What a rule does to a matching attribute
#[derive(Debug, Clone)]
pub enum AttributeAction {
    /// Drop the attribute when it equals the given default
    DiscardIfDefault(ModelValue),
    /// Drop the attribute when it is undefined
    DiscardIfUndefined,
    /// Fail when the value holds an expression
    RejectExpression,
    /// Fail when the attribute is defined
    RejectIfDefined,
    /// Fail when the attribute has exactly this value
    RejectValue(ModelValue),
    /// Rewrite the value in both directions
    Convert(Converter),
    /// Attribute is called this on the peer
    Rename(String),
}

impl AttributeAction {
    /// Phase the action runs in
    #[must_use]
    pub fn phase(&self) -> Phase {
        match self {
            Self::DiscardIfDefault(_) | Self::DiscardIfUndefined => Phase::Discard,
            Self::RejectExpression | Self::RejectIfDefined | Self::RejectValue(_) => Phase::Reject,
            Self::Convert(_) => Phase::Convert,
            Self::Rename(_) => Phase::Rename,
        }
    }

    /// Check a discard action against a value
    #[must_use]
    pub fn discards(&self, value: &ModelValue) -> bool {
        match self {
            Self::DiscardIfDefault(default) => value == default,
            Self::DiscardIfUndefined => !value.is_defined(),
            _ => false,
        }
    }

    /// Check a reject action against a value
    #[must_use]
    pub fn rejects(&self, value: &ModelValue) -> Option<Rejection> {
        match self {
            Self::RejectExpression if value.contains_expression() => Some(Rejection::Expression),
            Self::RejectIfDefined if value.is_defined() => Some(Rejection::Defined),
            Self::RejectValue(rejected) if value == rejected => {
                Some(Rejection::Value(rejected.clone()))
            }
            _ => None,
        }
    }
}

/// Row of a transformation table
#[derive(Debug, Clone)]
pub struct AttributeRule {
    pattern: AddressPattern,
    attribute: String,
    versions: VersionRange,
    action: AttributeAction,
}

impl AttributeRule {
    /// Create a rule
    pub fn new(
        pattern: AddressPattern,
        attribute: impl Into<String>,
        versions: VersionRange,
        action: AttributeAction,
    ) -> Self {
        Self {
            pattern,
            attribute: attribute.into(),
            versions,
            action,
        }
    }

    /// Resource pattern
    #[inline]
    #[must_use]
    pub fn pattern(&self) -> &AddressPattern {
        &self.pattern
    }

    /// Attribute name in the current version
    #[inline]
    #[must_use]
    pub fn attribute(&self) -> &str {
        &self.attribute
    }

    /// Peer versions the rule applies to
    #[inline]
    #[must_use]
    pub fn versions(&self) -> VersionRange {
        self.versions
    }

    /// Action
    #[inline]
    #[must_use]
    pub fn action(&self) -> &AttributeAction {
        &self.action
    }

    /// Check if the rule applies to a resource for a peer version
    #[must_use]
    pub fn applies(&self, address: &Address, peer: ModelVersion) -> bool {
        self.versions.contains(peer) && self.pattern.matches(address)
    }
}

/// Child resource type the peer does not know
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChildRejection {
    /// Parent resource pattern
    pub parent: AddressPattern,
    /// Rejected child type key
    pub key: String,
    /// Peer versions lacking the type
    pub versions: VersionRange,
}

/// Custom operation the peer does not know
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationRejection {
    /// Resource pattern declaring the operation
    pub pattern: AddressPattern,
    /// Operation name
    pub operation: String,
    /// Peer versions lacking the operation
    pub versions: VersionRange,
}
