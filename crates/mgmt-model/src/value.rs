//! Model values
//!
//! [`ModelValue`] is the decoded form of every attribute value, operation
//! parameter and operation result.

use crate::expression;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::{self, Display, Formatter};

/// Decoded attribute value, parameter or result
///
/// Serialized in plain JSON form: `null` is undefined, numbers are
/// longs, and strings carrying `${...}` tokens decode as expressions.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(from = "WireValue", into = "WireValue")]
pub enum ModelValue {
    /// No value
    #[default]
    Undefined,
    /// Boolean literal
    Boolean(bool),
    /// 32-bit integer literal
    Int(i32),
    /// 64-bit integer literal
    Long(i64),
    /// String literal
    String(String),
    /// Unresolved `${...}` expression, resolved at runtime
    Expression(String),
    /// Homogeneous list
    List(Vec<ModelValue>),
    /// Named fields
    Object(BTreeMap<String, ModelValue>),
}

impl ModelValue {
    /// Create expression value
    #[inline]
    #[must_use]
    pub fn expression(token: impl Into<String>) -> Self {
        Self::Expression(token.into())
    }

    /// Create object value from pairs
    #[must_use]
    pub fn object<K, I>(fields: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, ModelValue)>,
    {
        Self::Object(fields.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    /// Check if the value is defined
    #[inline]
    #[must_use]
    pub fn is_defined(&self) -> bool {
        !matches!(self, Self::Undefined)
    }

    /// Check if the value is (or carries) an unresolved expression
    #[must_use]
    pub fn is_expression(&self) -> bool {
        match self {
            Self::Expression(_) => true,
            Self::String(s) => expression::is_expression(s),
            _ => false,
        }
    }

    /// Check if the value or any nested value is an expression
    #[must_use]
    pub fn contains_expression(&self) -> bool {
        match self {
            Self::List(items) => items.iter().any(Self::contains_expression),
            Self::Object(fields) => fields.values().any(Self::contains_expression),
            other => other.is_expression(),
        }
    }

    /// String view (strings and expressions)
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) | Self::Expression(s) => Some(s),
            _ => None,
        }
    }

    /// Integer view (ints and longs)
    #[inline]
    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(i64::from(*i)),
            Self::Long(l) => Some(*l),
            _ => None,
        }
    }

    /// Boolean view
    #[inline]
    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    /// List view
    #[inline]
    #[must_use]
    pub fn as_list(&self) -> Option<&[ModelValue]> {
        match self {
            Self::List(items) => Some(items),
            _ => None,
        }
    }

    /// Object view
    #[inline]
    #[must_use]
    pub fn as_object(&self) -> Option<&BTreeMap<String, ModelValue>> {
        match self {
            Self::Object(fields) => Some(fields),
            _ => None,
        }
    }

    /// Field of an object value
    #[inline]
    #[must_use]
    pub fn get(&self, field: &str) -> Option<&ModelValue> {
        self.as_object().and_then(|fields| fields.get(field))
    }

    /// Short type label used in error messages
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Undefined => "undefined",
            Self::Boolean(_) => "boolean",
            Self::Int(_) => "int",
            Self::Long(_) => "long",
            Self::String(_) => "string",
            Self::Expression(_) => "expression",
            Self::List(_) => "list",
            Self::Object(_) => "object",
        }
    }
}

impl Display for ModelValue {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Undefined => f.write_str("undefined"),
            Self::Boolean(b) => write!(f, "{b}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Long(l) => write!(f, "{l}L"),
            Self::String(s) => write!(f, "\"{s}\""),
            Self::Expression(s) => f.write_str(s),
            Self::List(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("]")
            }
            Self::Object(fields) => {
                f.write_str("{")?;
                for (i, (name, value)) in fields.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{name} => {value}")?;
                }
                f.write_str("}")
            }
        }
    }
}

impl From<bool> for ModelValue {
    fn from(value: bool) -> Self {
        Self::Boolean(value)
    }
}

impl From<i32> for ModelValue {
    fn from(value: i32) -> Self {
        Self::Int(value)
    }
}

impl From<i64> for ModelValue {
    fn from(value: i64) -> Self {
        Self::Long(value)
    }
}

impl From<&str> for ModelValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for ModelValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl<T: Into<ModelValue>> From<Vec<T>> for ModelValue {
    fn from(values: Vec<T>) -> Self {
        Self::List(values.into_iter().map(Into::into).collect())
    }
}

/// Plain JSON form of a [`ModelValue`]
#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum WireValue {
    Undefined,
    Boolean(bool),
    Number(i64),
    String(String),
    List(Vec<WireValue>),
    Object(BTreeMap<String, WireValue>),
}

impl From<WireValue> for ModelValue {
    fn from(wire: WireValue) -> Self {
        match wire {
            WireValue::Undefined => Self::Undefined,
            WireValue::Boolean(b) => Self::Boolean(b),
            WireValue::Number(n) => Self::Long(n),
            WireValue::String(s) if expression::is_expression(&s) => Self::Expression(s),
            WireValue::String(s) => Self::String(s),
            WireValue::List(items) => Self::List(items.into_iter().map(Into::into).collect()),
            WireValue::Object(fields) => {
                Self::Object(fields.into_iter().map(|(k, v)| (k, v.into())).collect())
            }
        }
    }
}

impl From<ModelValue> for WireValue {
    fn from(value: ModelValue) -> Self {
        match value {
            ModelValue::Undefined => Self::Undefined,
            ModelValue::Boolean(b) => Self::Boolean(b),
            ModelValue::Int(i) => Self::Number(i64::from(i)),
            ModelValue::Long(l) => Self::Number(l),
            ModelValue::String(s) | ModelValue::Expression(s) => Self::String(s),
            ModelValue::List(items) => Self::List(items.into_iter().map(Into::into).collect()),
            ModelValue::Object(fields) => {
                Self::Object(fields.into_iter().map(|(k, v)| (k, v.into())).collect())
            }
        }
    }
}
