//! Expression tokens
//!
//! Attribute values may carry `${key}` or `${key:default}` tokens. They are
//! stored unresolved in the model and resolved only when a runtime unit is
//! built from the configuration.

use crate::value::ModelValue;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;

static EXPRESSION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\$\{([^}:]+)(?::([^}]*))?\}").expect("static expression pattern"));

/// Check if a string contains an expression token
#[inline]
#[must_use]
pub fn is_expression(s: &str) -> bool {
    EXPRESSION.is_match(s)
}

/// Resolves expression tokens against a property map
///
/// Resolution order per token: explicit property, then (if enabled) the
/// process environment, then the inline default.
#[derive(Debug, Clone, Default)]
pub struct ExpressionResolver {
    properties: HashMap<String, String>,
    use_env: bool,
}

impl ExpressionResolver {
    /// Create resolver with no properties
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a property
    #[must_use]
    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    /// Also consult process environment variables
    #[must_use]
    pub fn with_env(mut self) -> Self {
        self.use_env = true;
        self
    }

    /// Set a property in place
    pub fn set_property(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.properties.insert(key.into(), value.into());
    }

    fn lookup(&self, key: &str) -> Option<String> {
        self.properties
            .get(key)
            .cloned()
            .or_else(|| self.use_env.then(|| std::env::var(key).ok()).flatten())
    }

    /// Resolve every token in a string
    ///
    /// # Errors
    /// Returns error if a token has no property and no default
    pub fn resolve_str(&self, input: &str) -> Result<String, ExpressionError> {
        let mut out = String::with_capacity(input.len());
        let mut last = 0;
        for caps in EXPRESSION.captures_iter(input) {
            let Some(whole) = caps.get(0) else { continue };
            let key = caps.get(1).map_or("", |m| m.as_str());
            out.push_str(&input[last..whole.start()]);
            match (self.lookup(key), caps.get(2)) {
                (Some(value), _) => out.push_str(&value),
                (None, Some(default)) => out.push_str(default.as_str()),
                (None, None) => {
                    return Err(ExpressionError::Unresolved {
                        key: key.to_string(),
                        expression: input.to_string(),
                    })
                }
            }
            last = whole.end();
        }
        out.push_str(&input[last..]);
        Ok(out)
    }

    /// Resolve a value, recursing into lists and objects
    ///
    /// Resolved expressions become plain strings; the attribute schema
    /// coerces them to their declared type afterwards.
    ///
    /// # Errors
    /// Returns error if any nested token cannot be resolved
    pub fn resolve(&self, value: &ModelValue) -> Result<ModelValue, ExpressionError> {
        match value {
            ModelValue::Expression(s) => Ok(ModelValue::String(self.resolve_str(s)?)),
            ModelValue::String(s) if is_expression(s) => {
                Ok(ModelValue::String(self.resolve_str(s)?))
            }
            ModelValue::List(items) => items
                .iter()
                .map(|item| self.resolve(item))
                .collect::<Result<Vec<_>, _>>()
                .map(ModelValue::List),
            ModelValue::Object(fields) => fields
                .iter()
                .map(|(name, v)| self.resolve(v).map(|r| (name.clone(), r)))
                .collect::<Result<_, _>>()
                .map(ModelValue::Object),
            other => Ok(other.clone()),
        }
    }
}

/// Expression resolution errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExpressionError {
    /// Token with no property and no default
    #[error("cannot resolve '{key}' in expression {expression}")]
    Unresolved { key: String, expression: String },
}
