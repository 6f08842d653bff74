//! Attribute schema
//!
//! An [`AttributeDefinition`] declares the type, default, expression
//! support, restart impact and validators of one attribute. Raw input is
//! turned into its stored form by [`AttributeDefinition::validate_and_normalize`].

use crate::address::{Address, AddressError};
use crate::error::{SchemaError, ValidationError};
use crate::value::ModelValue;
use std::collections::BTreeMap;
use std::fmt::{self, Display, Formatter};
use std::sync::Arc;

/// Declared value type of an attribute
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValueType {
    /// UTF-8 string
    String,
    /// 32-bit integer
    Int,
    /// 64-bit integer
    Long,
    /// Boolean
    Boolean,
    /// List of one element type
    List(Box<ValueType>),
    /// Object with named, typed fields
    Object(BTreeMap<String, ValueType>),
}

impl ValueType {
    /// List of the given element type
    #[inline]
    #[must_use]
    pub fn list_of(element: ValueType) -> Self {
        Self::List(Box::new(element))
    }

    /// Object with the given fields
    #[must_use]
    pub fn object_of<K: Into<String>>(fields: impl IntoIterator<Item = (K, ValueType)>) -> Self {
        Self::Object(fields.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    /// Coerce a value to this type, or `None` if it cannot be
    ///
    /// Expressions nested in lists and objects pass through untouched.
    #[must_use]
    pub fn coerce(&self, value: &ModelValue) -> Option<ModelValue> {
        match (self, value) {
            (_, ModelValue::Expression(_)) => Some(value.clone()),
            (_, ModelValue::String(s)) if value.is_expression() => {
                Some(ModelValue::Expression(s.clone()))
            }
            (Self::String, ModelValue::String(_)) => Some(value.clone()),
            (Self::String, ModelValue::Int(i)) => Some(ModelValue::String(i.to_string())),
            (Self::String, ModelValue::Long(l)) => Some(ModelValue::String(l.to_string())),
            (Self::String, ModelValue::Boolean(b)) => Some(ModelValue::String(b.to_string())),
            (Self::Int, ModelValue::Int(_)) => Some(value.clone()),
            (Self::Int, ModelValue::Long(l)) => i32::try_from(*l).ok().map(ModelValue::Int),
            (Self::Int, ModelValue::String(s)) => s.trim().parse().ok().map(ModelValue::Int),
            (Self::Long, ModelValue::Long(_)) => Some(value.clone()),
            (Self::Long, ModelValue::Int(i)) => Some(ModelValue::Long(i64::from(*i))),
            (Self::Long, ModelValue::String(s)) => s.trim().parse().ok().map(ModelValue::Long),
            (Self::Boolean, ModelValue::Boolean(_)) => Some(value.clone()),
            (Self::Boolean, ModelValue::String(s)) => match s.trim().to_ascii_lowercase().as_str() {
                "true" => Some(ModelValue::Boolean(true)),
                "false" => Some(ModelValue::Boolean(false)),
                _ => None,
            },
            (Self::List(element), ModelValue::List(items)) => items
                .iter()
                .map(|item| element.coerce(item))
                .collect::<Option<Vec<_>>>()
                .map(ModelValue::List),
            (Self::Object(schema), ModelValue::Object(fields)) => {
                let mut out = BTreeMap::new();
                for (name, field) in fields {
                    let field_type = schema.get(name)?;
                    if field.is_defined() {
                        out.insert(name.clone(), field_type.coerce(field)?);
                    }
                }
                Some(ModelValue::Object(out))
            }
            _ => None,
        }
    }
}

impl Display for ValueType {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::String => f.write_str("string"),
            Self::Int => f.write_str("int"),
            Self::Long => f.write_str("long"),
            Self::Boolean => f.write_str("boolean"),
            Self::List(element) => write!(f, "list<{element}>"),
            Self::Object(fields) => {
                f.write_str("object{")?;
                for (i, (name, ty)) in fields.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{name}: {ty}")?;
                }
                f.write_str("}")
            }
        }
    }
}

/// Which running components must restart when an attribute changes
///
/// Ordered by cost; the impact of a change set is its maximum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum RestartImpact {
    /// Pushed to the running unit in place
    #[default]
    None,
    /// Restart the owning unit only
    ResourceServices,
    /// Restart the owning unit and everything depending on it
    AllServices,
}

impl Display for RestartImpact {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::None => "none",
            Self::ResourceServices => "resource-services",
            Self::AllServices => "all-services",
        })
    }
}

/// Signature of a custom validator function
pub type ValidatorFn = dyn Fn(&ModelValue) -> Result<(), String> + Send + Sync;

/// Side-effect free check applied to a normalized, non-expression value
#[derive(Clone)]
pub enum Validator {
    /// Inclusive numeric range
    Range {
        /// Lower bound
        min: i64,
        /// Upper bound
        max: i64,
    },
    /// Value must be one of these
    AllowedValues(Vec<ModelValue>),
    /// Minimum string or list length
    MinLength(usize),
    /// Named custom check
    Custom {
        /// Label for diagnostics
        name: &'static str,
        /// Check function
        check: Arc<ValidatorFn>,
    },
}

impl Validator {
    /// Allowed string values
    #[must_use]
    pub fn allowed<S: AsRef<str>>(values: impl IntoIterator<Item = S>) -> Self {
        Self::AllowedValues(
            values
                .into_iter()
                .map(|v| ModelValue::from(v.as_ref()))
                .collect(),
        )
    }

    /// Custom check
    #[must_use]
    pub fn custom(
        name: &'static str,
        check: impl Fn(&ModelValue) -> Result<(), String> + Send + Sync + 'static,
    ) -> Self {
        Self::Custom {
            name,
            check: Arc::new(check),
        }
    }

    /// Apply the check
    ///
    /// # Errors
    /// Returns the rejection reason
    pub fn check(&self, value: &ModelValue) -> Result<(), String> {
        match self {
            Self::Range { min, max } => match value.as_i64() {
                Some(n) if n < *min || n > *max => {
                    Err(format!("{n} is outside the range [{min}, {max}]"))
                }
                _ => Ok(()),
            },
            Self::AllowedValues(allowed) => {
                if allowed.contains(value) {
                    Ok(())
                } else {
                    let names: Vec<String> = allowed.iter().map(ToString::to_string).collect();
                    Err(format!("{value} is not one of [{}]", names.join(", ")))
                }
            }
            Self::MinLength(min) => {
                let len = match value {
                    ModelValue::String(s) => s.chars().count(),
                    ModelValue::List(items) => items.len(),
                    _ => return Ok(()),
                };
                if len < *min {
                    Err(format!("length {len} is below the minimum {min}"))
                } else {
                    Ok(())
                }
            }
            Self::Custom { check, .. } => check(value),
        }
    }
}

impl fmt::Debug for Validator {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Range { min, max } => f
                .debug_struct("Range")
                .field("min", min)
                .field("max", max)
                .finish(),
            Self::AllowedValues(values) => f.debug_tuple("AllowedValues").field(values).finish(),
            Self::MinLength(min) => f.debug_tuple("MinLength").field(min).finish(),
            Self::Custom { name, .. } => f.debug_struct("Custom").field("name", name).finish(),
        }
    }
}

/// Attribute whose value names another resource
///
/// References become runtime dependencies of the owning unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceReference {
    /// `/key=value` under the root
    Root {
        /// Child type key under the root
        key: String,
    },
    /// `key=value` under the owner's parent
    Sibling {
        /// Sibling type key
        key: String,
    },
}

impl ResourceReference {
    /// Type key of the referenced resource
    #[must_use]
    pub fn key(&self) -> &str {
        match self {
            Self::Root { key } | Self::Sibling { key } => key,
        }
    }

    /// Address of the referenced resource
    ///
    /// # Errors
    /// Returns error if `value` is not a valid instance name
    pub fn target(&self, owner: &Address, value: &str) -> Result<Address, AddressError> {
        match self {
            Self::Root { key } => Address::root().try_child(key, value),
            Self::Sibling { key } => owner.parent().unwrap_or_default().try_child(key, value),
        }
    }
}

/// Declared attribute of a resource type
#[derive(Debug, Clone)]
pub struct AttributeDefinition {
    name: String,
    value_type: ValueType,
    required: bool,
    default: Option<ModelValue>,
    allow_expression: bool,
    restart_impact: RestartImpact,
    validators: Vec<Validator>,
    reference: Option<ResourceReference>,
    description: String,
}

impl AttributeDefinition {
    /// Start building a definition
    #[must_use]
    pub fn builder(name: impl Into<String>, value_type: ValueType) -> AttributeBuilder {
        AttributeBuilder {
            def: Self {
                name: name.into(),
                value_type,
                required: false,
                default: None,
                allow_expression: false,
                restart_impact: RestartImpact::None,
                validators: Vec::new(),
                reference: None,
                description: String::new(),
            },
        }
    }

    /// Attribute name
    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Declared type
    #[inline]
    #[must_use]
    pub fn value_type(&self) -> &ValueType {
        &self.value_type
    }

    /// Whether the attribute must be given on add
    #[inline]
    #[must_use]
    pub fn is_required(&self) -> bool {
        self.required
    }

    /// Default value, if any
    #[inline]
    #[must_use]
    pub fn default_value(&self) -> Option<&ModelValue> {
        self.default.as_ref()
    }

    /// Whether `${...}` tokens are accepted
    #[inline]
    #[must_use]
    pub fn allows_expression(&self) -> bool {
        self.allow_expression
    }

    /// Restart impact of changing this attribute
    #[inline]
    #[must_use]
    pub fn restart_impact(&self) -> RestartImpact {
        self.restart_impact
    }

    /// Reference to another resource, if any
    #[inline]
    #[must_use]
    pub fn reference(&self) -> Option<&ResourceReference> {
        self.reference.as_ref()
    }

    /// Human-readable description
    #[inline]
    #[must_use]
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Check if a value equals the declared default
    #[inline]
    #[must_use]
    pub fn is_default(&self, value: &ModelValue) -> bool {
        self.default.as_ref() == Some(value)
    }

    /// Validate raw input and produce the stored form
    ///
    /// Absent or undefined input yields the default (or undefined for
    /// optional attributes without one). Expressions are kept unresolved and
    /// are not checked by validators. Applying this to its own output returns
    /// the same value.
    ///
    /// # Errors
    /// - `MissingRequiredAttribute` for absent required input
    /// - `ExpressionNotAllowed` for a token on a non-expression attribute
    /// - `InvalidType` if coercion fails
    /// - `ValidationFailed` if a validator rejects the value
    pub fn validate_and_normalize(
        &self,
        raw: Option<&ModelValue>,
    ) -> Result<ModelValue, ValidationError> {
        let raw = match raw {
            Some(value) if value.is_defined() => value,
            _ if self.required => {
                return Err(ValidationError::MissingRequiredAttribute(self.name.clone()))
            }
            _ => return Ok(self.default.clone().unwrap_or_default()),
        };

        if raw.contains_expression() && !self.allow_expression {
            return Err(ValidationError::ExpressionNotAllowed(self.name.clone()));
        }

        let value = self
            .value_type
            .coerce(raw)
            .ok_or_else(|| ValidationError::InvalidType {
                attribute: self.name.clone(),
                expected: self.value_type.to_string(),
                found: raw.type_name().to_string(),
            })?;

        if !value.is_expression() {
            for validator in &self.validators {
                validator
                    .check(&value)
                    .map_err(|reason| ValidationError::ValidationFailed {
                        attribute: self.name.clone(),
                        reason,
                    })?;
            }
            if let Some(reference) = &self.reference {
                self.check_reference(reference, &value)?;
            }
        }

        Ok(value)
    }

    fn check_reference(
        &self,
        reference: &ResourceReference,
        value: &ModelValue,
    ) -> Result<(), ValidationError> {
        let names: Vec<&str> = match value {
            ModelValue::String(name) => vec![name.as_str()],
            ModelValue::List(items) => items.iter().filter_map(ModelValue::as_str).collect(),
            _ => Vec::new(),
        };
        for name in names {
            Address::root()
                .try_child(reference.key(), name)
                .map_err(|e| ValidationError::ValidationFailed {
                    attribute: self.name.clone(),
                    reason: e.to_string(),
                })?;
        }
        Ok(())
    }

    /// Schema metadata as a value (for `read-resource-description`)
    #[must_use]
    pub fn describe(&self) -> ModelValue {
        let mut fields = BTreeMap::new();
        fields.insert("type".to_string(), ModelValue::from(self.value_type.to_string()));
        fields.insert("required".to_string(), ModelValue::Boolean(self.required));
        fields.insert(
            "expressions-allowed".to_string(),
            ModelValue::Boolean(self.allow_expression),
        );
        fields.insert(
            "restart-required".to_string(),
            ModelValue::from(self.restart_impact.to_string()),
        );
        if let Some(default) = &self.default {
            fields.insert("default".to_string(), default.clone());
        }
        if !self.description.is_empty() {
            fields.insert("description".to_string(), ModelValue::from(self.description.as_str()));
        }
        ModelValue::Object(fields)
    }
}

/// Builder for [`AttributeDefinition`]
#[derive(Debug)]
pub struct AttributeBuilder {
    def: AttributeDefinition,
}

impl AttributeBuilder {
    /// Mark as required
    #[must_use]
    pub fn required(mut self) -> Self {
        self.def.required = true;
        self
    }

    /// Set the default value
    #[must_use]
    pub fn default_value(mut self, value: impl Into<ModelValue>) -> Self {
        self.def.default = Some(value.into());
        self
    }

    /// Accept `${...}` tokens
    #[must_use]
    pub fn allow_expression(mut self) -> Self {
        self.def.allow_expression = true;
        self
    }

    /// Set the restart impact
    #[must_use]
    pub fn restart_impact(mut self, impact: RestartImpact) -> Self {
        self.def.restart_impact = impact;
        self
    }

    /// Add a validator
    #[must_use]
    pub fn validator(mut self, validator: Validator) -> Self {
        self.def.validators.push(validator);
        self
    }

    /// Mark as a reference to another resource
    #[must_use]
    pub fn reference(mut self, reference: ResourceReference) -> Self {
        self.def.reference = Some(reference);
        self
    }

    /// Set the description
    #[must_use]
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.def.description = description.into();
        self
    }

    /// Finish the definition
    ///
    /// # Errors
    /// Returns error if a required attribute declares a default, or if the
    /// default does not pass its own validation
    pub fn build(self) -> Result<AttributeDefinition, SchemaError> {
        let mut def = self.def;
        if let Some(default) = def.default.take() {
            if def.required {
                return Err(SchemaError::InvalidDefinition(format!(
                    "required attribute '{}' cannot have a default",
                    def.name
                )));
            }
            let normalized = def.validate_and_normalize(Some(&default)).map_err(|e| {
                SchemaError::InvalidDefinition(format!("invalid default for '{}': {e}", def.name))
            })?;
            def.default = Some(normalized);
        }
        Ok(def)
    }
}
