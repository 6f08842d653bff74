//! Resource types
//!
//! A [`ResourceType`] owns its attribute schema, its child types and its
//! custom operations. Child types are owned values, so a type tree is
//! always acyclic and fixed once built.

use crate::address::PathElement;
use crate::attribute::AttributeDefinition;
use crate::error::SchemaError;
use crate::handler::OperationHandler;
use crate::operation::IMPLICIT_OPERATIONS;
use crate::value::ModelValue;
use indexmap::IndexMap;
use std::collections::BTreeMap;
use std::sync::Arc;

/// How instances of a type relate to the live service graph
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum RuntimeBinding {
    /// Model only, nothing runs
    #[default]
    None,
    /// Each instance owns one runtime unit
    Unit {
        /// Attribute selecting the start mode (`EAGER` or `LAZY`)
        mode_attribute: Option<String>,
    },
    /// Attributes feed the nearest ancestor's unit
    Parent,
}

impl RuntimeBinding {
    /// Unit binding with the default start mode
    #[inline]
    #[must_use]
    pub fn unit() -> Self {
        Self::Unit {
            mode_attribute: None,
        }
    }

    /// Check if changes to this type reach the runtime
    #[inline]
    #[must_use]
    pub fn has_runtime(&self) -> bool {
        !matches!(self, Self::None)
    }
}

/// Custom operation declared on a resource type
#[derive(Debug, Clone)]
pub struct OperationDefinition {
    name: String,
    parameters: IndexMap<String, AttributeDefinition>,
    read_only: bool,
    handler: Arc<dyn OperationHandler>,
    description: String,
}

impl OperationDefinition {
    /// Create definition
    #[must_use]
    pub fn new(name: impl Into<String>, handler: Arc<dyn OperationHandler>) -> Self {
        Self {
            name: name.into(),
            parameters: IndexMap::new(),
            read_only: false,
            handler,
            description: String::new(),
        }
    }

    /// Declare a parameter
    #[must_use]
    pub fn parameter(mut self, parameter: AttributeDefinition) -> Self {
        self.parameters
            .insert(parameter.name().to_string(), parameter);
        self
    }

    /// Mark as read-only
    #[must_use]
    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }

    /// Set the description
    #[must_use]
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Operation name
    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Declared parameters
    #[inline]
    pub fn parameters(&self) -> impl Iterator<Item = &AttributeDefinition> {
        self.parameters.values()
    }

    /// One declared parameter
    #[inline]
    #[must_use]
    pub fn parameter_definition(&self, name: &str) -> Option<&AttributeDefinition> {
        self.parameters.get(name)
    }

    /// Whether the operation only reads
    #[inline]
    #[must_use]
    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// Handler
    #[inline]
    #[must_use]
    pub fn handler(&self) -> &Arc<dyn OperationHandler> {
        &self.handler
    }

    fn describe(&self) -> ModelValue {
        let params: BTreeMap<String, ModelValue> = self
            .parameters
            .values()
            .map(|p| (p.name().to_string(), p.describe()))
            .collect();
        ModelValue::object([
            ("description", ModelValue::from(self.description.as_str())),
            ("read-only", ModelValue::Boolean(self.read_only)),
            ("request-properties", ModelValue::Object(params)),
        ])
    }
}

/// Declared resource type
#[derive(Debug, Clone)]
pub struct ResourceType {
    element: Option<PathElement>,
    description: String,
    attributes: IndexMap<String, AttributeDefinition>,
    children: IndexMap<PathElement, ResourceType>,
    operations: IndexMap<String, OperationDefinition>,
    runtime: RuntimeBinding,
}

impl ResourceType {
    /// Start building a child type registered under `element`
    ///
    /// `element` is `key=*` for a type with named instances, or
    /// `key=name` for a singleton.
    #[must_use]
    pub fn builder(element: PathElement) -> ResourceTypeBuilder {
        ResourceTypeBuilder::new(Some(element))
    }

    /// Start building the root type
    #[must_use]
    pub fn root_builder() -> ResourceTypeBuilder {
        ResourceTypeBuilder::new(None)
    }

    /// Registration element (`None` for the root)
    #[inline]
    #[must_use]
    pub fn element(&self) -> Option<&PathElement> {
        self.element.as_ref()
    }

    /// Description
    #[inline]
    #[must_use]
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Attribute definitions in declaration order
    #[inline]
    pub fn attributes(&self) -> impl Iterator<Item = &AttributeDefinition> {
        self.attributes.values()
    }

    /// One attribute definition
    #[inline]
    #[must_use]
    pub fn attribute(&self, name: &str) -> Option<&AttributeDefinition> {
        self.attributes.get(name)
    }

    /// Child types in declaration order
    #[inline]
    pub fn children(&self) -> impl Iterator<Item = &ResourceType> {
        self.children.values()
    }

    /// Resolve the child type accepting a concrete element
    ///
    /// An exact registration wins over the wildcard one.
    #[must_use]
    pub fn resolve_child(&self, element: &PathElement) -> Option<&ResourceType> {
        self.children
            .get(element)
            .or_else(|| self.children.get(&PathElement::wildcard(element.key())))
    }

    /// Custom operation definitions
    #[inline]
    pub fn operations(&self) -> impl Iterator<Item = &OperationDefinition> {
        self.operations.values()
    }

    /// One custom operation
    #[inline]
    #[must_use]
    pub fn operation(&self, name: &str) -> Option<&OperationDefinition> {
        self.operations.get(name)
    }

    /// Runtime binding
    #[inline]
    #[must_use]
    pub fn runtime(&self) -> &RuntimeBinding {
        &self.runtime
    }

    /// Schema metadata (for `read-resource-description`)
    #[must_use]
    pub fn describe(&self, recursive: bool) -> ModelValue {
        let attributes: BTreeMap<String, ModelValue> = self
            .attributes
            .values()
            .map(|a| (a.name().to_string(), a.describe()))
            .collect();

        let mut operations: BTreeMap<String, ModelValue> = IMPLICIT_OPERATIONS
            .iter()
            .map(|name| ((*name).to_string(), ModelValue::Object(BTreeMap::new())))
            .collect();
        operations.extend(
            self.operations
                .values()
                .map(|o| (o.name().to_string(), o.describe())),
        );

        let mut children: BTreeMap<String, ModelValue> = BTreeMap::new();
        for (element, child) in &self.children {
            let described = if recursive {
                child.describe(true)
            } else {
                ModelValue::object([("description", ModelValue::from(child.description()))])
            };
            let entry = children
                .entry(element.key().to_string())
                .or_insert_with(|| ModelValue::Object(BTreeMap::new()));
            if let ModelValue::Object(instances) = entry {
                instances.insert(element.value().to_string(), described);
            }
        }

        ModelValue::object([
            ("description", ModelValue::from(self.description.as_str())),
            ("attributes", ModelValue::Object(attributes)),
            ("operations", ModelValue::Object(operations)),
            ("children", ModelValue::Object(children)),
        ])
    }
}

/// Builder for [`ResourceType`]
#[derive(Debug)]
pub struct ResourceTypeBuilder {
    ty: ResourceType,
    errors: Vec<SchemaError>,
}

impl ResourceTypeBuilder {
    fn new(element: Option<PathElement>) -> Self {
        Self {
            ty: ResourceType {
                element,
                description: String::new(),
                attributes: IndexMap::new(),
                children: IndexMap::new(),
                operations: IndexMap::new(),
                runtime: RuntimeBinding::None,
            },
            errors: Vec::new(),
        }
    }

    /// Set the description
    #[must_use]
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.ty.description = description.into();
        self
    }

    /// Add an attribute
    #[must_use]
    pub fn attribute(mut self, attribute: AttributeDefinition) -> Self {
        let name = attribute.name().to_string();
        if self.ty.attributes.contains_key(&name) {
            self.errors.push(SchemaError::DuplicateAttribute(name));
        } else {
            self.ty.attributes.insert(name, attribute);
        }
        self
    }

    /// Add a shared list of attributes
    #[must_use]
    pub fn attributes(self, attributes: impl IntoIterator<Item = AttributeDefinition>) -> Self {
        attributes.into_iter().fold(self, Self::attribute)
    }

    /// Add a child type
    #[must_use]
    pub fn child(mut self, child: ResourceType) -> Self {
        match child.element.clone() {
            None => self.errors.push(SchemaError::InvalidDefinition(
                "the root type cannot be registered as a child".to_string(),
            )),
            Some(element) if self.ty.children.contains_key(&element) => {
                self.errors
                    .push(SchemaError::DuplicateChildType(element.to_string()));
            }
            Some(element) => {
                self.ty.children.insert(element, child);
            }
        }
        self
    }

    /// Add a custom operation
    #[must_use]
    pub fn operation(mut self, operation: OperationDefinition) -> Self {
        let name = operation.name().to_string();
        if IMPLICIT_OPERATIONS.contains(&name.as_str()) || self.ty.operations.contains_key(&name) {
            self.errors.push(SchemaError::DuplicateOperation(name));
        } else {
            self.ty.operations.insert(name, operation);
        }
        self
    }

    /// Set the runtime binding
    #[must_use]
    pub fn runtime(mut self, binding: RuntimeBinding) -> Self {
        self.ty.runtime = binding;
        self
    }

    /// Finish the type
    ///
    /// # Errors
    /// Returns the first duplicate or invalid declaration
    pub fn build(self) -> Result<ResourceType, SchemaError> {
        if let Some(err) = self.errors.into_iter().next() {
            return Err(err);
        }
        if let RuntimeBinding::Unit {
            mode_attribute: Some(mode),
        } = &self.ty.runtime
        {
            if !self.ty.attributes.contains_key(mode) {
                return Err(SchemaError::InvalidDefinition(format!(
                    "mode attribute '{mode}' is not declared"
                )));
            }
        }
        if self.ty.element.is_none() && self.ty.runtime == RuntimeBinding::Parent {
            return Err(SchemaError::InvalidDefinition(
                "the root type has no parent unit".to_string(),
            ));
        }
        Ok(self.ty)
    }
}
