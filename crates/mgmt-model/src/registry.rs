//! Resource type registry
//!
//! One process-scoped [`Registry`] holds the static type tree. It is built
//! once and passed explicitly to everything that needs schema lookups.

use crate::address::Address;
use crate::error::SchemaError;
use crate::operation::{Operation, OperationKind, INCLUDE_DEFAULTS, NAME, RECURSIVE, VALUE};
use crate::resource_type::ResourceType;
use crate::version::ModelVersion;
use tracing::trace;

/// Static resource type tree plus the schema version it implements
#[derive(Debug, Clone)]
pub struct Registry {
    root: ResourceType,
    version: ModelVersion,
}

impl Registry {
    /// Create registry from the root type
    #[must_use]
    pub fn new(root: ResourceType, version: ModelVersion) -> Self {
        Self { root, version }
    }

    /// Root type
    #[inline]
    #[must_use]
    pub fn root(&self) -> &ResourceType {
        &self.root
    }

    /// Schema version
    #[inline]
    #[must_use]
    pub fn version(&self) -> ModelVersion {
        self.version
    }

    /// Resolve the type of the resource at `address`
    ///
    /// Walks segment by segment; at each level an exact child registration
    /// is preferred over the wildcard one.
    ///
    /// # Errors
    /// Returns `NoSuchResourceType` if any segment has no registration
    pub fn resolve(&self, address: &Address) -> Result<&ResourceType, SchemaError> {
        address.iter().try_fold(&self.root, |ty, element| {
            ty.resolve_child(element).ok_or_else(|| {
                trace!(%address, %element, "no child type registered");
                SchemaError::NoSuchResourceType(address.to_string())
            })
        })
    }

    /// Names of every operation available at `address`
    ///
    /// # Errors
    /// Returns error if the address does not resolve
    pub fn operation_names(&self, address: &Address) -> Result<Vec<String>, SchemaError> {
        let ty = self.resolve(address)?;
        Ok(crate::operation::IMPLICIT_OPERATIONS
            .iter()
            .map(|s| (*s).to_string())
            .chain(ty.operations().map(|o| o.name().to_string()))
            .collect())
    }

    /// Check an operation against the schema before anything is mutated
    ///
    /// Confirms the address resolves, the operation exists for the type
    /// and every parameter is one the operation accepts. Values are not
    /// validated here.
    ///
    /// # Errors
    /// Returns the first schema mismatch found
    pub fn validate_operation(&self, operation: &Operation) -> Result<&ResourceType, SchemaError> {
        let address = operation.address();
        let ty = self.resolve(address)?;
        let op_name = operation.kind().name();
        let unknown = |parameter: &str| SchemaError::UnknownParameter {
            operation: op_name.to_string(),
            parameter: parameter.to_string(),
        };

        match operation.kind() {
            OperationKind::Add => {
                if let Some(name) = operation
                    .parameters()
                    .keys()
                    .find(|name| ty.attribute(name).is_none())
                {
                    return Err(unknown(name));
                }
            }
            OperationKind::Remove => {
                if let Some(name) = operation.parameters().keys().next() {
                    return Err(unknown(name));
                }
            }
            OperationKind::ReadAttribute
            | OperationKind::WriteAttribute
            | OperationKind::UndefineAttribute => {
                let name = operation
                    .attribute_name()
                    .ok_or_else(|| SchemaError::MissingParameter {
                        operation: op_name.to_string(),
                        parameter: NAME.to_string(),
                    })?;
                if ty.attribute(name).is_none() {
                    return Err(SchemaError::NoSuchAttribute {
                        address: address.to_string(),
                        attribute: name.to_string(),
                    });
                }
                let accepted: &[&str] = match operation.kind() {
                    OperationKind::WriteAttribute => &[NAME, VALUE],
                    OperationKind::ReadAttribute => &[NAME, INCLUDE_DEFAULTS],
                    _ => &[NAME],
                };
                if let Some(extra) = operation
                    .parameters()
                    .keys()
                    .find(|k| !accepted.contains(&k.as_str()))
                {
                    return Err(unknown(extra));
                }
            }
            OperationKind::ReadResource | OperationKind::ReadResourceDescription => {
                if let Some(extra) = operation
                    .parameters()
                    .keys()
                    .find(|k| k.as_str() != RECURSIVE && k.as_str() != INCLUDE_DEFAULTS)
                {
                    return Err(unknown(extra));
                }
            }
            OperationKind::Custom(name) => {
                let definition =
                    ty.operation(name)
                        .ok_or_else(|| SchemaError::NoSuchOperation {
                            address: address.to_string(),
                            operation: name.clone(),
                        })?;
                if let Some(extra) = operation
                    .parameters()
                    .keys()
                    .find(|k| definition.parameter_definition(k).is_none())
                {
                    return Err(unknown(extra));
                }
            }
        }
        Ok(ty)
    }

    /// Whether an operation leaves the model untouched
    ///
    /// # Errors
    /// Returns error if the operation does not resolve
    pub fn is_read_only(&self, operation: &Operation) -> Result<bool, SchemaError> {
        match operation.kind() {
            OperationKind::Custom(name) => {
                let ty = self.resolve(operation.address())?;
                ty.operation(name)
                    .map(crate::resource_type::OperationDefinition::is_read_only)
                    .ok_or_else(|| SchemaError::NoSuchOperation {
                        address: operation.address().to_string(),
                        operation: name.clone(),
                    })
            }
            kind => Ok(kind.is_read_only()),
        }
    }
}
