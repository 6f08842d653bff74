//! Error types for the configuration model
//!
//! All of these are raised before the model is mutated and are therefore
//! recoverable from the caller's point of view.

use crate::address::{Address, AddressError};

/// Schema lookup or definition errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SchemaError {
    /// No resource type registered at this address
    #[error("no resource type registered at {0}")]
    NoSuchResourceType(String),

    /// Unknown attribute for the resolved type
    #[error("no attribute '{attribute}' on {address}")]
    NoSuchAttribute { address: String, attribute: String },

    /// Unknown operation for the resolved type
    #[error("no operation '{operation}' on {address}")]
    NoSuchOperation { address: String, operation: String },

    /// Parameter not declared by the operation
    #[error("unknown parameter '{parameter}' for operation '{operation}'")]
    UnknownParameter { operation: String, parameter: String },

    /// Operation is missing a parameter it needs
    #[error("operation '{operation}' requires parameter '{parameter}'")]
    MissingParameter { operation: String, parameter: String },

    /// Attribute declared twice on one type
    #[error("duplicate attribute '{0}'")]
    DuplicateAttribute(String),

    /// Child type declared twice on one type
    #[error("duplicate child type '{0}'")]
    DuplicateChildType(String),

    /// Operation declared twice, or shadowing an implicit operation
    #[error("duplicate operation '{0}'")]
    DuplicateOperation(String),

    /// Malformed definition
    #[error("invalid definition: {0}")]
    InvalidDefinition(String),

    /// Malformed address
    #[error("invalid address: {0}")]
    InvalidAddress(#[from] AddressError),
}

/// Attribute value validation errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    /// Required attribute absent
    #[error("missing required attribute '{0}'")]
    MissingRequiredAttribute(String),

    /// Expression given for an attribute that does not accept them
    #[error("attribute '{0}' does not allow expressions")]
    ExpressionNotAllowed(String),

    /// Value cannot be coerced to the declared type
    #[error("attribute '{attribute}' expects {expected}, found {found}")]
    InvalidType {
        attribute: String,
        expected: String,
        found: String,
    },

    /// Validator rejected the value
    #[error("attribute '{attribute}' failed validation: {reason}")]
    ValidationFailed { attribute: String, reason: String },
}

/// Model tree conflicts
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConflictError {
    /// Resource already exists
    #[error("resource already exists: {0}")]
    AlreadyExists(Address),

    /// Resource does not exist
    #[error("resource not found: {0}")]
    NotFound(Address),

    /// Parent of the resource does not exist
    #[error("parent of {0} does not exist")]
    ParentNotFound(Address),
}

/// Any error raised by the model layer
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ModelError {
    /// Schema error
    #[error(transparent)]
    Schema(#[from] SchemaError),

    /// Validation error
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Conflict error
    #[error(transparent)]
    Conflict(#[from] ConflictError),
}

/// Result type for model operations
pub type ModelResult<T> = Result<T, ModelError>;
