//! Management Model
//!
//! Typed configuration model for the management control plane.
//!
//! # Core Concepts
//!
//! - [`Address`]: `(type key, instance name)` path identifying a resource
//! - [`AttributeDefinition`]: type, default, expression support and restart
//!   impact of one attribute, with [`AttributeDefinition::validate_and_normalize`]
//! - [`ResourceType`] / [`Registry`]: the static addressable type tree
//! - [`Resource`] / [`ModelStore`]: the live model tree and its single-writer store
//! - [`Operation`]: a request against one address
//! - [`OperationHandler`]: seam for custom operations
//!
//! # Example
//!
//! ```rust,ignore
//! use mgmt_model::{Address, ModelStore, Resource};
//!
//! let store = ModelStore::new();
//! let mut tx = store.begin();
//! tx.create_resource(Resource::new("/container=bar".parse()?))?;
//! store.commit(tx)?;
//! ```

pub mod address;
pub mod attribute;
pub mod error;
pub mod expression;
pub mod handler;
pub mod operation;
pub mod registry;
pub mod resource;
pub mod resource_type;
pub mod store;
pub mod value;
pub mod version;

pub use address::{Address, AddressError, AddressPattern, PathElement, WILDCARD};
pub use attribute::{
    AttributeBuilder, AttributeDefinition, ResourceReference, RestartImpact, Validator, ValueType,
};
pub use error::{ConflictError, ModelError, ModelResult, SchemaError, ValidationError};
pub use expression::{ExpressionError, ExpressionResolver};
pub use handler::{HandlerContext, HandlerError, OperationHandler};
pub use operation::{Operation, OperationKind};
pub use registry::Registry;
pub use resource::Resource;
pub use resource_type::{OperationDefinition, ResourceType, ResourceTypeBuilder, RuntimeBinding};
pub use store::{ModelMutation, ModelStore, ModelTransaction, PersistenceError};
pub use value::ModelValue;
pub use version::{ModelVersion, VersionParseError};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
