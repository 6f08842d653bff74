//! Custom operation handler seam
//!
//! Resource types register [`OperationHandler`]s for their custom
//! operations. Handlers run in the MODEL stage and see the model only
//! through a [`HandlerContext`], which records every change so it can be
//! undone.

use crate::address::Address;
use crate::error::ModelError;
use crate::operation::Operation;
use crate::resource::Resource;
use crate::value::ModelValue;
use std::fmt::Debug;

/// MODEL-stage view given to a handler
pub trait HandlerContext {
    /// Address the operation targets
    fn address(&self) -> &Address;

    /// Read a resource from the working model
    ///
    /// # Errors
    /// Returns error if the resource does not exist
    fn read_resource(&self, address: &Address) -> Result<Resource, ModelError>;

    /// Validate and write an attribute of the target resource
    ///
    /// Returns the normalized value that was stored.
    ///
    /// # Errors
    /// Returns error if the attribute is unknown or the value invalid
    fn write_attribute(&mut self, name: &str, value: ModelValue) -> Result<ModelValue, ModelError>;

    /// Queue a further MODEL step after the current one
    fn add_step(&mut self, operation: Operation);
}

/// Executes one custom operation
pub trait OperationHandler: Send + Sync + Debug {
    /// Run the operation, returning its result (if any)
    ///
    /// # Errors
    /// Returns error if the operation cannot be applied; the pipeline then
    /// rolls back every change made so far
    fn execute(
        &self,
        context: &mut dyn HandlerContext,
        operation: &Operation,
    ) -> Result<Option<ModelValue>, HandlerError>;
}

/// Error raised by a custom handler
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HandlerError {
    /// Model access failed
    #[error(transparent)]
    Model(#[from] ModelError),

    /// Handler-specific failure
    #[error("{0}")]
    Failed(String),
}
