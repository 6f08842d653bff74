//! `add-alias` / `remove-alias` on containers
//!
//! Both rewrite the container's `aliases` list through the handler context,
//! so the change is journaled and rolls back with the operation.

use mgmt_model::{HandlerContext, HandlerError, ModelValue, Operation, OperationHandler};
use tracing::debug;

const ALIASES: &str = "aliases";
const NAME: &str = "name";

fn requested(operation: &Operation) -> Result<String, HandlerError> {
    operation
        .parameter(NAME)
        .and_then(ModelValue::as_str)
        .map(str::to_string)
        .ok_or_else(|| HandlerError::Failed("alias name is required".to_string()))
}

fn current_aliases(context: &dyn HandlerContext) -> Result<Vec<ModelValue>, HandlerError> {
    let container = context.read_resource(context.address())?;
    Ok(container
        .attribute(ALIASES)
        .as_list()
        .map(<[ModelValue]>::to_vec)
        .unwrap_or_default())
}

/// Append a name to the aliases list
#[derive(Debug, Clone, Copy, Default)]
pub struct AddAlias;

impl OperationHandler for AddAlias {
    fn execute(
        &self,
        context: &mut dyn HandlerContext,
        operation: &Operation,
    ) -> Result<Option<ModelValue>, HandlerError> {
        let alias = requested(operation)?;
        let mut aliases = current_aliases(context)?;
        if aliases.iter().any(|a| a.as_str() == Some(alias.as_str())) {
            return Err(HandlerError::Failed(format!(
                "alias '{alias}' already exists on {}",
                context.address()
            )));
        }
        aliases.push(ModelValue::String(alias.clone()));
        context.write_attribute(ALIASES, ModelValue::List(aliases))?;
        debug!(address = %context.address(), %alias, "alias added");
        Ok(None)
    }
}

/// Remove a name from the aliases list
///
/// Removing the last alias leaves the attribute undefined.
#[derive(Debug, Clone, Copy, Default)]
pub struct RemoveAlias;

impl OperationHandler for RemoveAlias {
    fn execute(
        &self,
        context: &mut dyn HandlerContext,
        operation: &Operation,
    ) -> Result<Option<ModelValue>, HandlerError> {
        let alias = requested(operation)?;
        let mut aliases = current_aliases(context)?;
        let before = aliases.len();
        aliases.retain(|a| a.as_str() != Some(alias.as_str()));
        if aliases.len() == before {
            return Err(HandlerError::Failed(format!(
                "alias '{alias}' is not defined on {}",
                context.address()
            )));
        }
        let value = if aliases.is_empty() {
            ModelValue::Undefined
        } else {
            ModelValue::List(aliases)
        };
        context.write_attribute(ALIASES, value)?;
        debug!(address = %context.address(), %alias, "alias removed");
        Ok(None)
    }
}
