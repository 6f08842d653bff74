//! MODEL stage
//!
//! Runs an operation and every step it composes against a private
//! transaction, then turns the transaction journal into the change set
//! the reconciler works from.

use crate::error::OperationResult;
use mgmt_model::operation::{INCLUDE_DEFAULTS, RECURSIVE, VALUE};
use mgmt_model::{
    Address, AttributeDefinition, ConflictError, HandlerContext, ModelError, ModelMutation,
    ModelTransaction, ModelValue, Operation, OperationKind, Registry, Resource, ResourceType,
    SchemaError,
};
use mgmt_runtime::{ChangeKind, ModelChange};
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::debug;

/// Run `operation` and the steps it adds, returning the operation's result
pub(crate) fn run_steps(
    registry: &Registry,
    tx: &mut ModelTransaction,
    operation: &Operation,
) -> OperationResult<ModelValue> {
    let mut queue = VecDeque::from([operation.clone()]);
    let mut result = None;
    while let Some(step) = queue.pop_front() {
        debug!(step = %step, "model step");
        let value = execute_step(registry, tx, &step, &mut queue)?;
        if result.is_none() {
            result = Some(value.unwrap_or_default());
        }
    }
    Ok(result.unwrap_or_default())
}

fn execute_step(
    registry: &Registry,
    tx: &mut ModelTransaction,
    step: &Operation,
    queue: &mut VecDeque<Operation>,
) -> OperationResult<Option<ModelValue>> {
    let ty = registry.validate_operation(step)?;
    let address = step.address();
    match step.kind() {
        OperationKind::Add => {
            if tx.exists(address) {
                return Err(ConflictError::AlreadyExists(address.clone()).into());
            }
            let attributes = ty
                .attributes()
                .map(|definition| {
                    definition
                        .validate_and_normalize(step.parameter(definition.name()))
                        .map(|value| (definition.name().to_string(), value))
                })
                .collect::<Result<Vec<_>, _>>()?;
            tx.create_resource(Resource::with_attributes(address.clone(), attributes))?;
            Ok(None)
        }
        OperationKind::Remove => {
            if address.is_root() {
                return Err(ConflictError::NotFound(address.clone()).into());
            }
            // one removal per resource, children first
            let subtree = tx.read_resource(address)?.clone();
            for resource in subtree.descendants_post_order() {
                tx.remove_resource(resource.address())?;
            }
            Ok(None)
        }
        OperationKind::ReadAttribute => {
            let definition = attribute_definition(ty, step)?;
            let value = tx.read_resource(address)?.attribute(definition.name());
            if !include_defaults(step) && definition.is_default(&value) {
                return Ok(Some(ModelValue::Undefined));
            }
            Ok(Some(value))
        }
        OperationKind::WriteAttribute | OperationKind::UndefineAttribute => {
            let definition = attribute_definition(ty, step)?;
            let raw = match step.kind() {
                OperationKind::WriteAttribute => step.parameter(VALUE),
                _ => None,
            };
            let value = definition.validate_and_normalize(raw)?;
            tx.update_attribute(address, definition.name(), value)?;
            Ok(None)
        }
        OperationKind::ReadResource => Ok(Some(tx.read_resource(address)?.to_model_value(
            ty,
            step.flag(RECURSIVE),
            include_defaults(step),
        ))),
        OperationKind::ReadResourceDescription => Ok(Some(ty.describe(step.flag(RECURSIVE)))),
        OperationKind::Custom(name) => {
            let definition = ty.operation(name).ok_or_else(|| SchemaError::NoSuchOperation {
                address: address.to_string(),
                operation: name.clone(),
            })?;
            let mut normalized = Operation::new(step.kind().clone(), address.clone());
            for parameter in definition.parameters() {
                let value = parameter.validate_and_normalize(step.parameter(parameter.name()))?;
                if value.is_defined() {
                    normalized = normalized.with_parameter(parameter.name(), value);
                }
            }
            let handler = Arc::clone(definition.handler());
            let mut context = StepContext {
                registry,
                tx,
                address: address.clone(),
                added: Vec::new(),
            };
            let result = handler.execute(&mut context, &normalized)?;
            // composed steps run next, in the order they were added
            for added in context.added.into_iter().rev() {
                queue.push_front(added);
            }
            Ok(result)
        }
    }
}

fn attribute_definition<'a>(
    ty: &'a ResourceType,
    step: &Operation,
) -> Result<&'a AttributeDefinition, SchemaError> {
    let name = step.attribute_name().unwrap_or_default();
    ty.attribute(name)
        .ok_or_else(|| SchemaError::NoSuchAttribute {
            address: step.address().to_string(),
            attribute: name.to_string(),
        })
}

fn include_defaults(step: &Operation) -> bool {
    step.parameter(INCLUDE_DEFAULTS)
        .map_or(true, |_| step.flag(INCLUDE_DEFAULTS))
}

/// Handler view of the working model
struct StepContext<'a> {
    registry: &'a Registry,
    tx: &'a mut ModelTransaction,
    address: Address,
    added: Vec<Operation>,
}

impl HandlerContext for StepContext<'_> {
    fn address(&self) -> &Address {
        &self.address
    }

    fn read_resource(&self, address: &Address) -> Result<Resource, ModelError> {
        Ok(self.tx.read_resource(address)?.clone())
    }

    fn write_attribute(&mut self, name: &str, value: ModelValue) -> Result<ModelValue, ModelError> {
        let ty = self.registry.resolve(&self.address)?;
        let definition = ty
            .attribute(name)
            .ok_or_else(|| SchemaError::NoSuchAttribute {
                address: self.address.to_string(),
                attribute: name.to_string(),
            })?;
        let value = definition.validate_and_normalize(Some(&value))?;
        self.tx
            .update_attribute(&self.address, name, value.clone())?;
        Ok(value)
    }

    fn add_step(&mut self, operation: Operation) {
        self.added.push(operation);
    }
}

/// Change set of a transaction, parents added before their children and
/// removed after them
pub(crate) fn model_changes(
    registry: &Registry,
    journal: &[ModelMutation],
) -> OperationResult<Vec<ModelChange>> {
    let mut changes: Vec<ModelChange> = Vec::new();
    for mutation in journal {
        match mutation {
            ModelMutation::Insert { resource } => {
                let mut subtree = resource.descendants_post_order();
                subtree.reverse();
                changes.extend(
                    subtree
                        .into_iter()
                        .map(|r| ModelChange::added(r.address().clone())),
                );
            }
            ModelMutation::Remove { resource } => {
                for removed in resource.descendants_post_order() {
                    let address = removed.address();
                    let added_here = changes
                        .iter()
                        .any(|c| c.address == *address && c.kind == ChangeKind::Added);
                    changes.retain(|c| c.address != *address);
                    if !added_here {
                        changes.push(ModelChange::removed(address.clone()));
                    }
                }
            }
            ModelMutation::SetAttribute { address, name, .. } => {
                let impact = registry
                    .resolve(address)?
                    .attribute(name)
                    .map(AttributeDefinition::restart_impact)
                    .unwrap_or_default();
                match changes.iter_mut().find(|c| c.address == *address) {
                    Some(ModelChange {
                        kind: ChangeKind::Modified { attributes },
                        ..
                    }) => {
                        attributes.insert(name.clone(), impact);
                    }
                    // added or removed in this transaction
                    Some(_) => {}
                    None => changes.push(ModelChange::modified(
                        address.clone(),
                        [(name.clone(), impact)],
                    )),
                }
            }
        }
    }
    Ok(changes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::OperationError;
    use mgmt_model::{
        HandlerError, ModelStore, ModelVersion, OperationDefinition, OperationHandler,
        PathElement, RestartImpact, ValidationError, ValueType,
    };
    use pretty_assertions::assert_eq;

    fn addr(s: &str) -> Address {
        s.parse().unwrap()
    }

    #[derive(Debug)]
    struct Rename;

    impl OperationHandler for Rename {
        fn execute(
            &self,
            context: &mut dyn HandlerContext,
            operation: &Operation,
        ) -> Result<Option<ModelValue>, HandlerError> {
            let label = operation.parameter("label").cloned().unwrap_or_default();
            let stored = context.write_attribute("label", label)?;
            let child = context.address().child("item", "auto");
            context.add_step(Operation::add(child, [("size", ModelValue::Long(1))]));
            Ok(Some(stored))
        }
    }

    fn registry() -> Registry {
        let item = ResourceType::builder(PathElement::wildcard("item"))
            .attribute(
                AttributeDefinition::builder("size", ValueType::Long)
                    .required()
                    .restart_impact(RestartImpact::ResourceServices)
                    .build()
                    .unwrap(),
            )
            .attribute(
                AttributeDefinition::builder("note", ValueType::String)
                    .default_value("none")
                    .build()
                    .unwrap(),
            )
            .build()
            .unwrap();
        let group = ResourceType::builder(PathElement::wildcard("group"))
            .attribute(
                AttributeDefinition::builder("label", ValueType::String)
                    .build()
                    .unwrap(),
            )
            .operation(
                OperationDefinition::new("relabel", Arc::new(Rename)).parameter(
                    AttributeDefinition::builder("label", ValueType::String)
                        .required()
                        .build()
                        .unwrap(),
                ),
            )
            .child(item)
            .build()
            .unwrap();
        Registry::new(
            ResourceType::root_builder().child(group).build().unwrap(),
            ModelVersion::new(1, 0, 0),
        )
    }

    fn seeded(registry: &Registry) -> ModelStore {
        let store = ModelStore::new();
        let mut tx = store.begin();
        run_steps(registry, &mut tx, &Operation::add(addr("/group=g"), Vec::<(String, ModelValue)>::new())).unwrap();
        store.commit(tx).unwrap();
        store
    }

    #[test]
    fn add_stores_defaults_and_rejects_missing_required() {
        let registry = registry();
        let store = seeded(&registry);
        let mut tx = store.begin();
        let err = run_steps(
            &registry,
            &mut tx,
            &Operation::add(addr("/group=g/item=a"), Vec::<(String, ModelValue)>::new()),
        )
        .unwrap_err();
        assert_eq!(
            err,
            OperationError::Validation(ValidationError::MissingRequiredAttribute("size".into()))
        );

        run_steps(
            &registry,
            &mut tx,
            &Operation::add(addr("/group=g/item=a"), [("size", ModelValue::from("12"))]),
        )
        .unwrap();
        let item = tx.read_resource(&addr("/group=g/item=a")).unwrap();
        assert_eq!(item.attribute("size"), ModelValue::Long(12));
        assert_eq!(item.attribute("note"), ModelValue::from("none"));
    }

    #[test]
    fn read_attribute_honours_include_defaults() {
        let registry = registry();
        let store = seeded(&registry);
        let mut tx = store.begin();
        run_steps(
            &registry,
            &mut tx,
            &Operation::add(addr("/group=g/item=a"), [("size", ModelValue::Long(3))]),
        )
        .unwrap();
        let read = Operation::read_attribute(addr("/group=g/item=a"), "note");
        assert_eq!(
            run_steps(&registry, &mut tx, &read).unwrap(),
            ModelValue::from("none")
        );
        let read = read.with_parameter(INCLUDE_DEFAULTS, false);
        assert_eq!(run_steps(&registry, &mut tx, &read).unwrap(), ModelValue::Undefined);
    }

    #[test]
    fn remove_composes_one_removal_per_resource() {
        let registry = registry();
        let store = seeded(&registry);
        let mut tx = store.begin();
        for name in ["a", "b"] {
            run_steps(
                &registry,
                &mut tx,
                &Operation::add(
                    addr(&format!("/group=g/item={name}")),
                    [("size", ModelValue::Long(1))],
                ),
            )
            .unwrap();
        }
        store.commit(tx).unwrap();

        let mut tx = store.begin();
        run_steps(&registry, &mut tx, &Operation::remove(addr("/group=g"))).unwrap();
        let changes = model_changes(&registry, tx.journal()).unwrap();
        assert_eq!(
            changes,
            vec![
                ModelChange::removed(addr("/group=g/item=a")),
                ModelChange::removed(addr("/group=g/item=b")),
                ModelChange::removed(addr("/group=g")),
            ]
        );
    }

    #[test]
    fn remove_missing_is_conflict() {
        let registry = registry();
        let store = seeded(&registry);
        let mut tx = store.begin();
        let err = run_steps(&registry, &mut tx, &Operation::remove(addr("/group=x"))).unwrap_err();
        assert!(matches!(err, OperationError::Conflict(ConflictError::NotFound(_))));
        assert!(tx.journal().is_empty());
    }

    #[test]
    fn custom_handler_composes_steps() {
        let registry = registry();
        let store = seeded(&registry);
        let mut tx = store.begin();
        let op = Operation::custom("relabel", addr("/group=g")).with_parameter("label", "blue");
        let result = run_steps(&registry, &mut tx, &op).unwrap();
        assert_eq!(result, ModelValue::from("blue"));
        assert!(tx.exists(&addr("/group=g/item=auto")));

        let changes = model_changes(&registry, tx.journal()).unwrap();
        assert_eq!(
            changes,
            vec![
                ModelChange::modified(addr("/group=g"), [("label", RestartImpact::None)]),
                ModelChange::added(addr("/group=g/item=auto")),
            ]
        );
    }

    #[test]
    fn custom_parameters_are_validated() {
        let registry = registry();
        let store = seeded(&registry);
        let mut tx = store.begin();
        let err = run_steps(&registry, &mut tx, &Operation::custom("relabel", addr("/group=g")))
            .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Validation);
    }

    #[test]
    fn changes_merge_per_address() {
        let registry = registry();
        let store = seeded(&registry);
        let mut tx = store.begin();
        let item = addr("/group=g/item=a");
        run_steps(&registry, &mut tx, &Operation::add(item.clone(), [("size", ModelValue::Long(1))]))
            .unwrap();
        run_steps(
            &registry,
            &mut tx,
            &Operation::write_attribute(item.clone(), "size", ModelValue::Long(2)),
        )
        .unwrap();
        // written right after being added: still one install
        assert_eq!(
            model_changes(&registry, tx.journal()).unwrap(),
            vec![ModelChange::added(item.clone())]
        );
        store.commit(tx).unwrap();

        let mut tx = store.begin();
        for (name, value) in [("size", ModelValue::Long(5)), ("note", ModelValue::from("x"))] {
            run_steps(&registry, &mut tx, &Operation::write_attribute(item.clone(), name, value))
                .unwrap();
        }
        assert_eq!(
            model_changes(&registry, tx.journal()).unwrap(),
            vec![ModelChange::modified(
                item,
                [
                    ("note", RestartImpact::None),
                    ("size", RestartImpact::ResourceServices)
                ]
            )]
        );
    }
}
