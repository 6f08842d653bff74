//! Version transformer
//!
//! [`VersionTransformer`] rewrites operations and whole resources produced at
//! the current schema version into the form a declared older peer
//! understands. It works on clones and never touches the model store.
//!
//! Per attribute, the applicable rules run in phase order:
//!
//! 1. discard: the attribute (or, for single-attribute writes, the whole
//!    operation) is silently dropped
//! 2. reject: the operation fails with [`TransformError`]
//! 3. convert: the value is rewritten with the converter's `to_old` side
//! 4. rename: the attribute gets its peer name
//!
//! A `read-attribute` carries no value, so only the rules that do not look at
//! one apply: an attribute rejected whenever defined fails the read, and
//! conversions and renames shape the request and its result.

use crate::error::{TransformError, TransformResult};
use crate::result::ResultTransformer;
use crate::rule::{AttributeAction, Rejection};
use crate::table::TransformationTable;
use mgmt_model::operation::{NAME, VALUE};
use mgmt_model::{Address, ModelValue, ModelVersion, Operation, OperationKind, Resource};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

/// Operation rewritten for a peer, plus the matching result transformer
#[derive(Debug, Clone, Default)]
pub struct TransformedOperation {
    operation: Option<Operation>,
    result: ResultTransformer,
}

impl TransformedOperation {
    /// Operation forwarded as is
    #[must_use]
    pub fn unchanged(operation: Operation) -> Self {
        Self {
            operation: Some(operation),
            result: ResultTransformer::identity(),
        }
    }

    /// Operation with nothing left to forward
    #[must_use]
    pub fn discarded() -> Self {
        Self::default()
    }

    /// Operation to forward, `None` if discarded
    #[inline]
    #[must_use]
    pub fn operation(&self) -> Option<&Operation> {
        self.operation.as_ref()
    }

    /// Check if the peer should not see the operation at all
    #[inline]
    #[must_use]
    pub fn is_discarded(&self) -> bool {
        self.operation.is_none()
    }

    /// Transformer for the peer's response
    #[inline]
    #[must_use]
    pub fn result_transformer(&self) -> &ResultTransformer {
        &self.result
    }

    /// Rewrite the peer's response into the current form
    #[must_use]
    pub fn transform_result(&self, result: ModelValue) -> ModelValue {
        self.result.transform(result)
    }

    /// Split into operation and result transformer
    #[must_use]
    pub fn into_parts(self) -> (Option<Operation>, ResultTransformer) {
        (self.operation, self.result)
    }
}

enum AttributeOutcome {
    Discarded,
    Forward { name: String, value: ModelValue },
}

/// Table-driven transformer for one schema
#[derive(Debug, Clone)]
pub struct VersionTransformer {
    current: ModelVersion,
    table: Arc<TransformationTable>,
}

impl VersionTransformer {
    /// Transformer for a schema at version `current`
    #[must_use]
    pub fn new(current: ModelVersion, table: TransformationTable) -> Self {
        Self {
            current,
            table: Arc::new(table),
        }
    }

    /// Version operations are written in
    #[inline]
    #[must_use]
    pub fn current(&self) -> ModelVersion {
        self.current
    }

    /// Rule table
    #[inline]
    #[must_use]
    pub fn table(&self) -> &TransformationTable {
        &self.table
    }

    /// Check if a peer needs rewriting at all
    #[inline]
    #[must_use]
    pub fn needs_transform(&self, peer: ModelVersion) -> bool {
        peer < self.current
    }

    /// Rewrite an operation for `peer`
    ///
    /// # Errors
    /// Returns [`TransformError`] when the operation touches a resource type,
    /// custom operation or attribute value the peer cannot represent.
    pub fn transform_operation(
        &self,
        operation: &Operation,
        peer: ModelVersion,
    ) -> TransformResult<TransformedOperation> {
        if !self.needs_transform(peer) {
            return Ok(TransformedOperation::unchanged(operation.clone()));
        }
        let address = operation.address();
        if let Some(rejected) = self.table.rejected_child(address, peer) {
            return Err(TransformError::Resource {
                address: rejected,
                version: peer,
            });
        }

        match operation.kind() {
            OperationKind::Add => {
                let attributes = self.transform_attributes(address, operation.parameters(), peer)?;
                let mut transformed = operation.clone();
                *transformed.parameters_mut() = attributes;
                Ok(TransformedOperation::unchanged(transformed))
            }
            OperationKind::WriteAttribute | OperationKind::UndefineAttribute => {
                let Some(name) = operation.attribute_name() else {
                    return Ok(TransformedOperation::unchanged(operation.clone()));
                };
                let value = operation.parameter(VALUE).cloned().unwrap_or_default();
                match self.transform_attribute(address, name, value, peer)? {
                    AttributeOutcome::Discarded => {
                        debug!(%address, attribute = name, %peer, "write discarded for peer");
                        Ok(TransformedOperation::discarded())
                    }
                    AttributeOutcome::Forward { name, value } => {
                        let mut transformed = operation.clone();
                        let parameters = transformed.parameters_mut();
                        parameters.insert(NAME.to_string(), ModelValue::String(name));
                        if matches!(operation.kind(), OperationKind::WriteAttribute) {
                            parameters.insert(VALUE.to_string(), value);
                        }
                        Ok(TransformedOperation::unchanged(transformed))
                    }
                }
            }
            OperationKind::ReadAttribute => {
                let Some(name) = operation.attribute_name() else {
                    return Ok(TransformedOperation::unchanged(operation.clone()));
                };
                let mut converters = Vec::new();
                let mut peer_name = name.to_string();
                for rule in self.table.rules_for(address, name, peer) {
                    match rule.action() {
                        AttributeAction::RejectIfDefined => {
                            return Err(TransformError::Attribute {
                                address: address.clone(),
                                attribute: name.to_string(),
                                version: peer,
                                reason: Rejection::Defined,
                            });
                        }
                        AttributeAction::Convert(converter) => converters.push(converter.clone()),
                        AttributeAction::Rename(old) => peer_name.clone_from(old),
                        _ => {}
                    }
                }
                let mut transformed = operation.clone();
                transformed
                    .parameters_mut()
                    .insert(NAME.to_string(), ModelValue::String(peer_name));
                Ok(TransformedOperation {
                    operation: Some(transformed),
                    result: ResultTransformer::attribute(converters),
                })
            }
            OperationKind::ReadResource => Ok(TransformedOperation {
                operation: Some(operation.clone()),
                result: ResultTransformer::resource(Arc::clone(&self.table), address.clone(), peer),
            }),
            OperationKind::Custom(name) => {
                if self.table.rejects_operation(address, name, peer) {
                    return Err(TransformError::Operation {
                        address: address.clone(),
                        operation: name.clone(),
                        version: peer,
                    });
                }
                Ok(TransformedOperation::unchanged(operation.clone()))
            }
            OperationKind::Remove | OperationKind::ReadResourceDescription => {
                Ok(TransformedOperation::unchanged(operation.clone()))
            }
        }
    }

    /// Rewrite a whole resource tree for `peer`
    ///
    /// Used to push a model snapshot to an older peer. Discarded attributes
    /// are dropped; any rejected attribute or child type fails the push.
    ///
    /// # Errors
    /// Returns [`TransformError`] on the first rejection.
    pub fn transform_resource(&self, resource: &Resource, peer: ModelVersion) -> TransformResult<Resource> {
        if !self.needs_transform(peer) {
            return Ok(resource.clone());
        }
        let address = resource.address();
        if let Some(rejected) = self.table.rejected_child(address, peer) {
            return Err(TransformError::Resource {
                address: rejected,
                version: peer,
            });
        }
        let attributes: BTreeMap<String, ModelValue> = resource
            .attributes()
            .iter()
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect();
        let attributes = self.transform_attributes(address, &attributes, peer)?;
        let mut transformed = Resource::with_attributes(address.clone(), attributes);
        for child in resource.children() {
            transformed.insert_child(self.transform_resource(child, peer)?);
        }
        Ok(transformed)
    }

    fn transform_attributes(
        &self,
        address: &Address,
        attributes: &BTreeMap<String, ModelValue>,
        peer: ModelVersion,
    ) -> TransformResult<BTreeMap<String, ModelValue>> {
        let mut out = BTreeMap::new();
        for (name, value) in attributes {
            match self.transform_attribute(address, name, value.clone(), peer)? {
                AttributeOutcome::Discarded => {
                    debug!(%address, attribute = %name, %peer, "attribute discarded for peer");
                }
                AttributeOutcome::Forward { name, value } => {
                    out.insert(name, value);
                }
            }
        }
        Ok(out)
    }

    fn transform_attribute(
        &self,
        address: &Address,
        name: &str,
        mut value: ModelValue,
        peer: ModelVersion,
    ) -> TransformResult<AttributeOutcome> {
        let mut peer_name = name.to_string();
        for rule in self.table.rules_for(address, name, peer) {
            let action = rule.action();
            if action.discards(&value) {
                return Ok(AttributeOutcome::Discarded);
            }
            if let Some(reason) = action.rejects(&value) {
                return Err(TransformError::Attribute {
                    address: address.clone(),
                    attribute: name.to_string(),
                    version: peer,
                    reason,
                });
            }
            match action {
                AttributeAction::Convert(converter) if value.is_defined() => {
                    let converted = converter.to_old(&value);
                    debug!(%address, attribute = name, converter = converter.name(), %value, %converted, "value converted for peer");
                    value = converted;
                }
                AttributeAction::Rename(old) => peer_name.clone_from(old),
                _ => {}
            }
        }
        Ok(AttributeOutcome::Forward {
            name: peer_name,
            value,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::range::VersionRange;
    use crate::rule::{Converter, Rejection};
    use mgmt_model::{AddressPattern, PathElement};
    use pretty_assertions::assert_eq;

    const CURRENT: ModelVersion = ModelVersion::new(2, 0, 0);
    const V1_3: ModelVersion = ModelVersion::new(1, 3, 0);
    const V1_4: ModelVersion = ModelVersion::new(1, 4, 0);

    fn container() -> AddressPattern {
        AddressPattern::root().child(PathElement::wildcard("container"))
    }

    fn cache() -> AddressPattern {
        container().child(PathElement::wildcard("cache"))
    }

    fn transformer() -> VersionTransformer {
        let old = VersionRange::up_to(V1_3);
        let table = TransformationTable::new()
            .attribute(&cache(), "segments", old, AttributeAction::DiscardIfUndefined)
            .attribute(&cache(), "segments", old, AttributeAction::RejectExpression)
            .attribute(&cache(), "segments", old, AttributeAction::Convert(Converter::scale("segments", 6)))
            .attribute(&cache(), "segments", old, AttributeAction::Rename("virtual-nodes".into()))
            .attribute(
                &cache(),
                "statistics-enabled",
                VersionRange::up_to(V1_4),
                AttributeAction::DiscardIfDefault(ModelValue::Boolean(true)),
            )
            .attribute(
                &cache(),
                "statistics-enabled",
                VersionRange::up_to(V1_4),
                AttributeAction::RejectValue(ModelValue::Boolean(false)),
            )
            .attribute(&cache(), "indexing-properties", old, AttributeAction::RejectIfDefined)
            .reject_child(&cache(), "backup", old)
            .reject_operation(&container(), "add-alias", old);
        VersionTransformer::new(CURRENT, table)
    }

    fn foo() -> Address {
        "/container=bar/cache=foo".parse().unwrap()
    }

    #[test]
    fn current_peer_passes_through() {
        let op = Operation::write_attribute(foo(), "segments", ModelValue::Long(60));
        let transformed = transformer().transform_operation(&op, CURRENT).unwrap();
        assert_eq!(transformed.operation(), Some(&op));
        assert!(transformed.result_transformer().is_identity());
    }

    #[test]
    fn add_converts_and_renames() {
        let op = Operation::add(
            foo(),
            [
                ("segments", ModelValue::Long(60)),
                ("owners", ModelValue::Long(2)),
                ("statistics-enabled", ModelValue::Boolean(true)),
            ],
        );
        let transformed = transformer().transform_operation(&op, V1_3).unwrap();
        let forwarded = transformed.operation().unwrap();
        let expected: BTreeMap<String, ModelValue> = [
            ("owners".to_string(), ModelValue::Long(2)),
            ("virtual-nodes".to_string(), ModelValue::Long(10)),
        ]
        .into_iter()
        .collect();
        assert_eq!(forwarded.parameters(), &expected);
        assert_eq!(forwarded.kind(), &OperationKind::Add);
    }

    #[test]
    fn default_write_is_same_as_omission() {
        let t = transformer();
        let with_default = Operation::add(
            foo(),
            [
                ("owners", ModelValue::Long(2)),
                ("statistics-enabled", ModelValue::Boolean(true)),
            ],
        );
        let without = Operation::add(foo(), [("owners", ModelValue::Long(2))]);
        assert_eq!(
            t.transform_operation(&with_default, V1_4).unwrap().operation(),
            t.transform_operation(&without, V1_4).unwrap().operation()
        );

        let write = Operation::write_attribute(foo(), "statistics-enabled", ModelValue::Boolean(true));
        assert!(t.transform_operation(&write, V1_4).unwrap().is_discarded());
    }

    #[test]
    fn rejected_value_fails() {
        let write = Operation::write_attribute(foo(), "statistics-enabled", ModelValue::Boolean(false));
        let err = transformer().transform_operation(&write, V1_4).unwrap_err();
        assert_eq!(
            err,
            TransformError::Attribute {
                address: foo(),
                attribute: "statistics-enabled".into(),
                version: V1_4,
                reason: Rejection::Value(ModelValue::Boolean(false)),
            }
        );
    }

    #[test]
    fn defined_attribute_rejected() {
        let op = Operation::add(foo(), [("indexing-properties", ModelValue::from("x=y"))]);
        let err = transformer().transform_operation(&op, V1_3).unwrap_err();
        assert!(matches!(
            err,
            TransformError::Attribute {
                reason: Rejection::Defined,
                ..
            }
        ));
        // peer 1.4 knows the attribute
        assert!(transformer().transform_operation(&op, V1_4).is_ok());
    }

    #[test]
    fn expression_rejected_before_conversion() {
        let op = Operation::write_attribute(foo(), "segments", ModelValue::expression("${segments:60}"));
        let err = transformer().transform_operation(&op, V1_3).unwrap_err();
        assert!(matches!(
            err,
            TransformError::Attribute {
                reason: Rejection::Expression,
                ..
            }
        ));
    }

    #[test]
    fn undefine_discarded_when_undefined_is_dropped() {
        let op = Operation::undefine_attribute(foo(), "segments");
        assert!(transformer().transform_operation(&op, V1_3).unwrap().is_discarded());
    }

    #[test]
    fn write_renamed_and_converted() {
        let op = Operation::write_attribute(foo(), "segments", ModelValue::Long(12));
        let transformed = transformer().transform_operation(&op, V1_3).unwrap();
        let forwarded = transformed.operation().unwrap();
        assert_eq!(forwarded.attribute_name(), Some("virtual-nodes"));
        assert_eq!(forwarded.parameter(VALUE), Some(&ModelValue::Long(2)));
    }

    #[test]
    fn read_attribute_result_converted_back() {
        let op = Operation::read_attribute(foo(), "segments");
        let transformed = transformer().transform_operation(&op, V1_3).unwrap();
        assert_eq!(
            transformed.operation().unwrap().attribute_name(),
            Some("virtual-nodes")
        );
        assert_eq!(transformed.transform_result(ModelValue::Long(2)), ModelValue::Long(12));
    }

    #[test]
    fn read_of_unknown_attribute_rejected() {
        let t = transformer();
        let read = Operation::read_attribute(foo(), "indexing-properties");
        assert_eq!(
            t.transform_operation(&read, V1_3).unwrap_err(),
            TransformError::Attribute {
                address: foo(),
                attribute: "indexing-properties".into(),
                version: V1_3,
                reason: Rejection::Defined,
            }
        );
        assert!(t.transform_operation(&read, V1_4).is_ok());

        // value rules do not apply to reads
        let read = Operation::read_attribute(foo(), "statistics-enabled");
        let transformed = t.transform_operation(&read, V1_4).unwrap();
        assert_eq!(transformed.operation(), Some(&read));

        let backup = Operation::read_attribute(foo().child("backup", "nyc"), "site");
        assert!(matches!(
            t.transform_operation(&backup, V1_3),
            Err(TransformError::Resource { .. })
        ));
    }

    #[test]
    fn rejected_child_and_operation() {
        let t = transformer();
        let backup = Operation::add(foo().child("backup", "nyc"), Vec::<(String, ModelValue)>::new());
        assert!(matches!(
            t.transform_operation(&backup, V1_3),
            Err(TransformError::Resource { .. })
        ));
        let alias = Operation::custom("add-alias", "/container=bar".parse().unwrap())
            .with_parameter("name", "alias");
        assert!(matches!(
            t.transform_operation(&alias, V1_3),
            Err(TransformError::Operation { .. })
        ));
        assert!(t.transform_operation(&alias, V1_4).is_ok());
    }

    #[test]
    fn resource_tree_transformed() {
        let mut container = Resource::new("/container=bar".parse().unwrap());
        container.insert_child(Resource::with_attributes(
            foo(),
            [
                ("segments".to_string(), ModelValue::Long(60)),
                ("statistics-enabled".to_string(), ModelValue::Boolean(true)),
            ],
        ));
        let pushed = transformer().transform_resource(&container, V1_3).unwrap();
        let cache = pushed.child(&PathElement::new("cache", "foo")).unwrap();
        assert_eq!(cache.attribute("virtual-nodes"), ModelValue::Long(10));
        assert_eq!(cache.attribute("segments"), ModelValue::Undefined);
        assert_eq!(cache.attribute("statistics-enabled"), ModelValue::Undefined);
    }

    #[test]
    fn resource_with_rejected_child_fails() {
        let mut cache = Resource::new(foo());
        cache.insert_child(Resource::new(foo().child("backup", "nyc")));
        let err = transformer().transform_resource(&cache, V1_3).unwrap_err();
        assert_eq!(err.address(), &foo().child("backup", "nyc"));
    }
}
