//! Result transformers
//!
//! A [`ResultTransformer`] maps a response produced by an older peer back
//! into the current form: renamed attributes get their current names and
//! converted values go through the converter's `to_new` side.

use crate::rule::{AttributeAction, Converter};
use crate::table::TransformationTable;
use mgmt_model::{Address, ModelValue, ModelVersion};
use std::collections::BTreeMap;
use std::sync::Arc;

#[derive(Debug, Clone, Default)]
enum ResultKind {
    #[default]
    Identity,
    Attribute {
        converters: Vec<Converter>,
    },
    Resource {
        table: Arc<TransformationTable>,
        address: Address,
        peer: ModelVersion,
    },
}

/// Rewrites a peer response into the current version
#[derive(Debug, Clone, Default)]
pub struct ResultTransformer {
    kind: ResultKind,
}

impl ResultTransformer {
    /// Leave results untouched
    #[inline]
    #[must_use]
    pub fn identity() -> Self {
        Self::default()
    }

    /// Result of a `read-attribute`: undo the value conversions, last first
    #[must_use]
    pub fn attribute(converters: Vec<Converter>) -> Self {
        if converters.is_empty() {
            return Self::identity();
        }
        Self {
            kind: ResultKind::Attribute { converters },
        }
    }

    /// Result of a `read-resource` at `address`
    #[must_use]
    pub fn resource(table: Arc<TransformationTable>, address: Address, peer: ModelVersion) -> Self {
        Self {
            kind: ResultKind::Resource {
                table,
                address,
                peer,
            },
        }
    }

    /// Check if results pass through unchanged
    #[inline]
    #[must_use]
    pub fn is_identity(&self) -> bool {
        matches!(self.kind, ResultKind::Identity)
    }

    /// Rewrite a peer result
    #[must_use]
    pub fn transform(&self, result: ModelValue) -> ModelValue {
        match &self.kind {
            ResultKind::Identity => result,
            ResultKind::Attribute { converters } => converters
                .iter()
                .rev()
                .fold(result, |value, converter| converter.to_new(&value)),
            ResultKind::Resource {
                table,
                address,
                peer,
            } => restore_resource(table, address, result, *peer),
        }
    }
}

fn restore_resource(
    table: &TransformationTable,
    address: &Address,
    value: ModelValue,
    peer: ModelVersion,
) -> ModelValue {
    let ModelValue::Object(fields) = value else {
        return value;
    };
    let mut restored = BTreeMap::new();
    for (field, value) in fields {
        let name = table
            .current_name(address, &field, peer)
            .map_or_else(|| field.clone(), str::to_string);
        let rules = table.rules_for(address, &name, peer);
        let value = if !rules.is_empty() {
            rules
                .iter()
                .rev()
                .fold(value, |value, rule| match rule.action() {
                    AttributeAction::Convert(converter) => converter.to_new(&value),
                    _ => value,
                })
        } else if is_child_map(&value) {
            restore_children(table, address, &field, value, peer)
        } else {
            value
        };
        restored.insert(name, value);
    }
    ModelValue::Object(restored)
}

fn restore_children(
    table: &TransformationTable,
    address: &Address,
    key: &str,
    value: ModelValue,
    peer: ModelVersion,
) -> ModelValue {
    let ModelValue::Object(instances) = value else {
        return value;
    };
    ModelValue::Object(
        instances
            .into_iter()
            .map(|(name, body)| {
                let child = address.child(key, name.clone());
                (name, restore_resource(table, &child, body, peer))
            })
            .collect(),
    )
}

// `read-resource` renders children as `{key: {name: body}}` with object or
// undefined bodies
fn is_child_map(value: &ModelValue) -> bool {
    match value {
        ModelValue::Object(instances) => {
            !instances.is_empty()
                && instances
                    .values()
                    .all(|body| matches!(body, ModelValue::Object(_) | ModelValue::Undefined))
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::range::VersionRange;
    use mgmt_model::{AddressPattern, PathElement};
    use pretty_assertions::assert_eq;

    const V1_3: ModelVersion = ModelVersion::new(1, 3, 0);

    fn table() -> Arc<TransformationTable> {
        let cache = AddressPattern::root()
            .child(PathElement::wildcard("container"))
            .child(PathElement::wildcard("cache"));
        Arc::new(
            TransformationTable::new()
                .attribute(
                    &cache,
                    "segments",
                    VersionRange::up_to(V1_3),
                    AttributeAction::Convert(Converter::scale("segments", 6)),
                )
                .attribute(
                    &cache,
                    "segments",
                    VersionRange::up_to(V1_3),
                    AttributeAction::Rename("virtual-nodes".into()),
                ),
        )
    }

    #[test]
    fn identity_passes_through() {
        let transformer = ResultTransformer::identity();
        assert!(transformer.is_identity());
        assert_eq!(transformer.transform(ModelValue::Long(3)), ModelValue::Long(3));
        assert!(ResultTransformer::attribute(Vec::new()).is_identity());
    }

    #[test]
    fn attribute_result_converted_back() {
        let transformer = ResultTransformer::attribute(vec![Converter::scale("segments", 6)]);
        assert_eq!(transformer.transform(ModelValue::Long(2)), ModelValue::Long(12));
    }

    #[test]
    fn resource_result_renamed_and_converted_recursively() {
        let container: Address = "/container=bar".parse().unwrap();
        let transformer = ResultTransformer::resource(table(), container, V1_3);
        let peer_result = ModelValue::object([
            ("default-cache", ModelValue::from("foo")),
            (
                "cache",
                ModelValue::object([(
                    "foo",
                    ModelValue::object([
                        ("virtual-nodes", ModelValue::Long(2)),
                        ("owners", ModelValue::Long(2)),
                    ]),
                )]),
            ),
        ]);
        let expected = ModelValue::object([
            ("default-cache", ModelValue::from("foo")),
            (
                "cache",
                ModelValue::object([(
                    "foo",
                    ModelValue::object([
                        ("owners", ModelValue::Long(2)),
                        ("segments", ModelValue::Long(12)),
                    ]),
                )]),
            ),
        ]);
        assert_eq!(transformer.transform(peer_result), expected);
    }
}
