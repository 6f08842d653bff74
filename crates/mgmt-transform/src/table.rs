//! Transformation tables
//!
//! A [`TransformationTable`] is plain data: attribute rules, rejected child
//! types and rejected operations. Supporting another historical version
//! means adding rows, never code.

use crate::range::VersionRange;
use crate::rule::{AttributeAction, AttributeRule, ChildRejection, OperationRejection};
use mgmt_model::{Address, AddressPattern, ModelVersion};

/// Rule table for one schema
#[derive(Debug, Clone, Default)]
pub struct TransformationTable {
    rules: Vec<AttributeRule>,
    rejected_children: Vec<ChildRejection>,
    rejected_operations: Vec<OperationRejection>,
}

impl TransformationTable {
    /// Empty table
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an attribute rule
    #[must_use]
    pub fn attribute(
        mut self,
        pattern: &AddressPattern,
        attribute: &str,
        versions: VersionRange,
        action: AttributeAction,
    ) -> Self {
        self.push(AttributeRule::new(pattern.clone(), attribute, versions, action));
        self
    }

    /// Apply the same action to several attributes
    #[must_use]
    pub fn attributes(
        mut self,
        pattern: &AddressPattern,
        attributes: &[&str],
        versions: VersionRange,
        action: &AttributeAction,
    ) -> Self {
        for attribute in attributes {
            self.push(AttributeRule::new(
                pattern.clone(),
                *attribute,
                versions,
                action.clone(),
            ));
        }
        self
    }

    /// Reject a child type under `parent`
    #[must_use]
    pub fn reject_child(mut self, parent: &AddressPattern, key: &str, versions: VersionRange) -> Self {
        self.rejected_children.push(ChildRejection {
            parent: parent.clone(),
            key: key.to_string(),
            versions,
        });
        self
    }

    /// Reject a custom operation on `pattern`
    #[must_use]
    pub fn reject_operation(
        mut self,
        pattern: &AddressPattern,
        operation: &str,
        versions: VersionRange,
    ) -> Self {
        self.rejected_operations.push(OperationRejection {
            pattern: pattern.clone(),
            operation: operation.to_string(),
            versions,
        });
        self
    }

    /// Append every row of another table
    #[must_use]
    pub fn merge(mut self, other: Self) -> Self {
        self.rules.extend(other.rules);
        self.rejected_children.extend(other.rejected_children);
        self.rejected_operations.extend(other.rejected_operations);
        self
    }

    /// Add a rule in place
    pub fn push(&mut self, rule: AttributeRule) {
        self.rules.push(rule);
    }

    /// Number of attribute rules
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// Check if the table has no rows at all
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
            && self.rejected_children.is_empty()
            && self.rejected_operations.is_empty()
    }

    /// Rules for one attribute, in chaining order
    ///
    /// Sorting is stable, so rules of the same phase keep table order.
    #[must_use]
    pub fn rules_for(
        &self,
        address: &Address,
        attribute: &str,
        peer: ModelVersion,
    ) -> Vec<&AttributeRule> {
        let mut rules: Vec<&AttributeRule> = self
            .rules
            .iter()
            .filter(|rule| rule.attribute() == attribute && rule.applies(address, peer))
            .collect();
        rules.sort_by_key(|rule| rule.action().phase());
        rules
    }

    /// Current name of an attribute the peer calls `peer_name`
    #[must_use]
    pub fn current_name<'a>(
        &'a self,
        address: &Address,
        peer_name: &str,
        peer: ModelVersion,
    ) -> Option<&'a str> {
        self.rules
            .iter()
            .filter(|rule| rule.applies(address, peer))
            .find_map(|rule| match rule.action() {
                AttributeAction::Rename(old) if old == peer_name => Some(rule.attribute()),
                _ => None,
            })
    }

    /// Shortest prefix of `address` whose last element is a rejected child
    #[must_use]
    pub fn rejected_child(&self, address: &Address, peer: ModelVersion) -> Option<Address> {
        let elements = address.elements();
        (1..=elements.len()).find_map(|depth| {
            let parent = Address::new(elements[..depth - 1].to_vec()).ok()?;
            let key = elements[depth - 1].key();
            let rejected = self.rejected_children.iter().any(|rejection| {
                rejection.key == key
                    && rejection.versions.contains(peer)
                    && rejection.parent.matches(&parent)
            });
            if rejected {
                Address::new(elements[..depth].to_vec()).ok()
            } else {
                None
            }
        })
    }

    /// Check if the peer lacks a custom operation
    #[must_use]
    pub fn rejects_operation(&self, address: &Address, operation: &str, peer: ModelVersion) -> bool {
        self.rejected_operations.iter().any(|rejection| {
            rejection.operation == operation
                && rejection.versions.contains(peer)
                && rejection.pattern.matches(address)
        })
    }
}
