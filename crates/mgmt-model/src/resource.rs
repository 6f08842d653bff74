//! Resource instances
//!
//! A [`Resource`] is one node of the model tree. Attribute and child maps are
//! persistent [`im::OrdMap`]s, so cloning a tree is cheap and clones share
//! every untouched subtree.

use crate::address::{Address, PathElement};
use crate::resource_type::ResourceType;
use crate::value::ModelValue;
use im::OrdMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Instance names of one child type
pub type Instances = OrdMap<String, Resource>;

/// Node of the model tree
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Resource {
    address: Address,
    #[serde(default, skip_serializing_if = "OrdMap::is_empty")]
    attributes: OrdMap<String, ModelValue>,
    #[serde(default, skip_serializing_if = "OrdMap::is_empty")]
    children: OrdMap<String, Instances>,
}

impl Resource {
    /// Empty resource at `address`
    #[must_use]
    pub fn new(address: Address) -> Self {
        Self {
            address,
            attributes: OrdMap::new(),
            children: OrdMap::new(),
        }
    }

    /// Resource with initial attributes; undefined values are dropped
    #[must_use]
    pub fn with_attributes(
        address: Address,
        attributes: impl IntoIterator<Item = (String, ModelValue)>,
    ) -> Self {
        let mut resource = Self::new(address);
        for (name, value) in attributes {
            resource.set_attribute(name, value);
        }
        resource
    }

    /// Address
    #[inline]
    #[must_use]
    pub fn address(&self) -> &Address {
        &self.address
    }

    /// Defined attributes
    #[inline]
    #[must_use]
    pub fn attributes(&self) -> &OrdMap<String, ModelValue> {
        &self.attributes
    }

    /// One attribute (undefined if absent)
    #[inline]
    #[must_use]
    pub fn attribute(&self, name: &str) -> ModelValue {
        self.attributes.get(name).cloned().unwrap_or_default()
    }

    /// Child type keys that have at least one instance
    pub fn child_types(&self) -> impl Iterator<Item = &str> {
        self.children.keys().map(String::as_str)
    }

    /// Instances of one child type
    #[must_use]
    pub fn children_of(&self, key: &str) -> Option<&Instances> {
        self.children.get(key)
    }

    /// Every direct child
    pub fn children(&self) -> impl Iterator<Item = &Resource> {
        self.children.values().flat_map(|instances| instances.values())
    }

    /// Check for any child
    #[inline]
    #[must_use]
    pub fn has_children(&self) -> bool {
        !self.children.is_empty()
    }

    /// Direct child by element
    #[must_use]
    pub fn child(&self, element: &PathElement) -> Option<&Resource> {
        self.children
            .get(element.key())
            .and_then(|instances| instances.get(element.value()))
    }

    /// Descendant by relative path
    #[must_use]
    pub fn descendant(&self, path: &[PathElement]) -> Option<&Resource> {
        path.iter()
            .try_fold(self, |node, element| node.child(element))
    }

    pub(crate) fn descendant_mut(&mut self, path: &[PathElement]) -> Option<&mut Resource> {
        let mut node = self;
        for element in path {
            node = node
                .children
                .get_mut(element.key())?
                .get_mut(element.value())?;
        }
        Some(node)
    }

    /// Set (or, for undefined, clear) an attribute, returning the previous value
    pub(crate) fn set_attribute(&mut self, name: String, value: ModelValue) -> ModelValue {
        let previous = if value.is_defined() {
            self.attributes.insert(name, value)
        } else {
            self.attributes.remove(&name)
        };
        previous.unwrap_or_default()
    }

    /// Insert a direct child, returning `false` if one already exists
    pub fn insert_child(&mut self, child: Resource) -> bool {
        let Some(element) = child.address.last().cloned() else {
            return false;
        };
        let instances = self
            .children
            .entry(element.key().to_string())
            .or_insert_with(OrdMap::new);
        if instances.contains_key(element.value()) {
            return false;
        }
        instances.insert(element.value().to_string(), child);
        true
    }

    /// Remove a direct child, pruning the type map when it empties
    pub(crate) fn remove_child(&mut self, element: &PathElement) -> Option<Resource> {
        let instances = self.children.get_mut(element.key())?;
        let removed = instances.remove(element.value());
        if instances.is_empty() {
            self.children.remove(element.key());
        }
        removed
    }

    /// This resource and every descendant, children before parents
    #[must_use]
    pub fn descendants_post_order(&self) -> Vec<&Resource> {
        let mut out = Vec::new();
        self.collect_post_order(&mut out);
        out
    }

    fn collect_post_order<'a>(&'a self, out: &mut Vec<&'a Resource>) {
        for child in self.children() {
            child.collect_post_order(out);
        }
        out.push(self);
    }

    /// Render as a value (for `read-resource`)
    ///
    /// Without `include_defaults`, attributes equal to their declared default
    /// are left out. Without `recursive`, child instances are listed by name
    /// with undefined bodies.
    #[must_use]
    pub fn to_model_value(
        &self,
        ty: &ResourceType,
        recursive: bool,
        include_defaults: bool,
    ) -> ModelValue {
        let mut fields = BTreeMap::new();
        for definition in ty.attributes() {
            let value = self.attribute(definition.name());
            if !include_defaults && definition.is_default(&value) {
                continue;
            }
            fields.insert(definition.name().to_string(), value);
        }

        for child_type in ty.children() {
            let Some(key) = child_type.element().map(PathElement::key) else {
                continue;
            };
            fields
                .entry(key.to_string())
                .or_insert(ModelValue::Undefined);
        }

        for (key, instances) in &self.children {
            let mut rendered = BTreeMap::new();
            for (name, child) in instances {
                let child_type = ty.resolve_child(&PathElement::new(key.clone(), name.clone()));
                let body = match child_type {
                    Some(child_type) if recursive => {
                        child.to_model_value(child_type, true, include_defaults)
                    }
                    _ => ModelValue::Undefined,
                };
                rendered.insert(name.clone(), body);
            }
            fields.insert(key.clone(), ModelValue::Object(rendered));
        }

        ModelValue::Object(fields)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attribute::{AttributeDefinition, ValueType};

    fn addr(s: &str) -> Address {
        s.parse().unwrap()
    }

    fn tree() -> Resource {
        let mut root = Resource::new(Address::root());
        let mut container = Resource::new(addr("/container=bar"));
        container.insert_child(Resource::with_attributes(
            addr("/container=bar/cache=foo"),
            [("max-entries".to_string(), ModelValue::Long(1000))],
        ));
        container.insert_child(Resource::new(addr("/container=bar/cache=qux")));
        root.insert_child(container);
        root
    }

    #[test]
    fn lookup_by_path() {
        let root = tree();
        let cache = root
            .descendant(addr("/container=bar/cache=foo").elements())
            .unwrap();
        assert_eq!(cache.attribute("max-entries"), ModelValue::Long(1000));
        assert_eq!(cache.attribute("missing"), ModelValue::Undefined);
        assert!(root
            .descendant(addr("/container=bar/cache=nope").elements())
            .is_none());
    }

    #[test]
    fn duplicate_insert_rejected() {
        let mut root = tree();
        let container = root
            .descendant_mut(addr("/container=bar").elements())
            .unwrap();
        assert!(!container.insert_child(Resource::new(addr("/container=bar/cache=foo"))));
    }

    #[test]
    fn removing_last_instance_prunes_type() {
        let mut root = Resource::new(Address::root());
        root.insert_child(Resource::new(addr("/container=bar")));
        assert!(root.has_children());
        root.remove_child(&PathElement::new("container", "bar"));
        assert!(!root.has_children());
        assert_eq!(root, Resource::new(Address::root()));
    }

    #[test]
    fn undefined_attribute_clears() {
        let mut r = Resource::new(Address::root());
        assert_eq!(r.set_attribute("a".into(), ModelValue::Long(1)), ModelValue::Undefined);
        assert_eq!(r.set_attribute("a".into(), ModelValue::Undefined), ModelValue::Long(1));
        assert!(r.attributes().is_empty());
    }

    #[test]
    fn post_order_visits_children_first() {
        let root = tree();
        let order: Vec<String> = root
            .descendants_post_order()
            .into_iter()
            .map(|r| r.address().to_string())
            .collect();
        assert_eq!(
            order,
            vec![
                "/container=bar/cache=foo",
                "/container=bar/cache=qux",
                "/container=bar",
                "/",
            ]
        );
    }

    #[test]
    fn render_respects_defaults() {
        let ty = ResourceType::builder(PathElement::wildcard("cache"))
            .attribute(
                AttributeDefinition::builder("max-entries", ValueType::Long)
                    .default_value(-1_i64)
                    .build()
                    .unwrap(),
            )
            .build()
            .unwrap();
        let r = Resource::with_attributes(
            addr("/cache=a"),
            [("max-entries".to_string(), ModelValue::Long(-1))],
        );
        assert_eq!(
            r.to_model_value(&ty, false, true).get("max-entries"),
            Some(&ModelValue::Long(-1))
        );
        assert_eq!(r.to_model_value(&ty, false, false).get("max-entries"), None);
    }
}
