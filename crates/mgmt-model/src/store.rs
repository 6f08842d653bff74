//! Model store
//!
//! The [`ModelStore`] owns the one authoritative model tree. Readers take
//! cheap structural snapshots; writers work on a private
//! [`ModelTransaction`] and publish its journal atomically with
//! [`ModelStore::commit`]. Only the operation pipeline opens transactions.

use crate::address::Address;
use crate::error::{ConflictError, ModelError, SchemaError, ValidationError};
use crate::registry::Registry;
use crate::resource::Resource;
use crate::resource_type::ResourceType;
use crate::value::ModelValue;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info};

/// One recorded change to the tree
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelMutation {
    /// A subtree was inserted
    Insert {
        /// Inserted subtree
        resource: Resource,
    },
    /// A subtree was removed
    Remove {
        /// Removed subtree
        resource: Resource,
    },
    /// An attribute changed
    SetAttribute {
        /// Owning resource
        address: Address,
        /// Attribute name
        name: String,
        /// Value before the change
        previous: ModelValue,
        /// Value after the change
        value: ModelValue,
    },
}

impl ModelMutation {
    /// Address the mutation targets
    #[must_use]
    pub fn address(&self) -> &Address {
        match self {
            Self::Insert { resource } | Self::Remove { resource } => resource.address(),
            Self::SetAttribute { address, .. } => address,
        }
    }

    /// Mutation that undoes this one
    #[must_use]
    pub fn inverse(&self) -> Self {
        match self {
            Self::Insert { resource } => Self::Remove {
                resource: resource.clone(),
            },
            Self::Remove { resource } => Self::Insert {
                resource: resource.clone(),
            },
            Self::SetAttribute {
                address,
                name,
                previous,
                value,
            } => Self::SetAttribute {
                address: address.clone(),
                name: name.clone(),
                previous: value.clone(),
                value: previous.clone(),
            },
        }
    }

    /// Apply to a tree
    ///
    /// # Errors
    /// Returns error if the target (or its parent, for inserts) is missing,
    /// or if an inserted resource already exists
    pub fn apply(&self, root: &mut Resource) -> Result<(), ConflictError> {
        match self {
            Self::Insert { resource } => {
                let address = resource.address();
                let parent_address = address
                    .parent()
                    .ok_or_else(|| ConflictError::AlreadyExists(address.clone()))?;
                let parent = root
                    .descendant_mut(parent_address.elements())
                    .ok_or_else(|| ConflictError::ParentNotFound(address.clone()))?;
                if parent.insert_child(resource.clone()) {
                    Ok(())
                } else {
                    Err(ConflictError::AlreadyExists(address.clone()))
                }
            }
            Self::Remove { resource } => {
                let address = resource.address();
                let not_found = || ConflictError::NotFound(address.clone());
                let (parent_address, element) = address
                    .parent()
                    .zip(address.last())
                    .ok_or_else(not_found)?;
                root.descendant_mut(parent_address.elements())
                    .and_then(|parent| parent.remove_child(element))
                    .map(|_| ())
                    .ok_or_else(not_found)
            }
            Self::SetAttribute {
                address,
                name,
                value,
                ..
            } => {
                let target = root
                    .descendant_mut(address.elements())
                    .ok_or_else(|| ConflictError::NotFound(address.clone()))?;
                target.set_attribute(name.clone(), value.clone());
                Ok(())
            }
        }
    }
}

/// Authoritative in-memory model tree
#[derive(Debug, Default)]
pub struct ModelStore {
    root: RwLock<Resource>,
    generation: AtomicU64,
}

impl ModelStore {
    /// Empty store (root resource only)
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store seeded with an existing tree
    #[must_use]
    pub fn with_root(root: Resource) -> Self {
        Self {
            root: RwLock::new(root),
            generation: AtomicU64::new(0),
        }
    }

    /// Structural copy of the whole tree
    ///
    /// Never observes a partially applied commit.
    #[must_use]
    pub fn snapshot(&self) -> Resource {
        self.root.read().clone()
    }

    /// Number of commits published so far
    #[inline]
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Copy of one resource (with its subtree)
    ///
    /// # Errors
    /// Returns `NotFound` if no resource exists at `address`
    pub fn read_resource(&self, address: &Address) -> Result<Resource, ConflictError> {
        self.root
            .read()
            .descendant(address.elements())
            .cloned()
            .ok_or_else(|| ConflictError::NotFound(address.clone()))
    }

    /// Open a transaction on a private working copy
    #[must_use]
    pub fn begin(&self) -> ModelTransaction {
        ModelTransaction {
            working: self.snapshot(),
            journal: Vec::new(),
        }
    }

    /// Publish a transaction
    ///
    /// The journal is replayed onto the current tree (which may include
    /// commits from unrelated subtrees made since `begin`) and swapped in
    /// under the write lock. Either every mutation lands or none does.
    ///
    /// # Errors
    /// Returns error if the journal no longer applies
    pub fn commit(&self, transaction: ModelTransaction) -> Result<u64, ConflictError> {
        if transaction.journal.is_empty() {
            return Ok(self.generation());
        }
        let mut root = self.root.write();
        let mut next = root.clone();
        for mutation in &transaction.journal {
            mutation.apply(&mut next)?;
        }
        *root = next;
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        debug!(
            generation,
            mutations = transaction.journal.len(),
            "model committed"
        );
        Ok(generation)
    }

    /// Serialize the tree for the persistence collaborator
    ///
    /// # Errors
    /// Returns error if serialization fails
    pub fn export_json(&self) -> Result<String, PersistenceError> {
        Ok(serde_json::to_string_pretty(&self.snapshot())?)
    }

    /// Replace the tree with a persisted snapshot
    ///
    /// Every resource is re-resolved against the registry and its
    /// attributes re-normalized, so a restored model obeys the same
    /// invariants as one built by operations.
    ///
    /// # Errors
    /// Returns error if the JSON is malformed or does not fit the schema
    pub fn restore_json(&self, json: &str, registry: &Registry) -> Result<(), PersistenceError> {
        let parsed: Resource = serde_json::from_str(json)?;
        if !parsed.address().is_root() {
            return Err(PersistenceError::Structure(format!(
                "snapshot root has address {}",
                parsed.address()
            )));
        }
        let restored = normalize_tree(&parsed, registry.root())?;
        let count = restored.descendants_post_order().len();
        *self.root.write() = restored;
        self.generation.fetch_add(1, Ordering::AcqRel);
        info!(resources = count, "model restored from snapshot");
        Ok(())
    }
}

fn normalize_tree(resource: &Resource, ty: &ResourceType) -> Result<Resource, PersistenceError> {
    let address = resource.address();
    for name in resource.attributes().keys() {
        if ty.attribute(name).is_none() {
            return Err(ModelError::from(SchemaError::NoSuchAttribute {
                address: address.to_string(),
                attribute: name.clone(),
            })
            .into());
        }
    }

    let attributes = ty
        .attributes()
        .map(|definition| {
            let raw = resource.attributes().get(definition.name());
            definition
                .validate_and_normalize(raw)
                .map(|value| (definition.name().to_string(), value))
        })
        .collect::<Result<Vec<_>, ValidationError>>()
        .map_err(ModelError::from)?;
    let mut out = Resource::with_attributes(address.clone(), attributes);

    for child in resource.children() {
        let element = child.address().last().cloned().ok_or_else(|| {
            PersistenceError::Structure("child resource with root address".to_string())
        })?;
        if address.child(element.key(), element.value()) != *child.address() {
            return Err(PersistenceError::Structure(format!(
                "{} is not a child of {address}",
                child.address()
            )));
        }
        let child_type = ty.resolve_child(&element).ok_or_else(|| {
            ModelError::from(SchemaError::NoSuchResourceType(child.address().to_string()))
        })?;
        out.insert_child(normalize_tree(child, child_type)?);
    }
    Ok(out)
}

/// Private working copy plus the journal of changes made to it
#[derive(Debug, Clone)]
pub struct ModelTransaction {
    working: Resource,
    journal: Vec<ModelMutation>,
}

impl ModelTransaction {
    /// Read from the working copy
    ///
    /// # Errors
    /// Returns `NotFound` if no resource exists at `address`
    pub fn read_resource(&self, address: &Address) -> Result<&Resource, ConflictError> {
        self.working
            .descendant(address.elements())
            .ok_or_else(|| ConflictError::NotFound(address.clone()))
    }

    /// Check if a resource exists in the working copy
    #[must_use]
    pub fn exists(&self, address: &Address) -> bool {
        self.working.descendant(address.elements()).is_some()
    }

    /// Insert a new resource
    ///
    /// # Errors
    /// Returns `ParentNotFound` or `AlreadyExists`
    pub fn create_resource(&mut self, resource: Resource) -> Result<(), ConflictError> {
        let address = resource.address().clone();
        if self.exists(&address) {
            return Err(ConflictError::AlreadyExists(address));
        }
        self.record(ModelMutation::Insert { resource })
    }

    /// Remove a resource and its whole subtree, returning the subtree
    ///
    /// # Errors
    /// Returns `NotFound` if the resource does not exist
    pub fn remove_resource(&mut self, address: &Address) -> Result<Resource, ConflictError> {
        let resource = self.read_resource(address)?.clone();
        if address.is_root() {
            return Err(ConflictError::NotFound(address.clone()));
        }
        self.record(ModelMutation::Remove {
            resource: resource.clone(),
        })?;
        Ok(resource)
    }

    /// Set one attribute (undefined clears it), returning the previous value
    ///
    /// Values are stored as given; callers validate them first.
    ///
    /// # Errors
    /// Returns `NotFound` if the resource does not exist
    pub fn update_attribute(
        &mut self,
        address: &Address,
        name: &str,
        value: ModelValue,
    ) -> Result<ModelValue, ConflictError> {
        let previous = self.read_resource(address)?.attribute(name);
        if previous == value {
            return Ok(previous);
        }
        self.record(ModelMutation::SetAttribute {
            address: address.clone(),
            name: name.to_string(),
            previous: previous.clone(),
            value,
        })?;
        Ok(previous)
    }

    fn record(&mut self, mutation: ModelMutation) -> Result<(), ConflictError> {
        mutation.apply(&mut self.working)?;
        self.journal.push(mutation);
        Ok(())
    }

    /// Changes recorded so far, in order
    #[inline]
    #[must_use]
    pub fn journal(&self) -> &[ModelMutation] {
        &self.journal
    }

    /// Working copy, including uncommitted changes
    #[inline]
    #[must_use]
    pub fn working(&self) -> &Resource {
        &self.working
    }

    /// Undo every change by replaying inverses in reverse order
    ///
    /// Returns the working copy as it was at `begin`.
    ///
    /// # Errors
    /// Returns error if an inverse no longer applies
    pub fn rollback(mut self) -> Result<Resource, ConflictError> {
        while let Some(mutation) = self.journal.pop() {
            mutation.inverse().apply(&mut self.working)?;
        }
        Ok(self.working)
    }
}

/// Errors loading or saving a persisted snapshot
#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    /// JSON encode/decode failed
    #[error("snapshot encoding error: {0}")]
    Json(#[from] serde_json::Error),

    /// Snapshot does not fit the schema
    #[error("snapshot does not fit the schema: {0}")]
    Model(#[from] ModelError),

    /// Snapshot tree is malformed
    #[error("malformed snapshot: {0}")]
    Structure(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::PathElement;
    use crate::attribute::{AttributeDefinition, ValueType};
    use crate::version::ModelVersion;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    fn addr(s: &str) -> Address {
        s.parse().unwrap()
    }

    fn seeded() -> ModelStore {
        let store = ModelStore::new();
        let mut tx = store.begin();
        tx.create_resource(Resource::new(addr("/container=bar")))
            .unwrap();
        store.commit(tx).unwrap();
        store
    }

    #[test]
    fn create_requires_parent() {
        let store = ModelStore::new();
        let mut tx = store.begin();
        let err = tx
            .create_resource(Resource::new(addr("/container=bar/cache=foo")))
            .unwrap_err();
        assert_eq!(err, ConflictError::ParentNotFound(addr("/container=bar/cache=foo")));
    }

    #[test]
    fn create_rejects_duplicate() {
        let store = seeded();
        let mut tx = store.begin();
        let err = tx
            .create_resource(Resource::new(addr("/container=bar")))
            .unwrap_err();
        assert_eq!(err, ConflictError::AlreadyExists(addr("/container=bar")));
    }

    #[test]
    fn uncommitted_changes_invisible() {
        let store = seeded();
        let mut tx = store.begin();
        tx.create_resource(Resource::new(addr("/container=bar/cache=foo")))
            .unwrap();
        assert!(tx.exists(&addr("/container=bar/cache=foo")));
        assert!(store
            .read_resource(&addr("/container=bar/cache=foo"))
            .is_err());
        store.commit(tx).unwrap();
        assert!(store
            .read_resource(&addr("/container=bar/cache=foo"))
            .is_ok());
    }

    #[test]
    fn remove_cascades() {
        let store = seeded();
        let mut tx = store.begin();
        tx.create_resource(Resource::new(addr("/container=bar/cache=foo")))
            .unwrap();
        store.commit(tx).unwrap();

        let mut tx = store.begin();
        let removed = tx.remove_resource(&addr("/container=bar")).unwrap();
        assert_eq!(removed.descendants_post_order().len(), 2);
        store.commit(tx).unwrap();
        assert_eq!(store.snapshot(), Resource::new(Address::root()));
    }

    #[test]
    fn remove_missing_is_not_found() {
        let store = seeded();
        let before = store.snapshot();
        let mut tx = store.begin();
        let err = tx.remove_resource(&addr("/container=nope")).unwrap_err();
        assert_eq!(err, ConflictError::NotFound(addr("/container=nope")));
        assert_eq!(store.snapshot(), before);
    }

    #[test]
    fn update_returns_previous() {
        let store = seeded();
        let mut tx = store.begin();
        let bar = addr("/container=bar");
        assert_eq!(
            tx.update_attribute(&bar, "default-cache", "foo".into()).unwrap(),
            ModelValue::Undefined
        );
        assert_eq!(
            tx.update_attribute(&bar, "default-cache", "qux".into()).unwrap(),
            ModelValue::from("foo")
        );
        assert_eq!(tx.journal().len(), 2);
    }

    #[test]
    fn rollback_restores_begin_state() {
        let store = seeded();
        let before = store.snapshot();
        let mut tx = store.begin();
        tx.create_resource(Resource::new(addr("/container=bar/cache=foo")))
            .unwrap();
        tx.update_attribute(&addr("/container=bar"), "x", ModelValue::Long(1))
            .unwrap();
        tx.remove_resource(&addr("/container=bar")).unwrap();
        assert_eq!(tx.rollback().unwrap(), before);
    }

    #[test]
    fn commits_on_disjoint_subtrees_merge() {
        let store = seeded();
        let mut a = store.begin();
        let mut b = store.begin();
        a.create_resource(Resource::new(addr("/container=bar/cache=a")))
            .unwrap();
        b.create_resource(Resource::new(addr("/container=baz")))
            .unwrap();
        store.commit(a).unwrap();
        store.commit(b).unwrap();
        let snapshot = store.snapshot();
        assert!(snapshot
            .descendant(addr("/container=bar/cache=a").elements())
            .is_some());
        assert!(snapshot.descendant(addr("/container=baz").elements()).is_some());
        assert_eq!(store.generation(), 3);
    }

    fn registry() -> Registry {
        let container = ResourceType::builder(PathElement::wildcard("container"))
            .attribute(
                AttributeDefinition::builder("statistics-enabled", ValueType::Boolean)
                    .default_value(false)
                    .build()
                    .unwrap(),
            )
            .build()
            .unwrap();
        let root = ResourceType::root_builder().child(container).build().unwrap();
        Registry::new(root, ModelVersion::new(1, 0, 0))
    }

    #[test]
    fn export_restore_round_trip() {
        let store = seeded();
        let json = store.export_json().unwrap();
        let restored = ModelStore::new();
        restored.restore_json(&json, &registry()).unwrap();

        let container = restored.read_resource(&addr("/container=bar")).unwrap();
        assert_eq!(
            container.attribute("statistics-enabled"),
            ModelValue::Boolean(false)
        );
    }

    #[test]
    fn restore_rejects_unknown_type() {
        let json = r#"{"address":"/","children":{"bogus":{"x":{"address":"/bogus=x"}}}}"#;
        let err = ModelStore::new().restore_json(json, &registry()).unwrap_err();
        assert!(matches!(
            err,
            PersistenceError::Model(ModelError::Schema(SchemaError::NoSuchResourceType(_)))
        ));
    }

    proptest! {
        #[test]
        fn prop_add_then_remove_restores_snapshot(
            names in proptest::collection::btree_set("[a-z]{1,6}", 1..6),
            value in any::<i64>(),
        ) {
            let store = seeded();
            let before = store.snapshot();
            for name in &names {
                let mut tx = store.begin();
                let address = addr("/container=bar").child("cache", name.clone());
                tx.create_resource(Resource::with_attributes(
                    address,
                    [("max-entries".to_string(), ModelValue::Long(value))],
                ))
                .unwrap();
                store.commit(tx).unwrap();
            }
            for name in &names {
                let mut tx = store.begin();
                tx.remove_resource(&addr("/container=bar").child("cache", name.clone()))
                    .unwrap();
                store.commit(tx).unwrap();
            }
            prop_assert_eq!(store.snapshot(), before);
        }
    }
}
