//! Service dependency graph
//!
//! Tracks every installed unit, its handle and the units it depends on.
//! Edges point from a dependency to its dependent, so a topological order is
//! a valid start order.

use crate::error::{RuntimeError, RuntimeResult};
use crate::unit::{UnitHandle, UnitName, UnitSpec};
use mgmt_model::ModelValue;
use parking_lot::RwLock;
use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;
use petgraph::visit::Dfs;
use petgraph::Direction;
use std::collections::{BTreeMap, HashMap, HashSet};

/// Installed unit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstalledUnit {
    /// Spec the unit was installed (or last updated) with
    pub spec: UnitSpec,
    /// Collaborator handle
    pub handle: UnitHandle,
}

#[derive(Debug, Default)]
struct GraphState {
    graph: DiGraphMap<u32, ()>,
    ids: HashMap<UnitName, u32>,
    units: HashMap<u32, InstalledUnit>,
    next_id: u32,
}

impl GraphState {
    fn id(&self, name: &UnitName) -> RuntimeResult<u32> {
        self.ids
            .get(name)
            .copied()
            .ok_or_else(|| RuntimeError::NotInstalled(name.clone()))
    }

    fn name(&self, id: u32) -> Option<&UnitName> {
        self.units.get(&id).map(|unit| &unit.spec.name)
    }

    fn forget(&mut self, id: u32, name: &UnitName) -> RuntimeResult<InstalledUnit> {
        self.graph.remove_node(id);
        self.ids.remove(name);
        self.units
            .remove(&id)
            .ok_or_else(|| RuntimeError::NotInstalled(name.clone()))
    }
}

/// Live service graph
#[derive(Debug, Default)]
pub struct ServiceGraph {
    inner: RwLock<GraphState>,
}

impl ServiceGraph {
    /// Empty graph
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of installed units
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.read().units.len()
    }

    /// Check if nothing is installed
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.read().units.is_empty()
    }

    /// Check if a unit is installed
    #[must_use]
    pub fn contains(&self, name: &UnitName) -> bool {
        self.inner.read().ids.contains_key(name)
    }

    /// Copy of an installed unit
    #[must_use]
    pub fn get(&self, name: &UnitName) -> Option<InstalledUnit> {
        let state = self.inner.read();
        let id = state.ids.get(name)?;
        state.units.get(id).cloned()
    }

    /// Installed unit names, sorted
    #[must_use]
    pub fn names(&self) -> Vec<UnitName> {
        let mut names: Vec<UnitName> = self.inner.read().ids.keys().cloned().collect();
        names.sort();
        names
    }

    /// Record an installed unit
    ///
    /// # Errors
    /// - `AlreadyInstalled` if the name is taken
    /// - `MissingDependency` if a dependency is not installed
    /// - `CycleDetected` if the edges would close a cycle
    pub fn insert(&self, spec: UnitSpec, handle: UnitHandle) -> RuntimeResult<()> {
        let mut state = self.inner.write();
        if state.ids.contains_key(&spec.name) {
            return Err(RuntimeError::AlreadyInstalled(spec.name));
        }
        let mut dependency_ids = Vec::with_capacity(spec.depends_on.len());
        for dependency in &spec.depends_on {
            let id = state
                .ids
                .get(dependency)
                .copied()
                .ok_or_else(|| RuntimeError::MissingDependency {
                    unit: spec.name.clone(),
                    dependency: dependency.clone(),
                })?;
            dependency_ids.push(id);
        }

        let id = state.next_id;
        state.next_id += 1;
        state.graph.add_node(id);
        for dependency in dependency_ids {
            state.graph.add_edge(dependency, id, ());
        }
        // a reinstalled unit picks up dependents that outlived it
        let waiting: Vec<u32> = state
            .units
            .iter()
            .filter(|(_, unit)| unit.spec.depends_on.contains(&spec.name))
            .map(|(other, _)| *other)
            .collect();
        for dependent in waiting {
            state.graph.add_edge(id, dependent, ());
        }
        if petgraph::algo::is_cyclic_directed(&state.graph) {
            state.graph.remove_node(id);
            return Err(RuntimeError::CycleDetected(spec.name));
        }
        state.ids.insert(spec.name.clone(), id);
        state.units.insert(id, InstalledUnit { spec, handle });
        Ok(())
    }

    /// Forget an installed unit, returning it
    ///
    /// # Errors
    /// - `NotInstalled` if the unit is unknown
    /// - `StillRequired` if an installed unit depends on it
    pub fn remove(&self, name: &UnitName) -> RuntimeResult<InstalledUnit> {
        let mut state = self.inner.write();
        let id = state.id(name)?;
        let dependent = state
            .graph
            .neighbors_directed(id, Direction::Outgoing)
            .find_map(|n| state.name(n).cloned());
        if let Some(dependent) = dependent {
            return Err(RuntimeError::StillRequired {
                unit: name.clone(),
                dependent,
            });
        }
        state.forget(id, name)
    }

    /// Forget a unit that is about to be reinstalled under the same name
    ///
    /// Its dependents stay recorded and are linked again by [`Self::insert`].
    ///
    /// # Errors
    /// Returns `NotInstalled` if the unit is unknown
    pub fn detach(&self, name: &UnitName) -> RuntimeResult<InstalledUnit> {
        let mut state = self.inner.write();
        let id = state.id(name)?;
        state.forget(id, name)
    }

    /// Merge pushed values into the recorded spec, returning the old values
    /// of the touched keys
    ///
    /// # Errors
    /// Returns `NotInstalled` if the unit is unknown
    pub fn update_values(
        &self,
        name: &UnitName,
        values: &BTreeMap<String, ModelValue>,
    ) -> RuntimeResult<BTreeMap<String, ModelValue>> {
        let mut state = self.inner.write();
        let id = state.id(name)?;
        let unit = state
            .units
            .get_mut(&id)
            .ok_or_else(|| RuntimeError::NotInstalled(name.clone()))?;
        let mut previous = BTreeMap::new();
        for (key, value) in values {
            let old = if value.is_defined() {
                unit.spec.values.insert(key.clone(), value.clone())
            } else {
                unit.spec.values.remove(key)
            };
            previous.insert(key.clone(), old.unwrap_or_default());
        }
        Ok(previous)
    }

    /// Units depending directly on `name`
    #[must_use]
    pub fn dependents(&self, name: &UnitName) -> Vec<UnitName> {
        let state = self.inner.read();
        let Ok(id) = state.id(name) else {
            return Vec::new();
        };
        let mut out: Vec<UnitName> = state
            .graph
            .neighbors_directed(id, Direction::Outgoing)
            .filter_map(|n| state.name(n).cloned())
            .collect();
        out.sort();
        out
    }

    /// Every unit depending on `name` directly or transitively, deepest first
    ///
    /// Uninstalling in this order never stops a unit before its dependents.
    #[must_use]
    pub fn transitive_dependents(&self, name: &UnitName) -> Vec<UnitName> {
        let state = self.inner.read();
        let Ok(start) = state.id(name) else {
            return Vec::new();
        };

        let mut reachable = HashSet::new();
        let mut dfs = Dfs::new(&state.graph, start);
        while let Some(node) = dfs.next(&state.graph) {
            if node != start {
                reachable.insert(node);
            }
        }

        let order = toposort(&state.graph, None).unwrap_or_default();
        order
            .into_iter()
            .rev()
            .filter(|node| reachable.contains(node))
            .filter_map(|node| state.name(node).cloned())
            .collect()
    }

    /// Every installed unit in start order
    ///
    /// # Errors
    /// Returns `CycleDetected` if the graph is cyclic
    pub fn start_order(&self) -> RuntimeResult<Vec<UnitName>> {
        let state = self.inner.read();
        let order = toposort(&state.graph, None).map_err(|cycle| {
            RuntimeError::CycleDetected(
                state
                    .name(cycle.node_id())
                    .cloned()
                    .unwrap_or_else(|| UnitName::from_address(&mgmt_model::Address::root())),
            )
        })?;
        Ok(order
            .into_iter()
            .filter_map(|node| state.name(node).cloned())
            .collect())
    }
}
