//! Runtime reconciler
//!
//! Turns committed model changes into a [`ReconciliationPlan`], executes it
//! against the [`LiveUnitProvider`] and can revert whatever it applied.
//!
//! # Strategy selection
//!
//! | Change                         | Actions                                               |
//! |--------------------------------|-------------------------------------------------------|
//! | resource added                 | install, dependencies from parent and references      |
//! | attributes changed, all NONE   | live update                                           |
//! | RESOURCE_SERVICES              | uninstall then reinstall the unit                     |
//! | ALL_SERVICES                   | same, plus every transitive dependent                 |
//! | resource removed               | uninstall dependents (deepest first), then the unit   |
//!
//! Plans whose unit sets intersect are serialized through per-unit locks;
//! unrelated plans run concurrently. [`Reconciler::plan_locked`] computes the
//! plan while holding the locks of every unit it touches, so the dependents
//! it restarts are the ones installed when it runs.

use crate::error::{RuntimeError, RuntimeResult};
use crate::graph::{InstalledUnit, ServiceGraph};
use crate::plan::{ChangeKind, ModelChange, PlanAction, PlanStrategy, ReconciliationPlan};
use crate::provider::LiveUnitProvider;
use crate::unit::{UnitHandle, UnitMode, UnitName, UnitSpec};
use dashmap::DashMap;
use indexmap::IndexMap;
use mgmt_model::{
    Address, ExpressionResolver, ModelValue, Registry, Resource, ResourceType, RestartImpact,
    RuntimeBinding,
};
use petgraph::graphmap::DiGraphMap;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info, warn};

/// One action that reached the live graph
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppliedAction {
    /// Unit installed
    Installed {
        /// Unit name
        unit: UnitName,
        /// Issued handle
        handle: UnitHandle,
    },
    /// Unit uninstalled
    Uninstalled {
        /// Unit as it was before removal
        unit: InstalledUnit,
    },
    /// Values pushed
    Updated {
        /// Unit name
        unit: UnitName,
        /// Values of the touched keys before the push
        previous: BTreeMap<String, ModelValue>,
    },
}

impl AppliedAction {
    fn unit(&self) -> &UnitName {
        match self {
            Self::Installed { unit, .. } | Self::Updated { unit, .. } => unit,
            Self::Uninstalled { unit } => &unit.spec.name,
        }
    }
}

/// Journal of applied actions, used for verification and revert
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AppliedPlan {
    actions: Vec<AppliedAction>,
}

impl AppliedPlan {
    /// Applied actions in order
    #[inline]
    #[must_use]
    pub fn actions(&self) -> &[AppliedAction] {
        &self.actions
    }

    /// Check if nothing was applied
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    fn units(&self) -> BTreeSet<UnitName> {
        self.actions.iter().map(|a| a.unit().clone()).collect()
    }
}

/// Plan execution stopped part way
#[derive(Debug, thiserror::Error)]
#[error("{error}")]
pub struct ExecutionFailure {
    /// What went wrong
    #[source]
    pub error: RuntimeError,
    /// What had been applied before the failure
    pub applied: AppliedPlan,
}

/// Shared record of applied actions
///
/// Lets a caller that abandons an execution (timeout, cancellation) still
/// revert whatever reached the live graph.
#[derive(Debug, Default)]
pub struct AppliedJournal {
    inner: parking_lot::Mutex<AppliedPlan>,
}

impl AppliedJournal {
    /// Empty journal
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of the actions recorded so far
    #[must_use]
    pub fn snapshot(&self) -> AppliedPlan {
        self.inner.lock().clone()
    }

    /// Take the recorded actions, leaving the journal empty
    #[must_use]
    pub fn take(&self) -> AppliedPlan {
        std::mem::take(&mut *self.inner.lock())
    }

    /// Number of recorded actions
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().actions.len()
    }

    /// Check if nothing was recorded
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.lock().actions.is_empty()
    }

    fn record(&self, action: AppliedAction) {
        self.inner.lock().actions.push(action);
    }
}

/// Held per-unit locks
///
/// Released on drop.
pub struct UnitLocks {
    units: BTreeSet<UnitName>,
    _guards: Vec<OwnedMutexGuard<()>>,
}

impl UnitLocks {
    /// Locked unit names
    #[inline]
    #[must_use]
    pub fn units(&self) -> &BTreeSet<UnitName> {
        &self.units
    }

    fn covers(&self, plan: &ReconciliationPlan) -> bool {
        plan.units().is_subset(&self.units)
    }
}

impl std::fmt::Debug for UnitLocks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnitLocks").field("units", &self.units).finish()
    }
}

/// Plan computed under the locks of every unit it touches
#[derive(Debug)]
pub struct LockedPlan {
    plan: ReconciliationPlan,
    locks: UnitLocks,
}

impl LockedPlan {
    /// The plan
    #[inline]
    #[must_use]
    pub fn plan(&self) -> &ReconciliationPlan {
        &self.plan
    }

    /// Split into the plan and its locks
    #[must_use]
    pub fn into_parts(self) -> (ReconciliationPlan, UnitLocks) {
        (self.plan, self.locks)
    }
}

enum Intent {
    Install(Address),
    Remove(Address),
}

/// Diffs model changes against the live graph and applies the result
pub struct Reconciler {
    registry: Arc<Registry>,
    graph: Arc<ServiceGraph>,
    provider: Arc<dyn LiveUnitProvider>,
    resolver: ExpressionResolver,
    locks: DashMap<UnitName, Arc<Mutex<()>>>,
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("units", &self.graph.len())
            .field("locks", &self.locks.len())
            .finish_non_exhaustive()
    }
}

impl Reconciler {
    /// Create reconciler over an empty graph
    #[must_use]
    pub fn new(registry: Arc<Registry>, provider: Arc<dyn LiveUnitProvider>) -> Self {
        Self {
            registry,
            graph: Arc::new(ServiceGraph::new()),
            provider,
            resolver: ExpressionResolver::new(),
            locks: DashMap::new(),
        }
    }

    /// Use a specific expression resolver
    #[must_use]
    pub fn with_resolver(mut self, resolver: ExpressionResolver) -> Self {
        self.resolver = resolver;
        self
    }

    /// Live service graph
    #[inline]
    #[must_use]
    pub fn graph(&self) -> &Arc<ServiceGraph> {
        &self.graph
    }

    /// Address of the unit that runs the resource at `address`
    ///
    /// A unit-bound resource runs itself; a parent-bound one runs inside
    /// its nearest unit-bound ancestor. Model-only resources have no unit.
    ///
    /// # Errors
    /// Returns error if the address does not resolve
    pub fn owner_unit(&self, address: &Address) -> RuntimeResult<Option<Address>> {
        let mut current = address.clone();
        loop {
            match self.registry.resolve(&current)?.runtime() {
                RuntimeBinding::Unit { .. } => return Ok(Some(current)),
                RuntimeBinding::None => return Ok(None),
                RuntimeBinding::Parent => match current.parent() {
                    Some(parent) => current = parent,
                    None => return Ok(None),
                },
            }
        }
    }

    /// Build the spec of the unit for the resource at `address`
    ///
    /// Expressions are resolved and re-normalized against the attribute
    /// schema; parent-bound children contribute their configuration under
    /// their type key.
    ///
    /// # Errors
    /// Returns error if the resource is missing or an expression is
    /// unresolvable
    pub fn build_spec(&self, model: &Resource, address: &Address) -> RuntimeResult<UnitSpec> {
        let resource = model
            .descendant(address.elements())
            .ok_or_else(|| RuntimeError::ResourceMissing(address.clone()))?;
        let ty = self.registry.resolve(address)?;
        let mut spec = UnitSpec::new(address.clone());
        spec.values = self.collect_values(&spec.name, resource, ty)?;

        if let RuntimeBinding::Unit {
            mode_attribute: Some(attribute),
        } = ty.runtime()
        {
            spec.mode = spec
                .values
                .get(attribute)
                .and_then(ModelValue::as_str)
                .and_then(UnitMode::from_start_mode)
                .unwrap_or_default();
        }

        if let Some(parent) = address.parent() {
            if let Some(owner) = self.owner_unit(&parent)? {
                spec.depends_on.insert(UnitName::from_address(&owner));
            }
        }
        for definition in ty.attributes() {
            let Some(reference) = definition.reference() else {
                continue;
            };
            let targets: Vec<&str> = match spec.values.get(definition.name()) {
                Some(ModelValue::String(name)) => vec![name.as_str()],
                Some(ModelValue::List(items)) => items.iter().filter_map(ModelValue::as_str).collect(),
                _ => Vec::new(),
            };
            for target in targets {
                let target = reference.target(address, target).map_err(|source| {
                    RuntimeError::InvalidReference {
                        unit: spec.name.clone(),
                        source,
                    }
                })?;
                if let Some(owner) = self.owner_unit(&target)? {
                    if owner != *address {
                        spec.depends_on.insert(UnitName::from_address(&owner));
                    }
                }
            }
        }
        Ok(spec)
    }

    fn collect_values(
        &self,
        unit: &UnitName,
        resource: &Resource,
        ty: &ResourceType,
    ) -> RuntimeResult<BTreeMap<String, ModelValue>> {
        let mut values = BTreeMap::new();
        for definition in ty.attributes() {
            let stored = resource.attribute(definition.name());
            if !stored.is_defined() {
                continue;
            }
            let value = if stored.contains_expression() {
                let resolved =
                    self.resolver
                        .resolve(&stored)
                        .map_err(|source| RuntimeError::Expression {
                            unit: unit.clone(),
                            source,
                        })?;
                definition
                    .validate_and_normalize(Some(&resolved))
                    .map_err(|source| RuntimeError::ResolvedValue {
                        unit: unit.clone(),
                        source,
                    })?
            } else {
                stored
            };
            values.insert(definition.name().to_string(), value);
        }

        for child in resource.children() {
            let Some(element) = child.address().last() else {
                continue;
            };
            let Some(child_type) = ty.resolve_child(element) else {
                continue;
            };
            if *child_type.runtime() != RuntimeBinding::Parent {
                continue;
            }
            let child_values = self.collect_values(unit, child, child_type)?;
            let entry = values
                .entry(element.key().to_string())
                .or_insert_with(|| ModelValue::Object(BTreeMap::new()));
            if let ModelValue::Object(instances) = entry {
                instances.insert(
                    element.value().to_string(),
                    ModelValue::Object(child_values.into_iter().collect()),
                );
            }
        }
        Ok(values)
    }

    /// Plan the actions for a batch of model changes
    ///
    /// `prior` is the model before the batch and `model` the model after it.
    /// Removals are planned first, then changes to surviving units, then
    /// installs. The result reflects the graph at the time of the call; use
    /// [`Self::plan_locked`] when other plans may run concurrently.
    ///
    /// # Errors
    /// Returns error if a spec cannot be built or a new unit's dependency
    /// is neither installed nor installed earlier in the batch
    pub fn plan(
        &self,
        changes: &[ModelChange],
        prior: &Resource,
        model: &Resource,
    ) -> RuntimeResult<ReconciliationPlan> {
        let survives = |address: &Address| {
            prior.descendant(address.elements()).is_some()
                && model.descendant(address.elements()).is_some()
        };

        let mut intents = Vec::new();
        let mut modified: IndexMap<Address, (RestartImpact, BTreeSet<String>)> = IndexMap::new();
        for change in changes {
            let ty = self.registry.resolve(&change.address)?;
            match ty.runtime() {
                RuntimeBinding::None => {}
                RuntimeBinding::Unit { .. } => match &change.kind {
                    ChangeKind::Added => intents.push(Intent::Install(change.address.clone())),
                    ChangeKind::Removed => intents.push(Intent::Remove(change.address.clone())),
                    ChangeKind::Modified { attributes } if survives(&change.address) => {
                        let entry = modified
                            .entry(change.address.clone())
                            .or_insert((RestartImpact::None, BTreeSet::new()));
                        entry.0 = entry.0.max(change.impact());
                        entry.1.extend(attributes.keys().cloned());
                    }
                    ChangeKind::Modified { .. } => {}
                },
                RuntimeBinding::Parent => {
                    let Some(owner) = self.owner_unit(&change.address)? else {
                        continue;
                    };
                    if !survives(&owner) {
                        continue;
                    }
                    let key = change
                        .address
                        .relative_to(&owner)
                        .ok()
                        .and_then(<[_]>::first)
                        .map(|element| element.key().to_string());
                    let entry = modified
                        .entry(owner)
                        .or_insert((RestartImpact::None, BTreeSet::new()));
                    entry.0 = entry.0.max(change.impact());
                    entry.1.extend(key);
                }
            }
        }

        let mut plan = ReconciliationPlan::new();
        let mut uninstalled: HashSet<UnitName> = HashSet::new();
        let mut installed: HashSet<UnitName> = HashSet::new();

        for intent in &intents {
            if let Intent::Remove(address) = intent {
                let unit = UnitName::from_address(address);
                if uninstalled.contains(&unit) || !self.graph.contains(&unit) {
                    continue;
                }
                self.plan_uninstall_with_dependents(&mut plan, &mut uninstalled, &unit);
                plan.escalate(PlanStrategy::Uninstall);
            }
        }

        for (address, (impact, keys)) in &modified {
            let unit = UnitName::from_address(address);
            if uninstalled.contains(&unit) || !self.graph.contains(&unit) {
                debug!(%unit, "change to a unit that is not running, nothing to reconcile");
                continue;
            }
            let spec = self.build_spec(model, address)?;
            match impact {
                RestartImpact::None => {
                    let values = keys
                        .iter()
                        .map(|k| (k.clone(), spec.values.get(k).cloned().unwrap_or_default()))
                        .collect();
                    plan.push(PlanAction::Update { unit, values });
                    plan.escalate(PlanStrategy::LiveUpdate);
                }
                RestartImpact::ResourceServices => {
                    plan.push(PlanAction::Uninstall { unit: unit.clone() });
                    uninstalled.insert(unit.clone());
                    plan.push(PlanAction::Install { spec });
                    uninstalled.remove(&unit);
                    installed.insert(unit);
                    plan.escalate(PlanStrategy::RestartUnit);
                }
                RestartImpact::AllServices => {
                    let dependents: Vec<UnitName> = self
                        .graph
                        .transitive_dependents(&unit)
                        .into_iter()
                        .filter(|d| !uninstalled.contains(d))
                        .collect();
                    self.plan_uninstall_with_dependents(&mut plan, &mut uninstalled, &unit);
                    plan.push(PlanAction::Install { spec });
                    uninstalled.remove(&unit);
                    installed.insert(unit);
                    for dependent in dependents.iter().rev() {
                        let Some(existing) = self.graph.get(dependent) else {
                            continue;
                        };
                        let spec = self.build_spec(model, &existing.spec.address)?;
                        plan.push(PlanAction::Install { spec });
                        uninstalled.remove(dependent);
                        installed.insert(dependent.clone());
                    }
                    plan.escalate(PlanStrategy::RestartDependents);
                }
            }
        }

        for intent in &intents {
            if let Intent::Install(address) = intent {
                let spec = self.build_spec(model, address)?;
                for dependency in &spec.depends_on {
                    let available = installed.contains(dependency)
                        || (self.graph.contains(dependency) && !uninstalled.contains(dependency));
                    if !available {
                        return Err(RuntimeError::MissingDependency {
                            unit: spec.name.clone(),
                            dependency: dependency.clone(),
                        });
                    }
                }
                installed.insert(spec.name.clone());
                plan.push(PlanAction::Install { spec });
                plan.escalate(PlanStrategy::Install);
            }
        }

        debug!(
            strategy = ?plan.strategy(),
            actions = plan.actions().len(),
            "reconciliation planned"
        );
        Ok(plan)
    }

    fn plan_uninstall_with_dependents(
        &self,
        plan: &mut ReconciliationPlan,
        uninstalled: &mut HashSet<UnitName>,
        unit: &UnitName,
    ) {
        for dependent in self.graph.transitive_dependents(unit) {
            if uninstalled.insert(dependent.clone()) {
                plan.push(PlanAction::Uninstall { unit: dependent });
            }
        }
        if uninstalled.insert(unit.clone()) {
            plan.push(PlanAction::Uninstall { unit: unit.clone() });
        }
    }

    /// Plan installing every unit in the model, in dependency order
    ///
    /// # Errors
    /// Returns error if a spec cannot be built, a dependency is missing or
    /// the dependencies are cyclic
    pub fn plan_full(&self, model: &Resource) -> RuntimeResult<ReconciliationPlan> {
        let mut specs: IndexMap<UnitName, UnitSpec> = IndexMap::new();
        let mut resources = model.descendants_post_order();
        resources.reverse();
        for resource in resources {
            let address = resource.address();
            if let RuntimeBinding::Unit { .. } = self.registry.resolve(address)?.runtime() {
                let spec = self.build_spec(model, address)?;
                specs.insert(spec.name.clone(), spec);
            }
        }

        let mut order: DiGraphMap<usize, ()> = DiGraphMap::new();
        for (index, spec) in specs.values().enumerate() {
            order.add_node(index);
            for dependency in &spec.depends_on {
                let from = specs.get_index_of(dependency).ok_or_else(|| {
                    RuntimeError::MissingDependency {
                        unit: spec.name.clone(),
                        dependency: dependency.clone(),
                    }
                })?;
                order.add_edge(from, index, ());
            }
        }
        let sorted = petgraph::algo::toposort(&order, None).map_err(|cycle| {
            let name = specs
                .get_index(cycle.node_id())
                .map_or_else(|| UnitName::from_address(&Address::root()), |(n, _)| n.clone());
            RuntimeError::CycleDetected(name)
        })?;

        let mut plan = ReconciliationPlan::new();
        for index in sorted {
            if let Some((_, spec)) = specs.get_index(index) {
                plan.push(PlanAction::Install { spec: spec.clone() });
                plan.escalate(PlanStrategy::Install);
            }
        }
        Ok(plan)
    }

    /// Plan uninstalling every installed unit, dependents first
    ///
    /// # Errors
    /// Returns `CycleDetected` if the live graph is cyclic
    pub fn plan_teardown(&self) -> RuntimeResult<ReconciliationPlan> {
        let mut plan = ReconciliationPlan::new();
        for unit in self.graph.start_order()?.into_iter().rev() {
            plan.push(PlanAction::Uninstall { unit });
            plan.escalate(PlanStrategy::Uninstall);
        }
        Ok(plan)
    }

    /// Plan a batch of model changes while holding the locks of every unit
    /// the plan touches
    ///
    /// Planning is repeated under the locks until the plan stays inside the
    /// locked set. A dependency missing from the graph is locked and planned
    /// again once, so a concurrent restart of it is waited out instead of
    /// failing the batch.
    ///
    /// # Errors
    /// Returns the planning error seen under the locks
    pub async fn plan_locked(
        &self,
        changes: &[ModelChange],
        prior: &Resource,
        model: &Resource,
    ) -> RuntimeResult<LockedPlan> {
        let mut wanted = BTreeSet::new();
        loop {
            let locks = self.lock_units(wanted.clone()).await;
            let grown = match self.plan(changes, prior, model) {
                Ok(plan) if locks.covers(&plan) => return Ok(LockedPlan { plan, locks }),
                Ok(plan) => plan.units(),
                Err(RuntimeError::MissingDependency { unit, dependency })
                    if !wanted.contains(&dependency) =>
                {
                    BTreeSet::from([unit, dependency])
                }
                Err(error) => return Err(error),
            };
            drop(locks);
            wanted.extend(grown);
            debug!(units = wanted.len(), "lock set grew, planning again");
        }
    }

    /// Lock units in name order
    async fn lock_units(&self, units: BTreeSet<UnitName>) -> UnitLocks {
        let mut guards = Vec::with_capacity(units.len());
        for unit in &units {
            let lock = self
                .locks
                .entry(unit.clone())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone();
            guards.push(lock.lock_owned().await);
        }
        UnitLocks {
            units,
            _guards: guards,
        }
    }

    /// Execute a plan
    ///
    /// Units touched by the plan are locked in name order for the whole
    /// execution.
    ///
    /// # Errors
    /// Returns the failure together with what was applied before it
    pub async fn execute(&self, plan: &ReconciliationPlan) -> Result<AppliedPlan, ExecutionFailure> {
        let journal = AppliedJournal::new();
        match self.execute_into(plan, &journal).await {
            Ok(()) => Ok(journal.take()),
            Err(error) => Err(ExecutionFailure {
                error,
                applied: journal.take(),
            }),
        }
    }

    /// Execute a plan, recording each applied action as soon as it lands
    ///
    /// If the returned future is dropped part way, `journal` still holds
    /// every action that reached the live graph.
    ///
    /// # Errors
    /// Returns the first failed action
    pub async fn execute_into(
        &self,
        plan: &ReconciliationPlan,
        journal: &AppliedJournal,
    ) -> RuntimeResult<()> {
        let _locks = self.lock_units(plan.units()).await;
        self.apply(plan, journal).await
    }

    /// Execute a plan whose unit locks the caller already holds
    ///
    /// # Errors
    /// Returns the first failed action
    pub async fn apply(&self, plan: &ReconciliationPlan, journal: &AppliedJournal) -> RuntimeResult<()> {
        let reinstalled = plan.reinstalled();
        for action in plan.actions() {
            if let Err(error) = self.apply_action(action, &reinstalled, journal).await {
                warn!(unit = %action.unit(), %error, "reconciliation action failed");
                return Err(error);
            }
        }
        info!(
            strategy = ?plan.strategy(),
            actions = journal.len(),
            "reconciliation applied"
        );
        Ok(())
    }

    async fn apply_action(
        &self,
        action: &PlanAction,
        reinstalled: &BTreeSet<UnitName>,
        journal: &AppliedJournal,
    ) -> RuntimeResult<()> {
        match action {
            PlanAction::Install { spec } => {
                if let Some(missing) = spec.depends_on.iter().find(|d| !self.graph.contains(d)) {
                    return Err(RuntimeError::MissingDependency {
                        unit: spec.name.clone(),
                        dependency: missing.clone(),
                    });
                }
                let handle = self
                    .provider
                    .install(spec)
                    .await
                    .map_err(|e| RuntimeError::live(&spec.name, "install", e))?;
                if let Err(error) = self.graph.insert(spec.clone(), handle) {
                    if let Err(e) = self.provider.uninstall(handle).await {
                        warn!(unit = %spec.name, error = %e, "failed to discard unrecorded unit");
                    }
                    return Err(error);
                }
                debug!(unit = %spec.name, mode = ?spec.mode, "unit installed");
                journal.record(AppliedAction::Installed {
                    unit: spec.name.clone(),
                    handle,
                });
            }
            PlanAction::Uninstall { unit } => {
                let installed = self
                    .graph
                    .get(unit)
                    .ok_or_else(|| RuntimeError::NotInstalled(unit.clone()))?;
                let restart = reinstalled.contains(unit);
                if !restart {
                    self.ensure_unrequired(unit)?;
                }
                self.provider
                    .uninstall(installed.handle)
                    .await
                    .map_err(|e| RuntimeError::live(unit, "uninstall", e))?;
                let removed = if restart {
                    self.graph.detach(unit)?
                } else {
                    self.graph.remove(unit)?
                };
                debug!(%unit, "unit uninstalled");
                journal.record(AppliedAction::Uninstalled { unit: removed });
            }
            PlanAction::Update { unit, values } => {
                let installed = self
                    .graph
                    .get(unit)
                    .ok_or_else(|| RuntimeError::NotInstalled(unit.clone()))?;
                self.provider
                    .update(installed.handle, values)
                    .await
                    .map_err(|e| RuntimeError::live(unit, "update", e))?;
                let previous = self.graph.update_values(unit, values)?;
                debug!(%unit, keys = values.len(), "unit updated in place");
                journal.record(AppliedAction::Updated {
                    unit: unit.clone(),
                    previous,
                });
            }
        }
        Ok(())
    }

    /// Wait for every unit the plan installed to become ready
    ///
    /// # Errors
    /// Returns the first unit that failed to start
    pub async fn verify(&self, applied: &AppliedPlan) -> RuntimeResult<()> {
        for action in &applied.actions {
            if let AppliedAction::Installed { unit, handle } = action {
                self.provider
                    .await_ready(*handle)
                    .await
                    .map_err(|e| RuntimeError::live(unit, "start", e))?;
            }
        }
        Ok(())
    }

    fn ensure_unrequired(&self, unit: &UnitName) -> RuntimeResult<()> {
        match self.graph.dependents(unit).into_iter().next() {
            Some(dependent) => Err(RuntimeError::StillRequired {
                unit: unit.clone(),
                dependent,
            }),
            None => Ok(()),
        }
    }

    /// Undo applied actions in reverse order
    ///
    /// # Errors
    /// Returns the first action that could not be undone; the graph is then
    /// no longer consistent with the model
    pub async fn revert(&self, applied: AppliedPlan) -> RuntimeResult<()> {
        let _locks = self.lock_units(applied.units()).await;
        self.revert_held(applied).await
    }

    /// Undo applied actions while the caller holds their unit locks
    ///
    /// # Errors
    /// Same as [`Self::revert`]
    pub async fn revert_held(&self, applied: AppliedPlan) -> RuntimeResult<()> {
        let count = applied.actions.len();
        // units the plan took down come back after their replacement goes
        let restored: BTreeSet<UnitName> = applied
            .actions
            .iter()
            .filter_map(|action| match action {
                AppliedAction::Uninstalled { unit } => Some(unit.spec.name.clone()),
                _ => None,
            })
            .collect();
        for action in applied.actions.into_iter().rev() {
            match action {
                AppliedAction::Installed { unit, handle } => {
                    let restart = restored.contains(&unit);
                    if !restart {
                        self.ensure_unrequired(&unit)?;
                    }
                    self.provider
                        .uninstall(handle)
                        .await
                        .map_err(|e| RuntimeError::live(&unit, "uninstall", e))?;
                    if restart {
                        self.graph.detach(&unit)?;
                    } else {
                        self.graph.remove(&unit)?;
                    }
                }
                AppliedAction::Uninstalled { unit } => {
                    let handle = self
                        .provider
                        .install(&unit.spec)
                        .await
                        .map_err(|e| RuntimeError::live(&unit.spec.name, "install", e))?;
                    self.graph.insert(unit.spec, handle)?;
                }
                AppliedAction::Updated { unit, previous } => {
                    let installed = self
                        .graph
                        .get(&unit)
                        .ok_or_else(|| RuntimeError::NotInstalled(unit.clone()))?;
                    self.provider
                        .update(installed.handle, &previous)
                        .await
                        .map_err(|e| RuntimeError::live(&unit, "update", e))?;
                    self.graph.update_values(&unit, &previous)?;
                }
            }
        }
        info!(actions = count, "runtime changes reverted");
        Ok(())
    }
}
