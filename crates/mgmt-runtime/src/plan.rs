//! Reconciliation plans
//!
//! A [`ReconciliationPlan`] is the ordered list of actions that brings the
//! live service graph in line with a committed model change.

use crate::unit::{UnitName, UnitSpec};
use mgmt_model::{Address, ModelValue, RestartImpact};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

/// What happened to one resource during the MODEL stage
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeKind {
    /// Resource created
    Added,
    /// Resource removed
    Removed,
    /// Attributes changed, with each attribute's restart impact
    Modified {
        /// Changed attribute names and their impact
        attributes: BTreeMap<String, RestartImpact>,
    },
}

/// Model change fed to the reconciler
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelChange {
    /// Changed resource
    pub address: Address,
    /// Kind of change
    pub kind: ChangeKind,
}

impl ModelChange {
    /// Resource created
    #[must_use]
    pub fn added(address: Address) -> Self {
        Self {
            address,
            kind: ChangeKind::Added,
        }
    }

    /// Resource removed
    #[must_use]
    pub fn removed(address: Address) -> Self {
        Self {
            address,
            kind: ChangeKind::Removed,
        }
    }

    /// Attributes changed
    #[must_use]
    pub fn modified<K: Into<String>>(
        address: Address,
        attributes: impl IntoIterator<Item = (K, RestartImpact)>,
    ) -> Self {
        Self {
            address,
            kind: ChangeKind::Modified {
                attributes: attributes.into_iter().map(|(k, v)| (k.into(), v)).collect(),
            },
        }
    }

    /// Highest restart impact among changed attributes
    #[must_use]
    pub fn impact(&self) -> RestartImpact {
        match &self.kind {
            ChangeKind::Modified { attributes } => {
                attributes.values().copied().max().unwrap_or_default()
            }
            ChangeKind::Added | ChangeKind::Removed => RestartImpact::AllServices,
        }
    }
}

/// One step of a plan
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "kebab-case")]
pub enum PlanAction {
    /// Install and start a unit
    Install {
        /// Spec to install
        spec: UnitSpec,
    },
    /// Stop and remove a unit
    Uninstall {
        /// Unit to remove
        unit: UnitName,
    },
    /// Push values into a running unit
    Update {
        /// Unit to update
        unit: UnitName,
        /// New values of the changed keys
        values: BTreeMap<String, ModelValue>,
    },
}

impl PlanAction {
    /// Unit the action targets
    #[must_use]
    pub fn unit(&self) -> &UnitName {
        match self {
            Self::Install { spec } => &spec.name,
            Self::Uninstall { unit } | Self::Update { unit, .. } => unit,
        }
    }
}

/// Cheapest strategy that covers a change set, ordered by cost
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum PlanStrategy {
    /// Nothing to do
    #[default]
    Noop,
    /// Values pushed into running units
    LiveUpdate,
    /// New units installed
    Install,
    /// Units restarted without their dependents
    RestartUnit,
    /// Units restarted together with their dependents
    RestartDependents,
    /// Units removed
    Uninstall,
}

/// Ordered actions for one batch of model changes
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct ReconciliationPlan {
    strategy: PlanStrategy,
    actions: Vec<PlanAction>,
}

impl ReconciliationPlan {
    /// Empty plan
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Overall strategy (the most expensive used)
    #[inline]
    #[must_use]
    pub fn strategy(&self) -> PlanStrategy {
        self.strategy
    }

    /// Actions in execution order
    #[inline]
    #[must_use]
    pub fn actions(&self) -> &[PlanAction] {
        &self.actions
    }

    /// Check if there is nothing to do
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Number of uninstall actions
    #[must_use]
    pub fn uninstall_count(&self) -> usize {
        self.actions
            .iter()
            .filter(|a| matches!(a, PlanAction::Uninstall { .. }))
            .count()
    }

    /// Number of install actions
    #[must_use]
    pub fn install_count(&self) -> usize {
        self.actions
            .iter()
            .filter(|a| matches!(a, PlanAction::Install { .. }))
            .count()
    }

    /// Every unit the plan touches, sorted
    ///
    /// This is the lock set: plans with intersecting sets are serialized.
    #[must_use]
    pub fn units(&self) -> BTreeSet<UnitName> {
        let mut units: BTreeSet<UnitName> =
            self.actions.iter().map(|a| a.unit().clone()).collect();
        for action in &self.actions {
            if let PlanAction::Install { spec } = action {
                units.extend(spec.depends_on.iter().cloned());
            }
        }
        units
    }

    /// Units uninstalled and installed again later in the same plan
    #[must_use]
    pub fn reinstalled(&self) -> BTreeSet<UnitName> {
        let mut uninstalled = BTreeSet::new();
        let mut reinstalled = BTreeSet::new();
        for action in &self.actions {
            match action {
                PlanAction::Uninstall { unit } => {
                    uninstalled.insert(unit);
                }
                PlanAction::Install { spec } if uninstalled.contains(&spec.name) => {
                    reinstalled.insert(spec.name.clone());
                }
                _ => {}
            }
        }
        reinstalled
    }

    pub(crate) fn escalate(&mut self, strategy: PlanStrategy) {
        self.strategy = self.strategy.max(strategy);
    }

    pub(crate) fn push(&mut self, action: PlanAction) {
        self.actions.push(action);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn impact_is_maximum() {
        let address = Address::root();
        let change = ModelChange::modified(
            address.clone(),
            [
                ("a", RestartImpact::None),
                ("b", RestartImpact::ResourceServices),
            ],
        );
        assert_eq!(change.impact(), RestartImpact::ResourceServices);
        let none = ModelChange::modified(address, [("a", RestartImpact::None)]);
        assert_eq!(none.impact(), RestartImpact::None);
    }

    #[test]
    fn strategy_escalates_only_upwards() {
        let mut plan = ReconciliationPlan::new();
        plan.escalate(PlanStrategy::RestartDependents);
        plan.escalate(PlanStrategy::LiveUpdate);
        assert_eq!(plan.strategy(), PlanStrategy::RestartDependents);
    }

    #[test]
    fn lock_set_includes_dependencies() {
        let bar: Address = "/container=bar".parse().unwrap();
        let foo = bar.child("cache", "foo");
        let mut plan = ReconciliationPlan::new();
        plan.push(PlanAction::Install {
            spec: UnitSpec::new(foo.clone()).with_dependency(UnitName::from_address(&bar)),
        });
        let units: Vec<_> = plan.units().into_iter().collect();
        assert_eq!(
            units,
            vec![UnitName::from_address(&bar), UnitName::from_address(&foo)]
        );
    }

    #[test]
    fn restart_is_a_reinstall() {
        let bar: Address = "/container=bar".parse().unwrap();
        let foo = bar.child("cache", "foo");
        let mut plan = ReconciliationPlan::new();
        plan.push(PlanAction::Install {
            spec: UnitSpec::new(foo.clone()),
        });
        plan.push(PlanAction::Uninstall {
            unit: UnitName::from_address(&bar),
        });
        plan.push(PlanAction::Install {
            spec: UnitSpec::new(bar.clone()),
        });
        assert_eq!(
            plan.reinstalled().into_iter().collect::<Vec<_>>(),
            vec![UnitName::from_address(&bar)]
        );
    }
}
