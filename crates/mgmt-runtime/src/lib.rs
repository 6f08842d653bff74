//! Management Runtime
//!
//! Reconciles committed model changes with the live service graph.
//!
//! # Core Concepts
//!
//! - [`UnitSpec`]: what the live-unit collaborator needs to run one resource
//! - [`ServiceGraph`]: installed units and their dependency edges
//! - [`ReconciliationPlan`]: ordered install/uninstall/update actions
//! - [`Reconciler`]: plans, executes, verifies and reverts
//! - [`LiveUnitProvider`]: seam to the component that actually runs units

pub mod error;
pub mod graph;
pub mod plan;
pub mod provider;
pub mod reconciler;
pub mod unit;

pub use error::{RuntimeError, RuntimeResult};
pub use graph::{InstalledUnit, ServiceGraph};
pub use plan::{ChangeKind, ModelChange, PlanAction, PlanStrategy, ReconciliationPlan};
pub use provider::{LiveUnitError, LiveUnitProvider, NoopProvider};
pub use reconciler::{
    AppliedAction, AppliedJournal, AppliedPlan, ExecutionFailure, LockedPlan, Reconciler, UnitLocks,
};
pub use unit::{UnitHandle, UnitMode, UnitName, UnitSpec};
