//! Live-unit collaborator seam
//!
//! The reconciler never starts anything itself. It asks a
//! [`LiveUnitProvider`] to install, update and uninstall units; any error
//! from the provider is a reconciliation failure.

use crate::unit::{UnitHandle, UnitSpec};
use async_trait::async_trait;
use mgmt_model::ModelValue;
use std::collections::BTreeMap;

/// Error reported by the live-unit collaborator
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct LiveUnitError(pub String);

impl LiveUnitError {
    /// Create error from a message
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Installs and manages running components
#[async_trait]
pub trait LiveUnitProvider: Send + Sync {
    /// Install and start a unit
    async fn install(&self, spec: &UnitSpec) -> Result<UnitHandle, LiveUnitError>;

    /// Push changed values into a running unit
    async fn update(
        &self,
        handle: UnitHandle,
        values: &BTreeMap<String, ModelValue>,
    ) -> Result<(), LiveUnitError>;

    /// Stop and remove a unit
    async fn uninstall(&self, handle: UnitHandle) -> Result<(), LiveUnitError>;

    /// Wait until an installed unit reaches a terminal state
    ///
    /// Returns an error if the unit failed to start.
    async fn await_ready(&self, handle: UnitHandle) -> Result<(), LiveUnitError> {
        let _ = handle;
        Ok(())
    }
}

/// Provider that accepts everything and runs nothing
///
/// Used when the control plane manages a model with no live process.
#[derive(Debug, Default)]
pub struct NoopProvider {
    next: std::sync::atomic::AtomicU64,
}

#[async_trait]
impl LiveUnitProvider for NoopProvider {
    async fn install(&self, _spec: &UnitSpec) -> Result<UnitHandle, LiveUnitError> {
        let id = self
            .next
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        Ok(UnitHandle::new(id))
    }

    async fn update(
        &self,
        _handle: UnitHandle,
        _values: &BTreeMap<String, ModelValue>,
    ) -> Result<(), LiveUnitError> {
        Ok(())
    }

    async fn uninstall(&self, _handle: UnitHandle) -> Result<(), LiveUnitError> {
        Ok(())
    }
}
