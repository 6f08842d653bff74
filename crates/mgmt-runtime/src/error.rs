//! Error types for runtime reconciliation

use crate::provider::LiveUnitError;
use crate::unit::UnitName;
use mgmt_model::{Address, AddressError, ExpressionError, SchemaError, ValidationError};

/// Reconciliation failure
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RuntimeError {
    /// Address or attribute did not resolve against the schema
    #[error("schema error: {0}")]
    Schema(#[from] SchemaError),

    /// Resource missing from the model being reconciled
    #[error("resource {0} is missing from the model")]
    ResourceMissing(Address),

    /// Dependency neither installed nor installed earlier in the batch
    #[error("unit {unit} depends on {dependency}, which is not installed")]
    MissingDependency { unit: UnitName, dependency: UnitName },

    /// Installing the unit would close a dependency cycle
    #[error("dependency cycle through unit {0}")]
    CycleDetected(UnitName),

    /// Unit expected in the service graph is absent
    #[error("unit {0} is not installed")]
    NotInstalled(UnitName),

    /// Unit cannot go while an installed unit depends on it
    #[error("unit {unit} is still required by {dependent}")]
    StillRequired { unit: UnitName, dependent: UnitName },

    /// Reference attribute does not name a valid instance
    #[error("unit {unit}: {source}")]
    InvalidReference {
        unit: UnitName,
        #[source]
        source: AddressError,
    },

    /// Unit is already installed
    #[error("unit {0} is already installed")]
    AlreadyInstalled(UnitName),

    /// Expression could not be resolved
    #[error("unit {unit}: {source}")]
    Expression {
        unit: UnitName,
        #[source]
        source: ExpressionError,
    },

    /// Resolved expression does not fit the attribute type
    #[error("unit {unit}: {source}")]
    ResolvedValue {
        unit: UnitName,
        #[source]
        source: ValidationError,
    },

    /// Collaborator rejected an action
    #[error("{action} of unit {unit} failed: {source}")]
    LiveUnit {
        unit: UnitName,
        action: &'static str,
        #[source]
        source: LiveUnitError,
    },
}

impl RuntimeError {
    pub(crate) fn live(unit: &UnitName, action: &'static str, source: LiveUnitError) -> Self {
        Self::LiveUnit {
            unit: unit.clone(),
            action,
            source,
        }
    }
}

/// Result type for reconciliation
pub type RuntimeResult<T> = Result<T, RuntimeError>;
