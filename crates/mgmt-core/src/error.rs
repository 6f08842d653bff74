//! Error types for the operation pipeline
//!
//! Every operation ends with exactly one [`OperationError`] or a result.
//! Errors raised before mutation are recoverable; so are runtime failures
//! that were rolled back cleanly. Only [`OperationError::InconsistentState`]
//! is fatal.

use crate::stage::{ProcessState, Stage};
use mgmt_model::{ConflictError, HandlerError, ModelError, SchemaError, ValidationError};
use mgmt_runtime::RuntimeError;
use mgmt_transform::TransformError;
use serde::Serialize;
use std::time::Duration;

/// Terminal failure of one operation
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OperationError {
    /// Unknown address, operation or parameter
    #[error("schema error: {0}")]
    Schema(#[from] SchemaError),

    /// Parameter value rejected
    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Model tree conflict
    #[error("conflict: {0}")]
    Conflict(#[from] ConflictError),

    /// Custom operation handler refused the request
    #[error("operation failed: {0}")]
    OperationFailed(String),

    /// Runtime reconciliation failed and was rolled back
    #[error("reconciliation failed: {0}")]
    Reconciliation(#[from] RuntimeError),

    /// Stage did not finish in time and was rolled back
    #[error("timed out in {stage} after {after:?}")]
    Timeout {
        /// Stage that was running
        stage: Stage,
        /// Time allowed
        after: Duration,
    },

    /// Caller cancelled and the operation was rolled back
    #[error("cancelled in {stage}")]
    Cancelled {
        /// Stage that was running
        stage: Stage,
    },

    /// Operation cannot be expressed for the peer version
    #[error("version incompatible: {0}")]
    VersionIncompatible(#[from] TransformError),

    /// Rollback failed; model and runtime may disagree
    #[error("inconsistent state after {cause}: rollback failed: {rollback}")]
    InconsistentState {
        /// Error that triggered the rollback
        cause: Box<OperationError>,
        /// Why undoing failed
        rollback: RollbackError,
    },

    /// Pipeline attempted an illegal stage change
    #[error("illegal stage transition {from} -> {to}")]
    IllegalTransition {
        /// Current stage
        from: Stage,
        /// Requested stage
        to: Stage,
    },

    /// Worker pool closed
    #[error("worker pool unavailable")]
    WorkerUnavailable,

    /// Worker task panicked or was aborted unexpectedly
    #[error("worker failed: {0}")]
    WorkerFailed(String),

    /// Request not allowed in the current process state
    #[error("not allowed while the process is {0}")]
    InvalidProcessState(ProcessState),

    /// Forwarding to a peer failed
    #[error("peer error: {0}")]
    Peer(String),
}

/// Why a rollback could not restore consistency
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RollbackError {
    /// Runtime changes could not be reverted
    #[error(transparent)]
    Runtime(#[from] RuntimeError),

    /// Model changes could not be undone
    #[error(transparent)]
    Model(#[from] ConflictError),
}

/// Coarse error classification reported to callers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorKind {
    /// Schema error
    Schema,
    /// Validation error
    Validation,
    /// Conflict error
    Conflict,
    /// Handler failure
    Failed,
    /// Runtime reconciliation error
    Reconciliation,
    /// Timeout
    Timeout,
    /// Cancellation
    Cancelled,
    /// Version incompatibility
    VersionIncompatible,
    /// Inconsistent state
    InconsistentState,
    /// Internal pipeline error
    Internal,
    /// Peer failure
    Peer,
}

impl OperationError {
    /// Classification of this error
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Schema(_) => ErrorKind::Schema,
            Self::Validation(_) => ErrorKind::Validation,
            Self::Conflict(_) => ErrorKind::Conflict,
            Self::OperationFailed(_) => ErrorKind::Failed,
            Self::Reconciliation(_) => ErrorKind::Reconciliation,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::Cancelled { .. } => ErrorKind::Cancelled,
            Self::VersionIncompatible(_) => ErrorKind::VersionIncompatible,
            Self::InconsistentState { .. } => ErrorKind::InconsistentState,
            Self::IllegalTransition { .. }
            | Self::WorkerUnavailable
            | Self::WorkerFailed(_)
            | Self::InvalidProcessState(_) => ErrorKind::Internal,
            Self::Peer(_) => ErrorKind::Peer,
        }
    }

    /// Check if the model and runtime are as they were before the operation
    #[inline]
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        !self.is_fatal()
    }

    /// Check if the process needs a restart
    #[inline]
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::InconsistentState { .. })
    }

    /// Original error behind an inconsistent state
    #[must_use]
    pub fn root_cause(&self) -> &Self {
        match self {
            Self::InconsistentState { cause, .. } => cause.root_cause(),
            other => other,
        }
    }

    /// Wrap a failed rollback
    #[must_use]
    pub fn inconsistent(cause: Self, rollback: impl Into<RollbackError>) -> Self {
        Self::InconsistentState {
            cause: Box::new(cause),
            rollback: rollback.into(),
        }
    }
}

impl From<ModelError> for OperationError {
    fn from(error: ModelError) -> Self {
        match error {
            ModelError::Schema(e) => Self::Schema(e),
            ModelError::Validation(e) => Self::Validation(e),
            ModelError::Conflict(e) => Self::Conflict(e),
        }
    }
}

impl From<HandlerError> for OperationError {
    fn from(error: HandlerError) -> Self {
        match error {
            HandlerError::Model(e) => e.into(),
            HandlerError::Failed(reason) => Self::OperationFailed(reason),
        }
    }
}

/// Result type for pipeline operations
pub type OperationResult<T> = Result<T, OperationError>;
