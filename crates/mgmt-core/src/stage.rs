//! Pipeline stages and process state
//!
//! Every operation walks `Received -> Model -> Runtime -> Verify -> Completed`.
//! Failures after the model was touched go through `RollingBack`, which ends
//! in `RolledBack` or, when undoing fails, `Failed`.

use crate::error::OperationError;
use serde::{Deserialize, Serialize};
use std::fmt::{self, Display, Formatter};

/// Stage of one operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Stage {
    /// Accepted, not yet resolved
    Received,
    /// Validating and mutating the working model
    Model,
    /// Applying the reconciliation plan
    Runtime,
    /// Waiting for installed units to settle
    Verify,
    /// Committed
    Completed,
    /// Undoing model and runtime changes
    RollingBack,
    /// Undone; the caller sees the original error
    RolledBack,
    /// Rejected before mutation, or left inconsistent
    Failed,
}

impl Stage {
    /// Check if no further transition is possible
    #[inline]
    #[must_use]
    pub fn is_terminal(self) -> bool {
        allowed_transitions(self).is_empty()
    }
}

impl Display for Stage {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Received => "RECEIVED",
            Self::Model => "MODEL",
            Self::Runtime => "RUNTIME",
            Self::Verify => "VERIFY",
            Self::Completed => "COMPLETED",
            Self::RollingBack => "ROLLING_BACK",
            Self::RolledBack => "ROLLED_BACK",
            Self::Failed => "FAILED",
        })
    }
}

/// Stages reachable from `from`
#[must_use]
pub fn allowed_transitions(from: Stage) -> &'static [Stage] {
    use Stage::*;
    match from {
        Received => &[Model, Failed],
        Model => &[Runtime, Completed, RollingBack],
        Runtime => &[Verify, RollingBack],
        Verify => &[Completed, RollingBack],
        RollingBack => &[RolledBack, Failed],
        Completed | RolledBack | Failed => &[],
    }
}

/// Validate a stage transition
///
/// # Errors
/// Returns `IllegalTransition` if `to` is not reachable from `from`
pub fn validate_transition(from: Stage, to: Stage) -> Result<(), OperationError> {
    if allowed_transitions(from).contains(&to) {
        Ok(())
    } else {
        Err(OperationError::IllegalTransition { from, to })
    }
}

/// Lifecycle state of the managed process
///
/// Ordered by severity; only [`crate::Controller`] lowers it again, on reload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProcessState {
    /// Booting: operations touch the model only
    #[default]
    Starting,
    /// Live: operations reach the runtime
    Running,
    /// Model holds changes the runtime has not picked up
    ReloadRequired,
    /// Runtime may disagree with the model; restart the process
    RestartRequired,
}

impl Display for ProcessState {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Starting => "starting",
            Self::Running => "running",
            Self::ReloadRequired => "reload-required",
            Self::RestartRequired => "restart-required",
        })
    }
}

/// Shared, monotonic process state
#[derive(Debug, Default)]
pub struct ProcessStatus {
    state: parking_lot::RwLock<ProcessState>,
}

impl ProcessStatus {
    /// Current state
    #[must_use]
    pub fn get(&self) -> ProcessState {
        *self.state.read()
    }

    /// Raise the state to at least `to`, returning the resulting state
    pub fn escalate(&self, to: ProcessState) -> ProcessState {
        let mut state = self.state.write();
        if to > *state {
            *state = to;
        }
        *state
    }

    /// Clear `Starting` or `ReloadRequired` after the runtime was rebuilt
    ///
    /// `RestartRequired` survives; only a process restart clears it.
    pub fn settle(&self) -> ProcessState {
        let mut state = self.state.write();
        if *state < ProcessState::RestartRequired {
            *state = ProcessState::Running;
        }
        *state
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path_is_legal() {
        let path = [
            Stage::Received,
            Stage::Model,
            Stage::Runtime,
            Stage::Verify,
            Stage::Completed,
        ];
        for pair in path.windows(2) {
            assert!(validate_transition(pair[0], pair[1]).is_ok());
        }
    }

    #[test]
    fn rollback_reachable_after_model_only() {
        assert!(validate_transition(Stage::Received, Stage::RollingBack).is_err());
        for from in [Stage::Model, Stage::Runtime, Stage::Verify] {
            assert!(validate_transition(from, Stage::RollingBack).is_ok());
        }
        assert!(validate_transition(Stage::Runtime, Stage::Completed).is_err());
    }

    #[test]
    fn terminal_stages() {
        assert!(Stage::Completed.is_terminal());
        assert!(Stage::RolledBack.is_terminal());
        assert!(Stage::Failed.is_terminal());
        assert!(!Stage::RollingBack.is_terminal());
        assert!(matches!(
            validate_transition(Stage::Completed, Stage::Model),
            Err(OperationError::IllegalTransition {
                from: Stage::Completed,
                to: Stage::Model
            })
        ));
    }

    #[test]
    fn process_state_only_rises() {
        let status = ProcessStatus::default();
        assert_eq!(status.get(), ProcessState::Starting);
        assert_eq!(status.escalate(ProcessState::ReloadRequired), ProcessState::ReloadRequired);
        assert_eq!(status.escalate(ProcessState::Running), ProcessState::ReloadRequired);
        assert_eq!(status.settle(), ProcessState::Running);
        status.escalate(ProcessState::RestartRequired);
        assert_eq!(status.settle(), ProcessState::RestartRequired);
    }
}
