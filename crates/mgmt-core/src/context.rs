//! Per-operation context

use crate::error::OperationResult;
use crate::stage::{validate_transition, Stage};
use tracing::info;
use uuid::Uuid;

/// Identity and stage history of one operation
#[derive(Debug, Clone)]
pub struct OperationContext {
    id: Uuid,
    stage: Stage,
    history: Vec<Stage>,
}

impl Default for OperationContext {
    fn default() -> Self {
        Self::new()
    }
}

impl OperationContext {
    /// Fresh context in `Received`
    #[must_use]
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            stage: Stage::Received,
            history: vec![Stage::Received],
        }
    }

    /// Operation id
    #[inline]
    #[must_use]
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Current stage
    #[inline]
    #[must_use]
    pub fn stage(&self) -> Stage {
        self.stage
    }

    /// Every stage visited, in order
    #[inline]
    #[must_use]
    pub fn history(&self) -> &[Stage] {
        &self.history
    }

    /// Move to `to`
    ///
    /// # Errors
    /// Returns `IllegalTransition` if `to` is not reachable
    pub fn advance(&mut self, to: Stage) -> OperationResult<()> {
        validate_transition(self.stage, to)?;
        info!(from = %self.stage, to = %to, "stage transition");
        self.stage = to;
        self.history.push(to);
        Ok(())
    }

    /// Consume into the stage history
    #[must_use]
    pub fn into_history(self) -> Vec<Stage> {
        self.history
    }
}
