//! Operation pipeline
//!
//! `RECEIVED` resolves the operation against the registry. `MODEL` runs
//! every step on a private transaction while holding the lineage lock for
//! the target address, then plans reconciliation under the locks of every
//! unit the plan touches. `RUNTIME` and `VERIFY` apply the plan on the worker
//! pool, bounded by one deadline and the caller's cancel token. The model is
//! committed only after `VERIFY`; any failure before that reverts the
//! runtime first and then the model. Unit locks are held until the commit or
//! the rollback is done.

use crate::config::{ControllerConfig, RestartPolicy};
use crate::context::OperationContext;
use crate::error::{ErrorKind, OperationError, OperationResult, RollbackError};
use crate::locks::LineageLocks;
use crate::pool::WorkerPool;
use crate::stage::{ProcessState, ProcessStatus, Stage};
use crate::steps;
use mgmt_model::{ModelStore, ModelTransaction, ModelValue, Operation, Registry};
use mgmt_runtime::{AppliedJournal, PlanStrategy, ReconciliationPlan, Reconciler, RuntimeResult};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

/// Caller side of a cancellation
#[derive(Debug)]
pub struct CancelHandle {
    sender: watch::Sender<bool>,
}

impl CancelHandle {
    /// Request cancellation
    pub fn cancel(&self) {
        self.sender.send_replace(true);
    }
}

/// Pipeline side of a cancellation
#[derive(Debug, Clone)]
pub struct CancelToken {
    receiver: watch::Receiver<bool>,
}

impl CancelToken {
    /// Connected handle and token
    #[must_use]
    pub fn pair() -> (CancelHandle, Self) {
        let (sender, receiver) = watch::channel(false);
        (CancelHandle { sender }, Self { receiver })
    }

    /// Check if cancellation was requested
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        *self.receiver.borrow()
    }

    /// Resolve once cancellation is requested
    ///
    /// Never resolves if the handle is dropped without cancelling.
    pub async fn cancelled(&self) {
        let mut receiver = self.receiver.clone();
        loop {
            if *receiver.borrow_and_update() {
                return;
            }
            if receiver.changed().await.is_err() {
                futures::future::pending::<()>().await;
            }
        }
    }
}

/// Per-call execution options
#[derive(Debug, Clone, Default)]
pub struct ExecuteOptions {
    timeout: Option<Duration>,
    cancel: Option<CancelToken>,
}

impl ExecuteOptions {
    /// Bound the unit-lock wait, RUNTIME and VERIFY by `timeout` instead of
    /// the configured default
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Attach a cancel token
    #[must_use]
    pub fn with_cancel(mut self, token: CancelToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Requested timeout
    #[inline]
    #[must_use]
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(CancelToken::is_cancelled)
    }
}

/// Headers attached to every response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct ResponseHeaders {
    /// Committed to the model; the runtime picks it up on reload
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub operation_requires_reload: bool,

    /// Rollback failed; the process must restart
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub operation_requires_restart: bool,

    /// Process state after the operation
    pub process_state: ProcessState,
}

/// Terminal outcome of one operation
#[derive(Debug, Clone)]
pub struct OperationOutcome {
    /// Operation id
    pub id: Uuid,
    /// Result value or the terminal error
    pub result: OperationResult<ModelValue>,
    /// Response headers
    pub headers: ResponseHeaders,
    /// Plan that was executed, if any
    pub plan: Option<ReconciliationPlan>,
    /// Model generation published by the commit
    pub generation: Option<u64>,
    /// Stages visited
    pub stages: Vec<Stage>,
    /// Rewritten form for the declared peer version, if any
    pub peer_operation: Option<Operation>,
}

impl OperationOutcome {
    /// Outcome of an operation refused before it reached the pipeline
    #[must_use]
    pub fn rejected(error: OperationError, process_state: ProcessState) -> Self {
        let mut context = OperationContext::new();
        let stages = match context.advance(Stage::Failed) {
            Ok(()) => context.history().to_vec(),
            Err(_) => vec![Stage::Received],
        };
        Self {
            id: context.id(),
            result: Err(error),
            headers: ResponseHeaders {
                process_state,
                ..ResponseHeaders::default()
            },
            plan: None,
            generation: None,
            stages,
            peer_operation: None,
        }
    }

    /// Check if the operation succeeded
    #[inline]
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }

    /// Last stage reached
    #[must_use]
    pub fn final_stage(&self) -> Stage {
        self.stages.last().copied().unwrap_or(Stage::Received)
    }

    /// Drop everything but the result
    ///
    /// # Errors
    /// Returns the terminal error
    pub fn into_result(self) -> OperationResult<ModelValue> {
        self.result
    }

    /// Serializable response
    #[must_use]
    pub fn response(&self) -> Response {
        let (result, failure_description, failure_kind) = match &self.result {
            Ok(value) => (Some(value.clone()), None, None),
            Err(error) => (None, Some(error.to_string()), Some(error.kind())),
        };
        Response {
            id: self.id,
            outcome: if self.is_success() { "success" } else { "failed" },
            result,
            failure_description,
            failure_kind,
            rolled_back: self.final_stage() == Stage::RolledBack,
            response_headers: self.headers,
            plan: self.plan.clone(),
            stages: self.stages.clone(),
        }
    }
}

/// Wire form of an [`OperationOutcome`]
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct Response {
    /// Operation id
    pub id: Uuid,
    /// `success` or `failed`
    pub outcome: &'static str,
    /// Result value
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<ModelValue>,
    /// Error message
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_description: Option<String>,
    /// Error classification
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_kind: Option<ErrorKind>,
    /// Whether changes were undone
    pub rolled_back: bool,
    /// Response headers
    pub response_headers: ResponseHeaders,
    /// Executed plan
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plan: Option<ReconciliationPlan>,
    /// Stages visited
    pub stages: Vec<Stage>,
}

#[derive(Debug, Default)]
struct Report {
    plan: Option<ReconciliationPlan>,
    generation: Option<u64>,
    requires_reload: bool,
}

/// Staged executor shared by every caller of one controller
#[derive(Debug)]
pub struct Pipeline {
    pub(crate) registry: Arc<Registry>,
    pub(crate) store: Arc<ModelStore>,
    pub(crate) reconciler: Arc<Reconciler>,
    pub(crate) process: Arc<ProcessStatus>,
    pub(crate) locks: LineageLocks,
    pub(crate) pool: WorkerPool,
    pub(crate) config: ControllerConfig,
}

impl Pipeline {
    /// Create pipeline; the process starts in `Starting`
    #[must_use]
    pub fn new(
        registry: Arc<Registry>,
        store: Arc<ModelStore>,
        reconciler: Arc<Reconciler>,
        config: ControllerConfig,
    ) -> Self {
        Self {
            registry,
            store,
            reconciler,
            process: Arc::new(ProcessStatus::default()),
            locks: LineageLocks::new(),
            pool: WorkerPool::new(config.worker_pool_size),
            config,
        }
    }

    /// Run one operation to a terminal stage
    pub async fn execute(&self, operation: Operation, options: &ExecuteOptions) -> OperationOutcome {
        let mut context = OperationContext::new();
        let mut report = Report::default();
        let span = info_span!(
            "operation",
            id = %context.id(),
            operation = %operation.kind(),
            address = %operation.address(),
        );
        let result = self
            .run(&mut context, &mut report, &operation, options)
            .instrument(span)
            .await;
        let headers = ResponseHeaders {
            operation_requires_reload: report.requires_reload,
            operation_requires_restart: result.as_ref().is_err_and(OperationError::is_fatal),
            process_state: self.process.get(),
        };
        OperationOutcome {
            id: context.id(),
            result,
            headers,
            plan: report.plan,
            generation: report.generation,
            stages: context.into_history(),
            peer_operation: None,
        }
    }

    async fn run(
        &self,
        cx: &mut OperationContext,
        report: &mut Report,
        operation: &Operation,
        options: &ExecuteOptions,
    ) -> OperationResult<ModelValue> {
        let read_only = match self
            .registry
            .validate_operation(operation)
            .and_then(|_| self.registry.is_read_only(operation))
        {
            Ok(read_only) => read_only,
            Err(error) => {
                debug!(%error, "operation rejected");
                cx.advance(Stage::Failed)?;
                return Err(error.into());
            }
        };
        if options.is_cancelled() {
            cx.advance(Stage::Failed)?;
            return Err(OperationError::Cancelled {
                stage: Stage::Received,
            });
        }
        if read_only {
            return self.read(cx, operation);
        }

        let _lineage = tokio::select! {
            guard = self.locks.acquire(operation.address().clone()) => guard,
            () = cancelled(options.cancel.as_ref()) => {
                cx.advance(Stage::Failed)?;
                return Err(OperationError::Cancelled { stage: Stage::Received });
            }
        };

        cx.advance(Stage::Model)?;
        let mut tx = self.store.begin();
        let prior = tx.working().clone();
        let result = match steps::run_steps(&self.registry, &mut tx, operation) {
            Ok(result) => result,
            Err(error) => return self.roll_back(cx, Some(tx), None, error).await,
        };
        if options.is_cancelled() {
            let error = OperationError::Cancelled { stage: Stage::Model };
            return self.roll_back(cx, Some(tx), None, error).await;
        }

        let changes = match steps::model_changes(&self.registry, tx.journal()) {
            Ok(changes) => changes,
            Err(error) => return self.roll_back(cx, Some(tx), None, error).await,
        };
        if changes.is_empty() || self.process.get() == ProcessState::Starting {
            return self.commit(cx, report, tx, None, result).await;
        }
        let timeout = options
            .timeout
            .unwrap_or_else(|| self.config.operation_timeout());
        let deadline = Instant::now() + timeout;
        let planned = tokio::select! {
            planned = self.reconciler.plan_locked(&changes, &prior, tx.working()) => {
                planned.map_err(OperationError::from)
            }
            () = tokio::time::sleep_until(deadline) => Err(OperationError::Timeout {
                stage: Stage::Model,
                after: timeout,
            }),
            () = cancelled(options.cancel.as_ref()) => Err(OperationError::Cancelled {
                stage: Stage::Model,
            }),
        };
        let (plan, _units) = match planned {
            Ok(locked) => locked.into_parts(),
            Err(error) => return self.roll_back(cx, Some(tx), None, error).await,
        };
        if plan.is_empty() {
            return self.commit(cx, report, tx, None, result).await;
        }
        if self.config.restart_policy == RestartPolicy::ReloadRequired
            && plan.strategy() > PlanStrategy::LiveUpdate
        {
            info!(strategy = ?plan.strategy(), "runtime left untouched until reload");
            let value = self.commit(cx, report, tx, None, result).await?;
            report.requires_reload = true;
            self.process.escalate(ProcessState::ReloadRequired);
            return Ok(value);
        }

        cx.advance(Stage::Runtime)?;
        let journal = Arc::new(AppliedJournal::new());
        let task = {
            let reconciler = Arc::clone(&self.reconciler);
            let journal = Arc::clone(&journal);
            let plan = plan.clone();
            self.pool
                .spawn(async move { reconciler.apply(&plan, &journal).await })
        };
        report.plan = Some(plan);
        if let Err(error) =
            supervise(task, deadline, timeout, options.cancel.as_ref(), Stage::Runtime).await
        {
            return self.roll_back(cx, Some(tx), Some(&journal), error).await;
        }

        cx.advance(Stage::Verify)?;
        let task = {
            let reconciler = Arc::clone(&self.reconciler);
            let applied = journal.snapshot();
            self.pool
                .spawn(async move { reconciler.verify(&applied).await })
        };
        if let Err(error) =
            supervise(task, deadline, timeout, options.cancel.as_ref(), Stage::Verify).await
        {
            return self.roll_back(cx, Some(tx), Some(&journal), error).await;
        }

        self.commit(cx, report, tx, Some(&journal), result).await
    }

    fn read(&self, cx: &mut OperationContext, operation: &Operation) -> OperationResult<ModelValue> {
        cx.advance(Stage::Model)?;
        let mut tx = self.store.begin();
        match steps::run_steps(&self.registry, &mut tx, operation) {
            Ok(value) => {
                cx.advance(Stage::Completed)?;
                Ok(value)
            }
            Err(error) => {
                cx.advance(Stage::RollingBack)?;
                cx.advance(Stage::RolledBack)?;
                Err(error)
            }
        }
    }

    async fn commit(
        &self,
        cx: &mut OperationContext,
        report: &mut Report,
        tx: ModelTransaction,
        journal: Option<&AppliedJournal>,
        result: ModelValue,
    ) -> OperationResult<ModelValue> {
        match self.store.commit(tx) {
            Ok(generation) => {
                report.generation = Some(generation);
                cx.advance(Stage::Completed)?;
                info!(generation, "operation completed");
                Ok(result)
            }
            // nothing was published; only the runtime needs undoing
            Err(error) => self.roll_back(cx, None, journal, error.into()).await,
        }
    }

    async fn roll_back(
        &self,
        cx: &mut OperationContext,
        tx: Option<ModelTransaction>,
        journal: Option<&AppliedJournal>,
        cause: OperationError,
    ) -> OperationResult<ModelValue> {
        cx.advance(Stage::RollingBack)?;
        warn!(error = %cause, "rolling back");
        if let Some(applied) = journal.map(AppliedJournal::take) {
            if !applied.is_empty() {
                // callers hold the plan's unit locks
                if let Err(error) = self.reconciler.revert_held(applied).await {
                    return self.inconsistent(cx, cause, error.into());
                }
            }
        }
        if let Some(tx) = tx {
            if let Err(error) = tx.rollback() {
                return self.inconsistent(cx, cause, error.into());
            }
        }
        cx.advance(Stage::RolledBack)?;
        Err(cause)
    }

    fn inconsistent(
        &self,
        cx: &mut OperationContext,
        cause: OperationError,
        rollback: RollbackError,
    ) -> OperationResult<ModelValue> {
        self.process.escalate(ProcessState::RestartRequired);
        error!(error = %cause, %rollback, "rollback failed, process restart required");
        cx.advance(Stage::Failed)?;
        Err(OperationError::inconsistent(cause, rollback))
    }
}

/// Wait for a stage task, aborting it on deadline or cancellation
///
/// An aborted task is awaited before returning so that its applied
/// journal is final.
async fn supervise(
    mut task: JoinHandle<OperationResult<RuntimeResult<()>>>,
    deadline: Instant,
    timeout: Duration,
    cancel: Option<&CancelToken>,
    stage: Stage,
) -> OperationResult<()> {
    let interrupted = tokio::select! {
        joined = &mut task => {
            return match joined {
                Ok(Ok(Ok(()))) => Ok(()),
                Ok(Ok(Err(error))) => Err(error.into()),
                Ok(Err(error)) => Err(error),
                Err(error) => Err(OperationError::WorkerFailed(error.to_string())),
            };
        }
        () = tokio::time::sleep_until(deadline) => OperationError::Timeout { stage, after: timeout },
        () = cancelled(cancel) => OperationError::Cancelled { stage },
    };
    task.abort();
    let _ = task.await;
    warn!(%stage, error = %interrupted, "stage interrupted");
    Err(interrupted)
}

async fn cancelled(token: Option<&CancelToken>) {
    match token {
        Some(token) => token.cancelled().await,
        None => futures::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn cancel_token_resolves_after_cancel() {
        let (handle, token) = CancelToken::pair();
        assert!(!token.is_cancelled());
        let waiter = tokio::spawn({
            let token = token.clone();
            async move { token.cancelled().await }
        });
        handle.cancel();
        waiter.await.unwrap();
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn dropped_handle_never_cancels() {
        let (handle, token) = CancelToken::pair();
        drop(handle);
        let waited =
            tokio::time::timeout(Duration::from_millis(20), token.cancelled()).await;
        assert!(waited.is_err());
    }

    #[test]
    fn rejected_outcome_serializes_failure() {
        let outcome = OperationOutcome::rejected(
            OperationError::OperationFailed("nope".into()),
            ProcessState::Running,
        );
        assert_eq!(outcome.stages, vec![Stage::Received, Stage::Failed]);
        let json = serde_json::to_value(outcome.response()).unwrap();
        assert_eq!(json["outcome"], "failed");
        assert_eq!(json["failure-kind"], "failed");
        assert_eq!(json["rolled-back"], false);
        assert_eq!(json["response-headers"]["process-state"], "running");
        assert!(json.get("result").is_none());
    }
}
