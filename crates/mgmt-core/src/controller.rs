//! Controller
//!
//! Front door of the control plane. Owns the pipeline, the version
//! transformer and the process lifecycle (boot, reload).

use crate::config::{ConfigError, ControllerConfig};
use crate::error::{OperationError, OperationResult};
use crate::peer::PeerTransport;
use crate::pipeline::{ExecuteOptions, OperationOutcome, Pipeline};
use crate::stage::ProcessState;
use mgmt_model::{
    Address, ExpressionResolver, ModelStore, ModelValue, ModelVersion, Operation, Registry,
    Resource,
};
use mgmt_runtime::{
    AppliedPlan, LiveUnitProvider, NoopProvider, ReconciliationPlan, Reconciler, RuntimeResult,
};
use mgmt_transform::{TransformationTable, TransformedOperation, VersionTransformer};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Builder for [`Controller`]
pub struct ControllerBuilder {
    registry: Arc<Registry>,
    provider: Arc<dyn LiveUnitProvider>,
    config: ControllerConfig,
    resolver: ExpressionResolver,
    table: TransformationTable,
    store: Option<Arc<ModelStore>>,
}

impl ControllerBuilder {
    /// Live-unit collaborator (default: [`NoopProvider`])
    #[must_use]
    pub fn provider(mut self, provider: Arc<dyn LiveUnitProvider>) -> Self {
        self.provider = provider;
        self
    }

    /// Configuration
    #[must_use]
    pub fn config(mut self, config: ControllerConfig) -> Self {
        self.config = config;
        self
    }

    /// Resolver for expressions in unit specs
    #[must_use]
    pub fn resolver(mut self, resolver: ExpressionResolver) -> Self {
        self.resolver = resolver;
        self
    }

    /// Rules for older peers
    #[must_use]
    pub fn transformations(mut self, table: TransformationTable) -> Self {
        self.table = table;
        self
    }

    /// Start from an existing store
    #[must_use]
    pub fn store(mut self, store: Arc<ModelStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Finish the controller
    ///
    /// # Errors
    /// Returns error if the configuration is invalid
    pub fn build(self) -> Result<Controller, ConfigError> {
        self.config.validate()?;
        let version = self
            .config
            .schema_version
            .unwrap_or_else(|| self.registry.version());
        let reconciler = Reconciler::new(Arc::clone(&self.registry), self.provider)
            .with_resolver(self.resolver);
        let pipeline = Pipeline::new(
            self.registry,
            self.store.unwrap_or_default(),
            Arc::new(reconciler),
            self.config,
        );
        Ok(Controller {
            pipeline: Arc::new(pipeline),
            transformer: Arc::new(VersionTransformer::new(version, self.table)),
        })
    }
}

/// Control plane entry point
///
/// Cheap to clone; clones share the model, runtime and locks.
#[derive(Debug, Clone)]
pub struct Controller {
    pipeline: Arc<Pipeline>,
    transformer: Arc<VersionTransformer>,
}

impl Controller {
    /// Start building a controller over `registry`
    #[must_use]
    pub fn builder(registry: Arc<Registry>) -> ControllerBuilder {
        ControllerBuilder {
            registry,
            provider: Arc::new(NoopProvider::default()),
            config: ControllerConfig::default(),
            resolver: ExpressionResolver::new(),
            table: TransformationTable::new(),
            store: None,
        }
    }

    /// Schema version reported to peers
    #[inline]
    #[must_use]
    pub fn version(&self) -> ModelVersion {
        self.transformer.current()
    }

    /// Registry
    #[inline]
    #[must_use]
    pub fn registry(&self) -> &Arc<Registry> {
        &self.pipeline.registry
    }

    /// Model store
    #[inline]
    #[must_use]
    pub fn store(&self) -> &Arc<ModelStore> {
        &self.pipeline.store
    }

    /// Reconciler and live service graph
    #[inline]
    #[must_use]
    pub fn reconciler(&self) -> &Arc<Reconciler> {
        &self.pipeline.reconciler
    }

    /// Configuration in use
    #[inline]
    #[must_use]
    pub fn config(&self) -> &ControllerConfig {
        &self.pipeline.config
    }

    /// Current process state
    #[must_use]
    pub fn process_state(&self) -> ProcessState {
        self.pipeline.process.get()
    }

    /// Structural copy of the committed model
    #[must_use]
    pub fn snapshot(&self) -> Resource {
        self.pipeline.store.snapshot()
    }

    /// Execute an operation with default options
    ///
    /// With a `peer` version the operation must also be expressible for
    /// that peer; if not, it fails with `VersionIncompatible` and nothing
    /// is mutated.
    pub async fn submit(&self, operation: Operation, peer: Option<ModelVersion>) -> OperationOutcome {
        self.submit_with(operation, peer, &ExecuteOptions::default())
            .await
    }

    /// Execute an operation with explicit options
    pub async fn submit_with(
        &self,
        operation: Operation,
        peer: Option<ModelVersion>,
        options: &ExecuteOptions,
    ) -> OperationOutcome {
        let peer_operation = match peer {
            Some(version) => match self.transform_for_peer(&operation, version) {
                Ok(transformed) => transformed.into_parts().0,
                Err(error) => {
                    warn!(%operation, peer = %version, %error, "operation rejected for peer");
                    return OperationOutcome::rejected(error, self.process_state());
                }
            },
            None => None,
        };
        let mut outcome = self.pipeline.execute(operation, options).await;
        if outcome.is_success() {
            outcome.peer_operation = peer_operation;
        }
        outcome
    }

    /// Rewrite an operation for a peer without executing it
    ///
    /// # Errors
    /// Returns `VersionIncompatible` if the peer cannot accept it
    pub fn transform_for_peer(
        &self,
        operation: &Operation,
        peer: ModelVersion,
    ) -> OperationResult<TransformedOperation> {
        Ok(self.transformer.transform_operation(operation, peer)?)
    }

    /// Execute an operation on a peer through `transport`
    ///
    /// The operation is rewritten for the peer and the peer's result is
    /// mapped back. An operation discarded for the peer returns undefined
    /// without contacting it.
    ///
    /// # Errors
    /// Returns `VersionIncompatible` or `Peer`
    pub async fn forward(
        &self,
        operation: &Operation,
        peer: ModelVersion,
        transport: &dyn PeerTransport,
    ) -> OperationResult<ModelValue> {
        let (transformed, results) = self.transform_for_peer(operation, peer)?.into_parts();
        let Some(transformed) = transformed else {
            debug!(%operation, peer = %peer, "operation discarded for peer");
            return Ok(ModelValue::Undefined);
        };
        let raw = transport
            .execute(transformed)
            .await
            .map_err(|e| OperationError::Peer(e.to_string()))?;
        Ok(results.transform(raw))
    }

    /// Committed model rewritten for a peer
    ///
    /// # Errors
    /// Returns `VersionIncompatible` if the model uses a resource type the
    /// peer lacks
    pub fn snapshot_for_peer(&self, peer: ModelVersion) -> OperationResult<Resource> {
        Ok(self.transformer.transform_resource(&self.snapshot(), peer)?)
    }

    /// Apply boot operations, then start every unit in dependency order
    ///
    /// Boot operations touch the model only; a failed one is reported in
    /// its outcome and boot continues. The process is `Running` once the
    /// whole service graph is up.
    ///
    /// # Errors
    /// Returns `InvalidProcessState` unless the process is `Starting`, or
    /// the reconciliation error if the service graph cannot be started
    pub async fn boot(&self, operations: Vec<Operation>) -> OperationResult<Vec<OperationOutcome>> {
        let state = self.process_state();
        if state != ProcessState::Starting {
            return Err(OperationError::InvalidProcessState(state));
        }
        let options = ExecuteOptions::default();
        let mut outcomes = Vec::with_capacity(operations.len());
        for operation in operations {
            let outcome = self.pipeline.execute(operation, &options).await;
            if let Err(error) = &outcome.result {
                warn!(%error, "boot operation failed");
            }
            outcomes.push(outcome);
        }

        let _lineage = self.pipeline.locks.acquire(Address::root()).await;
        let plan = self.reconciler().plan_full(&self.snapshot())?;
        self.start(&plan).await?;
        self.pipeline.process.settle();
        info!(
            operations = outcomes.len(),
            units = self.reconciler().graph().len(),
            "boot complete"
        );
        Ok(outcomes)
    }

    /// Rebuild the runtime from the committed model
    ///
    /// Waits for in-flight writers, uninstalls every unit, then installs
    /// the model's units again. Clears `ReloadRequired`.
    ///
    /// # Errors
    /// Returns `InvalidProcessState` while booting, or `InconsistentState`
    /// if the runtime could not be rebuilt
    pub async fn reload(&self) -> OperationResult<ReconciliationPlan> {
        let state = self.process_state();
        if state == ProcessState::Starting {
            return Err(OperationError::InvalidProcessState(state));
        }
        let _lineage = self.pipeline.locks.acquire(Address::root()).await;
        info!(%state, "reloading runtime");
        let reconciler = self.reconciler();

        let rebuilt: RuntimeResult<ReconciliationPlan> = async {
            let teardown = reconciler.plan_teardown()?;
            reconciler
                .execute(&teardown)
                .await
                .map_err(|failure| failure.error)?;
            let plan = reconciler.plan_full(&self.snapshot())?;
            self.start(&plan).await?;
            Ok(plan)
        }
        .await;

        match rebuilt {
            Ok(plan) => {
                let state = self.pipeline.process.settle();
                info!(%state, units = reconciler.graph().len(), "reload complete");
                Ok(plan)
            }
            Err(error) => {
                self.pipeline.process.escalate(ProcessState::RestartRequired);
                error!(%error, "reload failed, process restart required");
                Err(OperationError::inconsistent(
                    OperationError::Reconciliation(error.clone()),
                    error,
                ))
            }
        }
    }

    /// Refuse further RUNTIME work; running stages finish
    pub fn shutdown(&self) {
        self.pipeline.pool.close();
        info!("controller shut down");
    }

    // Execute and verify a full plan, reverting on failure
    async fn start(&self, plan: &ReconciliationPlan) -> RuntimeResult<()> {
        let reconciler = self.reconciler();
        let applied = match reconciler.execute(plan).await {
            Ok(applied) => applied,
            Err(failure) => {
                self.undo(failure.applied).await;
                return Err(failure.error);
            }
        };
        if let Err(error) = reconciler.verify(&applied).await {
            self.undo(applied).await;
            return Err(error);
        }
        Ok(())
    }

    async fn undo(&self, applied: AppliedPlan) {
        if let Err(error) = self.reconciler().revert(applied).await {
            self.pipeline.process.escalate(ProcessState::RestartRequired);
            error!(%error, "could not undo partial start");
        }
    }
}
