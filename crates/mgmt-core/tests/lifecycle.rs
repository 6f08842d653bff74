//! Boot, reload and restart policy

mod common;

use common::{bar, booted, controller, foo, pool, read};
use mgmt_cache::cache_address;
use mgmt_core::{Controller, ControllerConfig, OperationError, ProcessState, RestartPolicy, Stage};
use mgmt_model::{ModelStore, ModelValue, Operation};
use mgmt_runtime::UnitMode;
use mgmt_test_utils::{add_cache, boot_operations, registry, RecordingProvider};
use pretty_assertions::assert_eq;
use std::sync::Arc;

#[tokio::test]
async fn boot_starts_units_in_dependency_order() {
    let (controller, provider) = controller(ControllerConfig::default());
    assert_eq!(controller.process_state(), ProcessState::Starting);

    let outcomes = controller.boot(boot_operations()).await.unwrap();
    assert_eq!(outcomes.len(), 4);
    assert!(outcomes.iter().all(|o| o.plan.is_none()));
    assert_eq!(controller.process_state(), ProcessState::Running);

    let events = provider.events();
    assert_eq!(events.len(), 3);
    assert_eq!(events.last().map(String::as_str), Some("install container.bar.cache.foo"));
    assert_eq!(provider.running(&bar()).unwrap().mode, UnitMode::Active);
    assert_eq!(provider.running(&foo()).unwrap().mode, UnitMode::OnDemand);
    let cache = provider.running(&foo()).unwrap();
    assert!(cache.depends_on.iter().any(|d| d.as_str() == "thread-pool.default"));
}

#[tokio::test]
async fn boot_continues_past_failed_operations() {
    let (controller, _provider) = controller(ControllerConfig::default());
    let mut operations = vec![add_cache("missing", "orphan")];
    operations.extend(boot_operations());
    let outcomes = controller.boot(operations).await.unwrap();
    assert!(!outcomes[0].is_success());
    assert!(outcomes[1..].iter().all(|o| o.is_success()));
    assert_eq!(controller.process_state(), ProcessState::Running);
}

#[tokio::test]
async fn boot_runs_once() {
    let (controller, _provider) = booted(ControllerConfig::default()).await;
    let err = controller.boot(Vec::new()).await.unwrap_err();
    assert_eq!(err, OperationError::InvalidProcessState(ProcessState::Running));
}

#[tokio::test]
async fn failed_boot_reports_the_reconciliation_error() {
    let (controller, provider) = controller(ControllerConfig::default());
    provider.fail_install(&foo());
    let err = controller.boot(boot_operations()).await.unwrap_err();
    assert!(matches!(err, OperationError::Reconciliation(_)));
    assert_eq!(provider.running_count(), 0);
}

#[tokio::test]
async fn operations_before_boot_touch_the_model_only() {
    let (controller, provider) = controller(ControllerConfig::default());
    for operation in boot_operations() {
        let outcome = controller.submit(operation, None).await;
        assert!(outcome.is_success());
        assert_eq!(
            outcome.stages,
            vec![Stage::Received, Stage::Model, Stage::Completed]
        );
    }
    assert!(provider.events().is_empty());
    controller.boot(Vec::new()).await.unwrap();
    assert_eq!(provider.running_count(), 3);
}

#[tokio::test]
async fn reload_required_policy_defers_restarts() {
    let config = ControllerConfig::default().with_restart_policy(RestartPolicy::ReloadRequired);
    let (controller, provider) = booted(config).await;

    let outcome = controller
        .submit(Operation::write_attribute(foo(), "mode", "ASYNC"), None)
        .await;
    assert!(outcome.is_success());
    assert!(outcome.headers.operation_requires_reload);
    assert_eq!(outcome.headers.process_state, ProcessState::ReloadRequired);
    assert_eq!(
        outcome.stages,
        vec![Stage::Received, Stage::Model, Stage::Completed]
    );
    assert!(provider.events().is_empty());
    assert_eq!(read(&controller, foo(), "mode").await, ModelValue::from("ASYNC"));
    assert_eq!(
        provider.running(&foo()).unwrap().values.get("mode"),
        Some(&ModelValue::from("SYNC"))
    );

    // in-place updates still reach the runtime
    let live = controller
        .submit(Operation::write_attribute(foo(), "max-entries", ModelValue::Long(7)), None)
        .await;
    assert!(live.is_success());
    assert!(!live.headers.operation_requires_reload);
    assert_eq!(provider.events(), vec!["update container.bar.cache.foo max-entries"]);

    let json = serde_json::to_value(outcome.response()).unwrap();
    assert_eq!(json["response-headers"]["operation-requires-reload"], true);
    assert_eq!(json["response-headers"]["process-state"], "reload-required");

    provider.clear();
    let plan = controller.reload().await.unwrap();
    assert_eq!(plan.actions().len(), 3);
    assert_eq!(controller.process_state(), ProcessState::Running);
    assert_eq!(provider.events_matching("uninstall").len(), 3);
    assert_eq!(provider.events_matching("install").len(), 3);
    assert_eq!(
        provider.running(&foo()).unwrap().values.get("mode"),
        Some(&ModelValue::from("ASYNC"))
    );
}

#[tokio::test]
async fn failed_reload_requires_a_restart() {
    let (controller, provider) = booted(ControllerConfig::default()).await;
    provider.fail_install(&pool());
    let err = controller.reload().await.unwrap_err();
    assert!(err.is_fatal());
    assert_eq!(controller.process_state(), ProcessState::RestartRequired);

    provider.heal();
    controller.reload().await.unwrap();
    // a restart requirement is never cleared by a reload
    assert_eq!(controller.process_state(), ProcessState::RestartRequired);
}

#[tokio::test]
async fn reload_before_boot_is_refused() {
    let (controller, _provider) = controller(ControllerConfig::default());
    assert_eq!(
        controller.reload().await.unwrap_err(),
        OperationError::InvalidProcessState(ProcessState::Starting)
    );
}

#[tokio::test]
async fn persisted_model_boots_the_same_runtime() {
    let (controller, _provider) = booted(ControllerConfig::default()).await;
    assert!(controller
        .submit(add_cache("bar", "second"), None)
        .await
        .is_success());
    let json = controller.store().export_json().unwrap();

    let registry = registry();
    let store = Arc::new(ModelStore::new());
    store.restore_json(&json, &registry).unwrap();
    let provider = RecordingProvider::new();
    let restored = Controller::builder(registry)
        .provider(provider.clone())
        .store(store)
        .build()
        .unwrap();
    restored.boot(Vec::new()).await.unwrap();

    assert_eq!(restored.snapshot(), controller.snapshot());
    assert_eq!(provider.running_count(), 4);
    assert!(provider.running(&cache_address("bar", "second")).is_some());
}

#[test]
fn invalid_config_is_refused_at_build() {
    let result = Controller::builder(registry())
        .config(ControllerConfig::default().with_worker_pool_size(0))
        .build();
    assert!(result.is_err());
}
