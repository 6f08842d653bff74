#![allow(dead_code)]

use mgmt_cache::{cache_address, container_address, thread_pool_address};
use mgmt_core::{Controller, ControllerConfig};
use mgmt_model::{Address, ModelValue, Operation};
use mgmt_test_utils::{boot_operations, init_tracing, registry, RecordingProvider};
use std::sync::Arc;

pub fn foo() -> Address {
    cache_address("bar", "foo")
}

pub fn bar() -> Address {
    container_address("bar")
}

pub fn pool() -> Address {
    thread_pool_address("default")
}

pub fn controller(config: ControllerConfig) -> (Controller, Arc<RecordingProvider>) {
    init_tracing();
    let provider = RecordingProvider::new();
    let controller = Controller::builder(registry())
        .provider(provider.clone())
        .config(config)
        .transformations(mgmt_cache::transformations())
        .build()
        .unwrap();
    (controller, provider)
}

/// Controller booted with the standard fixture; provider events cleared
pub async fn booted(config: ControllerConfig) -> (Controller, Arc<RecordingProvider>) {
    let (controller, provider) = controller(config);
    let outcomes = controller.boot(boot_operations()).await.unwrap();
    assert!(outcomes.iter().all(|o| o.is_success()));
    provider.clear();
    (controller, provider)
}

pub async fn read(controller: &Controller, address: Address, name: &str) -> ModelValue {
    controller
        .submit(Operation::read_attribute(address, name), None)
        .await
        .into_result()
        .unwrap()
}
