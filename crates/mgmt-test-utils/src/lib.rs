//! Testing utilities for the management workspace
//!
//! Instrumented live-unit provider and cache-model fixtures.

#![allow(missing_docs)]

use async_trait::async_trait;
use mgmt_cache::{cache_address, container_address, thread_pool_address};
use mgmt_model::{Address, ModelValue, Operation, Registry};
use mgmt_runtime::{LiveUnitError, LiveUnitProvider, UnitHandle, UnitName, UnitSpec};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Provider that records every call and fails on request
///
/// Events read `install <unit>`, `update <unit> <keys>` and
/// `uninstall <unit>`.
#[derive(Debug)]
pub struct RecordingProvider {
    next: AtomicU64,
    events: Mutex<Vec<String>>,
    handles: Mutex<BTreeMap<u64, UnitName>>,
    specs: Mutex<BTreeMap<UnitName, UnitSpec>>,
    fail_install: Mutex<HashSet<String>>,
    fail_ready: Mutex<HashSet<String>>,
    fail_uninstall: Mutex<HashSet<String>>,
    install_delay: Mutex<Option<Duration>>,
    gate: watch::Sender<bool>,
    waiting: AtomicUsize,
}

impl Default for RecordingProvider {
    fn default() -> Self {
        Self {
            next: AtomicU64::new(1),
            events: Mutex::default(),
            handles: Mutex::default(),
            specs: Mutex::default(),
            fail_install: Mutex::default(),
            fail_ready: Mutex::default(),
            fail_uninstall: Mutex::default(),
            install_delay: Mutex::default(),
            gate: watch::Sender::new(true),
            waiting: AtomicUsize::new(0),
        }
    }
}

impl RecordingProvider {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().clone()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }

    /// Events starting with `prefix`
    pub fn events_matching(&self, prefix: &str) -> Vec<String> {
        self.events
            .lock()
            .iter()
            .filter(|e| e.starts_with(prefix))
            .cloned()
            .collect()
    }

    /// Spec of the running unit for `address`
    pub fn running(&self, address: &Address) -> Option<UnitSpec> {
        self.specs.lock().get(&UnitName::from_address(address)).cloned()
    }

    pub fn running_count(&self) -> usize {
        self.specs.lock().len()
    }

    pub fn fail_install(&self, address: &Address) {
        self.fail_install.lock().insert(unit(address));
    }

    pub fn fail_ready(&self, address: &Address) {
        self.fail_ready.lock().insert(unit(address));
    }

    pub fn fail_uninstall(&self, address: &Address) {
        self.fail_uninstall.lock().insert(unit(address));
    }

    pub fn heal(&self) {
        self.fail_install.lock().clear();
        self.fail_ready.lock().clear();
        self.fail_uninstall.lock().clear();
    }

    pub fn set_install_delay(&self, delay: Option<Duration>) {
        *self.install_delay.lock() = delay;
    }

    /// Park every install until [`Self::release`]
    pub fn hold(&self) {
        self.gate.send_replace(false);
    }

    pub fn release(&self) {
        self.gate.send_replace(true);
    }

    /// Installs currently parked by [`Self::hold`]
    pub fn parked(&self) -> usize {
        self.waiting.load(Ordering::SeqCst)
    }

    /// Poll until `count` installs are parked
    pub async fn wait_parked(&self, count: usize) {
        while self.parked() < count {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    }

    fn name(&self, handle: UnitHandle) -> UnitName {
        self.handles
            .lock()
            .get(&handle.id())
            .cloned()
            .unwrap_or_else(|| UnitName::from_address(&Address::root()))
    }

    fn record(&self, event: String) {
        self.events.lock().push(event);
    }
}

struct Parked<'a>(&'a AtomicUsize);

impl<'a> Parked<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for Parked<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

fn unit(address: &Address) -> String {
    UnitName::from_address(address).as_str().to_string()
}

#[async_trait]
impl LiveUnitProvider for RecordingProvider {
    async fn install(&self, spec: &UnitSpec) -> Result<UnitHandle, LiveUnitError> {
        let mut gate = self.gate.subscribe();
        if !*gate.borrow() {
            let _parked = Parked::enter(&self.waiting);
            let _ = gate.wait_for(|open| *open).await;
        }
        let delay = *self.install_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_install.lock().contains(spec.name.as_str()) {
            return Err(LiveUnitError::new(format!("{} refused to install", spec.name)));
        }
        let id = self.next.fetch_add(1, Ordering::Relaxed);
        self.handles.lock().insert(id, spec.name.clone());
        self.specs.lock().insert(spec.name.clone(), spec.clone());
        self.record(format!("install {}", spec.name));
        Ok(UnitHandle::new(id))
    }

    async fn update(
        &self,
        handle: UnitHandle,
        values: &BTreeMap<String, ModelValue>,
    ) -> Result<(), LiveUnitError> {
        let name = self.name(handle);
        if let Some(spec) = self.specs.lock().get_mut(&name) {
            spec.values
                .extend(values.iter().map(|(k, v)| (k.clone(), v.clone())));
        }
        let keys: Vec<&str> = values.keys().map(String::as_str).collect();
        self.record(format!("update {name} {}", keys.join(",")));
        Ok(())
    }

    async fn uninstall(&self, handle: UnitHandle) -> Result<(), LiveUnitError> {
        let name = self.name(handle);
        if self.fail_uninstall.lock().contains(name.as_str()) {
            return Err(LiveUnitError::new(format!("{name} refused to stop")));
        }
        self.specs.lock().remove(&name);
        self.record(format!("uninstall {name}"));
        Ok(())
    }

    async fn await_ready(&self, handle: UnitHandle) -> Result<(), LiveUnitError> {
        let name = self.name(handle);
        if self.fail_ready.lock().contains(name.as_str()) {
            return Err(LiveUnitError::new(format!("{name} failed to start")));
        }
        Ok(())
    }
}

pub fn registry() -> Arc<Registry> {
    Arc::new(mgmt_cache::registry().unwrap())
}

/// Thread pool `default`, container `bar` with its transport, and cache
/// `foo` running on the pool
pub fn boot_operations() -> Vec<Operation> {
    vec![
        Operation::add(
            thread_pool_address("default"),
            [("max-threads", ModelValue::Int(4))],
        ),
        Operation::add(container_address("bar"), [("start", ModelValue::from("EAGER"))]),
        Operation::add(
            container_address("bar").child("transport", "jgroups"),
            [("stack", ModelValue::from("tcp"))],
        ),
        Operation::add(
            cache_address("bar", "foo"),
            [
                ("executor", ModelValue::from("default")),
                ("max-entries", ModelValue::Long(1000)),
            ],
        ),
    ]
}

pub fn add_cache(container: &str, name: &str) -> Operation {
    Operation::add(cache_address(container, name), Vec::<(String, ModelValue)>::new())
}

pub fn unit_name(address: &Address) -> String {
    unit(address)
}

/// Route `tracing` output through the test harness
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
