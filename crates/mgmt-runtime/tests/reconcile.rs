//! Planning, execution and revert against a recording provider

use mgmt_model::{
    Address, AttributeDefinition, ExpressionResolver, ModelStore, ModelValue, ModelVersion,
    PathElement, Registry, Resource, ResourceReference, ResourceType, RestartImpact,
    RuntimeBinding, ValueType,
};
use mgmt_runtime::{
    AppliedJournal, ModelChange, PlanAction, PlanStrategy, Reconciler, RuntimeError, UnitMode,
    UnitName,
};
use mgmt_test_utils::RecordingProvider;
use pretty_assertions::assert_eq;
use std::sync::Arc;
use std::time::Duration;

fn attr(name: &str, ty: ValueType, impact: RestartImpact) -> AttributeDefinition {
    AttributeDefinition::builder(name, ty)
        .restart_impact(impact)
        .allow_expression()
        .build()
        .unwrap()
}

fn registry() -> Arc<Registry> {
    let executor = ResourceType::builder(PathElement::wildcard("executor"))
        .attribute(attr("max-threads", ValueType::Int, RestartImpact::ResourceServices))
        .runtime(RuntimeBinding::unit())
        .build()
        .unwrap();
    let transport = ResourceType::builder(PathElement::new("transport", "jgroups"))
        .attribute(attr("stack", ValueType::String, RestartImpact::AllServices))
        .attribute(attr("lock-timeout", ValueType::Long, RestartImpact::None))
        .runtime(RuntimeBinding::Parent)
        .build()
        .unwrap();
    let cache = ResourceType::builder(PathElement::wildcard("cache"))
        .attribute(attr("mode", ValueType::String, RestartImpact::AllServices))
        .attribute(attr("start", ValueType::String, RestartImpact::ResourceServices))
        .attribute(attr("max-entries", ValueType::Long, RestartImpact::None))
        .attribute(
            AttributeDefinition::builder("executor", ValueType::String)
                .reference(ResourceReference::Root {
                    key: "executor".into(),
                })
                .restart_impact(RestartImpact::ResourceServices)
                .build()
                .unwrap(),
        )
        .attribute(
            AttributeDefinition::builder("backup-of", ValueType::String)
                .reference(ResourceReference::Sibling { key: "cache".into() })
                .restart_impact(RestartImpact::ResourceServices)
                .build()
                .unwrap(),
        )
        .runtime(RuntimeBinding::Unit {
            mode_attribute: Some("start".into()),
        })
        .build()
        .unwrap();
    let container = ResourceType::builder(PathElement::wildcard("container"))
        .attribute(attr("statistics-enabled", ValueType::Boolean, RestartImpact::None))
        .attribute(attr("default-cache", ValueType::String, RestartImpact::AllServices))
        .child(transport)
        .child(cache)
        .runtime(RuntimeBinding::unit())
        .build()
        .unwrap();
    let root = ResourceType::root_builder()
        .child(executor)
        .child(container)
        .build()
        .unwrap();
    Arc::new(Registry::new(root, ModelVersion::new(2, 0, 0)))
}

fn addr(s: &str) -> Address {
    s.parse().unwrap()
}

fn unit(s: &str) -> UnitName {
    UnitName::from_address(&addr(s))
}

fn add(store: &ModelStore, address: &str, attributes: &[(&str, ModelValue)]) {
    let mut tx = store.begin();
    tx.create_resource(Resource::with_attributes(
        addr(address),
        attributes
            .iter()
            .map(|(k, v)| ((*k).to_string(), v.clone())),
    ))
    .unwrap();
    store.commit(tx).unwrap();
}

fn set(store: &ModelStore, address: &str, name: &str, value: ModelValue) {
    let mut tx = store.begin();
    tx.update_attribute(&addr(address), name, value).unwrap();
    store.commit(tx).unwrap();
}

/// Model with one container holding two caches (qux is a backup of foo),
/// all installed
async fn booted() -> (ModelStore, Reconciler, Arc<RecordingProvider>) {
    let store = ModelStore::new();
    add(&store, "/executor=pool", &[]);
    add(&store, "/container=bar", &[]);
    add(
        &store,
        "/container=bar/cache=foo",
        &[("executor", "pool".into()), ("mode", "SYNC".into())],
    );
    add(
        &store,
        "/container=bar/cache=qux",
        &[("backup-of", "foo".into())],
    );
    let recorder = RecordingProvider::new();
    let reconciler = Reconciler::new(registry(), recorder.clone());
    let plan = reconciler.plan_full(&store.snapshot()).unwrap();
    reconciler.execute(&plan).await.unwrap();
    recorder.clear();
    (store, reconciler, recorder)
}

#[tokio::test]
async fn full_install_respects_dependencies() {
    let (_, reconciler, _) = booted().await;
    assert_eq!(
        reconciler.graph().start_order().unwrap().len(),
        4,
        "executor, container and both caches"
    );
    let foo = reconciler.graph().get(&unit("/container=bar/cache=foo")).unwrap();
    let expected: Vec<UnitName> = vec![unit("/container=bar"), unit("/executor=pool")];
    assert_eq!(foo.spec.depends_on.into_iter().collect::<Vec<_>>(), expected);
    assert_eq!(
        reconciler.graph().dependents(&unit("/container=bar/cache=foo")),
        vec![unit("/container=bar/cache=qux")]
    );
}

#[tokio::test]
async fn added_resource_installs_with_dependencies() {
    let (store, reconciler, recorder) = booted().await;
    let prior = store.snapshot();
    add(&store, "/container=bar/cache=new", &[("executor", "pool".into())]);
    let plan = reconciler
        .plan(
            &[ModelChange::added(addr("/container=bar/cache=new"))],
            &prior,
            &store.snapshot(),
        )
        .unwrap();
    assert_eq!(plan.strategy(), PlanStrategy::Install);
    assert_eq!(plan.install_count(), 1);
    reconciler.execute(&plan).await.unwrap();
    assert_eq!(recorder.events(), vec!["install container.bar.cache.new"]);
}

#[tokio::test]
async fn missing_dependency_is_rejected() {
    let (store, reconciler, _) = booted().await;
    let prior = store.snapshot();
    add(&store, "/container=bar/cache=new", &[("executor", "absent".into())]);
    let err = reconciler
        .plan(
            &[ModelChange::added(addr("/container=bar/cache=new"))],
            &prior,
            &store.snapshot(),
        )
        .unwrap_err();
    assert_eq!(
        err,
        RuntimeError::MissingDependency {
            unit: unit("/container=bar/cache=new"),
            dependency: unit("/executor=absent"),
        }
    );
}

#[tokio::test]
async fn none_impact_is_live_update() {
    let (store, reconciler, recorder) = booted().await;
    let prior = store.snapshot();
    set(&store, "/container=bar/cache=foo", "max-entries", ModelValue::Long(1000));
    let plan = reconciler
        .plan(
            &[ModelChange::modified(
                addr("/container=bar/cache=foo"),
                [("max-entries", RestartImpact::None)],
            )],
            &prior,
            &store.snapshot(),
        )
        .unwrap();
    assert_eq!(plan.strategy(), PlanStrategy::LiveUpdate);
    assert_eq!(plan.uninstall_count(), 0);
    assert_eq!(
        plan.actions(),
        &[PlanAction::Update {
            unit: unit("/container=bar/cache=foo"),
            values: [("max-entries".to_string(), ModelValue::Long(1000))]
                .into_iter()
                .collect(),
        }]
    );
    reconciler.execute(&plan).await.unwrap();
    assert_eq!(
        recorder.events(),
        vec!["update container.bar.cache.foo max-entries"]
    );
}

#[tokio::test]
async fn all_services_restarts_dependents() {
    let (store, reconciler, recorder) = booted().await;
    let prior = store.snapshot();
    set(&store, "/container=bar/cache=foo", "mode", "ASYNC".into());
    let plan = reconciler
        .plan(
            &[ModelChange::modified(
                addr("/container=bar/cache=foo"),
                [("mode", RestartImpact::AllServices)],
            )],
            &prior,
            &store.snapshot(),
        )
        .unwrap();
    assert_eq!(plan.strategy(), PlanStrategy::RestartDependents);
    reconciler.execute(&plan).await.unwrap();
    assert_eq!(
        recorder.events(),
        vec![
            "uninstall container.bar.cache.qux",
            "uninstall container.bar.cache.foo",
            "install container.bar.cache.foo",
            "install container.bar.cache.qux",
        ]
    );
    let foo = reconciler.graph().get(&unit("/container=bar/cache=foo")).unwrap();
    assert_eq!(foo.spec.values.get("mode"), Some(&ModelValue::from("ASYNC")));
}

#[tokio::test]
async fn resource_services_restarts_unit_only() {
    let (store, reconciler, recorder) = booted().await;
    let prior = store.snapshot();
    set(&store, "/executor=pool", "max-threads", ModelValue::Int(8));
    let plan = reconciler
        .plan(
            &[ModelChange::modified(
                addr("/executor=pool"),
                [("max-threads", RestartImpact::ResourceServices)],
            )],
            &prior,
            &store.snapshot(),
        )
        .unwrap();
    assert_eq!(plan.strategy(), PlanStrategy::RestartUnit);
    reconciler.execute(&plan).await.unwrap();
    assert_eq!(
        recorder.events(),
        vec!["uninstall executor.pool", "install executor.pool"]
    );
}

#[tokio::test]
async fn remove_uninstalls_subtree_dependents_first() {
    let (store, reconciler, recorder) = booted().await;
    let prior = store.snapshot();
    let mut tx = store.begin();
    tx.remove_resource(&addr("/container=bar")).unwrap();
    store.commit(tx).unwrap();

    let changes = [
        ModelChange::removed(addr("/container=bar/cache=qux")),
        ModelChange::removed(addr("/container=bar/cache=foo")),
        ModelChange::removed(addr("/container=bar")),
    ];
    let plan = reconciler
        .plan(&changes, &prior, &store.snapshot())
        .unwrap();
    assert_eq!(plan.uninstall_count(), 3);
    reconciler.execute(&plan).await.unwrap();
    assert_eq!(
        recorder.events(),
        vec![
            "uninstall container.bar.cache.qux",
            "uninstall container.bar.cache.foo",
            "uninstall container.bar",
        ]
    );
    assert_eq!(reconciler.graph().names(), vec![unit("/executor=pool")]);
}

#[tokio::test]
async fn parent_bound_child_reconciles_owner() {
    let (store, reconciler, recorder) = booted().await;
    let prior = store.snapshot();
    add(
        &store,
        "/container=bar/transport=jgroups",
        &[("lock-timeout", ModelValue::Long(100))],
    );
    let mid = store.snapshot();
    let plan = reconciler
        .plan(
            &[ModelChange::added(addr("/container=bar/transport=jgroups"))],
            &prior,
            &mid,
        )
        .unwrap();
    assert_eq!(plan.strategy(), PlanStrategy::RestartDependents);
    reconciler.execute(&plan).await.unwrap();
    let container = reconciler.graph().get(&unit("/container=bar")).unwrap();
    assert_eq!(
        container.spec.values.get("transport"),
        Some(&ModelValue::object([(
            "jgroups",
            ModelValue::object([("lock-timeout", ModelValue::Long(100))])
        )]))
    );

    recorder.clear();
    set(
        &store,
        "/container=bar/transport=jgroups",
        "lock-timeout",
        ModelValue::Long(200),
    );
    let plan = reconciler
        .plan(
            &[ModelChange::modified(
                addr("/container=bar/transport=jgroups"),
                [("lock-timeout", RestartImpact::None)],
            )],
            &mid,
            &store.snapshot(),
        )
        .unwrap();
    reconciler.execute(&plan).await.unwrap();
    assert_eq!(recorder.events(), vec!["update container.bar transport"]);
}

#[tokio::test]
async fn expressions_resolve_when_building_specs() {
    let store = ModelStore::new();
    add(&store, "/container=bar", &[]);
    add(
        &store,
        "/container=bar/cache=foo",
        &[
            ("start", ModelValue::expression("${cache.start:LAZY}")),
            ("max-entries", ModelValue::expression("${cache.size}")),
        ],
    );
    let recorder = RecordingProvider::new();
    let reconciler = Reconciler::new(registry(), recorder.clone())
        .with_resolver(ExpressionResolver::new().with_property("cache.size", "42"));
    let spec = reconciler
        .build_spec(&store.snapshot(), &addr("/container=bar/cache=foo"))
        .unwrap();
    assert_eq!(spec.mode, UnitMode::OnDemand);
    assert_eq!(spec.values.get("max-entries"), Some(&ModelValue::Long(42)));

    let unresolved = Reconciler::new(registry(), recorder)
        .build_spec(&store.snapshot(), &addr("/container=bar/cache=foo"))
        .unwrap_err();
    assert!(matches!(unresolved, RuntimeError::Expression { .. }));
}

#[tokio::test]
async fn failed_execution_reverts_cleanly() {
    let (store, reconciler, recorder) = booted().await;
    recorder.fail_install(&addr("/container=bar/cache=qux"));
    let prior = store.snapshot();
    set(&store, "/container=bar/cache=foo", "mode", "ASYNC".into());
    let plan = reconciler
        .plan(
            &[ModelChange::modified(
                addr("/container=bar/cache=foo"),
                [("mode", RestartImpact::AllServices)],
            )],
            &prior,
            &store.snapshot(),
        )
        .unwrap();
    let failure = reconciler.execute(&plan).await.unwrap_err();
    assert!(matches!(failure.error, RuntimeError::LiveUnit { action: "install", .. }));
    assert_eq!(failure.applied.actions().len(), 3);

    recorder.heal();
    reconciler.revert(failure.applied).await.unwrap();
    let names = reconciler.graph().names();
    assert_eq!(names.len(), 4);
    let foo = reconciler.graph().get(&unit("/container=bar/cache=foo")).unwrap();
    assert_eq!(foo.spec.values.get("mode"), Some(&ModelValue::from("SYNC")));
}

#[tokio::test]
async fn verify_reports_units_that_fail_to_start() {
    let (store, reconciler, recorder) = booted().await;
    recorder.fail_ready(&addr("/container=bar/cache=new"));
    let prior = store.snapshot();
    add(&store, "/container=bar/cache=new", &[]);
    let plan = reconciler
        .plan(
            &[ModelChange::added(addr("/container=bar/cache=new"))],
            &prior,
            &store.snapshot(),
        )
        .unwrap();
    let applied = reconciler.execute(&plan).await.unwrap();
    let err = reconciler.verify(&applied).await.unwrap_err();
    assert!(matches!(err, RuntimeError::LiveUnit { action: "start", .. }));
}

#[tokio::test]
async fn stale_removal_keeps_a_unit_that_gained_dependents() {
    let (store, reconciler, recorder) = booted().await;
    let empty = store.snapshot();
    add(&store, "/executor=spare", &[]);
    let with_spare = store.snapshot();
    let plan = reconciler
        .plan(&[ModelChange::added(addr("/executor=spare"))], &empty, &with_spare)
        .unwrap();
    reconciler.execute(&plan).await.unwrap();

    let removal = reconciler
        .plan(&[ModelChange::removed(addr("/executor=spare"))], &with_spare, &with_spare)
        .unwrap();
    assert_eq!(removal.uninstall_count(), 1);

    add(&store, "/container=bar/cache=new", &[("executor", "spare".into())]);
    let plan = reconciler
        .plan(
            &[ModelChange::added(addr("/container=bar/cache=new"))],
            &with_spare,
            &store.snapshot(),
        )
        .unwrap();
    reconciler.execute(&plan).await.unwrap();
    recorder.clear();

    let failure = reconciler.execute(&removal).await.unwrap_err();
    assert_eq!(
        failure.error,
        RuntimeError::StillRequired {
            unit: unit("/executor=spare"),
            dependent: unit("/container=bar/cache=new"),
        }
    );
    assert!(failure.applied.is_empty());
    assert!(recorder.events().is_empty());
    assert!(reconciler.graph().contains(&unit("/executor=spare")));
}

#[tokio::test]
async fn locked_plan_includes_dependents_installed_while_waiting() {
    let (store, reconciler, recorder) = booted().await;
    let reconciler = Arc::new(reconciler);
    let prior = store.snapshot();
    add(&store, "/container=bar/cache=new", &[("executor", "pool".into())]);
    let with_new = store.snapshot();
    let install = reconciler
        .plan(&[ModelChange::added(addr("/container=bar/cache=new"))], &prior, &with_new)
        .unwrap();

    recorder.hold();
    let installing = tokio::spawn({
        let reconciler = Arc::clone(&reconciler);
        async move { reconciler.execute(&install).await }
    });
    recorder.wait_parked(1).await;

    set(&store, "/container=bar", "default-cache", "foo".into());
    let changes = [ModelChange::modified(
        addr("/container=bar"),
        [("default-cache", RestartImpact::AllServices)],
    )];
    let after = store.snapshot();
    let planning = tokio::spawn({
        let reconciler = Arc::clone(&reconciler);
        async move { reconciler.plan_locked(&changes, &with_new, &after).await }
    });
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!planning.is_finished());

    recorder.release();
    installing.await.unwrap().unwrap();
    let (plan, locks) = planning.await.unwrap().unwrap().into_parts();
    assert!(plan.actions().contains(&PlanAction::Uninstall {
        unit: unit("/container=bar/cache=new"),
    }));
    assert!(plan.units().is_subset(locks.units()));

    reconciler.apply(&plan, &AppliedJournal::new()).await.unwrap();
    drop(locks);
    assert_eq!(reconciler.graph().len(), 5);
    assert!(reconciler
        .graph()
        .dependents(&unit("/executor=pool"))
        .contains(&unit("/container=bar/cache=new")));
}
