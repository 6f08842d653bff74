//! Snapshot persistence and schema normalization

use mgmt_model::{
    Address, AttributeDefinition, ModelStore, ModelValue, ModelVersion, PathElement,
    PersistenceError, Registry, Resource, ResourceType, Validator, ValueType,
};
use pretty_assertions::assert_eq;
use proptest::prelude::*;

fn addr(s: &str) -> Address {
    s.parse().unwrap()
}

fn registry() -> Registry {
    let cache = ResourceType::builder(PathElement::wildcard("cache"))
        .attribute(
            AttributeDefinition::builder("owners", ValueType::Int)
                .default_value(2)
                .validator(Validator::Range { min: 1, max: 256 })
                .allow_expression()
                .build()
                .unwrap(),
        )
        .attribute(
            AttributeDefinition::builder("mode", ValueType::String)
                .default_value("SYNC")
                .validator(Validator::allowed(["SYNC", "ASYNC"]))
                .build()
                .unwrap(),
        )
        .build()
        .unwrap();
    let container = ResourceType::builder(PathElement::wildcard("container"))
        .attribute(
            AttributeDefinition::builder("default-cache", ValueType::String)
                .build()
                .unwrap(),
        )
        .child(cache)
        .build()
        .unwrap();
    Registry::new(
        ResourceType::root_builder().child(container).build().unwrap(),
        ModelVersion::new(2, 0, 0),
    )
}

fn populated() -> ModelStore {
    let store = ModelStore::new();
    let mut tx = store.begin();
    tx.create_resource(Resource::with_attributes(
        addr("/container=bar"),
        [("default-cache".to_string(), ModelValue::from("foo"))],
    ))
    .unwrap();
    tx.create_resource(Resource::with_attributes(
        addr("/container=bar/cache=foo"),
        [
            ("owners".to_string(), ModelValue::Int(3)),
            ("mode".to_string(), ModelValue::from("ASYNC")),
        ],
    ))
    .unwrap();
    store.commit(tx).unwrap();
    store
}

#[test]
fn exported_snapshot_restores_identically() {
    let store = populated();
    let json = store.export_json().unwrap();

    let restored = ModelStore::new();
    restored.restore_json(&json, &registry()).unwrap();
    assert_eq!(restored.snapshot(), store.snapshot());
    assert_eq!(restored.generation(), 1);
}

#[test]
fn restore_fills_defaults_and_coerces_types() {
    let json = serde_json::json!({
        "address": "/",
        "children": {
            "container": {
                "bar": {
                    "address": "/container=bar",
                    "children": {
                        "cache": {
                            "foo": {
                                "address": "/container=bar/cache=foo",
                                "attributes": { "owners": "4" }
                            }
                        }
                    }
                }
            }
        }
    });
    let store = ModelStore::new();
    store.restore_json(&json.to_string(), &registry()).unwrap();
    let cache = store.read_resource(&addr("/container=bar/cache=foo")).unwrap();
    assert_eq!(cache.attribute("owners"), ModelValue::Int(4));
    assert_eq!(cache.attribute("mode"), ModelValue::from("SYNC"));
}

#[test]
fn restore_rejects_what_the_schema_does_not_allow() {
    let registry = registry();
    let store = populated();
    let mut json: serde_json::Value = serde_json::from_str(&store.export_json().unwrap()).unwrap();
    let cache = &mut json["children"]["container"]["bar"]["children"]["cache"]["foo"];
    cache["attributes"]["owners"] = serde_json::json!(0);
    let err = ModelStore::new()
        .restore_json(&json.to_string(), &registry)
        .unwrap_err();
    assert!(matches!(err, PersistenceError::Model(_)), "{err}");

    let mut json: serde_json::Value = serde_json::from_str(&store.export_json().unwrap()).unwrap();
    json["children"]["container"]["bar"]["attributes"]["unknown"] = serde_json::json!(true);
    assert!(matches!(
        ModelStore::new().restore_json(&json.to_string(), &registry),
        Err(PersistenceError::Model(_))
    ));

    let misplaced = serde_json::json!({
        "address": "/",
        "children": { "container": { "bar": { "address": "/other=x/container=bar" } } }
    });
    assert!(matches!(
        ModelStore::new().restore_json(&misplaced.to_string(), &registry),
        Err(PersistenceError::Structure(_))
    ));

    assert!(matches!(
        ModelStore::new().restore_json("{", &registry),
        Err(PersistenceError::Json(_))
    ));
}

#[test]
fn failed_restore_keeps_the_current_tree() {
    let store = populated();
    let before = store.snapshot();
    let bad = serde_json::json!({ "address": "/container=bar" });
    assert!(store.restore_json(&bad.to_string(), &registry()).is_err());
    assert_eq!(store.snapshot(), before);
}

#[test]
fn disjoint_transactions_both_commit() {
    let store = populated();
    let mut first = store.begin();
    let mut second = store.begin();
    first
        .create_resource(Resource::new(addr("/container=bar/cache=one")))
        .unwrap();
    second
        .create_resource(Resource::new(addr("/container=qux")))
        .unwrap();
    store.commit(first).unwrap();
    assert_eq!(store.commit(second).unwrap(), 3);

    let snapshot = store.snapshot();
    assert!(snapshot.descendant(addr("/container=bar/cache=one").elements()).is_some());
    assert!(snapshot.descendant(addr("/container=qux").elements()).is_some());
}

proptest! {
    #[test]
    fn normalization_is_idempotent(raw in prop_oneof![
        (-10i64..300).prop_map(ModelValue::Long),
        (-10i32..300).prop_map(|n| ModelValue::String(n.to_string())),
        Just(ModelValue::expression("${cache.owners:2}")),
        Just(ModelValue::Undefined),
    ]) {
        let registry = registry();
        let owners = registry
            .resolve(&addr("/container=bar/cache=foo"))
            .unwrap()
            .attribute("owners")
            .unwrap();
        if let Ok(normalized) = owners.validate_and_normalize(Some(&raw)) {
            prop_assert_eq!(owners.validate_and_normalize(Some(&normalized)), Ok(normalized));
        }
    }

    #[test]
    fn addresses_print_and_parse_back(
        path in prop::collection::vec(("[a-z][a-z-]{0,7}", "[a-z0-9_.]{1,8}"), 0..5)
    ) {
        let address = Address::new(
            path.iter().map(|(k, v)| PathElement::new(k.as_str(), v.as_str())).collect(),
        )
        .unwrap();
        let parsed: Address = address.to_string().parse().unwrap();
        prop_assert_eq!(parsed, address);
    }
}
