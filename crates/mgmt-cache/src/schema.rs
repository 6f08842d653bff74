//! Cache-container resource types
//!
//! ```text
//! /
//! ├── thread-pool=*                 unit
//! └── container=*                   unit, start mode `start`
//!     ├── transport=jgroups         feeds the container unit
//!     └── cache=*                   unit, start mode `start`
//!         └── backup=*              feeds the cache unit
//! ```

use crate::alias::{AddAlias, RemoveAlias};
use mgmt_model::{
    AttributeDefinition, ModelVersion, OperationDefinition, PathElement, Registry,
    ResourceReference, ResourceType, RestartImpact, RuntimeBinding, SchemaError, Validator,
    ValueType,
};
use std::sync::Arc;

/// Schema version of this model
pub const CURRENT_VERSION: ModelVersion = ModelVersion::new(2, 0, 0);

/// Name of the start mode attribute on containers and caches
pub const START: &str = "start";

/// Build the registry
///
/// # Errors
/// Returns error if a definition is inconsistent
pub fn registry() -> Result<Registry, SchemaError> {
    let root = ResourceType::root_builder()
        .description("Cache subsystem")
        .child(thread_pool()?)
        .child(container()?)
        .build()?;
    Ok(Registry::new(root, CURRENT_VERSION))
}

fn start_mode() -> Result<AttributeDefinition, SchemaError> {
    AttributeDefinition::builder(START, ValueType::String)
        .default_value("LAZY")
        .validator(Validator::allowed(["EAGER", "LAZY"]))
        .restart_impact(RestartImpact::ResourceServices)
        .description("EAGER starts with the process, LAZY on first use")
        .build()
}

fn statistics_enabled() -> Result<AttributeDefinition, SchemaError> {
    AttributeDefinition::builder("statistics-enabled", ValueType::Boolean)
        .default_value(true)
        .allow_expression()
        .description("Collect runtime statistics")
        .build()
}

fn thread_pool() -> Result<ResourceType, SchemaError> {
    ResourceType::builder(PathElement::wildcard("thread-pool"))
        .description("Shared executor")
        .attribute(
            AttributeDefinition::builder("max-threads", ValueType::Int)
                .default_value(10_i32)
                .allow_expression()
                .validator(Validator::Range { min: 1, max: 1024 })
                .restart_impact(RestartImpact::AllServices)
                .build()?,
        )
        .attribute(
            AttributeDefinition::builder("keepalive-time", ValueType::Long)
                .default_value(60_000_i64)
                .allow_expression()
                .validator(Validator::Range {
                    min: 0,
                    max: i64::MAX,
                })
                .description("Idle thread lifetime in milliseconds")
                .build()?,
        )
        .runtime(RuntimeBinding::unit())
        .build()
}

fn container() -> Result<ResourceType, SchemaError> {
    ResourceType::builder(PathElement::wildcard("container"))
        .description("Cache container")
        .attribute(
            AttributeDefinition::builder("default-cache", ValueType::String)
                .description("Cache used when none is named")
                .build()?,
        )
        .attribute(
            AttributeDefinition::builder("aliases", ValueType::list_of(ValueType::String))
                .description("Alternative container names")
                .build()?,
        )
        .attribute(start_mode()?)
        .attribute(statistics_enabled()?)
        .attribute(
            AttributeDefinition::builder("module", ValueType::String)
                .default_value("org.example.cache")
                .validator(Validator::MinLength(1))
                .restart_impact(RestartImpact::ResourceServices)
                .build()?,
        )
        .operation(
            OperationDefinition::new("add-alias", Arc::new(AddAlias))
                .parameter(alias_name()?)
                .description("Add a name to the container's aliases"),
        )
        .operation(
            OperationDefinition::new("remove-alias", Arc::new(RemoveAlias))
                .parameter(alias_name()?)
                .description("Remove a name from the container's aliases"),
        )
        .child(transport()?)
        .child(cache()?)
        .runtime(RuntimeBinding::Unit {
            mode_attribute: Some(START.to_string()),
        })
        .build()
}

fn alias_name() -> Result<AttributeDefinition, SchemaError> {
    AttributeDefinition::builder("name", ValueType::String)
        .required()
        .validator(Validator::MinLength(1))
        .build()
}

fn transport() -> Result<ResourceType, SchemaError> {
    ResourceType::builder(PathElement::new("transport", "jgroups"))
        .description("Cluster transport of the container")
        .attribute(
            AttributeDefinition::builder("stack", ValueType::String)
                .default_value("udp")
                .allow_expression()
                .restart_impact(RestartImpact::AllServices)
                .build()?,
        )
        .attribute(
            AttributeDefinition::builder("cluster", ValueType::String)
                .allow_expression()
                .restart_impact(RestartImpact::AllServices)
                .build()?,
        )
        .attribute(
            AttributeDefinition::builder("lock-timeout", ValueType::Long)
                .default_value(240_000_i64)
                .allow_expression()
                .build()?,
        )
        .runtime(RuntimeBinding::Parent)
        .build()
}

fn cache() -> Result<ResourceType, SchemaError> {
    ResourceType::builder(PathElement::wildcard("cache"))
        .description("Cache")
        .attribute(start_mode()?)
        .attribute(
            AttributeDefinition::builder("mode", ValueType::String)
                .default_value("SYNC")
                .validator(Validator::allowed(["SYNC", "ASYNC"]))
                .restart_impact(RestartImpact::AllServices)
                .description("Replication mode")
                .build()?,
        )
        .attribute(
            AttributeDefinition::builder("owners", ValueType::Int)
                .default_value(2_i32)
                .allow_expression()
                .validator(Validator::Range { min: 1, max: 256 })
                .restart_impact(RestartImpact::ResourceServices)
                .description("Copies of each entry")
                .build()?,
        )
        .attribute(
            AttributeDefinition::builder("segments", ValueType::Int)
                .default_value(256_i32)
                .allow_expression()
                .validator(Validator::Range { min: 1, max: 65_536 })
                .restart_impact(RestartImpact::ResourceServices)
                .description("Hash space partitions")
                .build()?,
        )
        .attribute(
            AttributeDefinition::builder("max-entries", ValueType::Long)
                .default_value(-1_i64)
                .allow_expression()
                .description("Eviction threshold, -1 for unbounded")
                .build()?,
        )
        .attribute(statistics_enabled()?)
        .attribute(
            AttributeDefinition::builder("indexing-properties", ValueType::list_of(ValueType::String))
                .restart_impact(RestartImpact::ResourceServices)
                .description("Query index settings as key=value pairs")
                .build()?,
        )
        .attribute(
            AttributeDefinition::builder("executor", ValueType::String)
                .reference(ResourceReference::Root {
                    key: "thread-pool".to_string(),
                })
                .restart_impact(RestartImpact::AllServices)
                .description("Thread pool running cache tasks")
                .build()?,
        )
        .child(backup()?)
        .runtime(RuntimeBinding::Unit {
            mode_attribute: Some(START.to_string()),
        })
        .build()
}

fn backup() -> Result<ResourceType, SchemaError> {
    ResourceType::builder(PathElement::wildcard("backup"))
        .description("Cross-site backup of a cache")
        .attribute(
            AttributeDefinition::builder("strategy", ValueType::String)
                .default_value("ASYNC")
                .validator(Validator::allowed(["SYNC", "ASYNC"]))
                .restart_impact(RestartImpact::ResourceServices)
                .build()?,
        )
        .attribute(
            AttributeDefinition::builder("enabled", ValueType::Boolean)
                .default_value(true)
                .build()?,
        )
        .runtime(RuntimeBinding::Parent)
        .build()
}
