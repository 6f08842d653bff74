//! Transformation tables for older peers
//!
//! | peer      | differences                                                    |
//! |-----------|----------------------------------------------------------------|
//! | 1.3.x     | `virtual-nodes` instead of `segments` (6 segments per node),   |
//! |           | no `indexing-properties`, no expressions on sizing attributes, |
//! |           | no backups, no alias operations                                |
//! | <= 1.4.x  | no `statistics-enabled` (always on)                            |

use mgmt_model::{AddressPattern, ModelValue, ModelVersion, PathElement};
use mgmt_transform::{AttributeAction, Converter, TransformationTable, VersionRange};

/// Oldest supported peer line
pub const VERSION_1_3: ModelVersion = ModelVersion::new(1, 3, 0);

/// Peer line before statistics became configurable
pub const VERSION_1_4: ModelVersion = ModelVersion::new(1, 4, 0);

/// Segments per 1.3 virtual node
pub const SEGMENTS_PER_VIRTUAL_NODE: i64 = 6;

// Every micro release of a minor line
fn line(version: ModelVersion) -> VersionRange {
    VersionRange::up_to(ModelVersion::new(version.major(), version.minor(), u32::MAX))
}

fn container() -> AddressPattern {
    AddressPattern::root().child(PathElement::wildcard("container"))
}

fn cache() -> AddressPattern {
    container().child(PathElement::wildcard("cache"))
}

fn transport() -> AddressPattern {
    container().child(PathElement::new("transport", "jgroups"))
}

fn thread_pool() -> AddressPattern {
    AddressPattern::root().child(PathElement::wildcard("thread-pool"))
}

/// Every legacy row
#[must_use]
pub fn transformations() -> TransformationTable {
    statistics_rows().merge(version_1_3_rows())
}

fn statistics_rows() -> TransformationTable {
    let versions = line(VERSION_1_4);
    let mut table = TransformationTable::new();
    for pattern in [container(), cache()] {
        table = table
            .attribute(
                &pattern,
                "statistics-enabled",
                versions,
                AttributeAction::DiscardIfDefault(ModelValue::Boolean(true)),
            )
            .attribute(
                &pattern,
                "statistics-enabled",
                versions,
                AttributeAction::DiscardIfUndefined,
            )
            .attribute(
                &pattern,
                "statistics-enabled",
                versions,
                AttributeAction::RejectExpression,
            )
            .attribute(
                &pattern,
                "statistics-enabled",
                versions,
                AttributeAction::RejectValue(ModelValue::Boolean(false)),
            );
    }
    table
}

fn version_1_3_rows() -> TransformationTable {
    let versions = line(VERSION_1_3);
    let cache = cache();
    TransformationTable::new()
        .attribute(&cache, "segments", versions, AttributeAction::DiscardIfUndefined)
        .attribute(&cache, "segments", versions, AttributeAction::RejectExpression)
        .attribute(
            &cache,
            "segments",
            versions,
            AttributeAction::Convert(Converter::scale(
                "segments-to-virtual-nodes",
                SEGMENTS_PER_VIRTUAL_NODE,
            )),
        )
        .attribute(
            &cache,
            "segments",
            versions,
            AttributeAction::Rename("virtual-nodes".to_string()),
        )
        .attribute(
            &cache,
            "indexing-properties",
            versions,
            AttributeAction::DiscardIfUndefined,
        )
        .attribute(
            &cache,
            "indexing-properties",
            versions,
            AttributeAction::RejectIfDefined,
        )
        .attributes(
            &cache,
            &["owners", "max-entries"],
            versions,
            &AttributeAction::RejectExpression,
        )
        .attributes(
            &transport(),
            &["stack", "cluster", "lock-timeout"],
            versions,
            &AttributeAction::RejectExpression,
        )
        .attributes(
            &thread_pool(),
            &["max-threads", "keepalive-time"],
            versions,
            &AttributeAction::RejectExpression,
        )
        .reject_child(&cache, "backup", versions)
        .reject_operation(&container(), "add-alias", versions)
        .reject_operation(&container(), "remove-alias", versions)
}
