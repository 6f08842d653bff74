//! Version Transformation
//!
//! Rewrites operations, resources and results between the current schema
//! version and older peers, driven entirely by a [`TransformationTable`].
//!
//! # Core Concepts
//!
//! - [`VersionRange`]: peer versions a row applies to
//! - [`AttributeRule`]: `(pattern, attribute, versions, action)` row
//! - [`VersionTransformer`]: applies the table to an [`Operation`](mgmt_model::Operation)
//!   or [`Resource`](mgmt_model::Resource)
//! - [`ResultTransformer`]: maps the peer's response back
//!
//! # Example
//!
//! ```rust,ignore
//! use mgmt_transform::{AttributeAction, TransformationTable, VersionRange, VersionTransformer};
//!
//! let table = TransformationTable::new().attribute(
//!     &cache_pattern,
//!     "statistics-enabled",
//!     VersionRange::up_to(ModelVersion::new(1, 4, 0)),
//!     AttributeAction::DiscardIfDefault(ModelValue::Boolean(true)),
//! );
//! let transformer = VersionTransformer::new(ModelVersion::new(2, 0, 0), table);
//! let transformed = transformer.transform_operation(&op, ModelVersion::new(1, 4, 0))?;
//! ```

pub mod error;
pub mod range;
pub mod result;
pub mod rule;
pub mod table;
pub mod transformer;

pub use error::{TransformError, TransformResult};
pub use mgmt_model::ModelVersion;
pub use range::VersionRange;
pub use result::ResultTransformer;
pub use rule::{
    AttributeAction, AttributeRule, ChildRejection, Converter, OperationRejection, Phase, Rejection,
};
pub use table::TransformationTable;
pub use transformer::{TransformedOperation, VersionTransformer};
