//! Error types for version transformation

use crate::rule::Rejection;
use mgmt_model::{Address, ModelVersion};

/// Operation or resource has no representation in the peer version
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransformError {
    /// Attribute value cannot be expressed for the peer
    #[error("attribute {attribute} of {address} cannot be sent to version {version}: {reason}")]
    Attribute {
        address: Address,
        attribute: String,
        version: ModelVersion,
        reason: Rejection,
    },

    /// Resource type does not exist in the peer version
    #[error("resource {address} does not exist in version {version}")]
    Resource {
        address: Address,
        version: ModelVersion,
    },

    /// Custom operation does not exist in the peer version
    #[error("operation {operation} on {address} does not exist in version {version}")]
    Operation {
        address: Address,
        operation: String,
        version: ModelVersion,
    },
}

impl TransformError {
    /// Address the rejection is about
    #[must_use]
    pub fn address(&self) -> &Address {
        match self {
            Self::Attribute { address, .. }
            | Self::Resource { address, .. }
            | Self::Operation { address, .. } => address,
        }
    }
}

/// Result type for transformation
pub type TransformResult<T> = Result<T, TransformError>;
