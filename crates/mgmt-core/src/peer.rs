//! Peer transport seam
//!
//! Operations for an older peer are rewritten by the controller and handed
//! to a [`PeerTransport`]; its response is mapped back before the caller
//! sees it.

use async_trait::async_trait;
use mgmt_model::{ModelValue, Operation};

/// Error reported by a peer transport
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct PeerError(pub String);

impl PeerError {
    /// Create error from a message
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Delivers an already transformed operation to a peer
#[async_trait]
pub trait PeerTransport: Send + Sync {
    /// Execute on the peer and return its raw result
    async fn execute(&self, operation: Operation) -> Result<ModelValue, PeerError>;
}
