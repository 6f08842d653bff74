//! Management Core
//!
//! Staged operation pipeline and controller for the management model.
//!
//! # Core Concepts
//!
//! - [`Controller`]: entry point; `(Operation, optional peer version)` in,
//!   [`OperationOutcome`] out
//! - [`Pipeline`]: `RECEIVED -> MODEL -> RUNTIME -> VERIFY -> COMPLETED`
//!   with rollback through `ROLLING_BACK`
//! - [`LineageLocks`]: FIFO serialization of ancestor/descendant writers
//! - [`WorkerPool`]: bounded RUNTIME/VERIFY concurrency
//! - [`ProcessState`]: starting, running, reload-required, restart-required
//!
//! # Example
//!
//! ```rust,ignore
//! use mgmt_core::Controller;
//!
//! let controller = Controller::builder(registry).provider(provider).build()?;
//! controller.boot(Vec::new()).await?;
//! let outcome = controller.submit(Operation::add(address, attributes), None).await;
//! assert!(outcome.is_success());
//! ```

pub mod config;
pub mod context;
pub mod controller;
pub mod error;
pub mod locks;
pub mod peer;
pub mod pipeline;
pub mod pool;
pub mod stage;
mod steps;

pub use config::{ConfigError, ControllerConfig, RestartPolicy};
pub use context::OperationContext;
pub use controller::{Controller, ControllerBuilder};
pub use error::{ErrorKind, OperationError, OperationResult, RollbackError};
pub use locks::{LineageGuard, LineageLocks};
pub use peer::{PeerError, PeerTransport};
pub use pipeline::{
    CancelHandle, CancelToken, ExecuteOptions, OperationOutcome, Pipeline, Response,
    ResponseHeaders,
};
pub use pool::WorkerPool;
pub use stage::{allowed_transitions, validate_transition, ProcessState, ProcessStatus, Stage};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
