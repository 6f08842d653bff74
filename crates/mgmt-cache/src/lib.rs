//! Cache Subsystem Model
//!
//! Reference schema managed by the control plane: cache containers with
//! their caches, transport and thread pools, the container alias
//! operations, and the rows needed to talk to 1.3 and 1.4 peers.
//!
//! # Example
//!
//! ```rust,ignore
//! use mgmt_cache::{cache_address, legacy, schema};
//!
//! let registry = Arc::new(schema::registry()?);
//! let controller = Controller::builder(registry)
//!     .transformations(legacy::transformations())
//!     .build()?;
//! controller
//!     .submit(Operation::add(cache_address("bar", "foo"), [("max-entries", ModelValue::Long(1000))]), None)
//!     .await;
//! ```

pub mod alias;
pub mod legacy;
pub mod schema;

pub use alias::{AddAlias, RemoveAlias};
pub use legacy::{transformations, VERSION_1_3, VERSION_1_4};
pub use schema::{registry, CURRENT_VERSION};

use mgmt_model::Address;

/// `/container={container}`
#[must_use]
pub fn container_address(container: &str) -> Address {
    Address::root().child("container", container)
}

/// `/container={container}/cache={cache}`
#[must_use]
pub fn cache_address(container: &str, cache: &str) -> Address {
    container_address(container).child("cache", cache)
}

/// `/thread-pool={name}`
#[must_use]
pub fn thread_pool_address(name: &str) -> Address {
    Address::root().child("thread-pool", name)
}

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
