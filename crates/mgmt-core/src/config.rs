//! Controller configuration
//!
//! Loaded from TOML; every field has a default so an empty file is valid.
//!
//! ```toml
//! worker-pool-size = 8
//! operation-timeout-ms = 30000
//! restart-policy = "reload-required"
//! schema-version = "2.0.0"
//! ```

use mgmt_model::ModelVersion;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// What to do with changes that need a service restart
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RestartPolicy {
    /// Restart affected units as part of the operation
    #[default]
    Immediate,
    /// Commit to the model only and flag the process for reload
    ReloadRequired,
}

/// Controller settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case", deny_unknown_fields)]
pub struct ControllerConfig {
    /// Concurrent RUNTIME/VERIFY stages
    pub worker_pool_size: usize,

    /// Default time allowed for RUNTIME plus VERIFY, in milliseconds
    pub operation_timeout_ms: u64,

    /// Handling of restart-requiring changes
    pub restart_policy: RestartPolicy,

    /// Version reported to peers; the registry's version when unset
    pub schema_version: Option<ModelVersion>,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            worker_pool_size: 4,
            operation_timeout_ms: 30_000,
            restart_policy: RestartPolicy::Immediate,
            schema_version: None,
        }
    }
}

impl ControllerConfig {
    /// Set worker pool size
    #[must_use]
    pub fn with_worker_pool_size(mut self, size: usize) -> Self {
        self.worker_pool_size = size;
        self
    }

    /// Set default operation timeout
    #[must_use]
    pub fn with_operation_timeout(mut self, timeout: Duration) -> Self {
        self.operation_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Set restart policy
    #[must_use]
    pub fn with_restart_policy(mut self, policy: RestartPolicy) -> Self {
        self.restart_policy = policy;
        self
    }

    /// Set reported schema version
    #[must_use]
    pub fn with_schema_version(mut self, version: ModelVersion) -> Self {
        self.schema_version = Some(version);
        self
    }

    /// Default operation timeout
    #[inline]
    #[must_use]
    pub fn operation_timeout(&self) -> Duration {
        Duration::from_millis(self.operation_timeout_ms)
    }

    /// Parse and validate TOML
    ///
    /// # Errors
    /// Returns error if the TOML is malformed or a value is out of range
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(input)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file
    ///
    /// # Errors
    /// Returns error if the file cannot be read or is invalid
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let input = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&input)
    }

    /// Check value ranges
    ///
    /// # Errors
    /// Returns `Invalid` naming the first bad field
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.worker_pool_size == 0 {
            return Err(ConfigError::Invalid(
                "worker-pool-size must be at least 1".to_string(),
            ));
        }
        if self.operation_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "operation-timeout-ms must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Configuration loading errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// File could not be read
    #[error("cannot read configuration: {0}")]
    Io(#[from] std::io::Error),

    /// TOML did not parse
    #[error("malformed configuration: {0}")]
    Parse(#[from] toml::de::Error),

    /// Value out of range
    #[error("invalid configuration: {0}")]
    Invalid(String),
}
