//! # Coordination Configuration
//!
//! Typed configuration for the router, coordinator, and approval workflow.
//! Defaults are always valid; `from_env` and `from_file` layer overrides on
//! top of them and validate the result before it is used anywhere.
//!
//! Environment overrides use the `AVATAR_CORE` prefix with `__` as the
//! nesting separator, e.g. `AVATAR_CORE__COORDINATOR__HEARTBEAT_TIMEOUT_MS=5000`.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::constants::system;
use crate::coordination::AssignmentStrategy;
use crate::error::{CoordinationError, Result};

/// Root configuration for the coordination core
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CoordinationConfig {
    /// Message router settings
    #[serde(default)]
    pub router: RouterConfig,

    /// Task coordinator settings
    #[serde(default)]
    pub coordinator: CoordinatorConfig,

    /// Approval workflow settings
    #[serde(default)]
    pub approval: ApprovalConfig,
}

/// Message router configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterConfig {
    /// Maximum number of messages retained in the delivery history
    pub history_capacity: usize,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            history_capacity: system::DEFAULT_HISTORY_CAPACITY,
        }
    }
}

/// Task coordinator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    /// Heartbeat timeout in milliseconds; the sweep runs at half this interval
    pub heartbeat_timeout_ms: u64,

    /// Worker selection strategy used by the dispatch loop
    pub strategy: AssignmentStrategy,

    /// Maximum number of registered workers
    pub max_workers: usize,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            heartbeat_timeout_ms: system::DEFAULT_HEARTBEAT_TIMEOUT_MS,
            strategy: AssignmentStrategy::RoundRobin,
            max_workers: 1000,
        }
    }
}

/// Approval workflow configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalConfig {
    /// Interval between expiration sweep ticks in milliseconds
    pub expiration_sweep_interval_ms: u64,

    /// TTL applied to requests created without an explicit expiration;
    /// `None` means such requests never expire
    pub default_ttl_ms: Option<u64>,

    /// Age past which terminal requests become eligible for purging, in milliseconds
    pub retention_ms: u64,
}

impl Default for ApprovalConfig {
    fn default() -> Self {
        Self {
            expiration_sweep_interval_ms: 1000,
            default_ttl_ms: None,
            retention_ms: 3_600_000, // 1 hour
        }
    }
}

impl CoordinationConfig {
    /// Load configuration from defaults overlaid with environment variables
    pub fn from_env() -> Result<Self> {
        let config = config::Config::builder()
            .add_source(config::Config::try_from(&CoordinationConfig::default())?)
            .add_source(
                config::Environment::with_prefix("AVATAR_CORE")
                    .prefix_separator("__")
                    .separator("__"),
            )
            .build()?;

        let loaded: CoordinationConfig = config.try_deserialize()?;
        loaded.validate()?;
        Ok(loaded)
    }

    /// Load configuration from a file (YAML/TOML/JSON by extension),
    /// with environment variables taking precedence over file values
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let config = config::Config::builder()
            .add_source(config::Config::try_from(&CoordinationConfig::default())?)
            .add_source(config::File::from(path))
            .add_source(
                config::Environment::with_prefix("AVATAR_CORE")
                    .prefix_separator("__")
                    .separator("__"),
            )
            .build()?;

        let loaded: CoordinationConfig = config.try_deserialize()?;
        loaded.validate()?;
        Ok(loaded)
    }

    /// Reject configurations that would stall a component
    pub fn validate(&self) -> Result<()> {
        if self.router.history_capacity == 0 {
            return Err(CoordinationError::configuration(
                "router.history_capacity must be greater than 0",
            ));
        }
        if self.coordinator.heartbeat_timeout_ms == 0 {
            return Err(CoordinationError::configuration(
                "coordinator.heartbeat_timeout_ms must be greater than 0",
            ));
        }
        if self.coordinator.max_workers == 0 {
            return Err(CoordinationError::configuration(
                "coordinator.max_workers must be greater than 0",
            ));
        }
        if self.approval.expiration_sweep_interval_ms == 0 {
            return Err(CoordinationError::configuration(
                "approval.expiration_sweep_interval_ms must be greater than 0",
            ));
        }
        Ok(())
    }
}
