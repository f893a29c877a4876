//! # Migration Runner Configuration
//!
//! Layered configuration for the batched migration runner. Values come from
//! `config/batched_migrations.yaml`, an optional per-environment override file,
//! `BATCHED_MIGRATIONS__*` environment variables and finally `DATABASE_URL`.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use batched_migrations::config::ConfigManager;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = ConfigManager::load()?;
//! let sub_batch_size = manager.config().batching.sub_batch_size;
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod loader;

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::constants::{
    DEFAULT_ACQUIRE_TIMEOUT_SECONDS, DEFAULT_PAUSE_MS, DEFAULT_POOL_SIZE, DEFAULT_SUB_BATCH_SIZE,
    INDEX_ROW_SIZE_EXCEEDED_SQLSTATE,
};

pub use error::{ConfigResult, ConfigurationError};
pub use loader::ConfigManager;

/// Root configuration structure mirroring batched_migrations.yaml
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct MigrationConfig {
    /// Database connection and pooling
    pub database: DatabaseConfig,

    /// Default sub-batching parameters for job descriptors
    pub batching: BatchingConfig,

    /// SQLSTATE codes treated as row-scoped faults
    pub row_faults: RowFaultConfig,

    /// Log level and output format
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
    pub pool: u32,
    pub acquire_timeout_seconds: u64,
    /// Applied with `SET LOCAL` to every sub-batch transaction; `None` keeps the server default
    pub statement_timeout_ms: Option<u64>,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "postgresql://localhost/batched_migrations_development".to_string(),
            pool: DEFAULT_POOL_SIZE,
            acquire_timeout_seconds: DEFAULT_ACQUIRE_TIMEOUT_SECONDS,
            statement_timeout_ms: None,
        }
    }
}

impl DatabaseConfig {
    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_secs(self.acquire_timeout_seconds)
    }

    pub fn statement_timeout(&self) -> Option<Duration> {
        self.statement_timeout_ms.map(Duration::from_millis)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BatchingConfig {
    pub sub_batch_size: u32,
    pub pause_ms: u64,
}

impl Default for BatchingConfig {
    fn default() -> Self {
        Self {
            sub_batch_size: DEFAULT_SUB_BATCH_SIZE,
            pause_ms: DEFAULT_PAUSE_MS,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RowFaultConfig {
    pub sqlstates: Vec<String>,
}

impl Default for RowFaultConfig {
    fn default() -> Self {
        Self {
            sqlstates: vec![INDEX_ROW_SIZE_EXCEEDED_SQLSTATE.to_string()],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Pretty,
    Json,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Overrides the environment-derived level when set
    pub level: Option<String>,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: None,
            format: LogFormat::Pretty,
        }
    }
}

impl MigrationConfig {
    /// Reject values the runner cannot work with
    pub fn validate(&self) -> ConfigResult<()> {
        if self.database.url.trim().is_empty() {
            return Err(ConfigurationError::missing_required_field(
                "url",
                "database configuration",
            ));
        }

        if self.database.pool == 0 {
            return Err(ConfigurationError::invalid_value(
                "database.pool",
                "0",
                "pool size must be at least 1",
            ));
        }

        if self.batching.sub_batch_size == 0 {
            return Err(ConfigurationError::invalid_value(
                "batching.sub_batch_size",
                "0",
                "sub-batches must contain at least one row",
            ));
        }

        if let Some(bad) = self
            .row_faults
            .sqlstates
            .iter()
            .find(|code| code.len() != 5 || !code.chars().all(|c| c.is_ascii_alphanumeric()))
        {
            return Err(ConfigurationError::invalid_value(
                "row_faults.sqlstates",
                bad.clone(),
                "SQLSTATE codes are five alphanumeric characters",
            ));
        }

        Ok(())
    }
}
