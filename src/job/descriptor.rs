//! # Job Descriptor
//!
//! The immutable parameters a scheduler enqueues for one job: the key interval, the
//! table and column it is batched over, sub-batch sizing and the migration-specific
//! arguments.

use crate::config::BatchingConfig;
use crate::constants::{DEFAULT_PAUSE_MS, DEFAULT_SUB_BATCH_SIZE};
use crate::error::{MigrationError, Result};
use crate::schema::Identifier;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MigrationJobDescriptor {
    pub start_id: i64,
    pub end_id: i64,
    pub batch_table: Identifier,
    pub batch_column: Identifier,
    #[serde(default = "default_sub_batch_size")]
    pub sub_batch_size: u32,
    #[serde(default = "default_pause_ms")]
    pub pause_ms: u64,
    #[serde(default)]
    pub job_arguments: Vec<Value>,
}

fn default_sub_batch_size() -> u32 {
    DEFAULT_SUB_BATCH_SIZE
}

fn default_pause_ms() -> u64 {
    DEFAULT_PAUSE_MS
}

impl MigrationJobDescriptor {
    /// Descriptor with default sub-batch sizing and no job arguments
    pub fn new(batch_table: &str, batch_column: &str, start_id: i64, end_id: i64) -> Result<Self> {
        let descriptor = Self {
            start_id,
            end_id,
            batch_table: Identifier::parse(batch_table)?,
            batch_column: Identifier::parse(batch_column)?,
            sub_batch_size: DEFAULT_SUB_BATCH_SIZE,
            pause_ms: DEFAULT_PAUSE_MS,
            job_arguments: Vec::new(),
        };
        descriptor.validate()?;
        Ok(descriptor)
    }

    /// Take sub-batch size and pause from configuration
    pub fn with_batching(mut self, batching: &BatchingConfig) -> Self {
        self.sub_batch_size = batching.sub_batch_size;
        self.pause_ms = batching.pause_ms;
        self
    }

    pub fn with_sub_batch_size(mut self, sub_batch_size: u32) -> Self {
        self.sub_batch_size = sub_batch_size;
        self
    }

    pub fn with_pause_ms(mut self, pause_ms: u64) -> Self {
        self.pause_ms = pause_ms;
        self
    }

    pub fn with_job_arguments(mut self, job_arguments: Vec<Value>) -> Self {
        self.job_arguments = job_arguments;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.start_id > self.end_id {
            return Err(MigrationError::InvalidDescriptor(format!(
                "start_id {} is greater than end_id {}",
                self.start_id, self.end_id
            )));
        }
        if self.sub_batch_size == 0 {
            return Err(MigrationError::InvalidDescriptor(
                "sub_batch_size must be positive".to_string(),
            ));
        }
        if self.batch_column.as_str().contains('.') {
            return Err(MigrationError::InvalidIdentifier {
                identifier: self.batch_column.to_string(),
                reason: "batch column cannot be qualified".to_string(),
            });
        }
        Ok(())
    }

    pub fn pause(&self) -> Duration {
        Duration::from_millis(self.pause_ms)
    }
}

/// Positional job arguments bound to the names a migration declares.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobArguments {
    values: Vec<(String, Value)>,
}

impl JobArguments {
    /// Bind `values` to `declared` names; counts must match
    pub fn parse(declared: &[&str], values: &[Value]) -> Result<Self> {
        if declared.len() != values.len() {
            return Err(MigrationError::InvalidJobArguments(format!(
                "expected {} argument(s) ({}), got {}",
                declared.len(),
                declared.join(", "),
                values.len()
            )));
        }

        Ok(Self {
            values: declared
                .iter()
                .map(|name| name.to_string())
                .zip(values.iter().cloned())
                .collect(),
        })
    }

    pub fn value(&self, name: &str) -> Option<&Value> {
        self.values
            .iter()
            .find(|(declared, _)| declared == name)
            .map(|(_, value)| value)
    }

    /// Deserialize the argument called `name`
    pub fn get<T: DeserializeOwned>(&self, name: &str) -> Result<T> {
        let value = self.value(name).ok_or_else(|| {
            MigrationError::InvalidJobArguments(format!("undeclared argument '{name}'"))
        })?;
        serde_json::from_value(value.clone()).map_err(|e| {
            MigrationError::InvalidJobArguments(format!("argument '{name}': {e}"))
        })
    }

    /// A string argument that names a table or column
    pub fn identifier(&self, name: &str) -> Result<Identifier> {
        let raw: String = self.get(name)?;
        Identifier::parse(&raw)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}
