//! Row-scoped fault classification.

use crate::config::RowFaultConfig;
use crate::constants::INDEX_ROW_SIZE_EXCEEDED_SQLSTATE;
use crate::error::MigrationError;
use serde::{Deserialize, Serialize};

/// Which database errors are attributable to a single row's content.
///
/// Only these are isolated and skipped; every other error aborts the sub-batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowFaultPolicy {
    sqlstates: Vec<String>,
}

impl RowFaultPolicy {
    pub fn new<I, S>(sqlstates: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            sqlstates: sqlstates.into_iter().map(Into::into).collect(),
        }
    }

    /// Isolate nothing
    pub fn none() -> Self {
        Self {
            sqlstates: Vec::new(),
        }
    }

    pub fn from_config(config: &RowFaultConfig) -> Self {
        Self::new(config.sqlstates.iter().cloned())
    }

    pub fn sqlstates(&self) -> &[String] {
        &self.sqlstates
    }

    pub fn is_row_scoped(&self, error: &MigrationError) -> bool {
        error
            .sqlstate()
            .is_some_and(|code| self.sqlstates.iter().any(|s| s == code))
    }
}

impl Default for RowFaultPolicy {
    fn default() -> Self {
        Self::new([INDEX_ROW_SIZE_EXCEEDED_SQLSTATE])
    }
}

/// A key left unmigrated because its row raised a row-scoped fault
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedRow {
    pub key: i64,
    pub code: Option<String>,
    pub message: String,
}

impl SkippedRow {
    pub fn from_error(key: i64, error: &MigrationError) -> Self {
        Self {
            key,
            code: error.sqlstate().map(str::to_string),
            message: error.to_string(),
        }
    }
}
