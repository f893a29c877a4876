//! Error types for batched migrations.
//!
//! Database failures keep their SQLSTATE code so the sub-batch executor can tell an
//! anticipated row-scoped fault apart from infrastructure failures.

use crate::config::ConfigurationError;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum MigrationError {
    #[error("Database error: {operation} - {reason}")]
    DatabaseError {
        operation: String,
        reason: String,
        /// SQLSTATE reported by the server, when there is one
        code: Option<String>,
    },
    #[error("Invalid job descriptor: {0}")]
    InvalidDescriptor(String),
    #[error("Invalid migration operation: {0}")]
    InvalidOperation(String),
    #[error("Invalid identifier '{identifier}': {reason}")]
    InvalidIdentifier { identifier: String, reason: String },
    #[error("Invalid job arguments: {0}")]
    InvalidJobArguments(String),
    #[error("Invalid state: {0}")]
    InvalidState(String),
    #[error("Configuration error: {0}")]
    ConfigurationError(String),
    #[error("Job tracking error: {0}")]
    TrackingError(String),
    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl MigrationError {
    /// Wrap a sqlx error with the operation that produced it
    pub fn database(operation: impl Into<String>, error: sqlx::Error) -> Self {
        let code = error
            .as_database_error()
            .and_then(|db| db.code())
            .map(|code| code.into_owned());

        MigrationError::DatabaseError {
            operation: operation.into(),
            reason: error.to_string(),
            code,
        }
    }

    /// SQLSTATE of a database error
    pub fn sqlstate(&self) -> Option<&str> {
        match self {
            MigrationError::DatabaseError { code, .. } => code.as_deref(),
            _ => None,
        }
    }

    pub fn is_database_error(&self) -> bool {
        matches!(self, MigrationError::DatabaseError { .. })
    }
}

impl From<sqlx::Error> for MigrationError {
    fn from(error: sqlx::Error) -> Self {
        MigrationError::database("query", error)
    }
}

impl From<serde_json::Error> for MigrationError {
    fn from(error: serde_json::Error) -> Self {
        MigrationError::SerializationError(error.to_string())
    }
}

impl From<ConfigurationError> for MigrationError {
    fn from(error: ConfigurationError) -> Self {
        MigrationError::ConfigurationError(error.to_string())
    }
}

pub type Result<T> = std::result::Result<T, MigrationError>;
