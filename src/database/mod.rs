//! # Database Operations
//!
//! PostgreSQL access for the migration runner.
//!
//! ## Key Components
//!
//! - [`backend`] - The connection/transaction seam used by the sub-batch executor
//! - [`connection`] - Pool construction from configuration
//! - [`migrations`] - Versioned schema harness with advisory-lock concurrency control
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use batched_migrations::config::DatabaseConfig;
//! use batched_migrations::database::DatabaseConnection;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let db = DatabaseConnection::new(&DatabaseConfig::default()).await?;
//! let connection = db.migration_connection();
//! # Ok(())
//! # }
//! ```

pub mod backend;
pub mod connection;
pub mod migrations;

pub use backend::{
    MigrationConnection, PgMigrationConnection, PgSubBatchTransaction, SubBatchTransaction,
};
pub use connection::DatabaseConnection;
pub use migrations::{DatabaseMigrations, Migration};
