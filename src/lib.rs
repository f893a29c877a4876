#![allow(clippy::doc_markdown)] // Allow technical terms like PostgreSQL, SQLx in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Batched Migrations
//!
//! Batched background data migrations for PostgreSQL.
//!
//! ## Overview
//!
//! A migration job backfills, cleans or corrects data across a key interval
//! `[start_id, end_id]` of one table. The interval is split into sub-batches of at most
//! `sub_batch_size` rows following the rows that actually exist, and one declarative
//! operation is applied per sub-batch, each in its own transaction, with a pause
//! between sub-batches and a timing observation per sub-batch.
//!
//! ## Module Organization
//!
//! - [`batching`] - Window discovery, operations and the sub-batch executor
//! - [`job`] - The [`BatchedMigration`] trait, jobs, lifecycle and tracking
//! - [`metrics`] - Per-job timing observations and OpenTelemetry instruments
//! - [`database`] - PostgreSQL backend, pool setup and the schema file harness
//! - [`schema`] - Validated identifiers and the batched relation
//! - [`query_builder`] - SQL statement builders
//! - [`config`] - Layered YAML and environment configuration
//! - [`logging`] - Structured logging setup
//! - [`error`] - Structured error handling
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use batched_migrations::batching::{MigrationOperation, UpdateOperation};
//! use batched_migrations::job::{
//!     BatchedMigration, BatchedMigrationJob, JobArguments, MigrationJobDescriptor,
//! };
//! use batched_migrations::query_builder::{Join, WhereClause};
//! use batched_migrations::schema::BatchRelation;
//! use batched_migrations::database::PgMigrationConnection;
//! use sqlx::PgPool;
//!
//! struct BackfillIssuesProjectId;
//!
//! impl BatchedMigration for BackfillIssuesProjectId {
//!     fn name(&self) -> &str {
//!         "BackfillIssuesProjectId"
//!     }
//!
//!     fn operation(
//!         &self,
//!         _relation: &BatchRelation,
//!         _arguments: &JobArguments,
//!     ) -> batched_migrations::Result<MigrationOperation> {
//!         Ok(MigrationOperation::Update(
//!             UpdateOperation::new()
//!                 .set("project_id", "merge_requests.target_project_id")
//!                 .from(Join::inner(
//!                     "merge_requests",
//!                     "merge_requests.id = issues.merge_request_id",
//!                 ))
//!                 .precondition(WhereClause::is_null("issues.project_id")),
//!         ))
//!     }
//! }
//!
//! # async fn example(pool: PgPool) -> Result<(), Box<dyn std::error::Error>> {
//! let descriptor = MigrationJobDescriptor::new("issues", "id", 1, 10_000)?;
//! let connection = PgMigrationConnection::new(pool);
//! let mut job = BatchedMigrationJob::new(descriptor, connection, &BackfillIssuesProjectId)?;
//!
//! let result = job.perform().await?;
//! println!("updated {} rows in {} sub-batches", result.affected_rows, result.sub_batches);
//! # Ok(())
//! # }
//! ```
//!
//! ## Testing
//!
//! Unit tests run against an in-memory backend; the integration tests under `tests/`
//! use `#[sqlx::test]` and need `DATABASE_URL`:
//!
//! ```bash
//! cargo test --lib    # Unit tests
//! cargo test          # All tests
//! ```

pub mod batching;
pub mod config;
pub mod constants;
pub mod database;
pub mod error;
pub mod job;
pub mod logging;
pub mod metrics;
pub mod query_builder;
pub mod schema;

#[cfg(test)]
pub(crate) mod test_helpers;

pub use batching::{
    BatchRange, BatchWindow, CompiledOperation, MigrationOperation, RowFaultPolicy, SkippedRow,
    SubBatchExecutor, SubBatchOutcome,
};
pub use config::{ConfigManager, MigrationConfig};
pub use database::{DatabaseConnection, DatabaseMigrations, PgMigrationConnection};
pub use error::{MigrationError, Result};
pub use job::{
    BatchedMigration, BatchedMigrationJob, InMemoryJobTracker, JobState, JobTracker,
    MigrationJobDescriptor, MigrationResult, PgJobTracker,
};
pub use metrics::BatchMetrics;
