//! # Migration Jobs
//!
//! - [`descriptor`] - Serializable job parameters and migration arguments
//! - [`state`] - Job lifecycle
//! - [`batched_job`] - The [`BatchedMigration`] trait and the job that runs it
//! - [`tracking`] - Per-window job records for schedulers

pub mod batched_job;
pub mod descriptor;
pub mod state;
pub mod tracking;

pub use batched_job::{BatchedMigration, BatchedMigrationJob, MigrationResult};
pub use descriptor::{JobArguments, MigrationJobDescriptor};
pub use state::{JobEvent, JobState};
pub use tracking::{InMemoryJobTracker, JobKey, JobRecord, JobTracker, PgJobTracker};
