//! # System Constants
//!
//! Defaults shared by configuration, descriptors and the executor.

/// Rows touched per sub-batch when neither the descriptor nor configuration says otherwise
pub const DEFAULT_SUB_BATCH_SIZE: u32 = 100;

/// Pause between sub-batches, in milliseconds
pub const DEFAULT_PAUSE_MS: u64 = 100;

pub const DEFAULT_POOL_SIZE: u32 = 5;

pub const DEFAULT_ACQUIRE_TIMEOUT_SECONDS: u64 = 30;

/// SQLSTATE `program_limit_exceeded`, raised when a value is too large for a btree index row
pub const INDEX_ROW_SIZE_EXCEEDED_SQLSTATE: &str = "54000";

/// PostgreSQL limit on identifier length
pub const MAX_IDENTIFIER_LENGTH: usize = 63;

/// Savepoint used to isolate each statement inside a sub-batch transaction
pub const SUB_BATCH_SAVEPOINT: &str = "batched_migration_statement";

/// Table recording applied schema files
pub const SCHEMA_VERSIONS_TABLE: &str = "batched_migrations_schema_versions";

/// Table used by the PostgreSQL job tracker
pub const JOB_RECORDS_TABLE: &str = "batched_migration_job_records";

/// Operation names used as metric and log labels
pub mod operation_names {
    pub const UPDATE_ALL: &str = "update_all";
    pub const DELETE_ALL: &str = "delete_all";
    pub const INSERT_MISSING: &str = "insert_missing";
    pub const EXECUTE_SQL: &str = "execute_sql";
}
