//! # Batching
//!
//! Window discovery, operation compilation and per-window execution.
//!
//! - [`range`] - Splits `[start_id, end_id]` into windows of at most `sub_batch_size` rows
//! - [`operation`] - Declarative data corrections compiled to window-scoped SQL
//! - [`executor`] - One transaction per window with row-level fault isolation
//! - [`fault`] - Which database errors are attributable to a single row

pub mod executor;
pub mod fault;
pub mod operation;
pub mod range;

pub use executor::{SubBatchExecutor, SubBatchOutcome};
pub use fault::{RowFaultPolicy, SkippedRow};
pub use operation::{
    CompiledOperation, DeleteOperation, InsertMissingOperation, MigrationOperation, SqlOperation,
    UpdateOperation,
};
pub use range::{BatchRange, BatchWindow};
