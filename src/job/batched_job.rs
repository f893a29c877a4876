//! # Batched Migration Job
//!
//! Drives one migration over its descriptor's interval: windows are discovered
//! lazily, each is executed in its own transaction, and the executor pauses between
//! them. A job keeps no resumable state; a scheduler re-invokes `perform` for windows
//! that did not succeed, which is safe because every operation carries an idempotence
//! guard.

use crate::batching::{
    BatchRange, CompiledOperation, MigrationOperation, RowFaultPolicy, SkippedRow,
    SubBatchExecutor,
};
use crate::database::MigrationConnection;
use crate::error::Result;
use crate::job::descriptor::{JobArguments, MigrationJobDescriptor};
use crate::job::state::{JobEvent, JobState};
use crate::job::tracking::{JobKey, JobTracker};
use crate::logging::{log_error, log_job_transition};
use crate::metrics::{BatchMetrics, SubBatchObservation};
use crate::query_builder::WhereClause;
use crate::schema::BatchRelation;
use futures::TryStreamExt;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// A concrete data migration.
///
/// Implementations describe the correction as a [`MigrationOperation`]; the job owns
/// batching, transactions, pauses and metrics.
pub trait BatchedMigration: Send + Sync {
    /// Name used in logs, metrics and job records
    fn name(&self) -> &str;

    /// Names bound positionally to the descriptor's `job_arguments`
    fn job_arguments(&self) -> &[&'static str] {
        &[]
    }

    /// Metrics label; defaults to one derived from the operation kind
    fn operation_name(&self) -> Option<&str> {
        None
    }

    /// Restrict batching and the operation to matching rows
    fn scope(&self, _arguments: &JobArguments) -> Option<WhereClause> {
        None
    }

    /// Batch over distinct values of a non-unique column
    fn distinct_batch_column(&self) -> bool {
        false
    }

    fn row_fault_policy(&self) -> RowFaultPolicy {
        RowFaultPolicy::default()
    }

    fn operation(
        &self,
        relation: &BatchRelation,
        arguments: &JobArguments,
    ) -> Result<MigrationOperation>;
}

/// Totals of one `perform` call
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MigrationResult {
    pub affected_rows: u64,
    pub sub_batches: usize,
    pub skipped_rows: Vec<SkippedRow>,
    pub duration: Duration,
}

pub struct BatchedMigrationJob<C> {
    descriptor: MigrationJobDescriptor,
    connection: C,
    migration_name: String,
    range: BatchRange,
    operation: CompiledOperation,
    executor: SubBatchExecutor,
    state: JobState,
    metrics: BatchMetrics,
}

impl<C> BatchedMigrationJob<C>
where
    C: MigrationConnection,
{
    /// Validate the descriptor and compile the migration's operation.
    ///
    /// Nothing touches the database until `perform`.
    pub fn new<M>(descriptor: MigrationJobDescriptor, connection: C, migration: &M) -> Result<Self>
    where
        M: BatchedMigration + ?Sized,
    {
        descriptor.validate()?;
        let arguments = JobArguments::parse(migration.job_arguments(), &descriptor.job_arguments)?;

        let relation = BatchRelation::new(
            descriptor.batch_table.clone(),
            descriptor.batch_column.clone(),
        )
        .with_scope(migration.scope(&arguments))
        .with_distinct(migration.distinct_batch_column());

        let operation = migration.operation(&relation, &arguments)?.compile(
            migration.name(),
            migration.operation_name(),
            &relation,
        )?;

        let range = BatchRange::new(
            relation,
            descriptor.start_id,
            descriptor.end_id,
            descriptor.sub_batch_size,
        )?;
        let executor = SubBatchExecutor::new(descriptor.pause(), migration.row_fault_policy());
        let metrics = BatchMetrics::new(migration.name(), operation.operation_name());

        Ok(Self {
            descriptor,
            connection,
            migration_name: migration.name().to_string(),
            range,
            operation,
            executor,
            state: JobState::Created,
            metrics,
        })
    }

    /// Replace the migration's row fault policy, e.g. with the configured one
    pub fn with_row_fault_policy(mut self, policy: RowFaultPolicy) -> Self {
        self.executor = SubBatchExecutor::new(self.descriptor.pause(), policy);
        self
    }

    /// Migrate every window of `[start_id, end_id]`.
    ///
    /// Metrics are reset first and hold one observation per executed sub-batch
    /// afterwards. On error the failing sub-batch is rolled back, earlier ones stay
    /// committed, and the job ends in [`JobState::Failed`].
    ///
    /// A job left [`JobState::Running`] by a dropped `perform` future restarts from
    /// `start_id`; its committed sub-batches are no-ops the second time.
    pub async fn perform(&mut self) -> Result<MigrationResult> {
        if self.state.is_active() {
            warn!(
                migration = %self.migration_name,
                window = %self.range.bounds(),
                "Restarting interrupted batched migration"
            );
        }
        self.transition(JobEvent::Start)?;
        self.metrics.reset();

        let started = Instant::now();
        match self.run_sub_batches().await {
            Ok(mut result) => {
                result.duration = started.elapsed();
                self.transition(JobEvent::Complete)?;
                info!(
                    migration = %self.migration_name,
                    affected_rows = result.affected_rows,
                    sub_batches = result.sub_batches,
                    skipped_rows = result.skipped_rows.len(),
                    duration_ms = result.duration.as_millis() as u64,
                    "Batched migration completed"
                );
                Ok(result)
            }
            Err(error) => {
                log_error(
                    "batched_job",
                    &self.migration_name,
                    &error.to_string(),
                    Some(&self.range.bounds().to_string()),
                );
                self.transition(JobEvent::Fail)?;
                Err(error)
            }
        }
    }

    /// `perform`, reporting start and outcome to `tracker`
    pub async fn perform_tracked<T>(&mut self, tracker: &T) -> Result<MigrationResult>
    where
        T: JobTracker + ?Sized,
    {
        let key = self.job_key();
        tracker.job_started(&key).await?;

        match self.perform().await {
            Ok(result) => {
                // Sub-batches are already committed
                if let Err(tracking_error) = tracker.job_succeeded(&key, &result).await {
                    warn!(
                        migration = %self.migration_name,
                        error = %tracking_error,
                        "Failed to record job success"
                    );
                }
                Ok(result)
            }
            Err(error) => {
                if let Err(tracking_error) = tracker.job_failed(&key, &error.to_string()).await {
                    warn!(
                        migration = %self.migration_name,
                        error = %tracking_error,
                        "Failed to record job failure"
                    );
                }
                Err(error)
            }
        }
    }

    async fn run_sub_batches(&mut self) -> Result<MigrationResult> {
        let mut result = MigrationResult::default();
        let windows = self.range.each_batch(&self.connection);
        futures::pin_mut!(windows);

        while let Some(window) = windows.try_next().await? {
            if result.sub_batches > 0 {
                self.executor.pause().await;
            }

            let outcome = self
                .executor
                .execute(&self.connection, &self.operation, window)
                .await?;

            self.metrics
                .record_sub_batch(SubBatchObservation::from(&outcome));
            result.affected_rows += outcome.affected_rows;
            result.sub_batches += 1;
            result.skipped_rows.extend(outcome.skipped_rows);
        }

        Ok(result)
    }

    fn transition(&mut self, event: JobEvent) -> Result<()> {
        let from = self.state;
        let to = from.transition(event)?;
        self.state = to;
        log_job_transition(&self.migration_name, from, to, self.range.bounds());
        Ok(())
    }

    pub fn job_key(&self) -> JobKey {
        JobKey::new(&self.migration_name, &self.descriptor)
    }

    pub fn state(&self) -> JobState {
        self.state
    }

    pub fn metrics(&self) -> &BatchMetrics {
        &self.metrics
    }

    pub fn descriptor(&self) -> &MigrationJobDescriptor {
        &self.descriptor
    }

    pub fn operation(&self) -> &CompiledOperation {
        &self.operation
    }

    pub fn connection(&self) -> &C {
        &self.connection
    }
}
