//! # Sub-Batch Executor
//!
//! Applies a compiled operation to one window inside one transaction. A row-scoped
//! failure of the whole-window statement falls back to applying the operation key by
//! key, so one oversized row costs only itself instead of the sub-batch.

use crate::batching::fault::{RowFaultPolicy, SkippedRow};
use crate::batching::operation::CompiledOperation;
use crate::batching::range::BatchWindow;
use crate::database::{MigrationConnection, SubBatchTransaction};
use crate::error::Result;
use crate::logging::{log_row_skipped, log_sub_batch};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// What one committed sub-batch did
#[derive(Debug, Clone, PartialEq)]
pub struct SubBatchOutcome {
    pub window: BatchWindow,
    pub affected_rows: u64,
    pub skipped_rows: Vec<SkippedRow>,
    pub duration: Duration,
}

#[derive(Debug, Clone)]
pub struct SubBatchExecutor {
    pause: Duration,
    fault_policy: RowFaultPolicy,
}

impl SubBatchExecutor {
    pub fn new(pause: Duration, fault_policy: RowFaultPolicy) -> Self {
        Self {
            pause,
            fault_policy,
        }
    }

    pub fn pause_duration(&self) -> Duration {
        self.pause
    }

    pub fn fault_policy(&self) -> &RowFaultPolicy {
        &self.fault_policy
    }

    /// Run `operation` over `window` and commit.
    ///
    /// On error the transaction is rolled back and the error returned; nothing of the
    /// window is kept.
    pub async fn execute<C>(
        &self,
        connection: &C,
        operation: &CompiledOperation,
        window: BatchWindow,
    ) -> Result<SubBatchOutcome>
    where
        C: MigrationConnection,
    {
        let started = Instant::now();
        let mut tx = connection.begin().await?;

        let (affected_rows, skipped_rows) = match self.apply(&mut tx, operation, window).await {
            Ok(applied) => applied,
            Err(error) => {
                if let Err(rollback_error) = tx.rollback().await {
                    warn!(
                        migration = %operation.migration(),
                        window = %window,
                        error = %rollback_error,
                        "Rollback after failed sub-batch also failed"
                    );
                }
                return Err(error);
            }
        };

        tx.commit().await?;

        let duration = started.elapsed();
        log_sub_batch(
            operation.migration(),
            operation.operation_name(),
            window,
            affected_rows,
            skipped_rows.len(),
            duration,
        );

        Ok(SubBatchOutcome {
            window,
            affected_rows,
            skipped_rows,
            duration,
        })
    }

    /// Sleep between sub-batches
    pub async fn pause(&self) {
        if !self.pause.is_zero() {
            tokio::time::sleep(self.pause).await;
        }
    }

    async fn apply<T>(
        &self,
        tx: &mut T,
        operation: &CompiledOperation,
        window: BatchWindow,
    ) -> Result<(u64, Vec<SkippedRow>)>
    where
        T: SubBatchTransaction,
    {
        match tx.apply(operation, window).await {
            Ok(affected) => Ok((affected, Vec::new())),
            Err(error) if self.fault_policy.is_row_scoped(&error) => {
                debug!(
                    migration = %operation.migration(),
                    window = %window,
                    code = error.sqlstate(),
                    "Row-scoped fault in sub-batch, isolating rows"
                );
                self.apply_per_key(tx, operation, window).await
            }
            Err(error) => Err(error),
        }
    }

    async fn apply_per_key<T>(
        &self,
        tx: &mut T,
        operation: &CompiledOperation,
        window: BatchWindow,
    ) -> Result<(u64, Vec<SkippedRow>)>
    where
        T: SubBatchTransaction,
    {
        let keys = tx.keys_in_window(operation, window).await?;
        let mut affected_rows = 0;
        let mut skipped_rows = Vec::new();

        for key in keys {
            match tx.apply(operation, BatchWindow::single(key)).await {
                Ok(affected) => affected_rows += affected,
                Err(error) if self.fault_policy.is_row_scoped(&error) => {
                    let skipped = SkippedRow::from_error(key, &error);
                    log_row_skipped(
                        operation.migration(),
                        key,
                        skipped.code.as_deref(),
                        &skipped.message,
                    );
                    skipped_rows.push(skipped);
                }
                Err(error) => return Err(error),
            }
        }

        Ok((affected_rows, skipped_rows))
    }
}

impl Default for SubBatchExecutor {
    fn default() -> Self {
        Self::new(
            Duration::from_millis(crate::constants::DEFAULT_PAUSE_MS),
            RowFaultPolicy::default(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batching::operation::{MigrationOperation, SqlOperation};
    use crate::error::MigrationError;
    use crate::schema::{BatchRelation, Identifier};
    use crate::test_helpers::MemoryConnection;

    fn compiled() -> CompiledOperation {
        let relation = BatchRelation::new(
            Identifier::parse("issues").unwrap(),
            Identifier::parse("id").unwrap(),
        );
        MigrationOperation::Sql(SqlOperation::new(
            "UPDATE issues SET a = 1 WHERE id BETWEEN $1 AND $2 AND a IS NULL",
        ))
        .compile("TestMigration", None, &relation)
        .unwrap()
    }

    fn executor() -> SubBatchExecutor {
        SubBatchExecutor::new(Duration::ZERO, RowFaultPolicy::default())
    }

    #[tokio::test]
    async fn applies_and_commits_window() {
        let connection = MemoryConnection::with_keys(1..=10);
        let outcome = executor()
            .execute(&connection, &compiled(), BatchWindow::new(1, 4))
            .await
            .unwrap();

        assert_eq!(outcome.affected_rows, 4);
        assert!(outcome.skipped_rows.is_empty());
        assert_eq!(connection.migrated_keys(), vec![1, 2, 3, 4]);
        assert_eq!(connection.commits(), 1);
        assert_eq!(connection.rollbacks(), 0);
    }

    #[tokio::test]
    async fn rerun_is_a_no_op() {
        let connection = MemoryConnection::with_keys(1..=5);
        let window = BatchWindow::new(1, 5);
        executor()
            .execute(&connection, &compiled(), window)
            .await
            .unwrap();
        let second = executor()
            .execute(&connection, &compiled(), window)
            .await
            .unwrap();

        assert_eq!(second.affected_rows, 0);
        assert_eq!(connection.migrated_keys(), vec![1, 2, 3, 4, 5]);
    }

    #[tokio::test]
    async fn row_scoped_fault_skips_only_that_row() {
        let connection = MemoryConnection::with_keys(1..=6).fail_key(4, "54000");
        let outcome = executor()
            .execute(&connection, &compiled(), BatchWindow::new(1, 6))
            .await
            .unwrap();

        assert_eq!(outcome.affected_rows, 5);
        assert_eq!(outcome.skipped_rows.len(), 1);
        assert_eq!(outcome.skipped_rows[0].key, 4);
        assert_eq!(outcome.skipped_rows[0].code.as_deref(), Some("54000"));
        assert_eq!(connection.migrated_keys(), vec![1, 2, 3, 5, 6]);
        assert_eq!(connection.commits(), 1);
    }

    #[tokio::test]
    async fn other_errors_roll_back_the_whole_window() {
        let connection = MemoryConnection::with_keys(1..=6).fail_key(4, "57014");
        let error = executor()
            .execute(&connection, &compiled(), BatchWindow::new(1, 6))
            .await
            .unwrap_err();

        assert_eq!(error.sqlstate(), Some("57014"));
        assert!(connection.migrated_keys().is_empty());
        assert_eq!(connection.commits(), 0);
        assert_eq!(connection.rollbacks(), 1);
    }

    #[tokio::test]
    async fn fatal_error_during_isolation_rolls_back() {
        let connection = MemoryConnection::with_keys(1..=6)
            .fail_key(2, "54000")
            .fail_key(5, "23505");
        let error = executor()
            .execute(&connection, &compiled(), BatchWindow::new(1, 6))
            .await
            .unwrap_err();

        assert!(matches!(error, MigrationError::DatabaseError { .. }));
        assert!(connection.migrated_keys().is_empty());
        assert_eq!(connection.rollbacks(), 1);
    }

    #[tokio::test]
    async fn policy_without_codes_propagates_row_faults() {
        let connection = MemoryConnection::with_keys(1..=3).fail_key(2, "54000");
        let executor = SubBatchExecutor::new(Duration::ZERO, RowFaultPolicy::none());
        let result = executor
            .execute(&connection, &compiled(), BatchWindow::new(1, 3))
            .await;

        assert!(result.is_err());
        assert!(connection.migrated_keys().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn pause_sleeps_configured_duration() {
        let executor = SubBatchExecutor::new(Duration::from_millis(250), RowFaultPolicy::none());
        let before = tokio::time::Instant::now();
        executor.pause().await;
        assert!(before.elapsed() >= Duration::from_millis(250));
    }
}
