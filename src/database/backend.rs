//! # Migration Backend
//!
//! The database surface the runner consumes: key discovery over the batch table and
//! one transaction per sub-batch. [`PgMigrationConnection`] is the PostgreSQL
//! implementation; the traits keep the executor independent of it.

use crate::batching::{BatchWindow, CompiledOperation};
use crate::constants::SUB_BATCH_SAVEPOINT;
use crate::error::{MigrationError, Result};
use crate::schema::BatchRelation;
use async_trait::async_trait;
use sqlx::{PgPool, Postgres, Transaction};
use std::time::Duration;

/// Connection handle a job owns for the duration of `perform`.
#[async_trait]
pub trait MigrationConnection: Send + Sync {
    type Transaction: SubBatchTransaction;

    /// Key at position `offset` among the relation's keys in `[from, end]`, ascending.
    async fn key_at_offset(
        &self,
        relation: &BatchRelation,
        from: i64,
        end: i64,
        offset: u64,
    ) -> Result<Option<i64>>;

    /// Open the transaction for one sub-batch
    async fn begin(&self) -> Result<Self::Transaction>;
}

/// One sub-batch transaction.
///
/// `apply` is atomic within the transaction: when it returns an error, none of that
/// statement's writes remain, and earlier successful `apply` calls are kept.
#[async_trait]
pub trait SubBatchTransaction: Send {
    async fn apply(&mut self, operation: &CompiledOperation, window: BatchWindow) -> Result<u64>;

    /// Distinct batch keys inside `window`, ascending
    async fn keys_in_window(
        &mut self,
        operation: &CompiledOperation,
        window: BatchWindow,
    ) -> Result<Vec<i64>>;

    async fn commit(self) -> Result<()>;

    async fn rollback(self) -> Result<()>;
}

/// PostgreSQL backend over a sqlx pool
#[derive(Debug, Clone)]
pub struct PgMigrationConnection {
    pool: PgPool,
    statement_timeout: Option<Duration>,
}

impl PgMigrationConnection {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            statement_timeout: None,
        }
    }

    /// Bound every sub-batch statement with `SET LOCAL statement_timeout`
    pub fn with_statement_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.statement_timeout = timeout;
        self
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl MigrationConnection for PgMigrationConnection {
    type Transaction = PgSubBatchTransaction;

    async fn key_at_offset(
        &self,
        relation: &BatchRelation,
        from: i64,
        end: i64,
        offset: u64,
    ) -> Result<Option<i64>> {
        let offset = i64::try_from(offset).map_err(|_| {
            MigrationError::InvalidDescriptor(format!("key offset {offset} exceeds i64::MAX"))
        })?;
        let sql = relation.key_at_offset_sql();

        sqlx::query_scalar::<_, i64>(&sql)
            .bind(from)
            .bind(end)
            .bind(offset)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| MigrationError::database("discover_batch_key", e))
    }

    async fn begin(&self) -> Result<PgSubBatchTransaction> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| MigrationError::database("begin_sub_batch", e))?;

        if let Some(timeout) = self.statement_timeout {
            // SET does not take bind parameters
            let sql = format!("SET LOCAL statement_timeout = {}", timeout.as_millis());
            sqlx::query(&sql)
                .execute(&mut *tx)
                .await
                .map_err(|e| MigrationError::database("set_statement_timeout", e))?;
        }

        Ok(PgSubBatchTransaction { tx })
    }
}

pub struct PgSubBatchTransaction {
    tx: Transaction<'static, Postgres>,
}

impl PgSubBatchTransaction {
    async fn savepoint_command(&mut self, command: &str) -> Result<()> {
        let sql = format!("{command} {SUB_BATCH_SAVEPOINT}");
        sqlx::query(&sql)
            .execute(&mut *self.tx)
            .await
            .map_err(|e| MigrationError::database("sub_batch_savepoint", e))?;
        Ok(())
    }
}

#[async_trait]
impl SubBatchTransaction for PgSubBatchTransaction {
    async fn apply(&mut self, operation: &CompiledOperation, window: BatchWindow) -> Result<u64> {
        self.savepoint_command("SAVEPOINT").await?;

        let outcome = sqlx::query(operation.sql())
            .bind(window.lower)
            .bind(window.upper)
            .execute(&mut *self.tx)
            .await;

        match outcome {
            Ok(done) => {
                self.savepoint_command("RELEASE SAVEPOINT").await?;
                Ok(done.rows_affected())
            }
            Err(error) => {
                self.savepoint_command("ROLLBACK TO SAVEPOINT").await?;
                Err(MigrationError::database("apply_sub_batch", error))
            }
        }
    }

    async fn keys_in_window(
        &mut self,
        operation: &CompiledOperation,
        window: BatchWindow,
    ) -> Result<Vec<i64>> {
        sqlx::query_scalar::<_, i64>(operation.keys_sql())
            .bind(window.lower)
            .bind(window.upper)
            .fetch_all(&mut *self.tx)
            .await
            .map_err(|e| MigrationError::database("load_window_keys", e))
    }

    async fn commit(self) -> Result<()> {
        self.tx
            .commit()
            .await
            .map_err(|e| MigrationError::database("commit_sub_batch", e))
    }

    async fn rollback(self) -> Result<()> {
        self.tx
            .rollback()
            .await
            .map_err(|e| MigrationError::database("rollback_sub_batch", e))
    }
}
