//! # Job Tracking
//!
//! Records of which `(start_id, end_id)` windows of a migration ran and how they
//! ended, for a scheduler deciding what to re-enqueue. Trackers only record; they do
//! not prevent two executions of the same window.

use crate::batching::BatchWindow;
use crate::constants::JOB_RECORDS_TABLE;
use crate::error::{MigrationError, Result};
use crate::job::batched_job::MigrationResult;
use crate::job::descriptor::MigrationJobDescriptor;
use crate::job::state::JobState;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use std::collections::HashMap;
use uuid::Uuid;

/// Identity of one job: a migration over one window of one table column
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobKey {
    pub migration_name: String,
    pub batch_table: String,
    pub batch_column: String,
    pub start_id: i64,
    pub end_id: i64,
}

impl JobKey {
    pub fn new(migration_name: &str, descriptor: &MigrationJobDescriptor) -> Self {
        Self {
            migration_name: migration_name.to_string(),
            batch_table: descriptor.batch_table.to_string(),
            batch_column: descriptor.batch_column.to_string(),
            start_id: descriptor.start_id,
            end_id: descriptor.end_id,
        }
    }

    pub fn window(&self) -> BatchWindow {
        BatchWindow::new(self.start_id, self.end_id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: Uuid,
    pub migration_name: String,
    pub batch_table: String,
    pub batch_column: String,
    pub start_id: i64,
    pub end_id: i64,
    pub status: JobState,
    pub attempts: i32,
    pub affected_rows: i64,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl JobRecord {
    fn started(key: &JobKey) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            migration_name: key.migration_name.clone(),
            batch_table: key.batch_table.clone(),
            batch_column: key.batch_column.clone(),
            start_id: key.start_id,
            end_id: key.end_id,
            status: JobState::Running,
            attempts: 1,
            affected_rows: 0,
            last_error: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn window(&self) -> BatchWindow {
        BatchWindow::new(self.start_id, self.end_id)
    }
}

#[async_trait]
pub trait JobTracker: Send + Sync {
    /// Mark the job running, creating its record or counting another attempt
    async fn job_started(&self, key: &JobKey) -> Result<JobRecord>;

    async fn job_succeeded(&self, key: &JobKey, result: &MigrationResult) -> Result<JobRecord>;

    async fn job_failed(&self, key: &JobKey, error: &str) -> Result<JobRecord>;

    /// Windows of `migration_name` whose last run completed, ascending
    async fn succeeded_windows(&self, migration_name: &str) -> Result<Vec<BatchWindow>>;

    async fn has_succeeded(&self, key: &JobKey) -> Result<bool> {
        let window = key.window();
        Ok(self
            .succeeded_windows(&key.migration_name)
            .await?
            .contains(&window))
    }
}

fn affected_rows_i64(result: &MigrationResult) -> Result<i64> {
    i64::try_from(result.affected_rows).map_err(|_| {
        MigrationError::TrackingError(format!(
            "affected row count {} does not fit a BIGINT",
            result.affected_rows
        ))
    })
}

fn missing_record(key: &JobKey) -> MigrationError {
    MigrationError::TrackingError(format!(
        "no record for {} over {} [{}, {}]",
        key.migration_name, key.batch_table, key.start_id, key.end_id
    ))
}

/// Process-local tracker
#[derive(Debug, Default)]
pub struct InMemoryJobTracker {
    records: Mutex<HashMap<JobKey, JobRecord>>,
}

impl InMemoryJobTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, key: &JobKey) -> Option<JobRecord> {
        self.records.lock().get(key).cloned()
    }

    fn finish(
        &self,
        key: &JobKey,
        status: JobState,
        affected_rows: Option<i64>,
        error: Option<&str>,
    ) -> Result<JobRecord> {
        let mut records = self.records.lock();
        let record = records.get_mut(key).ok_or_else(|| missing_record(key))?;
        record.status = status;
        if let Some(affected_rows) = affected_rows {
            record.affected_rows = affected_rows;
        }
        record.last_error = error.map(str::to_string);
        record.updated_at = Utc::now();
        Ok(record.clone())
    }
}

#[async_trait]
impl JobTracker for InMemoryJobTracker {
    async fn job_started(&self, key: &JobKey) -> Result<JobRecord> {
        let mut records = self.records.lock();
        let record = records
            .entry(key.clone())
            .and_modify(|record| {
                record.status = JobState::Running;
                record.attempts += 1;
                record.last_error = None;
                record.updated_at = Utc::now();
            })
            .or_insert_with(|| JobRecord::started(key));
        Ok(record.clone())
    }

    async fn job_succeeded(&self, key: &JobKey, result: &MigrationResult) -> Result<JobRecord> {
        let affected_rows = affected_rows_i64(result)?;
        self.finish(key, JobState::Completed, Some(affected_rows), None)
    }

    async fn job_failed(&self, key: &JobKey, error: &str) -> Result<JobRecord> {
        self.finish(key, JobState::Failed, None, Some(error))
    }

    async fn succeeded_windows(&self, migration_name: &str) -> Result<Vec<BatchWindow>> {
        let mut windows: Vec<BatchWindow> = self
            .records
            .lock()
            .values()
            .filter(|r| r.migration_name == migration_name && r.status == JobState::Completed)
            .map(JobRecord::window)
            .collect();
        windows.sort_by_key(|w| (w.lower, w.upper));
        Ok(windows)
    }
}

/// Tracker backed by the `batched_migration_job_records` table
#[derive(Debug, Clone)]
pub struct PgJobTracker {
    pool: PgPool,
}

const RECORD_COLUMNS: &str = "id, migration_name, batch_table, batch_column, start_id, end_id, \
     status, attempts, affected_rows, last_error, created_at, updated_at";

const KEY_PREDICATE: &str = "migration_name = $1 AND batch_table = $2 AND batch_column = $3 \
     AND start_id = $4 AND end_id = $5";

impl PgJobTracker {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn from_row(row: &PgRow) -> Result<JobRecord> {
        let status: String = row.try_get("status")?;
        let status = status
            .parse::<JobState>()
            .map_err(MigrationError::TrackingError)?;

        Ok(JobRecord {
            id: row.try_get("id")?,
            migration_name: row.try_get("migration_name")?,
            batch_table: row.try_get("batch_table")?,
            batch_column: row.try_get("batch_column")?,
            start_id: row.try_get("start_id")?,
            end_id: row.try_get("end_id")?,
            status,
            attempts: row.try_get("attempts")?,
            affected_rows: row.try_get("affected_rows")?,
            last_error: row.try_get("last_error")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    async fn finish(
        &self,
        operation: &str,
        key: &JobKey,
        status: JobState,
        affected_rows: Option<i64>,
        error: Option<&str>,
    ) -> Result<JobRecord> {
        let sql = format!(
            "UPDATE {JOB_RECORDS_TABLE} \
             SET status = $6, affected_rows = COALESCE($7, affected_rows), last_error = $8, \
                 updated_at = NOW() \
             WHERE {KEY_PREDICATE} \
             RETURNING {RECORD_COLUMNS}"
        );

        let row = sqlx::query(&sql)
            .bind(&key.migration_name)
            .bind(&key.batch_table)
            .bind(&key.batch_column)
            .bind(key.start_id)
            .bind(key.end_id)
            .bind(status.to_string())
            .bind(affected_rows)
            .bind(error)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| MigrationError::database(operation, e))?
            .ok_or_else(|| missing_record(key))?;

        Self::from_row(&row)
    }
}

#[async_trait]
impl JobTracker for PgJobTracker {
    async fn job_started(&self, key: &JobKey) -> Result<JobRecord> {
        let sql = format!(
            "INSERT INTO {JOB_RECORDS_TABLE} AS records \
                 (id, migration_name, batch_table, batch_column, start_id, end_id, status, attempts) \
             VALUES ($6, $1, $2, $3, $4, $5, 'running', 1) \
             ON CONFLICT (migration_name, batch_table, batch_column, start_id, end_id) \
             DO UPDATE SET status = 'running', attempts = records.attempts + 1, \
                 last_error = NULL, updated_at = NOW() \
             RETURNING {RECORD_COLUMNS}"
        );

        let row = sqlx::query(&sql)
            .bind(&key.migration_name)
            .bind(&key.batch_table)
            .bind(&key.batch_column)
            .bind(key.start_id)
            .bind(key.end_id)
            .bind(Uuid::new_v4())
            .fetch_one(&self.pool)
            .await
            .map_err(|e| MigrationError::database("track_job_started", e))?;

        Self::from_row(&row)
    }

    async fn job_succeeded(&self, key: &JobKey, result: &MigrationResult) -> Result<JobRecord> {
        let affected_rows = affected_rows_i64(result)?;
        self.finish(
            "track_job_succeeded",
            key,
            JobState::Completed,
            Some(affected_rows),
            None,
        )
        .await
    }

    async fn job_failed(&self, key: &JobKey, error: &str) -> Result<JobRecord> {
        self.finish("track_job_failed", key, JobState::Failed, None, Some(error))
            .await
    }

    async fn succeeded_windows(&self, migration_name: &str) -> Result<Vec<BatchWindow>> {
        let sql = format!(
            "SELECT start_id, end_id FROM {JOB_RECORDS_TABLE} \
             WHERE migration_name = $1 AND status = 'completed' \
             ORDER BY start_id, end_id"
        );

        let rows: Vec<(i64, i64)> = sqlx::query_as(&sql)
            .bind(migration_name)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| MigrationError::database("load_succeeded_windows", e))?;

        Ok(rows
            .into_iter()
            .map(|(start_id, end_id)| BatchWindow::new(start_id, end_id))
            .collect())
    }
}
