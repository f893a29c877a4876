//! # Batch Metrics
//!
//! Per-job record of executed sub-batches, plus OpenTelemetry instruments every
//! observation is exported through.
//!
//! ## Usage
//!
//! ```rust
//! use batched_migrations::metrics::BatchMetrics;
//! use std::time::Duration;
//!
//! let mut metrics = BatchMetrics::new("BackfillIssuesProjectId", "update_all");
//! metrics.record(Duration::from_millis(12));
//! assert_eq!(metrics.timings(), vec![Duration::from_millis(12)]);
//! ```

use crate::batching::{BatchWindow, SubBatchOutcome};
use opentelemetry::metrics::{Counter, Histogram, Meter};
use opentelemetry::KeyValue;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;
use std::time::Duration;

static MIGRATIONS_METER: OnceLock<Meter> = OnceLock::new();

fn meter() -> &'static Meter {
    MIGRATIONS_METER.get_or_init(|| opentelemetry::global::meter("batched-migrations"))
}

/// Sub-batch wall-clock duration in milliseconds
///
/// Labels:
/// - migration: migration name
/// - operation: update_all, delete_all, insert_missing, execute_sql or a custom label
pub fn sub_batch_duration() -> Histogram<f64> {
    meter()
        .f64_histogram("batched_migrations.sub_batch.duration")
        .with_description("Sub-batch execution duration in milliseconds")
        .with_unit("ms")
        .build()
}

/// Rows written by committed sub-batches
pub fn rows_affected_total() -> Counter<u64> {
    meter()
        .u64_counter("batched_migrations.rows.affected")
        .with_description("Rows affected by committed sub-batches")
        .build()
}

/// Rows skipped after a row-scoped fault
pub fn rows_skipped_total() -> Counter<u64> {
    meter()
        .u64_counter("batched_migrations.rows.skipped")
        .with_description("Rows skipped because of row-scoped faults")
        .build()
}

static SUB_BATCH_DURATION: OnceLock<Histogram<f64>> = OnceLock::new();
static ROWS_AFFECTED_TOTAL: OnceLock<Counter<u64>> = OnceLock::new();
static ROWS_SKIPPED_TOTAL: OnceLock<Counter<u64>> = OnceLock::new();

/// One executed sub-batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubBatchObservation {
    pub window: Option<BatchWindow>,
    pub duration: Duration,
    pub affected_rows: u64,
    pub skipped_rows: usize,
}

impl From<&SubBatchOutcome> for SubBatchObservation {
    fn from(outcome: &SubBatchOutcome) -> Self {
        Self {
            window: Some(outcome.window),
            duration: outcome.duration,
            affected_rows: outcome.affected_rows,
            skipped_rows: outcome.skipped_rows.len(),
        }
    }
}

/// Ordered timing observations for one job, one entry per executed sub-batch.
#[derive(Debug, Clone)]
pub struct BatchMetrics {
    migration: String,
    operation: String,
    observations: Vec<SubBatchObservation>,
}

impl BatchMetrics {
    pub fn new(migration: impl Into<String>, operation: impl Into<String>) -> Self {
        Self {
            migration: migration.into(),
            operation: operation.into(),
            observations: Vec::new(),
        }
    }

    /// Record a bare duration
    pub fn record(&mut self, duration: Duration) {
        self.record_sub_batch(SubBatchObservation {
            window: None,
            duration,
            affected_rows: 0,
            skipped_rows: 0,
        });
    }

    pub fn record_sub_batch(&mut self, observation: SubBatchObservation) {
        self.export(&observation);
        self.observations.push(observation);
    }

    /// Durations in execution order
    pub fn timings(&self) -> Vec<Duration> {
        self.observations.iter().map(|o| o.duration).collect()
    }

    pub fn observations(&self) -> &[SubBatchObservation] {
        &self.observations
    }

    pub fn total_affected_rows(&self) -> u64 {
        self.observations.iter().map(|o| o.affected_rows).sum()
    }

    pub fn total_duration(&self) -> Duration {
        self.observations.iter().map(|o| o.duration).sum()
    }

    pub fn len(&self) -> usize {
        self.observations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observations.is_empty()
    }

    pub fn reset(&mut self) {
        self.observations.clear();
    }

    fn export(&self, observation: &SubBatchObservation) {
        let labels = [
            KeyValue::new("migration", self.migration.clone()),
            KeyValue::new("operation", self.operation.clone()),
        ];

        SUB_BATCH_DURATION
            .get_or_init(sub_batch_duration)
            .record(observation.duration.as_secs_f64() * 1000.0, &labels);
        ROWS_AFFECTED_TOTAL
            .get_or_init(rows_affected_total)
            .add(observation.affected_rows, &labels);
        if observation.skipped_rows > 0 {
            ROWS_SKIPPED_TOTAL
                .get_or_init(rows_skipped_total)
                .add(observation.skipped_rows as u64, &labels);
        }
    }
}
