//! # Structured Logging Module
//!
//! Environment-aware structured logging for migration runs, plus helpers that keep
//! the shape of sub-batch, row-fault and job-transition records consistent.

use crate::batching::BatchWindow;
use crate::config::{ConfigManager, LogFormat, LoggingConfig};
use crate::job::JobState;
use chrono::Utc;
use std::sync::OnceLock;
use std::time::Duration;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

static LOGGER_INITIALIZED: OnceLock<()> = OnceLock::new();

/// Initialize structured logging once per process.
///
/// `RUST_LOG` wins over the configured level, which wins over the level derived from
/// the environment name.
pub fn init_structured_logging(config: &LoggingConfig) {
    LOGGER_INITIALIZED.get_or_init(|| {
        let environment = ConfigManager::detect_environment();
        let level = config
            .level
            .clone()
            .unwrap_or_else(|| get_log_level(&environment).to_string());
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&level));

        let layer = match config.format {
            LogFormat::Json => fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_level(true)
                .json()
                .with_filter(filter)
                .boxed(),
            LogFormat::Pretty => fmt::layer()
                .with_target(true)
                .with_level(true)
                .with_ansi(true)
                .with_filter(filter)
                .boxed(),
        };

        // A host application may already own the global subscriber
        if tracing_subscriber::registry().with(layer).try_init().is_err() {
            tracing::debug!("Global tracing subscriber already initialized - keeping existing one");
        }

        tracing::info!(
            environment = %environment,
            level = %level,
            "Structured logging initialized"
        );
    });
}

fn get_log_level(environment: &str) -> &'static str {
    match environment {
        "production" => "info",
        _ => "debug",
    }
}

/// One executed sub-batch
pub fn log_sub_batch(
    migration: &str,
    operation: &str,
    window: BatchWindow,
    affected_rows: u64,
    skipped_rows: usize,
    duration: Duration,
) {
    tracing::debug!(
        migration = %migration,
        operation = %operation,
        lower = window.lower,
        upper = window.upper,
        affected_rows = affected_rows,
        skipped_rows = skipped_rows,
        duration_ms = duration.as_millis() as u64,
        "SUB_BATCH"
    );
}

/// A row excluded from a sub-batch because of an anticipated row-scoped fault
pub fn log_row_skipped(migration: &str, key: i64, code: Option<&str>, message: &str) {
    tracing::warn!(
        migration = %migration,
        key = key,
        code = code,
        message = %message,
        "ROW_SKIPPED"
    );
}

pub fn log_job_transition(migration: &str, from: JobState, to: JobState, window: BatchWindow) {
    tracing::info!(
        migration = %migration,
        from_state = %from,
        to_state = %to,
        start_id = window.lower,
        end_id = window.upper,
        timestamp = %Utc::now().to_rfc3339(),
        "JOB_TRANSITION"
    );
}

/// Log error with full context
pub fn log_error(component: &str, operation: &str, error: &str, context: Option<&str>) {
    tracing::error!(
        component = %component,
        operation = %operation,
        error = %error,
        context = context,
        timestamp = %Utc::now().to_rfc3339(),
        "ERROR"
    );
}
