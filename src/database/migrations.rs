//! # Schema Migration Harness
//!
//! Applies `YYYYMMDDHHMMSS_description.sql` files in version order and records each
//! applied version. `run_up_to` stops at a given version, which lets a test pin the
//! schema to the state a data migration was written against.
//!
//! ## Concurrency Control
//!
//! Runners serialize on a PostgreSQL advisory lock held on one pooled connection for
//! the whole run:
//!
//! ```sql
//! SELECT pg_advisory_lock(7291046153882716)
//! ```

use crate::constants::SCHEMA_VERSIONS_TABLE;
use sqlx::pool::PoolConnection;
use sqlx::{PgPool, Postgres, Row};
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

const LOCK_KEY: i64 = 7_291_046_153_882_716;

/// Represents a single schema file.
#[derive(Debug, Clone, PartialEq)]
pub struct Migration {
    /// Version timestamp (YYYYMMDDHHMMSS format)
    pub version: String,
    /// Human-readable migration name
    pub name: String,
    /// Full path to the SQL file
    pub path: PathBuf,
}

/// Applies schema files from one directory.
pub struct DatabaseMigrations {
    directory: PathBuf,
}

impl DatabaseMigrations {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
        }
    }

    /// Apply every outstanding file; returns the versions applied by this call
    pub async fn run_all(&self, pool: &PgPool) -> Result<Vec<String>, sqlx::Error> {
        self.run(pool, None).await
    }

    /// Apply outstanding files with a version `<= target_version`
    pub async fn run_up_to(
        &self,
        pool: &PgPool,
        target_version: &str,
    ) -> Result<Vec<String>, sqlx::Error> {
        self.run(pool, Some(target_version)).await
    }

    /// Versions recorded as applied
    pub async fn applied_versions(&self, pool: &PgPool) -> Result<HashSet<String>, sqlx::Error> {
        let mut conn = pool.acquire().await?;
        Self::ensure_migration_table(&mut conn).await?;
        Self::get_applied_migrations(&mut conn).await
    }

    async fn run(
        &self,
        pool: &PgPool,
        target_version: Option<&str>,
    ) -> Result<Vec<String>, sqlx::Error> {
        let mut conn = pool.acquire().await?;

        sqlx::query("SELECT pg_advisory_lock($1)")
            .bind(LOCK_KEY)
            .execute(&mut *conn)
            .await?;

        let result = self.run_locked(&mut conn, target_version).await;

        // Always release the lock
        sqlx::query("SELECT pg_advisory_unlock($1)")
            .bind(LOCK_KEY)
            .execute(&mut *conn)
            .await?;

        result
    }

    async fn run_locked(
        &self,
        conn: &mut PoolConnection<Postgres>,
        target_version: Option<&str>,
    ) -> Result<Vec<String>, sqlx::Error> {
        Self::ensure_migration_table(conn).await?;

        let migrations = self.discover_migrations()?;
        let applied = Self::get_applied_migrations(conn).await?;
        let mut newly_applied = Vec::new();

        for migration in migrations.values() {
            if target_version.is_some_and(|target| migration.version.as_str() > target) {
                break;
            }
            if applied.contains(&migration.version) {
                continue;
            }

            info!(
                version = %migration.version,
                name = %migration.name,
                "Applying schema migration"
            );
            Self::run_migration(conn, migration).await?;
            newly_applied.push(migration.version.clone());
        }

        Ok(newly_applied)
    }

    /// Discover all migration files in the directory, ordered by version
    pub fn discover_migrations(&self) -> Result<BTreeMap<String, Migration>, sqlx::Error> {
        if !self.directory.exists() {
            return Ok(BTreeMap::new());
        }

        let mut migrations = BTreeMap::new();

        for entry in fs::read_dir(&self.directory).map_err(sqlx::Error::Io)? {
            let entry = entry.map_err(sqlx::Error::Io)?;
            let path = entry.path();

            if path.is_file() && path.extension().map(|s| s == "sql").unwrap_or(false) {
                if let Some(filename) = path.file_stem().and_then(|s| s.to_str()) {
                    if let Some((version, name)) = Self::parse_migration_filename(filename) {
                        migrations.insert(
                            version.clone(),
                            Migration {
                                version,
                                name,
                                path,
                            },
                        );
                    }
                }
            }
        }

        Ok(migrations)
    }

    /// Parse `YYYYMMDDHHMMSS_migration_name` into version and name
    fn parse_migration_filename(filename: &str) -> Option<(String, String)> {
        if filename.len() < 15 || !filename.is_char_boundary(14) {
            return None;
        }

        let (version_part, name_part) = filename.split_at(14);

        if !version_part.chars().all(|c| c.is_ascii_digit()) {
            return None;
        }

        let name = name_part.strip_prefix('_')?.replace('_', " ");

        Some((version_part.to_string(), name))
    }

    async fn ensure_migration_table(conn: &mut PoolConnection<Postgres>) -> Result<(), sqlx::Error> {
        let sql = format!(
            "CREATE TABLE IF NOT EXISTS {SCHEMA_VERSIONS_TABLE} (
                version VARCHAR(14) PRIMARY KEY,
                applied_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )"
        );
        sqlx::raw_sql(&sql).execute(&mut **conn).await?;
        Ok(())
    }

    async fn get_applied_migrations(
        conn: &mut PoolConnection<Postgres>,
    ) -> Result<HashSet<String>, sqlx::Error> {
        let sql = format!("SELECT version FROM {SCHEMA_VERSIONS_TABLE}");
        let rows = sqlx::query(&sql).fetch_all(&mut **conn).await?;

        Ok(rows
            .into_iter()
            .map(|row| row.get::<String, _>("version"))
            .collect())
    }

    /// Run the file and record its version in one transaction
    async fn run_migration(
        conn: &mut PoolConnection<Postgres>,
        migration: &Migration,
    ) -> Result<(), sqlx::Error> {
        let sql = Self::read_migration(&migration.path)?;
        let record = format!("INSERT INTO {SCHEMA_VERSIONS_TABLE} (version) VALUES ($1)");

        let mut tx = sqlx::Connection::begin(&mut **conn).await?;
        sqlx::raw_sql(&sql).execute(&mut *tx).await?;
        sqlx::query(&record)
            .bind(&migration.version)
            .execute(&mut *tx)
            .await?;
        tx.commit().await
    }

    fn read_migration(path: &Path) -> Result<String, sqlx::Error> {
        fs::read_to_string(path).map_err(sqlx::Error::Io)
    }
}
