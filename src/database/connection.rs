use crate::config::DatabaseConfig;
use crate::database::PgMigrationConnection;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};

pub struct DatabaseConnection {
    pool: PgPool,
    config: DatabaseConfig,
}

impl DatabaseConnection {
    pub async fn new(config: &DatabaseConfig) -> Result<Self, sqlx::Error> {
        let pool = PgPoolOptions::new()
            .max_connections(config.pool)
            .acquire_timeout(config.acquire_timeout())
            .connect(&config.url)
            .await?;

        Ok(Self {
            pool,
            config: config.clone(),
        })
    }

    /// Wrap an existing pool, e.g. one handed out by `#[sqlx::test]`
    pub fn from_pool(pool: PgPool, config: &DatabaseConfig) -> Self {
        Self {
            pool,
            config: config.clone(),
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Connection handle for a migration job, carrying the configured statement timeout
    pub fn migration_connection(&self) -> PgMigrationConnection {
        PgMigrationConnection::new(self.pool.clone())
            .with_statement_timeout(self.config.statement_timeout())
    }

    pub async fn health_check(&self) -> Result<bool, sqlx::Error> {
        let row = sqlx::query("SELECT 1 as health")
            .fetch_one(&self.pool)
            .await?;

        let health: i32 = row.get("health");
        Ok(health == 1)
    }

    pub async fn close(self) {
        self.pool.close().await;
    }
}
