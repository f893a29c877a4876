//! Configuration Loader
//!
//! Environment-aware configuration loading. A base YAML file is overlaid by an
//! environment-specific file and then by environment variables.

use super::error::{ConfigResult, ConfigurationError};
use super::MigrationConfig;
use config::{Config, Environment, File, FileFormat};
use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

const BASE_FILE_STEM: &str = "batched_migrations";
const ENV_PREFIX: &str = "BATCHED_MIGRATIONS";
const ENV_SEPARATOR: &str = "__";

pub struct ConfigManager {
    config: MigrationConfig,
    environment: String,
    config_directory: PathBuf,
}

impl ConfigManager {
    /// Load configuration with environment auto-detection
    pub fn load() -> ConfigResult<Arc<ConfigManager>> {
        Self::load_from_directory(None)
    }

    /// Load configuration from a specific directory
    pub fn load_from_directory(config_dir: Option<PathBuf>) -> ConfigResult<Arc<ConfigManager>> {
        let environment = Self::detect_environment();
        Self::load_from_directory_with_env(config_dir, &environment)
    }

    /// Load configuration from a specific directory with explicit environment
    pub fn load_from_directory_with_env(
        config_dir: Option<PathBuf>,
        environment: &str,
    ) -> ConfigResult<Arc<ConfigManager>> {
        Self::load_with_sources(config_dir, environment, None)
    }

    /// Load with an explicit variable map standing in for the process environment.
    ///
    /// Tests use this to avoid mutating global environment variables.
    pub fn load_with_sources(
        config_dir: Option<PathBuf>,
        environment: &str,
        variables: Option<config::Map<String, String>>,
    ) -> ConfigResult<Arc<ConfigManager>> {
        let config_directory = config_dir.unwrap_or_else(Self::default_config_directory);

        if !config_directory.is_dir() {
            return Err(ConfigurationError::DirectoryNotFound {
                path: config_directory,
            });
        }

        debug!(
            environment = %environment,
            directory = %config_directory.display(),
            "Loading batched migration configuration"
        );

        let database_url = match &variables {
            Some(vars) => vars.get("DATABASE_URL").cloned(),
            None => env::var("DATABASE_URL").ok(),
        };

        let mut config = Self::load_and_merge_config(&config_directory, environment, variables)?;

        if let Some(url) = database_url {
            config.database.url = url;
        }

        config.validate()?;

        debug!(
            environment = %environment,
            pool = config.database.pool,
            sub_batch_size = config.batching.sub_batch_size,
            pause_ms = config.batching.pause_ms,
            "Configuration loaded successfully"
        );

        Ok(Arc::new(ConfigManager {
            config,
            environment: environment.to_string(),
            config_directory,
        }))
    }

    pub fn config(&self) -> &MigrationConfig {
        &self.config
    }

    pub fn environment(&self) -> &str {
        &self.environment
    }

    pub fn config_directory(&self) -> &Path {
        &self.config_directory
    }

    /// Current environment, falling back to `development`
    pub fn detect_environment() -> String {
        env::var("BATCHED_MIGRATIONS_ENV")
            .or_else(|_| env::var("RAILS_ENV"))
            .or_else(|_| env::var("APP_ENV"))
            .unwrap_or_else(|_| "development".to_string())
    }

    fn default_config_directory() -> PathBuf {
        env::var("BATCHED_MIGRATIONS_CONFIG_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                env::current_dir()
                    .unwrap_or_else(|_| PathBuf::from("."))
                    .join("config")
            })
    }

    fn load_and_merge_config(
        config_directory: &Path,
        environment: &str,
        variables: Option<config::Map<String, String>>,
    ) -> ConfigResult<MigrationConfig> {
        let base = config_directory.join(format!("{BASE_FILE_STEM}.yaml"));
        let overlay = config_directory.join(format!("{BASE_FILE_STEM}.{environment}.yaml"));

        let settings = Config::builder()
            .add_source(File::from(base).format(FileFormat::Yaml).required(false))
            .add_source(File::from(overlay).format(FileFormat::Yaml).required(false))
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator(ENV_SEPARATOR)
                    .separator(ENV_SEPARATOR)
                    .try_parsing(true)
                    .source(variables),
            )
            .build()
            .map_err(|e| ConfigurationError::load_error(environment, e))?;

        settings
            .try_deserialize::<MigrationConfig>()
            .map_err(|e| ConfigurationError::load_error(environment, e))
    }
}
