//! Application configuration module
//!
//! Settings are layered: built-in defaults, then an optional
//! `flash.config.json`, then `FLASH__*` environment variables. The database
//! URL itself is read from the environment variable named by
//! `database.url_env`.

use crate::db::Provider;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Default location of the project configuration file
pub const DEFAULT_CONFIG_FILE: &str = "flash.config.json";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("Missing required environment variable: {0}")]
    MissingVar(String),

    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

/// Database configuration
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Explicit provider; inferred from the URL scheme when absent
    #[serde(default)]
    pub provider: Option<Provider>,
    /// Name of the environment variable holding the connection URL
    pub url_env: String,
    /// Resolved connection URL (filled in by `Settings::load`)
    #[serde(default)]
    pub url: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            provider: None,
            url_env: "DATABASE_URL".to_string(),
            url: String::new(),
        }
    }
}

impl DatabaseConfig {
    /// Provider for this database, explicit or inferred from the URL
    pub fn resolved_provider(&self) -> Result<Provider, ConfigError> {
        if let Some(provider) = self.provider {
            return Ok(provider);
        }
        Provider::from_url(&self.url).ok_or_else(|| {
            ConfigError::InvalidValue(format!(
                "Cannot infer database provider from URL in {}",
                self.url_env
            ))
        })
    }
}

/// Batch sizes for the export/import engines
#[derive(Debug, Clone, Deserialize)]
pub struct TransferConfig {
    pub export_batch_size: usize,
    pub insert_batch_size: usize,
    pub key_check_batch_size: usize,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            export_batch_size: 1000,
            insert_batch_size: 100,
            key_check_batch_size: 500,
        }
    }
}

impl TransferConfig {
    /// Every batch size must be at least one
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.export_batch_size == 0 || self.insert_batch_size == 0 || self.key_check_batch_size == 0 {
            return Err(ConfigError::InvalidValue(
                "transfer batch sizes must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Complete application settings
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub database: DatabaseConfig,
    pub migrations_path: PathBuf,
    pub export_path: PathBuf,
    #[serde(default)]
    pub transfer: TransferConfig,
    /// Deadline applied to each core operation, in seconds
    #[serde(default)]
    pub statement_timeout_secs: Option<u64>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            database: DatabaseConfig::default(),
            migrations_path: PathBuf::from("db/migrations"),
            export_path: PathBuf::from("db/export"),
            transfer: TransferConfig::default(),
            statement_timeout_secs: None,
        }
    }
}

impl Settings {
    /// Load settings from the config file and the environment
    pub fn load() -> Result<Self, ConfigError> {
        // Load .env file if it exists (ignore errors if file not found)
        let _ = dotenvy::dotenv();

        let path = std::env::var("FLASH_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_FILE.to_string());
        let mut settings = Self::from_sources(&path)?;

        settings.database.url = std::env::var(&settings.database.url_env)
            .map_err(|_| ConfigError::MissingVar(settings.database.url_env.clone()))?;
        settings.database.resolved_provider()?;

        Ok(settings)
    }

    /// Build settings from defaults, an optional JSON file and `FLASH__*` variables
    pub fn from_sources(path: &str) -> Result<Self, ConfigError> {
        let defaults = Settings::default();

        let settings: Settings = config::Config::builder()
            .set_default("database.url_env", defaults.database.url_env.as_str())?
            .set_default("migrations_path", defaults.migrations_path.to_string_lossy().as_ref())?
            .set_default("export_path", defaults.export_path.to_string_lossy().as_ref())?
            .set_default("transfer.export_batch_size", defaults.transfer.export_batch_size as u64)?
            .set_default("transfer.insert_batch_size", defaults.transfer.insert_batch_size as u64)?
            .set_default("transfer.key_check_batch_size", defaults.transfer.key_check_batch_size as u64)?
            .add_source(config::File::new(path, config::FileFormat::Json).required(false))
            .add_source(config::Environment::with_prefix("FLASH").separator("__"))
            .build()?
            .try_deserialize()?;

        settings.transfer.validate()?;
        Ok(settings)
    }

    /// Deadline duration for a core operation, if configured
    pub fn statement_timeout(&self) -> Option<Duration> {
        self.statement_timeout_secs.map(Duration::from_secs)
    }
}
