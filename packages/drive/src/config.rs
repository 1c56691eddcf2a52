use common::config::StorageConfig;
use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    /// PostgreSQL connection string, or `memory` for the in-process store.
    pub url: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DriveConfig {
    /// Largest accepted upload, in bytes.
    pub max_upload_size: u64,
}

impl Default for DriveConfig {
    fn default() -> Self {
        Self {
            max_upload_size: 512 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ReconcileConfig {
    /// Delete orphaned blobs instead of only reporting them.
    pub apply: bool,
    /// Blobs younger than this are never treated as orphans, since an
    /// upload stores its blob before the record that references it.
    pub min_age_secs: u64,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            apply: false,
            min_age_secs: 3600,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    pub drive: DriveConfig,
    pub reconcile: ReconcileConfig,
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        Self::builder()?
            // Load from config/config.toml
            .add_source(File::with_name("config/config").required(false))
            // Override from environment (e.g., DRIVE__DATABASE__URL)
            .add_source(Environment::with_prefix("DRIVE").separator("__"))
            .build()?
            .try_deserialize()
    }

    fn builder() -> Result<config::ConfigBuilder<config::builder::DefaultState>, ConfigError> {
        Config::builder()
            .set_default("database.url", "memory")?
            .set_default("drive.max_upload_size", DriveConfig::default().max_upload_size)?
            .set_default("reconcile.apply", false)?
            .set_default("reconcile.min_age_secs", ReconcileConfig::default().min_age_secs)
    }
}
