//! Application configuration.
//!
//! Aggregates the storage, provisioning and ingestion sections into a
//! single Config struct that can be loaded from YAML files or environment
//! variables.

mod storage;

pub use storage::{BillingMode, Capacity, StorageConfig};

use serde::Deserialize;

use crate::ingest::ReentryPolicy;

/// Default configuration file name.
pub const DEFAULT_CONFIG_FILE: &str = "research-store.yaml";
/// Environment variable for configuration file path.
pub const CONFIG_ENV_VAR: &str = "RESEARCH_STORE_CONFIG";
/// Prefix for configuration environment variables.
pub const CONFIG_ENV_PREFIX: &str = "RESEARCH_STORE";
/// Environment variable for logging configuration.
pub const LOG_ENV_VAR: &str = "RESEARCH_STORE_LOG";

/// Deployment variable naming the shared table.
pub const TABLE_NAME_ENV_VAR: &str = "DYNAMODB_TABLE";
/// Deployment variable naming the AWS region.
pub const REGION_ENV_VAR: &str = "AWS_REGION";
/// Fallback region variable.
pub const DEFAULT_REGION_ENV_VAR: &str = "AWS_DEFAULT_REGION";

/// Configuration loading errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Configuration error: {0}")]
    Load(#[from] ::config::ConfigError),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Main application configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Table, region and client settings.
    pub storage: StorageConfig,
    /// Bootstrap provisioning settings.
    pub provisioning: ProvisioningConfig,
    /// Response ingestion settings.
    pub ingest: IngestConfig,
}

/// Bootstrap provisioning settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProvisioningConfig {
    /// Run provisioning at all. When false, initialization records
    /// `Skipped` and touches nothing (the table is managed elsewhere).
    pub enabled: bool,
    /// First delay between status checks, in milliseconds.
    pub poll_min_delay_ms: u64,
    /// Upper bound on the delay between status checks, in milliseconds.
    pub poll_max_delay_ms: u64,
    /// Status checks before giving up with a timeout.
    pub max_poll_attempts: usize,
}

impl Default for ProvisioningConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            poll_min_delay_ms: 1_000,
            poll_max_delay_ms: 10_000,
            max_poll_attempts: 30,
        }
    }
}

/// Response ingestion settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// What to do when a lower reentryCount arrives after a higher one.
    pub reentry_policy: ReentryPolicy,
    /// Retries after a failed conditional write.
    pub conflict_retries: usize,
    pub conflict_min_delay_ms: u64,
    pub conflict_max_delay_ms: u64,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            reentry_policy: ReentryPolicy::default(),
            conflict_retries: 5,
            conflict_min_delay_ms: 10,
            conflict_max_delay_ms: 500,
        }
    }
}

impl Config {
    /// Load configuration from file and environment.
    ///
    /// Configuration sources (in order of priority, later overrides earlier):
    /// 1. `research-store.yaml` in current directory (if exists)
    /// 2. File specified by `path` argument (if provided)
    /// 3. File specified by `CONFIG_ENV_VAR` environment variable (if set)
    /// 4. Environment variables with `CONFIG_ENV_PREFIX` prefix
    /// 5. `DYNAMODB_TABLE` and `AWS_REGION` / `AWS_DEFAULT_REGION`
    pub fn load(path: Option<&str>) -> Result<Self, ConfigError> {
        use ::config::{Config as ConfigLib, Environment, File, FileFormat};

        let mut builder = ConfigLib::builder()
            .add_source(File::new(DEFAULT_CONFIG_FILE, FileFormat::Yaml).required(false));

        if let Some(config_path) = path {
            builder = builder.add_source(File::new(config_path, FileFormat::Yaml).required(true));
        }

        if let Ok(config_path) = std::env::var(CONFIG_ENV_VAR) {
            builder = builder.add_source(File::new(&config_path, FileFormat::Yaml).required(true));
        }

        let config = builder
            .add_source(
                Environment::with_prefix(CONFIG_ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let mut config: Config = config.try_deserialize()?;
        config.apply_deployment_env();
        config.validate()?;
        Ok(config)
    }

    /// Create config for testing.
    pub fn for_test() -> Self {
        Self::default()
    }

    fn apply_deployment_env(&mut self) {
        if let Some(table) = non_empty_env(TABLE_NAME_ENV_VAR) {
            self.storage.table_name = table;
        }
        if let Some(region) =
            non_empty_env(REGION_ENV_VAR).or_else(|| non_empty_env(DEFAULT_REGION_ENV_VAR))
        {
            self.storage.region = Some(region);
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.storage.table_name.trim().is_empty() {
            return Err(ConfigError::Invalid("storage.table_name is empty".into()));
        }
        if self.provisioning.max_poll_attempts == 0 {
            return Err(ConfigError::Invalid(
                "provisioning.max_poll_attempts must be at least 1".into(),
            ));
        }
        if self.provisioning.poll_min_delay_ms > self.provisioning.poll_max_delay_ms {
            return Err(ConfigError::Invalid(
                "provisioning.poll_min_delay_ms exceeds poll_max_delay_ms".into(),
            ));
        }
        Ok(())
    }
}

fn non_empty_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}
