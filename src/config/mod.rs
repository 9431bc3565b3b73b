//! Configuration management for the control plane core.
//!
//! Provides hierarchical configuration loading and validation with:
//! - Default values as code base
//! - Configuration file support
//! - Environment variable overrides
//! - Component-wise validation
mod lock;
mod log_hub;
mod monitoring;
mod storage;
pub use lock::*;
pub use log_hub::*;
pub use monitoring::*;
pub use storage::*;

use std::env;
use std::path::PathBuf;

use config::Config;
use config::ConfigError;
use config::Environment;
use config::File;
use serde::Deserialize;
use serde::Serialize;

use crate::Error;
use crate::Result;

pub(crate) const ENV_PREFIX: &str = "LOCKSTEP";

/// Main configuration container
///
/// Combines all subsystem configurations with hierarchical override support:
/// 1. Default values from code implementation
/// 2. Configuration file specified by `CONFIG_PATH`
/// 3. Environment variables with `LOCKSTEP__` prefix (highest priority)
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct PlaneConfig {
    /// Durable store location and write policy
    #[serde(default)]
    pub storage: StorageConfig,
    /// Target lock staleness and reclaim sweep
    #[serde(default)]
    pub lock: LockConfig,
    /// Log ingestion and live tail fan-out
    #[serde(default)]
    pub log_hub: LogHubConfig,
    /// Metrics exporter
    #[serde(default)]
    pub monitoring: MonitoringConfig,
    /// Directory for the daemon's own trace output
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,
}

impl Default for PlaneConfig {
    fn default() -> Self {
        Self {
            storage: StorageConfig::default(),
            lock: LockConfig::default(),
            log_hub: LogHubConfig::default(),
            monitoring: MonitoringConfig::default(),
            log_dir: default_log_dir(),
        }
    }
}

impl PlaneConfig {
    /// Loads configuration from hierarchical sources without validation.
    ///
    /// Callers MUST call `validate()` once all overrides are applied.
    ///
    /// # Examples
    /// ```ignore
    /// std::env::set_var("CONFIG_PATH", "config/lockstep.toml");
    /// std::env::set_var("LOCKSTEP__LOCK__STALE_AFTER_SECS", "3600");
    /// let cfg = PlaneConfig::new()?.validate()?;
    /// ```
    pub fn new() -> Result<Self> {
        let mut builder = Config::builder().add_source(Config::try_from(&Self::default())?);

        if let Ok(config_path) = env::var("CONFIG_PATH") {
            builder = builder.add_source(File::with_name(&config_path).required(true));
        }

        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .separator("__")
                .ignore_empty(true)
                .try_parsing(true),
        );

        let config: Self = builder.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Applies additional configuration overrides from file without validation.
    ///
    /// Merging order (later sources override earlier):
    /// 1. Current configuration values
    /// 2. New configuration file
    /// 3. Latest environment variables (highest priority)
    pub fn with_override_config(
        &self,
        path: &str,
    ) -> Result<Self> {
        let config: Self = Config::builder()
            .add_source(Config::try_from(self)?)
            .add_source(File::with_name(path))
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .ignore_empty(true)
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;
        Ok(config)
    }

    /// Validates configuration and returns validated instance.
    pub fn validate(self) -> Result<Self> {
        self.storage.validate()?;
        self.lock.validate()?;
        self.log_hub.validate()?;
        self.monitoring.validate()?;
        if self.log_dir.as_os_str().is_empty() {
            return Err(Error::Config(ConfigError::Message("log_dir cannot be empty".into())));
        }
        Ok(self)
    }
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("./logs")
}
