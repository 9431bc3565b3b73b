use config::ConfigError;
use serde::Deserialize;
use serde::Serialize;
use tracing::warn;

use crate::Error;
use crate::Result;

/// Log ingestion and live fan-out configuration
///
/// ```toml
/// [log_hub]
/// watcher_buffer_size = 1000
/// enable_metrics = false
/// default_source = "app"
/// max_lines = 5000
/// ```
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct LogHubConfig {
    /// Capacity of each watcher's delivery queue
    ///
    /// A full queue drops new entries for that watcher only; the ingester
    /// never waits on a slow subscriber.
    ///
    /// **Default**: 1000
    #[serde(default = "default_watcher_buffer_size")]
    pub watcher_buffer_size: usize,

    /// Log a warning for every entry dropped on a full watcher queue
    ///
    /// The drop counter metric is maintained regardless.
    ///
    /// **Default**: false
    #[serde(default = "default_enable_metrics")]
    pub enable_metrics: bool,

    /// Source recorded when an entry is ingested without one
    #[serde(default = "default_source")]
    pub default_source: String,

    /// Upper bound on the number of stored entries returned by one `last_logs` call
    #[serde(default = "default_max_lines")]
    pub max_lines: usize,
}

impl Default for LogHubConfig {
    fn default() -> Self {
        Self {
            watcher_buffer_size: default_watcher_buffer_size(),
            enable_metrics: default_enable_metrics(),
            default_source: default_source(),
            max_lines: default_max_lines(),
        }
    }
}

impl LogHubConfig {
    pub fn validate(&self) -> Result<()> {
        if self.watcher_buffer_size == 0 {
            return Err(Error::Config(ConfigError::Message(
                "log_hub.watcher_buffer_size must be greater than 0".into(),
            )));
        }

        if self.watcher_buffer_size > 100_000 {
            warn!(
                "log_hub.watcher_buffer_size ({}) is very large. Every live tail may hold that many entries in memory",
                self.watcher_buffer_size
            );
        }

        if self.default_source.is_empty() {
            return Err(Error::Config(ConfigError::Message(
                "log_hub.default_source cannot be empty".into(),
            )));
        }

        if self.max_lines == 0 {
            return Err(Error::Config(ConfigError::Message(
                "log_hub.max_lines must be greater than 0".into(),
            )));
        }

        Ok(())
    }
}

fn default_watcher_buffer_size() -> usize {
    1000
}

fn default_enable_metrics() -> bool {
    false
}

fn default_source() -> String {
    "app".to_string()
}

fn default_max_lines() -> usize {
    5000
}
