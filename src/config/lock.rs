use std::time::Duration;

use config::ConfigError;
use serde::Deserialize;
use serde::Serialize;

use crate::Error;
use crate::Result;

/// Target lock reclaim policy
///
/// ```toml
/// [lock]
/// stale_after_secs = 7200
/// sweep_interval_ms = 30000
/// ```
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct LockConfig {
    /// Age after which a held lock is considered abandoned by a crashed owner
    ///
    /// Unset by default: no lock is ever reclaimed automatically and a lock
    /// left behind by a crashed process stays until removed out of band.
    #[serde(default)]
    pub stale_after_secs: Option<u64>,

    /// Period of the background reclaim sweep. Only used when
    /// `stale_after_secs` is set.
    ///
    /// **Default**: 30000
    #[serde(default = "default_sweep_interval_ms")]
    pub sweep_interval_ms: u64,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            stale_after_secs: None,
            sweep_interval_ms: default_sweep_interval_ms(),
        }
    }
}

impl LockConfig {
    pub fn validate(&self) -> Result<()> {
        if let Some(0) = self.stale_after_secs {
            return Err(Error::Config(ConfigError::Message(
                "lock.stale_after_secs must be greater than 0 when set".into(),
            )));
        }

        if self.sweep_interval_ms < 100 {
            return Err(Error::Config(ConfigError::Message(
                "lock.sweep_interval_ms must be at least 100ms".into(),
            )));
        }

        Ok(())
    }

    pub fn stale_after(&self) -> Option<Duration> {
        self.stale_after_secs.map(Duration::from_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }
}

fn default_sweep_interval_ms() -> u64 {
    30_000
}
