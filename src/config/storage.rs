use std::path::PathBuf;

use config::ConfigError;
use serde::Deserialize;
use serde::Serialize;

use crate::Error;
use crate::Result;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct StorageConfig {
    /// Database directory, opened exclusively by one process
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    /// Flush after each lock or record write
    ///
    /// Disabling trades crash durability of the last few milliseconds of
    /// writes for throughput.
    #[serde(default = "default_flush_on_write")]
    pub flush_on_write: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            flush_on_write: default_flush_on_write(),
        }
    }
}

impl StorageConfig {
    pub fn validate(&self) -> Result<()> {
        if self.db_path.as_os_str().is_empty() {
            return Err(Error::Config(ConfigError::Message(
                "storage.db_path cannot be empty".into(),
            )));
        }
        Ok(())
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("./db/lockstep")
}

fn default_flush_on_write() -> bool {
    true
}
