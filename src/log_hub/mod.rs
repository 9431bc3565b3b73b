//! Application log ingestion and live fan-out.
//!
//! ```text
//! add() -> KvStore insert -> registry.get(app) -> try_send(per-watcher queue)
//!                                                        |
//! follow_logs():   select { cancel, watcher.recv() } -> LogEncoder
//! ```
//!
//! Delivery to a watcher never blocks the ingester. A full queue drops the
//! entry for that watcher only and bumps the dropped-entries counter.

mod hub;
mod tail;
mod watcher;

#[cfg(test)]
mod hub_test;

pub use hub::*;
pub use tail::*;
pub use watcher::*;

use chrono::DateTime;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;

use crate::Error;
use crate::Result;

/// One immutable application log entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Applog {
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "appname")]
    pub app_name: String,
    pub message: String,
    pub source: String,
    pub unit: String,
}

/// Source and unit selector. Empty fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogFilter {
    pub source: String,
    pub unit: String,
}

impl LogFilter {
    pub fn new(
        source: impl Into<String>,
        unit: impl Into<String>,
    ) -> Self {
        Self {
            source: source.into(),
            unit: unit.into(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.source.is_empty() && self.unit.is_empty()
    }

    pub fn matches(
        &self,
        entry: &Applog,
    ) -> bool {
        (self.source.is_empty() || self.source == entry.source)
            && (self.unit.is_empty() || self.unit == entry.unit)
    }
}

/// Parameters of a log read request.
#[derive(Debug, Clone, Default)]
pub struct LogQuery {
    /// Number of stored entries to return before following
    pub lines: usize,
    pub filter: LogFilter,
    /// Return entries not matching `filter`
    pub invert: bool,
    /// Keep streaming new entries after the stored ones
    pub follow: bool,
}

impl LogQuery {
    pub fn validate(&self) -> Result<()> {
        if self.lines == 0 {
            return Err(Error::Validation(
                "parameter lines is mandatory and must be greater than 0".into(),
            ));
        }
        if self.invert && self.follow {
            return Err(Error::Validation(
                "inverted filters are not supported while following logs".into(),
            ));
        }
        Ok(())
    }
}

pub(crate) fn validate_app_name(app: &str) -> Result<()> {
    if app.is_empty() {
        return Err(Error::Validation("app name is mandatory".into()));
    }
    if app.contains('\0') {
        return Err(Error::Validation(format!("app name {app:?} contains a NUL byte")));
    }
    Ok(())
}
