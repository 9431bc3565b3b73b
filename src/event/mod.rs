//! Auditable operation events.
//!
//! An [`Event`] is created when a mutating operation starts. Creating it locks
//! the operation's target(s); finishing it releases them and persists the
//! terminal audit record. Dropping a running event finishes it with an abort
//! error, so every exit path of the owning operation releases its locks.

mod custom_data;
#[allow(clippy::module_inception)]
mod event;
mod sink;
mod store;


pub use custom_data::*;
pub use event::*;
pub use sink::*;
pub use store::*;

use chrono::DateTime;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

use crate::Allowed;
use crate::Principal;
use crate::Target;

/// An additional resource involved in an operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtraTarget {
    pub target: Target,
    /// Whether the target must be held exclusively for the event's lifetime
    pub lock: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventState {
    Running,
    Done,
}

/// Input of [`EventManager::start`].
#[derive(Debug, Clone)]
pub struct EventOpts {
    pub target: Target,
    pub extra_targets: Vec<ExtraTarget>,
    /// Operation identifier, usually the permission the command requires
    pub kind: String,
    pub owner: Principal,
    pub custom_data: Value,
    /// Who may later read this event's record
    pub allowed: Allowed,
}

impl EventOpts {
    pub fn new(
        target: Target,
        kind: impl Into<String>,
        owner: Principal,
        allowed: Allowed,
    ) -> Self {
        Self {
            target,
            extra_targets: Vec::new(),
            kind: kind.into(),
            owner,
            custom_data: Value::Null,
            allowed,
        }
    }

    pub fn with_extra_target(
        mut self,
        target: Target,
        lock: bool,
    ) -> Self {
        self.extra_targets.push(ExtraTarget { target, lock });
        self
    }

    pub fn with_custom_data(
        mut self,
        custom_data: Value,
    ) -> Self {
        self.custom_data = custom_data;
        self
    }
}

/// Persisted audit record of one operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    pub id: String,
    pub target: Target,
    #[serde(default)]
    pub extra_targets: Vec<ExtraTarget>,
    pub kind: String,
    pub owner: Principal,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub error: Option<String>,
    pub custom_data: Value,
    pub allowed: Allowed,
    pub state: EventState,
    /// Progress text written while the operation ran
    #[serde(default)]
    pub log: String,
}

impl EventRecord {
    pub fn is_running(&self) -> bool {
        self.state == EventState::Running
    }

    /// Whether `target` is the primary target or one of the extra targets.
    pub fn involves(
        &self,
        target: &Target,
    ) -> bool {
        &self.target == target || self.extra_targets.iter().any(|e| &e.target == target)
    }
}
