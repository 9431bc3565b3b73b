//! Lockable resource identifiers.
//!
//! A [`Target`] names one resource (an app, a pool, a node, ...) and is used both
//! as the lock key inside the [`LockManager`](crate::LockManager) and as an audit
//! query dimension inside the [`EventStore`](crate::EventStore).

use std::fmt;
use std::str::FromStr;

use serde::Deserialize;
use serde::Serialize;

use crate::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TargetKind {
    App,
    Container,
    Node,
    Platform,
    Pool,
    Role,
    ServiceInstance,
    Team,
    User,
}

impl TargetKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TargetKind::App => "app",
            TargetKind::Container => "container",
            TargetKind::Node => "node",
            TargetKind::Platform => "platform",
            TargetKind::Pool => "pool",
            TargetKind::Role => "role",
            TargetKind::ServiceInstance => "service-instance",
            TargetKind::Team => "team",
            TargetKind::User => "user",
        }
    }
}

impl fmt::Display for TargetKind {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TargetKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "app" => Ok(TargetKind::App),
            "container" => Ok(TargetKind::Container),
            "node" => Ok(TargetKind::Node),
            "platform" => Ok(TargetKind::Platform),
            "pool" => Ok(TargetKind::Pool),
            "role" => Ok(TargetKind::Role),
            "service-instance" => Ok(TargetKind::ServiceInstance),
            "team" => Ok(TargetKind::Team),
            "user" => Ok(TargetKind::User),
            other => Err(Error::Validation(format!("unknown target kind {other:?}"))),
        }
    }
}

/// Identifier of a lockable resource.
///
/// Ordering is by kind first, then by value. The lock manager relies on this
/// ordering to acquire multi-target locks in a deterministic sequence.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Target {
    #[serde(rename = "type")]
    pub kind: TargetKind,
    pub value: String,
}

impl Target {
    pub fn new(
        kind: TargetKind,
        value: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            value: value.into(),
        }
    }

    pub fn app(name: impl Into<String>) -> Self {
        Self::new(TargetKind::App, name)
    }

    pub fn pool(name: impl Into<String>) -> Self {
        Self::new(TargetKind::Pool, name)
    }

    pub fn node(address: impl Into<String>) -> Self {
        Self::new(TargetKind::Node, address)
    }

    /// Key under which this target's lock record is stored.
    ///
    /// Kind names never contain `/`, so the key splits back on its first `/`
    /// even when the value is an address like `http://10.0.0.1:2375`.
    pub(crate) fn lock_key(&self) -> Vec<u8> {
        format!("{}/{}", self.kind, self.value).into_bytes()
    }

    pub(crate) fn validate(&self) -> crate::Result<()> {
        if self.value.is_empty() {
            return Err(Error::Validation(format!("{} target requires a value", self.kind)));
        }
        Ok(())
    }
}

impl fmt::Display for Target {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(f, "{}({})", self.kind, self.value)
    }
}
