// -
// Database namespaces

/// Sled tree holding one record per held target lock
pub const LOCKS_TREE: &str = "_locks";
/// Sled tree holding event audit records
pub const EVENTS_TREE: &str = "_events";
/// Sled tree holding ingested application log entries
pub const APPLOGS_TREE: &str = "_applogs";

// -
// Events

/// Error recorded when a running event is dropped without being finished
pub(crate) const EVENT_ABORTED_ERROR: &str = "operation aborted before completion";

/// Custom data field names whose values are never persisted
pub(crate) const REDACTED_FIELDS: &[&str] = &["password", "token", "secret", "private-key", "key"];
pub(crate) const REDACTED_VALUE: &str = "*****";

// -
// Locks

pub(crate) const FORCE_UNLOCK_DEPRECATED: &str = "app unlock is deprecated, this call does nothing";
