//! Control plane error hierarchy
//!
//! Errors are grouped by how callers are expected to react to them: lock
//! contention, caller-fixable input problems, authorization failures, storage
//! failures and streaming failures. [`Error::kind`] maps every variant onto a
//! stable [`ErrorKind`] so the routing layer can branch without string matching.

use std::fmt;

use chrono::DateTime;
use chrono::Utc;
use config::ConfigError;

use crate::Target;

#[doc(hidden)]
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Another running event already holds a required target
    #[error(transparent)]
    LockConflict(#[from] LockConflict),

    /// Malformed input, fixable by the caller
    #[error("Invalid input: {0}")]
    Validation(String),

    /// Viewer or operator lacks the required capability
    #[error(transparent)]
    Permission(#[from] PermissionError),

    #[error("Not found: {0}")]
    NotFound(String),

    /// Durable store round trip failed
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// Writing a streamed entry to the response boundary failed
    #[error("Encode failed: {0}")]
    Encode(String),

    /// The requested operation is no longer available
    #[error("{0}")]
    Gone(String),

    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Unrecoverable failures requiring process termination
    #[error("Fatal error: {0}")]
    Fatal(String),
}

/// Lock contention details exposed to callers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockConflict {
    pub target: Target,
    pub holder_event_id: String,
    pub holder_kind: String,
    pub holder_owner: String,
    pub holder_since: DateTime<Utc>,
}

impl fmt::Display for LockConflict {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(
            f,
            "event locked: {} running {:?} start by {} at {} (event {})",
            self.target,
            self.holder_kind,
            self.holder_owner,
            self.holder_since.to_rfc3339(),
            self.holder_event_id
        )
    }
}

impl std::error::Error for LockConflict {}

#[derive(Debug, thiserror::Error)]
pub enum PermissionError {
    #[error("{principal} is not allowed to {capability}")]
    Unauthorized {
        principal: String,
        capability: String,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Embedded database errors
    #[error(transparent)]
    Sled(#[from] sled::Error),

    /// Serialization failures for persisted lock records
    #[error(transparent)]
    Bincode(#[from] bincode::Error),

    /// Serialization failures for persisted event and log records
    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error("Data corruption detected at {location}")]
    DataCorruption { location: String },
}

/// Stable classification of [`Error`] values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    AlreadyLocked,
    Invalid,
    Forbidden,
    NotFound,
    Storage,
    Encode,
    Gone,
    Config,
    Internal,
}

impl ErrorKind {
    /// HTTP status the routing layer should answer with.
    pub fn status_code(&self) -> u16 {
        match self {
            ErrorKind::AlreadyLocked => 409,
            ErrorKind::Invalid => 400,
            ErrorKind::Forbidden => 403,
            ErrorKind::NotFound => 404,
            ErrorKind::Gone => 410,
            ErrorKind::Storage | ErrorKind::Encode | ErrorKind::Config | ErrorKind::Internal => 500,
        }
    }
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::LockConflict(_) => ErrorKind::AlreadyLocked,
            Error::Validation(_) => ErrorKind::Invalid,
            Error::Permission(_) => ErrorKind::Forbidden,
            Error::NotFound(_) => ErrorKind::NotFound,
            Error::Storage(_) => ErrorKind::Storage,
            Error::Encode(_) => ErrorKind::Encode,
            Error::Gone(_) => ErrorKind::Gone,
            Error::Config(_) => ErrorKind::Config,
            Error::Fatal(_) => ErrorKind::Internal,
        }
    }

    pub fn is_lock_conflict(&self) -> bool {
        matches!(self, Error::LockConflict(_))
    }
}

impl From<sled::Error> for Error {
    fn from(e: sled::Error) -> Self {
        Error::Storage(StorageError::Sled(e))
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Storage(StorageError::Json(e))
    }
}

impl From<bincode::Error> for Error {
    fn from(e: bincode::Error) -> Self {
        Error::Storage(StorageError::Bincode(e))
    }
}
