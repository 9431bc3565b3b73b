//! Control plane core of a multi-tenant application orchestrator.
//!
//! - [`LockManager`]: per-target exclusive locks over a shared durable store
//! - [`EventManager`] / [`Event`]: auditable operations that hold their locks
//!   until finalized
//! - [`EventStore`]: audit records with snapshot-based visibility filtering
//! - [`LogHub`] / [`follow_logs`]: application log ingestion and live tails

pub mod constants;
mod config;
mod errors;
mod event;
mod lock;
mod log_hub;
pub mod metrics;
mod permission;
mod storage;
mod target;

pub use config::*;
pub use errors::*;
pub use event::*;
pub use lock::*;
pub use log_hub::*;
pub use permission::*;
pub use storage::*;
pub use target::*;
