//! Per-target lock manager.
//!
//! Locks live in a durable [`KvStore`](crate::KvStore) as one record per
//! target. Acquiring a lock is a conditional set-if-absent write, so mutual
//! exclusion holds among every lock manager writing through that store, which
//! for the bundled sled backend means within one process. Multi-target acquisition writes the
//! targets in sorted order and rolls back on the first conflict, which makes it
//! all-or-nothing and deadlock free.

mod lock_manager;
mod sweeper;

#[cfg(test)]
mod lock_manager_test;

pub use lock_manager::*;
pub use sweeper::*;
