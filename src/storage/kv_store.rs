//! Durable keyed store with atomic conditional writes.
//!
//! Lock acquisition is a sequence of set-if-absent writes against this store,
//! so any backend must make [`KvStore::insert_if_absent`] and
//! [`KvStore::remove_if_eq`] atomic with respect to every other writer sharing
//! the same namespace. Locking is exactly as wide as that atomicity: the
//! bundled [`SledStore`](crate::SledStore) and [`MemStore`](crate::MemStore)
//! are single-process, and a deployment with several control plane processes
//! needs a backend over a store they all reach.

#[cfg(test)]
use mockall::automock;

use crate::Result;

#[cfg_attr(test, automock)]
pub trait KvStore: Send + Sync + 'static {
    fn get(
        &self,
        key: &[u8],
    ) -> Result<Option<Vec<u8>>>;

    /// Unconditional upsert.
    fn insert(
        &self,
        key: &[u8],
        value: Vec<u8>,
    ) -> Result<()>;

    /// Writes `value` only if `key` is absent.
    ///
    /// Returns `Ok(None)` when the write happened, or `Ok(Some(current))` with
    /// the value that prevented it.
    fn insert_if_absent(
        &self,
        key: &[u8],
        value: Vec<u8>,
    ) -> Result<Option<Vec<u8>>>;

    /// Deletes `key` only if its current value equals `expected`.
    ///
    /// Returns whether the entry was removed.
    fn remove_if_eq(
        &self,
        key: &[u8],
        expected: &[u8],
    ) -> Result<bool>;

    /// All entries whose key starts with `prefix`, in ascending key order.
    fn scan_prefix(
        &self,
        prefix: &[u8],
    ) -> Result<Vec<(Vec<u8>, Vec<u8>)>>;

    /// Up to `limit` entries under `prefix`, newest key first.
    ///
    /// With a non-empty `before`, only keys strictly below it are returned, so
    /// passing the last key of one page fetches the next older page.
    fn scan_prefix_rev(
        &self,
        prefix: &[u8],
        before: &[u8],
        limit: usize,
    ) -> Result<Vec<(Vec<u8>, Vec<u8>)>>;

    /// Synchronously flushes dirty buffers. Returns once previous writes are
    /// guaranteed to survive a crash.
    fn flush(&self) -> Result<()>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
