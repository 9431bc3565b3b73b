use std::sync::Arc;

use tracing::error;
use tracing::trace;

use crate::KvStore;
use crate::Result;

/// One sled tree exposed as a [`KvStore`].
#[derive(Clone)]
pub struct SledStore {
    tree: Arc<sled::Tree>,
    flush_on_write: bool,
}

impl std::fmt::Debug for SledStore {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("SledStore")
            .field("tree", &String::from_utf8_lossy(&self.tree.name()))
            .field("tree_len", &self.tree.len())
            .finish()
    }
}

impl SledStore {
    pub fn open(
        db: &sled::Db,
        namespace: &str,
        flush_on_write: bool,
    ) -> Result<Self> {
        let tree = db.open_tree(namespace).map_err(|e| {
            error!("Failed to open sled tree {}: {}", namespace, e);
            e
        })?;
        Ok(Self {
            tree: Arc::new(tree),
            flush_on_write,
        })
    }

    fn maybe_flush(&self) -> Result<()> {
        if self.flush_on_write {
            self.tree.flush()?;
        }
        Ok(())
    }
}

impl KvStore for SledStore {
    fn get(
        &self,
        key: &[u8],
    ) -> Result<Option<Vec<u8>>> {
        Ok(self.tree.get(key)?.map(|ivec| ivec.to_vec()))
    }

    fn insert(
        &self,
        key: &[u8],
        value: Vec<u8>,
    ) -> Result<()> {
        self.tree.insert(key, value)?;
        self.maybe_flush()
    }

    fn insert_if_absent(
        &self,
        key: &[u8],
        value: Vec<u8>,
    ) -> Result<Option<Vec<u8>>> {
        match self.tree.compare_and_swap(key, None::<&[u8]>, Some(value))? {
            Ok(()) => {
                self.maybe_flush()?;
                Ok(None)
            }
            Err(cas) => {
                trace!("insert_if_absent rejected, key already present");
                Ok(cas.current.map(|ivec| ivec.to_vec()))
            }
        }
    }

    fn remove_if_eq(
        &self,
        key: &[u8],
        expected: &[u8],
    ) -> Result<bool> {
        match self.tree.compare_and_swap(key, Some(expected), None::<Vec<u8>>)? {
            Ok(()) => {
                self.maybe_flush()?;
                Ok(true)
            }
            Err(_) => Ok(false),
        }
    }

    fn scan_prefix(
        &self,
        prefix: &[u8],
    ) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let mut entries = Vec::new();
        for item in self.tree.scan_prefix(prefix) {
            let (k, v) = item?;
            entries.push((k.to_vec(), v.to_vec()));
        }
        Ok(entries)
    }

    fn scan_prefix_rev(
        &self,
        prefix: &[u8],
        before: &[u8],
        limit: usize,
    ) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let iter = if before.is_empty() {
            self.tree.scan_prefix(prefix)
        } else if before > prefix {
            self.tree.range(prefix.to_vec()..before.to_vec())
        } else {
            return Ok(Vec::new());
        };
        let mut entries = Vec::with_capacity(limit.min(1024));
        for item in iter.rev().take(limit) {
            let (k, v) = item?;
            entries.push((k.to_vec(), v.to_vec()));
        }
        Ok(entries)
    }

    fn flush(&self) -> Result<()> {
        self.tree.flush()?;
        Ok(())
    }

    fn len(&self) -> usize {
        self.tree.len()
    }
}
