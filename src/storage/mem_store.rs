use std::collections::BTreeMap;
use std::ops::Bound;

use parking_lot::RwLock;

use crate::KvStore;
use crate::Result;

/// In-memory [`KvStore`] for single-process deployments and tests.
///
/// Conditional writes are atomic within the process only.
#[derive(Debug, Default)]
pub struct MemStore {
    data: RwLock<BTreeMap<Vec<u8>, Vec<u8>>>,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KvStore for MemStore {
    fn get(
        &self,
        key: &[u8],
    ) -> Result<Option<Vec<u8>>> {
        Ok(self.data.read().get(key).cloned())
    }

    fn insert(
        &self,
        key: &[u8],
        value: Vec<u8>,
    ) -> Result<()> {
        self.data.write().insert(key.to_vec(), value);
        Ok(())
    }

    fn insert_if_absent(
        &self,
        key: &[u8],
        value: Vec<u8>,
    ) -> Result<Option<Vec<u8>>> {
        let mut data = self.data.write();
        if let Some(current) = data.get(key) {
            return Ok(Some(current.clone()));
        }
        data.insert(key.to_vec(), value);
        Ok(None)
    }

    fn remove_if_eq(
        &self,
        key: &[u8],
        expected: &[u8],
    ) -> Result<bool> {
        let mut data = self.data.write();
        match data.get(key) {
            Some(current) if current.as_slice() == expected => {
                data.remove(key);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn scan_prefix(
        &self,
        prefix: &[u8],
    ) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let data = self.data.read();
        Ok(data
            .range(prefix.to_vec()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    fn scan_prefix_rev(
        &self,
        prefix: &[u8],
        before: &[u8],
        limit: usize,
    ) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        if !before.is_empty() && before <= prefix {
            return Ok(Vec::new());
        }
        let upper = if before.is_empty() {
            Bound::Unbounded
        } else {
            Bound::Excluded(before)
        };
        let data = self.data.read();
        Ok(data
            .range::<[u8], _>((Bound::Included(prefix), upper))
            .rev()
            .skip_while(|(k, _)| !k.starts_with(prefix))
            .take_while(|(k, _)| k.starts_with(prefix))
            .take(limit)
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    fn flush(&self) -> Result<()> {
        Ok(())
    }

    fn len(&self) -> usize {
        self.data.read().len()
    }
}
