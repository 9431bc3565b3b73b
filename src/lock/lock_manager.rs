use std::sync::Arc;
use std::time::Duration;

use chrono::DateTime;
use chrono::Utc;
use parking_lot::Mutex;
use serde::Deserialize;
use serde::Serialize;
use tracing::debug;
use tracing::error;
use tracing::warn;

use crate::constants::FORCE_UNLOCK_DEPRECATED;
use crate::metrics::LOCK_CONFLICTS;
use crate::metrics::STALE_LOCKS_RECLAIMED;
use crate::Error;
use crate::KvStore;
use crate::LockConflict;
use crate::Result;
use crate::StorageError;
use crate::Target;
use crate::TargetKind;

/// One target to acquire. Only exclusive requests are written to the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockRequest {
    pub target: Target,
    pub exclusive: bool,
}

impl LockRequest {
    pub fn exclusive(target: Target) -> Self {
        Self {
            target,
            exclusive: true,
        }
    }
}

/// Identity of the operation asking for the locks, recorded on every lock so
/// that a conflicting caller can be told who holds the target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockHolder {
    pub event_id: String,
    pub kind: String,
    pub owner: String,
    /// Start of the holding operation; recorded as the lock's acquisition time
    pub since: DateTime<Utc>,
}

/// Persisted value of a held lock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockRecord {
    pub event_id: String,
    pub kind: String,
    pub owner: String,
    pub acquired_at: DateTime<Utc>,
}

impl LockRecord {
    fn conflict(
        &self,
        target: &Target,
    ) -> LockConflict {
        LockConflict {
            target: target.clone(),
            holder_event_id: self.event_id.clone(),
            holder_kind: self.kind.clone(),
            holder_owner: self.owner.clone(),
            holder_since: self.acquired_at,
        }
    }
}

#[derive(Debug)]
struct HeldLock {
    target: Target,
    key: Vec<u8>,
    value: Vec<u8>,
}

/// Proof of ownership over a set of target locks.
///
/// Released through [`LockManager::release`]; releasing twice is a no-op.
#[derive(Debug)]
pub struct LockHandle {
    event_id: String,
    held: Mutex<Vec<HeldLock>>,
}

impl LockHandle {
    pub fn event_id(&self) -> &str {
        &self.event_id
    }

    pub fn targets(&self) -> Vec<Target> {
        self.held.lock().iter().map(|h| h.target.clone()).collect()
    }

    pub fn is_released(&self) -> bool {
        self.held.lock().is_empty()
    }
}

pub struct LockManager {
    store: Arc<dyn KvStore>,
    stale_after: Option<Duration>,
}

impl std::fmt::Debug for LockManager {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("LockManager")
            .field("held", &self.store.len())
            .field("stale_after", &self.stale_after)
            .finish()
    }
}

impl LockManager {
    pub fn new(
        store: Arc<dyn KvStore>,
        stale_after: Option<Duration>,
    ) -> Self {
        Self { store, stale_after }
    }

    pub fn stale_after(&self) -> Option<Duration> {
        self.stale_after
    }

    /// Atomically locks every exclusive target in `requests`.
    ///
    /// Targets are written in `(kind, value)` order. On the first conflict all
    /// targets taken so far are released again and the conflict is returned,
    /// so either every target ends up locked by `holder` or none does.
    pub fn acquire(
        &self,
        requests: &[LockRequest],
        holder: &LockHolder,
    ) -> Result<LockHandle> {
        let mut targets: Vec<&Target> =
            requests.iter().filter(|r| r.exclusive).map(|r| &r.target).collect();
        for target in &targets {
            target.validate()?;
        }
        targets.sort();
        if let Some(dup) = targets.windows(2).find(|w| w[0] == w[1]) {
            return Err(Error::Validation(format!("target {} requested more than once", dup[0])));
        }

        let record = LockRecord {
            event_id: holder.event_id.clone(),
            kind: holder.kind.clone(),
            owner: holder.owner.clone(),
            acquired_at: holder.since,
        };
        let value = bincode::serialize(&record)?;

        let mut held: Vec<HeldLock> = Vec::with_capacity(targets.len());
        for target in targets {
            match self.try_lock(target, &value) {
                Ok(None) => {
                    debug!(event_id = %holder.event_id, lock_target = %target, "lock acquired");
                    held.push(HeldLock {
                        target: target.clone(),
                        key: target.lock_key(),
                        value: value.clone(),
                    });
                }
                Ok(Some(conflict)) => {
                    self.rollback(&held);
                    LOCK_CONFLICTS.with_label_values(&[target.kind.as_str()]).inc();
                    debug!(
                        event_id = %holder.event_id,
                        lock_target = %target,
                        holder = %conflict.holder_event_id,
                        "lock conflict"
                    );
                    return Err(conflict.into());
                }
                Err(e) => {
                    self.rollback(&held);
                    return Err(e);
                }
            }
        }

        Ok(LockHandle {
            event_id: holder.event_id.clone(),
            held: Mutex::new(held),
        })
    }

    /// Releases every lock still held by `handle`.
    ///
    /// Idempotent: an already released handle is a no-op. A lock whose stored
    /// record no longer matches (reclaimed as stale) is skipped with a warning.
    pub fn release(
        &self,
        handle: &LockHandle,
    ) -> Result<()> {
        let mut held = handle.held.lock();
        let mut first_err = None;
        held.retain(|lock| match self.store.remove_if_eq(&lock.key, &lock.value) {
            Ok(true) => {
                debug!(event_id = %handle.event_id, lock_target = %lock.target, "lock released");
                false
            }
            Ok(false) => {
                warn!(
                    event_id = %handle.event_id,
                    lock_target = %lock.target,
                    "lock was no longer held at release, it may have been reclaimed as stale"
                );
                false
            }
            Err(e) => {
                error!(event_id = %handle.event_id, lock_target = %lock.target, "release failed: {}", e);
                if first_err.is_none() {
                    first_err = Some(e);
                }
                true
            }
        });
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Current holder of `target`, if any.
    pub fn holder(
        &self,
        target: &Target,
    ) -> Result<Option<LockRecord>> {
        match self.store.get(&target.lock_key())? {
            Some(bytes) => Ok(Some(decode_record(&target.lock_key(), &bytes)?)),
            None => Ok(None),
        }
    }

    /// Every currently held lock.
    pub fn locked_targets(&self) -> Result<Vec<(Target, LockRecord)>> {
        let mut locked = Vec::new();
        for (key, value) in self.store.scan_prefix(b"")? {
            let target = decode_key(&key)?;
            locked.push((target, decode_record(&key, &value)?));
        }
        Ok(locked)
    }

    /// Force-releases every lock older than the staleness threshold.
    ///
    /// Returns the number of locks reclaimed. Without a configured threshold
    /// nothing is ever reclaimed.
    pub fn reclaim_stale(&self) -> Result<usize> {
        self.reclaim_stale_at(Utc::now())
    }

    pub fn reclaim_stale_at(
        &self,
        now: DateTime<Utc>,
    ) -> Result<usize> {
        if self.stale_after.is_none() {
            return Ok(0);
        }
        let mut reclaimed = 0;
        for (key, value) in self.store.scan_prefix(b"")? {
            let record = decode_record(&key, &value)?;
            if self.is_stale(&record, now) {
                let target = decode_key(&key)?;
                if self.store.remove_if_eq(&key, &value)? {
                    self.log_reclaim(&target, &record);
                    reclaimed += 1;
                }
            }
        }
        Ok(reclaimed)
    }

    /// Manual unlock is no longer supported; locks are released by finishing
    /// their event or by the stale lock sweep.
    pub fn force_unlock(
        &self,
        _target: &Target,
    ) -> Result<()> {
        Err(Error::Gone(FORCE_UNLOCK_DEPRECATED.to_string()))
    }

    /// One set-if-absent attempt, retried once if the current holder is stale.
    fn try_lock(
        &self,
        target: &Target,
        value: &[u8],
    ) -> Result<Option<LockConflict>> {
        let key = target.lock_key();
        let mut reclaimed = false;
        loop {
            let current = match self.store.insert_if_absent(&key, value.to_vec())? {
                None => return Ok(None),
                Some(current) => current,
            };
            let record = decode_record(&key, &current)?;
            if !reclaimed && self.is_stale(&record, Utc::now()) {
                if self.store.remove_if_eq(&key, &current)? {
                    self.log_reclaim(target, &record);
                }
                reclaimed = true;
                continue;
            }
            return Ok(Some(record.conflict(target)));
        }
    }

    fn rollback(
        &self,
        held: &[HeldLock],
    ) {
        for lock in held.iter().rev() {
            if let Err(e) = self.store.remove_if_eq(&lock.key, &lock.value) {
                error!(lock_target = %lock.target, "rollback of partially acquired lock failed: {}", e);
            }
        }
    }

    fn is_stale(
        &self,
        record: &LockRecord,
        now: DateTime<Utc>,
    ) -> bool {
        let Some(stale_after) = self.stale_after else {
            return false;
        };
        match (now - record.acquired_at).to_std() {
            Ok(age) => age >= stale_after,
            Err(_) => false,
        }
    }

    fn log_reclaim(
        &self,
        target: &Target,
        record: &LockRecord,
    ) {
        STALE_LOCKS_RECLAIMED.with_label_values(&[target.kind.as_str()]).inc();
        warn!(
            lock_target = %target,
            event_id = %record.event_id,
            kind = %record.kind,
            owner = %record.owner,
            acquired_at = %record.acquired_at.to_rfc3339(),
            "reclaimed stale lock, its owner probably crashed before finishing"
        );
    }
}

fn decode_record(
    key: &[u8],
    bytes: &[u8],
) -> Result<LockRecord> {
    bincode::deserialize(bytes).map_err(|_| {
        StorageError::DataCorruption {
            location: format!("lock record {}", String::from_utf8_lossy(key)),
        }
        .into()
    })
}

fn decode_key(key: &[u8]) -> Result<Target> {
    let corrupted = || -> Error {
        StorageError::DataCorruption {
            location: format!("lock key {}", String::from_utf8_lossy(key)),
        }
        .into()
    };
    let key = std::str::from_utf8(key).map_err(|_| corrupted())?;
    let (kind, value) = key.split_once('/').ok_or_else(corrupted)?;
    let kind: TargetKind = kind.parse().map_err(|_| corrupted())?;
    Ok(Target::new(kind, value))
}
