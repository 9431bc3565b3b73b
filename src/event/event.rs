use std::fmt;
use std::sync::Arc;

use chrono::Utc;
use nanoid::nanoid;
use parking_lot::Mutex;
use serde_json::Value;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;

use super::EventOpts;
use super::EventRecord;
use super::EventState;
use super::EventStore;
use super::ProgressSink;
use crate::constants::EVENT_ABORTED_ERROR;
use crate::metrics::EVENTS_FINISHED;
use crate::Error;
use crate::LockHandle;
use crate::LockHolder;
use crate::LockManager;
use crate::LockRequest;
use crate::Result;

/// Creates events bound to a lock manager and an event store.
#[derive(Debug, Clone)]
pub struct EventManager {
    locks: Arc<LockManager>,
    store: Arc<EventStore>,
}

impl EventManager {
    pub fn new(
        locks: Arc<LockManager>,
        store: Arc<EventStore>,
    ) -> Self {
        Self { locks, store }
    }

    pub fn locks(&self) -> &Arc<LockManager> {
        &self.locks
    }

    pub fn store(&self) -> &Arc<EventStore> {
        &self.store
    }

    /// Starts an operation: validates `opts`, locks the target and every
    /// `lock = true` extra target, then records the event as running.
    ///
    /// # Errors
    /// - `Error::LockConflict` if any required target is held by another running event
    /// - `Error::Validation` for malformed options
    /// - `Error::Storage` if locking or the initial record write fails; no lock
    ///   is left behind in that case
    pub fn start(
        &self,
        opts: EventOpts,
    ) -> Result<Event> {
        validate(&opts)?;

        let id = nanoid!();
        let start_time = Utc::now();
        let mut requests = vec![LockRequest::exclusive(opts.target.clone())];
        requests.extend(opts.extra_targets.iter().map(|e| LockRequest {
            target: e.target.clone(),
            exclusive: e.lock,
        }));
        let holder = LockHolder {
            event_id: id.clone(),
            kind: opts.kind.clone(),
            owner: opts.owner.to_string(),
            since: start_time,
        };
        let lock = self.locks.acquire(&requests, &holder)?;

        let record = EventRecord {
            id,
            target: opts.target,
            extra_targets: opts.extra_targets,
            kind: opts.kind,
            owner: opts.owner,
            start_time,
            end_time: None,
            error: None,
            custom_data: opts.custom_data,
            allowed: opts.allowed,
            state: EventState::Running,
            log: String::new(),
        };
        if let Err(e) = self.store.append(&record) {
            if let Err(release_err) = self.locks.release(&lock) {
                error!(event_id = %record.id, "release after failed event insert: {}", release_err);
            }
            return Err(e);
        }

        info!(event_id = %record.id, kind = %record.kind, event_target = %record.target, "event started");
        Ok(Event {
            locks: self.locks.clone(),
            store: self.store.clone(),
            lock,
            state: Mutex::new(record),
            output: Mutex::new(Output::default()),
        })
    }
}

fn validate(opts: &EventOpts) -> Result<()> {
    opts.target.validate()?;
    for extra in &opts.extra_targets {
        extra.target.validate()?;
    }
    if opts.kind.is_empty() {
        return Err(Error::Validation("event kind is mandatory".into()));
    }
    if opts.owner.name.is_empty() {
        return Err(Error::Validation("event owner is mandatory".into()));
    }
    if opts.allowed.scheme.is_empty() {
        return Err(Error::Validation("event allowed permission scheme is mandatory".into()));
    }
    Ok(())
}

#[derive(Default)]
struct Output {
    sink: Option<Box<dyn ProgressSink>>,
    log: String,
}

/// A running (or finished) operation holding its target locks.
///
/// `done` and `done_custom_data` finalize the event exactly once; later calls
/// are no-ops. An event dropped while still running is finalized with an
/// abort error.
pub struct Event {
    locks: Arc<LockManager>,
    store: Arc<EventStore>,
    lock: LockHandle,
    state: Mutex<EventRecord>,
    output: Mutex<Output>,
}

impl fmt::Debug for Event {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        let record = self.state.lock();
        f.debug_struct("Event")
            .field("id", &record.id)
            .field("kind", &record.kind)
            .field("target", &record.target)
            .field("state", &record.state)
            .finish_non_exhaustive()
    }
}

impl Event {
    pub fn id(&self) -> String {
        self.state.lock().id.clone()
    }

    pub fn is_running(&self) -> bool {
        self.state.lock().is_running()
    }

    /// Snapshot of the current record, including progress written so far.
    pub fn record(&self) -> EventRecord {
        let mut record = self.state.lock().clone();
        if record.is_running() {
            record.log = self.output.lock().log.clone();
        }
        record
    }

    /// Attaches the sink progress writes are streamed to, replacing any
    /// previous one.
    pub fn set_sink(
        &self,
        sink: Box<dyn ProgressSink>,
    ) {
        self.output.lock().sink = Some(sink);
    }

    /// Appends progress output.
    ///
    /// Always kept for the audit record. Forwarded to the attached sink if
    /// there is one; a sink that fails is dropped and never written again.
    pub fn write(
        &self,
        data: &[u8],
    ) {
        let mut output = self.output.lock();
        output.log.push_str(&String::from_utf8_lossy(data));
        if let Some(sink) = output.sink.as_mut() {
            if let Err(e) = sink.write_progress(data) {
                warn!("event progress sink broken, dropping further output: {}", e);
                output.sink = None;
            }
        }
    }

    /// Finalizes the event with an optional terminal error.
    pub fn done(
        &self,
        err: Option<String>,
    ) -> Result<()> {
        self.finalize(err, None)
    }

    /// Finalizes the event, replacing its custom data wholesale with `data`.
    pub fn done_custom_data(
        &self,
        err: Option<String>,
        data: Value,
    ) -> Result<()> {
        self.finalize(err, Some(data))
    }

    /// Finalizes the event from an operation's outcome.
    pub fn finish<T, E: fmt::Display>(
        &self,
        result: &std::result::Result<T, E>,
    ) -> Result<()> {
        self.done(result.as_ref().err().map(|e| e.to_string()))
    }

    fn finalize(
        &self,
        err: Option<String>,
        custom_data: Option<Value>,
    ) -> Result<()> {
        let mut record = self.state.lock();
        if !record.is_running() {
            debug!(event_id = %record.id, "event already finished, ignoring");
            return Ok(());
        }

        record.state = EventState::Done;
        record.end_time = Some(Utc::now());
        record.error = err;
        if let Some(data) = custom_data {
            record.custom_data = data;
        }
        {
            let mut output = self.output.lock();
            record.log = std::mem::take(&mut output.log);
            output.sink = None;
        }

        let released = self.locks.release(&self.lock);
        if let Err(e) = &released {
            error!(event_id = %record.id, "failed to release event locks: {}", e);
        }
        let persisted = self.store.append(&record);
        if let Err(e) = &persisted {
            error!(event_id = %record.id, "failed to persist finished event: {}", e);
        }

        let status = if record.error.is_some() { "error" } else { "success" };
        EVENTS_FINISHED.with_label_values(&[&record.kind, status]).inc();
        info!(event_id = %record.id, kind = %record.kind, status, "event finished");

        persisted.and(released)
    }
}

impl Drop for Event {
    fn drop(&mut self) {
        if self.state.get_mut().is_running() {
            warn!(event_id = %self.state.get_mut().id, "event dropped while running");
            if let Err(e) = self.done(Some(EVENT_ABORTED_ERROR.to_string())) {
                error!("failed to finish dropped event: {}", e);
            }
        }
    }
}
