use std::fmt;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::debug;
use tracing::info;
use tracing::trace;
use tracing::warn;

use super::validate_app_name;
use super::watcher::WatcherSlot;
use super::Applog;
use super::LogFilter;
use super::LogQuery;
use super::Watcher;
use crate::metrics::LOGS_APP_DROPPED;
use crate::permission::require;
use crate::ContextType;
use crate::Error;
use crate::KvStore;
use crate::LogHubConfig;
use crate::PermissionChecker;
use crate::PermissionContext;
use crate::Principal;
use crate::Result;
use crate::PERM_APP_READ_LOG;

pub(super) struct HubInner {
    /// Live watchers grouped by app name
    watchers: DashMap<String, Vec<WatcherSlot>>,
    next_watcher_id: AtomicU64,
    /// Tie breaker for entries ingested within the same nanosecond
    next_seq: AtomicU64,
    dropped: AtomicU64,
    shut_down: AtomicBool,
    store: Arc<dyn KvStore>,
    checker: Arc<dyn PermissionChecker>,
    config: LogHubConfig,
}

impl HubInner {
    pub(super) fn unregister(
        &self,
        app: &str,
        id: u64,
    ) {
        self.watchers.remove_if_mut(app, |_app, slots| {
            slots.retain(|slot| slot.id != id);
            slots.is_empty()
        });
    }
}

/// Ingestion point for application logs.
///
/// Cheap to clone; clones share the same registry and store.
#[derive(Clone)]
pub struct LogHub {
    inner: Arc<HubInner>,
}

impl fmt::Debug for LogHub {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("LogHub")
            .field("watched_apps", &self.inner.watchers.len())
            .field("dropped", &self.dropped())
            .field("config", &self.inner.config)
            .finish_non_exhaustive()
    }
}

impl LogHub {
    pub fn new(
        store: Arc<dyn KvStore>,
        checker: Arc<dyn PermissionChecker>,
        config: LogHubConfig,
    ) -> Self {
        Self {
            inner: Arc::new(HubInner {
                watchers: DashMap::new(),
                next_watcher_id: AtomicU64::new(1),
                next_seq: AtomicU64::new(0),
                dropped: AtomicU64::new(0),
                shut_down: AtomicBool::new(false),
                store,
                checker,
                config,
            }),
        }
    }

    /// Persists one entry and hands it to every matching live watcher of `app`.
    ///
    /// An empty `source` is recorded as the configured default source.
    pub fn add(
        &self,
        app: &str,
        message: &str,
        source: &str,
        unit: &str,
    ) -> Result<()> {
        validate_app_name(app)?;
        let entry = Applog {
            timestamp: Utc::now(),
            app_name: app.to_string(),
            message: message.to_string(),
            source: if source.is_empty() {
                self.inner.config.default_source.clone()
            } else {
                source.to_string()
            },
            unit: unit.to_string(),
        };
        self.persist(&entry)?;
        self.dispatch(&entry);
        Ok(())
    }

    /// Ingests `messages` in order with a shared source and unit.
    pub fn add_many<S: AsRef<str>>(
        &self,
        app: &str,
        messages: &[S],
        source: &str,
        unit: &str,
    ) -> Result<()> {
        for message in messages {
            self.add(app, message.as_ref(), source, unit)?;
        }
        Ok(())
    }

    /// Registers a watcher on `app`'s live stream after checking that
    /// `principal` may read the app's logs.
    pub fn watch(
        &self,
        app: &str,
        source: &str,
        unit: &str,
        principal: &Principal,
    ) -> Result<Watcher> {
        validate_app_name(app)?;
        require(
            self.inner.checker.as_ref(),
            principal,
            PERM_APP_READ_LOG,
            &[PermissionContext::new(ContextType::App, app)],
        )?;
        let id = self.inner.next_watcher_id.fetch_add(1, Ordering::Relaxed);
        let buffer_size = self.inner.config.watcher_buffer_size;
        let (sender, receiver) = mpsc::channel(buffer_size);
        let alive = Arc::new(AtomicBool::new(true));
        let filter = LogFilter::new(source, unit);

        // The shutdown flag is read while holding the app's shard lock.
        // `shutdown` sets the flag before sweeping the shards, so a slot pushed
        // here is either rejected or swept.
        let mut slots = self.inner.watchers.entry(app.to_string()).or_default();
        if self.inner.shut_down.load(Ordering::Acquire) {
            drop(slots);
            self.inner.watchers.remove_if(app, |_app, slots| slots.is_empty());
            return Err(Error::Gone("log hub is shut down".into()));
        }
        slots.push(WatcherSlot {
            id,
            filter: filter.clone(),
            sender,
            alive: alive.clone(),
        });
        drop(slots);

        trace!(watcher_id = id, app, source, unit, buffer_size, "watcher registered");
        Ok(Watcher::new(
            id,
            app.to_string(),
            filter,
            receiver,
            alive,
            Arc::downgrade(&self.inner),
        ))
    }

    /// Deregisters `watcher`. Idempotent.
    pub fn close(
        &self,
        watcher: &Watcher,
    ) {
        watcher.close();
    }

    /// The last `lines` stored entries of `app` (capped at `max_lines`),
    /// oldest first. With `invert`, entries matching `filter` are excluded
    /// instead of selected.
    pub fn last_logs(
        &self,
        app: &str,
        lines: usize,
        filter: &LogFilter,
        invert: bool,
    ) -> Result<Vec<Applog>> {
        validate_app_name(app)?;
        if lines == 0 {
            return Err(Error::Validation(
                "parameter lines is mandatory and must be greater than 0".into(),
            ));
        }
        let lines = lines.min(self.inner.config.max_lines);

        // Walk the app's entries newest first, one page at a time, and stop as
        // soon as enough matches are collected.
        let prefix = app_prefix(app);
        let mut entries = Vec::with_capacity(lines);
        let mut before: Vec<u8> = Vec::new();
        loop {
            let page = self.inner.store.scan_prefix_rev(&prefix, &before, lines)?;
            let exhausted = page.len() < lines;
            for (key, value) in page {
                let entry: Applog = serde_json::from_slice(&value)?;
                if filter.matches(&entry) != invert {
                    entries.push(entry);
                    if entries.len() == lines {
                        entries.reverse();
                        return Ok(entries);
                    }
                }
                before = key;
            }
            if exhausted {
                break;
            }
        }
        entries.reverse();
        Ok(entries)
    }

    /// Serves a log read request: checks permission, returns the stored
    /// entries and, when following, a watcher registered for new ones.
    pub fn open(
        &self,
        app: &str,
        query: &LogQuery,
        principal: &Principal,
    ) -> Result<(Vec<Applog>, Option<Watcher>)> {
        query.validate()?;
        require(
            self.inner.checker.as_ref(),
            principal,
            PERM_APP_READ_LOG,
            &[PermissionContext::new(ContextType::App, app)],
        )?;
        let entries = self.last_logs(app, query.lines, &query.filter, query.invert)?;
        let watcher = if query.follow {
            Some(self.watch(app, &query.filter.source, &query.filter.unit, principal)?)
        } else {
            None
        };
        Ok((entries, watcher))
    }

    /// Closes every live watcher. Later `watch` calls fail with `Gone`;
    /// `add` keeps persisting entries.
    pub fn shutdown(&self) {
        if self.inner.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }
        let mut closed = 0;
        self.inner.watchers.retain(|_app, slots| {
            for slot in slots.iter() {
                slot.alive.store(false, Ordering::Release);
            }
            closed += slots.len();
            false
        });
        info!(closed, "log hub shut down");
    }

    /// Number of live watchers registered on `app`.
    pub fn watcher_count(
        &self,
        app: &str,
    ) -> usize {
        self.inner.watchers.get(app).map(|w| w.len()).unwrap_or(0)
    }

    /// Number of apps with at least one registry entry.
    pub fn watched_app_count(&self) -> usize {
        self.inner.watchers.len()
    }

    /// Entries dropped on full watcher queues since creation.
    pub fn dropped(&self) -> u64 {
        self.inner.dropped.load(Ordering::Relaxed)
    }

    fn persist(
        &self,
        entry: &Applog,
    ) -> Result<()> {
        let seq = self.inner.next_seq.fetch_add(1, Ordering::Relaxed);
        let nanos = entry.timestamp.timestamp_nanos_opt().unwrap_or_default();
        let mut key = app_prefix(&entry.app_name);
        key.extend_from_slice(format!("{nanos:020}{seq:020}").as_bytes());
        self.inner.store.insert(&key, serde_json::to_vec(entry)?)
    }

    fn dispatch(
        &self,
        entry: &Applog,
    ) {
        let Some(slots) = self.inner.watchers.get(&entry.app_name) else {
            return;
        };
        let mut delivered = 0;
        for slot in slots.iter().filter(|slot| slot.filter.matches(entry)) {
            match slot.sender.try_send(entry.clone()) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => {
                    self.inner.dropped.fetch_add(1, Ordering::Relaxed);
                    LOGS_APP_DROPPED.with_label_values(&[&entry.app_name]).inc();
                    if self.inner.config.enable_metrics {
                        warn!(watcher_id = slot.id, app = %entry.app_name, "watcher queue full, dropping log entry");
                    }
                }
                Err(TrySendError::Closed(_)) => {
                    debug!(watcher_id = slot.id, app = %entry.app_name, "watcher receiver gone");
                }
            }
        }
        trace!(app = %entry.app_name, watchers = slots.len(), delivered, "log entry dispatched");
    }
}

fn app_prefix(app: &str) -> Vec<u8> {
    let mut prefix = app.as_bytes().to_vec();
    prefix.push(0);
    prefix
}
