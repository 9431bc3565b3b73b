use std::fmt;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::sync::Weak;

use tokio::sync::mpsc;
use tracing::trace;

use super::hub::HubInner;
use super::Applog;
use super::LogFilter;

/// Registry side of a watcher, owned by the hub.
pub(super) struct WatcherSlot {
    pub(super) id: u64,
    pub(super) filter: LogFilter,
    pub(super) sender: mpsc::Sender<Applog>,
    pub(super) alive: Arc<AtomicBool>,
}

impl fmt::Debug for WatcherSlot {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("WatcherSlot")
            .field("id", &self.id)
            .field("filter", &self.filter)
            .field("alive", &self.alive.load(Ordering::Acquire))
            .finish()
    }
}

/// One live subscription to an app's log stream.
///
/// Entries arrive on a bounded queue. Closing the watcher (explicitly, by
/// dropping it, or through hub shutdown) unregisters it; the queue then
/// yields whatever was already buffered and ends.
pub struct Watcher {
    id: u64,
    app: String,
    filter: LogFilter,
    receiver: mpsc::Receiver<Applog>,
    alive: Arc<AtomicBool>,
    hub: Weak<HubInner>,
}

impl fmt::Debug for Watcher {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("Watcher")
            .field("id", &self.id)
            .field("app", &self.app)
            .field("filter", &self.filter)
            .field("alive", &self.is_alive())
            .finish()
    }
}

impl Watcher {
    pub(super) fn new(
        id: u64,
        app: String,
        filter: LogFilter,
        receiver: mpsc::Receiver<Applog>,
        alive: Arc<AtomicBool>,
        hub: Weak<HubInner>,
    ) -> Self {
        Self {
            id,
            app,
            filter,
            receiver,
            alive,
            hub,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn app(&self) -> &str {
        &self.app
    }

    pub fn filter(&self) -> &LogFilter {
        &self.filter
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    /// Next entry, or `None` once the watcher is closed and drained.
    pub async fn recv(&mut self) -> Option<Applog> {
        self.receiver.recv().await
    }

    /// Buffered entry if one is ready.
    pub fn try_recv(&mut self) -> Option<Applog> {
        self.receiver.try_recv().ok()
    }

    /// Unregisters the watcher from its hub. Idempotent.
    pub fn close(&self) {
        if !self.alive.swap(false, Ordering::AcqRel) {
            return;
        }
        if let Some(hub) = self.hub.upgrade() {
            hub.unregister(&self.app, self.id);
        }
        trace!(watcher_id = self.id, app = %self.app, "watcher closed");
    }
}

impl Drop for Watcher {
    fn drop(&mut self) {
        self.close();
    }
}
