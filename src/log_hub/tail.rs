use std::io;

use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::warn;

use super::Applog;
use super::Watcher;
use crate::metrics::LOGS_APP_TAIL;
use crate::metrics::LOGS_APP_TAIL_ENTRIES;
use crate::Error;
use crate::Result;

/// Response boundary a tail session writes entries to.
pub trait LogEncoder: Send {
    fn encode(
        &mut self,
        entries: &[Applog],
    ) -> Result<()>;
}

/// Writes each batch as one JSON array followed by a newline.
pub struct JsonLinesEncoder<W> {
    writer: W,
}

impl<W: io::Write + Send> JsonLinesEncoder<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: io::Write + Send> LogEncoder for JsonLinesEncoder<W> {
    fn encode(
        &mut self,
        entries: &[Applog],
    ) -> Result<()> {
        serde_json::to_writer(&mut self.writer, entries).map_err(|e| Error::Encode(e.to_string()))?;
        self.writer
            .write_all(b"\n")
            .and_then(|_| self.writer.flush())
            .map_err(|e| Error::Encode(e.to_string()))
    }
}

struct TailGauge<'a> {
    app: &'a str,
}

impl<'a> TailGauge<'a> {
    fn start(app: &'a str) -> Self {
        LOGS_APP_TAIL.with_label_values(&[app]).inc();
        Self { app }
    }
}

impl Drop for TailGauge<'_> {
    fn drop(&mut self) {
        LOGS_APP_TAIL.with_label_values(&[self.app]).dec();
    }
}

/// Streams `watcher`'s entries into `encoder` until `cancel` fires or the
/// watcher is closed, and closes the watcher on every exit path.
///
/// # Errors
/// `Error::Encode` (or whatever the encoder returns) as soon as one entry
/// fails to encode.
pub async fn follow_logs<E: LogEncoder + ?Sized>(
    cancel: &CancellationToken,
    mut watcher: Watcher,
    encoder: &mut E,
) -> Result<()> {
    let app = watcher.app().to_string();
    let _gauge = TailGauge::start(&app);
    let entries = LOGS_APP_TAIL_ENTRIES.with_label_values(&[&app]);

    let result = loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!(watcher_id = watcher.id(), app = %app, "tail cancelled");
                break Ok(());
            }
            entry = watcher.recv() => {
                let Some(entry) = entry else {
                    debug!(watcher_id = watcher.id(), app = %app, "tail watcher closed");
                    break Ok(());
                };
                entries.inc();
                if let Err(e) = encoder.encode(std::slice::from_ref(&entry)) {
                    warn!(watcher_id = watcher.id(), app = %app, "tail encode failed: {}", e);
                    break Err(e);
                }
            }
        }
    };

    watcher.close();
    result
}
