//! Progress sinks an event streams its human-readable output into.
//!
//! A sink write must never block indefinitely. Writes that fail mark the sink
//! broken and the event stops forwarding to it; the operation itself carries on.

use std::io;
use std::io::Write;

use serde::Serialize;
use tokio::sync::mpsc;

pub trait ProgressSink: Send {
    fn write_progress(
        &mut self,
        data: &[u8],
    ) -> io::Result<()>;
}

/// Forwards raw bytes to any [`io::Write`].
pub struct WriterSink<W> {
    writer: W,
}

impl<W: Write + Send> WriterSink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write + Send> ProgressSink for WriterSink<W> {
    fn write_progress(
        &mut self,
        data: &[u8],
    ) -> io::Result<()> {
        self.writer.write_all(data)?;
        self.writer.flush()
    }
}

#[derive(Serialize)]
struct JsonMessage<'a> {
    #[serde(rename = "Message")]
    message: &'a str,
}

/// Frames every write as one `{"Message": "..."}` JSON line, the shape the
/// streaming response boundary expects.
pub struct JsonMessageSink<W> {
    writer: W,
}

impl<W: Write + Send> JsonMessageSink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write + Send> ProgressSink for JsonMessageSink<W> {
    fn write_progress(
        &mut self,
        data: &[u8],
    ) -> io::Result<()> {
        let message = String::from_utf8_lossy(data);
        serde_json::to_writer(
            &mut self.writer,
            &JsonMessage {
                message: &message,
            },
        )
        .map_err(io::Error::other)?;
        self.writer.write_all(b"\n")?;
        self.writer.flush()
    }
}

/// Hands progress chunks to an async response body.
///
/// The channel is unbounded so the operation never waits on a slow client;
/// once the receiver is dropped every write fails and the sink is abandoned.
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<Vec<u8>>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Vec<u8>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl ProgressSink for ChannelSink {
    fn write_progress(
        &mut self,
        data: &[u8],
    ) -> io::Result<()> {
        self.tx
            .send(data.to_vec())
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "progress receiver closed"))
    }
}
