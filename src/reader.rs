//! Non-blocking accumulation of inbound console bytes.
//!
//! A pump (an async task for `AsyncRead` streams, a dedicated thread for
//! blocking `Read` handles such as a PTY master) forwards chunks over a
//! channel. [`StreamReader::poll`] drains whatever has arrived without ever
//! waiting, so callers can evaluate several deadlines between short sleeps.

use std::io::Read;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, error::TryRecvError, unbounded_channel};
use tokio::time::Instant;
use tracing::debug;

const READ_CHUNK_SIZE: usize = 4096;

/// Callback invoked with every inbound chunk (live echo, tee to a file, ...).
pub type OutputHandler = Arc<dyn Fn(&[u8]) + Send + Sync>;

enum Inbound {
    Data(Vec<u8>),
    Eof,
}

/// Outcome of a single [`StreamReader::poll`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// This many bytes were appended to the buffer.
    Received(usize),
    /// Nothing new is pending.
    Idle,
    /// The stream reached end-of-file or failed; no further bytes will arrive.
    Closed,
}

/// Growable inbound buffer plus the time the last byte arrived.
pub struct StreamReader {
    rx: UnboundedReceiver<Inbound>,
    buffer: Vec<u8>,
    last_activity: Instant,
    closed: bool,
    handler: Option<OutputHandler>,
}

impl StreamReader {
    fn new(rx: UnboundedReceiver<Inbound>) -> Self {
        StreamReader {
            rx,
            buffer: Vec::new(),
            last_activity: Instant::now(),
            closed: false,
            handler: None,
        }
    }

    /// Spawn a task pumping an async stream. Must be called inside a Tokio runtime.
    pub fn from_async<R>(mut reader: R) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        let (tx, rx) = unbounded_channel();

        tokio::spawn(async move {
            let mut chunk = [0u8; READ_CHUNK_SIZE];
            loop {
                match reader.read(&mut chunk).await {
                    Ok(0) => break,
                    Ok(n) => {
                        if tx.send(Inbound::Data(chunk[..n].to_vec())).is_err() {
                            return; // Reader dropped
                        }
                    }
                    Err(err) => {
                        debug!(error = %err, "console read failed");
                        break;
                    }
                }
            }
            let _ = tx.send(Inbound::Eof);
        });

        Self::new(rx)
    }

    /// Spawn a background thread pumping a blocking reader.
    pub fn from_blocking<R>(reader: R) -> Self
    where
        R: Read + Send + 'static,
    {
        let (tx, rx) = unbounded_channel();
        thread::spawn(move || pump_blocking(reader, tx));
        Self::new(rx)
    }

    /// Install a callback that sees every chunk as it is accumulated.
    pub fn set_output_handler(&mut self, handler: OutputHandler) {
        self.handler = Some(handler);
    }

    /// Move every pending chunk into the buffer without waiting.
    pub fn poll(&mut self) -> PollOutcome {
        if self.closed {
            return PollOutcome::Closed;
        }

        let mut received = 0;
        loop {
            match self.rx.try_recv() {
                Ok(Inbound::Data(data)) => {
                    if let Some(handler) = &self.handler {
                        handler(&data);
                    }
                    received += data.len();
                    self.buffer.extend_from_slice(&data);
                }
                Ok(Inbound::Eof) | Err(TryRecvError::Disconnected) => {
                    self.closed = true;
                    break;
                }
                Err(TryRecvError::Empty) => break,
            }
        }

        if received > 0 {
            self.last_activity = Instant::now();
            PollOutcome::Received(received)
        } else if self.closed {
            PollOutcome::Closed
        } else {
            PollOutcome::Idle
        }
    }

    /// Everything accumulated since the last [`clear`](Self::clear).
    pub fn buffer(&self) -> &[u8] {
        &self.buffer
    }

    /// When the most recent byte arrived (or the reader was created).
    pub fn last_activity(&self) -> Instant {
        self.last_activity
    }

    /// Time since the most recent byte arrived.
    pub fn idle(&self) -> Duration {
        self.last_activity.elapsed()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Discard the buffer, returning how many bytes were dropped.
    pub(crate) fn clear(&mut self) -> usize {
        let dropped = self.buffer.len();
        self.buffer.clear();
        dropped
    }
}

fn pump_blocking<R: Read>(mut reader: R, tx: UnboundedSender<Inbound>) {
    let mut chunk = [0u8; READ_CHUNK_SIZE];
    loop {
        match reader.read(&mut chunk) {
            Ok(0) => break, // EOF
            Ok(n) => {
                if tx.send(Inbound::Data(chunk[..n].to_vec())).is_err() {
                    return;
                }
            }
            Err(err) if err.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(_) => break,
        }
    }
    let _ = tx.send(Inbound::Eof);
}
