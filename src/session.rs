//! One attached console connection and its lifecycle.

use crate::error::{Error, Result};
use crate::process::PtyConsole;
use crate::reader::{OutputHandler, PollOutcome, StreamReader};
use std::fmt;
use std::io::Write;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::time::Instant;
use tracing::{debug, warn};

/// Lifecycle of a [`Session`].
///
/// ```text
/// Disconnected -> Connecting -> Connected -> Booting -> Ready <-> Executing
///                                                        |
///                                                        v
///                                                      Closed
/// ```
///
/// `Failed` is reachable from every non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Connected,
    Booting,
    Ready,
    Executing,
    Closed,
    Failed,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::Closed | SessionState::Failed)
    }

    /// Validate a state change, returning the new state.
    pub fn transition(self, to: SessionState) -> Result<SessionState> {
        use SessionState::*;

        let allowed = match (self, to) {
            (from, Failed) => !from.is_terminal(),
            (Disconnected, Connecting)
            | (Connecting, Connecting)
            | (Connecting, Connected)
            | (Connected, Booting)
            | (Booting, Booting)
            | (Booting, Ready)
            | (Ready, Executing)
            | (Executing, Ready)
            | (Ready, Closed) => true,
            _ => false,
        };

        if allowed {
            Ok(to)
        } else {
            Err(Error::InvalidTransition { from: self, to })
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Disconnected => "disconnected",
            SessionState::Connecting => "connecting",
            SessionState::Connected => "connected",
            SessionState::Booting => "booting",
            SessionState::Ready => "ready",
            SessionState::Executing => "executing",
            SessionState::Closed => "closed",
            SessionState::Failed => "failed",
        };
        f.write_str(name)
    }
}

enum ConsoleWriter {
    Async(Box<dyn AsyncWrite + Send + Unpin>),
    /// PTY masters only offer blocking writes; lines are short enough to
    /// write inline.
    Blocking(Box<dyn Write + Send>),
}

impl ConsoleWriter {
    async fn write_all(&mut self, data: &[u8]) -> std::io::Result<()> {
        match self {
            ConsoleWriter::Async(writer) => {
                writer.write_all(data).await?;
                writer.flush().await
            }
            ConsoleWriter::Blocking(writer) => {
                Write::write_all(writer, data)?;
                Write::flush(writer)
            }
        }
    }

    async fn shutdown(&mut self) -> std::io::Result<()> {
        match self {
            ConsoleWriter::Async(writer) => writer.shutdown().await,
            ConsoleWriter::Blocking(writer) => Write::flush(writer),
        }
    }
}

/// An attached console.
///
/// The session exclusively owns the connection and the inbound buffer;
/// other components only read snapshots through [`buffer`](Self::buffer).
pub struct Session {
    state: SessionState,
    reader: StreamReader,
    writer: ConsoleWriter,
    line_ending: String,
    peer: String,
}

impl Session {
    fn attach(reader: StreamReader, writer: ConsoleWriter, peer: String) -> Self {
        debug!(peer = %peer, "session attached");
        Session {
            state: SessionState::Connected,
            reader,
            writer,
            line_ending: "\n".to_string(),
            peer,
        }
    }

    /// Attach to any bidirectional async byte stream (TCP socket, in-memory duplex).
    pub fn from_stream<S>(stream: S, peer: impl Into<String>) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (read_half, write_half) = tokio::io::split(stream);
        Self::attach(
            StreamReader::from_async(read_half),
            ConsoleWriter::Async(Box::new(write_half)),
            peer.into(),
        )
    }

    /// Attach to the target's own pseudo-terminal.
    pub fn from_pty(console: PtyConsole) -> Self {
        Self::attach(
            StreamReader::from_blocking(console.reader),
            ConsoleWriter::Blocking(console.writer),
            "pty".to_string(),
        )
    }

    pub fn with_line_ending(mut self, line_ending: impl Into<String>) -> Self {
        self.line_ending = line_ending.into();
        self
    }

    pub fn with_output_handler(mut self, handler: OutputHandler) -> Self {
        self.reader.set_output_handler(handler);
        self
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }

    pub(crate) fn set_state(&mut self, to: SessionState) -> Result<()> {
        let next = self.state.transition(to)?;
        if next != self.state {
            debug!(peer = %self.peer, from = %self.state, to = %next, "session state");
        }
        self.state = next;
        Ok(())
    }

    fn fail(&mut self) {
        if !self.state.is_terminal() {
            debug!(peer = %self.peer, from = %self.state, "session failed");
            self.state = SessionState::Failed;
        }
    }

    /// Pull pending bytes into the buffer. End-of-stream fails the session.
    pub fn poll(&mut self) -> PollOutcome {
        let outcome = self.reader.poll();
        if self.reader.is_closed() && !self.state.is_terminal() {
            warn!(peer = %self.peer, state = %self.state, "console stream closed");
            self.fail();
        }
        outcome
    }

    /// Read-only snapshot of everything accumulated since the last discard.
    pub fn buffer(&self) -> &[u8] {
        self.reader.buffer()
    }

    pub fn last_activity(&self) -> Instant {
        self.reader.last_activity()
    }

    pub fn idle(&self) -> Duration {
        self.reader.idle()
    }

    pub fn is_stream_closed(&self) -> bool {
        self.reader.is_closed()
    }

    pub(crate) fn discard(&mut self) -> usize {
        self.reader.clear()
    }

    /// Write `text` followed by the line terminator and flush.
    pub async fn send_line(&mut self, text: &str) -> Result<()> {
        if self.state.is_terminal() {
            return Err(Error::StreamClosed {
                during: "sending a command",
            });
        }

        let mut line = Vec::with_capacity(text.len() + self.line_ending.len());
        line.extend_from_slice(text.as_bytes());
        line.extend_from_slice(self.line_ending.as_bytes());

        if let Err(err) = self.writer.write_all(&line).await {
            warn!(peer = %self.peer, error = %err, "console write failed");
            self.fail();
            return Err(Error::StreamClosed {
                during: "sending a command",
            });
        }
        Ok(())
    }

    /// Close the connection. Closing a ready session is the planned exit;
    /// closing from any other live state counts as a failure. Idempotent.
    pub async fn close(&mut self) -> Result<()> {
        if self.state.is_terminal() {
            return Ok(());
        }
        if self.state == SessionState::Ready {
            self.set_state(SessionState::Closed)?;
        } else {
            self.fail();
        }
        if let Err(err) = self.writer.shutdown().await {
            debug!(peer = %self.peer, error = %err, "console shutdown failed");
        }
        Ok(())
    }
}
