//! Waiting for the target to finish booting.

use crate::command::as_millis;
use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::reader::PollOutcome;
use crate::sanitize::{Sanitizer, sanitize};
use crate::session::{Session, SessionState};
use regex::Regex;
use serde::Serialize;
use std::time::Duration;
use tokio::time::{Instant, sleep};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum BootOutcome {
    Ready,
    TimedOut,
    StreamClosed,
    Cancelled,
}

/// What happened while waiting for the ready signature.
#[derive(Debug, Clone, Serialize)]
pub struct BootRecord {
    pub success: bool,
    pub outcome: BootOutcome,
    #[serde(rename = "elapsed_ms", serialize_with = "as_millis")]
    pub elapsed: Duration,
    /// Sanitized boot output. On failure this is the main diagnostic.
    pub output: String,
}

impl BootRecord {
    /// Turn a failed boot into the matching error, keeping the partial text.
    pub fn ensure_ready(self) -> Result<Self> {
        match self.outcome {
            BootOutcome::Ready => Ok(self),
            BootOutcome::TimedOut => Err(Error::BootTimeout {
                elapsed: self.elapsed,
                partial: self.output,
            }),
            BootOutcome::StreamClosed => Err(Error::StreamClosed { during: "booting" }),
            BootOutcome::Cancelled => Err(Error::Cancelled),
        }
    }
}

/// Consumes console output until the ready signature appears.
#[derive(Debug, Clone)]
pub struct BootDetector {
    signature: Regex,
    timeout: Duration,
    settle_delay: Duration,
    poll_interval: Duration,
    wake: bool,
    cancel: CancellationToken,
}

impl BootDetector {
    pub fn new(config: &EngineConfig, cancel: CancellationToken) -> Result<Self> {
        Ok(BootDetector {
            signature: Regex::new(&config.ready_signature)?,
            timeout: config.boot_timeout,
            settle_delay: config.settle_delay,
            poll_interval: config.poll_interval,
            wake: config.boot_wake,
            cancel,
        })
    }

    /// Wait for the signature. A timeout is not retried here; the session
    /// stays in `Booting` so the caller may call again or give up.
    pub async fn await_ready(&self, session: &mut Session) -> Result<BootRecord> {
        session.set_state(SessionState::Booting)?;
        info!(peer = %session.peer(), timeout = ?self.timeout, "waiting for boot");

        let start = Instant::now();
        let deadline = start + self.timeout;

        // A target that finished booting earlier only shows a prompt when poked.
        let outcome = if self.wake && session.send_line("").await.is_err() {
            BootOutcome::StreamClosed
        } else {
            self.watch(session, deadline).await
        };

        let elapsed = start.elapsed();
        let output = sanitize(session.buffer());
        // The target may print its banner and die within one poll.
        let outcome = if outcome == BootOutcome::Ready && session.state().is_terminal() {
            BootOutcome::StreamClosed
        } else {
            outcome
        };
        let success = outcome == BootOutcome::Ready;
        if success {
            session.set_state(SessionState::Ready)?;
            info!(?elapsed, "target ready");
        } else {
            warn!(?elapsed, ?outcome, bytes = output.len(), "boot did not complete");
        }

        Ok(BootRecord {
            success,
            outcome,
            elapsed,
            output,
        })
    }

    async fn watch(&self, session: &mut Session, deadline: Instant) -> BootOutcome {
        let mut output = Sanitizer::new();
        output.feed(session.buffer());
        let mut seen = session.buffer().len();
        let mut fresh = true;

        loop {
            if self.cancel.is_cancelled() {
                return BootOutcome::Cancelled;
            }

            match session.poll() {
                PollOutcome::Received(_) => {
                    output.feed(&session.buffer()[seen..]);
                    seen = session.buffer().len();
                    fresh = true;
                }
                PollOutcome::Closed => return BootOutcome::StreamClosed,
                PollOutcome::Idle => {}
            }

            if fresh && self.signature.is_match(output.text()) {
                self.settle(session).await;
                return BootOutcome::Ready;
            }
            fresh = false;

            let now = Instant::now();
            if now >= deadline {
                return BootOutcome::TimedOut;
            }
            sleep(self.poll_interval.min(deadline - now)).await;
        }
    }

    /// Let a banner that is still flushing arrive, then take what is pending.
    async fn settle(&self, session: &mut Session) {
        sleep(self.settle_delay).await;
        session.poll();
    }
}
