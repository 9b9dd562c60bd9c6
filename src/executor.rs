//! Sending one command and deciding when its output is complete.
//!
//! Each run has three phases:
//!
//! 1. **Drain**: discard bytes that predate the command. Draining stops once
//!    the console has been quiet for `drain_quiet` (not merely once the
//!    buffer is empty, since output arrives in bursts), or after `drain_limit`.
//! 2. **Send**: write the command and the line terminator.
//! 3. **Capture**: poll until the [`CompletionDetector`] accepts the output or
//!    the hard timeout expires. The detector never sees the console's echo of
//!    the command line. A timed-out command keeps everything captured.

use crate::command::{CommandResult, CommandSpec, CompletionReason};
use crate::config::EngineConfig;
use crate::detect::{CompletionDetector, PatternDetector, QuiescenceDetector, after_echo};
use crate::error::Result;
use crate::reader::PollOutcome;
use crate::sanitize::{Sanitizer, sanitize};
use crate::session::{Session, SessionState};
use regex::Regex;
use std::time::Duration;
use tokio::time::{Instant, sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Runs single commands against a [`Session`].
#[derive(Debug, Clone)]
pub struct CommandExecutor {
    prompt: Regex,
    default_timeout: Duration,
    quiescence_window: Duration,
    pattern_grace: Duration,
    drain_quiet: Duration,
    drain_limit: Duration,
    poll_interval: Duration,
    cancel: CancellationToken,
}

impl CommandExecutor {
    pub fn new(config: &EngineConfig, cancel: CancellationToken) -> Result<Self> {
        Ok(CommandExecutor {
            prompt: Regex::new(&config.prompt_pattern)?,
            default_timeout: config.default_command_timeout,
            quiescence_window: config.quiescence_window,
            pattern_grace: config.pattern_grace,
            drain_quiet: config.drain_quiet,
            drain_limit: config.drain_limit,
            poll_interval: config.poll_interval,
            cancel,
        })
    }

    fn detector_for(&self, spec: &CommandSpec) -> Box<dyn CompletionDetector> {
        match &spec.completion_pattern {
            Some(pattern) => Box::new(PatternDetector::new(pattern.clone(), self.pattern_grace)),
            None => Box::new(QuiescenceDetector::new(
                self.prompt.clone(),
                spec.quiescence.unwrap_or(self.quiescence_window),
            )),
        }
    }

    /// Execute `spec` on a ready session.
    ///
    /// Only a session that is not ready yields an error; every other outcome,
    /// including timeouts and a closed stream, is reported in the result.
    pub async fn run(&self, session: &mut Session, spec: &CommandSpec) -> Result<CommandResult> {
        session.set_state(SessionState::Executing)?;

        let discarded = self.drain(session).await;
        if discarded > 0 {
            debug!(bytes = discarded, "discarded stale console output");
        }

        let timeout = spec.timeout.unwrap_or(self.default_timeout);
        let detector = self.detector_for(spec);

        debug!(command = %spec.command, ?timeout, "sending command");
        let start = Instant::now();
        let reason = if session.send_line(&spec.command).await.is_err() {
            CompletionReason::StreamClosed
        } else {
            self.capture(session, &spec.command, detector.as_ref(), start, start + timeout)
                .await
        };

        let elapsed = start.elapsed();
        let raw = session.buffer().to_vec();
        let output = sanitize(&raw);

        if session.state() == SessionState::Executing {
            session.set_state(SessionState::Ready)?;
        }

        let result = CommandResult {
            command: spec.command.clone(),
            raw,
            output,
            elapsed,
            reason,
            status: reason.status(),
        };

        if result.is_ok() {
            info!(command = %result.command, ?elapsed, %reason, "command complete");
        } else {
            warn!(command = %result.command, ?elapsed, %reason, "command did not complete");
        }
        Ok(result)
    }

    /// Discard pending output until the console goes quiet.
    async fn drain(&self, session: &mut Session) -> usize {
        let limit = Instant::now() + self.drain_limit;
        let mut quiet_since = Instant::now();
        let mut discarded = session.discard();

        loop {
            if let PollOutcome::Received(_) = session.poll() {
                discarded += session.discard();
                quiet_since = Instant::now();
            }
            let now = Instant::now();
            if session.is_stream_closed()
                || now.duration_since(quiet_since) >= self.drain_quiet
                || now >= limit
            {
                return discarded;
            }
            sleep(self.poll_interval).await;
        }
    }

    async fn capture(
        &self,
        session: &mut Session,
        command: &str,
        detector: &dyn CompletionDetector,
        start: Instant,
        deadline: Instant,
    ) -> CompletionReason {
        let mut output = Sanitizer::new();
        let mut seen = 0;

        loop {
            if self.cancel.is_cancelled() {
                return CompletionReason::Cancelled;
            }

            match session.poll() {
                PollOutcome::Received(_) => {
                    output.feed(&session.buffer()[seen..]);
                    seen = session.buffer().len();
                }
                PollOutcome::Closed => return CompletionReason::StreamClosed,
                PollOutcome::Idle => {}
            }

            // Silence before the command was sent does not count.
            let idle = session.last_activity().max(start).elapsed();
            if let Some(reason) = detector.check(after_echo(output.text(), command), idle) {
                let grace = detector.grace();
                if !grace.is_zero() {
                    self.collect_trailing(session, grace).await;
                }
                return reason;
            }

            let now = Instant::now();
            if now >= deadline {
                return CompletionReason::TimedOut;
            }
            sleep(self.poll_interval.min(deadline - now)).await;
        }
    }

    /// Keep accumulating whatever arrives within `window`.
    async fn collect_trailing(&self, session: &mut Session, window: Duration) {
        let end = Instant::now() + window;
        loop {
            if let PollOutcome::Closed = session.poll() {
                return;
            }
            let now = Instant::now();
            if now >= end {
                return;
            }
            sleep(self.poll_interval.min(end - now)).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::CommandStatus;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream};

    fn config() -> EngineConfig {
        EngineConfig::default()
    }

    /// A session that is already past boot, plus the target side of the stream.
    fn ready_session() -> (Session, DuplexStream) {
        let (client, server) = tokio::io::duplex(1 << 16);
        let mut session = Session::from_stream(client, "stub");
        session.set_state(SessionState::Booting).unwrap();
        session.set_state(SessionState::Ready).unwrap();
        (session, server)
    }

    /// Wait for one command line from the engine.
    async fn read_command(server: DuplexStream) -> (String, DuplexStream) {
        let mut reader = BufReader::new(server);
        let mut line = String::new();
        reader.read_line(&mut line).await.unwrap();
        (line.trim_end().to_string(), reader.into_inner())
    }

    #[tokio::test(start_paused = true)]
    async fn test_echo_completes_on_quiet_prompt() {
        let (mut session, server) = ready_session();
        let target = tokio::spawn(async move {
            let (line, mut server) = read_command(server).await;
            assert_eq!(line, "echo A");
            server.write_all(b"echo A\r\nA\r\n\x1b[32mtrustos\x1b[0m:/$ ").await.unwrap();
            server
        });

        let executor = CommandExecutor::new(&config(), CancellationToken::new()).unwrap();
        let result = executor.run(&mut session, &CommandSpec::new("echo A")).await.unwrap();

        assert_eq!(result.reason, CompletionReason::PromptQuiescent);
        assert_eq!(result.status, CommandStatus::Ok);
        assert!(result.output.contains("\r\nA\r\n"));
        assert!(result.output.ends_with("trustos:/$ "));
        assert!(result.elapsed >= Duration::from_secs(1));
        assert!(result.elapsed < Duration::from_millis(1200));
        assert_eq!(session.state(), SessionState::Ready);
        drop(target.await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_prompt_mid_burst_is_not_completion() {
        let (mut session, server) = ready_session();
        let target = tokio::spawn(async move {
            let (_, mut server) = read_command(server).await;
            server.write_all(b"stage 1 done $ ").await.unwrap();
            sleep(Duration::from_millis(300)).await;
            server.write_all(b"stage 2 output\r\n").await.unwrap();
            sleep(Duration::from_millis(600)).await;
            server.write_all(b"final line\r\n$ ").await.unwrap();
            server
        });

        let executor = CommandExecutor::new(&config(), CancellationToken::new()).unwrap();
        let result = executor.run(&mut session, &CommandSpec::new("run-stages")).await.unwrap();

        assert_eq!(result.reason, CompletionReason::PromptQuiescent);
        assert!(result.output.contains("stage 2 output"));
        assert!(result.output.contains("final line"));
        // 900ms of output plus the full quiet window after the real prompt.
        assert!(result.elapsed >= Duration::from_millis(1900));
        drop(target.await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_continuous_trickle_times_out_exactly() {
        let (mut session, server) = ready_session();
        let target = tokio::spawn(async move {
            let (_, mut server) = read_command(server).await;
            // Ends in a prompt-like byte but never goes quiet.
            loop {
                if server.write_all(b"$").await.is_err() {
                    break;
                }
                sleep(Duration::from_millis(100)).await;
            }
        });

        let executor = CommandExecutor::new(&config(), CancellationToken::new()).unwrap();
        let spec = CommandSpec::new("yes").with_timeout(Duration::from_secs(2));
        let result = executor.run(&mut session, &spec).await.unwrap();

        assert_eq!(result.reason, CompletionReason::TimedOut);
        assert_eq!(result.status, CommandStatus::Timeout);
        assert!(result.elapsed >= Duration::from_secs(2));
        assert!(result.elapsed < Duration::from_millis(2050));
        assert!(result.output.len() >= 19, "partial capture kept: {:?}", result.output);
        assert_eq!(session.state(), SessionState::Ready);
        target.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn test_explicit_pattern_completes_early() {
        let (mut session, server) = ready_session();
        let target = tokio::spawn(async move {
            let (_, mut server) = read_command(server).await;
            for _ in 0..6 {
                sleep(Duration::from_millis(500)).await;
                server.write_all(b"working...\r\n").await.unwrap();
            }
            server.write_all(b"=== INSTALL COMPLETE ===\r\n").await.unwrap();
            sleep(Duration::from_millis(100)).await;
            server.write_all(b"cleanup\r\n").await.unwrap();
            sleep(Duration::from_secs(30)).await;
            server
        });

        let executor = CommandExecutor::new(&config(), CancellationToken::new()).unwrap();
        let spec = CommandSpec::new("install")
            .with_timeout(Duration::from_secs(10))
            .until("INSTALL COMPLETE")
            .unwrap();
        let result = executor.run(&mut session, &spec).await.unwrap();

        assert_eq!(result.reason, CompletionReason::PatternMatched);
        assert!(result.elapsed >= Duration::from_secs(3));
        assert!(result.elapsed < Duration::from_millis(3500));
        // Trailing bytes inside the grace window are kept.
        assert!(result.output.contains("cleanup"));
        target.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn test_marker_in_echoed_command_does_not_complete() {
        let (mut session, server) = ready_session();
        let target = tokio::spawn(async move {
            let (line, mut server) = read_command(server).await;
            server.write_all(format!("{line}\r\n").as_bytes()).await.unwrap();
            sleep(Duration::from_secs(3)).await;
            server.write_all(b"cc -o kernel main.c\r\nBUILD OK\r\n$ ").await.unwrap();
            sleep(Duration::from_secs(30)).await;
            server
        });

        let executor = CommandExecutor::new(&config(), CancellationToken::new()).unwrap();
        let spec = CommandSpec::new("make && echo BUILD OK")
            .with_timeout(Duration::from_secs(10))
            .until("BUILD OK")
            .unwrap();
        let result = executor.run(&mut session, &spec).await.unwrap();

        assert_eq!(result.reason, CompletionReason::PatternMatched);
        assert!(result.elapsed >= Duration::from_secs(3));
        assert!(result.elapsed < Duration::from_millis(3500));
        assert!(result.output.contains("cc -o kernel main.c"));
        assert_eq!(result.output.matches("BUILD OK").count(), 2);
        target.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_output_is_drained_before_send() {
        let (mut session, mut server) = ready_session();
        server.write_all(b"late boot message\r\n").await.unwrap();

        let target = tokio::spawn(async move {
            let (_, mut server) = read_command(server).await;
            server.write_all(b"fresh\r\n# ").await.unwrap();
            server
        });

        let executor = CommandExecutor::new(&config(), CancellationToken::new()).unwrap();
        let result = executor.run(&mut session, &CommandSpec::new("status")).await.unwrap();

        assert!(!result.output.contains("late boot message"));
        assert!(result.output.contains("fresh"));
        drop(target.await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stream_closed_mid_command() {
        let (mut session, server) = ready_session();
        tokio::spawn(async move {
            let (_, mut server) = read_command(server).await;
            server.write_all(b"panic: kernel fault\r\n").await.unwrap();
            drop(server);
        });

        let executor = CommandExecutor::new(&config(), CancellationToken::new()).unwrap();
        let result = executor.run(&mut session, &CommandSpec::new("crash")).await.unwrap();

        assert_eq!(result.reason, CompletionReason::StreamClosed);
        assert_eq!(result.status, CommandStatus::Error);
        assert!(result.output.contains("kernel fault"));
        assert_eq!(session.state(), SessionState::Failed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_stops_capture() {
        let (mut session, _server) = ready_session();
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            sleep(Duration::from_secs(1)).await;
            trigger.cancel();
        });

        let executor = CommandExecutor::new(&config(), cancel).unwrap();
        let spec = CommandSpec::new("hang").with_timeout(Duration::from_secs(60));
        let result = executor.run(&mut session, &spec).await.unwrap();

        assert_eq!(result.reason, CompletionReason::Cancelled);
        assert!(result.elapsed < Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_requires_ready_session() {
        let (client, _server) = tokio::io::duplex(64);
        let mut session = Session::from_stream(client, "stub");
        let executor = CommandExecutor::new(&config(), CancellationToken::new()).unwrap();
        assert!(executor.run(&mut session, &CommandSpec::new("ls")).await.is_err());
    }
}
