//! One scenario step: what to send ([`CommandSpec`]) and what came back
//! ([`CommandResult`]).

use crate::error::{Error, Result};
use regex::Regex;
use serde::{Serialize, Serializer};
use std::fmt;
use std::time::Duration;

/// Input describing one command.
#[derive(Debug, Clone)]
pub struct CommandSpec {
    /// Text sent to the console; the line terminator is appended on send.
    pub command: String,
    /// Hard ceiling. `None` uses the engine's default command timeout.
    pub timeout: Option<Duration>,
    /// Marker that ends the command as soon as it appears in the output.
    pub completion_pattern: Option<Regex>,
    /// Overrides the engine's quiescence window for this command.
    pub quiescence: Option<Duration>,
}

impl CommandSpec {
    pub fn new(command: impl Into<String>) -> Self {
        CommandSpec {
            command: command.into(),
            timeout: None,
            completion_pattern: None,
            quiescence: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Complete the command when `pattern` matches the sanitized output.
    pub fn until(mut self, pattern: &str) -> Result<Self> {
        self.completion_pattern = Some(Regex::new(pattern)?);
        Ok(self)
    }

    pub fn with_quiescence(mut self, window: Duration) -> Self {
        self.quiescence = Some(window);
        self
    }
}

/// Why the capture loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum CompletionReason {
    /// The explicit completion pattern matched.
    PatternMatched,
    /// The idle prompt matched and the console stayed quiet.
    PromptQuiescent,
    /// The hard timeout expired first.
    TimedOut,
    /// The target exited or the connection dropped.
    StreamClosed,
    /// The cancellation token fired.
    Cancelled,
}

impl CompletionReason {
    pub fn status(self) -> CommandStatus {
        match self {
            CompletionReason::PatternMatched | CompletionReason::PromptQuiescent => {
                CommandStatus::Ok
            }
            CompletionReason::TimedOut => CommandStatus::Timeout,
            CompletionReason::StreamClosed | CompletionReason::Cancelled => CommandStatus::Error,
        }
    }
}

impl fmt::Display for CompletionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CompletionReason::PatternMatched => "pattern-matched",
            CompletionReason::PromptQuiescent => "prompt-quiescent",
            CompletionReason::TimedOut => "timed-out",
            CompletionReason::StreamClosed => "stream-closed",
            CompletionReason::Cancelled => "cancelled",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandStatus {
    Ok,
    Timeout,
    Error,
}

impl fmt::Display for CommandStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(match self {
            CommandStatus::Ok => "ok",
            CommandStatus::Timeout => "timeout",
            CommandStatus::Error => "error",
        })
    }
}

/// Output of one command. Never mutated after creation.
#[derive(Debug, Clone, Serialize)]
pub struct CommandResult {
    pub command: String,
    #[serde(skip)]
    pub raw: Vec<u8>,
    /// `raw` with control sequences stripped.
    pub output: String,
    #[serde(rename = "elapsed_ms", serialize_with = "as_millis")]
    pub elapsed: Duration,
    pub reason: CompletionReason,
    pub status: CommandStatus,
}

impl CommandResult {
    pub fn is_ok(&self) -> bool {
        self.status == CommandStatus::Ok
    }

    /// The typed error equivalent of a non-`ok` result, if any.
    pub fn error(&self) -> Option<Error> {
        match self.reason {
            CompletionReason::PatternMatched | CompletionReason::PromptQuiescent => None,
            CompletionReason::TimedOut => Some(Error::CommandTimeout {
                command: self.command.clone(),
                elapsed: self.elapsed,
            }),
            CompletionReason::StreamClosed => Some(Error::StreamClosed {
                during: "executing a command",
            }),
            CompletionReason::Cancelled => Some(Error::Cancelled),
        }
    }
}

pub(crate) fn as_millis<S>(duration: &Duration, serializer: S) -> std::result::Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_u64(duration.as_millis().min(u64::MAX as u128) as u64)
}
