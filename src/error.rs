//! Error types for the console engine.

use crate::session::SessionState;
use std::time::Duration;
use thiserror::Error;

/// Engine error type.
#[derive(Debug, Error)]
pub enum Error {
    /// The target process could not be started.
    #[error("failed to spawn target `{program}`: {reason}")]
    Spawn {
        /// Executable that was requested
        program: String,
        /// Underlying failure
        reason: String,
    },

    /// The console endpoint stayed unreachable after every attempt.
    #[error("console {address} unreachable after {attempts} attempts: {source}")]
    Connect {
        address: String,
        attempts: u32,
        #[source]
        source: std::io::Error,
    },

    /// The target process exited before its console accepted a connection.
    #[error("target `{program}` exited before its console came up{}", tail_suffix(.output))]
    TargetExited {
        program: String,
        /// Last lines the target printed
        output: String,
    },

    /// The ready signature never appeared.
    #[error("boot did not complete within {elapsed:?} ({} bytes captured)", .partial.len())]
    BootTimeout {
        elapsed: Duration,
        /// Sanitized text captured before the deadline
        partial: String,
    },

    /// A command did not complete before its hard timeout.
    #[error("command `{command}` timed out after {elapsed:?}")]
    CommandTimeout { command: String, elapsed: Duration },

    /// The target exited or the connection dropped.
    #[error("console stream closed while {during}")]
    StreamClosed { during: &'static str },

    /// The caller cancelled the operation.
    #[error("operation cancelled")]
    Cancelled,

    /// Illegal session state change.
    #[error("invalid session transition {from} -> {to}")]
    InvalidTransition { from: SessionState, to: SessionState },

    /// A user-supplied regular expression failed to compile.
    #[error("invalid pattern: {0}")]
    Pattern(#[from] regex::Error),

    /// Scenario file syntax error.
    #[error("scenario line {line}: {message}")]
    Script { line: usize, message: String },

    /// Configuration could not be loaded.
    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

fn tail_suffix(output: &str) -> String {
    if output.is_empty() {
        String::new()
    } else {
        format!(":\n{output}")
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
