//! Completion detection over an unframed console.
//!
//! The console carries no framing or acknowledgement, so the end of a
//! command's output can only be inferred. [`CompletionDetector`] isolates that
//! inference: the executor asks it after every poll, and a structured
//! framing protocol could later be plugged in as another implementation.

use crate::command::CompletionReason;
use regex::Regex;
use std::time::Duration;

/// Decides when a command's output is complete.
pub trait CompletionDetector: Send + Sync {
    /// `output` is the sanitized capture since the command was sent; `idle` is
    /// how long the console has been silent.
    fn check(&self, output: &str, idle: Duration) -> Option<CompletionReason>;

    /// How long to keep collecting trailing bytes after a match.
    fn grace(&self) -> Duration {
        Duration::ZERO
    }
}

/// The part of `output` that follows the console's echo of `command`.
///
/// Consoles echo the command line before running it, so a marker that also
/// appears in the command text would match the echo. While the echo line is
/// still arriving the result is empty. Output from a console that does not
/// echo is returned unchanged.
pub fn after_echo<'a>(output: &'a str, command: &str) -> &'a str {
    let command = command.trim();
    if command.is_empty() {
        return output;
    }
    match output.find('\n') {
        Some(end) if output[..end].trim().ends_with(command) => &output[end + 1..],
        Some(_) => output,
        None => {
            let partial = output.trim();
            if !partial.is_empty() && (command.starts_with(partial) || partial.ends_with(command)) {
                ""
            } else {
                output
            }
        }
    }
}

/// Completes as soon as a caller-supplied marker appears anywhere in the output.
pub struct PatternDetector {
    pattern: Regex,
    grace: Duration,
}

impl PatternDetector {
    pub fn new(pattern: Regex, grace: Duration) -> Self {
        PatternDetector { pattern, grace }
    }
}

impl CompletionDetector for PatternDetector {
    fn check(&self, output: &str, _idle: Duration) -> Option<CompletionReason> {
        self.pattern
            .is_match(output)
            .then_some(CompletionReason::PatternMatched)
    }

    fn grace(&self) -> Duration {
        self.grace
    }
}

/// Completes when the tail of the output looks like an idle prompt *and* the
/// console has been quiet for the whole window.
///
/// The prompt check alone would fire on prompt-like text in the middle of a
/// burst; the quiet check alone would fire on a pause inside long output.
pub struct QuiescenceDetector {
    prompt: Regex,
    window: Duration,
}

/// Only the trailing part of the output is tested against the prompt.
const PROMPT_TAIL_BYTES: usize = 256;

impl QuiescenceDetector {
    pub fn new(prompt: Regex, window: Duration) -> Self {
        QuiescenceDetector { prompt, window }
    }

    fn tail(output: &str) -> &str {
        if output.len() <= PROMPT_TAIL_BYTES {
            return output;
        }
        let mut start = output.len() - PROMPT_TAIL_BYTES;
        while !output.is_char_boundary(start) {
            start += 1;
        }
        &output[start..]
    }
}

impl CompletionDetector for QuiescenceDetector {
    fn check(&self, output: &str, idle: Duration) -> Option<CompletionReason> {
        if idle < self.window {
            return None;
        }
        self.prompt
            .is_match(Self::tail(output))
            .then_some(CompletionReason::PromptQuiescent)
    }
}
