//! Supervision of the target process.
//!
//! The target runs inside a pseudo-terminal so that emulators which insist on
//! a controlling terminal behave, and so the terminal itself can serve as the
//! console when no network endpoint is configured.

use crate::error::{Error, Result};
use crate::sanitize::sanitize;
use portable_pty::{Child, ChildKiller, CommandBuilder, MasterPty, PtySize};
use std::collections::VecDeque;
use std::io::{BufRead, BufReader, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use tracing::{debug, info, trace, warn};

/// Reader and writer of the target's terminal, taken over by a [`Session`](crate::Session).
pub struct PtyConsole {
    pub(crate) reader: Box<dyn Read + Send>,
    pub(crate) writer: Box<dyn Write + Send>,
}

/// Lines of discarded terminal output kept for diagnostics.
const TAIL_LINES: usize = 40;

/// Last lines the target printed on a terminal nobody else reads.
#[derive(Default)]
struct OutputTail {
    lines: Mutex<VecDeque<String>>,
    drained: AtomicBool,
}

impl OutputTail {
    fn push(&self, line: String) {
        let mut lines = self.lines.lock().unwrap_or_else(PoisonError::into_inner);
        if lines.len() == TAIL_LINES {
            lines.pop_front();
        }
        lines.push_back(line);
    }

    fn snapshot(&self) -> String {
        let lines = self.lines.lock().unwrap_or_else(PoisonError::into_inner);
        lines.iter().map(String::as_str).collect::<Vec<_>>().join("\n")
    }
}

/// Exclusive owner of a running target process.
///
/// Dropping the handle terminates the process, so every exit path of the
/// caller (including early returns and panics) cleans up.
pub struct ProcessHandle {
    program: String,
    // Dropping the master hangs up the terminal; keep it for the child's lifetime.
    _master: Box<dyn MasterPty + Send>,
    child: Box<dyn Child + Send + Sync>,
    console: Option<PtyConsole>,
    tail: Arc<OutputTail>,
    terminated: bool,
}

impl ProcessHandle {
    /// Start `program` with `args` inside a fresh PTY.
    pub fn launch(program: &str, args: &[String]) -> Result<Self> {
        let spawn_error = |reason: String| Error::Spawn {
            program: program.to_string(),
            reason,
        };

        let pty_system = portable_pty::native_pty_system();
        let pair = pty_system
            .openpty(PtySize {
                rows: 24,
                cols: 80,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|err| spawn_error(format!("failed to open PTY: {err}")))?;

        let mut cmd = CommandBuilder::new(program);
        cmd.args(args);

        let child = pair
            .slave
            .spawn_command(cmd)
            .map_err(|err| spawn_error(err.to_string()))?;
        // The child holds its own copy of the slave side.
        drop(pair.slave);

        let writer = pair
            .master
            .take_writer()
            .map_err(|err| spawn_error(format!("failed to get PTY writer: {err}")))?;
        let reader = pair
            .master
            .try_clone_reader()
            .map_err(|err| spawn_error(format!("failed to get PTY reader: {err}")))?;

        info!(program, pid = ?child.process_id(), "target launched");

        Ok(ProcessHandle {
            program: program.to_string(),
            _master: pair.master,
            child,
            console: Some(PtyConsole { reader, writer }),
            tail: Arc::default(),
            terminated: false,
        })
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn pid(&self) -> Option<u32> {
        self.child.process_id()
    }

    /// Hand the target's terminal to the caller. Returns `None` once taken or discarded.
    pub fn take_console(&mut self) -> Option<PtyConsole> {
        self.console.take()
    }

    /// Keep draining the terminal in the background when it is not the console.
    /// Each line goes to the trace log, and the last few are kept for
    /// [`output_tail`](Self::output_tail).
    pub fn discard_console(&mut self) {
        let Some(console) = self.console.take() else {
            return;
        };
        let program = self.program.clone();
        let tail = self.tail.clone();
        thread::spawn(move || {
            let mut lines = BufReader::new(console.reader);
            let mut line = Vec::new();
            loop {
                line.clear();
                match lines.read_until(b'\n', &mut line) {
                    Ok(0) | Err(_) => break,
                    Ok(_) => {
                        let text = sanitize(&line);
                        let text = text.trim_end();
                        trace!(target: "conscript::target", program = %program, "{text}");
                        if !text.is_empty() {
                            tail.push(text.to_string());
                        }
                    }
                }
            }
            tail.drained.store(true, Ordering::Release);
            drop(console.writer);
        });
    }

    /// The last lines of discarded terminal output, oldest first.
    pub fn output_tail(&self) -> String {
        self.tail.snapshot()
    }

    /// Whether the discarded terminal reached end-of-file, so
    /// [`output_tail`](Self::output_tail) is final.
    pub fn console_drained(&self) -> bool {
        self.tail.drained.load(Ordering::Acquire)
    }

    /// Non-blocking liveness check.
    pub fn is_alive(&mut self) -> bool {
        !self.terminated && matches!(self.child.try_wait(), Ok(None))
    }

    /// Request termination and reap the process. Safe to call repeatedly and
    /// on a process that already exited.
    pub fn terminate(&mut self) -> Result<()> {
        if self.terminated {
            return Ok(());
        }
        self.terminated = true;

        if let Ok(Some(status)) = self.child.try_wait() {
            debug!(program = %self.program, ?status, "target already exited");
            return Ok(());
        }

        info!(program = %self.program, pid = ?self.child.process_id(), "terminating target");
        if let Err(err) = self.child.kill() {
            // Lost the race with a natural exit.
            if matches!(self.child.try_wait(), Ok(Some(_))) {
                return Ok(());
            }
            return Err(err.into());
        }
        self.child.wait()?;
        Ok(())
    }
}

impl Drop for ProcessHandle {
    fn drop(&mut self) {
        if let Err(err) = self.terminate() {
            warn!(program = %self.program, error = %err, "failed to terminate target");
        }
    }
}
