//! Append-only transcript of sanitized console output.
//!
//! Clones share one writer behind a mutex, so engines driving independent
//! targets concurrently can log to the same file without interleaving
//! records.

use crate::boot::BootRecord;
use crate::command::CommandResult;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};

#[derive(Clone)]
pub struct Transcript {
    sink: Arc<Mutex<Box<dyn Write + Send>>>,
}

impl Transcript {
    pub fn from_writer(writer: impl Write + Send + 'static) -> Self {
        Transcript {
            sink: Arc::new(Mutex::new(Box::new(writer))),
        }
    }

    /// Open `path` for appending, creating it if needed.
    pub fn append_to(path: impl AsRef<Path>) -> io::Result<Self> {
        let file: File = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)?;
        Ok(Self::from_writer(file))
    }

    /// Write one record atomically with respect to other clones.
    pub fn record(&self, header: &str, body: &str) -> io::Result<()> {
        let mut sink = self.sink.lock().unwrap_or_else(PoisonError::into_inner);
        writeln!(sink, "=== {header} ===")?;
        writeln!(sink, "{}", body.trim_end())?;
        sink.flush()
    }

    pub fn record_boot(&self, peer: &str, boot: &BootRecord) -> io::Result<()> {
        let header = format!(
            "{peer} boot {:?} after {:.2}s",
            boot.outcome,
            boot.elapsed.as_secs_f64()
        );
        self.record(&header, &boot.output)
    }

    pub fn record_command(&self, peer: &str, index: usize, result: &CommandResult) -> io::Result<()> {
        let header = format!(
            "{peer} [{}] {} -> {} ({}, {:.2}s)",
            index + 1,
            result.command,
            result.status,
            result.reason,
            result.elapsed.as_secs_f64()
        );
        self.record(&header, &result.output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            // Byte-at-a-time writes make interleaving visible if records were not serialized.
            self.0.lock().unwrap().push(buf[0]);
            Ok(1)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_concurrent_records_do_not_interleave() {
        let buf = SharedBuf::default();
        let transcript = Transcript::from_writer(buf.clone());

        let handles: Vec<_> = (0..4)
            .map(|worker| {
                let transcript = transcript.clone();
                thread::spawn(move || {
                    for n in 0..20 {
                        let body = format!("worker{worker}-line{n}");
                        transcript.record(&format!("w{worker}"), &body).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let text = String::from_utf8(buf.0.lock().unwrap().clone()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 160);
        for pair in lines.chunks(2) {
            let worker = pair[0].trim_start_matches("=== w").trim_end_matches(" ===");
            assert!(pair[1].starts_with(&format!("worker{worker}-")), "{pair:?}");
        }
    }

    #[test]
    fn test_append_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.log");

        Transcript::append_to(&path).unwrap().record("first", "one").unwrap();
        Transcript::append_to(&path).unwrap().record("second", "two\r\n").unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text, "=== first ===\none\n=== second ===\ntwo\n");
    }
}
