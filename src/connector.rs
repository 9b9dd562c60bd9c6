//! Attaching to the console endpoint.
//!
//! A freshly launched target needs some time before its console listener
//! accepts connections, so the first attempts are expected to fail. Startup
//! latency is roughly constant, hence a fixed delay rather than backoff.

use crate::error::{Error, Result};
use crate::process::ProcessHandle;
use crate::session::Session;
use std::io;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::{Instant, sleep, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Ceiling for a single connection attempt.
const ATTEMPT_TIMEOUT: Duration = Duration::from_secs(5);

/// How long a dead target's last output may take to come through its terminal.
const EXIT_DRAIN_WAIT: Duration = Duration::from_millis(500);

/// Connect to `address`, retrying up to `max_attempts` times with `retry_delay`
/// between failures.
pub async fn connect(
    address: &str,
    max_attempts: u32,
    retry_delay: Duration,
    cancel: &CancellationToken,
) -> Result<Session> {
    connect_inner(address, max_attempts, retry_delay, cancel, None).await
}

/// Like [`connect`], for the console of a target we launched: gives up as
/// soon as the target exits, returning [`Error::TargetExited`] with the last
/// lines it printed.
pub async fn connect_to_target(
    address: &str,
    max_attempts: u32,
    retry_delay: Duration,
    cancel: &CancellationToken,
    target: &mut ProcessHandle,
) -> Result<Session> {
    connect_inner(address, max_attempts, retry_delay, cancel, Some(target)).await
}

async fn connect_inner(
    address: &str,
    max_attempts: u32,
    retry_delay: Duration,
    cancel: &CancellationToken,
    mut target: Option<&mut ProcessHandle>,
) -> Result<Session> {
    let max_attempts = max_attempts.max(1);
    let mut last_error = io::Error::new(io::ErrorKind::NotConnected, "no attempt made");

    for attempt in 1..=max_attempts {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        if let Some(target) = target.as_deref_mut() {
            if !target.is_alive() {
                return Err(target_exited(target).await);
            }
        }

        match timeout(ATTEMPT_TIMEOUT, TcpStream::connect(address)).await {
            Ok(Ok(stream)) => {
                if let Err(err) = stream.set_nodelay(true) {
                    debug!(error = %err, "failed to disable Nagle");
                }
                info!(address, attempt, "console connected");
                return Ok(Session::from_stream(stream, address));
            }
            Ok(Err(err)) => last_error = err,
            Err(_) => {
                last_error = io::Error::new(io::ErrorKind::TimedOut, "connection attempt timed out")
            }
        }

        debug!(address, attempt, max_attempts, error = %last_error, "console not reachable yet");
        if attempt < max_attempts {
            tokio::select! {
                _ = cancel.cancelled() => return Err(Error::Cancelled),
                _ = sleep(retry_delay) => {}
            }
        }
    }

    if let Some(target) = target {
        if !target.is_alive() {
            return Err(target_exited(target).await);
        }
        let output = target.output_tail();
        if !output.is_empty() {
            warn!(program = target.program(), %output, "target output while its console was unreachable");
        }
    }

    Err(Error::Connect {
        address: address.to_string(),
        attempts: max_attempts,
        source: last_error,
    })
}

async fn target_exited(target: &mut ProcessHandle) -> Error {
    // The exit can overtake the last lines still in the terminal.
    let deadline = Instant::now() + EXIT_DRAIN_WAIT;
    while !target.console_drained() && Instant::now() < deadline {
        sleep(Duration::from_millis(10)).await;
    }
    warn!(program = target.program(), "target exited before its console came up");
    Error::TargetExited {
        program: target.program().to_string(),
        output: target.output_tail(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionState;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    async fn free_port() -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    }

    #[tokio::test]
    async fn test_connects_to_listening_console() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 5];
            socket.read_exact(&mut buf).await.unwrap();
            socket.write_all(&buf).await.unwrap();
        });

        let mut session = connect(&address, 3, Duration::from_millis(10), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(session.state(), SessionState::Connected);
        assert_eq!(session.peer(), address);

        session.send_line("ping").await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        session.poll();
        assert_eq!(session.buffer(), b"ping\n");
    }

    #[tokio::test]
    async fn test_retries_until_listener_appears() {
        let port = free_port().await;
        let address = format!("127.0.0.1:{port}");

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(300)).await;
            let listener = TcpListener::bind(("127.0.0.1", port)).await.unwrap();
            let (_socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
        });

        let session = connect(&address, 50, Duration::from_millis(50), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(session.state(), SessionState::Connected);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        let address = format!("127.0.0.1:{}", free_port().await);

        let err = connect(&address, 3, Duration::from_millis(10), &CancellationToken::new())
            .await
            .err()
            .unwrap();
        match err {
            Error::Connect { attempts, .. } => assert_eq!(attempts, 3),
            other => panic!("expected connect error, got {other}"),
        }
    }

    #[tokio::test]
    async fn test_dead_target_fails_fast_with_its_output() {
        let address = format!("127.0.0.1:{}", free_port().await);
        let script = "echo 'qemu: could not open disk image os.iso'; exit 1";
        let mut target = ProcessHandle::launch("sh", &["-c".to_string(), script.to_string()]).unwrap();
        target.discard_console();

        let started = Instant::now();
        let err = connect_to_target(
            &address,
            50,
            Duration::from_millis(300),
            &CancellationToken::new(),
            &mut target,
        )
        .await
        .err()
        .unwrap();

        assert!(started.elapsed() < Duration::from_secs(5), "took {:?}", started.elapsed());
        match &err {
            Error::TargetExited { program, output } => {
                assert_eq!(program, "sh");
                assert!(output.contains("could not open disk image"), "output: {output}");
            }
            other => panic!("expected target exit, got {other}"),
        }
        assert!(err.to_string().contains("could not open disk image"));
    }

    #[tokio::test]
    async fn test_cancelled_before_connecting() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = connect("127.0.0.1:1", 3, Duration::from_millis(10), &cancel)
            .await
            .err()
            .unwrap();
        assert!(matches!(err, Error::Cancelled));
    }
}
