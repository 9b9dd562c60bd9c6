//! End-to-end orchestration: launch, connect, boot, execute, tear down.

use crate::boot::BootDetector;
use crate::config::{ConsoleEndpoint, EngineConfig};
use crate::connector::{connect, connect_to_target};
use crate::error::{Error, Result};
use crate::executor::CommandExecutor;
use crate::process::ProcessHandle;
use crate::reader::OutputHandler;
use crate::report::ScenarioResult;
use crate::runner::ScenarioRunner;
use crate::scenario::Scenario;
use crate::session::Session;
use crate::transcript::Transcript;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// The system under test: an executable and its arguments, passed through verbatim.
#[derive(Debug, Clone)]
pub struct Target {
    pub program: String,
    pub args: Vec<String>,
}

impl Target {
    pub fn new(program: impl Into<String>, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Target {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }
}

/// Drives one target through one scenario.
pub struct Engine {
    config: EngineConfig,
    cancel: CancellationToken,
    output_handler: Option<OutputHandler>,
    transcript: Option<Transcript>,
}

impl Engine {
    pub fn new(config: EngineConfig) -> Self {
        Engine {
            config,
            cancel: CancellationToken::new(),
            output_handler: None,
            transcript: None,
        }
    }

    /// Mirror every inbound console chunk to `handler` (e.g. stdout).
    pub fn with_output_handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(&[u8]) + Send + Sync + 'static,
    {
        self.output_handler = Some(Arc::new(handler));
        self
    }

    pub fn with_transcript(mut self, transcript: Transcript) -> Self {
        self.transcript = Some(transcript);
        self
    }

    /// Token that aborts the run at the next poll when cancelled.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Run `scenario`, launching `target` first when given; otherwise attach
    /// to a console that is already up.
    ///
    /// A failed boot is reported in the returned result (with its partial
    /// output). Spawn, connect and configuration problems are errors, as is
    /// a target that exits before its console comes up. The
    /// target is terminated on every path, including panics, because the
    /// process handle terminates it on drop.
    pub async fn run(&self, target: Option<&Target>, scenario: &Scenario) -> Result<ScenarioResult> {
        let mut config = self.config.clone();
        scenario.apply_to(&mut config);

        // Compile every pattern before touching the target.
        let boot = BootDetector::new(&config, self.cancel.clone())?;
        let executor = CommandExecutor::new(&config, self.cancel.clone())?;

        let mut process = match target {
            Some(target) => Some(ProcessHandle::launch(&target.program, &target.args)?),
            None => None,
        };

        let mut session = self.open_session(&config, process.as_mut()).await?;
        let result = self.drive(&config, &boot, &executor, &mut session, scenario).await;

        // Teardown problems must not cost the caller the report.
        if let Err(err) = session.close().await {
            warn!(error = %err, "failed to close session");
        }
        if let Some(process) = process.as_mut() {
            if let Err(err) = process.terminate() {
                warn!(program = process.program(), error = %err, "failed to terminate target");
            }
        }
        result
    }

    async fn open_session(&self, config: &EngineConfig, process: Option<&mut ProcessHandle>) -> Result<Session> {
        let endpoint = config.endpoint();
        info!(console = %endpoint, "attaching to console");

        let session = match (endpoint, process) {
            (ConsoleEndpoint::Pty, Some(process)) => {
                let console = process
                    .take_console()
                    .ok_or_else(|| pty_unavailable("target terminal already taken"))?;
                Session::from_pty(console)
            }
            (ConsoleEndpoint::Pty, None) => {
                return Err(pty_unavailable("a pty console needs a target process"));
            }
            (ConsoleEndpoint::Tcp(address), Some(process)) => {
                process.discard_console();
                connect_to_target(
                    &address,
                    config.connect_retries,
                    config.connect_delay,
                    &self.cancel,
                    process,
                )
                .await?
            }
            (ConsoleEndpoint::Tcp(address), None) => {
                connect(&address, config.connect_retries, config.connect_delay, &self.cancel).await?
            }
        };

        let session = session.with_line_ending(config.line_ending.clone());
        Ok(match &self.output_handler {
            Some(handler) => session.with_output_handler(handler.clone()),
            None => session,
        })
    }

    async fn drive(
        &self,
        config: &EngineConfig,
        boot: &BootDetector,
        executor: &CommandExecutor,
        session: &mut Session,
        scenario: &Scenario,
    ) -> Result<ScenarioResult> {
        let record = boot.await_ready(session).await?;

        if let Some(transcript) = &self.transcript {
            if let Err(err) = transcript.record_boot(session.peer(), &record) {
                warn!(error = %err, "failed to write transcript");
            }
        }

        if !record.success {
            let reason = record.clone().ensure_ready().err().map(|err| err.to_string());
            return Ok(ScenarioResult::new(record, Vec::new(), reason, config.timeouts_fail));
        }

        let mut runner = ScenarioRunner::new(executor, config.completion_policy, config.timeouts_fail);
        if let Some(transcript) = &self.transcript {
            runner = runner.with_transcript(transcript.clone());
        }
        Ok(runner.execute(session, record, &scenario.steps).await)
    }
}

fn pty_unavailable(reason: &str) -> Error {
    Error::Connect {
        address: "pty".to_string(),
        attempts: 0,
        source: std::io::Error::new(std::io::ErrorKind::NotFound, reason.to_string()),
    }
}
