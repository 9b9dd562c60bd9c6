//! Sequential execution of a scenario's steps.

use crate::boot::BootRecord;
use crate::command::{CommandResult, CommandSpec, CommandStatus};
use crate::config::CompletionPolicy;
use crate::executor::CommandExecutor;
use crate::report::ScenarioResult;
use crate::session::Session;
use crate::transcript::Transcript;
use tracing::{info, warn};

/// Runs steps strictly in order on one session and aggregates the results.
pub struct ScenarioRunner<'a> {
    executor: &'a CommandExecutor,
    policy: CompletionPolicy,
    timeouts_fail: bool,
    transcript: Option<Transcript>,
}

impl<'a> ScenarioRunner<'a> {
    pub fn new(executor: &'a CommandExecutor, policy: CompletionPolicy, timeouts_fail: bool) -> Self {
        ScenarioRunner {
            executor,
            policy,
            timeouts_fail,
            transcript: None,
        }
    }

    pub fn with_transcript(mut self, transcript: Transcript) -> Self {
        self.transcript = Some(transcript);
        self
    }

    fn counts_as_failure(&self, result: &CommandResult) -> bool {
        match result.status {
            CommandStatus::Ok => false,
            CommandStatus::Timeout => self.timeouts_fail,
            CommandStatus::Error => true,
        }
    }

    /// Execute `steps` after a successful boot.
    ///
    /// A closed stream or a cancellation ends the run whatever the policy,
    /// since no further command can be issued. Other failures abort only
    /// under [`CompletionPolicy::AbortOnFailure`].
    pub async fn execute(
        &self,
        session: &mut Session,
        boot: BootRecord,
        steps: &[CommandSpec],
    ) -> ScenarioResult {
        let mut results = Vec::with_capacity(steps.len());
        let mut aborted = None;

        for (index, step) in steps.iter().enumerate() {
            let result = match self.executor.run(session, step).await {
                Ok(result) => result,
                Err(err) => {
                    warn!(step = index + 1, error = %err, "cannot run step");
                    aborted = Some(format!("step {} not run: {err}", index + 1));
                    break;
                }
            };

            if let Some(transcript) = &self.transcript {
                if let Err(err) = transcript.record_command(session.peer(), index, &result) {
                    warn!(error = %err, "failed to write transcript");
                }
            }

            let fatal = result.status == CommandStatus::Error;
            let abort = fatal
                || (self.policy == CompletionPolicy::AbortOnFailure && self.counts_as_failure(&result));
            let reason = result.error();
            results.push(result);

            if abort {
                if let Some(err) = reason {
                    warn!(step = index + 1, error = %err, remaining = steps.len() - index - 1, "aborting scenario");
                    aborted = Some(format!("step {}: {err}", index + 1));
                }
                break;
            }
        }

        let scenario = ScenarioResult::new(boot, results, aborted, self.timeouts_fail);
        info!(
            verdict = %scenario.verdict,
            commands = scenario.commands.len(),
            steps = steps.len(),
            "scenario finished"
        );
        scenario
    }
}
