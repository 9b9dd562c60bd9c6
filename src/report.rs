//! Scenario results and their human-readable rendering.

use crate::boot::BootRecord;
use crate::command::{CommandResult, CommandStatus};
use serde::Serialize;
use std::fmt::{self, Write as _};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    Passed,
    Failed,
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Verdict::Passed => "passed",
            Verdict::Failed => "failed",
        })
    }
}

/// Boot record, ordered command results and the overall verdict.
#[derive(Debug, Clone, Serialize)]
pub struct ScenarioResult {
    pub boot: BootRecord,
    pub commands: Vec<CommandResult>,
    /// Why the remaining steps were skipped, if they were.
    pub aborted: Option<String>,
    pub verdict: Verdict,
}

impl ScenarioResult {
    /// Assemble a result and derive its verdict: failed when boot failed, the
    /// run was aborted, any command errored, or (when `timeouts_fail`) any
    /// command timed out.
    pub fn new(
        boot: BootRecord,
        commands: Vec<CommandResult>,
        aborted: Option<String>,
        timeouts_fail: bool,
    ) -> Self {
        let failed = !boot.success
            || aborted.is_some()
            || commands.iter().any(|result| match result.status {
                CommandStatus::Ok => false,
                CommandStatus::Timeout => timeouts_fail,
                CommandStatus::Error => true,
            });

        ScenarioResult {
            boot,
            commands,
            aborted,
            verdict: if failed { Verdict::Failed } else { Verdict::Passed },
        }
    }

    pub fn passed(&self) -> bool {
        self.verdict == Verdict::Passed
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    /// Plain-text log: a summary table followed by every captured output.
    pub fn render(&self) -> String {
        let mut out = String::new();

        let _ = writeln!(
            out,
            "boot: {} in {:.1}s",
            if self.boot.success { "ready" } else { "FAILED" },
            self.boot.elapsed.as_secs_f64()
        );
        for (index, result) in self.commands.iter().enumerate() {
            let _ = writeln!(
                out,
                "[{:>3}] {:<7} {:>7.2}s  {}  ({})",
                index + 1,
                result.status,
                result.elapsed.as_secs_f64(),
                result.command,
                result.reason
            );
        }
        if let Some(reason) = &self.aborted {
            let _ = writeln!(out, "aborted: {reason}");
        }
        let _ = writeln!(out, "verdict: {}", self.verdict);

        if !self.boot.success {
            let _ = writeln!(out, "\n--- boot output ---\n{}", self.boot.output.trim_end());
        }
        for (index, result) in self.commands.iter().enumerate() {
            let _ = writeln!(
                out,
                "\n--- [{}] {} ---\n{}",
                index + 1,
                result.command,
                result.output.trim_end()
            );
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::boot::BootOutcome;
    use crate::command::CompletionReason;
    use std::time::Duration;

    fn boot(success: bool) -> BootRecord {
        BootRecord {
            success,
            outcome: if success { BootOutcome::Ready } else { BootOutcome::TimedOut },
            elapsed: Duration::from_secs(3),
            output: "booting\r\n$ ".into(),
        }
    }

    fn result(command: &str, reason: CompletionReason) -> CommandResult {
        CommandResult {
            command: command.into(),
            raw: Vec::new(),
            output: format!("{command}\r\nout\r\n$ "),
            elapsed: Duration::from_millis(1100),
            reason,
            status: reason.status(),
        }
    }

    #[test]
    fn test_all_ok_passes() {
        let scenario = ScenarioResult::new(
            boot(true),
            vec![
                result("echo A", CompletionReason::PromptQuiescent),
                result("make", CompletionReason::PatternMatched),
            ],
            None,
            true,
        );
        assert_eq!(scenario.verdict, Verdict::Passed);
    }

    #[test]
    fn test_timeout_verdict_follows_policy() {
        let commands = vec![result("sleep", CompletionReason::TimedOut)];
        assert!(!ScenarioResult::new(boot(true), commands.clone(), None, true).passed());
        assert!(ScenarioResult::new(boot(true), commands, None, false).passed());
    }

    #[test]
    fn test_error_always_fails() {
        let commands = vec![result("reboot", CompletionReason::StreamClosed)];
        assert!(!ScenarioResult::new(boot(true), commands, None, false).passed());
    }

    #[test]
    fn test_failed_boot_fails() {
        let scenario = ScenarioResult::new(boot(false), Vec::new(), None, true);
        assert_eq!(scenario.verdict, Verdict::Failed);
        assert!(scenario.render().contains("--- boot output ---"));
    }

    #[test]
    fn test_render_and_json() {
        let scenario = ScenarioResult::new(
            boot(true),
            vec![result("echo A", CompletionReason::PromptQuiescent)],
            None,
            true,
        );
        let text = scenario.render();
        assert!(text.contains("echo A"));
        assert!(text.contains("verdict: passed"));

        let json: serde_json::Value = serde_json::from_str(&scenario.to_json().unwrap()).unwrap();
        assert_eq!(json["verdict"], "passed");
        assert_eq!(json["boot"]["elapsed_ms"], 3000);
        assert_eq!(json["commands"][0]["command"], "echo A");
        assert!(json["aborted"].is_null());
    }
}
