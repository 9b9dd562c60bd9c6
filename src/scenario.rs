//! A scenario as data: ordered steps plus per-scenario overrides.

use crate::command::CommandSpec;
use crate::config::{CompletionPolicy, EngineConfig};
use std::time::Duration;

#[derive(Debug, Clone, Default)]
pub struct Scenario {
    pub steps: Vec<CommandSpec>,
    pub ready_signature: Option<String>,
    pub boot_timeout: Option<Duration>,
    pub prompt_pattern: Option<String>,
    pub policy: Option<CompletionPolicy>,
}

impl Scenario {
    /// A scenario of plain commands with engine defaults for everything else.
    pub fn from_commands<I, S>(commands: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Scenario {
            steps: commands.into_iter().map(CommandSpec::new).collect(),
            ..Scenario::default()
        }
    }

    /// Overlay this scenario's overrides on `config`.
    pub fn apply_to(&self, config: &mut EngineConfig) {
        if let Some(signature) = &self.ready_signature {
            config.ready_signature = signature.clone();
        }
        if let Some(timeout) = self.boot_timeout {
            config.boot_timeout = timeout;
        }
        if let Some(prompt) = &self.prompt_pattern {
            config.prompt_pattern = prompt.clone();
        }
        if let Some(policy) = self.policy {
            config.completion_policy = policy;
        }
    }
}
