//! [`Run`] directive: one command step.
//!
//! Script syntax:
//! - `run "uname -a"`: engine defaults
//! - `run "ls /" 5s`: custom hard timeout
//! - `run "make" 120s until "BUILD OK"`: complete on an explicit marker
//! - `run "top -n 1" quiet 2s`: custom quiescence window
//!
//! Options may appear in any order after the command.

use crate::command::CommandSpec;
use crate::directive::Directive;
use crate::parser::{next_word, parse_duration, split_quoted};
use crate::scenario::Scenario;
use anyhow::{Result, anyhow, bail};
use regex::Regex;

pub struct Run {
    pub spec: CommandSpec,
}

impl Run {
    pub const NAME: &'static str = "run";
}

impl Directive for Run {
    fn parse(args: &str) -> Result<Self> {
        let (command, mut rest) = split_quoted(args)?;
        let mut spec = CommandSpec::new(command);

        loop {
            rest = rest.trim_start();
            if rest.is_empty() {
                break;
            }

            let (word, after) = next_word(rest);
            match word {
                "until" => {
                    if spec.completion_pattern.is_some() {
                        bail!("'until' given twice");
                    }
                    let (pattern, after) = split_quoted(after)
                        .map_err(|err| anyhow!("'until' needs a quoted pattern: {err}"))?;
                    spec.completion_pattern = Some(Regex::new(&pattern)?);
                    rest = after;
                }
                "quiet" => {
                    if spec.quiescence.is_some() {
                        bail!("'quiet' given twice");
                    }
                    let (value, after) = next_word(after);
                    spec.quiescence = Some(parse_duration(value)?);
                    rest = after;
                }
                timeout => {
                    if spec.timeout.is_some() {
                        bail!("unexpected '{timeout}' (timeout already set)");
                    }
                    spec.timeout = Some(parse_duration(timeout)?);
                    rest = after;
                }
            }
        }

        Ok(Run { spec })
    }

    fn apply(self, scenario: &mut Scenario) {
        scenario.steps.push(self.spec);
    }
}
