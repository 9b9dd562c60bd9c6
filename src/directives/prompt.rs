//! [`Prompt`] directive: the idle-prompt pattern for this scenario.
//!
//! Script syntax: `prompt "trustos:.*\$ $"`

use crate::directive::Directive;
use crate::parser::split_quoted;
use crate::scenario::Scenario;
use anyhow::{Result, bail};
use regex::Regex;

pub struct Prompt {
    pub pattern: String,
}

impl Prompt {
    pub const NAME: &'static str = "prompt";
}

impl Directive for Prompt {
    fn parse(args: &str) -> Result<Self> {
        let (pattern, rest) = split_quoted(args)?;
        if !rest.trim().is_empty() {
            bail!("unexpected '{}' after pattern", rest.trim());
        }
        Regex::new(&pattern)?;
        Ok(Prompt { pattern })
    }

    fn apply(self, scenario: &mut Scenario) {
        scenario.prompt_pattern = Some(self.pattern);
    }
}
