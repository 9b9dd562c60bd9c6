//! [`Ready`] directive: boot signature and boot timeout.
//!
//! Script syntax: `ready "login:"` or `ready "Type 'help'" 90s`

use crate::directive::Directive;
use crate::parser::{parse_duration, split_quoted};
use crate::scenario::Scenario;
use anyhow::Result;
use regex::Regex;
use std::time::Duration;

pub struct Ready {
    pub signature: String,
    pub timeout: Option<Duration>,
}

impl Ready {
    pub const NAME: &'static str = "ready";
}

impl Directive for Ready {
    fn parse(args: &str) -> Result<Self> {
        let (signature, rest) = split_quoted(args)?;
        Regex::new(&signature)?;
        let rest = rest.trim();
        let timeout = if rest.is_empty() {
            None
        } else {
            Some(parse_duration(rest)?)
        };
        Ok(Ready { signature, timeout })
    }

    fn apply(self, scenario: &mut Scenario) {
        scenario.ready_signature = Some(self.signature);
        if self.timeout.is_some() {
            scenario.boot_timeout = self.timeout;
        }
    }
}
