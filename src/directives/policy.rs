//! [`Policy`] directive: continue or abort after a failed step.
//!
//! Script syntax: `policy abort-on-failure` or `policy continue-on-failure`

use crate::config::CompletionPolicy;
use crate::directive::Directive;
use crate::scenario::Scenario;
use anyhow::{Result, anyhow};

pub struct Policy(pub CompletionPolicy);

impl Policy {
    pub const NAME: &'static str = "policy";
}

impl Directive for Policy {
    fn parse(args: &str) -> Result<Self> {
        args.parse().map(Policy).map_err(|err: String| anyhow!(err))
    }

    fn apply(self, scenario: &mut Scenario) {
        scenario.policy = Some(self.0);
    }
}
