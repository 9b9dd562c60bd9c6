//! The [`Directive`] trait implemented by every scenario-file keyword.

use crate::scenario::Scenario;
use anyhow::Result;

/// One keyword of the scenario language.
///
/// To add a keyword:
///
/// 1. Define `pub const NAME: &'static str` on the struct, the word that
///    starts the line (e.g. `"run"`).
/// 2. Re-export the struct from `src/directives/mod.rs`.
/// 3. Add `(MyDirective::NAME, MyDirective::parse_into)` to the `REGISTRY`
///    in [`crate::parser`].
pub trait Directive: Sized {
    /// Parse the argument string (everything after the keyword).
    fn parse(args: &str) -> Result<Self>;

    /// Record the directive in the scenario being built.
    fn apply(self, scenario: &mut Scenario);

    /// Parse and apply in one step. This is the function-pointer type stored
    /// in the parser registry.
    fn parse_into(args: &str, scenario: &mut Scenario) -> Result<()> {
        Self::parse(args)?.apply(scenario);
        Ok(())
    }
}
