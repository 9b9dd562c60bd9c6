//! # Conscript
//!
//! A console automation engine for driving an emulated target system through
//! a raw, unframed text console.
//!
//! The console gives no framing and no acknowledgement: the engine has to
//! infer from the byte stream alone whether the target has booted and when a
//! command has finished. It does so with two completion strategies behind the
//! [`CompletionDetector`] trait: an explicit per-command marker, or an idle
//! prompt followed by a quiet window.
//!
//! ## Quick start
//!
//! ```no_run
//! use conscript::{Engine, EngineConfig, Target, parse_str};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let scenario = parse_str(r#"
//! ready "Type 'help' for commands" 90s
//! run "uname"
//! run "make" 300s until "BUILD (OK|FAILED)"
//! "#)?;
//!
//!     let target = Target::new(
//!         "qemu-system-x86_64",
//!         ["-nographic", "-serial", "tcp:127.0.0.1:5555,server,nowait", "-cdrom", "os.iso"],
//!     );
//!     let engine = Engine::new(EngineConfig::default());
//!     let result = engine.run(Some(&target), &scenario).await?;
//!
//!     println!("{}", result.render());
//!     std::process::exit(if result.passed() { 0 } else { 1 });
//! }
//! ```
//!
//! ## Scenario syntax
//!
//! | Directive | Description |
//! |-----------|-------------|
//! | `run "cmd"` | Send a command; complete on a quiet idle prompt |
//! | `run "cmd" 5s` | Same, with a custom hard timeout |
//! | `run "cmd" until "regex"` | Complete as soon as `regex` appears in the output |
//! | `run "cmd" quiet 2s` | Custom quiescence window for this command |
//! | `ready "regex" 90s` | Boot signature and optional boot timeout |
//! | `prompt "regex"` | Idle-prompt pattern for this scenario |
//! | `policy abort-on-failure` | Stop at the first failed step (default: continue) |
//! | `# comment` | Full-line or inline comment |
//!
//! ## Lower-level building blocks
//!
//! [`Engine`] strings the components together. They can also be used
//! directly: [`connect`] yields a [`Session`], [`BootDetector::await_ready`]
//! waits for the target, [`CommandExecutor::run`] executes one
//! [`CommandSpec`], and [`ScenarioRunner::execute`] runs a list of them.

pub mod boot;
pub mod command;
pub mod config;
pub mod connector;
pub mod detect;
pub mod directive;
pub mod directives;
pub mod engine;
pub mod error;
pub mod executor;
pub mod parser;
pub mod process;
pub mod reader;
pub mod report;
pub mod runner;
pub mod sanitize;
pub mod scenario;
pub mod session;
pub mod transcript;

pub use boot::{BootDetector, BootOutcome, BootRecord};
pub use command::{CommandResult, CommandSpec, CommandStatus, CompletionReason};
pub use config::{CompletionPolicy, ConsoleEndpoint, EngineConfig};
pub use connector::{connect, connect_to_target};
pub use detect::{CompletionDetector, PatternDetector, QuiescenceDetector};
pub use engine::{Engine, Target};
pub use error::{Error, Result};
pub use executor::CommandExecutor;
pub use parser::{parse_duration, parse_file, parse_str};
pub use process::ProcessHandle;
pub use report::{ScenarioResult, Verdict};
pub use runner::ScenarioRunner;
pub use sanitize::{Sanitizer, sanitize};
pub use scenario::Scenario;
pub use session::{Session, SessionState};
pub use transcript::Transcript;
