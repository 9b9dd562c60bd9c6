//! Engine configuration.
//!
//! Every knob has a default; values are layered from an optional TOML file,
//! then `CONSCRIPT_*` environment variables. Scenario directives and
//! command-line flags are applied on top by the caller.

use crate::error::Result;
use crate::parser::parse_duration;
use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Environment variable prefix (`CONSCRIPT_BOOT_TIMEOUT=90s`).
pub const ENV_PREFIX: &str = "CONSCRIPT";

/// What to do with the remaining steps once one fails or times out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CompletionPolicy {
    /// Run every step so partial diagnostics are always collected.
    #[default]
    ContinueOnFailure,
    /// Stop at the first failed step.
    AbortOnFailure,
}

impl FromStr for CompletionPolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim() {
            "continue-on-failure" => Ok(CompletionPolicy::ContinueOnFailure),
            "abort-on-failure" => Ok(CompletionPolicy::AbortOnFailure),
            other => Err(format!(
                "unknown policy '{other}' (expected continue-on-failure or abort-on-failure)"
            )),
        }
    }
}

impl fmt::Display for CompletionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CompletionPolicy::ContinueOnFailure => "continue-on-failure",
            CompletionPolicy::AbortOnFailure => "abort-on-failure",
        })
    }
}

/// Where the console lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleEndpoint {
    /// `host:port` byte stream (e.g. an emulator's `-serial tcp:...`).
    Tcp(String),
    /// The target's own pseudo-terminal.
    Pty,
}

impl ConsoleEndpoint {
    pub fn parse(value: &str) -> Self {
        let value = value.trim();
        if value.eq_ignore_ascii_case("pty") {
            ConsoleEndpoint::Pty
        } else {
            ConsoleEndpoint::Tcp(value.to_string())
        }
    }
}

impl fmt::Display for ConsoleEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConsoleEndpoint::Tcp(address) => f.write_str(address),
            ConsoleEndpoint::Pty => f.write_str("pty"),
        }
    }
}

/// All engine settings. See the field docs for defaults.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// `host:port` or `pty`. Default `127.0.0.1:5555`.
    pub console: String,
    /// Connection attempts before giving up. Default 30.
    pub connect_retries: u32,
    /// Fixed delay between connection attempts. Default 1s.
    #[serde(deserialize_with = "de_duration")]
    pub connect_delay: Duration,
    /// Ceiling for the ready signature to appear. Default 120s.
    #[serde(deserialize_with = "de_duration")]
    pub boot_timeout: Duration,
    /// Regex marking the end of boot. Defaults to the idle prompt.
    pub ready_signature: String,
    /// Send an empty line when boot starts to provoke a prompt from a
    /// target that is already running. Default false.
    pub boot_wake: bool,
    /// Pause after the ready signature before the final drain. Default 500ms.
    #[serde(deserialize_with = "de_duration")]
    pub settle_delay: Duration,
    /// Hard ceiling per command. Default 30s.
    #[serde(deserialize_with = "de_duration")]
    pub default_command_timeout: Duration,
    /// Idle time required after a prompt match. Default 1s.
    #[serde(deserialize_with = "de_duration")]
    pub quiescence_window: Duration,
    /// Regex the tail of an idle console matches. Default `[$#>%]\s*$`.
    pub prompt_pattern: String,
    /// Window for trailing bytes after an explicit completion pattern. Default 200ms.
    #[serde(deserialize_with = "de_duration")]
    pub pattern_grace: Duration,
    /// Quiet interval that ends the pre-command drain. Default 150ms.
    #[serde(deserialize_with = "de_duration")]
    pub drain_quiet: Duration,
    /// Upper bound on the pre-command drain. Default 2s.
    #[serde(deserialize_with = "de_duration")]
    pub drain_limit: Duration,
    /// Sleep between polls. Default 20ms.
    #[serde(deserialize_with = "de_duration")]
    pub poll_interval: Duration,
    /// Default `continue-on-failure`.
    pub completion_policy: CompletionPolicy,
    /// Whether a timed-out command fails the scenario. Default true.
    pub timeouts_fail: bool,
    /// Appended to every command. Default `"\n"`.
    pub line_ending: String,
}

pub const DEFAULT_PROMPT_PATTERN: &str = r"[$#>%]\s*$";

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            console: "127.0.0.1:5555".to_string(),
            connect_retries: 30,
            connect_delay: Duration::from_secs(1),
            boot_timeout: Duration::from_secs(120),
            ready_signature: DEFAULT_PROMPT_PATTERN.to_string(),
            boot_wake: false,
            settle_delay: Duration::from_millis(500),
            default_command_timeout: Duration::from_secs(30),
            quiescence_window: Duration::from_secs(1),
            prompt_pattern: DEFAULT_PROMPT_PATTERN.to_string(),
            pattern_grace: Duration::from_millis(200),
            drain_quiet: Duration::from_millis(150),
            drain_limit: Duration::from_secs(2),
            poll_interval: Duration::from_millis(20),
            completion_policy: CompletionPolicy::ContinueOnFailure,
            timeouts_fail: true,
            line_ending: "\n".to_string(),
        }
    }
}

impl EngineConfig {
    /// Load from an optional file and the environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::from(path).required(true));
        }
        let config = builder
            .add_source(Environment::with_prefix(ENV_PREFIX).try_parsing(true))
            .build()?;
        Ok(config.try_deserialize()?)
    }

    /// Parse a TOML document directly, without the environment layer.
    pub fn from_toml(content: &str) -> Result<Self> {
        let config = Config::builder()
            .add_source(File::from_str(content, FileFormat::Toml))
            .build()?;
        Ok(config.try_deserialize()?)
    }

    pub fn endpoint(&self) -> ConsoleEndpoint {
        ConsoleEndpoint::parse(&self.console)
    }
}

fn de_duration<'de, D>(deserializer: D) -> std::result::Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Millis(u64),
        Text(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Millis(ms) => Ok(Duration::from_millis(ms)),
        Raw::Text(text) => parse_duration(&text).map_err(serde::de::Error::custom),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.connect_retries, 30);
        assert_eq!(config.quiescence_window, Duration::from_secs(1));
        assert_eq!(config.completion_policy, CompletionPolicy::ContinueOnFailure);
        assert_eq!(config.endpoint(), ConsoleEndpoint::Tcp("127.0.0.1:5555".into()));
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = EngineConfig::from_toml(
            r#"
console = "pty"
boot_timeout = "90s"
quiescence_window = 1500
completion_policy = "abort-on-failure"
"#,
        )
        .unwrap();

        assert_eq!(config.endpoint(), ConsoleEndpoint::Pty);
        assert_eq!(config.boot_timeout, Duration::from_secs(90));
        assert_eq!(config.quiescence_window, Duration::from_millis(1500));
        assert_eq!(config.completion_policy, CompletionPolicy::AbortOnFailure);
        assert_eq!(config.connect_retries, 30);
        assert_eq!(config.line_ending, "\n");
    }

    #[test]
    fn test_bad_duration_is_rejected() {
        assert!(EngineConfig::from_toml(r#"boot_timeout = "forever""#).is_err());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "connect_retries = 3\nconnect_delay = \"250ms\"").unwrap();

        let config = EngineConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.connect_retries, 3);
        assert_eq!(config.connect_delay, Duration::from_millis(250));
    }

    #[test]
    fn test_policy_from_str() {
        assert_eq!(
            "abort-on-failure".parse::<CompletionPolicy>().unwrap(),
            CompletionPolicy::AbortOnFailure
        );
        assert!("sometimes".parse::<CompletionPolicy>().is_err());
    }
}
