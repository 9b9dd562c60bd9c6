//! Scenario file parser.
//!
//! The top-level entry points are [`parse_str`] and [`parse_file`].

use crate::directive::Directive;
use crate::directives::{Policy, Prompt, Ready, Run};
use crate::error::{Error, Result};
use crate::scenario::Scenario;
use anyhow::{Context as _, anyhow};
use std::path::Path;
use std::time::Duration;

/// Parse a scenario from a string slice.
///
/// Lines that are empty or start with `#` are ignored. Inline comments (` # …`)
/// are stripped while preserving `#` characters inside quoted strings.
///
/// # Errors
///
/// Returns [`Error::Script`] naming the first line with an unknown keyword,
/// a malformed argument, an invalid regex or an unclosed quoted string.
///
/// # Example
///
/// ```
/// use conscript::parse_str;
///
/// let scenario = parse_str("run \"uname -a\"\nrun \"ls /\" 5s\n").unwrap();
/// assert_eq!(scenario.steps.len(), 2);
/// ```
pub fn parse_str(content: &str) -> Result<Scenario> {
    let mut scenario = Scenario::default();
    for (line_num, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let line = strip_inline_comment(line);
        parse_line(line, &mut scenario).map_err(|err| Error::Script {
            line: line_num + 1,
            message: format!("{err:#}"),
        })?;
    }
    Ok(scenario)
}

/// Read a scenario file and delegate to [`parse_str`].
pub fn parse_file(path: impl AsRef<Path>) -> Result<Scenario> {
    let content = std::fs::read_to_string(path.as_ref())?;
    parse_str(&content)
}

type ApplyFn = fn(&str, &mut Scenario) -> anyhow::Result<()>;

static REGISTRY: &[(&str, ApplyFn)] = &[
    (Run::NAME, Run::parse_into),
    (Ready::NAME, Ready::parse_into),
    (Prompt::NAME, Prompt::parse_into),
    (Policy::NAME, Policy::parse_into),
];

/// Dispatch a single non-empty, non-comment line to the matching directive.
fn parse_line(line: &str, scenario: &mut Scenario) -> anyhow::Result<()> {
    let (name, args) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
    let (_, apply) = REGISTRY
        .iter()
        .find(|(keyword, _)| *keyword == name)
        .ok_or_else(|| anyhow!("Unknown directive: {name}"))?;
    apply(args, scenario).with_context(|| format!("in '{name}' directive"))
}

/// Strip inline comments from a line, preserving `#` inside quoted strings.
fn strip_inline_comment(line: &str) -> &str {
    let mut in_quotes = false;
    let mut escaped = false;
    for (i, ch) in line.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        if ch == '\\' {
            escaped = true;
            continue;
        }
        if ch == '"' {
            in_quotes = !in_quotes;
            continue;
        }
        if ch == '#' && !in_quotes {
            return line[..i].trim();
        }
    }
    line
}

/// Parse a duration string: `1s`, `500ms`, `1.5s`.
pub fn parse_duration(s: &str) -> anyhow::Result<Duration> {
    let s = s.trim();
    if let Some(ms_str) = s.strip_suffix("ms") {
        let ms: u64 = ms_str
            .trim()
            .parse()
            .context("Invalid milliseconds value")?;
        Ok(Duration::from_millis(ms))
    } else if let Some(s_str) = s.strip_suffix('s') {
        let secs: f64 = s_str.trim().parse().context("Invalid seconds value")?;
        Duration::try_from_secs_f64(secs).context("Invalid seconds value")
    } else {
        Err(anyhow!("Duration must end with 's' or 'ms', got: {}", s))
    }
}

/// Split a leading double-quoted string off `args`, returning the unescaped
/// string and the untouched remainder.
///
/// Escapes: `\n`, `\t`, `\"`, `\\`. Any other backslash is kept as-is so
/// regular expressions like `\$` or `\d` pass through unchanged.
pub(crate) fn split_quoted(args: &str) -> anyhow::Result<(String, &str)> {
    let args = args.trim_start();
    let body = args
        .strip_prefix('"')
        .ok_or_else(|| anyhow!("Expected quoted string"))?;

    let mut out = String::new();
    let mut chars = body.char_indices();
    while let Some((i, ch)) = chars.next() {
        match ch {
            '"' => return Ok((out, &body[i + 1..])),
            '\\' => match chars.next() {
                Some((_, 'n')) => out.push('\n'),
                Some((_, 't')) => out.push('\t'),
                Some((_, '"')) => out.push('"'),
                Some((_, '\\')) => out.push('\\'),
                Some((_, other)) => {
                    out.push('\\');
                    out.push(other);
                }
                None => break,
            },
            _ => out.push(ch),
        }
    }
    Err(anyhow!("Unclosed quote"))
}

/// Split the next whitespace-delimited word off `s`.
pub(crate) fn next_word(s: &str) -> (&str, &str) {
    let s = s.trim_start();
    s.split_once(char::is_whitespace).unwrap_or((s, ""))
}
