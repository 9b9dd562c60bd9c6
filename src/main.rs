use anyhow::{Context, Result};
use clap::Parser;
use conscript::{CompletionPolicy, Engine, EngineConfig, Target, Transcript, parse_duration, parse_file};
use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(Parser, Debug)]
#[command(
    name = "conscript",
    about = "Drive an emulated target through its serial console and report the outcome",
    version
)]
struct Args {
    /// Path to the scenario file
    #[arg(short, long)]
    scenario: PathBuf,

    /// Optional TOML configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Console endpoint: host:port or "pty"
    #[arg(long)]
    console: Option<String>,

    /// Regex marking the end of boot
    #[arg(long)]
    ready: Option<String>,

    /// Boot timeout (e.g. 90s, 1500ms)
    #[arg(long, value_parser = parse_cli_duration)]
    boot_timeout: Option<Duration>,

    /// Stop at the first failed step
    #[arg(long)]
    abort_on_failure: bool,

    /// Append sanitized console output to this file
    #[arg(long)]
    transcript: Option<PathBuf>,

    /// Write a JSON report to this file
    #[arg(long)]
    report: Option<PathBuf>,

    /// Mirror raw console output to stdout
    #[arg(long)]
    echo: bool,

    /// Program to launch as the target (omit to attach to a running console)
    #[arg(short, long)]
    command: Option<String>,

    /// Arguments to pass to the target
    #[arg(trailing_var_arg = true)]
    args: Vec<String>,
}

fn parse_cli_duration(s: &str) -> Result<Duration, String> {
    parse_duration(s).map_err(|err| err.to_string())
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("conscript=info")))
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();

    match run(Args::parse()).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(1),
        Err(err) => {
            error!("{err:#}");
            ExitCode::from(2)
        }
    }
}

async fn run(args: Args) -> Result<bool> {
    let mut config = EngineConfig::load(args.config.as_deref()).context("Failed to load configuration")?;
    if let Some(console) = &args.console {
        config.console = console.clone();
    }

    let mut scenario = parse_file(&args.scenario)
        .with_context(|| format!("Failed to parse scenario file: {}", args.scenario.display()))?;

    // Flags beat directives; the engine applies the scenario last.
    if let Some(ready) = args.ready {
        scenario.ready_signature = Some(ready);
    }
    if let Some(timeout) = args.boot_timeout {
        scenario.boot_timeout = Some(timeout);
    }
    if args.abort_on_failure {
        scenario.policy = Some(CompletionPolicy::AbortOnFailure);
    }

    let mut engine = Engine::new(config);
    if args.echo {
        engine = engine.with_output_handler(|bytes| {
            let mut stdout = std::io::stdout().lock();
            let _ = stdout.write_all(bytes);
            let _ = stdout.flush();
        });
    }
    if let Some(path) = &args.transcript {
        let transcript = Transcript::append_to(path)
            .with_context(|| format!("Failed to open transcript: {}", path.display()))?;
        engine = engine.with_transcript(transcript);
    }

    let cancel = engine.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupted, cancelling run");
            cancel.cancel();
        }
    });

    let target = args.command.map(|program| Target::new(program, args.args));
    let result = engine
        .run(target.as_ref(), &scenario)
        .await
        .context("Failed to run scenario")?;

    println!("{}", result.render());
    if let Some(path) = &args.report {
        let json = result.to_json().context("Failed to serialize report")?;
        std::fs::write(path, json).with_context(|| format!("Failed to write report: {}", path.display()))?;
    }

    Ok(result.passed())
}
