//! Service-lifecycle orchestrator for the agent deployment.
//!
//! `stackup up` launches the tool server, the compatibility API, and the
//! public tunnel in order, waits for each to report ready before starting the
//! next, and tears every started process down on any exit path. The binary
//! entry point delegates to [`run`], which can also be driven from tests with
//! substituted IO streams.

use std::ffi::OsString;
use std::io::Write;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use stackup_config::{Config, Credentials, EnvSnapshot, PUBLIC_URL_VAR};
use tracing::{info, warn};

mod cli;
mod config;
mod errors;
pub mod pipeline;
pub mod stack;
pub mod telemetry;
pub mod verify;

#[cfg(test)]
mod tests;

use cli::{Cli, CliCommand};
use config::{ConfigLoader, OrthoConfigLoader, command_arguments, split_config_arguments};
use errors::AppError;
use pipeline::{
    CancellationToken, OrchestrationSession, PIPELINE_TARGET, PipelineReport, PipelineReporter,
    PipelineTimings, ProbeFactory, SignalWatcher, StructuredPipelineReporter, SystemProbeFactory,
};
use stack::{API_SHIM, TOOL_SERVER, deployment_stack};
use verify::{DeploymentVerifier, SAMPLE_QUERIES};

/// CLI flags recognised by the configuration loader.
///
/// MAINTENANCE: keep in sync with the fields of `stackup_config::Config`.
const CONFIG_CLI_FLAGS: &[&str] = &[
    "--config-path",
    "--log-filter",
    "--log-format",
    "--workdir",
    "--tool-server-command",
    "--tool-server-port",
    "--api-shim-command",
    "--api-shim-port",
    "--tunnel-command",
    "--tunnel-url-suffix",
    "--startup-timeout-ms",
    "--poll-interval-ms",
    "--warmup-ms",
    "--shutdown-grace-ms",
    "--probe-timeout-ms",
];

/// Upper bound for a single agent run during `stackup verify`.
const RUN_TIMEOUT: Duration = Duration::from_secs(120);

/// Runs the CLI using the provided arguments and IO handles.
#[must_use]
pub fn run<I, W, E>(args: I, stdout: &mut W, stderr: &mut E) -> ExitCode
where
    I: IntoIterator<Item = OsString>,
    W: Write,
    E: Write,
{
    run_with_loader(args, stdout, stderr, &OrthoConfigLoader)
}

fn run_with_loader<I, W, E, L>(args: I, stdout: &mut W, stderr: &mut E, loader: &L) -> ExitCode
where
    I: IntoIterator<Item = OsString>,
    W: Write,
    E: Write,
    L: ConfigLoader,
{
    let args: Vec<OsString> = args.into_iter().collect();
    let split = split_config_arguments(&args);

    let result = Cli::try_parse_from(command_arguments(&args, &split))
        .map_err(AppError::CliUsage)
        .and_then(|cli| {
            loader
                .load(&split.config_arguments)
                .map(|config| (cli, config))
        })
        .and_then(|(cli, config)| {
            telemetry::initialise(&config)?;
            execute(cli.command, &config, stdout)
        });

    match result {
        Ok(exit_code) => exit_code,
        Err(AppError::CliUsage(error)) if !error.use_stderr() => {
            let _ = write!(stdout, "{error}");
            ExitCode::SUCCESS
        }
        Err(error) => {
            let _ = writeln!(stderr, "{error}");
            ExitCode::FAILURE
        }
    }
}

fn execute<W: Write>(
    command: CliCommand,
    config: &Config,
    stdout: &mut W,
) -> Result<ExitCode, AppError> {
    match command {
        CliCommand::Up => {
            let snapshot = EnvSnapshot::capture(Some(config.dotenv_path().as_path()))?;
            run_up(config, &snapshot, stdout)
        }
        CliCommand::Check => {
            let snapshot = EnvSnapshot::capture(Some(config.dotenv_path().as_path()))?;
            run_check(config, &snapshot, stdout)
        }
        CliCommand::Verify { base_url } => run_verify(config, base_url.as_deref(), stdout),
    }
}

/// Validates credentials, installs signal handling, then brings the stack up.
fn run_up<W: Write>(
    config: &Config,
    snapshot: &EnvSnapshot,
    stdout: &mut W,
) -> Result<ExitCode, AppError> {
    let credentials = validated_credentials(snapshot)?;
    let probes = SystemProbeFactory::new(config.probe_timeout()).map_err(AppError::ProbeClient)?;
    let cancel = CancellationToken::new();
    let _watcher = SignalWatcher::install(cancel.clone())?;
    bring_up(
        config,
        &credentials,
        &cancel,
        &probes,
        Arc::new(StructuredPipelineReporter::new()),
        stdout,
    )
}

/// Runs the pipeline, prints the banner, and holds the services until
/// `cancel` fires.
pub(crate) fn bring_up<W: Write>(
    config: &Config,
    credentials: &Credentials,
    cancel: &CancellationToken,
    probes: &dyn ProbeFactory,
    reporter: Arc<dyn PipelineReporter>,
    stdout: &mut W,
) -> Result<ExitCode, AppError> {
    let specs = deployment_stack(config, credentials)?;
    let mut session =
        OrchestrationSession::new(PipelineTimings::from_config(config), cancel.clone(), reporter);
    let report = session.run_pipeline(&specs, probes)?;
    write_banner(stdout, config, &report)?;

    cancel.wait();
    info!(target: PIPELINE_TARGET, "shutting down");
    let sweep = session.shutdown();
    writeln!(stdout, "Stopped {} service(s).", sweep.stopped.len())?;
    if !sweep.is_clean() {
        warn!(
            target: PIPELINE_TARGET,
            failures = sweep.errors.len(),
            "some services could not be terminated"
        );
    }
    Ok(ExitCode::SUCCESS)
}

fn validated_credentials(snapshot: &EnvSnapshot) -> Result<Credentials, AppError> {
    let credentials = Credentials::from_snapshot(snapshot)?;
    if !credentials.has_secondary_key() {
        info!(
            target: PIPELINE_TARGET,
            variable = stackup_config::SECONDARY_KEY_VAR,
            "optional credential not set"
        );
    }
    Ok(credentials)
}

fn write_banner<W: Write>(
    stdout: &mut W,
    config: &Config,
    report: &PipelineReport,
) -> Result<(), AppError> {
    writeln!(stdout, "All {} services ready.", report.services.len())?;
    writeln!(stdout, "  {TOOL_SERVER:<12} {}", config.tool_server_url())?;
    writeln!(stdout, "  {API_SHIM:<12} {}", config.api_shim_url())?;
    if let Some(url) = report.export(PUBLIC_URL_VAR) {
        writeln!(stdout, "  {:<12} {url}", "public URL")?;
    }
    writeln!(stdout, "Press Ctrl+C to stop.")?;
    stdout.flush()?;
    Ok(())
}

fn run_check<W: Write>(
    config: &Config,
    snapshot: &EnvSnapshot,
    stdout: &mut W,
) -> Result<ExitCode, AppError> {
    if !config.workdir().is_dir() {
        return Err(AppError::MissingWorkdir {
            path: config.workdir().display().to_string(),
        });
    }
    let credentials = validated_credentials(snapshot)?;
    let specs = deployment_stack(config, &credentials)?;
    writeln!(stdout, "Configuration OK; {} services would start:", specs.len())?;
    for spec in &specs {
        writeln!(
            stdout,
            "  {:<12} {}  [{}]",
            spec.name(),
            spec.command(),
            spec.readiness()
        )?;
    }
    Ok(ExitCode::SUCCESS)
}

fn run_verify<W: Write>(
    config: &Config,
    base_url: Option<&str>,
    stdout: &mut W,
) -> Result<ExitCode, AppError> {
    let api_shim = base_url.map_or_else(|| config.api_shim_url(), str::to_owned);
    let verifier = DeploymentVerifier::new(
        &config.tool_server_url(),
        &api_shim,
        config.probe_timeout(),
        RUN_TIMEOUT,
    )?;
    let report = verifier.verify(&SAMPLE_QUERIES)?;
    writeln!(stdout, "Assistant: {}", report.assistant_id)?;
    writeln!(stdout, "Thread:    {}", report.thread_id)?;
    for outcome in &report.runs {
        writeln!(
            stdout,
            "  {} -> {}",
            outcome.query,
            outcome.answer.as_deref().unwrap_or("(no answer)")
        )?;
    }
    writeln!(stdout, "Deployment check passed.")?;
    Ok(ExitCode::SUCCESS)
}
