//! End-to-end behaviour of `stackup up` with real processes and scripted
//! readiness.

use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use rstest::{fixture, rstest};
use stackup_config::{API_KEY_VAR, ConfigError, Config, Credentials, EnvSnapshot};
use tempfile::TempDir;

use super::support::{RecordingReporter, ScriptedProbes};
use crate::errors::AppError;
use crate::pipeline::{
    CancellationToken, PipelineError, PipelineReporter, ReadinessError, TerminationError,
    TerminationOutcome,
};
use crate::{bring_up, run_up};

const PUBLIC_URL: &str = "https://calm-lake.trycloudflare.com";

/// Forwards to a recorder and cancels the run once `service` is ready.
struct CancelWhenReady {
    recorder: Arc<RecordingReporter>,
    service: &'static str,
    token: CancellationToken,
}

impl PipelineReporter for CancelWhenReady {
    fn service_launching(&self, service: &str, command: &str) {
        self.recorder.service_launching(service, command);
    }

    fn service_ready(&self, service: &str, pid: u32, elapsed: Duration) {
        self.recorder.service_ready(service, pid, elapsed);
        if service == self.service {
            self.token.cancel();
        }
    }

    fn service_failed(&self, service: &str, error: &PipelineError) {
        self.recorder.service_failed(service, error);
    }

    fn service_stopping(&self, service: &str, pid: u32) {
        self.recorder.service_stopping(service, pid);
    }

    fn service_stopped(&self, service: &str, outcome: TerminationOutcome) {
        self.recorder.service_stopped(service, outcome);
    }

    fn termination_failed(&self, error: &TerminationError) {
        self.recorder.termination_failed(error);
    }
}

#[fixture]
fn workdir() -> TempDir {
    TempDir::new().expect("create temp dir")
}

fn stack_config(workdir: &Path) -> Config {
    Config {
        workdir: workdir.display().to_string(),
        tool_server_command: String::from("sleep 30"),
        api_shim_command: String::from("sleep 30"),
        tunnel_command: String::from("sleep 30"),
        startup_timeout_ms: 300,
        poll_interval_ms: 20,
        warmup_ms: 0,
        shutdown_grace_ms: 2_000,
        ..Config::default()
    }
}

fn credentials() -> Credentials {
    Credentials::from_snapshot(&EnvSnapshot::from_pairs([(API_KEY_VAR, "sk-test")]))
        .expect("credentials")
}

#[rstest]
fn interrupt_after_startup_stops_everything_and_exits_zero(workdir: TempDir) {
    let config = stack_config(workdir.path());
    let cancel = CancellationToken::new();
    let recorder = Arc::new(RecordingReporter::default());
    let reporter = Arc::new(CancelWhenReady {
        recorder: Arc::clone(&recorder),
        service: "tunnel",
        token: cancel.clone(),
    });
    let probes = ScriptedProbes::all_ready().announcing("tunnel", PUBLIC_URL);
    let mut stdout = Vec::new();

    let exit = bring_up(&config, &credentials(), &cancel, &probes, reporter, &mut stdout)
        .expect("clean run");

    assert_eq!(exit, ExitCode::SUCCESS);
    let output = String::from_utf8(stdout).expect("utf8 output");
    assert!(output.contains("All 3 services ready."), "{output}");
    assert!(output.contains(PUBLIC_URL), "{output}");
    assert!(output.contains("Stopped 3 service(s)."), "{output}");
    assert_eq!(
        recorder.events(),
        [
            "launching tool-server",
            "ready tool-server",
            "launching api-shim",
            "ready api-shim",
            "launching tunnel",
            "ready tunnel",
            "stopping tunnel",
            "stopped tunnel",
            "stopping api-shim",
            "stopped api-shim",
            "stopping tool-server",
            "stopped tool-server",
        ]
    );
}

#[rstest]
fn readiness_timeout_fails_startup_without_launching_later_stages(workdir: TempDir) {
    let config = stack_config(workdir.path());
    let recorder = Arc::new(RecordingReporter::default());
    let probes = ScriptedProbes::all_ready().never_ready("api-shim");
    let mut stdout = Vec::new();

    let error = bring_up(
        &config,
        &credentials(),
        &CancellationToken::new(),
        &probes,
        Arc::clone(&recorder) as Arc<dyn PipelineReporter>,
        &mut stdout,
    )
    .expect_err("api-shim never becomes ready");

    match &error {
        AppError::Startup(PipelineError::Readiness(ReadinessError::Timeout {
            service,
            endpoint,
            timeout_ms,
            ..
        })) => {
            assert_eq!(service, "api-shim");
            assert_eq!(endpoint, "GET http://127.0.0.1:8000/health");
            assert_eq!(*timeout_ms, 300);
        }
        other => panic!("expected readiness timeout, got {other:?}"),
    }
    assert!(error.to_string().contains("api-shim"));
    let events = recorder.events();
    assert!(!events.iter().any(|event| event == "launching tunnel"));
    assert!(events.contains(&String::from("failed api-shim")));
    assert!(events.contains(&String::from("stopped api-shim")));
    assert!(events.contains(&String::from("stopped tool-server")));
    assert!(stdout.is_empty());
}

#[rstest]
fn early_exit_fails_the_stage_immediately(workdir: TempDir) {
    let config = Config {
        tool_server_command: String::from("exit 7"),
        startup_timeout_ms: 10_000,
        ..stack_config(workdir.path())
    };
    let probes = ScriptedProbes::all_ready().never_ready("tool-server");
    let started = Instant::now();

    let error = bring_up(
        &config,
        &credentials(),
        &CancellationToken::new(),
        &probes,
        Arc::new(RecordingReporter::default()),
        &mut Vec::new(),
    )
    .expect_err("tool server exits");

    assert!(started.elapsed() < Duration::from_secs(5));
    assert!(matches!(
        error,
        AppError::Startup(PipelineError::Readiness(ReadinessError::Exited {
            exit_status: Some(7),
            ..
        }))
    ));
}

#[rstest]
fn interrupt_during_startup_exits_nonzero(workdir: TempDir) {
    let config = Config {
        startup_timeout_ms: 30_000,
        ..stack_config(workdir.path())
    };
    let cancel = CancellationToken::new();
    let remote = cancel.clone();
    let canceller = thread::spawn(move || {
        thread::sleep(Duration::from_millis(100));
        remote.cancel();
    });
    let recorder = Arc::new(RecordingReporter::default());
    let started = Instant::now();

    let error = bring_up(
        &config,
        &credentials(),
        &cancel,
        &ScriptedProbes::all_ready().never_ready("tool-server"),
        Arc::clone(&recorder) as Arc<dyn PipelineReporter>,
        &mut Vec::new(),
    )
    .expect_err("interrupted");
    canceller.join().expect("canceller thread");

    assert!(matches!(error, AppError::Interrupted(_)));
    assert!(started.elapsed() < Duration::from_secs(10));
    assert!(recorder.events().contains(&String::from("stopped tool-server")));
}

#[rstest]
fn missing_credential_launches_nothing(workdir: TempDir) {
    let config = Config {
        tool_server_command: String::from("touch started.marker; sleep 30"),
        ..stack_config(workdir.path())
    };

    let error = run_up(&config, &EnvSnapshot::default(), &mut Vec::new())
        .expect_err("credential missing");

    assert!(matches!(
        error,
        AppError::Config(ConfigError::MissingCredential {
            variable: API_KEY_VAR
        })
    ));
    thread::sleep(Duration::from_millis(100));
    assert!(!workdir.path().join("started.marker").exists());
}
