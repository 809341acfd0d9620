//! Error surface of the orchestration pipeline.

use std::io;
use std::time::Duration;

use nix::errno::Errno;
use thiserror::Error;

/// Errors raised while spawning a service.
#[derive(Debug, Error)]
pub enum LaunchError {
    /// The OS refused to spawn the command.
    #[error("failed to launch service '{service}' ({command}): {source}")]
    Spawn {
        /// Service label.
        service: String,
        /// Command line that failed.
        command: String,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// The working directory does not exist.
    #[error("working directory '{path}' for service '{service}' does not exist")]
    MissingWorkdir {
        /// Service label.
        service: String,
        /// Directory that was configured.
        path: String,
    },
}

/// Errors raised while waiting for a service to report ready.
#[derive(Debug, Error)]
pub enum ReadinessError {
    /// The readiness budget ran out.
    #[error(
        "service '{service}' did not become ready at {endpoint} within {timeout_ms} ms \
         (waited {elapsed_ms} ms; last result: {last_result})"
    )]
    Timeout {
        /// Service label.
        service: String,
        /// Probed endpoint or predicate.
        endpoint: String,
        /// Configured budget.
        timeout_ms: u64,
        /// Time actually spent waiting.
        elapsed_ms: u64,
        /// Outcome of the final probe.
        last_result: String,
    },
    /// The process exited before reporting ready.
    #[error("service '{service}' exited before becoming ready (status: {exit_status:?})")]
    Exited {
        /// Service label.
        service: String,
        /// Exit code, if the process was not killed by a signal.
        exit_status: Option<i32>,
    },
    /// A shutdown request arrived while waiting.
    #[error("startup of service '{service}' was interrupted by a shutdown request")]
    Cancelled {
        /// Service label.
        service: String,
    },
    /// Polling the child process failed.
    #[error("failed to monitor service '{service}': {source}")]
    Monitor {
        /// Service label.
        service: String,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
}

impl ReadinessError {
    /// Returns true when the error stems from a shutdown request.
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }

    /// Restates a timeout against the whole budget once `warmup` has been
    /// spent before polling began.
    pub(crate) fn after_warmup(self, warmup: Duration, budget: Duration) -> Self {
        match self {
            Self::Timeout {
                service,
                endpoint,
                elapsed_ms,
                last_result,
                ..
            } => Self::Timeout {
                service,
                endpoint,
                timeout_ms: budget.as_millis() as u64,
                elapsed_ms: elapsed_ms + warmup.as_millis() as u64,
                last_result,
            },
            other => other,
        }
    }
}

/// Errors that end a pipeline run before every service is ready.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// A service could not be spawned.
    #[error(transparent)]
    Launch(#[from] LaunchError),
    /// A service never became ready.
    #[error(transparent)]
    Readiness(#[from] ReadinessError),
}

impl PipelineError {
    /// Returns true when the run was interrupted rather than failed.
    pub const fn is_cancelled(&self) -> bool {
        match self {
            Self::Readiness(error) => error.is_cancelled(),
            Self::Launch(_) => false,
        }
    }
}

/// Errors raised while terminating a service. Never fatal.
#[derive(Debug, Error)]
pub enum TerminationError {
    /// Delivering a signal failed for a reason other than the process being
    /// gone already.
    #[error("failed to signal service '{service}' (pid {pid}): {source}")]
    Signal {
        /// Service label.
        service: String,
        /// Process group leader.
        pid: u32,
        /// Underlying OS error.
        #[source]
        source: Errno,
    },
    /// Reaping the child failed.
    #[error("failed to reap service '{service}' (pid {pid}): {source}")]
    Wait {
        /// Service label.
        service: String,
        /// Process identifier.
        pid: u32,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
}

/// Errors reported by the signal watcher.
#[derive(Debug, Error)]
pub enum ShutdownError {
    /// Installing signal handlers failed.
    #[error("failed to install signal handlers: {source}")]
    Install {
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// The watcher thread could not be started.
    #[error("failed to start signal watcher thread: {source}")]
    Thread {
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
}
