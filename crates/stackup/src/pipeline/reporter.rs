//! Structured reporting for pipeline lifecycle events.

use std::sync::Arc;
use std::time::Duration;

use super::error::{PipelineError, TerminationError};
use super::process::TerminationOutcome;

const HEALTH_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::health");

/// Observer trait used to surface lifecycle events to telemetry sinks.
pub trait PipelineReporter: Send + Sync {
    /// Invoked before a service is spawned.
    fn service_launching(&self, service: &str, command: &str);

    /// Invoked once a service passes its readiness check.
    fn service_ready(&self, service: &str, pid: u32, elapsed: Duration);

    /// Invoked when a stage fails; the pipeline will shut down next.
    fn service_failed(&self, service: &str, error: &PipelineError);

    /// Invoked before a service is terminated.
    fn service_stopping(&self, service: &str, pid: u32);

    /// Invoked after a service has been terminated.
    fn service_stopped(&self, service: &str, outcome: TerminationOutcome);

    /// Invoked when terminating a service failed. Never fatal.
    fn termination_failed(&self, error: &TerminationError);
}

impl<T> PipelineReporter for Arc<T>
where
    T: PipelineReporter + ?Sized,
{
    fn service_launching(&self, service: &str, command: &str) {
        (**self).service_launching(service, command);
    }

    fn service_ready(&self, service: &str, pid: u32, elapsed: Duration) {
        (**self).service_ready(service, pid, elapsed);
    }

    fn service_failed(&self, service: &str, error: &PipelineError) {
        (**self).service_failed(service, error);
    }

    fn service_stopping(&self, service: &str, pid: u32) {
        (**self).service_stopping(service, pid);
    }

    fn service_stopped(&self, service: &str, outcome: TerminationOutcome) {
        (**self).service_stopped(service, outcome);
    }

    fn termination_failed(&self, error: &TerminationError) {
        (**self).termination_failed(error);
    }
}

/// Default reporter that records lifecycle events using `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct StructuredPipelineReporter;

impl StructuredPipelineReporter {
    /// Builds a new reporter.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl PipelineReporter for StructuredPipelineReporter {
    fn service_launching(&self, service: &str, command: &str) {
        tracing::info!(
            target: HEALTH_TARGET,
            event = "service_launching",
            service,
            command,
            "launching service"
        );
    }

    fn service_ready(&self, service: &str, pid: u32, elapsed: Duration) {
        tracing::info!(
            target: HEALTH_TARGET,
            event = "service_ready",
            service,
            pid,
            elapsed_ms = elapsed.as_millis() as u64,
            "service ready"
        );
    }

    fn service_failed(&self, service: &str, error: &PipelineError) {
        tracing::error!(
            target: HEALTH_TARGET,
            event = "service_failed",
            service,
            error = %error,
            "service failed to start"
        );
    }

    fn service_stopping(&self, service: &str, pid: u32) {
        tracing::info!(
            target: HEALTH_TARGET,
            event = "service_stopping",
            service,
            pid,
            "stopping service"
        );
    }

    fn service_stopped(&self, service: &str, outcome: TerminationOutcome) {
        tracing::info!(
            target: HEALTH_TARGET,
            event = "service_stopped",
            service,
            outcome = ?outcome,
            "service stopped"
        );
    }

    fn termination_failed(&self, error: &TerminationError) {
        tracing::warn!(
            target: HEALTH_TARGET,
            event = "termination_failed",
            error = %error,
            "failed to terminate service; continuing shutdown"
        );
    }
}
