//! The ordered set of services for one orchestrator run.

use std::collections::BTreeMap;
use std::io;
use std::sync::Arc;

use tracing::{debug, info};

use super::PIPELINE_TARGET;
use super::cancel::CancellationToken;
use super::error::{LaunchError, PipelineError, ReadinessError, TerminationError};
use super::process::{ManagedProcess, ProcessStatus, TerminationOutcome};
use super::readiness::{self, ProbeFactory, ReadyReport};
use super::reporter::PipelineReporter;
use super::spec::{PipelineTimings, Readiness, ServiceSpec};

/// Opaque reference to a process launched by a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServiceHandle(usize);

/// Summary of a pipeline whose services all reached `Ready`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineReport {
    /// Readiness results in launch order.
    pub services: Vec<ReadyReport>,
    /// Values announced by services and exported to later stages.
    pub exports: BTreeMap<String, String>,
}

impl PipelineReport {
    /// Looks up an exported value.
    pub fn export(&self, name: &str) -> Option<&str> {
        self.exports.get(name).map(String::as_str)
    }
}

/// Result of a shutdown sweep.
#[derive(Debug, Default)]
pub struct ShutdownReport {
    /// Services stopped by this sweep, in the order they were stopped.
    pub stopped: Vec<(String, TerminationOutcome)>,
    /// Termination failures. Logged, never fatal.
    pub errors: Vec<TerminationError>,
}

impl ShutdownReport {
    /// Returns true when every termination attempt succeeded.
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Owns every process launched during one run and guarantees their teardown.
///
/// Dropping the session runs [`shutdown`](Self::shutdown), so processes are
/// swept on every exit path including early returns and panics.
pub struct OrchestrationSession {
    processes: Vec<ManagedProcess>,
    exports: BTreeMap<String, String>,
    timings: PipelineTimings,
    cancel: CancellationToken,
    reporter: Arc<dyn PipelineReporter>,
}

impl OrchestrationSession {
    /// Builds an empty session.
    pub fn new(
        timings: PipelineTimings,
        cancel: CancellationToken,
        reporter: Arc<dyn PipelineReporter>,
    ) -> Self {
        Self {
            processes: Vec::new(),
            exports: BTreeMap::new(),
            timings,
            cancel,
            reporter,
        }
    }

    /// Processes launched so far, in launch order.
    pub fn processes(&self) -> &[ManagedProcess] {
        &self.processes
    }

    /// Values exported by ready services.
    pub fn exports(&self) -> &BTreeMap<String, String> {
        &self.exports
    }

    /// Token that interrupts waits in this session.
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Spawns `spec` with the values exported so far and records it.
    ///
    /// # Errors
    ///
    /// Returns [`LaunchError`] when the process cannot be spawned; nothing is
    /// recorded in that case.
    pub fn launch(&mut self, spec: &ServiceSpec) -> Result<ServiceHandle, LaunchError> {
        self.reporter.service_launching(spec.name(), spec.command());
        let process = ManagedProcess::spawn(spec, &self.exports)?;
        self.processes.push(process);
        Ok(ServiceHandle(self.processes.len() - 1))
    }

    /// Waits for a launched service to become ready.
    ///
    /// Sleeps for the warm-up delay first, then polls with the probe built by
    /// `probes`. The warm-up counts against the startup budget, so the call
    /// never blocks longer than `startup_timeout`. A URL announced by the
    /// service is exported under the name its readiness criterion requests.
    ///
    /// # Errors
    ///
    /// Returns [`ReadinessError`] when the service times out, exits, or the
    /// session is cancelled.
    pub fn await_ready(
        &mut self,
        handle: ServiceHandle,
        probes: &dyn ProbeFactory,
    ) -> Result<ReadyReport, ReadinessError> {
        let timings = self.timings;
        let process = self
            .processes
            .get_mut(handle.0)
            .ok_or_else(|| ReadinessError::Monitor {
                service: format!("#{}", handle.0),
                source: io::Error::new(io::ErrorKind::NotFound, "unknown service handle"),
            })?;

        let warmup = timings.warmup.min(timings.startup_timeout);
        if !warmup.is_zero() && self.cancel.wait_timeout(warmup) {
            process.mark_failed();
            return Err(ReadinessError::Cancelled {
                service: process.name().to_owned(),
            });
        }

        let mut probe = probes.probe_for(process);
        let mut report = readiness::await_ready(
            process,
            probe.as_mut(),
            timings.startup_timeout.saturating_sub(warmup),
            timings.poll_interval,
            &self.cancel,
        )
        .map_err(|error| error.after_warmup(warmup, timings.startup_timeout))?;
        report.elapsed += warmup;

        if let (Readiness::AnnouncedUrl {
            export_as: Some(variable),
            ..
        }, Some(value)) = (process.readiness(), report.announced.as_ref())
        {
            debug!(
                target: PIPELINE_TARGET,
                service = %report.service,
                variable = %variable,
                "exporting announced value"
            );
            self.exports.insert(variable.clone(), value.clone());
        }
        self.reporter
            .service_ready(&report.service, report.pid, report.elapsed);
        Ok(report)
    }

    /// Launches `specs` in order, waiting for each to become ready before
    /// starting the next.
    ///
    /// The first failure stops further launches, sweeps every process started
    /// so far, and is returned.
    ///
    /// # Errors
    ///
    /// Returns the [`PipelineError`] of the failing stage.
    pub fn run_pipeline(
        &mut self,
        specs: &[ServiceSpec],
        probes: &dyn ProbeFactory,
    ) -> Result<PipelineReport, PipelineError> {
        let mut services = Vec::with_capacity(specs.len());
        for spec in specs {
            match self.run_stage(spec, probes) {
                Ok(report) => services.push(report),
                Err(error) => {
                    self.reporter.service_failed(spec.name(), &error);
                    self.shutdown();
                    return Err(error);
                }
            }
        }
        info!(
            target: PIPELINE_TARGET,
            services = services.len(),
            "all services ready"
        );
        Ok(PipelineReport {
            services,
            exports: self.exports.clone(),
        })
    }

    fn run_stage(
        &mut self,
        spec: &ServiceSpec,
        probes: &dyn ProbeFactory,
    ) -> Result<ReadyReport, PipelineError> {
        if self.cancel.is_cancelled() {
            return Err(ReadinessError::Cancelled {
                service: spec.name().to_owned(),
            }
            .into());
        }
        let handle = self.launch(spec)?;
        Ok(self.await_ready(handle, probes)?)
    }

    /// Terminates every tracked process that is not already stopped, most
    /// recently launched first.
    ///
    /// Failures are reported and the sweep continues. Calling this again
    /// after a clean sweep has no further effect.
    pub fn shutdown(&mut self) -> ShutdownReport {
        let mut report = ShutdownReport::default();
        let grace = self.timings.shutdown_grace;
        for process in self.processes.iter_mut().rev() {
            if process.status() == ProcessStatus::Stopped {
                continue;
            }
            self.reporter.service_stopping(process.name(), process.pid());
            match process.terminate(grace) {
                Ok(outcome) => {
                    self.reporter.service_stopped(process.name(), outcome);
                    report.stopped.push((process.name().to_owned(), outcome));
                }
                Err(error) => {
                    self.reporter.termination_failed(&error);
                    report.errors.push(error);
                }
            }
        }
        report
    }
}

impl Drop for OrchestrationSession {
    fn drop(&mut self) {
        self.shutdown();
    }
}
