//! Ordered startup, readiness polling, and guaranteed teardown of services.
//!
//! This module is split into focused submodules:
//! - [`spec`] declares what to launch and how readiness is detected.
//! - [`process`] owns one spawned service and its status transitions.
//! - [`readiness`] implements the probes and the bounded polling loop.
//! - [`cancel`] provides the token that aborts waits on shutdown requests.
//! - [`signals`] turns termination signals into token cancellation.
//! - [`session`] sequences the pipeline and sweeps processes on exit.
//! - [`reporter`] surfaces lifecycle events to telemetry sinks.

use std::time::Duration;

mod cancel;
mod error;
mod process;
mod readiness;
mod reporter;
mod session;
mod signals;
mod spec;

pub use cancel::CancellationToken;
pub use error::{LaunchError, PipelineError, ReadinessError, ShutdownError, TerminationError};
pub use process::{ManagedProcess, ProcessStatus, TerminationOutcome};
pub use readiness::{
    AnnouncedUrlProbe, HttpProbe, ProbeFactory, ProbeOutcome, ReadinessProbe, ReadyReport,
    SystemProbeFactory, await_ready,
};
pub use reporter::{PipelineReporter, StructuredPipelineReporter};
pub use session::{OrchestrationSession, PipelineReport, ServiceHandle, ShutdownReport};
pub use signals::SignalWatcher;
pub use spec::{PipelineTimings, Readiness, ServiceSpec};

pub(crate) const PIPELINE_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::pipeline");
pub(crate) const SERVICE_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::service");

/// Interval used while waiting for a signalled process to exit.
pub(crate) const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(25);
