//! Error types for the CLI runtime.

use std::io;
use std::sync::Arc;

use stackup_config::ConfigError;
use thiserror::Error;

use crate::pipeline::{PipelineError, ShutdownError};
use crate::stack::StackError;
use crate::telemetry::TelemetryError;
use crate::verify::VerifyError;

#[derive(Debug, Error)]
pub(crate) enum AppError {
    #[error("failed to load configuration: {0}")]
    LoadConfiguration(Arc<ortho_config::OrthoError>),
    #[error("{0}")]
    CliUsage(clap::Error),
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Telemetry(#[from] TelemetryError),
    #[error("working directory '{path}' does not exist")]
    MissingWorkdir { path: String },
    #[error("failed to assemble the service pipeline: {0}")]
    Stack(#[from] StackError),
    #[error("failed to build the health-check client: {0}")]
    ProbeClient(reqwest::Error),
    #[error(transparent)]
    Signals(#[from] ShutdownError),
    #[error("startup interrupted: {0}")]
    Interrupted(PipelineError),
    #[error("startup failed: {0}")]
    Startup(PipelineError),
    #[error("deployment check failed: {0}")]
    Verify(#[from] VerifyError),
    #[error("failed to write output: {0}")]
    Output(#[from] io::Error),
}

impl From<PipelineError> for AppError {
    fn from(error: PipelineError) -> Self {
        if error.is_cancelled() {
            Self::Interrupted(error)
        } else {
            Self::Startup(error)
        }
    }
}
