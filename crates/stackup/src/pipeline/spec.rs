//! Declarative description of the services in a pipeline.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use stackup_config::Config;
use url::Url;

/// How the orchestrator decides that a service is ready.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Readiness {
    /// A GET request to the URL returns a 2xx status.
    Http {
        /// Health-check endpoint.
        url: Url,
    },
    /// The service prints an `https://` URL ending in `suffix` on stdout or
    /// stderr. The URL is exported under `export_as` to later stages.
    AnnouncedUrl {
        /// Hostname suffix the announced URL must carry.
        suffix: String,
        /// Variable the URL is exported under, when any.
        export_as: Option<String>,
    },
}

impl fmt::Display for Readiness {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Http { url } => write!(formatter, "GET {url}"),
            Self::AnnouncedUrl { suffix, .. } => {
                write!(formatter, "announced https URL ending in '{suffix}'")
            }
        }
    }
}

/// One service the pipeline launches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceSpec {
    name: String,
    command: String,
    workdir: PathBuf,
    env: Vec<(String, String)>,
    readiness: Readiness,
}

impl ServiceSpec {
    /// Builds a spec running `command` through `sh -c`.
    pub fn new(name: impl Into<String>, command: impl Into<String>, readiness: Readiness) -> Self {
        Self {
            name: name.into(),
            command: command.into(),
            workdir: PathBuf::from("."),
            env: Vec::new(),
            readiness,
        }
    }

    /// Sets the working directory for the service.
    #[must_use]
    pub fn with_workdir(mut self, workdir: impl Into<PathBuf>) -> Self {
        self.workdir = workdir.into();
        self
    }

    /// Adds an environment variable to the service.
    #[must_use]
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Human-readable label used in logs and errors.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Shell command line.
    pub fn command(&self) -> &str {
        &self.command
    }

    /// Directory the command runs in.
    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    /// Extra environment for the command.
    pub fn env(&self) -> &[(String, String)] {
        &self.env
    }

    /// Readiness criterion.
    pub fn readiness(&self) -> &Readiness {
        &self.readiness
    }
}

/// Timing knobs shared by every stage of a pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineTimings {
    /// Wall-clock readiness budget per service.
    pub startup_timeout: Duration,
    /// Fixed delay between probes.
    pub poll_interval: Duration,
    /// Delay between launch and the first probe.
    pub warmup: Duration,
    /// Time between SIGTERM and SIGKILL during shutdown.
    pub shutdown_grace: Duration,
}

impl PipelineTimings {
    /// Extracts the timings from the layered configuration.
    pub fn from_config(config: &Config) -> Self {
        Self {
            startup_timeout: config.startup_timeout(),
            poll_interval: config.poll_interval(),
            warmup: config.warmup(),
            shutdown_grace: config.shutdown_grace(),
        }
    }
}
