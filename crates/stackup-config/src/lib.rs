//! Shared configuration for the `stackup` orchestrator.
//!
//! Settings are layered by `ortho_config`: built-in defaults, then an optional
//! TOML file passed with `--config-path`, then `STACKUP_*` environment
//! variables, then command-line flags. Credentials are kept apart from the
//! layered settings and are validated from an [`EnvSnapshot`] once, before
//! anything is launched.

use std::path::Path;
use std::time::Duration;

use ortho_config::OrthoConfig;
use serde::{Deserialize, Serialize};

mod credentials;
mod defaults;
mod logging;

pub use credentials::{
    API_KEY_VAR, ConfigError, Credentials, EnvSnapshot, PUBLIC_URL_VAR, SECONDARY_KEY_VAR,
};
pub use defaults::{
    DEFAULT_API_SHIM_PORT, DEFAULT_LOG_FILTER, DEFAULT_POLL_INTERVAL_MS,
    DEFAULT_PROBE_TIMEOUT_MS, DEFAULT_SHUTDOWN_GRACE_MS, DEFAULT_STARTUP_TIMEOUT_MS,
    DEFAULT_TOOL_SERVER_PORT, DEFAULT_TUNNEL_URL_SUFFIX, DEFAULT_WARMUP_MS,
    default_api_shim_command, default_log_filter_string, default_log_format,
    default_tool_server_command, default_tunnel_command, default_tunnel_url_suffix,
    default_workdir,
};
pub use logging::{LogFormat, LogFormatParseError};

/// Name of the optional credentials file looked up in the working directory.
pub const DOTENV_FILE: &str = ".env";

/// Layered runtime configuration for the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, OrthoConfig)]
#[ortho_config(prefix = "STACKUP")]
pub struct Config {
    /// `tracing` filter expression.
    #[ortho_config(default = defaults::default_log_filter_string())]
    pub log_filter: String,
    /// Log output format.
    #[ortho_config(default = defaults::default_log_format())]
    pub log_format: LogFormat,
    /// Directory the services are launched from.
    #[ortho_config(default = defaults::default_workdir())]
    pub workdir: String,
    /// Shell command starting the tool server.
    #[ortho_config(default = defaults::default_tool_server_command())]
    pub tool_server_command: String,
    /// Port the tool server listens on.
    #[ortho_config(default = defaults::DEFAULT_TOOL_SERVER_PORT)]
    pub tool_server_port: u16,
    /// Shell command starting the compatibility API.
    #[ortho_config(default = defaults::default_api_shim_command())]
    pub api_shim_command: String,
    /// Port the compatibility API listens on.
    #[ortho_config(default = defaults::DEFAULT_API_SHIM_PORT)]
    pub api_shim_port: u16,
    /// Shell command opening the public tunnel.
    #[ortho_config(default = defaults::default_tunnel_command())]
    pub tunnel_command: String,
    /// Hostname suffix identifying the tunnel's public URL in its output.
    #[ortho_config(default = defaults::default_tunnel_url_suffix())]
    pub tunnel_url_suffix: String,
    /// Readiness budget per service, in milliseconds.
    #[ortho_config(default = defaults::DEFAULT_STARTUP_TIMEOUT_MS)]
    pub startup_timeout_ms: u64,
    /// Delay between readiness probes, in milliseconds.
    #[ortho_config(default = defaults::DEFAULT_POLL_INTERVAL_MS)]
    pub poll_interval_ms: u64,
    /// Delay after each launch before the first probe, in milliseconds.
    #[ortho_config(default = defaults::DEFAULT_WARMUP_MS)]
    pub warmup_ms: u64,
    /// Time allowed between SIGTERM and SIGKILL, in milliseconds.
    #[ortho_config(default = defaults::DEFAULT_SHUTDOWN_GRACE_MS)]
    pub shutdown_grace_ms: u64,
    /// Upper bound for one HTTP health request, in milliseconds.
    #[ortho_config(default = defaults::DEFAULT_PROBE_TIMEOUT_MS)]
    pub probe_timeout_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_filter: default_log_filter_string(),
            log_format: default_log_format(),
            workdir: default_workdir(),
            tool_server_command: default_tool_server_command(),
            tool_server_port: DEFAULT_TOOL_SERVER_PORT,
            api_shim_command: default_api_shim_command(),
            api_shim_port: DEFAULT_API_SHIM_PORT,
            tunnel_command: default_tunnel_command(),
            tunnel_url_suffix: default_tunnel_url_suffix(),
            startup_timeout_ms: DEFAULT_STARTUP_TIMEOUT_MS,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            warmup_ms: DEFAULT_WARMUP_MS,
            shutdown_grace_ms: DEFAULT_SHUTDOWN_GRACE_MS,
            probe_timeout_ms: DEFAULT_PROBE_TIMEOUT_MS,
        }
    }
}

impl Config {
    /// Returns the configured log filter.
    #[must_use]
    pub fn log_filter(&self) -> &str {
        &self.log_filter
    }

    /// Returns the configured log format.
    #[must_use]
    pub const fn log_format(&self) -> LogFormat {
        self.log_format
    }

    /// Directory the services are launched from.
    #[must_use]
    pub fn workdir(&self) -> &Path {
        Path::new(&self.workdir)
    }

    /// Location of the optional `.env` file.
    #[must_use]
    pub fn dotenv_path(&self) -> std::path::PathBuf {
        self.workdir().join(DOTENV_FILE)
    }

    /// Readiness budget per service.
    #[must_use]
    pub const fn startup_timeout(&self) -> Duration {
        Duration::from_millis(self.startup_timeout_ms)
    }

    /// Fixed delay between readiness probes.
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Delay after a launch before probing begins.
    #[must_use]
    pub const fn warmup(&self) -> Duration {
        Duration::from_millis(self.warmup_ms)
    }

    /// Time a service has to exit after SIGTERM.
    #[must_use]
    pub const fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }

    /// Upper bound for one HTTP health request.
    #[must_use]
    pub const fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    /// Local base URL of the tool server.
    #[must_use]
    pub fn tool_server_url(&self) -> String {
        format!("http://127.0.0.1:{}", self.tool_server_port)
    }

    /// Local base URL of the compatibility API.
    #[must_use]
    pub fn api_shim_url(&self) -> String {
        format!("http://127.0.0.1:{}", self.api_shim_port)
    }
}
