//! Default values for every configurable setting.
//!
//! The defaults reproduce the reference deployment: a math tool server on
//! port 5000, the compatibility API on port 8000, and a quick tunnel that
//! publishes the API under a `trycloudflare.com` hostname.

use crate::logging::LogFormat;

/// Default log filter expression used by the binary.
pub const DEFAULT_LOG_FILTER: &str = "info";

/// Port the tool server listens on.
pub const DEFAULT_TOOL_SERVER_PORT: u16 = 5000;

/// Port the compatibility API listens on.
pub const DEFAULT_API_SHIM_PORT: u16 = 8000;

/// Hostname suffix of URLs announced by the tunnel.
pub const DEFAULT_TUNNEL_URL_SUFFIX: &str = ".trycloudflare.com";

/// Wall-clock budget granted to each service to report ready.
pub const DEFAULT_STARTUP_TIMEOUT_MS: u64 = 10_000;

/// Fixed delay between readiness probes.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 200;

/// Delay between spawning a service and probing it for the first time.
pub const DEFAULT_WARMUP_MS: u64 = 1_000;

/// Time a service is given to exit after SIGTERM before it is killed.
pub const DEFAULT_SHUTDOWN_GRACE_MS: u64 = 5_000;

/// Upper bound for a single HTTP health request.
pub const DEFAULT_PROBE_TIMEOUT_MS: u64 = 2_000;

/// Owned log filter value used where allocation is required.
#[must_use]
pub fn default_log_filter_string() -> String {
    DEFAULT_LOG_FILTER.to_owned()
}

/// Default logging format for the binary.
#[must_use]
pub const fn default_log_format() -> LogFormat {
    LogFormat::Json
}

/// Working directory the services are launched from.
#[must_use]
pub fn default_workdir() -> String {
    String::from(".")
}

/// Command that starts the tool server.
#[must_use]
pub fn default_tool_server_command() -> String {
    String::from("python mcp_server.py")
}

/// Command that starts the compatibility API.
#[must_use]
pub fn default_api_shim_command() -> String {
    String::from("python simple_web_api.py")
}

/// Command that opens the public tunnel to the compatibility API.
#[must_use]
pub fn default_tunnel_command() -> String {
    format!("cloudflared tunnel --url http://localhost:{DEFAULT_API_SHIM_PORT}")
}

/// Owned tunnel URL suffix.
#[must_use]
pub fn default_tunnel_url_suffix() -> String {
    DEFAULT_TUNNEL_URL_SUFFIX.to_owned()
}
