//! The deployment pipeline: tool server, compatibility API, public tunnel.

use stackup_config::{Config, Credentials, PUBLIC_URL_VAR};
use url::Url;

use crate::pipeline::{Readiness, ServiceSpec};

/// Label of the tool server stage.
pub const TOOL_SERVER: &str = "tool-server";
/// Label of the compatibility API stage.
pub const API_SHIM: &str = "api-shim";
/// Label of the tunnel stage.
pub const TUNNEL: &str = "tunnel";

/// Variable telling the compatibility API where the tool server listens.
pub const TOOL_SERVER_URL_VAR: &str = "MCP_SERVER_URL";

/// Errors raised while assembling the pipeline from configuration.
#[derive(Debug, thiserror::Error)]
pub enum StackError {
    /// A derived service URL did not parse.
    #[error("invalid URL '{url}' for service '{service}': {source}")]
    InvalidUrl {
        /// Service label.
        service: &'static str,
        /// Offending URL text.
        url: String,
        /// Parser error.
        #[source]
        source: url::ParseError,
    },
}

/// Builds the ordered service list for one deployment.
///
/// Every stage receives the validated credentials; the compatibility API also
/// learns the tool server's address. The tunnel is ready once it announces a
/// public URL, which is exported as `PUBLIC_URL`.
///
/// # Errors
///
/// Returns [`StackError::InvalidUrl`] if a health endpoint cannot be built.
pub fn deployment_stack(
    config: &Config,
    credentials: &Credentials,
) -> Result<Vec<ServiceSpec>, StackError> {
    let tool_server = ServiceSpec::new(
        TOOL_SERVER,
        config.tool_server_command.as_str(),
        Readiness::Http {
            url: health_url(TOOL_SERVER, &config.tool_server_url())?,
        },
    );
    let api_shim = ServiceSpec::new(
        API_SHIM,
        config.api_shim_command.as_str(),
        Readiness::Http {
            url: health_url(API_SHIM, &config.api_shim_url())?,
        },
    )
    .with_env(TOOL_SERVER_URL_VAR, config.tool_server_url());
    let tunnel = ServiceSpec::new(
        TUNNEL,
        config.tunnel_command.as_str(),
        Readiness::AnnouncedUrl {
            suffix: config.tunnel_url_suffix.clone(),
            export_as: Some(PUBLIC_URL_VAR.to_owned()),
        },
    );

    Ok([tool_server, api_shim, tunnel]
        .into_iter()
        .map(|spec| {
            credentials
                .env_pairs()
                .into_iter()
                .fold(spec.with_workdir(config.workdir()), |spec, (key, value)| {
                    spec.with_env(key, value)
                })
        })
        .collect())
}

fn health_url(service: &'static str, base: &str) -> Result<Url, StackError> {
    let text = format!("{base}/health");
    Url::parse(&text).map_err(|source| StackError::InvalidUrl {
        service,
        url: text,
        source,
    })
}
