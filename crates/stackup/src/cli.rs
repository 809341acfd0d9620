//! CLI argument definitions for the orchestrator.
//!
//! Configuration flags (for example `--tool-server-port`) are consumed by the
//! `ortho_config` loader and must precede the subcommand; this parser only
//! sees the subcommand and its own options.

use clap::{Parser, Subcommand};

/// Starts, health-checks, and tears down the agent deployment.
#[derive(Parser, Debug)]
#[command(name = "stackup", version, disable_help_subcommand = true)]
pub(crate) struct Cli {
    #[command(subcommand)]
    pub(crate) command: CliCommand,
}

/// Subcommands of the `stackup` binary.
#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub(crate) enum CliCommand {
    /// Starts every service in order and keeps them running until
    /// interrupted.
    Up,
    /// Validates credentials and configuration without launching anything.
    Check,
    /// Runs a smoke test against a running deployment.
    Verify {
        /// Base URL of the compatibility API, for example the public tunnel
        /// URL. Defaults to the local API address.
        #[arg(long, value_name = "URL")]
        base_url: Option<String>,
    },
}
