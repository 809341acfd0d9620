//! Output format of the orchestrator's stderr log stream.
//!
//! The same format applies to the orchestrator's own lifecycle events and to
//! the lines relayed from each managed service.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// How log records are rendered on stderr.
///
/// Accepted spellings are case-insensitive, so `STACKUP_LOG_FORMAT=JSON` and
/// `--log-format compact` both parse.
#[derive(
    Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq, EnumString, Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum LogFormat {
    /// One JSON object per record, with `service` and `stream` fields on
    /// relayed output. Intended for log shippers.
    #[default]
    Json,
    /// Terse text lines for an operator watching `stackup up` in a terminal.
    Compact,
}

/// Error returned when a log format name is not recognised.
pub type LogFormatParseError = strum::ParseError;
