//! Configuration loading helpers for the CLI.
//!
//! Leading configuration flags are split off for `ortho_config`; the
//! remaining tokens (the subcommand and its options) go to the CLI parser.

use std::ffi::{OsStr, OsString};

use ortho_config::OrthoConfig;
use stackup_config::Config;

use crate::errors::AppError;

pub(crate) trait ConfigLoader {
    /// Loads configuration from the leading configuration flags.
    ///
    /// Flags listed in `CONFIG_CLI_FLAGS` must appear before the subcommand;
    /// anything after it is handed to the subcommand parser instead.
    fn load(&self, args: &[OsString]) -> Result<Config, AppError>;
}

pub(crate) struct OrthoConfigLoader;

#[derive(Debug, Clone, Copy)]
enum FlagAction {
    Include { needs_value: bool },
    Skip,
}

impl ConfigLoader for OrthoConfigLoader {
    fn load(&self, args: &[OsString]) -> Result<Config, AppError> {
        Config::load_from_iter(args.iter().cloned()).map_err(AppError::LoadConfiguration)
    }
}

fn classify_flag(argument: &OsStr) -> FlagAction {
    let argument_text = argument.to_string_lossy();
    if !argument_text.starts_with("--") {
        return FlagAction::Skip;
    }

    let (flag, has_inline_value) = match argument_text.split_once('=') {
        Some((flag, _)) => (flag, true),
        None => (&*argument_text, false),
    };
    if super::CONFIG_CLI_FLAGS.contains(&flag) {
        return FlagAction::Include {
            needs_value: !has_inline_value,
        };
    }
    FlagAction::Skip
}

pub(crate) struct ConfigArgumentSplit {
    pub(crate) config_arguments: Vec<OsString>,
    pub(crate) command_start: usize,
}

pub(crate) fn split_config_arguments(args: &[OsString]) -> ConfigArgumentSplit {
    let Some(program) = args.first() else {
        return ConfigArgumentSplit {
            config_arguments: Vec::new(),
            command_start: 0,
        };
    };

    let mut config_arguments = vec![program.clone()];
    let mut index = 1usize;
    while index < args.len() {
        match classify_flag(&args[index]) {
            FlagAction::Include { needs_value } => {
                config_arguments.push(args[index].clone());
                index += 1;
                if needs_value && let Some(value) = args.get(index) {
                    config_arguments.push(value.clone());
                    index += 1;
                }
            }
            FlagAction::Skip => break,
        }
    }

    ConfigArgumentSplit {
        config_arguments,
        command_start: index,
    }
}

/// Rebuilds the argument list for the subcommand parser.
pub(crate) fn command_arguments(args: &[OsString], split: &ConfigArgumentSplit) -> Vec<OsString> {
    args.first()
        .into_iter()
        .chain(args.iter().skip(split.command_start))
        .cloned()
        .collect()
}
