//! Cross-module test suites for the orchestrator.

pub(crate) mod support;

mod up_command;
mod verify_behaviour;
