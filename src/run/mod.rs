//! Runs, commands, and the interaction engine

pub mod command;
pub mod engine;
pub mod events;
#[allow(clippy::module_inception)]
pub mod run;

pub use command::{Command, CommandStatus, InputClass, OutputLine, Policy};
pub use engine::InteractionEngine;
pub use events::RunEvent;
pub use run::{Run, RunResult, RunSnapshot};
