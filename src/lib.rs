//! sim161 - scripted console test harness for the sys161 simulator
//!
//! Compiles flat, prefix-tagged test scripts into typed command lists,
//! drives them against a live simulator session over a byte stream, and
//! schedules many such runs concurrently under a capacity budget.

pub mod commands;
pub mod common;
pub mod run;
pub mod script;
pub mod server;
pub mod sim;

// Re-export commonly used types for tests
pub use common::{Error, Result};
pub use run::{Run, RunResult};
pub use script::{compile, EnvSet, EnvSpec};
