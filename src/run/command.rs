//! Commands and their output
//!
//! A `Command` is one line of input to the simulator together with
//! everything the engine needs to drive and judge it: the prompt expected
//! once it completes, its timeout and panic policies, and the output it
//! produced. Commands are owned by their run and mutable only by the
//! engine; once a status leaves `None` the command is settled.

use std::sync::Arc;

use regex::Regex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Tri-state policy for timeout tolerance and panic expectation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Policy {
    /// The behavior must not occur
    #[default]
    No,
    /// The behavior is tolerated either way
    Maybe,
    /// The behavior must occur
    Yes,
}

impl Policy {
    /// Whether the policy tolerates the behavior occurring
    pub fn tolerates(self) -> bool {
        !matches!(self, Policy::No)
    }
}

/// Whether a command runs kernel code or a user program
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InputClass {
    Kernel,
    User,
}

/// Per-command execution status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandStatus {
    /// Not yet reached
    #[default]
    None,
    /// Being driven by the engine: input sent and awaiting the next
    /// prompt. The implicit boot command sends nothing, so it enters this
    /// state when the wait for the first prompt begins
    Sent,
    /// Next prompt matched
    Matched,
    /// Deadline expired before the prompt appeared
    TimedOut,
    /// The simulator panicked during this command
    Panicked,
    /// Panic expectation was not met
    Mismatched,
}

/// One line of simulator output, stamped when its first byte arrived
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputLine {
    /// Wall-clock seconds since the run started
    pub walltime: f64,
    /// Simulated seconds as reported by the session
    pub simtime: f64,
    /// Line text, terminator stripped
    pub line: String,
}

/// One compiled command
#[derive(Debug, Clone, Serialize)]
pub struct Command {
    /// Position in the run's command list
    pub index: usize,
    pub id: Uuid,
    /// Name of the environment active when this command's line was consumed
    pub env: String,
    pub class: InputClass,
    /// Literal input line, environment prefix stripped
    pub input: String,
    /// Prompt of the environment active after this command; None after the
    /// final kernel exit, where the engine waits for EOF instead
    #[serde(skip)]
    pub prompt: Option<Arc<Regex>>,
    /// Timeout tolerance
    pub times_out: Policy,
    /// Panic expectation
    pub panics: Policy,
    /// Wall-clock deadline in seconds; 0 means the monitor default
    pub timeout: f32,
    pub output: Vec<OutputLine>,
    pub status: CommandStatus,
}

impl Command {
    pub fn new(
        index: usize,
        env: String,
        class: InputClass,
        input: String,
        prompt: Option<Arc<Regex>>,
    ) -> Self {
        Self {
            index,
            id: Uuid::new_v4(),
            env,
            class,
            input,
            prompt,
            times_out: Policy::No,
            panics: Policy::No,
            timeout: 0.0,
            output: Vec::new(),
            status: CommandStatus::None,
        }
    }

    /// Name used to match per-command overrides
    ///
    /// The first token of the input line, reduced to its path basename;
    /// `p /bin/prog` takes the program's basename instead of `p`.
    pub fn base_name(&self) -> &str {
        let mut tokens = self.input.split_whitespace();
        let first = tokens.next().unwrap_or("");
        let named = if first == "p" {
            tokens.next().unwrap_or(first)
        } else {
            first
        };
        named.rsplit('/').next().unwrap_or(named)
    }
}
