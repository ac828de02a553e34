//! Error types for the harness
//!
//! Compilation errors carry the offending line so script authors can see
//! what the compiler was looking at when it gave up.

use std::io;
use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the harness
#[derive(Error, Debug)]
pub enum Error {
    // === Environment definition errors ===
    #[error("environment definition needs a prefix, prompt, start, and end")]
    EnvIncomplete,

    #[error("illegal multicharacter prefix '{0}'")]
    EnvMultiCharPrefix(String),

    #[error("invalid prefix '{0}'")]
    EnvInvalidPrefix(char),

    #[error("the $ prefix is reserved for the shell")]
    EnvReservedPrefix,

    #[error("duplicate prefix '{0}'")]
    EnvDuplicatePrefix(char),

    #[error("environment start '{0}' cannot carry its own prefix")]
    EnvStartOwnPrefix(String),

    #[error("environment end '{0}' should not carry a prefix")]
    EnvEndPrefixed(String),

    #[error("environment start '{0}' references an unknown prefix")]
    EnvUnknownStartPrefix(String),

    // === Compilation errors ===
    #[error("found empty command")]
    CompileEmptyCommand,

    #[error("command with invalid prefix: '{0}'")]
    CompileUnknownPrefix(String),

    #[error("premature exit in command list at '{0}'")]
    CompilePrematureExit(String),

    #[error("infinite loop expanding command list")]
    CompileExpansionLoop,

    #[error("invalid repeat count in '{0}'")]
    CompileBadRepeat(String),

    // === Engine errors ===
    #[error("input echo lost for '{command}' after {retries} retries")]
    InputLost { command: String, retries: u32 },

    #[error("simulator session closed unexpectedly")]
    SessionClosed,

    #[error("run was already executed")]
    RunConsumed,

    // === Configuration errors ===
    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid configuration file: {0}")]
    ConfigParse(String),

    // === IO errors ===
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("failed to read file '{path}': {error}")]
    FileRead { path: String, error: String },

    // === Serialization errors ===
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // === Internal errors ===
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a file read error with path context
    pub fn file_read(path: &std::path::Path, e: io::Error) -> Self {
        Self::FileRead {
            path: path.display().to_string(),
            error: e.to_string(),
        }
    }

    /// True for errors raised by script compilation or environment validation
    pub fn is_compile_error(&self) -> bool {
        matches!(
            self,
            Error::EnvIncomplete
                | Error::EnvMultiCharPrefix(_)
                | Error::EnvInvalidPrefix(_)
                | Error::EnvReservedPrefix
                | Error::EnvDuplicatePrefix(_)
                | Error::EnvStartOwnPrefix(_)
                | Error::EnvEndPrefixed(_)
                | Error::EnvUnknownStartPrefix(_)
                | Error::CompileEmptyCommand
                | Error::CompileUnknownPrefix(_)
                | Error::CompilePrematureExit(_)
                | Error::CompileExpansionLoop
                | Error::CompileBadRepeat(_)
        )
    }
}
