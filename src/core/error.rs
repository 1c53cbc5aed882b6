use std::io;
use thiserror::Error;

/// Exit code for a completed run where every check passed.
pub const EXIT_PASS: i32 = 0;
/// Exit code for a completed run where one or more checks failed.
pub const EXIT_FAIL: i32 = 1;
/// Exit code for setup and configuration errors.
pub const EXIT_SETUP: i32 = 2;

#[derive(Error, Debug)]
pub enum WardenError {
    #[error("I/O error: {0}")]
    IoError(#[from] io::Error),
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
    #[error("TOML error: {0}")]
    TomlError(#[from] toml::de::Error),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Missing dependency: {0}")]
    MissingDependency(String),
    #[error("Failed to spawn process: {0}")]
    Spawn(String),
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Not found: {0}")]
    NotFound(String),
}

impl WardenError {
    /// Every error that escapes to the CLI is a setup error; check failures are
    /// reported as incidents, never as `Err`.
    pub fn exit_code(&self) -> i32 {
        EXIT_SETUP
    }
}
