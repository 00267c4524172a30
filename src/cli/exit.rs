//! Process exit codes

use std::fmt;

pub const SUCCESS: u8 = 0;
pub const RUNTIME_FAILURE: u8 = 1;
pub const INVALID_USAGE: u8 = 2;
pub const INVALID_CONFIG: u8 = 3;
pub const MISSING_DEPENDENCY: u8 = 4;
pub const PARTIAL_SUCCESS: u8 = 5;
pub const INTERRUPTED: u8 = 130;

/// An error that carries the exit code `main` should return
#[derive(Debug)]
pub struct ExitError {
    pub code: u8,
    source: Option<anyhow::Error>,
}

impl ExitError {
    pub fn new(code: u8, source: anyhow::Error) -> Self {
        Self {
            code,
            source: Some(source),
        }
    }

    /// Exit with `code` after the command already reported why
    pub fn silent(code: u8) -> Self {
        Self { code, source: None }
    }

    pub fn is_silent(&self) -> bool {
        self.source.is_none()
    }
}

impl fmt::Display for ExitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.source {
            Some(source) => write!(f, "{:#}", source),
            None => write!(f, "exit code {}", self.code),
        }
    }
}

impl std::error::Error for ExitError {}

/// Attach an exit code to a fallible result
pub trait WithExitCode<T> {
    fn exit_code(self, code: u8) -> Result<T, ExitError>;
}

impl<T> WithExitCode<T> for anyhow::Result<T> {
    fn exit_code(self, code: u8) -> Result<T, ExitError> {
        self.map_err(|e| ExitError::new(code, e))
    }
}

/// Exit code for an error returned from a command handler
pub fn code_for(err: &anyhow::Error) -> u8 {
    err.downcast_ref::<ExitError>()
        .map(|e| e.code)
        .unwrap_or(RUNTIME_FAILURE)
}
