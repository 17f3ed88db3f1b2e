use std::time::Duration;

use super::launcher::StreamKind;

#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error("Command must contain at least one token")]
    EmptyCommand,

    #[error("[{name}] Command not found: {program}")]
    CommandNotFound { name: String, program: String },

    #[error("[{name}] Failed to launch '{command}': {source}")]
    LaunchFailed {
        name: String,
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("[{name}] Failed to read {stream}: {source}")]
    StreamRead {
        name: String,
        stream: StreamKind,
        #[source]
        source: std::io::Error,
    },

    #[error("[{name}] Failed to query exit status: {source}")]
    StatusQuery {
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("[{name}] Process has already been run")]
    AlreadyRun { name: String },

    #[error("Poll interval must be greater than zero and at most one day, got {0:?}")]
    InvalidPollInterval(Duration),

    #[error("Mock expectation not met: {0}")]
    MockExpectationNotMet(String),
}

impl ProcessError {
    /// Name of the supervised process the error belongs to, if any.
    pub fn process_name(&self) -> Option<&str> {
        match self {
            ProcessError::CommandNotFound { name, .. }
            | ProcessError::LaunchFailed { name, .. }
            | ProcessError::StreamRead { name, .. }
            | ProcessError::StatusQuery { name, .. }
            | ProcessError::AlreadyRun { name } => Some(name),
            _ => None,
        }
    }

    /// Whether the failure happened before the child was running.
    pub fn is_launch_error(&self) -> bool {
        matches!(
            self,
            ProcessError::CommandNotFound { .. } | ProcessError::LaunchFailed { .. }
        )
    }
}
