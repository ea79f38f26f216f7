use std::process::ExitStatus;
use std::time::Duration;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("command not found: {cmd}")]
    NotFound { cmd: String },

    #[error("failed to start {cmd}: {source}")]
    Spawn { cmd: String, source: std::io::Error },

    #[error("{cmd} exited with {status}: {stderr}")]
    Failed {
        cmd: String,
        status: ExitStatus,
        stderr: String,
    },

    #[error("{cmd} was cancelled")]
    Cancelled { cmd: String },

    #[error("{cmd} timed out after {timeout:?}")]
    TimedOut { cmd: String, timeout: Duration },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Captured stderr of a failed run, empty for every other variant.
    pub fn stderr(&self) -> &str {
        match self {
            Self::Failed { stderr, .. } => stderr,
            _ => "",
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. } | Self::TimedOut { .. })
    }
}
