use std::io;

use thiserror::Error;

/// Result alias for harness operations.
pub type HarnessResult<T> = Result<T, HarnessError>;

/// Errors that stop the harness before a verdict can be reached.
///
/// Failures of the supervised processes themselves (non-zero exits, marker
/// hits, timeouts) are not errors; they are recorded in a
/// [`Verdict`](crate::Verdict).
#[derive(Debug, Error)]
pub enum HarnessError {
    #[error("failed to launch {name:?} (command: {command}): {source}")]
    Launch {
        name: String,
        command: String,
        #[source]
        source: io::Error,
    },
    #[error("process name {0:?} is used more than once")]
    DuplicateName(String),
    #[error("process name must not be empty")]
    EmptyName,
    #[error("no processes to run")]
    NoProcesses,
    #[error("marker pattern must not be empty")]
    EmptyMarker,
    #[error("invalid marker pattern {pattern:?}: {source}")]
    InvalidMarker {
        pattern: String,
        #[source]
        source: regex::Error,
    },
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

impl HarnessError {
    pub(crate) fn launch(name: &str, command: &str, source: io::Error) -> Self {
        HarnessError::Launch {
            name: name.to_owned(),
            command: command.to_owned(),
            source,
        }
    }

    /// Whether this error came from a process that could not be started.
    pub fn is_launch(&self) -> bool {
        matches!(self, HarnessError::Launch { .. })
    }
}
