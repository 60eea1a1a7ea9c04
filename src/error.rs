//! Error types for the interpreter.

use crate::command::ExitCode;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Exit status used when a line is rejected before anything runs.
pub const SYNTAX_ERROR_STATUS: ExitCode = 2;

/// Exit status for a command that could not be found.
pub const NOT_FOUND_STATUS: ExitCode = 127;

/// Exit status for a command that was found but cannot be executed.
pub const NOT_EXECUTABLE_STATUS: ExitCode = 126;

/// Errors that reject a whole input line. Nothing on the line is executed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SyntaxError {
    /// A quote was opened and never closed.
    #[error("unterminated {0} quote")]
    UnterminatedQuote(char),

    /// A redirection operator was the last word of its command.
    #[error("missing file name after `{0}`")]
    MissingRedirectTarget(String),

    /// A `|` with nothing on one of its sides.
    #[error("unexpected `|`")]
    EmptySegment,

    /// A command made only of redirections.
    #[error("missing command before redirection")]
    MissingCommand,
}

/// Errors that fail a single pipeline stage.
///
/// They never abort the shell; the stage reports the message on its stderr
/// target and finishes with [`ExecError::exit_code`].
#[derive(Error, Debug)]
pub enum ExecError {
    #[error("{0}: command not found")]
    NotFound(String),

    #[error("{0}: Permission denied")]
    PermissionDenied(String),

    /// A redirection target could not be opened.
    #[error("{}: {source}", path.display())]
    Redirect {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("{name}: {source}")]
    Spawn {
        name: String,
        #[source]
        source: io::Error,
    },
}

impl ExecError {
    /// Status recorded into `$?` for a stage that failed this way.
    pub fn exit_code(&self) -> ExitCode {
        match self {
            ExecError::NotFound(_) => NOT_FOUND_STATUS,
            ExecError::PermissionDenied(_) => NOT_EXECUTABLE_STATUS,
            ExecError::Redirect { .. } | ExecError::Spawn { .. } => 1,
        }
    }
}
