use crate::env::ShellState;
use anyhow::Result;
use std::io::{Read, Write};

/// Conventional process exit code type used by this crate.
///
/// A value of 0 indicates success; any non-zero value indicates failure.
/// This mirrors the convention used by POSIX shells and many command-line tools.
pub type ExitCode = i32;

/// What the read-eval loop should do after a command finishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    /// Keep prompting; the value is the status to store in `$?`.
    Continue(ExitCode),
    /// Leave the loop and end the process with this status.
    Terminate(ExitCode),
}

impl Flow {
    pub fn exit_code(self) -> ExitCode {
        match self {
            Flow::Continue(code) | Flow::Terminate(code) => code,
        }
    }
}

/// Standard streams of one in-process command.
///
/// The orchestrator has already resolved redirections and pipe wiring, so a
/// builtin simply writes to whatever it was handed.
pub struct StageIo<'a> {
    pub stdin: &'a mut dyn Read,
    pub stdout: &'a mut dyn Write,
    pub stderr: &'a mut dyn Write,
}

/// Object-safe trait for a command that runs inside the shell process.
///
/// Implemented for every builtin via a blanket impl.
pub trait ExecutableCommand {
    /// Executes the command. Errors are reported by the caller on `io.stderr`.
    fn execute(self: Box<Self>, io: &mut StageIo<'_>, state: &mut ShellState) -> Result<Flow>;
}

/// Factory that creates a command instance from its arguments.
pub trait CommandFactory {
    /// Name the command is invoked by.
    fn name(&self) -> &'static str;

    /// Create a command instance for the provided arguments (without `argv[0]`).
    fn create(&self, args: &[&str]) -> Box<dyn ExecutableCommand>;
}
