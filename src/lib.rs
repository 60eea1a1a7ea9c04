//! A small interactive shell.
//!
//! A line goes through the [`lexer`] (quoting and `$`/`~` expansion), the
//! [`parser`] (pipes and redirections) and the [`pipeline`] runner, which
//! starts every stage at once and connects them with OS pipes. Builtins run
//! inside the shell process against the shared [`ShellState`].
//!
//! The main entry point is [`Interpreter`], which runs single lines or an
//! interactive loop with history and command-name completion.

pub mod builtin;
pub mod command;
pub mod completion;
pub mod config;
pub mod env;
pub mod error;
pub mod external;
pub mod history;
mod interpreter;
pub mod lexer;
pub mod parser;
pub mod pipeline;

pub use builtin::BuiltinRegistry;
pub use command::{ExitCode, Flow};
pub use config::{Args, Config};
pub use env::ShellState;
pub use interpreter::Interpreter;
