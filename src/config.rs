//! Command-line options and their environment fallbacks.

use crate::history::DEFAULT_HISTORY_SIZE;
use argh::FromArgs;
use log::LevelFilter;
use std::path::PathBuf;

/// Name of the history file created in the home directory.
pub const HISTORY_FILE_NAME: &str = ".minish_history";

pub const DEFAULT_PROMPT: &str = "$ ";

#[derive(FromArgs, Debug, Default, PartialEq)]
/// A small interactive shell with pipelines, redirections and completion.
pub struct Args {
    /// run one command line, then exit with its status
    #[argh(option, short = 'c')]
    pub command: Option<String>,

    /// history file (default: $HISTFILE, or ~/.minish_history)
    #[argh(option)]
    pub history_file: Option<PathBuf>,

    /// number of history entries kept in memory
    #[argh(option)]
    pub history_size: Option<usize>,

    /// log level on stderr: off, error, warn, info, debug or trace (default: $MINISH_LOG, or warn)
    #[argh(option)]
    pub log_level: Option<LevelFilter>,

    /// prompt shown before each line
    #[argh(option)]
    pub prompt: Option<String>,
}

/// Resolved settings of one shell session.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Line to run instead of the interactive loop.
    pub command: Option<String>,
    /// `None` keeps history in memory only.
    pub history_file: Option<PathBuf>,
    pub history_size: usize,
    pub log_level: LevelFilter,
    pub prompt: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            command: None,
            history_file: None,
            history_size: DEFAULT_HISTORY_SIZE,
            log_level: LevelFilter::Warn,
            prompt: DEFAULT_PROMPT.to_string(),
        }
    }
}

impl Config {
    /// Resolve `args` against the process environment.
    pub fn from_env(args: Args) -> Self {
        Self::resolve(args, |name| std::env::var(name).ok())
    }

    /// Resolve `args`, reading fallbacks through `var`.
    ///
    /// Flags win over variables, variables over defaults. An unparsable
    /// `MINISH_LOG` is ignored.
    pub fn resolve(args: Args, var: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let history_file = args
            .history_file
            .or_else(|| var("HISTFILE").filter(|f| !f.is_empty()).map(PathBuf::from))
            .or_else(|| var("HOME").map(|home| PathBuf::from(home).join(HISTORY_FILE_NAME)));
        let log_level = args
            .log_level
            .or_else(|| var("MINISH_LOG").and_then(|level| level.parse().ok()))
            .unwrap_or(defaults.log_level);

        Self {
            command: args.command,
            history_file,
            history_size: args.history_size.unwrap_or(defaults.history_size),
            log_level,
            prompt: args.prompt.unwrap_or(defaults.prompt),
        }
    }
}
