use crate::command::{CommandFactory, ExecutableCommand, Flow, StageIo};
use crate::env::ShellState;
use crate::external::{Resolution, find_command_path};
use anyhow::{Result, anyhow, bail};
use argh::{EarlyExit, FromArgs};
use std::collections::HashMap;
use std::ffi::OsStr;
use std::fs;
use std::io::Write;
use std::marker::PhantomData;

/// Names of every command implemented inside the shell.
pub const BUILTIN_NAMES: &[&str] = &[
    "cd", "echo", "exit", "export", "help", "history", "pwd", "type",
];

/// Built-in commands known to the shell at compile time.
///
/// Builtins are parsed using the [`argh`] crate (`FromArgs`) and executed directly
/// in-process without spawning a child process.
pub(crate) trait BuiltinCommand: Sized + FromArgs {
    /// Canonical name of the command, e.g. "echo" or "cd".
    fn name() -> &'static str;

    /// Executes the command using the stage's streams and the shell state.
    ///
    /// An `Err` is printed as `<name>: <error>` on stderr and becomes status 1.
    fn execute(self, io: &mut StageIo<'_>, state: &mut ShellState) -> Result<Flow>;
}

impl<T: BuiltinCommand> ExecutableCommand for T {
    fn execute(self: Box<Self>, io: &mut StageIo<'_>, state: &mut ShellState) -> Result<Flow> {
        match <T as BuiltinCommand>::execute(*self, io, state) {
            Ok(flow) => Ok(flow),
            Err(e) => {
                writeln!(io.stderr, "{}: {}", T::name(), e)?;
                Ok(Flow::Continue(1))
            }
        }
    }
}

/// Result of argument parsing that stopped early: `--help` or bad flags.
struct InvalidArgs {
    output: String,
    is_error: bool,
}

impl ExecutableCommand for InvalidArgs {
    fn execute(self: Box<Self>, io: &mut StageIo<'_>, _state: &mut ShellState) -> Result<Flow> {
        if self.is_error {
            writeln!(io.stderr, "{}", self.output)?;
            Ok(Flow::Continue(1))
        } else {
            writeln!(io.stdout, "{}", self.output)?;
            Ok(Flow::Continue(0))
        }
    }
}

/// Factory creating instances of one builtin.
pub(crate) struct Factory<T> {
    _phantom: PhantomData<T>,
}

impl<T> Default for Factory<T> {
    fn default() -> Self {
        Self {
            _phantom: PhantomData,
        }
    }
}

impl<T: BuiltinCommand + 'static> CommandFactory for Factory<T> {
    fn name(&self) -> &'static str {
        T::name()
    }

    fn create(&self, args: &[&str]) -> Box<dyn ExecutableCommand> {
        match T::from_args(&[T::name()], args) {
            Ok(cmd) => Box::new(cmd),
            Err(EarlyExit { output, status }) => Box::new(InvalidArgs {
                output,
                is_error: status.is_err(),
            }),
        }
    }
}

/// Lookup table from command name to builtin factory.
pub struct BuiltinRegistry {
    commands: HashMap<&'static str, Box<dyn CommandFactory>>,
}

impl BuiltinRegistry {
    /// A registry with no commands.
    pub fn empty() -> Self {
        Self {
            commands: HashMap::new(),
        }
    }

    /// Add a command, replacing any previous one with the same name.
    pub fn register(&mut self, factory: Box<dyn CommandFactory>) {
        self.commands.insert(factory.name(), factory);
    }

    pub fn lookup(&self, name: &str) -> Option<&dyn CommandFactory> {
        self.commands.get(name).map(|f| f.as_ref())
    }

    pub fn is_builtin(&self, name: &str) -> bool {
        self.commands.contains_key(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.commands.keys().copied().collect();
        names.sort_unstable();
        names
    }
}

impl Default for BuiltinRegistry {
    /// Create a registry with every builtin of [`BUILTIN_NAMES`].
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register(Box::new(Factory::<Cd>::default()));
        registry.register(Box::new(Factory::<Echo>::default()));
        registry.register(Box::new(Factory::<Exit>::default()));
        registry.register(Box::new(Factory::<Export>::default()));
        registry.register(Box::new(Factory::<Help>::default()));
        registry.register(Box::new(Factory::<History>::default()));
        registry.register(Box::new(Factory::<Pwd>::default()));
        registry.register(Box::new(Factory::<Type>::default()));
        registry
    }
}

#[derive(FromArgs)]
/// Print the current working directory to standard output.
pub struct Pwd {}

impl BuiltinCommand for Pwd {
    fn name() -> &'static str {
        "pwd"
    }

    fn execute(self, io: &mut StageIo<'_>, state: &mut ShellState) -> Result<Flow> {
        writeln!(io.stdout, "{}", state.current_dir.display())?;
        Ok(Flow::Continue(0))
    }
}

#[derive(FromArgs)]
/// Change the current working directory.
/// If no target is provided, changes to the directory specified by the HOME environment variable.
pub struct Cd {
    #[argh(positional)]
    /// directory to switch to; absolute or relative to the current directory. Defaults to $HOME when omitted.
    pub target: Option<String>,
}

impl BuiltinCommand for Cd {
    fn name() -> &'static str {
        "cd"
    }

    fn execute(self, _io: &mut StageIo<'_>, state: &mut ShellState) -> Result<Flow> {
        let target = match self.target {
            Some(t) if !t.is_empty() => t,
            _ => match state.get_var("HOME") {
                Some(home) => home.to_string(),
                None => bail!("HOME not set"),
            },
        };

        let new_dir = state.current_dir.join(&target);
        let canonical = fs::canonicalize(&new_dir)
            .map_err(|_| anyhow!("{}: No such file or directory", target))?;
        if !canonical.is_dir() {
            bail!("{}: Not a directory", target);
        }

        state.set_var("PWD", canonical.to_string_lossy());
        state.current_dir = canonical;
        Ok(Flow::Continue(0))
    }
}

#[derive(FromArgs)]
/// Exit the shell with status N, or with the status of the last command.
pub struct Exit {
    #[argh(positional)]
    /// exit status; only the low eight bits are used.
    pub status: Option<String>,
}

impl BuiltinCommand for Exit {
    fn name() -> &'static str {
        "exit"
    }

    fn execute(self, _io: &mut StageIo<'_>, state: &mut ShellState) -> Result<Flow> {
        let status = match self.status {
            None => state.last_exit_code,
            Some(s) => s
                .trim()
                .parse::<i32>()
                .map_err(|_| anyhow!("invalid argument"))?,
        };
        Ok(Flow::Terminate(status.rem_euclid(256)))
    }
}

#[derive(FromArgs)]
/// write the arguments to standard output, separated by spaces.
/// by default, a trailing newline is printed.
pub struct Echo {
    #[argh(switch, short = 'n')]
    /// do not output the trailing newline.
    pub no_newline: bool,

    #[argh(positional, greedy)]
    /// values to print as-is, separated by spaces.
    pub args: Vec<String>,
}

impl BuiltinCommand for Echo {
    fn name() -> &'static str {
        "echo"
    }

    fn execute(self, io: &mut StageIo<'_>, _state: &mut ShellState) -> Result<Flow> {
        let s = self.args.join(" ");
        if self.no_newline {
            write!(io.stdout, "{}", s)?;
        } else {
            writeln!(io.stdout, "{}", s)?;
        }
        Ok(Flow::Continue(0))
    }
}

#[derive(FromArgs)]
/// Set shell variables and pass them to commands started later.
/// Without arguments, list every variable as NAME=value.
pub struct Export {
    #[argh(positional, greedy)]
    /// assignments of the form NAME=value.
    pub assignments: Vec<String>,
}

impl BuiltinCommand for Export {
    fn name() -> &'static str {
        "export"
    }

    fn execute(self, io: &mut StageIo<'_>, state: &mut ShellState) -> Result<Flow> {
        if self.assignments.is_empty() {
            let mut vars: Vec<_> = state.vars.iter().collect();
            vars.sort();
            for (name, value) in vars {
                writeln!(io.stdout, "{}={}", name, value)?;
            }
            return Ok(Flow::Continue(0));
        }

        let mut status = 0;
        for assignment in self.assignments {
            let (name, value) = match assignment.split_once('=') {
                Some((name, value)) => (name, Some(value)),
                None => (assignment.as_str(), None),
            };
            if !is_valid_name(name) {
                writeln!(io.stderr, "export: `{}': not a valid identifier", assignment)?;
                status = 1;
                continue;
            }
            // Every variable is already exported; a bare name has nothing to do.
            if let Some(value) = value {
                state.set_var(name, value);
            }
        }
        Ok(Flow::Continue(status))
    }
}

fn is_valid_name(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[derive(FromArgs)]
/// Show how each NAME would be interpreted if used as a command.
pub struct Type {
    #[argh(positional, greedy)]
    /// command names to describe.
    pub names: Vec<String>,
}

impl BuiltinCommand for Type {
    fn name() -> &'static str {
        "type"
    }

    fn execute(self, io: &mut StageIo<'_>, state: &mut ShellState) -> Result<Flow> {
        if self.names.is_empty() {
            bail!("missing operand");
        }
        let mut status = 0;
        for name in &self.names {
            if BUILTIN_NAMES.contains(&name.as_str()) {
                writeln!(io.stdout, "{} is a shell builtin", name)?;
                continue;
            }
            let search = OsStr::new(state.search_path());
            match find_command_path(search, &state.current_dir, name) {
                Resolution::Found(path) => writeln!(io.stdout, "{} is {}", name, path.display())?,
                _ => {
                    writeln!(io.stdout, "{}: not found", name)?;
                    status = 1;
                }
            }
        }
        Ok(Flow::Continue(status))
    }
}

const HELP_TOPICS: &[(&str, &str)] = &[
    (
        "cd",
        "cd [directory]\n\nChange the current directory. Without an argument, go to $HOME.",
    ),
    (
        "echo",
        "echo [-n] [arguments...]\n\nWrite the arguments to standard output, separated by single spaces.\nWith -n, the trailing newline is omitted.",
    ),
    (
        "exit",
        "exit [n]\n\nExit the shell with status n, or with the status of the last command.",
    ),
    (
        "export",
        "export [name=value ...]\n\nSet variables that are passed to every command started afterwards.\nWithout arguments, list all variables as name=value.",
    ),
    (
        "help",
        "help [command]\n\nDisplay information about builtin commands.",
    ),
    (
        "history",
        "history [n]\n\nList previously entered lines with their numbers.\nWith n, list only the last n lines.",
    ),
    (
        "pwd",
        "pwd\n\nPrint the absolute path of the current working directory.",
    ),
    (
        "type",
        "type name [name ...]\n\nTell whether each name is a builtin or an executable on PATH.",
    ),
];

#[derive(FromArgs)]
/// Display information about builtin commands.
pub struct Help {
    #[argh(positional)]
    /// builtin to describe; lists all builtins when omitted.
    pub topic: Option<String>,
}

impl BuiltinCommand for Help {
    fn name() -> &'static str {
        "help"
    }

    fn execute(self, io: &mut StageIo<'_>, _state: &mut ShellState) -> Result<Flow> {
        match self.topic {
            None => {
                writeln!(io.stdout, "Shell builtin commands:\n")?;
                for (name, _) in HELP_TOPICS {
                    writeln!(io.stdout, "  {}", name)?;
                }
                writeln!(
                    io.stdout,
                    "\nType 'help command' to find out more about a specific command."
                )?;
            }
            Some(topic) => match HELP_TOPICS.iter().find(|(name, _)| *name == topic) {
                Some((_, text)) => writeln!(io.stdout, "{}", text)?,
                None => bail!("no help topics match '{}'.", topic),
            },
        }
        Ok(Flow::Continue(0))
    }
}

#[derive(FromArgs)]
/// Display the command history with line numbers.
pub struct History {
    #[argh(positional)]
    /// list only the last N entries.
    pub count: Option<String>,
}

impl BuiltinCommand for History {
    fn name() -> &'static str {
        "history"
    }

    fn execute(self, io: &mut StageIo<'_>, state: &mut ShellState) -> Result<Flow> {
        let entries = state.history.entries();
        let count = match self.count {
            None => entries.len(),
            Some(n) => n
                .parse::<usize>()
                .map_err(|_| anyhow!("{}: numeric argument required", n))?
                .min(entries.len()),
        };
        let first = entries.len() - count;
        for (i, line) in entries.iter().enumerate().skip(first) {
            writeln!(io.stdout, "{:5}  {}", i + 1, line)?;
        }
        Ok(Flow::Continue(0))
    }
}
