use crate::builtin::BuiltinRegistry;
use crate::command::{ExitCode, Flow};
use crate::completion::{CompletionEngine, ShellHelper};
use crate::config::Config;
use crate::env::ShellState;
use crate::error::SYNTAX_ERROR_STATUS;
use crate::history::History;
use crate::{parser, pipeline};
use log::{debug, warn};
use rustyline::config::{BellStyle, Config as EditorConfig};
use rustyline::error::ReadlineError;
use rustyline::history::DefaultHistory;
use rustyline::{Editor, Result};

/// A shell session: its state plus the builtins it knows.
///
/// Example
/// ```
/// use minish::{Flow, Interpreter};
/// let mut sh = Interpreter::default();
/// assert_eq!(sh.execute_line("export GREETING=hi"), Flow::Continue(0));
/// assert_eq!(sh.state().get_var("GREETING"), Some("hi"));
/// ```
pub struct Interpreter {
    state: ShellState,
    builtins: BuiltinRegistry,
}

impl Interpreter {
    pub fn new(state: ShellState, builtins: BuiltinRegistry) -> Self {
        Self { state, builtins }
    }

    /// Session seeded from the process environment and the configured
    /// history file. An unreadable history file only costs the old entries.
    pub fn from_config(config: &Config) -> Self {
        let mut state = ShellState::new();
        state.history = match &config.history_file {
            Some(path) => History::open(path, config.history_size).unwrap_or_else(|e| {
                warn!("cannot read history from {}: {}", path.display(), e);
                History::new(config.history_size)
            }),
            None => History::new(config.history_size),
        };
        Self::new(state, BuiltinRegistry::default())
    }

    pub fn state(&self) -> &ShellState {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut ShellState {
        &mut self.state
    }

    /// Parse and run one input line.
    ///
    /// A syntax error runs nothing and sets `$?` to 2. A blank line leaves
    /// `$?` as it was.
    pub fn execute_line(&mut self, line: &str) -> Flow {
        match parser::parse_line(line, &self.state) {
            Ok(Some(pipeline)) => {
                debug!("running {:?}", pipeline.segments);
                pipeline::run(&pipeline, &mut self.state, &self.builtins)
            }
            Ok(None) => Flow::Continue(self.state.last_exit_code),
            Err(e) => {
                eprintln!("minish: syntax error: {}", e);
                self.state.last_exit_code = SYNTAX_ERROR_STATUS;
                Flow::Continue(SYNTAX_ERROR_STATUS)
            }
        }
    }

    /// Read-eval-print loop. Returns the status the shell should exit with.
    ///
    /// Ctrl-C drops the current line; end of input leaves with the last
    /// status. History gathered during the session is flushed on the way out.
    pub fn repl(&mut self, prompt: &str) -> Result<ExitCode> {
        let config = EditorConfig::builder()
            .bell_style(BellStyle::None)
            .max_history_size(self.state.history.capacity())?
            .auto_add_history(false)
            .build();
        let mut rl: Editor<ShellHelper, DefaultHistory> = Editor::with_config(config)?;
        let engine = CompletionEngine::new(self.builtins.names(), self.state.search_path());
        rl.set_helper(Some(ShellHelper::new(engine, prompt)));
        for entry in self.state.history.entries() {
            rl.add_history_entry(entry.as_str())?;
        }

        let result = loop {
            if let Some(helper) = rl.helper_mut() {
                helper.set_search_path(self.state.search_path());
            }
            match rl.readline(prompt) {
                Ok(line) => {
                    if !line.trim().is_empty() {
                        rl.add_history_entry(line.as_str())?;
                        self.state.history.append(&line);
                    }
                    if let Flow::Terminate(code) = self.execute_line(&line) {
                        break Ok(code);
                    }
                }
                Err(ReadlineError::Interrupted) => continue,
                Err(ReadlineError::Eof) => break Ok(self.state.last_exit_code),
                Err(err) => break Err(err),
            }
        };

        if let Err(e) = self.state.history.flush() {
            warn!("cannot save history: {}", e);
        }
        result
    }
}

impl Default for Interpreter {
    /// Session over the process environment with every builtin registered.
    fn default() -> Self {
        Self::new(ShellState::new(), BuiltinRegistry::default())
    }
}
