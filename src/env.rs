use crate::command::ExitCode;
use crate::history::History;
use std::collections::HashMap;
use std::env as stdenv;
use std::path::PathBuf;

/// Process-wide state of the shell, owned by the control thread.
///
/// The state contains:
/// - `vars`: shell variables, seeded from the inherited environment. Every entry
///   is passed to spawned processes.
/// - `last_exit_code`: the value of `$?`.
/// - `current_dir`: the working directory for command execution.
/// - `history`: lines entered so far, oldest first.
#[derive(Debug, Clone)]
pub struct ShellState {
    pub vars: HashMap<String, String>,
    pub last_exit_code: ExitCode,
    pub current_dir: PathBuf,
    pub history: History,
}

impl ShellState {
    /// Capture the current process environment into a new `ShellState`.
    pub fn new() -> Self {
        let vars = stdenv::vars().collect();
        let current_dir = stdenv::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        Self {
            vars,
            last_exit_code: 0,
            current_dir,
            history: History::default(),
        }
    }

    /// A state with no variables at all, rooted at `current_dir`.
    pub fn empty(current_dir: PathBuf) -> Self {
        Self {
            vars: HashMap::new(),
            last_exit_code: 0,
            current_dir,
            history: History::default(),
        }
    }

    /// Get the value of a shell variable.
    pub fn get_var(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }

    /// Set or override a shell variable.
    pub fn set_var(&mut self, key: impl Into<String>, val: impl Into<String>) {
        self.vars.insert(key.into(), val.into());
    }

    /// The `PATH` used for command lookup and completion. Empty when unset.
    pub fn search_path(&self) -> &str {
        self.get_var("PATH").unwrap_or("")
    }
}

impl Default for ShellState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_set_and_get_var() {
        let mut state = ShellState::empty(stdenv::temp_dir());

        assert_eq!(state.get_var("SOME_RANDOM_ENV_VAR_12345"), None);

        state.set_var("KEY", "VALUE");

        assert_eq!(state.get_var("KEY"), Some("VALUE"));
    }

    #[test]
    fn test_state_reads_from_process_env() {
        let state = ShellState::new();
        assert!(state.get_var("PATH").is_some());
        assert_eq!(state.last_exit_code, 0);
    }

    #[test]
    fn test_search_path_defaults_to_empty() {
        let state = ShellState::empty(stdenv::temp_dir());
        assert_eq!(state.search_path(), "");
    }
}
