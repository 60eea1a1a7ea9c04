//! Tab completion of command names.
//!
//! Candidates are the builtin names plus executables found on `PATH`. One
//! candidate completes the word; a longer shared prefix extends it; an
//! ambiguous word rings the bell on the first Tab and lists the candidates
//! on the second.

use crate::external::is_executable;
use log::debug;
use rustyline::completion::{Completer, Pair};
use rustyline::highlight::Highlighter;
use rustyline::hint::Hinter;
use rustyline::validate::Validator;
use rustyline::{Context, Helper};
use std::cell::RefCell;
use std::ffi::{OsStr, OsString};
use std::fs;
use std::io::{self, Write};

/// What a completion request does to the line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Completion {
    /// Nothing matched, or the cursor is not on a command name.
    None,
    /// The single match, followed by a space.
    Replace(String),
    /// Longest common prefix of several matches, longer than the typed word.
    Extend(String),
    /// First request at an ambiguous word.
    Bell,
    /// Second request in a row at the same ambiguous word.
    List(Vec<String>),
}

/// Memory of the previous request, needed to tell a first Tab from a second.
#[derive(Debug, Default, Clone)]
pub struct CompletionState {
    last_prefix: String,
    ambiguous_pending: bool,
}

impl CompletionState {
    pub fn reset(&mut self) {
        self.last_prefix.clear();
        self.ambiguous_pending = false;
    }

    /// Decide the outcome for `word` given its sorted, deduplicated matches.
    pub fn resolve(&mut self, word: &str, candidates: Vec<String>) -> Completion {
        if candidates.len() < 2 {
            self.reset();
            return match candidates.into_iter().next() {
                Some(only) => Completion::Replace(only + " "),
                None => Completion::None,
            };
        }

        let common = longest_common_prefix(&candidates);
        if common.len() > word.len() {
            self.reset();
            return Completion::Extend(common.to_string());
        }
        if self.ambiguous_pending && self.last_prefix == word {
            self.reset();
            return Completion::List(candidates);
        }
        self.ambiguous_pending = true;
        self.last_prefix = word.to_string();
        Completion::Bell
    }
}

/// Longest string that every word starts with, compared char by char.
pub fn longest_common_prefix(words: &[String]) -> &str {
    let Some((first, rest)) = words.split_first() else {
        return "";
    };
    let mut end = first.len();
    for word in rest {
        end = first[..end]
            .char_indices()
            .zip(word.chars())
            .find(|((_, a), b)| a != b)
            .map_or(end.min(word.len()), |((i, _), _)| i);
    }
    &first[..end]
}

/// Builtins and `PATH` executables whose name starts with `prefix`.
///
/// Only regular files with an execute bit count. Directories that cannot be
/// read are skipped. The result is sorted and free of duplicates.
pub fn candidates(prefix: &str, builtins: &[&str], search_path: &OsStr) -> Vec<String> {
    let mut found: Vec<String> = builtins
        .iter()
        .filter(|name| name.starts_with(prefix))
        .map(|name| name.to_string())
        .collect();

    for dir in std::env::split_paths(search_path) {
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) => {
                debug!("skipping {} during completion: {}", dir.display(), e);
                continue;
            }
        };
        for entry in entries.flatten() {
            let Ok(name) = entry.file_name().into_string() else {
                continue;
            };
            if !name.starts_with(prefix) {
                continue;
            }
            // Follows symlinks, unlike `entry.metadata()`.
            match fs::metadata(entry.path()) {
                Ok(meta) if meta.is_file() && is_executable(&meta) => found.push(name),
                _ => {}
            }
        }
    }

    found.sort();
    found.dedup();
    found
}

/// Completion of the first word of a line.
#[derive(Debug)]
pub struct CompletionEngine {
    builtins: Vec<&'static str>,
    search_path: OsString,
    state: CompletionState,
}

impl CompletionEngine {
    pub fn new(builtins: Vec<&'static str>, search_path: impl Into<OsString>) -> Self {
        Self {
            builtins,
            search_path: search_path.into(),
            state: CompletionState::default(),
        }
    }

    /// `PATH` may change between prompts through `export`.
    pub fn set_search_path(&mut self, search_path: impl Into<OsString>) {
        self.search_path = search_path.into();
    }

    /// Complete the word ending at the end of `before_cursor`.
    ///
    /// Returns the byte offset where that word starts, and the outcome.
    pub fn complete(&mut self, before_cursor: &str) -> (usize, Completion) {
        let start = word_start(before_cursor);
        let word = &before_cursor[start..];
        if !before_cursor[..start].trim().is_empty() {
            self.state.reset();
            return (start, Completion::None);
        }
        let matches = candidates(word, &self.builtins, &self.search_path);
        (start, self.state.resolve(word, matches))
    }
}

fn word_start(line: &str) -> usize {
    line.char_indices()
        .rev()
        .find(|(_, c)| c.is_whitespace())
        .map_or(0, |(i, c)| i + c.len_utf8())
}

/// Line editor glue: applies [`CompletionEngine`] outcomes to the buffer.
///
/// The editor's own bell is expected to be off; this helper rings it itself.
pub struct ShellHelper {
    engine: RefCell<CompletionEngine>,
    prompt: String,
}

impl ShellHelper {
    pub fn new(engine: CompletionEngine, prompt: impl Into<String>) -> Self {
        Self {
            engine: RefCell::new(engine),
            prompt: prompt.into(),
        }
    }

    pub fn set_search_path(&mut self, search_path: impl Into<OsString>) {
        self.engine.get_mut().set_search_path(search_path);
    }

    fn list(&self, candidates: &[String], line: &str, pos: usize) -> io::Result<()> {
        render_list(&mut io::stdout().lock(), candidates, &self.prompt, line, pos)
    }
}

/// Print the candidates below the line, then redraw prompt and line with the
/// cursor back at `pos`.
fn render_list(
    out: &mut impl Write,
    candidates: &[String],
    prompt: &str,
    line: &str,
    pos: usize,
) -> io::Result<()> {
    write!(out, "\r\n{}\r\n{}{}", candidates.join("  "), prompt, line)?;
    let tail = line[pos..].chars().count();
    if tail > 0 {
        write!(out, "\x1b[{}D", tail)?;
    }
    out.flush()
}

impl Completer for ShellHelper {
    type Candidate = Pair;

    fn complete(
        &self,
        line: &str,
        pos: usize,
        _ctx: &Context<'_>,
    ) -> rustyline::Result<(usize, Vec<Pair>)> {
        let (start, outcome) = self.engine.borrow_mut().complete(&line[..pos]);
        let replacement = match outcome {
            Completion::None => None,
            Completion::Replace(text) | Completion::Extend(text) => Some(text),
            Completion::Bell => {
                let mut out = io::stdout();
                out.write_all(b"\x07")?;
                out.flush()?;
                None
            }
            Completion::List(candidates) => {
                self.list(&candidates, line, pos)?;
                None
            }
        };
        Ok(match replacement {
            Some(text) => (
                start,
                vec![Pair {
                    display: text.clone(),
                    replacement: text,
                }],
            ),
            None => (pos, Vec::new()),
        })
    }
}

impl Hinter for ShellHelper {
    type Hint = String;
}

impl Highlighter for ShellHelper {}

impl Validator for ShellHelper {}

impl Helper for ShellHelper {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[cfg(unix)]
    fn touch(dir: &Path, name: &str, mode: u32) {
        use std::os::unix::fs::PermissionsExt;
        let path = dir.join(name);
        fs::write(&path, "").unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(mode)).unwrap();
    }

    #[cfg(unix)]
    fn ls_dir() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        for name in ["ls", "lsof", "lsblk"] {
            touch(dir.path(), name, 0o755);
        }
        touch(dir.path(), "lsnotes", 0o644);
        fs::create_dir(dir.path().join("lsdir")).unwrap();
        dir
    }

    fn strings(words: &[&str]) -> Vec<String> {
        words.iter().map(|w| w.to_string()).collect()
    }

    #[test]
    fn common_prefix() {
        assert_eq!(longest_common_prefix(&strings(&["lsof", "lsblk", "ls"])), "ls");
        assert_eq!(longest_common_prefix(&strings(&["export", "exit"])), "ex");
        assert_eq!(longest_common_prefix(&strings(&["abc", "xyz"])), "");
        assert_eq!(longest_common_prefix(&strings(&["same"])), "same");
        assert_eq!(longest_common_prefix(&[]), "");
        assert_eq!(longest_common_prefix(&strings(&["héllo", "hélp"])), "hél");
    }

    #[test]
    fn single_match_completes_with_space() {
        let mut state = CompletionState::default();
        assert_eq!(
            state.resolve("ech", strings(&["echo"])),
            Completion::Replace("echo ".into())
        );
    }

    #[test]
    fn no_match_does_nothing() {
        let mut state = CompletionState::default();
        assert_eq!(state.resolve("zzz", Vec::new()), Completion::None);
    }

    #[test]
    fn shared_prefix_extends() {
        let mut state = CompletionState::default();
        assert_eq!(
            state.resolve("e", strings(&["exit", "export"])),
            Completion::Extend("ex".into())
        );
    }

    #[test]
    fn bell_then_list() {
        let mut state = CompletionState::default();
        let matches = strings(&["exit", "export"]);
        assert_eq!(state.resolve("ex", matches.clone()), Completion::Bell);
        assert_eq!(
            state.resolve("ex", matches.clone()),
            Completion::List(matches.clone())
        );
        // Listing clears the pending flag.
        assert_eq!(state.resolve("ex", matches), Completion::Bell);
    }

    #[test]
    fn different_prefix_rings_again() {
        let mut state = CompletionState::default();
        assert_eq!(state.resolve("ex", strings(&["exit", "export"])), Completion::Bell);
        assert_eq!(state.resolve("l", strings(&["la", "lb"])), Completion::Bell);
    }

    #[cfg(unix)]
    #[test]
    fn path_scan_keeps_only_executable_files() {
        let dir = ls_dir();
        let found = candidates("ls", &[], dir.path().as_os_str());
        assert_eq!(found, strings(&["ls", "lsblk", "lsof"]));
    }

    #[cfg(unix)]
    #[test]
    fn candidates_are_merged_and_deduplicated() {
        let first = ls_dir();
        let second = tempfile::tempdir().unwrap();
        touch(second.path(), "lsof", 0o755);
        touch(second.path(), "export", 0o755);
        let search = std::env::join_paths([
            Path::new("/definitely/not/here"),
            first.path(),
            second.path(),
        ])
        .unwrap();

        assert_eq!(
            candidates("ls", &["pwd"], &search),
            strings(&["ls", "lsblk", "lsof"])
        );
        assert_eq!(
            candidates("ex", &["exit", "export"], &search),
            strings(&["exit", "export"])
        );
    }

    #[cfg(unix)]
    #[test]
    fn tab_twice_on_ls() {
        let dir = ls_dir();
        let mut engine = CompletionEngine::new(vec!["echo"], dir.path().as_os_str());

        assert_eq!(engine.complete("ls"), (0, Completion::Bell));
        assert_eq!(
            engine.complete("ls"),
            (0, Completion::List(strings(&["ls", "lsblk", "lsof"])))
        );
    }

    #[cfg(unix)]
    #[test]
    fn engine_completes_command_position_only() {
        let dir = ls_dir();
        let mut engine = CompletionEngine::new(vec!["echo"], dir.path().as_os_str());

        assert_eq!(engine.complete("  lsb"), (2, Completion::Replace("lsblk ".into())));
        assert_eq!(engine.complete("l"), (0, Completion::Extend("ls".into())));

        assert_eq!(engine.complete("ls"), (0, Completion::Bell));
        // An argument position clears the pending state.
        assert_eq!(engine.complete("echo ls"), (5, Completion::None));
        assert_eq!(engine.complete("ls"), (0, Completion::Bell));
    }

    #[test]
    fn listing_redraws_prompt_and_line() {
        let mut out = Vec::new();
        render_list(&mut out, &strings(&["ls", "lsblk", "lsof"]), "$ ", "ls", 2).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "\r\nls  lsblk  lsof\r\n$ ls");
    }

    #[test]
    fn listing_puts_cursor_back_inside_line() {
        let mut out = Vec::new();
        render_list(&mut out, &strings(&["ex", "exit"]), "> ", "ex | wc", 2).unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "\r\nex  exit\r\n> ex | wc\x1b[5D"
        );
    }

    #[test]
    fn search_path_can_change() {
        let mut engine = CompletionEngine::new(Vec::new(), "");
        assert_eq!(engine.complete("sh"), (0, Completion::None));
        engine.set_search_path("/definitely/not/here");
        assert_eq!(engine.complete("sh"), (0, Completion::None));
    }
}
