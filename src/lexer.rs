//! Lexical analysis of an input line, with variable and tilde expansion.
//!
//! The lexer produces plain words. Redirection operators and `|` are not
//! recognised here; the parser matches them later by their text. A token
//! remembers whether any of it was quoted or escaped so that `'|'` or `\>`
//! stay ordinary words.

use crate::env::ShellState;
use crate::error::SyntaxError;
#[cfg(unix)]
use nix::unistd::{User, getuid};

/// A single word produced by the lexer, with expansions already applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    text: String,
    quoted: bool,
    tilde: bool,
}

impl Token {
    /// An unquoted word.
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            quoted: false,
            tilde: false,
        }
    }

    /// A word that was (at least partly) quoted or escaped in the input.
    pub fn quoted(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            quoted: true,
            tilde: false,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn into_string(self) -> String {
        self.text
    }

    pub fn is_quoted(&self) -> bool {
        self.quoted
    }

    /// True when the token is the bare, unquoted operator `op`.
    pub fn is_operator(&self, op: &str) -> bool {
        !self.quoted && self.text == op
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LexingState {
    Unquoted,
    SingleQuote,
    DoubleQuote,
}

struct LexingFSM<'a> {
    input: Vec<char>,
    pos: usize,
    state: LexingState,
    shell: &'a ShellState,
    out: Vec<Token>,
    buffer: String,
    // Whether the current word exists at all; `""` is a word, `$UNSET` is not.
    started: bool,
    quoted: bool,
    tilde: bool,
    // Between a leading `~` and the first unquoted `/`.
    tilde_prefix: bool,
    // A parameter expansion has touched the current word, even an empty one.
    expanded: bool,
}

impl<'a> LexingFSM<'a> {
    fn new(line: &str, shell: &'a ShellState) -> Self {
        LexingFSM {
            input: line.chars().collect(),
            pos: 0,
            state: LexingState::Unquoted,
            shell,
            out: Vec::new(),
            buffer: String::new(),
            started: false,
            quoted: false,
            tilde: false,
            tilde_prefix: false,
            expanded: false,
        }
    }

    fn make_tokens(mut self) -> Result<Vec<Token>, SyntaxError> {
        while let Some(ch) = self.read_char() {
            match self.state {
                LexingState::Unquoted => self.handle_unquoted(ch),
                LexingState::SingleQuote => self.handle_single_quote(ch),
                LexingState::DoubleQuote => self.handle_double_quote(ch),
            }
        }

        match self.state {
            LexingState::SingleQuote => return Err(SyntaxError::UnterminatedQuote('\'')),
            LexingState::DoubleQuote => return Err(SyntaxError::UnterminatedQuote('"')),
            LexingState::Unquoted => {}
        }

        self.finish_word();
        Ok(self.out)
    }

    fn read_char(&mut self) -> Option<char> {
        let ch = self.input.get(self.pos).copied();
        if ch.is_some() {
            self.pos += 1;
        }
        ch
    }

    fn peek_char(&self) -> Option<char> {
        self.input.get(self.pos).copied()
    }

    fn handle_unquoted(&mut self, ch: char) {
        match ch {
            c if c.is_whitespace() => self.finish_word(),
            '\'' => self.open_quote(LexingState::SingleQuote),
            '"' => self.open_quote(LexingState::DoubleQuote),
            '\\' => match self.read_char() {
                Some(next) => {
                    self.break_tilde_prefix();
                    self.quoted = true;
                    self.push_literal(next);
                }
                None => self.push_literal('\\'),
            },
            '$' => self.expand_parameter(),
            '~' if !self.started && !self.expanded => {
                self.tilde = true;
                self.tilde_prefix = true;
                self.push_literal('~');
            }
            '/' => {
                self.tilde_prefix = false;
                self.push_literal('/');
            }
            c => self.push_literal(c),
        }
    }

    fn handle_single_quote(&mut self, ch: char) {
        match ch {
            '\'' => self.state = LexingState::Unquoted,
            c => self.push_literal(c),
        }
    }

    fn handle_double_quote(&mut self, ch: char) {
        match ch {
            '"' => self.state = LexingState::Unquoted,
            '\\' => match self.read_char() {
                Some(next) => self.push_literal(next),
                None => self.push_literal('\\'),
            },
            '$' => self.expand_parameter(),
            c => self.push_literal(c),
        }
    }

    fn open_quote(&mut self, state: LexingState) {
        self.break_tilde_prefix();
        self.state = state;
        self.started = true;
        self.quoted = true;
    }

    /// Expand the parameter following a `$` that was just consumed.
    ///
    /// Forms are tried in order: `${name}`, `$$`, `$?`, `$name`. Anything
    /// else leaves the `$` as a literal character.
    fn expand_parameter(&mut self) {
        self.break_tilde_prefix();
        self.expanded = true;
        match self.peek_char() {
            Some('{') => {
                let close = self.input[self.pos + 1..]
                    .iter()
                    .position(|&c| c == '}')
                    .map(|offset| self.pos + 1 + offset);
                match close {
                    Some(close) => {
                        let name: String = self.input[self.pos + 1..close].iter().collect();
                        self.pos = close + 1;
                        self.push_variable(&name);
                    }
                    None => self.push_literal('$'),
                }
            }
            Some('$') => {
                self.read_char();
                self.push_expanded(&std::process::id().to_string());
            }
            Some('?') => {
                self.read_char();
                let status = self.shell.last_exit_code.to_string();
                self.push_expanded(&status);
            }
            Some(c) if c.is_ascii_alphabetic() || c == '_' => {
                let mut name = String::new();
                while let Some(c) = self.peek_char() {
                    if !(c.is_ascii_alphanumeric() || c == '_') {
                        break;
                    }
                    name.push(c);
                    self.read_char();
                }
                self.push_variable(&name);
            }
            _ => self.push_literal('$'),
        }
    }

    /// Quoting or expansion inside `~user` leaves the tilde literal.
    fn break_tilde_prefix(&mut self) {
        if self.tilde_prefix {
            self.tilde = false;
            self.tilde_prefix = false;
        }
    }

    fn push_variable(&mut self, name: &str) {
        let shell = self.shell;
        self.push_expanded(shell.get_var(name).unwrap_or_default());
    }

    fn push_literal(&mut self, ch: char) {
        self.started = true;
        self.buffer.push(ch);
    }

    fn push_expanded(&mut self, value: &str) {
        if !value.is_empty() {
            self.started = true;
            self.buffer.push_str(value);
        }
    }

    fn finish_word(&mut self) {
        if self.started {
            self.out.push(Token {
                text: std::mem::take(&mut self.buffer),
                quoted: self.quoted,
                tilde: self.tilde,
            });
        }
        self.started = false;
        self.quoted = false;
        self.tilde = false;
        self.tilde_prefix = false;
        self.expanded = false;
    }
}

/// Split `line` into words, applying quote rules, parameter expansion and
/// tilde expansion.
///
/// An unterminated quote rejects the whole line.
pub fn tokenize(line: &str, shell: &ShellState) -> Result<Vec<Token>, SyntaxError> {
    let mut tokens = LexingFSM::new(line, shell).make_tokens()?;
    for token in tokens.iter_mut().filter(|t| t.tilde) {
        token.text = expand_tilde(&token.text, shell);
    }
    Ok(tokens)
}

/// Expand a leading `~`, `~/…`, `~user` or `~user/…`.
///
/// `~` uses `$HOME`, falling back to the password database. An unknown user
/// leaves the word unchanged.
pub fn expand_tilde(word: &str, shell: &ShellState) -> String {
    let Some(rest) = word.strip_prefix('~') else {
        return word.to_string();
    };
    let (user, tail) = match rest.find('/') {
        Some(slash) => rest.split_at(slash),
        None => (rest, ""),
    };
    let home = if user.is_empty() {
        shell
            .get_var("HOME")
            .map(str::to_string)
            .or_else(current_user_home)
    } else {
        user_home(user)
    };
    match home {
        Some(home) => format!("{}{}", home, tail),
        None => word.to_string(),
    }
}

#[cfg(unix)]
fn current_user_home() -> Option<String> {
    let user = User::from_uid(getuid()).ok().flatten()?;
    user.dir.into_os_string().into_string().ok()
}

#[cfg(unix)]
fn user_home(name: &str) -> Option<String> {
    let user = User::from_name(name).ok().flatten()?;
    user.dir.into_os_string().into_string().ok()
}

#[cfg(not(unix))]
fn current_user_home() -> Option<String> {
    None
}

#[cfg(not(unix))]
fn user_home(_name: &str) -> Option<String> {
    None
}
