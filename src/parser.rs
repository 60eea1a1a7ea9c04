//! Turns lexed words into a [`Pipeline`].
//!
//! Two passes run over the token list: [`segment`] splits it on bare `|`
//! words, then [`resolve`] pulls redirection operators and their targets out
//! of each group, leaving the argument vector.

use crate::env::ShellState;
use crate::error::SyntaxError;
use crate::lexer::{self, Token};
use std::path::PathBuf;

/// How an output redirection opens its file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// Create the file or cut it to zero length (`>`).
    Truncate,
    /// Create the file or write at its end (`>>`).
    Append,
}

/// Target file of an output redirection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputTarget {
    pub path: PathBuf,
    pub mode: WriteMode,
}

/// One command of a pipeline, with its redirections pulled out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSegment {
    /// The command name followed by its arguments. Never empty.
    pub argv: Vec<String>,
    pub stdout: Option<OutputTarget>,
    pub stderr: Option<OutputTarget>,
    pub stdin: Option<PathBuf>,
}

impl CommandSegment {
    /// A segment with no redirections.
    pub fn new(argv: Vec<String>) -> Self {
        Self {
            argv,
            stdout: None,
            stderr: None,
            stdin: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.argv[0]
    }

    pub fn args(&self) -> &[String] {
        &self.argv[1..]
    }
}

/// Commands connected by pipes, in execution order. Never empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pipeline {
    pub segments: Vec<CommandSegment>,
}

#[derive(Debug, Clone, Copy)]
enum Redirect {
    Stdout(WriteMode),
    Stderr(WriteMode),
    Stdin,
}

impl Redirect {
    fn from_token(token: &Token) -> Option<Self> {
        if token.is_quoted() {
            return None;
        }
        match token.as_str() {
            ">" | "1>" => Some(Redirect::Stdout(WriteMode::Truncate)),
            ">>" | "1>>" => Some(Redirect::Stdout(WriteMode::Append)),
            "2>" => Some(Redirect::Stderr(WriteMode::Truncate)),
            "2>>" => Some(Redirect::Stderr(WriteMode::Append)),
            "<" => Some(Redirect::Stdin),
            _ => None,
        }
    }
}

/// Split tokens on bare `|` words.
///
/// A group may not be empty, so a leading, trailing or doubled `|` is an error.
pub fn segment(tokens: Vec<Token>) -> Result<Vec<Vec<Token>>, SyntaxError> {
    let mut groups = Vec::new();
    let mut current = Vec::new();

    for token in tokens {
        if token.is_operator("|") {
            if current.is_empty() {
                return Err(SyntaxError::EmptySegment);
            }
            groups.push(std::mem::take(&mut current));
        } else {
            current.push(token);
        }
    }

    if current.is_empty() {
        return Err(SyntaxError::EmptySegment);
    }
    groups.push(current);
    Ok(groups)
}

/// Extract redirections from one token group.
///
/// Operators may appear anywhere; each consumes the word after it as its
/// file name. When a stream is redirected twice, the last one wins.
pub fn resolve(group: Vec<Token>) -> Result<CommandSegment, SyntaxError> {
    let mut argv = Vec::new();
    let mut stdout = None;
    let mut stderr = None;
    let mut stdin = None;

    let mut tokens = group.into_iter();
    while let Some(token) = tokens.next() {
        let Some(redirect) = Redirect::from_token(&token) else {
            argv.push(token.into_string());
            continue;
        };
        let target = tokens
            .next()
            .ok_or_else(|| SyntaxError::MissingRedirectTarget(token.into_string()))?;
        let path = PathBuf::from(target.into_string());
        match redirect {
            Redirect::Stdout(mode) => stdout = Some(OutputTarget { path, mode }),
            Redirect::Stderr(mode) => stderr = Some(OutputTarget { path, mode }),
            Redirect::Stdin => stdin = Some(path),
        }
    }

    if argv.is_empty() {
        return Err(SyntaxError::MissingCommand);
    }

    Ok(CommandSegment {
        argv,
        stdout,
        stderr,
        stdin,
    })
}

/// Parse a full input line. A blank line yields `None`.
pub fn parse_line(line: &str, shell: &ShellState) -> Result<Option<Pipeline>, SyntaxError> {
    let tokens = lexer::tokenize(line, shell)?;
    if tokens.is_empty() {
        return Ok(None);
    }
    let segments = segment(tokens)?
        .into_iter()
        .map(resolve)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Some(Pipeline { segments }))
}
