//! Command history and its on-disk file.
//!
//! The file is plain text with one command per line. It is read once at
//! startup, and lines entered during the session are appended on flush.

use log::debug;
use std::collections::VecDeque;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// Default number of entries kept in memory.
pub const DEFAULT_HISTORY_SIZE: usize = 1024;

#[derive(Debug, Clone)]
pub struct History {
    entries: VecDeque<String>,
    pending: Vec<String>,
    capacity: usize,
    path: Option<PathBuf>,
}

impl Default for History {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_SIZE)
    }
}

impl History {
    /// In-memory history not backed by any file.
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            pending: Vec::new(),
            capacity: capacity.max(1),
            path: None,
        }
    }

    /// History backed by `path`, seeded with the file's last `capacity` lines.
    ///
    /// A missing file is not an error; it is created on the first flush.
    pub fn open(path: impl Into<PathBuf>, capacity: usize) -> io::Result<Self> {
        let path = path.into();
        let mut history = Self::new(capacity);
        for line in load_all(&path)? {
            history.push(line);
        }
        debug!("loaded {} history entries from {}", history.len(), path.display());
        history.path = Some(path);
        Ok(history)
    }

    /// Record a line entered by the user. Blank lines are ignored.
    pub fn append(&mut self, line: &str) {
        if line.trim().is_empty() {
            return;
        }
        self.push(line.to_string());
        self.pending.push(line.to_string());
    }

    /// Append the lines recorded since the last flush to the history file.
    pub fn flush(&mut self) -> io::Result<()> {
        let Some(path) = &self.path else {
            self.pending.clear();
            return Ok(());
        };
        if self.pending.is_empty() {
            return Ok(());
        }
        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        for line in &self.pending {
            writeln!(file, "{}", line)?;
        }
        debug!("flushed {} history entries to {}", self.pending.len(), path.display());
        self.pending.clear();
        Ok(())
    }

    /// Entries kept in memory, oldest first.
    pub fn entries(&self) -> &VecDeque<String> {
        &self.entries
    }

    /// Most entries kept in memory.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn push(&mut self, line: String) {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(line);
    }
}

/// Read every non-empty line of a history file. A missing file yields no lines.
pub fn load_all(path: &Path) -> io::Result<Vec<String>> {
    match fs::read_to_string(path) {
        Ok(text) => Ok(text
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(str::to_string)
            .collect()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Vec::new()),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let history = History::open(dir.path().join("nope"), 10).unwrap();
        assert!(history.is_empty());
    }

    #[test]
    fn flush_appends_only_new_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history");
        fs::write(&path, "old one\nold two\n").unwrap();

        let mut history = History::open(&path, 10).unwrap();
        assert_eq!(history.entries(), &["old one", "old two"]);

        history.append("echo hi");
        history.append("   ");
        history.append("pwd");
        history.flush().unwrap();
        history.flush().unwrap();

        let text = fs::read_to_string(&path).unwrap();
        assert_eq!(text, "old one\nold two\necho hi\npwd\n");
        assert_eq!(history.len(), 4);
    }

    #[test]
    fn capacity_drops_oldest_entries() {
        let mut history = History::new(2);
        history.append("a");
        history.append("b");
        history.append("c");
        assert_eq!(history.entries(), &["b", "c"]);
    }

    #[test]
    fn long_session_keeps_newest_entries_in_order() {
        let mut history = History::new(3);
        for i in 0..10_000 {
            history.append(&i.to_string());
        }
        assert_eq!(history.len(), 3);
        assert_eq!(history.entries(), &["9997", "9998", "9999"]);
    }

    #[test]
    fn open_keeps_tail_of_long_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history");
        fs::write(&path, "1\n2\n3\n4\n").unwrap();
        let history = History::open(&path, 3).unwrap();
        assert_eq!(history.entries(), &["2", "3", "4"]);
    }
}
