//! Per-terminal file layout under the data root.
//!
//! ```text
//! <data_root>/terminals/<terminal_id>/
//! ├── ledger.wal            write-ahead log
//! ├── terminal.lock         lock record (JSON), present while held
//! ├── terminal.lock.guard   advisory-lock target, never removed
//! └── terminal.toml         optional per-terminal config
//! ```

use std::path::{Path, PathBuf};

/// Paths owned by one terminal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TerminalPaths {
    terminal_id: String,
    dir: PathBuf,
}

impl TerminalPaths {
    pub fn new(data_root: impl AsRef<Path>, terminal_id: &str) -> Self {
        TerminalPaths {
            terminal_id: terminal_id.to_string(),
            dir: data_root.as_ref().join("terminals").join(terminal_id),
        }
    }

    pub fn terminal_id(&self) -> &str {
        &self.terminal_id
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn wal(&self) -> PathBuf {
        self.dir.join("ledger.wal")
    }

    pub fn lock(&self) -> PathBuf {
        self.dir.join("terminal.lock")
    }

    pub fn lock_guard(&self) -> PathBuf {
        self.dir.join("terminal.lock.guard")
    }

    pub fn config(&self) -> PathBuf {
        self.dir.join("terminal.toml")
    }
}
