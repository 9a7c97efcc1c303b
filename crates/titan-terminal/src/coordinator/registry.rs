//! Shared registry of running terminals: one JSON file per terminal in
//! `shared/registry/`, published by write-temp-then-rename.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use titan_core::TerminalState;

use super::write_atomic;
use crate::error::{CoordinationError, CoordinationResult};

/// What a terminal publishes about itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryEntry {
    pub terminal_id: String,
    pub pid: u32,
    pub hostname: String,
    pub started_at: DateTime<Utc>,
    pub data_dir: PathBuf,
    pub state: TerminalState,
    pub updated_at: DateTime<Utc>,
}

impl RegistryEntry {
    /// Entry for the current process.
    pub fn new(
        terminal_id: &str,
        pid: u32,
        started_at: DateTime<Utc>,
        data_dir: impl Into<PathBuf>,
        state: TerminalState,
    ) -> Self {
        RegistryEntry {
            terminal_id: terminal_id.to_string(),
            pid,
            hostname: titan_ledger::lock::hostname(),
            started_at,
            data_dir: data_dir.into(),
            state,
            updated_at: Utc::now(),
        }
    }
}

/// Reader/writer for `shared/registry/`.
#[derive(Debug, Clone)]
pub struct Registry {
    dir: PathBuf,
}

impl Registry {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Registry { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn entry_path(&self, terminal_id: &str) -> PathBuf {
        self.dir.join(format!("{}.json", terminal_id))
    }

    /// Publishes (or replaces) the entry for `entry.terminal_id`.
    pub fn register(&self, entry: &RegistryEntry) -> CoordinationResult<()> {
        fs::create_dir_all(&self.dir).map_err(|e| CoordinationError::io(&self.dir, e))?;
        let bytes = serde_json::to_vec_pretty(entry)?;
        write_atomic(&self.entry_path(&entry.terminal_id), &bytes)?;

        debug!(
            terminal_id = %entry.terminal_id,
            pid = entry.pid,
            state = %entry.state,
            "Registry entry published"
        );
        Ok(())
    }

    /// Rewrites the state of an existing entry. Returns false if there is
    /// no entry.
    pub fn update_state(&self, terminal_id: &str, state: TerminalState) -> CoordinationResult<bool> {
        let Some(mut entry) = self.get(terminal_id)? else {
            return Ok(false);
        };
        entry.state = state;
        entry.updated_at = Utc::now();
        self.register(&entry)?;
        Ok(true)
    }

    /// Removes the entry. Returns false if there was none.
    pub fn unregister(&self, terminal_id: &str) -> CoordinationResult<bool> {
        let path = self.entry_path(terminal_id);
        match fs::remove_file(&path) {
            Ok(()) => {
                debug!(terminal_id, "Registry entry removed");
                Ok(true)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(CoordinationError::io(path, e)),
        }
    }

    pub fn get(&self, terminal_id: &str) -> CoordinationResult<Option<RegistryEntry>> {
        let path = self.entry_path(terminal_id);
        match fs::read(&path) {
            Ok(bytes) => serde_json::from_slice(&bytes).map(Some).map_err(|e| {
                CoordinationError::Malformed {
                    what: "registry entry",
                    path,
                    reason: e.to_string(),
                }
            }),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(CoordinationError::io(path, e)),
        }
    }

    /// Every readable entry, sorted by terminal id. Temp files and
    /// malformed entries are skipped.
    pub fn list(&self) -> CoordinationResult<Vec<RegistryEntry>> {
        let listing = match fs::read_dir(&self.dir) {
            Ok(listing) => listing,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(CoordinationError::io(&self.dir, e)),
        };

        let mut entries = Vec::new();
        for item in listing {
            let path = item.map_err(|e| CoordinationError::io(&self.dir, e))?.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if name.starts_with('.') || !name.ends_with(".json") {
                continue;
            }

            let bytes = match fs::read(&path) {
                Ok(bytes) => bytes,
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(CoordinationError::io(&path, e)),
            };
            match serde_json::from_slice::<RegistryEntry>(&bytes) {
                Ok(entry) => entries.push(entry),
                Err(e) => warn!(path = %path.display(), error = %e, "Skipping malformed registry entry"),
            }
        }

        entries.sort_by(|a, b| a.terminal_id.cmp(&b.terminal_id));
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(id: &str) -> RegistryEntry {
        RegistryEntry::new(id, 4242, Utc::now(), "/srv/titan/terminals/x", TerminalState::Active)
    }

    #[test]
    fn test_register_list_unregister() {
        let dir = tempfile::tempdir().unwrap();
        let registry = Registry::new(dir.path().join("registry"));
        assert!(registry.list().unwrap().is_empty());

        registry.register(&entry("LANE-02")).unwrap();
        registry.register(&entry("LANE-01")).unwrap();

        let ids: Vec<String> = registry
            .list()
            .unwrap()
            .into_iter()
            .map(|e| e.terminal_id)
            .collect();
        assert_eq!(ids, vec!["LANE-01", "LANE-02"]);

        assert!(registry.unregister("LANE-01").unwrap());
        assert!(!registry.unregister("LANE-01").unwrap());
        assert_eq!(registry.list().unwrap().len(), 1);
    }

    #[test]
    fn test_publish_leaves_no_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        let registry = Registry::new(dir.path());
        for _ in 0..3 {
            registry.register(&entry("LANE-01")).unwrap();
        }

        let names: Vec<String> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["LANE-01.json"]);
    }

    #[test]
    fn test_list_skips_temp_and_malformed() {
        let dir = tempfile::tempdir().unwrap();
        let registry = Registry::new(dir.path());
        registry.register(&entry("LANE-01")).unwrap();
        fs::write(dir.path().join(".LANE-02.json.tmp"), b"{").unwrap();
        fs::write(dir.path().join("LANE-03.json"), b"garbage").unwrap();

        let listed = registry.list().unwrap();
        assert_eq!(listed.len(), 1);
        assert!(matches!(
            registry.get("LANE-03"),
            Err(CoordinationError::Malformed { .. })
        ));
    }

    #[test]
    fn test_update_state() {
        let dir = tempfile::tempdir().unwrap();
        let registry = Registry::new(dir.path());
        assert!(!registry.update_state("LANE-01", TerminalState::Draining).unwrap());

        registry.register(&entry("LANE-01")).unwrap();
        assert!(registry.update_state("LANE-01", TerminalState::Draining).unwrap());
        assert_eq!(
            registry.get("LANE-01").unwrap().unwrap().state,
            TerminalState::Draining
        );
    }
}
