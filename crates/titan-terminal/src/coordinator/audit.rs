//! Aggregated audit log: `shared/audit.log`, one JSON record per line,
//! appended by every terminal that answers an `AuditRequest`.

use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;
use titan_core::{Money, TerminalState};
use titan_ledger::StoreSummary;

use crate::error::{CoordinationError, CoordinationResult};

/// One line of the audit log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub request_id: String,
    pub terminal_id: String,
    pub recorded_at: DateTime<Utc>,
    pub terminal_state: TerminalState,
    pub open_transactions: usize,
    pub committed_transactions: usize,
    pub aborted_transactions: usize,
    pub reversals: usize,
    pub committed_total: Option<Money>,
    pub last_sequence: u64,
}

impl AuditRecord {
    pub fn from_summary(request_id: &str, summary: &StoreSummary) -> Self {
        AuditRecord {
            request_id: request_id.to_string(),
            terminal_id: summary.terminal_id.clone(),
            recorded_at: Utc::now(),
            terminal_state: summary.terminal_state,
            open_transactions: summary.open_transactions,
            committed_transactions: summary.committed_transactions,
            aborted_transactions: summary.aborted_transactions,
            reversals: summary.reversals,
            committed_total: summary.committed_total,
            last_sequence: summary.last_sequence,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AuditLog {
    path: PathBuf,
}

impl AuditLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        AuditLog { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends `record` as a single write so concurrent writers do not
    /// interleave within a line.
    pub fn append(&self, record: &AuditRecord) -> CoordinationResult<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| CoordinationError::io(parent, e))?;
        }

        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| CoordinationError::io(&self.path, e))?;
        file.write_all(&line)
            .and_then(|_| file.sync_data())
            .map_err(|e| CoordinationError::io(&self.path, e))
    }

    /// Every parseable record, in file order.
    pub fn records(&self) -> CoordinationResult<Vec<AuditRecord>> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(CoordinationError::io(&self.path, e)),
        };

        Ok(contents
            .lines()
            .filter(|line| !line.trim().is_empty())
            .filter_map(|line| match serde_json::from_str(line) {
                Ok(record) => Some(record),
                Err(e) => {
                    warn!(error = %e, "Skipping unreadable audit line");
                    None
                }
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn summary(terminal_id: &str) -> StoreSummary {
        StoreSummary {
            terminal_id: terminal_id.into(),
            terminal_state: TerminalState::Active,
            open_transactions: 1,
            committed_transactions: 3,
            aborted_transactions: 0,
            reversals: 0,
            open_sessions: 0,
            committed_total: Some(Money::from_minor(2394)),
            last_sequence: 12,
            pending_wal_entries: 0,
        }
    }

    #[test]
    fn test_append_only() {
        let dir = tempfile::tempdir().unwrap();
        let log = AuditLog::new(dir.path().join("shared").join("audit.log"));
        assert!(log.records().unwrap().is_empty());

        log.append(&AuditRecord::from_summary("r-1", &summary("LANE-01"))).unwrap();
        log.append(&AuditRecord::from_summary("r-1", &summary("LANE-02"))).unwrap();

        let records = log.records().unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].terminal_id, "LANE-01");
        assert_eq!(records[1].terminal_id, "LANE-02");
        assert_eq!(records[1].committed_total, Some(Money::from_minor(2394)));
    }
}
