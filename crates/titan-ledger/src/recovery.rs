//! # Recovery Engine
//!
//! Replays the WAL at startup to rebuild in-memory state.
//!
//! ## Outcomes
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  ledger.wal                                                             │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  WalReader::entries() ──► LedgerState::apply (same fold as live path)  │
//! │       │                         │                                       │
//! │       │                         └── apply fails ──► RecoveryError::     │
//! │       │                                             Inconsistent        │
//! │       │                                             (terminal stays     │
//! │       │                                              down)              │
//! │       ▼                                                                 │
//! │  corrupt tail? ──► warn + report.truncated_tail (writer truncates it)  │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  Open transactions ──► report.incomplete                               │
//! │                        (never auto-committed, never auto-aborted)       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Replay is deterministic: every timestamp comes from the entries, so two
//! runs over the same log produce identical state.

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};
use titan_core::{Money, SessionId, TransactionId};

use crate::error::RecoveryError;
use crate::store::state::{LedgerState, LifecycleMark};
use crate::wal::{CorruptTail, WalReader};

/// A transaction that was still open when the log ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IncompleteTransaction {
    pub transaction_id: TransactionId,
    pub store_id: String,
    pub session_id: Option<SessionId>,
    pub line_count: usize,
    pub tender_count: usize,
    pub total_due: Money,
    pub total_tendered: Money,
    pub created_at: DateTime<Utc>,
}

/// What recovery found.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RecoveryReport {
    pub entries_replayed: u64,
    pub last_sequence: u64,
    /// Present when the log ended in a torn or corrupt entry.
    #[serde(skip)]
    pub truncated_tail: Option<CorruptTail>,
    pub incomplete: Vec<IncompleteTransaction>,
    pub open_sessions: Vec<SessionId>,
    /// The previous run logged TerminalStopped as its last lifecycle entry.
    pub previous_shutdown_clean: bool,
}

impl RecoveryReport {
    pub fn is_clean(&self) -> bool {
        self.truncated_tail.is_none() && self.incomplete.is_empty()
    }
}

/// Replays the WAL at `path` into a fresh state.
///
/// A missing file is an empty log.
pub fn recover(path: &Path) -> Result<(LedgerState, RecoveryReport), RecoveryError> {
    let reader = WalReader::new(path);
    let mut entries = reader.entries()?;
    let mut state = LedgerState::default();

    for entry in entries.by_ref() {
        let entry = entry?;
        state
            .apply(&entry)
            .map_err(|e| RecoveryError::Inconsistent {
                sequence: e.sequence,
                reason: e.reason,
            })?;
    }

    let truncated_tail = entries.tail().cloned();
    if let Some(tail) = &truncated_tail {
        warn!(
            path = %path.display(),
            offset = tail.offset,
            line = tail.line,
            discarded_bytes = tail.discarded_bytes,
            reason = %tail.reason,
            "WAL ends in a corrupt entry; everything after it is discarded"
        );
    }

    let incomplete = incomplete_transactions(&state)?;
    for tx in &incomplete {
        warn!(
            transaction_id = %tx.transaction_id,
            lines = tx.line_count,
            tenders = tx.tender_count,
            "Incomplete transaction found during recovery"
        );
    }

    let report = RecoveryReport {
        entries_replayed: state.entries_applied(),
        last_sequence: state.last_sequence(),
        truncated_tail,
        incomplete,
        open_sessions: state
            .sessions()
            .filter(|s| s.is_open())
            .map(|s| s.id)
            .collect(),
        previous_shutdown_clean: matches!(state.lifecycle(), None | Some((LifecycleMark::Stopped, _))),
    };

    info!(
        path = %path.display(),
        entries = report.entries_replayed,
        last_sequence = report.last_sequence,
        incomplete = report.incomplete.len(),
        clean_shutdown = report.previous_shutdown_clean,
        "WAL recovery complete"
    );
    Ok((state, report))
}

/// The fold only admits lines and tenders whose totals fit, so a total
/// that cannot be computed here means the state itself is inconsistent.
fn incomplete_transactions(state: &LedgerState) -> Result<Vec<IncompleteTransaction>, RecoveryError> {
    state
        .transactions()
        .filter(|tx| tx.is_open())
        .map(|tx| {
            let totals = tx.total_due().and_then(|due| Ok((due, tx.total_tendered()?)));
            let (total_due, total_tendered) = totals.map_err(|e| RecoveryError::Inconsistent {
                sequence: state.last_sequence(),
                reason: format!("transaction {}: {}", tx.id, e),
            })?;
            Ok(IncompleteTransaction {
                transaction_id: tx.id,
                store_id: tx.store_id.clone(),
                session_id: tx.session_id,
                line_count: tx.lines.len(),
                tender_count: tx.tenders.len(),
                total_due,
                total_tendered,
                created_at: tx.created_at,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wal::{Durability, SyncPolicy, WalOp, WalWriter};
    use std::fs::OpenOptions;
    use std::io::Write;
    use titan_core::TransactionState;

    fn begin(id: u64) -> WalOp {
        WalOp::BeginTransaction {
            transaction_id: TransactionId(id),
            store_id: "STORE_1".to_string(),
            currency_code: "USD".to_string(),
            decimal_places: 2,
            session_id: None,
        }
    }

    fn abort(id: u64) -> WalOp {
        WalOp::Abort {
            transaction_id: TransactionId(id),
            reason: None,
        }
    }

    #[test]
    fn test_empty_log() {
        let dir = tempfile::tempdir().unwrap();
        let (state, report) = recover(&dir.path().join("ledger.wal")).unwrap();
        assert_eq!(report.entries_replayed, 0);
        assert!(report.is_clean());
        assert!(report.previous_shutdown_clean);
        assert_eq!(state.next_transaction_id(), TransactionId(1));
    }

    #[test]
    fn test_open_transactions_are_reported_not_resolved() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.wal");
        {
            let mut wal = WalWriter::open(&path, SyncPolicy::EveryAppend).unwrap();
            wal.append(begin(1), Durability::Immediate).unwrap();
            wal.append(begin(2), Durability::Immediate).unwrap();
            wal.append(abort(2), Durability::Immediate).unwrap();
        }

        let (state, report) = recover(&path).unwrap();
        assert_eq!(report.entries_replayed, 3);
        assert_eq!(report.incomplete.len(), 1);
        assert_eq!(report.incomplete[0].transaction_id, TransactionId(1));
        assert_eq!(
            state.transaction(TransactionId(1)).unwrap().state,
            TransactionState::Open
        );
        assert_eq!(state.next_transaction_id(), TransactionId(3));
        assert!(report.previous_shutdown_clean);
    }

    #[test]
    fn test_corrupt_tail_is_a_warning() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.wal");
        {
            let mut wal = WalWriter::open(&path, SyncPolicy::EveryAppend).unwrap();
            wal.append(begin(1), Durability::Immediate).unwrap();
        }
        {
            let mut f = OpenOptions::new().append(true).open(&path).unwrap();
            f.write_all(b"00000010 0000").unwrap();
        }

        let (_, report) = recover(&path).unwrap();
        assert_eq!(report.entries_replayed, 1);
        assert!(report.truncated_tail.is_some());
        assert!(!report.is_clean());
    }

    #[test]
    fn test_inconsistent_log_blocks_startup() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.wal");
        {
            let mut wal = WalWriter::open(&path, SyncPolicy::EveryAppend).unwrap();
            wal.append(begin(1), Durability::Immediate).unwrap();
            wal.append(abort(1), Durability::Immediate).unwrap();
            wal.append(abort(1), Durability::Immediate).unwrap();
        }

        match recover(&path) {
            Err(RecoveryError::Inconsistent { sequence, .. }) => assert_eq!(sequence, 3),
            other => panic!("expected Inconsistent, got {:?}", other.map(|(_, r)| r)),
        }
    }

    #[test]
    fn test_unrepresentable_totals_block_startup() {
        use titan_core::{Line, LineKind};

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.wal");
        {
            let mut wal = WalWriter::open(&path, SyncPolicy::EveryAppend).unwrap();
            wal.append(begin(1), Durability::Immediate).unwrap();
            let line = Line {
                line_number: 1,
                product_id: "GOLD".to_string(),
                quantity: 2,
                unit_price: Money::from_minor(i64::MAX),
                kind: LineKind::Sale,
                parent_line: None,
                references_line: None,
                reason: None,
                idempotency_key: None,
                created_at: Utc::now(),
            };
            wal.append(
                WalOp::AddLine {
                    transaction_id: TransactionId(1),
                    line,
                },
                Durability::Immediate,
            )
            .unwrap();
        }

        match recover(&path) {
            Err(RecoveryError::Inconsistent { sequence, .. }) => assert_eq!(sequence, 2),
            other => panic!("expected Inconsistent, got {:?}", other.map(|(_, r)| r)),
        }
    }

    #[test]
    fn test_recovery_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.wal");
        {
            let mut wal = WalWriter::open(&path, SyncPolicy::EveryAppend).unwrap();
            wal.append(begin(1), Durability::Immediate).unwrap();
            wal.append(begin(2), Durability::Immediate).unwrap();
        }

        let (first, first_report) = recover(&path).unwrap();
        let (second, second_report) = recover(&path).unwrap();
        let a: Vec<_> = first.transactions().cloned().collect();
        let b: Vec<_> = second.transactions().cloned().collect();
        assert_eq!(a, b);
        assert_eq!(first_report.incomplete, second_report.incomplete);
        assert_eq!(first.next_transaction_id(), second.next_transaction_id());
    }
}
