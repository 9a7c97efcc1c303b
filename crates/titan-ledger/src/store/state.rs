//! In-memory ledger state: a fold of WAL entries.
//!
//! `apply` is the only way state changes, for live mutations and for replay
//! alike. It re-asserts every rule the store checked before appending, so a
//! log describing an impossible history is rejected with the sequence
//! number where it went wrong.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use titan_core::{
    Currency, Session, SessionId, Transaction, TransactionId, TransactionState,
};

use crate::wal::{WalEntry, WalOp};

/// Last terminal lifecycle entry seen in the log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleMark {
    Started,
    Draining,
    Stopped,
}

/// Why an entry could not be applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplyError {
    pub sequence: u64,
    pub reason: String,
}

impl ApplyError {
    fn new(entry: &WalEntry, reason: impl Into<String>) -> Self {
        ApplyError {
            sequence: entry.sequence,
            reason: reason.into(),
        }
    }
}

/// Transactions, sessions and counters for one terminal.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LedgerState {
    transactions: BTreeMap<TransactionId, Transaction>,
    sessions: BTreeMap<SessionId, Session>,
    /// Highest transaction id ever issued (0 = none).
    last_transaction_id: u64,
    /// Highest session id ever issued (0 = none).
    last_session_id: u64,
    last_sequence: u64,
    entries_applied: u64,
    lifecycle: Option<(LifecycleMark, DateTime<Utc>)>,
}

impl LedgerState {
    // -------------------------------------------------------------------------
    // Queries
    // -------------------------------------------------------------------------

    pub fn transaction(&self, id: TransactionId) -> Option<&Transaction> {
        self.transactions.get(&id)
    }

    pub fn transactions(&self) -> impl Iterator<Item = &Transaction> {
        self.transactions.values()
    }

    pub fn session(&self, id: SessionId) -> Option<&Session> {
        self.sessions.get(&id)
    }

    pub fn sessions(&self) -> impl Iterator<Item = &Session> {
        self.sessions.values()
    }

    pub fn next_transaction_id(&self) -> TransactionId {
        TransactionId(self.last_transaction_id + 1)
    }

    pub fn next_session_id(&self) -> SessionId {
        SessionId(self.last_session_id + 1)
    }

    pub fn last_sequence(&self) -> u64 {
        self.last_sequence
    }

    pub fn entries_applied(&self) -> u64 {
        self.entries_applied
    }

    pub fn lifecycle(&self) -> Option<(LifecycleMark, DateTime<Utc>)> {
        self.lifecycle
    }

    pub fn open_transaction_ids(&self) -> Vec<TransactionId> {
        self.transactions
            .values()
            .filter(|tx| tx.is_open())
            .map(|tx| tx.id)
            .collect()
    }

    // -------------------------------------------------------------------------
    // Fold
    // -------------------------------------------------------------------------

    /// Applies one entry. On error the state is unchanged.
    pub fn apply(&mut self, entry: &WalEntry) -> Result<(), ApplyError> {
        if entry.sequence != self.last_sequence + 1 {
            return Err(ApplyError::new(
                entry,
                format!(
                    "sequence out of order: expected {}, found {}",
                    self.last_sequence + 1,
                    entry.sequence
                ),
            ));
        }

        self.apply_op(entry)?;
        self.last_sequence = entry.sequence;
        self.entries_applied += 1;
        Ok(())
    }

    fn apply_op(&mut self, entry: &WalEntry) -> Result<(), ApplyError> {
        let at = entry.timestamp;
        match &entry.op {
            WalOp::BeginTransaction {
                transaction_id,
                store_id,
                currency_code,
                decimal_places,
                session_id,
            } => {
                self.ensure_new_transaction_id(entry, *transaction_id)?;
                if let Some(session_id) = session_id {
                    let session = self.open_session_mut(entry, *session_id)?;
                    session.open_transactions.push(*transaction_id);
                }
                let currency = Currency {
                    code: currency_code.clone(),
                    decimal_places: *decimal_places,
                };
                self.transactions.insert(
                    *transaction_id,
                    Transaction::new(*transaction_id, store_id.clone(), currency, *session_id, at),
                );
                self.last_transaction_id = transaction_id.0;
            }

            WalOp::AddLine {
                transaction_id,
                line,
            }
            | WalOp::UpdateLineQuantity {
                transaction_id,
                adjustment: line,
            } => {
                let tx = self.transaction_mut(entry, *transaction_id)?;
                tx.push_line(line.clone())
                    .map_err(|e| ApplyError::new(entry, e.to_string()))?;
            }

            WalOp::VoidLine {
                transaction_id,
                voids,
            } => {
                let tx = self.transaction_mut(entry, *transaction_id)?;
                // All-or-nothing on a scratch copy.
                let mut updated = tx.clone();
                for line in voids {
                    updated
                        .push_line(line.clone())
                        .map_err(|e| ApplyError::new(entry, e.to_string()))?;
                }
                *tx = updated;
            }

            WalOp::AddTender {
                transaction_id,
                tender,
            } => {
                let tx = self.transaction_mut(entry, *transaction_id)?;
                tx.push_tender(tender.clone())
                    .map_err(|e| ApplyError::new(entry, e.to_string()))?;
            }

            WalOp::Commit {
                transaction_id,
                total_due,
                total_tendered,
                ..
            } => {
                let tx = self.transaction_mut(entry, *transaction_id)?;
                let computed_due = tx
                    .total_due()
                    .map_err(|e| ApplyError::new(entry, e.to_string()))?;
                let computed_tendered = tx
                    .total_tendered()
                    .map_err(|e| ApplyError::new(entry, e.to_string()))?;
                if computed_due != *total_due || computed_tendered != *total_tendered {
                    return Err(ApplyError::new(
                        entry,
                        format!(
                            "commit totals {}/{} do not match lines and tenders {}/{}",
                            total_due, total_tendered, computed_due, computed_tendered
                        ),
                    ));
                }
                tx.mark_committed(at)
                    .map_err(|e| ApplyError::new(entry, e.to_string()))?;
                self.release_from_session(*transaction_id);
            }

            WalOp::Abort {
                transaction_id,
                reason,
            } => {
                let tx = self.transaction_mut(entry, *transaction_id)?;
                tx.mark_aborted(at, reason.clone())
                    .map_err(|e| ApplyError::new(entry, e.to_string()))?;
                self.release_from_session(*transaction_id);
            }

            WalOp::Reversal {
                original,
                reversal_id,
                reason,
            } => {
                self.ensure_new_transaction_id(entry, *reversal_id)?;
                let source = self.transactions.get(original).ok_or_else(|| {
                    ApplyError::new(entry, format!("unknown transaction {}", original))
                })?;
                let reversal = source
                    .plan_reversal(*reversal_id, reason, at)
                    .map_err(|e| ApplyError::new(entry, e.to_string()))?;

                if let Some(source) = self.transactions.get_mut(original) {
                    source.reversed_by = Some(*reversal_id);
                }
                self.transactions.insert(*reversal_id, reversal);
                self.last_transaction_id = reversal_id.0;
            }

            WalOp::OpenSession {
                session_id,
                operator_id,
            } => {
                if session_id.0 <= self.last_session_id {
                    return Err(ApplyError::new(
                        entry,
                        format!("session id {} reused", session_id),
                    ));
                }
                self.sessions.insert(
                    *session_id,
                    Session {
                        id: *session_id,
                        operator_id: operator_id.clone(),
                        started_at: at,
                        ended_at: None,
                        open_transactions: Vec::new(),
                    },
                );
                self.last_session_id = session_id.0;
            }

            WalOp::CloseSession { session_id } => {
                let session = self.open_session_mut(entry, *session_id)?;
                if !session.open_transactions.is_empty() {
                    let open = session.open_transactions.len();
                    return Err(ApplyError::new(
                        entry,
                        format!("session {} closed with {} open transactions", session_id, open),
                    ));
                }
                session.ended_at = Some(at);
            }

            WalOp::TerminalStarted { .. } => self.lifecycle = Some((LifecycleMark::Started, at)),
            WalOp::TerminalDraining { .. } => self.lifecycle = Some((LifecycleMark::Draining, at)),
            WalOp::TerminalStopped { .. } => self.lifecycle = Some((LifecycleMark::Stopped, at)),
        }
        Ok(())
    }

    fn ensure_new_transaction_id(
        &self,
        entry: &WalEntry,
        id: TransactionId,
    ) -> Result<(), ApplyError> {
        if self.transactions.contains_key(&id) {
            return Err(ApplyError::new(entry, format!("duplicate transaction id {}", id)));
        }
        if id.0 <= self.last_transaction_id {
            return Err(ApplyError::new(
                entry,
                format!(
                    "transaction id {} not above last issued {}",
                    id, self.last_transaction_id
                ),
            ));
        }
        Ok(())
    }

    fn transaction_mut(
        &mut self,
        entry: &WalEntry,
        id: TransactionId,
    ) -> Result<&mut Transaction, ApplyError> {
        let tx = self
            .transactions
            .get_mut(&id)
            .ok_or_else(|| ApplyError::new(entry, format!("unknown transaction {}", id)))?;
        if tx.state != TransactionState::Open {
            return Err(ApplyError::new(
                entry,
                format!("{} on {} transaction {}", entry.op.name(), tx.state, id),
            ));
        }
        Ok(tx)
    }

    fn open_session_mut(
        &mut self,
        entry: &WalEntry,
        id: SessionId,
    ) -> Result<&mut Session, ApplyError> {
        let session = self
            .sessions
            .get_mut(&id)
            .ok_or_else(|| ApplyError::new(entry, format!("unknown session {}", id)))?;
        if !session.is_open() {
            return Err(ApplyError::new(entry, format!("session {} is closed", id)));
        }
        Ok(session)
    }

    fn release_from_session(&mut self, id: TransactionId) {
        let session_id = self.transactions.get(&id).and_then(|tx| tx.session_id);
        if let Some(session) = session_id.and_then(|sid| self.sessions.get_mut(&sid)) {
            session.open_transactions.retain(|open| *open != id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use titan_core::{Line, LineKind, Money};

    fn entry(sequence: u64, op: WalOp) -> WalEntry {
        WalEntry::new(sequence, Utc::now(), op)
    }

    fn begin(id: u64) -> WalOp {
        WalOp::BeginTransaction {
            transaction_id: TransactionId(id),
            store_id: "STORE_1".to_string(),
            currency_code: "USD".to_string(),
            decimal_places: 2,
            session_id: None,
        }
    }

    fn add_line(id: u64, line_number: u32) -> WalOp {
        WalOp::AddLine {
            transaction_id: TransactionId(id),
            line: Line {
                line_number,
                product_id: "COFFEE".to_string(),
                quantity: 2,
                unit_price: Money::from_minor(399),
                kind: LineKind::Sale,
                parent_line: None,
                references_line: None,
                reason: None,
                idempotency_key: None,
                created_at: Utc::now(),
            },
        }
    }

    #[test]
    fn test_fold_tracks_counters() {
        let mut state = LedgerState::default();
        state.apply(&entry(1, begin(1))).unwrap();
        state.apply(&entry(2, add_line(1, 1))).unwrap();

        assert_eq!(state.next_transaction_id(), TransactionId(2));
        assert_eq!(state.last_sequence(), 2);
        let tx = state.transaction(TransactionId(1)).unwrap();
        assert_eq!(tx.total_due().unwrap().minor(), 798);
    }

    #[test]
    fn test_sequence_gap_is_rejected() {
        let mut state = LedgerState::default();
        state.apply(&entry(1, begin(1))).unwrap();
        let err = state.apply(&entry(3, add_line(1, 1))).unwrap_err();
        assert_eq!(err.sequence, 3);
        assert!(err.reason.contains("out of order"));
    }

    #[test]
    fn test_duplicate_and_unknown_ids_are_rejected() {
        let mut state = LedgerState::default();
        state.apply(&entry(1, begin(1))).unwrap();
        assert!(state
            .apply(&entry(2, begin(1)))
            .unwrap_err()
            .reason
            .contains("duplicate"));
        assert!(state
            .apply(&entry(2, add_line(7, 1)))
            .unwrap_err()
            .reason
            .contains("unknown transaction 7"));
    }

    #[test]
    fn test_mutating_closed_transaction_is_rejected() {
        let mut state = LedgerState::default();
        state.apply(&entry(1, begin(1))).unwrap();
        state
            .apply(&entry(
                2,
                WalOp::Abort {
                    transaction_id: TransactionId(1),
                    reason: None,
                },
            ))
            .unwrap();
        let err = state.apply(&entry(3, add_line(1, 1))).unwrap_err();
        assert!(err.reason.contains("aborted"));
    }

    #[test]
    fn test_commit_totals_must_match() {
        let mut state = LedgerState::default();
        state.apply(&entry(1, begin(1))).unwrap();
        state.apply(&entry(2, add_line(1, 1))).unwrap();
        let bad = WalOp::Commit {
            transaction_id: TransactionId(1),
            total_due: Money::from_minor(100),
            total_tendered: Money::zero(),
            change: Money::zero(),
        };
        assert!(state.apply(&entry(3, bad)).is_err());
        assert!(state.transaction(TransactionId(1)).unwrap().is_open());
    }
}
