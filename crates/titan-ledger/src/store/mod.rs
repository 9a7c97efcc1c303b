//! # Transaction Store
//!
//! In-memory model of one terminal's transactions and sessions, kept in
//! step with the WAL.
//!
//! ## Mutation Path
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  store.add_line(tx, "COFFEE", 2, 399)                                   │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  validate arguments (titan_core::validation)      ── Err: nothing logged│
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  write lock ─► check state rules (Transaction::check_*) ── Err: same    │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  WalWriter::append(op)   ── DurabilityError: rebuild from disk, Err     │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  LedgerState::apply(&entry)   (the fold recovery uses)                  │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  Ok(line_number)                                                        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Concurrency
//! One `RwLock`: mutations take the write guard (so WAL order equals
//! application order), reads take the read guard and run concurrently.
//! A poisoned lock is recovered: state only changes after a successful
//! append, so a panic elsewhere never leaves it half-applied.

pub mod state;

use std::path::{Path, PathBuf};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, error, info, warn};
use titan_core::validation::{
    validate_currency_code, validate_decimal_places, validate_idempotency_key,
    validate_operator_id, validate_product_id, validate_quantity, validate_reason,
    validate_store_id, validate_tender_amount, validate_tender_kind, validate_unit_price,
};
use titan_core::{
    CommitSummary, CoreError, Line, LineKind, Money, Session, SessionId, Tender, TenderKind,
    TerminalState, Transaction, TransactionId, TransactionSnapshot, TransactionState,
};

use crate::error::{LedgerError, LedgerResult, RecoveryError};
use crate::recovery::{self, RecoveryReport};
use crate::wal::{SyncPolicy, WalOp, WalWriter};
use state::LedgerState;

// =============================================================================
// Options
// =============================================================================

/// Store behaviour switches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StoreOptions {
    pub sync_policy: SyncPolicy,
    /// Allow commit with total tendered below total due.
    pub partial_payment: bool,
}

// =============================================================================
// Summary
// =============================================================================

/// Counts for status displays and audit lines.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoreSummary {
    pub terminal_id: String,
    pub terminal_state: TerminalState,
    pub open_transactions: usize,
    pub committed_transactions: usize,
    pub aborted_transactions: usize,
    pub reversals: usize,
    pub open_sessions: usize,
    /// Sum of committed totals; `None` if it does not fit in i64 minor units.
    pub committed_total: Option<Money>,
    pub last_sequence: u64,
    pub pending_wal_entries: usize,
}

// =============================================================================
// Store
// =============================================================================

struct Inner {
    state: LedgerState,
    wal: WalWriter,
    terminal_state: TerminalState,
    /// Open transactions found by recovery.
    recovered_incomplete: Vec<TransactionId>,
}

/// The transaction store for one terminal.
pub struct TransactionStore {
    terminal_id: String,
    wal_path: PathBuf,
    options: StoreOptions,
    inner: RwLock<Inner>,
}

impl TransactionStore {
    /// Replays the WAL at `wal_path` and opens it for appending.
    ///
    /// The store starts in `Initializing`; it accepts transactions, and
    /// `mark_started` moves it to `Active`.
    pub fn open(
        terminal_id: &str,
        wal_path: impl AsRef<Path>,
        options: StoreOptions,
    ) -> LedgerResult<(Self, RecoveryReport)> {
        let wal_path = wal_path.as_ref().to_path_buf();
        let (state, report) = recovery::recover(&wal_path)?;
        let wal = WalWriter::open(&wal_path, options.sync_policy)?;

        let store = TransactionStore {
            terminal_id: terminal_id.to_string(),
            wal_path,
            options,
            inner: RwLock::new(Inner {
                state,
                wal,
                terminal_state: TerminalState::Initializing,
                recovered_incomplete: report
                    .incomplete
                    .iter()
                    .map(|tx| tx.transaction_id)
                    .collect(),
            }),
        };
        Ok((store, report))
    }

    pub fn terminal_id(&self) -> &str {
        &self.terminal_id
    }

    pub fn wal_path(&self) -> &Path {
        &self.wal_path
    }

    pub fn options(&self) -> StoreOptions {
        self.options
    }

    fn read(&self) -> RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(|e| e.into_inner())
    }

    // -------------------------------------------------------------------------
    // Transactions
    // -------------------------------------------------------------------------

    /// Opens a new transaction and returns its handle.
    pub fn begin_transaction(
        &self,
        store_id: &str,
        currency_code: &str,
        decimal_places: u8,
    ) -> LedgerResult<TransactionId> {
        self.begin(None, store_id, currency_code, decimal_places)
    }

    /// Opens a new transaction owned by an open session.
    pub fn begin_transaction_in_session(
        &self,
        session_id: SessionId,
        store_id: &str,
        currency_code: &str,
        decimal_places: u8,
    ) -> LedgerResult<TransactionId> {
        self.begin(Some(session_id), store_id, currency_code, decimal_places)
    }

    fn begin(
        &self,
        session_id: Option<SessionId>,
        store_id: &str,
        currency_code: &str,
        decimal_places: u8,
    ) -> LedgerResult<TransactionId> {
        let store_id = validate_store_id(store_id)?;
        let currency_code = validate_currency_code(currency_code)?;
        validate_decimal_places(decimal_places)?;

        let mut inner = self.write();
        inner.ensure_accepting()?;
        if let Some(session_id) = session_id {
            inner.open_session(session_id)?;
        }

        let transaction_id = inner.state.next_transaction_id();
        inner.log(WalOp::BeginTransaction {
            transaction_id,
            store_id: store_id.clone(),
            currency_code: currency_code.clone(),
            decimal_places,
            session_id,
        })?;

        debug!(
            terminal_id = %self.terminal_id,
            transaction_id = %transaction_id,
            store_id = %store_id,
            currency = %currency_code,
            "Transaction begun"
        );
        Ok(transaction_id)
    }

    /// Appends a sale line. Returns its 1-based line number.
    pub fn add_line(
        &self,
        transaction_id: TransactionId,
        product_id: &str,
        quantity: i64,
        unit_price_minor: i64,
    ) -> LedgerResult<u32> {
        self.add_sale_line(transaction_id, None, None, product_id, quantity, unit_price_minor)
    }

    /// Idempotent `add_line`: a repeated key returns the existing line
    /// number without logging anything.
    pub fn add_line_with_key(
        &self,
        transaction_id: TransactionId,
        idempotency_key: &str,
        product_id: &str,
        quantity: i64,
        unit_price_minor: i64,
    ) -> LedgerResult<u32> {
        self.add_sale_line(
            transaction_id,
            Some(idempotency_key),
            None,
            product_id,
            quantity,
            unit_price_minor,
        )
    }

    /// Appends a sale line linked to an existing sale line (modifiers,
    /// bundle components). Voiding the parent voids it too.
    pub fn add_child_line(
        &self,
        transaction_id: TransactionId,
        parent_line: u32,
        product_id: &str,
        quantity: i64,
        unit_price_minor: i64,
    ) -> LedgerResult<u32> {
        self.add_sale_line(
            transaction_id,
            None,
            Some(parent_line),
            product_id,
            quantity,
            unit_price_minor,
        )
    }

    fn add_sale_line(
        &self,
        transaction_id: TransactionId,
        idempotency_key: Option<&str>,
        parent_line: Option<u32>,
        product_id: &str,
        quantity: i64,
        unit_price_minor: i64,
    ) -> LedgerResult<u32> {
        let product_id = validate_product_id(product_id)?;
        validate_quantity(quantity)?;
        validate_unit_price(unit_price_minor)?;
        if let Some(key) = idempotency_key {
            validate_idempotency_key(key)?;
        }

        let mut inner = self.write();
        inner.ensure_not_stopped()?;
        let tx = inner.transaction(transaction_id)?;

        if let Some(existing) = idempotency_key.and_then(|key| tx.line_by_key(key)) {
            debug!(
                transaction_id = %transaction_id,
                line_number = existing.line_number,
                "Duplicate add_line key, returning existing line"
            );
            return Ok(existing.line_number);
        }

        tx.check_add_line(parent_line)?;
        let line = Line {
            line_number: tx.next_line_number(),
            product_id,
            quantity,
            unit_price: Money::from_minor(unit_price_minor),
            kind: LineKind::Sale,
            parent_line,
            references_line: None,
            reason: None,
            idempotency_key: idempotency_key.map(str::to_string),
            created_at: Utc::now(),
        };
        tx.check_totals_after(std::slice::from_ref(&line), &[])?;
        let line_number = line.line_number;

        inner.log(WalOp::AddLine {
            transaction_id,
            line,
        })?;
        Ok(line_number)
    }

    /// Voids a sale line and, cascading, its child lines.
    ///
    /// Returns the numbers of the appended void lines (children first).
    pub fn void_line(
        &self,
        transaction_id: TransactionId,
        line_number: u32,
        reason: &str,
    ) -> LedgerResult<Vec<u32>> {
        let reason = validate_reason(reason)?;

        let mut inner = self.write();
        inner.ensure_not_stopped()?;
        let voids = inner
            .transaction(transaction_id)?
            .plan_void(line_number, &reason, Utc::now())?;
        let numbers: Vec<u32> = voids.iter().map(|l| l.line_number).collect();

        inner.log(WalOp::VoidLine {
            transaction_id,
            voids,
        })?;

        info!(
            transaction_id = %transaction_id,
            line_number,
            cascaded = numbers.len() - 1,
            reason = %reason,
            "Line voided"
        );
        Ok(numbers)
    }

    /// Moves a sale line to `new_quantity` with an adjustment line.
    ///
    /// Returns the adjustment line number, or `None` if nothing changed.
    pub fn update_line_quantity(
        &self,
        transaction_id: TransactionId,
        line_number: u32,
        new_quantity: i64,
    ) -> LedgerResult<Option<u32>> {
        validate_quantity(new_quantity)?;

        let mut inner = self.write();
        inner.ensure_not_stopped()?;
        let adjustment = inner
            .transaction(transaction_id)?
            .plan_quantity_update(line_number, new_quantity, Utc::now())?;

        let Some(adjustment) = adjustment else {
            return Ok(None);
        };
        let adjustment_number = adjustment.line_number;
        inner.log(WalOp::UpdateLineQuantity {
            transaction_id,
            adjustment,
        })?;
        Ok(Some(adjustment_number))
    }

    /// Records a tender. Returns its 1-based tender number.
    pub fn add_tender(
        &self,
        transaction_id: TransactionId,
        amount_minor: i64,
        tender_kind: &str,
    ) -> LedgerResult<u32> {
        self.record_tender(transaction_id, None, amount_minor, tender_kind)
    }

    /// Idempotent `add_tender`.
    pub fn add_tender_with_key(
        &self,
        transaction_id: TransactionId,
        idempotency_key: &str,
        amount_minor: i64,
        tender_kind: &str,
    ) -> LedgerResult<u32> {
        self.record_tender(transaction_id, Some(idempotency_key), amount_minor, tender_kind)
    }

    fn record_tender(
        &self,
        transaction_id: TransactionId,
        idempotency_key: Option<&str>,
        amount_minor: i64,
        tender_kind: &str,
    ) -> LedgerResult<u32> {
        validate_tender_amount(amount_minor)?;
        let kind = validate_tender_kind(tender_kind)?;
        if let Some(key) = idempotency_key {
            validate_idempotency_key(key)?;
        }

        let mut inner = self.write();
        inner.ensure_not_stopped()?;
        let tx = inner.transaction(transaction_id)?;

        if let Some(existing) = idempotency_key.and_then(|key| tx.tender_by_key(key)) {
            return Ok(existing.tender_number);
        }

        tx.check_add_tender()?;
        let tender = Tender {
            tender_number: tx.next_tender_number(),
            amount: Money::from_minor(amount_minor),
            kind: TenderKind::new(&kind),
            idempotency_key: idempotency_key.map(str::to_string),
            created_at: Utc::now(),
        };
        tx.check_totals_after(&[], std::slice::from_ref(&tender))?;
        let tender_number = tender.tender_number;

        inner.log(WalOp::AddTender {
            transaction_id,
            tender,
        })?;
        Ok(tender_number)
    }

    /// Finalizes a transaction. Always forces the WAL to disk.
    pub fn commit(&self, transaction_id: TransactionId) -> LedgerResult<CommitSummary> {
        let mut inner = self.write();
        inner.ensure_not_stopped()?;
        let summary = inner
            .transaction(transaction_id)?
            .settle(self.options.partial_payment)?;

        inner.log(WalOp::Commit {
            transaction_id,
            total_due: summary.total_due,
            total_tendered: summary.total_tendered,
            change: summary.change,
        })?;

        info!(
            terminal_id = %self.terminal_id,
            transaction_id = %transaction_id,
            total_due = summary.total_due.minor(),
            total_tendered = summary.total_tendered.minor(),
            change = summary.change.minor(),
            "Transaction committed"
        );
        Ok(summary)
    }

    /// Cancels an open transaction. History is retained.
    pub fn abort(&self, transaction_id: TransactionId, reason: &str) -> LedgerResult<()> {
        let reason = validate_reason(reason)?;

        let mut inner = self.write();
        inner.ensure_not_stopped()?;
        inner.transaction(transaction_id)?.ensure_open("abort")?;

        inner.log(WalOp::Abort {
            transaction_id,
            reason: (!reason.is_empty()).then_some(reason),
        })?;

        info!(transaction_id = %transaction_id, "Transaction aborted");
        Ok(())
    }

    /// Creates the committed compensating transaction for a committed one.
    ///
    /// Returns the new transaction's handle. A transaction can be reversed
    /// at most once.
    pub fn reverse_transaction(
        &self,
        transaction_id: TransactionId,
        reason: &str,
    ) -> LedgerResult<TransactionId> {
        let reason = validate_reason(reason)?;

        let mut inner = self.write();
        inner.ensure_accepting()?;
        let reversal_id = inner.state.next_transaction_id();
        inner
            .transaction(transaction_id)?
            .plan_reversal(reversal_id, &reason, Utc::now())?;

        inner.log(WalOp::Reversal {
            original: transaction_id,
            reversal_id,
            reason: reason.clone(),
        })?;

        info!(
            transaction_id = %transaction_id,
            reversal_id = %reversal_id,
            reason = %reason,
            "Transaction reversed"
        );
        Ok(reversal_id)
    }

    /// Aborts every in-flight transaction (shutdown deadline). Returns
    /// their ids.
    ///
    /// Incomplete transactions found by recovery stay open: they are left
    /// for the operator to commit or abort.
    pub fn abort_open_transactions(&self, reason: &str) -> LedgerResult<Vec<TransactionId>> {
        let reason = validate_reason(reason)?;

        let mut inner = self.write();
        let open = inner.in_flight();
        for transaction_id in &open {
            inner.log(WalOp::Abort {
                transaction_id: *transaction_id,
                reason: Some(reason.clone()),
            })?;
            warn!(transaction_id = %transaction_id, reason = %reason, "Open transaction aborted");
        }
        Ok(open)
    }

    // -------------------------------------------------------------------------
    // Reads
    // -------------------------------------------------------------------------

    /// Read-only snapshot of one transaction.
    pub fn get_transaction(&self, transaction_id: TransactionId) -> LedgerResult<TransactionSnapshot> {
        let inner = self.read();
        Ok(inner.transaction(transaction_id)?.snapshot()?)
    }

    pub fn open_transactions(&self) -> LedgerResult<Vec<TransactionSnapshot>> {
        let inner = self.read();
        inner
            .state
            .transactions()
            .filter(|tx| tx.is_open())
            .map(|tx| tx.snapshot().map_err(LedgerError::from))
            .collect()
    }

    /// Open transactions begun since this store was opened.
    pub fn in_flight_transactions(&self) -> Vec<TransactionId> {
        self.read().in_flight()
    }

    /// Transactions recovery found open that are still open.
    pub fn incomplete_transactions(&self) -> Vec<TransactionId> {
        let inner = self.read();
        inner
            .recovered_incomplete
            .iter()
            .copied()
            .filter(|id| inner.state.transaction(*id).map_or(false, Transaction::is_open))
            .collect()
    }

    pub fn summary(&self) -> StoreSummary {
        let inner = self.read();
        let mut summary = StoreSummary {
            terminal_id: self.terminal_id.clone(),
            terminal_state: inner.terminal_state,
            open_transactions: 0,
            committed_transactions: 0,
            aborted_transactions: 0,
            reversals: 0,
            open_sessions: inner.state.sessions().filter(|s| s.is_open()).count(),
            committed_total: Some(Money::zero()),
            last_sequence: inner.state.last_sequence(),
            pending_wal_entries: inner.wal.pending_entries(),
        };
        for tx in inner.state.transactions() {
            match tx.state {
                TransactionState::Open => summary.open_transactions += 1,
                TransactionState::Committed => {
                    summary.committed_transactions += 1;
                    if tx.reverses.is_some() {
                        summary.reversals += 1;
                    }
                    summary.committed_total = summary
                        .committed_total
                        .and_then(|sum| tx.total_due().and_then(|total| sum.checked_add(total)).ok());
                }
                TransactionState::Aborted => summary.aborted_transactions += 1,
            }
        }
        if summary.committed_total.is_none() {
            warn!(terminal_id = %self.terminal_id, "Committed total exceeds i64 minor units");
        }
        summary
    }

    pub fn terminal_state(&self) -> TerminalState {
        self.read().terminal_state
    }

    // -------------------------------------------------------------------------
    // Sessions
    // -------------------------------------------------------------------------

    pub fn open_session(&self, operator_id: &str) -> LedgerResult<SessionId> {
        let operator_id = validate_operator_id(operator_id)?;

        let mut inner = self.write();
        inner.ensure_accepting()?;
        let session_id = inner.state.next_session_id();
        inner.log(WalOp::OpenSession {
            session_id,
            operator_id: operator_id.clone(),
        })?;

        info!(session_id = %session_id, operator_id = %operator_id, "Session opened");
        Ok(session_id)
    }

    /// Ends a session. Rejected while it owns open transactions.
    pub fn close_session(&self, session_id: SessionId) -> LedgerResult<()> {
        let mut inner = self.write();
        inner.ensure_not_stopped()?;
        let open = inner.open_session(session_id)?.open_transactions.len();
        if open > 0 {
            return Err(CoreError::SessionHasOpenTransactions { session_id, open }.into());
        }

        inner.log(WalOp::CloseSession { session_id })?;
        info!(session_id = %session_id, "Session closed");
        Ok(())
    }

    pub fn get_session(&self, session_id: SessionId) -> LedgerResult<Session> {
        let inner = self.read();
        inner
            .state
            .session(session_id)
            .cloned()
            .ok_or_else(|| CoreError::SessionNotFound(session_id).into())
    }

    // -------------------------------------------------------------------------
    // Lifecycle
    // -------------------------------------------------------------------------

    /// Logs TerminalStarted and moves to Active.
    pub fn mark_started(&self) -> LedgerResult<()> {
        let mut inner = self.write();
        inner.log(WalOp::TerminalStarted {
            terminal_id: self.terminal_id.clone(),
            pid: std::process::id(),
        })?;
        inner.terminal_state = TerminalState::Active;
        Ok(())
    }

    /// Stops accepting new transactions. Idempotent.
    pub fn begin_drain(&self) -> LedgerResult<()> {
        let mut inner = self.write();
        if matches!(
            inner.terminal_state,
            TerminalState::Draining | TerminalState::Stopped
        ) {
            return Ok(());
        }
        inner.log(WalOp::TerminalDraining {
            terminal_id: self.terminal_id.clone(),
        })?;
        inner.terminal_state = TerminalState::Draining;
        info!(terminal_id = %self.terminal_id, "Terminal draining");
        Ok(())
    }

    /// Logs TerminalStopped (flushing everything) and rejects all further
    /// mutations. Idempotent.
    pub fn mark_stopped(&self) -> LedgerResult<()> {
        let mut inner = self.write();
        if inner.terminal_state == TerminalState::Stopped {
            return Ok(());
        }
        inner.log(WalOp::TerminalStopped {
            terminal_id: self.terminal_id.clone(),
        })?;
        inner.terminal_state = TerminalState::Stopped;
        Ok(())
    }

    /// Forces buffered WAL entries to disk.
    pub fn flush(&self) -> LedgerResult<()> {
        let mut inner = self.write();
        let result = inner.wal.flush();
        inner.settle_durability(result)
    }

    /// Flushes if the buffer age threshold has passed. Returns whether it did.
    pub fn flush_if_due(&self) -> LedgerResult<bool> {
        let mut inner = self.write();
        let result = inner.wal.flush_if_due();
        inner.settle_durability(result)
    }
}

impl Inner {
    fn in_flight(&self) -> Vec<TransactionId> {
        self.state
            .open_transaction_ids()
            .into_iter()
            .filter(|id| !self.recovered_incomplete.contains(id))
            .collect()
    }

    fn transaction(&self, id: TransactionId) -> Result<&Transaction, CoreError> {
        self.state
            .transaction(id)
            .ok_or(CoreError::TransactionNotFound(id))
    }

    fn open_session(&self, id: SessionId) -> Result<&Session, CoreError> {
        let session = self
            .state
            .session(id)
            .ok_or(CoreError::SessionNotFound(id))?;
        if !session.is_open() {
            return Err(CoreError::SessionClosed(id));
        }
        Ok(session)
    }

    fn ensure_accepting(&self) -> Result<(), CoreError> {
        if self.terminal_state.accepts_new_transactions() {
            Ok(())
        } else {
            Err(CoreError::NotAcceptingTransactions {
                state: self.terminal_state,
            })
        }
    }

    fn ensure_not_stopped(&self) -> Result<(), CoreError> {
        if self.terminal_state == TerminalState::Stopped {
            Err(CoreError::NotAcceptingTransactions {
                state: self.terminal_state,
            })
        } else {
            Ok(())
        }
    }

    /// Appends `op` and applies the entry as written.
    fn log(&mut self, op: WalOp) -> LedgerResult<()> {
        let durability = self.wal.policy().durability_for(&op);
        let result = self.wal.append(op, durability);
        let entry = self.settle_durability(result)?;

        self.state.apply(&entry).map_err(|e| {
            error!(
                sequence = e.sequence,
                reason = %e.reason,
                "Logged entry could not be applied"
            );
            LedgerError::Recovery(RecoveryError::Inconsistent {
                sequence: e.sequence,
                reason: e.reason,
            })
        })
    }

    /// After a failed sync the in-memory state may be ahead of the disk;
    /// rebuild it from the durable log.
    fn settle_durability<T>(
        &mut self,
        result: Result<T, crate::error::DurabilityError>,
    ) -> LedgerResult<T> {
        match result {
            Ok(value) => Ok(value),
            Err(err) => {
                if self.state.last_sequence() >= self.wal.next_sequence() {
                    let (state, _) = recovery::recover(self.wal.path())?;
                    warn!(
                        last_sequence = state.last_sequence(),
                        "In-memory state restored from durable WAL"
                    );
                    self.state = state;
                }
                Err(err.into())
            }
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DurabilityError;
    use std::sync::Arc;
    use std::time::Duration;

    fn open(dir: &Path, options: StoreOptions) -> (TransactionStore, RecoveryReport) {
        TransactionStore::open("T1", dir.join("ledger.wal"), options).unwrap()
    }

    fn store(dir: &Path) -> TransactionStore {
        open(dir, StoreOptions::default()).0
    }

    fn batched() -> StoreOptions {
        StoreOptions {
            sync_policy: SyncPolicy::Batched {
                max_buffered_entries: 100,
                max_buffer_age: Duration::from_secs(3600),
            },
            partial_payment: false,
        }
    }

    #[test]
    fn test_coffee_sale() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());

        let h = store.begin_transaction("STORE_1", "USD", 2).unwrap();
        assert_eq!(store.add_line(h, "COFFEE", 2, 399).unwrap(), 1);
        assert_eq!(store.add_tender(h, 800, "cash").unwrap(), 1);
        let summary = store.commit(h).unwrap();

        assert_eq!(summary.total_due.minor(), 798);
        assert_eq!(summary.total_tendered.minor(), 800);
        assert_eq!(summary.change.minor(), 2);

        let snap = store.get_transaction(h).unwrap();
        assert_eq!(snap.state, TransactionState::Committed);
        assert_eq!(snap.currency.code, "USD");
    }

    #[test]
    fn test_committed_state_survives_crash() {
        let dir = tempfile::tempdir().unwrap();
        let h = {
            let store = store(dir.path());
            let h = store.begin_transaction("STORE_1", "USD", 2).unwrap();
            store.add_line(h, "COFFEE", 2, 399).unwrap();
            store.add_tender(h, 800, "cash").unwrap();
            store.commit(h).unwrap();
            // No drop: simulate the process vanishing.
            std::mem::forget(store);
            h
        };

        let (store, report) = open(dir.path(), StoreOptions::default());
        assert!(report.incomplete.is_empty());
        let snap = store.get_transaction(h).unwrap();
        assert_eq!(snap.state, TransactionState::Committed);
        assert_eq!(snap.total_due.minor(), 798);
    }

    #[test]
    fn test_crash_before_commit_leaves_incomplete_transaction() {
        let dir = tempfile::tempdir().unwrap();
        let h = {
            let store = store(dir.path());
            let h = store.begin_transaction("STORE_1", "USD", 2).unwrap();
            store.add_line(h, "COFFEE", 2, 399).unwrap();
            store.add_tender(h, 800, "cash").unwrap();
            std::mem::forget(store);
            h
        };

        let (store, report) = open(dir.path(), StoreOptions::default());
        assert_eq!(report.incomplete.len(), 1);
        assert_eq!(store.incomplete_transactions(), vec![h]);

        let snap = store.get_transaction(h).unwrap();
        assert_eq!(snap.state, TransactionState::Open);
        assert_eq!(snap.lines.len(), 1);
        assert_eq!(snap.tenders.len(), 1);

        // The operator can still finish it.
        store.commit(h).unwrap();
        assert!(store.incomplete_transactions().is_empty());
    }

    #[test]
    fn test_every_durable_append_is_a_recovery_point() {
        fn checkpoint(store: &TransactionStore, points: &mut Vec<(u64, LedgerState)>) {
            let inner = store.read();
            assert_eq!(inner.wal.pending_entries(), 0);
            points.push((inner.wal.synced_len(), inner.state.clone()));
        }

        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        let mut points = Vec::new();
        checkpoint(&store, &mut points);

        store.mark_started().unwrap();
        checkpoint(&store, &mut points);
        let s = store.open_session("cashier-7").unwrap();
        checkpoint(&store, &mut points);
        let sale = store.begin_transaction_in_session(s, "STORE_1", "USD", 2).unwrap();
        checkpoint(&store, &mut points);
        store.add_line(sale, "BURGER", 1, 900).unwrap();
        checkpoint(&store, &mut points);
        store.add_child_line(sale, 1, "CHEESE", 1, 100).unwrap();
        checkpoint(&store, &mut points);
        store.add_line_with_key(sale, "k-1", "FRIES", 2, 300).unwrap();
        checkpoint(&store, &mut points);
        store.void_line(sale, 1, "wrong order").unwrap();
        checkpoint(&store, &mut points);
        store.update_line_quantity(sale, 3, 1).unwrap();
        checkpoint(&store, &mut points);
        store.add_tender_with_key(sale, "t-1", 500, "cash").unwrap();
        checkpoint(&store, &mut points);
        assert_eq!(store.commit(sale).unwrap().change.minor(), 200);
        checkpoint(&store, &mut points);
        let dropped = store.begin_transaction_in_session(s, "STORE_1", "USD", 2).unwrap();
        checkpoint(&store, &mut points);
        store.add_line(dropped, "TEA", 1, 250).unwrap();
        checkpoint(&store, &mut points);
        store.abort(dropped, "customer left").unwrap();
        checkpoint(&store, &mut points);
        store.reverse_transaction(sale, "refund").unwrap();
        checkpoint(&store, &mut points);
        store.close_session(s).unwrap();
        checkpoint(&store, &mut points);
        store.begin_drain().unwrap();
        checkpoint(&store, &mut points);
        store.mark_stopped().unwrap();
        checkpoint(&store, &mut points);

        // Each append grew the durable log.
        assert!(points.windows(2).all(|w| w[0].0 < w[1].0));

        // Cut the log right after each append and replay it.
        let wal = std::fs::read(dir.path().join("ledger.wal")).unwrap();
        assert_eq!(wal.len() as u64, points[points.len() - 1].0);
        for (i, (len, expected)) in points.iter().enumerate() {
            let prefix = dir.path().join(format!("prefix-{}.wal", i));
            std::fs::write(&prefix, &wal[..*len as usize]).unwrap();

            let (recovered, report) = recovery::recover(&prefix).unwrap();
            assert!(report.truncated_tail.is_none(), "cut point {}", i);
            assert_eq!(&recovered, expected, "cut point {}", i);
        }
    }

    #[test]
    fn test_batched_mode_only_guarantees_committed_transactions() {
        let dir = tempfile::tempdir().unwrap();
        let (open_h, committed_h) = {
            let (store, _) = open(dir.path(), batched());
            let committed = store.begin_transaction("STORE_1", "USD", 2).unwrap();
            store.add_line(committed, "COFFEE", 2, 399).unwrap();
            store.add_tender(committed, 800, "cash").unwrap();
            store.commit(committed).unwrap();

            let open_h = store.begin_transaction("STORE_1", "USD", 2).unwrap();
            store.add_line(open_h, "TEA", 1, 250).unwrap();
            assert_eq!(store.summary().pending_wal_entries, 1);
            std::mem::forget(store);
            (open_h, committed)
        };

        let (store, report) = open(dir.path(), batched());
        assert_eq!(
            store.get_transaction(committed_h).unwrap().state,
            TransactionState::Committed
        );
        // Begin was immediate, the buffered line was lost.
        let snap = store.get_transaction(open_h).unwrap();
        assert_eq!(snap.state, TransactionState::Open);
        assert!(snap.lines.is_empty());
        assert_eq!(report.incomplete.len(), 1);
    }

    #[test]
    fn test_validation_failures_log_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        let h = store.begin_transaction("STORE_1", "USD", 2).unwrap();
        let before = store.summary().last_sequence;

        for err in [
            store.add_line(h, "COFFEE", 0, 399).unwrap_err(),
            store.add_line(h, "COFFEE", 1, -1).unwrap_err(),
            store.add_line(h, "", 1, 100).unwrap_err(),
            store.add_tender(h, 0, "cash").unwrap_err(),
            store.begin_transaction("STORE_1", "USD", 4).unwrap_err(),
            store.begin_transaction("STORE_1", "", 2).unwrap_err(),
            store.begin_transaction("", "USD", 2).unwrap_err(),
            store.add_line(TransactionId(99), "COFFEE", 1, 100).unwrap_err(),
        ] {
            assert!(err.is_validation(), "{err}");
        }
        assert_eq!(store.summary().last_sequence, before);
    }

    #[test]
    fn test_under_tender_and_closed_transactions() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        let h = store.begin_transaction("STORE_1", "USD", 2).unwrap();
        store.add_line(h, "COFFEE", 2, 399).unwrap();
        store.add_tender(h, 500, "cash").unwrap();

        assert!(matches!(
            store.commit(h),
            Err(LedgerError::Validation(CoreError::UnderTendered { .. }))
        ));
        store.abort(h, "customer left").unwrap();

        assert!(matches!(
            store.add_line(h, "TEA", 1, 250),
            Err(LedgerError::Validation(CoreError::InvalidTransactionState { .. }))
        ));
        assert!(store.abort(h, "").is_err());
        let snap = store.get_transaction(h).unwrap();
        assert_eq!(snap.close_reason.as_deref(), Some("customer left"));
    }

    #[test]
    fn test_partial_payment_option() {
        let dir = tempfile::tempdir().unwrap();
        let options = StoreOptions {
            partial_payment: true,
            ..StoreOptions::default()
        };
        let (store, _) = open(dir.path(), options);
        let h = store.begin_transaction("STORE_1", "USD", 2).unwrap();
        store.add_line(h, "COFFEE", 2, 399).unwrap();
        store.add_tender(h, 500, "card").unwrap();

        let summary = store.commit(h).unwrap();
        assert_eq!(summary.change, Money::zero());
        assert_eq!(summary.total_tendered.minor(), 500);
    }

    #[test]
    fn test_idempotent_retries() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        let h = store.begin_transaction("STORE_1", "USD", 2).unwrap();

        let first = store.add_line_with_key(h, "req-1", "COFFEE", 2, 399).unwrap();
        let seq = store.summary().last_sequence;
        let again = store.add_line_with_key(h, "req-1", "COFFEE", 2, 399).unwrap();
        assert_eq!(first, again);
        assert_eq!(store.summary().last_sequence, seq);

        let t1 = store.add_tender_with_key(h, "pay-1", 800, "cash").unwrap();
        let t2 = store.add_tender_with_key(h, "pay-1", 800, "cash").unwrap();
        assert_eq!(t1, t2);

        let snap = store.get_transaction(h).unwrap();
        assert_eq!(snap.lines.len(), 1);
        assert_eq!(snap.tenders.len(), 1);
    }

    #[test]
    fn test_void_cascade_survives_replay() {
        let dir = tempfile::tempdir().unwrap();
        let h = {
            let store = store(dir.path());
            let h = store.begin_transaction("STORE_1", "USD", 2).unwrap();
            let burger = store.add_line(h, "BURGER", 1, 900).unwrap();
            store.add_child_line(h, burger, "CHEESE", 1, 100).unwrap();
            store.add_line(h, "FRIES", 1, 300).unwrap();

            let voids = store.void_line(h, burger, "wrong item").unwrap();
            assert_eq!(voids, vec![4, 5]);
            assert_eq!(store.get_transaction(h).unwrap().total_due.minor(), 300);
            assert!(matches!(
                store.void_line(h, burger, "again"),
                Err(LedgerError::Validation(CoreError::LineAlreadyVoided { .. }))
            ));
            h
        };

        let store = store(dir.path());
        let snap = store.get_transaction(h).unwrap();
        assert_eq!(snap.lines.len(), 5);
        assert_eq!(snap.total_due.minor(), 300);
    }

    #[test]
    fn test_overflowing_amounts_log_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let h = {
            let store = store(dir.path());
            let h = store.begin_transaction("STORE_1", "USD", 2).unwrap();
            let before = store.summary().last_sequence;

            assert!(matches!(
                store.add_line(h, "GOLD", 2, i64::MAX),
                Err(LedgerError::Validation(CoreError::AmountOverflow))
            ));
            assert_eq!(store.summary().last_sequence, before);
            assert!(store.get_transaction(h).unwrap().lines.is_empty());

            store.add_line(h, "GOLD", 1, i64::MAX - 10).unwrap();
            assert!(matches!(
                store.update_line_quantity(h, 1, 2),
                Err(LedgerError::Validation(CoreError::AmountOverflow))
            ));
            store.add_tender(h, i64::MAX - 10, "card").unwrap();
            assert!(matches!(
                store.add_tender(h, 100, "cash"),
                Err(LedgerError::Validation(CoreError::AmountOverflow))
            ));

            assert_eq!(store.commit(h).unwrap().change, Money::zero());
            h
        };

        let store = store(dir.path());
        let snap = store.get_transaction(h).unwrap();
        assert_eq!(snap.state, TransactionState::Committed);
        assert_eq!(snap.lines.len(), 1);
        assert_eq!(snap.tenders.len(), 1);
        assert_eq!(store.summary().committed_total, Some(Money::from_minor(i64::MAX - 10)));

        // Each transaction fits; their sum does not.
        let second = store.begin_transaction("STORE_1", "USD", 2).unwrap();
        store.add_line(second, "GOLD", 1, i64::MAX - 10).unwrap();
        store.add_tender(second, i64::MAX - 10, "card").unwrap();
        store.commit(second).unwrap();
        let summary = store.summary();
        assert_eq!(summary.committed_transactions, 2);
        assert_eq!(summary.committed_total, None);
    }

    #[test]
    fn test_update_line_quantity() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        let h = store.begin_transaction("STORE_1", "USD", 2).unwrap();
        store.add_line(h, "TEA", 2, 250).unwrap();

        assert_eq!(store.update_line_quantity(h, 1, 3).unwrap(), Some(2));
        assert_eq!(store.update_line_quantity(h, 1, 3).unwrap(), None);
        assert!(store.update_line_quantity(h, 1, 0).unwrap_err().is_validation());

        let snap = store.get_transaction(h).unwrap();
        assert_eq!(snap.total_due.minor(), 750);
        assert_eq!(snap.lines[1].kind, LineKind::Adjustment);
    }

    #[test]
    fn test_reversal_at_most_once() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        let h = store.begin_transaction("STORE_1", "USD", 2).unwrap();
        store.add_line(h, "COFFEE", 2, 399).unwrap();
        store.add_tender(h, 800, "cash").unwrap();
        store.commit(h).unwrap();

        let r = store.reverse_transaction(h, "refund").unwrap();
        let reversal = store.get_transaction(r).unwrap();
        assert_eq!(reversal.reverses, Some(h));
        assert_eq!(reversal.state, TransactionState::Committed);
        assert_eq!(reversal.total_due.minor(), -798);
        assert_eq!(store.get_transaction(h).unwrap().reversed_by, Some(r));

        assert!(matches!(
            store.reverse_transaction(h, "refund"),
            Err(LedgerError::Validation(CoreError::AlreadyReversed { .. }))
        ));
        assert_eq!(store.summary().reversals, 1);
        assert_eq!(store.summary().committed_total, Some(Money::zero()));
    }

    #[test]
    fn test_sessions() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        let s = store.open_session("cashier-7").unwrap();
        let h = store.begin_transaction_in_session(s, "STORE_1", "USD", 2).unwrap();
        assert_eq!(store.get_session(s).unwrap().open_transactions, vec![h]);

        assert!(matches!(
            store.close_session(s),
            Err(LedgerError::Validation(CoreError::SessionHasOpenTransactions { open: 1, .. }))
        ));
        store.abort(h, "").unwrap();
        store.close_session(s).unwrap();

        assert!(matches!(
            store.begin_transaction_in_session(s, "STORE_1", "USD", 2),
            Err(LedgerError::Validation(CoreError::SessionClosed(_)))
        ));
        assert!(matches!(
            store.get_session(SessionId(42)),
            Err(LedgerError::Validation(CoreError::SessionNotFound(_)))
        ));
        assert_eq!(store.open_session("cashier-8").unwrap(), SessionId(2));
    }

    #[test]
    fn test_draining_rejects_new_work_but_finishes_open_work() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        store.mark_started().unwrap();
        let h = store.begin_transaction("STORE_1", "USD", 0).unwrap();
        store.add_line(h, "ONIGIRI", 1, 150).unwrap();

        store.begin_drain().unwrap();
        assert_eq!(store.terminal_state(), TerminalState::Draining);
        assert!(matches!(
            store.begin_transaction("STORE_1", "JPY", 0),
            Err(LedgerError::Validation(CoreError::NotAcceptingTransactions { .. }))
        ));

        store.add_tender(h, 200, "cash").unwrap();
        assert_eq!(store.commit(h).unwrap().change.minor(), 50);

        store.mark_stopped().unwrap();
        assert!(store.add_line(h, "TEA", 1, 100).is_err());
    }

    #[test]
    fn test_abort_open_transactions() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        let a = store.begin_transaction("STORE_1", "USD", 2).unwrap();
        let b = store.begin_transaction("STORE_1", "USD", 2).unwrap();
        store.abort(a, "").unwrap();

        assert_eq!(store.abort_open_transactions("shutdown").unwrap(), vec![b]);
        assert!(store.open_transactions().unwrap().is_empty());
    }

    #[test]
    fn test_shutdown_abort_leaves_recovered_incomplete_open() {
        let dir = tempfile::tempdir().unwrap();
        let stranded = {
            let store = store(dir.path());
            let h = store.begin_transaction("STORE_1", "USD", 2).unwrap();
            store.add_line(h, "COFFEE", 1, 399).unwrap();
            std::mem::forget(store);
            h
        };

        let store = store(dir.path());
        assert_eq!(store.incomplete_transactions(), vec![stranded]);
        let fresh = store.begin_transaction("STORE_1", "USD", 2).unwrap();
        assert_eq!(store.in_flight_transactions(), vec![fresh]);

        assert_eq!(store.abort_open_transactions("shutdown").unwrap(), vec![fresh]);
        assert_eq!(
            store.get_transaction(stranded).unwrap().state,
            TransactionState::Open
        );
        assert_eq!(store.incomplete_transactions(), vec![stranded]);
        assert!(store.in_flight_transactions().is_empty());
    }

    #[test]
    fn test_ids_unique_under_concurrency_and_across_restarts() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = Arc::new(store(dir.path()));
            let workers: Vec<_> = (0..8)
                .map(|_| {
                    let store = Arc::clone(&store);
                    std::thread::spawn(move || {
                        (0..25)
                            .map(|_| store.begin_transaction("STORE_1", "USD", 2).unwrap())
                            .collect::<Vec<_>>()
                    })
                })
                .collect();

            let mut ids: Vec<u64> = workers
                .into_iter()
                .flat_map(|w| w.join().unwrap())
                .map(|id| id.0)
                .collect();
            ids.sort_unstable();
            assert_eq!(ids, (1..=200).collect::<Vec<_>>());
        }

        let store = store(dir.path());
        assert_eq!(
            store.begin_transaction("STORE_1", "USD", 2).unwrap(),
            TransactionId(201)
        );
    }

    #[test]
    fn test_durability_failure_restores_last_durable_state() {
        let dir = tempfile::tempdir().unwrap();
        let (store, _) = open(dir.path(), batched());
        let h = store.begin_transaction("STORE_1", "USD", 2).unwrap();
        store.add_line(h, "COFFEE", 2, 399).unwrap();
        assert_eq!(store.get_transaction(h).unwrap().lines.len(), 1);

        store.write().wal.fail_next_sync();
        let err = store.abort(h, "").unwrap_err();
        assert!(matches!(
            err,
            LedgerError::Durability(DurabilityError::Io { lost_entries: 2, .. })
        ));
        assert!(err.is_retryable());

        // Back to what the disk holds: begun, no lines, still open.
        let snap = store.get_transaction(h).unwrap();
        assert_eq!(snap.state, TransactionState::Open);
        assert!(snap.lines.is_empty());

        // And the store keeps working.
        assert_eq!(store.add_line(h, "COFFEE", 2, 399).unwrap(), 1);
    }
}
