//! # Transaction Aggregate
//!
//! The in-memory model of one transaction and every rule that governs it.
//!
//! ## Check, Then Apply
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    How the ledger uses this module                      │
//! │                                                                         │
//! │  Live call                              WAL replay                      │
//! │  ─────────                              ──────────                      │
//! │  tx.check_add_line(..)  ─► Err? return                                  │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  WAL append (durable)                                                   │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  tx.push_line(line)     ◄────────────── tx.push_line(line)              │
//! │                                                                         │
//! │  The `check_*` methods never mutate. The `push_*` / `mark_*` methods    │
//! │  re-assert the same rules, so a replayed log that breaks them is        │
//! │  reported instead of silently folded.                                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Append-Only Lines
//! Voids and quantity changes never edit a line. They append a `Void` or
//! `Adjustment` line that references the sale line, carrying the same unit
//! price, so `total_due` is always the plain sum of every line total.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::error::{CoreError, CoreResult};
use crate::money::Money;
use crate::types::{
    CommitSummary, Currency, Line, LineKind, SessionId, Tender, TenderKind, TransactionId,
    TransactionState,
};
use crate::validation::validate_line_count;
use crate::MAX_ITEM_QUANTITY;

// =============================================================================
// Transaction
// =============================================================================

/// One sale (or compensating reversal) on a terminal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: TransactionId,
    pub store_id: String,
    pub currency: Currency,
    pub session_id: Option<SessionId>,
    /// Set on compensating transactions.
    pub reverses: Option<TransactionId>,
    /// Set on an original once a compensating transaction exists.
    pub reversed_by: Option<TransactionId>,
    pub lines: Vec<Line>,
    pub tenders: Vec<Tender>,
    pub state: TransactionState,
    pub created_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
    pub close_reason: Option<String>,
}

impl Transaction {
    /// Creates an empty open transaction.
    pub fn new(
        id: TransactionId,
        store_id: String,
        currency: Currency,
        session_id: Option<SessionId>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Transaction {
            id,
            store_id,
            currency,
            session_id,
            reverses: None,
            reversed_by: None,
            lines: Vec::new(),
            tenders: Vec::new(),
            state: TransactionState::Open,
            created_at,
            closed_at: None,
            close_reason: None,
        }
    }

    // -------------------------------------------------------------------------
    // Queries
    // -------------------------------------------------------------------------

    pub fn is_open(&self) -> bool {
        self.state == TransactionState::Open
    }

    /// Fails unless the transaction is Open.
    pub fn ensure_open(&self, operation: &str) -> CoreResult<()> {
        if self.is_open() {
            Ok(())
        } else {
            Err(CoreError::InvalidTransactionState {
                transaction_id: self.id,
                current_state: self.state,
                operation: operation.to_string(),
            })
        }
    }

    pub fn next_line_number(&self) -> u32 {
        self.lines.len() as u32 + 1
    }

    pub fn next_tender_number(&self) -> u32 {
        self.tenders.len() as u32 + 1
    }

    pub fn line(&self, line_number: u32) -> Option<&Line> {
        // Line numbers are dense and 1-based.
        line_number
            .checked_sub(1)
            .and_then(|idx| self.lines.get(idx as usize))
    }

    /// Finds a line previously added with `key`.
    pub fn line_by_key(&self, key: &str) -> Option<&Line> {
        self.lines
            .iter()
            .find(|l| l.idempotency_key.as_deref() == Some(key))
    }

    /// Finds a tender previously added with `key`.
    pub fn tender_by_key(&self, key: &str) -> Option<&Tender> {
        self.tenders
            .iter()
            .find(|t| t.idempotency_key.as_deref() == Some(key))
    }

    /// Whether a Void line references `line_number`.
    pub fn is_voided(&self, line_number: u32) -> bool {
        self.lines
            .iter()
            .any(|l| l.kind == LineKind::Void && l.references_line == Some(line_number))
    }

    /// Sale quantity plus every void and adjustment that references it.
    pub fn effective_quantity(&self, line_number: u32) -> i64 {
        self.lines
            .iter()
            .filter(|l| l.line_number == line_number || l.references_line == Some(line_number))
            .map(|l| l.quantity)
            .sum()
    }

    /// Direct child sale lines of `line_number`, in line order.
    pub fn children_of(&self, line_number: u32) -> Vec<u32> {
        self.lines
            .iter()
            .filter(|l| l.is_sale() && l.parent_line == Some(line_number))
            .map(|l| l.line_number)
            .collect()
    }

    /// Exact sum of every line total.
    pub fn total_due(&self) -> CoreResult<Money> {
        let totals = self
            .lines
            .iter()
            .map(Line::total)
            .collect::<CoreResult<Vec<_>>>()?;
        Money::checked_sum(totals)
    }

    pub fn total_tendered(&self) -> CoreResult<Money> {
        Money::checked_sum(self.tenders.iter().map(|t| t.amount))
    }

    /// Computes the commit outcome without changing state.
    ///
    /// ## Rules
    /// - tendered >= due → change = tendered - due
    /// - tendered <  due → `UnderTendered`, unless `partial_payment` (change = 0)
    pub fn settle(&self, partial_payment: bool) -> CoreResult<CommitSummary> {
        self.ensure_open("commit")?;
        let total_due = self.total_due()?;
        let total_tendered = self.total_tendered()?;

        let change = if total_tendered >= total_due {
            total_tendered.checked_sub(total_due)?
        } else if partial_payment {
            Money::zero()
        } else {
            return Err(CoreError::UnderTendered {
                total_due: total_due.minor(),
                total_tendered: total_tendered.minor(),
            });
        };

        Ok(CommitSummary {
            transaction_id: self.id,
            total_due,
            total_tendered,
            change,
        })
    }

    /// Read-only view with computed totals.
    pub fn snapshot(&self) -> CoreResult<TransactionSnapshot> {
        let total_due = self.total_due()?;
        let total_tendered = self.total_tendered()?;
        Ok(TransactionSnapshot {
            id: self.id,
            store_id: self.store_id.clone(),
            currency: self.currency.clone(),
            session_id: self.session_id,
            reverses: self.reverses,
            reversed_by: self.reversed_by,
            state: self.state,
            lines: self.lines.clone(),
            tenders: self.tenders.clone(),
            total_due,
            total_tendered,
            balance_due: total_due.checked_sub(total_tendered)?,
            created_at: self.created_at,
            closed_at: self.closed_at,
            close_reason: self.close_reason.clone(),
        })
    }

    // -------------------------------------------------------------------------
    // Checks (no mutation)
    // -------------------------------------------------------------------------

    /// Checks that a sale line (optionally linked to `parent_line`) may be added.
    pub fn check_add_line(&self, parent_line: Option<u32>) -> CoreResult<()> {
        self.ensure_open("add_line")?;
        validate_line_count(self.lines.len()).map_err(|_| CoreError::TooManyLines {
            max: crate::MAX_TRANSACTION_LINES,
        })?;
        if let Some(parent) = parent_line {
            self.live_sale_line(parent)?;
        }
        Ok(())
    }

    pub fn check_add_tender(&self) -> CoreResult<()> {
        self.ensure_open("add_tender")
    }

    /// Checks that appending `lines` then `tenders` keeps `total_due`,
    /// `total_tendered` and the balance inside i64 minor units.
    ///
    /// Every prefix is checked, in the order `push_line` / `push_tender`
    /// would fold them, so a snapshot of any accepted state can be built.
    pub fn check_totals_after(&self, lines: &[Line], tenders: &[Tender]) -> CoreResult<()> {
        let mut due = self.total_due()?;
        let mut tendered = self.total_tendered()?;
        for line in lines {
            due = due.checked_add(line.total()?)?;
            due.checked_sub(tendered)?;
        }
        for tender in tenders {
            tendered = tendered.checked_add(tender.amount)?;
            due.checked_sub(tendered)?;
        }
        Ok(())
    }

    /// Builds the void lines for `line_number` and, cascading, its children.
    ///
    /// Children are voided deepest first, then the target. Children that
    /// are already voided are skipped; the target itself must not be.
    pub fn plan_void(
        &self,
        line_number: u32,
        reason: &str,
        at: DateTime<Utc>,
    ) -> CoreResult<Vec<Line>> {
        self.ensure_open("void_line")?;
        self.live_sale_line(line_number)?;

        let mut order = Vec::new();
        self.collect_void_order(line_number, &mut order);

        let mut next = self.next_line_number();
        let mut voids = Vec::with_capacity(order.len());
        for target in order {
            let Some(original) = self.line(target) else {
                continue;
            };
            voids.push(Line {
                line_number: next,
                product_id: original.product_id.clone(),
                quantity: -self.effective_quantity(target),
                unit_price: original.unit_price,
                kind: LineKind::Void,
                parent_line: None,
                references_line: Some(target),
                reason: Some(reason.to_string()),
                idempotency_key: None,
                created_at: at,
            });
            next += 1;
        }

        if self.lines.len() + voids.len() > crate::MAX_TRANSACTION_LINES {
            return Err(CoreError::TooManyLines {
                max: crate::MAX_TRANSACTION_LINES,
            });
        }
        self.check_totals_after(&voids, &[])?;
        Ok(voids)
    }

    /// Post-order walk: children (recursively) before `line_number`.
    fn collect_void_order(&self, line_number: u32, order: &mut Vec<u32>) {
        for child in self.children_of(line_number) {
            if !self.is_voided(child) {
                self.collect_void_order(child, order);
            }
        }
        order.push(line_number);
    }

    /// Builds the adjustment line that moves `line_number` to `new_quantity`.
    ///
    /// Returns `None` when the quantity is unchanged.
    pub fn plan_quantity_update(
        &self,
        line_number: u32,
        new_quantity: i64,
        at: DateTime<Utc>,
    ) -> CoreResult<Option<Line>> {
        self.ensure_open("update_line_quantity")?;
        let original = self.live_sale_line(line_number)?;

        let current = self.effective_quantity(line_number);
        let delta = new_quantity - current;
        if delta == 0 {
            return Ok(None);
        }
        validate_line_count(self.lines.len()).map_err(|_| CoreError::TooManyLines {
            max: crate::MAX_TRANSACTION_LINES,
        })?;

        let adjustment = Line {
            line_number: self.next_line_number(),
            product_id: original.product_id.clone(),
            quantity: delta,
            unit_price: original.unit_price,
            kind: LineKind::Adjustment,
            parent_line: None,
            references_line: Some(line_number),
            reason: Some(format!("quantity changed from {} to {}", current, new_quantity)),
            idempotency_key: None,
            created_at: at,
        };
        self.check_totals_after(std::slice::from_ref(&adjustment), &[])?;
        Ok(Some(adjustment))
    }

    /// Builds the compensating transaction for a committed one.
    ///
    /// Each sale line with a non-zero effective quantity becomes a Void line
    /// (its `references_line` points into the original) and each tender is
    /// negated, so the compensating totals are the exact negation of the
    /// original's. A compensating transaction is final: it cannot itself
    /// be reversed.
    pub fn plan_reversal(
        &self,
        reversal_id: TransactionId,
        reason: &str,
        at: DateTime<Utc>,
    ) -> CoreResult<Transaction> {
        if self.state != TransactionState::Committed {
            return Err(CoreError::InvalidTransactionState {
                transaction_id: self.id,
                current_state: self.state,
                operation: "reverse".to_string(),
            });
        }
        if let Some(reverses) = self.reverses {
            return Err(CoreError::ReversalNotReversible {
                transaction_id: self.id,
                reverses,
            });
        }
        if let Some(reversed_by) = self.reversed_by {
            return Err(CoreError::AlreadyReversed {
                transaction_id: self.id,
                reversed_by,
            });
        }

        let mut reversal = Transaction::new(
            reversal_id,
            self.store_id.clone(),
            self.currency.clone(),
            self.session_id,
            at,
        );
        reversal.reverses = Some(self.id);

        for line in self.lines.iter().filter(|l| l.is_sale()) {
            let effective = self.effective_quantity(line.line_number);
            if effective == 0 {
                continue;
            }
            reversal.lines.push(Line {
                line_number: reversal.next_line_number(),
                product_id: line.product_id.clone(),
                quantity: -effective,
                unit_price: line.unit_price,
                kind: LineKind::Void,
                parent_line: None,
                references_line: Some(line.line_number),
                reason: Some(reason.to_string()),
                idempotency_key: None,
                created_at: at,
            });
        }
        for tender in &self.tenders {
            reversal.tenders.push(Tender {
                tender_number: reversal.next_tender_number(),
                amount: -tender.amount,
                kind: TenderKind::new(tender.kind.as_str()),
                idempotency_key: None,
                created_at: at,
            });
        }

        reversal.snapshot()?;
        reversal.state = TransactionState::Committed;
        reversal.closed_at = Some(at);
        reversal.close_reason = Some(reason.to_string());
        Ok(reversal)
    }

    /// The referenced line must exist, be a Sale line and not be voided.
    fn live_sale_line(&self, line_number: u32) -> CoreResult<&Line> {
        let line = self.line(line_number).ok_or(CoreError::LineNotFound {
            transaction_id: self.id,
            line_number,
        })?;
        if !line.is_sale() {
            return Err(CoreError::NotASaleLine {
                transaction_id: self.id,
                line_number,
            });
        }
        if self.is_voided(line_number) {
            return Err(CoreError::LineAlreadyVoided {
                transaction_id: self.id,
                line_number,
            });
        }
        Ok(line)
    }

    // -------------------------------------------------------------------------
    // Mutations (after the WAL append)
    // -------------------------------------------------------------------------

    /// Appends a line whose number must be the next one.
    pub fn push_line(&mut self, line: Line) -> CoreResult<()> {
        self.ensure_open("add_line")?;
        if line.line_number != self.next_line_number() {
            return Err(CoreError::LineNotFound {
                transaction_id: self.id,
                line_number: line.line_number,
            });
        }
        if line.is_sale() && !(1..=MAX_ITEM_QUANTITY).contains(&line.quantity) {
            return Err(CoreError::Validation(
                crate::error::ValidationError::OutOfRange {
                    field: "quantity".to_string(),
                    min: 1,
                    max: MAX_ITEM_QUANTITY,
                },
            ));
        }
        self.check_totals_after(std::slice::from_ref(&line), &[])?;
        self.lines.push(line);
        Ok(())
    }

    /// Appends a tender whose number must be the next one.
    pub fn push_tender(&mut self, tender: Tender) -> CoreResult<()> {
        self.ensure_open("add_tender")?;
        if tender.tender_number != self.next_tender_number() {
            return Err(CoreError::InvalidTransactionState {
                transaction_id: self.id,
                current_state: self.state,
                operation: format!("add tender #{}", tender.tender_number),
            });
        }
        self.check_totals_after(&[], std::slice::from_ref(&tender))?;
        self.tenders.push(tender);
        Ok(())
    }

    pub fn mark_committed(&mut self, at: DateTime<Utc>) -> CoreResult<()> {
        self.ensure_open("commit")?;
        self.state = TransactionState::Committed;
        self.closed_at = Some(at);
        Ok(())
    }

    pub fn mark_aborted(&mut self, at: DateTime<Utc>, reason: Option<String>) -> CoreResult<()> {
        self.ensure_open("abort")?;
        self.state = TransactionState::Aborted;
        self.closed_at = Some(at);
        self.close_reason = reason;
        Ok(())
    }
}

// =============================================================================
// Snapshot
// =============================================================================

/// Read-only view returned by `get_transaction`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct TransactionSnapshot {
    pub id: TransactionId,
    pub store_id: String,
    pub currency: Currency,
    pub session_id: Option<SessionId>,
    pub reverses: Option<TransactionId>,
    pub reversed_by: Option<TransactionId>,
    pub state: TransactionState,
    pub lines: Vec<Line>,
    pub tenders: Vec<Tender>,
    pub total_due: Money,
    pub total_tendered: Money,
    /// `total_due - total_tendered`; negative when over-tendered.
    pub balance_due: Money,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
    #[ts(as = "Option<String>")]
    pub closed_at: Option<DateTime<Utc>>,
    pub close_reason: Option<String>,
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn usd() -> Currency {
        Currency {
            code: "USD".to_string(),
            decimal_places: 2,
        }
    }

    fn open_tx() -> Transaction {
        Transaction::new(TransactionId(1), "STORE_1".to_string(), usd(), None, Utc::now())
    }

    fn sale(tx: &Transaction, product: &str, qty: i64, price: i64, parent: Option<u32>) -> Line {
        Line {
            line_number: tx.next_line_number(),
            product_id: product.to_string(),
            quantity: qty,
            unit_price: Money::from_minor(price),
            kind: LineKind::Sale,
            parent_line: parent,
            references_line: None,
            reason: None,
            idempotency_key: None,
            created_at: Utc::now(),
        }
    }

    fn tender(tx: &Transaction, amount: i64) -> Tender {
        Tender {
            tender_number: tx.next_tender_number(),
            amount: Money::from_minor(amount),
            kind: TenderKind::new("cash"),
            idempotency_key: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_coffee_sale_totals() {
        let mut tx = open_tx();
        let line = sale(&tx, "COFFEE", 2, 399, None);
        tx.push_line(line).unwrap();
        let t = tender(&tx, 800);
        tx.push_tender(t).unwrap();

        let summary = tx.settle(false).unwrap();
        assert_eq!(summary.total_due.minor(), 798);
        assert_eq!(summary.total_tendered.minor(), 800);
        assert_eq!(summary.change.minor(), 2);
    }

    #[test]
    fn test_under_tender_rejected_unless_partial() {
        let mut tx = open_tx();
        let line = sale(&tx, "COFFEE", 2, 399, None);
        tx.push_line(line).unwrap();
        let t = tender(&tx, 500);
        tx.push_tender(t).unwrap();

        assert!(matches!(
            tx.settle(false),
            Err(CoreError::UnderTendered {
                total_due: 798,
                total_tendered: 500
            })
        ));
        let summary = tx.settle(true).unwrap();
        assert_eq!(summary.change, Money::zero());
    }

    #[test]
    fn test_closed_transaction_is_immutable() {
        let mut tx = open_tx();
        tx.mark_committed(Utc::now()).unwrap();

        assert!(matches!(
            tx.check_add_line(None),
            Err(CoreError::InvalidTransactionState { .. })
        ));
        assert!(tx.check_add_tender().is_err());
        assert!(tx.mark_aborted(Utc::now(), None).is_err());
    }

    #[test]
    fn test_void_cascades_to_children_deepest_first() {
        let mut tx = open_tx();
        let burger = sale(&tx, "BURGER", 1, 900, None);
        tx.push_line(burger).unwrap(); // 1
        let cheese = sale(&tx, "CHEESE", 1, 100, Some(1));
        tx.push_line(cheese).unwrap(); // 2
        let extra = sale(&tx, "EXTRA", 2, 50, Some(2));
        tx.push_line(extra).unwrap(); // 3
        let fries = sale(&tx, "FRIES", 1, 300, None);
        tx.push_line(fries).unwrap(); // 4

        let voids = tx.plan_void(1, "wrong order", Utc::now()).unwrap();
        let targets: Vec<_> = voids.iter().map(|l| l.references_line.unwrap()).collect();
        assert_eq!(targets, vec![3, 2, 1]);
        assert_eq!(voids[0].quantity, -2);
        for v in voids {
            tx.push_line(v).unwrap();
        }

        assert_eq!(tx.total_due().unwrap().minor(), 300);
        assert!(tx.is_voided(1) && tx.is_voided(2) && tx.is_voided(3));
        assert!(matches!(
            tx.plan_void(1, "again", Utc::now()),
            Err(CoreError::LineAlreadyVoided { line_number: 1, .. })
        ));
    }

    #[test]
    fn test_void_after_adjustment_nets_to_zero() {
        let mut tx = open_tx();
        let line = sale(&tx, "TEA", 2, 250, None);
        tx.push_line(line).unwrap();
        let adj = tx.plan_quantity_update(1, 5, Utc::now()).unwrap().unwrap();
        assert_eq!(adj.quantity, 3);
        tx.push_line(adj).unwrap();
        assert_eq!(tx.effective_quantity(1), 5);

        for v in tx.plan_void(1, "", Utc::now()).unwrap() {
            tx.push_line(v).unwrap();
        }
        assert_eq!(tx.effective_quantity(1), 0);
        assert_eq!(tx.total_due().unwrap(), Money::zero());
    }

    #[test]
    fn test_quantity_update_rules() {
        let mut tx = open_tx();
        let line = sale(&tx, "TEA", 2, 250, None);
        tx.push_line(line).unwrap();

        assert!(tx.plan_quantity_update(1, 2, Utc::now()).unwrap().is_none());
        let down = tx.plan_quantity_update(1, 1, Utc::now()).unwrap().unwrap();
        assert_eq!(down.quantity, -1);
        assert_eq!(down.kind, LineKind::Adjustment);
        assert!(matches!(
            tx.plan_quantity_update(9, 1, Utc::now()),
            Err(CoreError::LineNotFound { line_number: 9, .. })
        ));
    }

    #[test]
    fn test_adjustment_line_cannot_be_voided() {
        let mut tx = open_tx();
        let line = sale(&tx, "TEA", 2, 250, None);
        tx.push_line(line).unwrap();
        let adj = tx.plan_quantity_update(1, 3, Utc::now()).unwrap().unwrap();
        tx.push_line(adj).unwrap();

        assert!(matches!(
            tx.plan_void(2, "", Utc::now()),
            Err(CoreError::NotASaleLine { line_number: 2, .. })
        ));
    }

    #[test]
    fn test_reversal_negates_totals_once() {
        let mut tx = open_tx();
        let line = sale(&tx, "COFFEE", 2, 399, None);
        tx.push_line(line).unwrap();
        let t = tender(&tx, 800);
        tx.push_tender(t).unwrap();
        tx.mark_committed(Utc::now()).unwrap();

        let reversal = tx
            .plan_reversal(TransactionId(2), "refund", Utc::now())
            .unwrap();
        assert_eq!(reversal.reverses, Some(TransactionId(1)));
        assert_eq!(reversal.state, TransactionState::Committed);
        assert_eq!(reversal.total_due().unwrap().minor(), -798);
        assert_eq!(reversal.total_tendered().unwrap().minor(), -800);

        tx.reversed_by = Some(reversal.id);
        assert!(matches!(
            tx.plan_reversal(TransactionId(3), "refund", Utc::now()),
            Err(CoreError::AlreadyReversed { .. })
        ));
    }

    #[test]
    fn test_compensating_transaction_cannot_be_reversed() {
        let mut tx = open_tx();
        let line = sale(&tx, "COFFEE", 2, 399, None);
        tx.push_line(line).unwrap();
        let t = tender(&tx, 800);
        tx.push_tender(t).unwrap();
        tx.mark_committed(Utc::now()).unwrap();

        let reversal = tx
            .plan_reversal(TransactionId(2), "refund", Utc::now())
            .unwrap();
        assert!(matches!(
            reversal.plan_reversal(TransactionId(3), "undo refund", Utc::now()),
            Err(CoreError::ReversalNotReversible {
                transaction_id: TransactionId(2),
                reverses: TransactionId(1),
            })
        ));
    }

    #[test]
    fn test_totals_overflow_is_rejected_before_push() {
        let mut tx = open_tx();
        let huge = sale(&tx, "GOLD", 2, i64::MAX, None);
        assert_eq!(
            tx.check_totals_after(std::slice::from_ref(&huge), &[]),
            Err(CoreError::AmountOverflow)
        );
        assert_eq!(tx.push_line(huge), Err(CoreError::AmountOverflow));
        assert!(tx.lines.is_empty());

        let big = sale(&tx, "GOLD", 1, i64::MAX - 10, None);
        tx.push_line(big).unwrap();
        assert!(matches!(
            tx.plan_quantity_update(1, 2, Utc::now()),
            Err(CoreError::AmountOverflow)
        ));

        let first = tender(&tx, i64::MAX - 10);
        tx.push_tender(first).unwrap();
        let second = tender(&tx, 100);
        assert_eq!(tx.push_tender(second), Err(CoreError::AmountOverflow));
        assert_eq!(tx.tenders.len(), 1);
        assert!(tx.snapshot().is_ok());
    }

    #[test]
    fn test_open_transaction_cannot_be_reversed() {
        let tx = open_tx();
        assert!(matches!(
            tx.plan_reversal(TransactionId(2), "", Utc::now()),
            Err(CoreError::InvalidTransactionState { .. })
        ));
    }

    #[test]
    fn test_push_line_rejects_gaps() {
        let mut tx = open_tx();
        let mut line = sale(&tx, "COFFEE", 1, 399, None);
        line.line_number = 3;
        assert!(tx.push_line(line).is_err());
    }

    #[test]
    fn test_snapshot_balance() {
        let mut tx = open_tx();
        let line = sale(&tx, "COFFEE", 2, 399, None);
        tx.push_line(line).unwrap();
        let t = tender(&tx, 500);
        tx.push_tender(t).unwrap();

        let snap = tx.snapshot().unwrap();
        assert_eq!(snap.balance_due.minor(), 298);
        assert_eq!(snap.lines.len(), 1);
    }
}
