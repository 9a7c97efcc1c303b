//! WAL operations: one variant per state mutation.

use serde::{Deserialize, Serialize};
use titan_core::{Line, Money, SessionId, Tender, TransactionId};

/// A state mutation recorded in the WAL.
///
/// Payloads carry fully built lines and tenders (numbers, timestamps,
/// idempotency keys included), so replay never has to re-derive them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum WalOp {
    BeginTransaction {
        transaction_id: TransactionId,
        store_id: String,
        currency_code: String,
        decimal_places: u8,
        session_id: Option<SessionId>,
    },
    AddLine {
        transaction_id: TransactionId,
        line: Line,
    },
    /// Target void plus cascaded child voids, in application order.
    VoidLine {
        transaction_id: TransactionId,
        voids: Vec<Line>,
    },
    UpdateLineQuantity {
        transaction_id: TransactionId,
        adjustment: Line,
    },
    AddTender {
        transaction_id: TransactionId,
        tender: Tender,
    },
    Commit {
        transaction_id: TransactionId,
        total_due: Money,
        total_tendered: Money,
        change: Money,
    },
    Abort {
        transaction_id: TransactionId,
        reason: Option<String>,
    },
    /// Creates `reversal_id`, committed, compensating `original`.
    Reversal {
        original: TransactionId,
        reversal_id: TransactionId,
        reason: String,
    },
    OpenSession {
        session_id: SessionId,
        operator_id: String,
    },
    CloseSession {
        session_id: SessionId,
    },
    TerminalStarted {
        terminal_id: String,
        pid: u32,
    },
    TerminalDraining {
        terminal_id: String,
    },
    TerminalStopped {
        terminal_id: String,
    },
}

impl WalOp {
    /// Whether batched mode may hold this entry in memory.
    ///
    /// Intermediate mutations of an open transaction only. Anything that
    /// opens or closes a transaction or session, or marks the terminal
    /// lifecycle, is always immediate.
    pub fn is_bufferable(&self) -> bool {
        matches!(
            self,
            WalOp::AddLine { .. }
                | WalOp::AddTender { .. }
                | WalOp::VoidLine { .. }
                | WalOp::UpdateLineQuantity { .. }
        )
    }

    /// Short name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            WalOp::BeginTransaction { .. } => "begin_transaction",
            WalOp::AddLine { .. } => "add_line",
            WalOp::VoidLine { .. } => "void_line",
            WalOp::UpdateLineQuantity { .. } => "update_line_quantity",
            WalOp::AddTender { .. } => "add_tender",
            WalOp::Commit { .. } => "commit",
            WalOp::Abort { .. } => "abort",
            WalOp::Reversal { .. } => "reversal",
            WalOp::OpenSession { .. } => "open_session",
            WalOp::CloseSession { .. } => "close_session",
            WalOp::TerminalStarted { .. } => "terminal_started",
            WalOp::TerminalDraining { .. } => "terminal_draining",
            WalOp::TerminalStopped { .. } => "terminal_stopped",
        }
    }
}
