//! # Domain Types
//!
//! Core domain types used throughout the terminal kernel.
//!
//! ## Type Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Domain Types                                    │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌─────────────────┐   ┌─────────────────┐       │
//! │  │  Transaction    │   │      Line       │   │     Tender      │       │
//! │  │  ─────────────  │   │  ─────────────  │   │  ─────────────  │       │
//! │  │  id (u64)       │   │  line_number    │   │  tender_number  │       │
//! │  │  store_id       │──►│  product_id     │   │  amount         │       │
//! │  │  currency       │   │  quantity       │   │  kind           │       │
//! │  │  state          │──►│  unit_price     │   └─────────────────┘       │
//! │  └─────────────────┘   │  kind           │                              │
//! │                        └─────────────────┘                              │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌─────────────────┐   ┌─────────────────┐       │
//! │  │TransactionState │   │    LineKind     │   │ TerminalState   │       │
//! │  │  ─────────────  │   │  ─────────────  │   │  ─────────────  │       │
//! │  │  Open           │   │  Sale           │   │  Initializing   │       │
//! │  │  Committed      │   │  Void           │   │  Active         │       │
//! │  │  Aborted        │   │  Adjustment     │   │  Draining       │       │
//! │  └─────────────────┘   └─────────────────┘   │  Stopped        │       │
//! │                                              └─────────────────┘       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Identity
//! Transaction and session ids are terminal-scoped counters. They are never
//! reused within a terminal's lifetime: recovery restores the counters from
//! the WAL, so an id handed out before a crash is never handed out again.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use ts_rs::TS;

use crate::error::CoreResult;
use crate::money::Money;

// =============================================================================
// Identifiers
// =============================================================================

/// Terminal-scoped transaction id (also the caller's transaction handle).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS,
)]
#[serde(transparent)]
#[ts(export)]
pub struct TransactionId(pub u64);

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Terminal-scoped operator session id.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS,
)]
#[serde(transparent)]
#[ts(export)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// =============================================================================
// Transaction State
// =============================================================================

/// The state of a transaction.
///
/// ```text
///          add_line / add_tender / void_line
///               ┌──────┐
///               ▼      │
/// begin ──► ┌──────────┴┐  commit  ┌───────────┐
///           │   Open    │─────────►│ Committed │ (immutable)
///           └─────┬─────┘          └───────────┘
///                 │ abort          ┌───────────┐
///                 └───────────────►│  Aborted  │ (immutable)
///                                  └───────────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum TransactionState {
    /// Lines and tenders may still be appended.
    Open,
    /// Finalized with a full (or configured partial) payment.
    Committed,
    /// Cancelled; history retained.
    Aborted,
}

impl Default for TransactionState {
    fn default() -> Self {
        TransactionState::Open
    }
}

impl TransactionState {
    /// Checks whether no further mutation is allowed.
    pub fn is_closed(&self) -> bool {
        !matches!(self, TransactionState::Open)
    }
}

impl fmt::Display for TransactionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TransactionState::Open => "open",
            TransactionState::Committed => "committed",
            TransactionState::Aborted => "aborted",
        };
        f.write_str(s)
    }
}

// =============================================================================
// Terminal State
// =============================================================================

/// Lifecycle state of one terminal process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum TerminalState {
    /// Lock acquisition and WAL replay in progress.
    Initializing,
    /// Accepting transactions.
    Active,
    /// Finishing in-flight work; new transactions are rejected.
    Draining,
    /// Lock released; nothing further is accepted.
    Stopped,
}

impl TerminalState {
    /// Whether `begin_transaction` is allowed in this state.
    pub fn accepts_new_transactions(&self) -> bool {
        matches!(self, TerminalState::Initializing | TerminalState::Active)
    }
}

impl fmt::Display for TerminalState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TerminalState::Initializing => "initializing",
            TerminalState::Active => "active",
            TerminalState::Draining => "draining",
            TerminalState::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

// =============================================================================
// Currency
// =============================================================================

/// Currency declared by the caller when a transaction begins.
///
/// The kernel never interprets the code. `decimal_places` only tells
/// readers how to scale the integer minor units.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Currency {
    /// Uppercase code, e.g. `USD`, `JPY`, `BHD`.
    pub code: String,
    /// 0, 1, 2 or 3.
    pub decimal_places: u8,
}

// =============================================================================
// Line
// =============================================================================

/// What a line represents in the append-only line list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum LineKind {
    /// A sold item, quantity always > 0.
    Sale,
    /// Reverses a sale line; carries its negated effective quantity.
    Void,
    /// Signed quantity delta against a sale line.
    Adjustment,
}

/// A line item in a transaction.
///
/// Lines are never edited or removed. Voids and quantity changes are new
/// lines that reference the sale line they act on, so the line list is a
/// complete audit trail of what the cashier did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Line {
    /// 1-based position in the transaction.
    pub line_number: u32,
    pub product_id: String,
    /// Signed: negative for voids and downward adjustments.
    pub quantity: i64,
    pub unit_price: Money,
    pub kind: LineKind,
    /// Parent sale line for linked items (e.g. a modifier on a drink).
    pub parent_line: Option<u32>,
    /// Sale line that a Void or Adjustment acts on.
    pub references_line: Option<u32>,
    pub reason: Option<String>,
    pub idempotency_key: Option<String>,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
}

impl Line {
    /// Line total = quantity × unit price. Computed, never stored.
    pub fn total(&self) -> CoreResult<Money> {
        self.unit_price.checked_mul_quantity(self.quantity)
    }

    pub fn is_sale(&self) -> bool {
        self.kind == LineKind::Sale
    }
}

// =============================================================================
// Tender
// =============================================================================

/// Free-form tender kind such as `cash` or `card`, stored lowercase.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[serde(transparent)]
#[ts(export)]
pub struct TenderKind(String);

impl TenderKind {
    /// Normalizes the kind (trimmed, lowercase). Validate first.
    pub fn new(kind: &str) -> Self {
        TenderKind(kind.trim().to_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TenderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A payment recorded against a transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Tender {
    /// 1-based position in the transaction.
    pub tender_number: u32,
    /// Positive, except on compensating transactions.
    pub amount: Money,
    pub kind: TenderKind,
    pub idempotency_key: Option<String>,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
}

// =============================================================================
// Commit Summary
// =============================================================================

/// Result of a successful commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct CommitSummary {
    pub transaction_id: TransactionId,
    pub total_due: Money,
    pub total_tendered: Money,
    /// Over-tender returned to the customer; zero for partial payments.
    pub change: Money,
}

// =============================================================================
// Session
// =============================================================================

/// An operator session on this terminal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Session {
    pub id: SessionId,
    pub operator_id: String,
    #[ts(as = "String")]
    pub started_at: DateTime<Utc>,
    #[ts(as = "Option<String>")]
    pub ended_at: Option<DateTime<Utc>>,
    /// Open transactions owned by this session, in begin order.
    pub open_transactions: Vec<TransactionId>,
}

impl Session {
    pub fn is_open(&self) -> bool {
        self.ended_at.is_none()
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
