//! # Error Types
//!
//! Domain-specific error types for titan-core.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  titan-core errors (this file)                                         │
//! │  ├── CoreError        - Transaction rule violations                    │
//! │  └── ValidationError  - Input validation failures                      │
//! │                                                                         │
//! │  titan-ledger errors (separate crate)                                  │
//! │  └── LedgerError      - Lock / durability / recovery failures          │
//! │                                                                         │
//! │  titan-terminal errors (separate crate)                                │
//! │  └── TerminalError    - Config / coordination / lifecycle failures     │
//! │                                                                         │
//! │  Flow: ValidationError → CoreError → LedgerError → TerminalError       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Design Principles
//! 1. Use `thiserror` for derive macros (not manual impl)
//! 2. Include context in error messages (transaction id, line number, etc.)
//! 3. Errors are enum variants, never String
//! 4. Every CoreError is a caller mistake: retrying the same call fails again

use thiserror::Error;

use crate::types::{SessionId, TerminalState, TransactionId, TransactionState};

// =============================================================================
// Core Error
// =============================================================================

/// Core business logic errors.
///
/// These errors represent transaction rule violations. The ledger surfaces
/// all of them as its validation category.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoreError {
    /// Transaction cannot be found on this terminal.
    #[error("Transaction not found: {0}")]
    TransactionNotFound(TransactionId),

    /// Transaction is not in a state that allows the requested operation.
    ///
    /// ## When This Occurs
    /// - Adding a line to a committed transaction
    /// - Aborting an already aborted transaction
    /// - Reversing a transaction that is still open
    ///
    /// ## User Workflow
    /// ```text
    /// Commit(h) ──► Committed
    ///      │
    ///      ▼
    /// AddLine(h, "TEA", 1, 250)
    ///      │
    ///      ▼
    /// InvalidTransactionState { current_state: Committed, operation: "add_line" }
    /// ```
    #[error("Transaction {transaction_id} is {current_state}, cannot {operation}")]
    InvalidTransactionState {
        transaction_id: TransactionId,
        current_state: TransactionState,
        operation: String,
    },

    /// Line number does not exist in the transaction.
    #[error("Line {line_number} not found in transaction {transaction_id}")]
    LineNotFound {
        transaction_id: TransactionId,
        line_number: u32,
    },

    /// Line has already been reversed by a void entry.
    #[error("Line {line_number} in transaction {transaction_id} is already voided")]
    LineAlreadyVoided {
        transaction_id: TransactionId,
        line_number: u32,
    },

    /// Only sale lines can be voided, adjusted or used as a parent.
    #[error("Line {line_number} in transaction {transaction_id} is not a sale line")]
    NotASaleLine {
        transaction_id: TransactionId,
        line_number: u32,
    },

    /// Commit attempted with less tendered than due.
    #[error("Under-tendered: total due {total_due}, tendered {total_tendered}")]
    UnderTendered { total_due: i64, total_tendered: i64 },

    /// Transaction already carries the maximum number of lines.
    #[error("Transaction cannot have more than {max} lines")]
    TooManyLines { max: usize },

    /// An amount computation would overflow i64 minor units.
    #[error("Amount overflow in minor-unit arithmetic")]
    AmountOverflow,

    /// Transaction has already been reversed by a compensating transaction.
    #[error("Transaction {transaction_id} already reversed by {reversed_by}")]
    AlreadyReversed {
        transaction_id: TransactionId,
        reversed_by: TransactionId,
    },

    /// Compensating transactions are final.
    #[error("Transaction {transaction_id} reverses {reverses} and cannot itself be reversed")]
    ReversalNotReversible {
        transaction_id: TransactionId,
        reverses: TransactionId,
    },

    /// Session cannot be found on this terminal.
    #[error("Session not found: {0}")]
    SessionNotFound(SessionId),

    /// Session has ended and owns no further transactions.
    #[error("Session {0} is closed")]
    SessionClosed(SessionId),

    /// Session still owns open transactions.
    #[error("Session {session_id} still owns {open} open transaction(s)")]
    SessionHasOpenTransactions { session_id: SessionId, open: usize },

    /// Terminal is draining or stopped.
    #[error("Terminal is {state}, not accepting new transactions")]
    NotAcceptingTransactions { state: TerminalState },

    /// Validation error (wraps ValidationError).
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

// =============================================================================
// Validation Error
// =============================================================================

/// Input validation errors.
///
/// These errors occur when caller input doesn't meet requirements.
/// Used for early validation before any WAL append happens.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// A required field is missing or empty.
    #[error("{field} is required")]
    Required { field: String },

    /// Field value is too long.
    #[error("{field} must be at most {max} characters")]
    TooLong { field: String, max: usize },

    /// Numeric value is out of range.
    #[error("{field} must be between {min} and {max}")]
    OutOfRange { field: String, min: i64, max: i64 },

    /// Value must be positive.
    #[error("{field} must be positive")]
    MustBePositive { field: String },

    /// Invalid format (e.g., lowercase currency code, spaces in product id).
    #[error("{field} has invalid format: {reason}")]
    InvalidFormat { field: String, reason: String },

    /// Value is not in allowed set.
    #[error("{field} must be one of: {allowed:?}")]
    NotAllowed { field: String, allowed: Vec<String> },
}

// =============================================================================
// Result Type Alias
// =============================================================================

/// Convenience type alias for Results with CoreError.
pub type CoreResult<T> = Result<T, CoreError>;

// =============================================================================
// Unit Tests
// =============================================================================
