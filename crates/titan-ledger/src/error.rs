//! # Ledger Error Types
//!
//! Error types for WAL, lock and store operations.
//!
//! ## Error Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Error Propagation                                    │
//! │                                                                         │
//! │  CoreError (rule violated)    ─┐                                        │
//! │  LockError (lock file)        ─┤                                        │
//! │  DurabilityError (WAL sync)   ─┼──► LedgerError (this module)           │
//! │  RecoveryError (WAL replay)   ─┘         │                              │
//! │                                          ▼                              │
//! │                              TerminalError (titan-terminal)             │
//! │                                          │                              │
//! │                                          ▼                              │
//! │                              Caller decides: fix input, retry, stop     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use thiserror::Error;
use titan_core::CoreError;

// =============================================================================
// Lock Errors
// =============================================================================

/// Terminal lock acquisition / release errors.
///
/// Recovering a stale lock is not an error: it is logged and acquisition
/// proceeds.
#[derive(Debug, Error)]
pub enum LockError {
    /// Another live process holds the terminal.
    ///
    /// ## When This Occurs
    /// - A second process starts for the same terminal id
    /// - The holder's liveness cannot be determined (treated as alive)
    /// - The lock record is unreadable but too fresh to be called stale
    #[error("Terminal {terminal_id} is already locked (holder pid: {holder_pid:?})")]
    AlreadyHeld {
        terminal_id: String,
        holder_pid: Option<u32>,
        acquired_at: Option<DateTime<Utc>>,
    },

    /// The lock or guard file could not be read, created or removed.
    #[error("Lock I/O failure on {path}: {source}")]
    IoFailure {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

// =============================================================================
// Durability Errors
// =============================================================================

/// The WAL could not make an entry durable.
///
/// ## When This Occurs
/// - Disk full / quota exceeded during write
/// - `sync_data` reports an I/O error
/// - Entry payload cannot be encoded
///
/// After an I/O failure the writer has rolled the file back to its last
/// synced length and dropped `lost_entries` buffered entries.
#[derive(Debug, Error)]
pub enum DurabilityError {
    #[error("WAL write failed ({lost_entries} unsynced entries dropped): {source}")]
    Io {
        lost_entries: usize,
        #[source]
        source: std::io::Error,
    },

    #[error("WAL entry could not be encoded: {0}")]
    Encode(#[from] serde_json::Error),

    /// The writer was disabled by an earlier failed rollback.
    #[error("WAL writer is unusable after a failed rollback")]
    Poisoned,
}

// =============================================================================
// Recovery Errors
// =============================================================================

/// WAL replay failures that block the terminal from becoming Active.
///
/// A corrupt tail is NOT one of these: it is reported in the recovery
/// report and truncated by the writer.
#[derive(Debug, Error)]
pub enum RecoveryError {
    /// The log is well-formed but describes an impossible history.
    ///
    /// ## When This Occurs
    /// - Sequence numbers out of order or repeated
    /// - Mutation of an unknown or already closed transaction
    /// - A transaction or session id begun twice
    #[error("WAL inconsistent at sequence {sequence}: {reason}")]
    Inconsistent { sequence: u64, reason: String },

    #[error("WAL read failed: {0}")]
    Io(#[from] std::io::Error),
}

// =============================================================================
// Ledger Error
// =============================================================================

/// Every error the ledger surfaces.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// Caller input or transaction state rejected the operation.
    /// Nothing was written.
    #[error(transparent)]
    Validation(#[from] CoreError),

    #[error(transparent)]
    Lock(#[from] LockError),

    #[error(transparent)]
    Durability(#[from] DurabilityError),

    #[error(transparent)]
    Recovery(#[from] RecoveryError),

    #[error("Ledger I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl LedgerError {
    /// True for caller mistakes: retrying the same call fails again.
    pub fn is_validation(&self) -> bool {
        matches!(self, LedgerError::Validation(_))
    }

    /// Whether the same call may succeed later.
    ///
    /// ## Categories
    /// ```text
    /// Retryable (transient):          Not retryable (permanent):
    /// ├── Durability::Io (disk)       ├── Validation
    /// └── Io                          ├── Lock (operator must act)
    ///                                 ├── Recovery (log is inconsistent)
    ///                                 └── Durability::Encode / Poisoned
    /// ```
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            LedgerError::Durability(DurabilityError::Io { .. }) | LedgerError::Io(_)
        )
    }
}

impl From<titan_core::ValidationError> for LedgerError {
    fn from(err: titan_core::ValidationError) -> Self {
        LedgerError::Validation(CoreError::Validation(err))
    }
}

/// Result type for ledger operations.
pub type LedgerResult<T> = Result<T, LedgerError>;

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use titan_core::ValidationError;

    #[test]
    fn test_categorisation() {
        let err: LedgerError = ValidationError::MustBePositive {
            field: "quantity".to_string(),
        }
        .into();
        assert!(err.is_validation());
        assert!(!err.is_retryable());

        let err: LedgerError = DurabilityError::Io {
            lost_entries: 2,
            source: std::io::Error::new(std::io::ErrorKind::Other, "disk full"),
        }
        .into();
        assert!(err.is_retryable());
        assert!(err.to_string().contains("2 unsynced entries dropped"));

        let err: LedgerError = RecoveryError::Inconsistent {
            sequence: 4,
            reason: "duplicate transaction id 1".to_string(),
        }
        .into();
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_already_held_message() {
        let err = LockError::AlreadyHeld {
            terminal_id: "T1".to_string(),
            holder_pid: Some(4242),
            acquired_at: None,
        };
        assert_eq!(
            err.to_string(),
            "Terminal T1 is already locked (holder pid: Some(4242))"
        );
    }
}
