//! # Terminal Error Types
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                     Terminal Error Categories                           │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │  Configuration  │  │     Ledger      │  │     Coordination        │ │
//! │  │                 │  │                 │  │                         │ │
//! │  │  InvalidConfig  │  │  Lock           │  │  Io                     │ │
//! │  │  MissingTermId  │  │  Durability     │  │  Malformed              │ │
//! │  │  ConfigLoad/Save│  │  Recovery       │  │  Signal                 │ │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘ │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Coordination failures never fail a transaction: the terminal logs them
//! and carries on. They only surface from explicit coordinator calls.

use std::path::PathBuf;

use thiserror::Error;
use titan_ledger::{LedgerError, LockError};

/// Result type alias for terminal operations.
pub type TerminalResult<T> = Result<T, TerminalError>;

/// Result type alias for coordinator operations.
pub type CoordinationResult<T> = Result<T, CoordinationError>;

// =============================================================================
// Coordination Errors
// =============================================================================

/// Failures talking to other terminals through the shared directory.
#[derive(Debug, Error)]
pub enum CoordinationError {
    /// Filesystem operation on the shared area failed.
    #[error("Coordination I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A registry entry, message or marker could not be parsed.
    #[error("Malformed {what} at {path}: {reason}")]
    Malformed {
        what: &'static str,
        path: PathBuf,
        reason: String,
    },

    /// Failed to serialize a record before writing it.
    #[error("Serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Signal delivery to another terminal failed.
    #[error("Could not signal pid {pid}: {reason}")]
    Signal { pid: u32, reason: String },

    /// Refused to signal a process (ourselves, or on another host).
    #[error("Refusing to terminate {terminal_id}: {reason}")]
    TerminateRefused { terminal_id: String, reason: String },
}

impl CoordinationError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        CoordinationError::Io {
            path: path.into(),
            source,
        }
    }

    /// Returns true if the operation may succeed when retried.
    ///
    /// ## Retryable Errors
    /// - I/O failures other than NotFound / PermissionDenied (transient
    ///   contention on the shared directory)
    ///
    /// ## Non-Retryable Errors
    /// - Malformed records
    /// - Serialization
    /// - Signal delivery / refusal
    pub fn is_retryable(&self) -> bool {
        match self {
            CoordinationError::Io { source, .. } => !matches!(
                source.kind(),
                std::io::ErrorKind::NotFound | std::io::ErrorKind::PermissionDenied
            ),
            _ => false,
        }
    }
}

// =============================================================================
// Terminal Errors
// =============================================================================

/// Every error the terminal process surfaces.
#[derive(Debug, Error)]
pub enum TerminalError {
    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// Invalid terminal configuration.
    #[error("Invalid terminal configuration: {0}")]
    InvalidConfig(String),

    /// No terminal id configured (file or TITAN_TERMINAL_ID).
    #[error("Terminal ID not configured. Set [terminal].id or TITAN_TERMINAL_ID.")]
    MissingTerminalId,

    /// Failed to load config file.
    #[error("Failed to load config: {0}")]
    ConfigLoadFailed(String),

    /// Failed to save config file.
    #[error("Failed to save config: {0}")]
    ConfigSaveFailed(String),

    // =========================================================================
    // Lower Layers
    // =========================================================================
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Coordination(#[from] CoordinationError),
}

// =============================================================================
// Error Conversions
// =============================================================================

impl From<LockError> for TerminalError {
    fn from(err: LockError) -> Self {
        TerminalError::Ledger(LedgerError::Lock(err))
    }
}

impl From<toml::de::Error> for TerminalError {
    fn from(err: toml::de::Error) -> Self {
        TerminalError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::ser::Error> for TerminalError {
    fn from(err: toml::ser::Error) -> Self {
        TerminalError::ConfigSaveFailed(err.to_string())
    }
}

impl TerminalError {
    /// Returns true if retrying the same call may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            TerminalError::Ledger(err) => err.is_retryable(),
            TerminalError::Coordination(err) => err.is_retryable(),
            _ => false,
        }
    }

    /// Returns true if this error indicates a configuration problem.
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            TerminalError::InvalidConfig(_)
                | TerminalError::MissingTerminalId
                | TerminalError::ConfigLoadFailed(_)
                | TerminalError::ConfigSaveFailed(_)
        )
    }

    /// True when another live process holds this terminal's lock.
    pub fn is_lock_held(&self) -> bool {
        matches!(
            self,
            TerminalError::Ledger(LedgerError::Lock(LockError::AlreadyHeld { .. }))
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn test_retryable_errors() {
        let busy = CoordinationError::io("/shared/registry", io::Error::from(io::ErrorKind::Interrupted));
        assert!(busy.is_retryable());

        let missing = CoordinationError::io("/shared/registry", io::Error::from(io::ErrorKind::NotFound));
        assert!(!missing.is_retryable());

        assert!(!CoordinationError::Signal {
            pid: 42,
            reason: "EPERM".into()
        }
        .is_retryable());

        assert!(TerminalError::from(busy).is_retryable());
        assert!(!TerminalError::MissingTerminalId.is_retryable());
    }

    #[test]
    fn test_lock_held_classification() {
        let err = TerminalError::from(LockError::AlreadyHeld {
            terminal_id: "LANE-01".into(),
            holder_pid: Some(4242),
            acquired_at: None,
        });
        assert!(err.is_lock_held());
        assert!(!err.is_config_error());
        assert!(err.to_string().contains("LANE-01"));
    }
}
