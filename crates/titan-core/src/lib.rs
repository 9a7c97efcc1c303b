//! # titan-core: Pure Business Logic for the Titan Terminal Kernel
//!
//! This crate is the **heart** of the terminal kernel. It contains every
//! transaction rule as pure functions with zero I/O dependencies.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                     Titan Terminal Architecture                         │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │              Callers (UI, assistant, service host)              │   │
//! │  │    BeginTransaction ──► AddLine ──► AddTender ──► Commit        │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │                 titan-terminal (lifecycle)                      │   │
//! │  │    lock ─► recover ─► Active ─► drain ─► release                │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │                 titan-ledger (WAL + store)                      │   │
//! │  │    validate ─► WAL append ─► apply                              │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │               ★ titan-core (THIS CRATE) ★                       │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────┐  ┌───────────┐  ┌─────────────┐ ┌───────────┐  │   │
//! │  │   │   types   │  │   money   │  │ transaction │ │ validation│  │   │
//! │  │   │   Line    │  │   Money   │  │ Transaction │ │   rules   │  │   │
//! │  │   │  Tender   │  │ (minor u.)│  │  Snapshot   │ │  checks   │  │   │
//! │  │   └───────────┘  └───────────┘  └─────────────┘ └───────────┘  │   │
//! │  │                                                                 │   │
//! │  │   NO I/O • NO FILES • NO NETWORK • PURE FUNCTIONS               │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`types`] - Domain types (Line, Tender, Session, states, ids)
//! - [`money`] - Money type with integer arithmetic (no floating point!)
//! - [`transaction`] - Transaction aggregate: checks, mutations, totals
//! - [`error`] - Domain error types
//! - [`validation`] - Argument validation
//!
//! ## Design Principles
//!
//! 1. **Pure Functions**: Every function is deterministic - same input = same output
//! 2. **No I/O**: WAL, file system and process access is FORBIDDEN here
//! 3. **Integer Money**: All monetary values are i64 minor units
//! 4. **Explicit Errors**: All errors are typed, never strings or panics
//!
//! ## Example Usage
//!
//! ```rust
//! use titan_core::money::Money;
//!
//! // Create money from minor units (never from floats!)
//! let price = Money::from_minor(399);
//!
//! // 2 × 3.99 = 7.98, tendered 8.00 → change 0.02
//! let due = price.checked_mul_quantity(2).unwrap();
//! let change = Money::from_minor(800).checked_sub(due).unwrap();
//! assert_eq!(change.to_scaled_string(2), "0.02");
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod money;
pub mod transaction;
pub mod types;
pub mod validation;

// =============================================================================
// Re-exports for Convenience
// =============================================================================
// These allow users to do `use titan_core::Money` instead of
// `use titan_core::money::Money`

pub use error::{CoreError, CoreResult, ValidationError};
pub use money::Money;
pub use transaction::{Transaction, TransactionSnapshot};
pub use types::*;

// =============================================================================
// Crate-Level Constants
// =============================================================================

/// Maximum quantity on a single sale line.
///
/// ## Business Reason
/// Catches keying mistakes (typing 10000 instead of 10) before they reach
/// the log, where they could only be voided, never removed.
pub const MAX_ITEM_QUANTITY: i64 = 9_999;

/// Maximum lines (sale, void and adjustment) in one transaction.
pub const MAX_TRANSACTION_LINES: usize = 1_000;

/// Decimal-place counts a caller may declare for its currency.
///
/// 0 (JPY), 2 (USD), 3 (BHD) are the documented cases; 1 is accepted too.
pub const SUPPORTED_DECIMAL_PLACES: [u8; 4] = [0, 1, 2, 3];
