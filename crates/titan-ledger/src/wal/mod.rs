//! # Write-Ahead Log
//!
//! Append-only durable record of every state mutation of one terminal.
//!
//! ## Layout
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  <data_root>/terminals/<terminal_id>/ledger.wal                          │
//! │                                                                         │
//! │  00000071 5be2c1a0 {"sequence":1,...,"op":"begin_transaction",...}      │
//! │  00000104 0c9ffe12 {"sequence":2,...,"op":"add_line",...}               │
//! │  00000086 9a31e7d4 {"sequence":3,...,"op":"add_tender",...}             │
//! │  00000079 e0017a55 {"sequence":4,...,"op":"commit",...}                 │
//! │  0000007   {"seq                    ◄── torn tail (crash mid-write)     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! - [`entry`] frames and checks one line
//! - [`reader`] scans the valid prefix and reports where it ends
//! - [`writer`] appends, syncs and repairs the tail on open
//!
//! The WAL is the single source of truth: in-memory state is always a fold
//! of its valid prefix.

pub mod entry;
pub mod op;
pub mod reader;
pub mod writer;

pub use entry::{DecodeError, WalEntry};
pub use op::WalOp;
pub use reader::{CorruptTail, WalEntries, WalReader};
pub use writer::{Durability, SyncPolicy, WalWriter};
