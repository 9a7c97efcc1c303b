//! # titan-ledger: Durable State for one Terminal
//!
//! Everything a terminal writes to disk goes through this crate.
//!
//! ## Layers
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  store::TransactionStore    validate ─► append ─► apply                 │
//! │        │                                                                │
//! │        ├── store::state::LedgerState   (one fold, live + replay)        │
//! │        │                                                                │
//! │        ▼                                                                │
//! │  wal::WalWriter / WalReader  length + CRC32 framed JSON lines           │
//! │                                                                         │
//! │  recovery::recover           replay at startup, report what was open    │
//! │  lock::LockManager           one process per terminal id                │
//! │  layout::TerminalPaths       where each file lives                      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Startup Order
//!
//! 1. `LockManager::acquire` (fails fast if another live process holds it)
//! 2. `TransactionStore::open` (recovers the WAL, then opens it for append)
//! 3. `TransactionStore::mark_started`
//!
//! Shutdown runs the reverse: `begin_drain`, wait, `mark_stopped`, release.

pub mod error;
pub mod layout;
pub mod lock;
pub mod recovery;
pub mod store;
pub mod wal;

pub use error::{DurabilityError, LedgerError, LedgerResult, LockError, RecoveryError};
pub use layout::TerminalPaths;
pub use lock::{Liveness, LockHandle, LockManager, LockRecord, OsProcessTable, ProcessTable};
pub use recovery::{recover, IncompleteTransaction, RecoveryReport};
pub use store::{StoreOptions, StoreSummary, TransactionStore};
pub use wal::{Durability, SyncPolicy, WalEntry, WalOp, WalReader, WalWriter};
