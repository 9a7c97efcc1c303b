//! # titan-terminal: One Terminal Process
//!
//! ## Architecture
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        titan-terminal                                   │
//! │                                                                         │
//! │  ┌────────────────┐     ┌──────────────────┐     ┌──────────────────┐  │
//! │  │     Config     │────►│     Terminal     │────►│   Coordinator    │  │
//! │  │  TOML + env    │     │ lock, store,     │     │ registry, inbox, │  │
//! │  │                │     │ lifecycle        │     │ broadcast, audit │  │
//! │  └────────────────┘     └────────┬─────────┘     └──────────────────┘  │
//! │                                  │                                      │
//! │                                  ▼                                      │
//! │                    Arc<titan_ledger::TransactionStore>                  │
//! │                    (handed to callers: UI, service host)                │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`config`] - `TerminalConfig` (TOML file, environment overrides)
//! - [`coordinator`] - Cross-process registry, messages, audit log, shutdown
//! - [`terminal`] - Start, message polling, graceful shutdown
//! - [`error`] - `TerminalError`, `CoordinationError`

pub mod config;
pub mod coordinator;
pub mod error;
pub mod terminal;

pub use config::{TerminalConfig, WalSyncMode};
pub use coordinator::{Coordinator, Message, MessagePayload, RegistryEntry};
pub use error::{CoordinationError, CoordinationResult, TerminalError, TerminalResult};
pub use terminal::{ShutdownReport, Terminal, TerminalAction};
