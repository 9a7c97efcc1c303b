//! # Terminal Lifecycle
//!
//! Owns everything one terminal process holds: the lock handle, the
//! transaction store and the coordinator.
//!
//! ## State Machine
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │   Initializing ──► Active ──────────► Draining ──────────► Stopped      │
//! │        │             │                   │                    │         │
//! │   acquire lock    serve calls      reject new work      TerminalStopped │
//! │   recover WAL     poll messages    wait ≤ grace         + flush         │
//! │   TerminalStarted                  abort leftovers      unregister      │
//! │   register                                              release lock    │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The store is handed out as an explicitly owned `Arc<TransactionStore>`.
//! There is no global state.

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};
use titan_core::{TerminalState, TransactionId};
use titan_ledger::{
    LockHandle, LockManager, LockRecord, RecoveryReport, StoreSummary, TransactionStore,
};

use crate::config::TerminalConfig;
use crate::coordinator::{Coordinator, Incoming, MessagePayload};
use crate::error::TerminalResult;

/// Something `poll_messages` did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminalAction {
    /// A ConfigChange was applied (keys that took effect / were refused).
    ConfigUpdated {
        applied: Vec<String>,
        rejected: Vec<String>,
    },
    /// Shutdown was requested; the caller should run `shutdown(grace)`.
    ShutdownRequested {
        grace: Duration,
        requested_by: String,
    },
    /// An audit line was appended to the shared log.
    AuditRecorded { request_id: String },
}

/// Outcome of a graceful shutdown.
#[derive(Debug, Clone)]
pub struct ShutdownReport {
    /// Transactions still open at the deadline.
    pub aborted: Vec<TransactionId>,
    /// Recovered incomplete transactions, left open for the operator.
    pub incomplete: Vec<TransactionId>,
    pub summary: StoreSummary,
    pub unregistered: bool,
}

/// One running terminal.
pub struct Terminal {
    config: TerminalConfig,
    store: Arc<TransactionStore>,
    coordinator: Coordinator,
    lock: LockHandle,
    recovery: RecoveryReport,
    shutdown_request: Option<(Duration, String)>,
}

impl Terminal {
    /// Brings the terminal to Active.
    ///
    /// Fails with a lock error if another live process serves this
    /// terminal, and with a recovery error if the WAL is inconsistent.
    /// Registry publication is best-effort.
    pub async fn start(config: TerminalConfig) -> TerminalResult<Self> {
        config.validate()?;
        let terminal_id = config.terminal_id().to_string();
        let paths = config.paths();
        info!(
            terminal_id = %terminal_id,
            data_dir = %paths.dir().display(),
            wal_sync = %config.storage.wal_sync,
            "Terminal starting"
        );

        let lock = LockManager::new(config.data_root())
            .with_corrupt_grace(config.corrupt_lock_grace())
            .acquire(&terminal_id)?;

        let (store, recovery) =
            TransactionStore::open(&terminal_id, paths.wal(), config.store_options())?;
        if !recovery.previous_shutdown_clean {
            warn!(terminal_id = %terminal_id, "Previous run did not stop cleanly");
        }
        if !recovery.incomplete.is_empty() {
            warn!(
                terminal_id = %terminal_id,
                count = recovery.incomplete.len(),
                "Incomplete transactions need operator attention"
            );
        }
        store.mark_started()?;

        let coordinator = Coordinator::new(config.data_root(), &terminal_id, config.coordinator.clone());
        if let Err(e) = coordinator.register(paths.dir(), TerminalState::Active).await {
            warn!(terminal_id = %terminal_id, error = %e, "Registry publish failed, continuing unregistered");
        }

        info!(
            terminal_id = %terminal_id,
            entries_replayed = recovery.entries_replayed,
            incomplete = recovery.incomplete.len(),
            "Terminal active"
        );

        Ok(Terminal {
            config,
            store: Arc::new(store),
            coordinator,
            lock,
            recovery,
            shutdown_request: None,
        })
    }

    pub fn terminal_id(&self) -> &str {
        self.config.terminal_id()
    }

    pub fn config(&self) -> &TerminalConfig {
        &self.config
    }

    pub fn store(&self) -> Arc<TransactionStore> {
        Arc::clone(&self.store)
    }

    pub fn state(&self) -> TerminalState {
        self.store.terminal_state()
    }

    pub fn recovery_report(&self) -> &RecoveryReport {
        &self.recovery
    }

    pub fn coordinator(&self) -> &Coordinator {
        &self.coordinator
    }

    pub fn lock_record(&self) -> &LockRecord {
        self.lock.record()
    }

    /// Grace period of a received shutdown request, if any.
    pub fn shutdown_requested(&self) -> Option<Duration> {
        self.shutdown_request.as_ref().map(|(grace, _)| *grace)
    }

    // -------------------------------------------------------------------------
    // Messages
    // -------------------------------------------------------------------------

    /// Handles the shutdown marker, the inbox and broadcasts once.
    ///
    /// Coordination failures are logged and leave the message for the next
    /// poll; they never reach transaction processing.
    pub async fn poll_messages(&mut self) -> Vec<TerminalAction> {
        let mut actions = Vec::new();

        match self.coordinator.pending_shutdown() {
            Ok(Some(signal)) => {
                self.note_shutdown(signal.grace(), &signal.requested_by, &mut actions)
            }
            Ok(None) => {}
            Err(e) => warn!(error = %e, "Could not read shutdown marker"),
        }

        let incoming = match self.coordinator.receive() {
            Ok(incoming) => incoming,
            Err(e) => {
                warn!(error = %e, "Could not read messages");
                return actions;
            }
        };

        for item in incoming {
            if self.handle(&item, &mut actions).await {
                if let Err(e) = self.coordinator.ack(&item) {
                    warn!(message_id = %item.message.id, error = %e, "Ack failed");
                }
            }
        }
        actions
    }

    /// Returns whether the message was handled and can be acked.
    async fn handle(&mut self, item: &Incoming, actions: &mut Vec<TerminalAction>) -> bool {
        match &item.message.payload {
            MessagePayload::ConfigChange { settings } => {
                let mut coordinator_settings = self.config.coordinator.clone();
                let mut applied = Vec::new();
                let mut rejected = Vec::new();
                for (key, value) in settings {
                    match coordinator_settings.apply_setting(key, value) {
                        Ok(()) => applied.push(key.clone()),
                        Err(e) => {
                            warn!(key = %key, error = %e, "Config change refused");
                            rejected.push(key.clone());
                        }
                    }
                }
                info!(
                    sender = %item.message.sender,
                    applied = applied.len(),
                    rejected = rejected.len(),
                    "Config change received"
                );
                self.config.coordinator = coordinator_settings.clone();
                self.coordinator.update_settings(coordinator_settings);
                actions.push(TerminalAction::ConfigUpdated { applied, rejected });
                true
            }
            MessagePayload::ShutdownRequest { grace_secs } => {
                self.note_shutdown(Duration::from_secs(*grace_secs), &item.message.sender, actions);
                true
            }
            MessagePayload::AuditRequest { request_id } => {
                match self.coordinator.record_audit(request_id, &self.store.summary()).await {
                    Ok(_) => {
                        actions.push(TerminalAction::AuditRecorded {
                            request_id: request_id.clone(),
                        });
                        true
                    }
                    Err(e) => {
                        warn!(request_id = %request_id, error = %e, "Audit append failed, will retry");
                        false
                    }
                }
            }
        }
    }

    fn note_shutdown(&mut self, grace: Duration, requested_by: &str, actions: &mut Vec<TerminalAction>) {
        if self.shutdown_request.is_some() {
            return;
        }
        info!(requested_by, grace_secs = grace.as_secs(), "Shutdown requested");
        self.shutdown_request = Some((grace, requested_by.to_string()));
        actions.push(TerminalAction::ShutdownRequested {
            grace,
            requested_by: requested_by.to_string(),
        });
    }

    // -------------------------------------------------------------------------
    // Shutdown
    // -------------------------------------------------------------------------

    /// Drains and stops the terminal.
    ///
    /// New transactions are rejected at once. Open ones get up to `grace` to
    /// finish; whatever is still open then is aborted. Incomplete
    /// transactions from recovery are neither waited for nor aborted. The
    /// WAL is flushed, the registry entry removed and the lock released.
    pub async fn shutdown(self, grace: Duration) -> TerminalResult<ShutdownReport> {
        let Terminal {
            config,
            store,
            coordinator,
            mut lock,
            ..
        } = self;
        let terminal_id = config.terminal_id().to_string();
        info!(terminal_id = %terminal_id, grace_secs = grace.as_secs(), "Terminal draining");

        store.begin_drain()?;
        if let Err(e) = coordinator.set_state(TerminalState::Draining).await {
            warn!(error = %e, "Could not publish Draining state");
        }

        let poll = config.coordinator.poll_interval();
        let deadline = tokio::time::Instant::now() + grace;
        loop {
            let open = store.in_flight_transactions().len();
            if open == 0 {
                break;
            }
            let now = tokio::time::Instant::now();
            if now >= deadline {
                warn!(open, "Shutdown grace elapsed with open transactions");
                break;
            }
            tokio::time::sleep(poll.min(deadline - now)).await;
        }

        let aborted = store.abort_open_transactions("shutdown grace period elapsed")?;
        let incomplete = store.incomplete_transactions();
        if !incomplete.is_empty() {
            warn!(
                count = incomplete.len(),
                "Stopping with incomplete transactions awaiting operator resolution"
            );
        }
        store.mark_stopped()?;

        let unregistered = match coordinator.unregister().await {
            Ok(removed) => removed,
            Err(e) => {
                warn!(error = %e, "Could not remove registry entry");
                false
            }
        };
        lock.release()?;

        let summary = store.summary();
        info!(
            terminal_id = %terminal_id,
            aborted = aborted.len(),
            committed = summary.committed_transactions,
            "Terminal stopped"
        );
        Ok(ShutdownReport {
            aborted,
            incomplete,
            summary,
            unregistered,
        })
    }
}
