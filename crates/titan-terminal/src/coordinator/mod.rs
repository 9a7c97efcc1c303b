//! # Terminal Coordinator
//!
//! Terminal processes on one machine coordinate only through files under
//! `<data_root>/shared/`.
//!
//! ## Shared Layout
//! ```text
//! <data_root>/shared/
//! ├── registry/<terminal_id>.json     who is running (RegistryEntry)
//! ├── broadcast/<msg>.json            messages for every terminal
//! ├── inbox/<terminal_id>/<msg>.json  messages for one terminal
//! ├── audit.log                       aggregated audit lines
//! └── shutdown.signal                 system-wide shutdown marker
//! ```
//!
//! ## Graceful Shutdown Protocol
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  admin: request_shutdown(grace)                                         │
//! │     ├── write shutdown.signal (atomic)                                  │
//! │     └── broadcast ShutdownRequest { grace_secs }                        │
//! │                                                                         │
//! │  each terminal (next poll):                                             │
//! │     Draining ─► wait for open transactions (≤ grace)                    │
//! │              ─► abort leftovers ─► TerminalStopped + flush              │
//! │              ─► unregister ─► release lock                              │
//! │                                                                         │
//! │  admin: await_drain(grace, poll)                                        │
//! │     └── registry still non-empty at the deadline?                       │
//! │           └── force_terminate(entry)  (SIGTERM)                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Writes to the shared area are retried with exponential backoff. A
//! coordination failure is logged by the terminal and never fails a
//! transaction.

pub mod audit;
pub mod message;
pub mod queue;
pub mod registry;

use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use backoff::backoff::Backoff;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use titan_core::TerminalState;
use titan_ledger::StoreSummary;
use uuid::Uuid;

use crate::config::CoordinatorSettings;
use crate::error::{CoordinationError, CoordinationResult};

pub use audit::{AuditLog, AuditRecord};
pub use message::{Deduplicator, Message, MessageKind, MessagePayload};
pub use queue::{Channel, FileQueue, MessageQueue};
pub use registry::{Registry, RegistryEntry};

// =============================================================================
// Shared Paths
// =============================================================================

/// Paths under `<data_root>/shared`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SharedPaths {
    root: PathBuf,
}

impl SharedPaths {
    pub fn new(data_root: impl AsRef<Path>) -> Self {
        SharedPaths {
            root: data_root.as_ref().join("shared"),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn registry(&self) -> PathBuf {
        self.root.join("registry")
    }

    pub fn audit_log(&self) -> PathBuf {
        self.root.join("audit.log")
    }

    pub fn shutdown_signal(&self) -> PathBuf {
        self.root.join("shutdown.signal")
    }
}

/// Publishes `bytes` at `path`: readers see the old file or the complete
/// new one, never a partial write.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> CoordinationResult<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("entry");
    let tmp = dir.join(format!(".{}.{}.tmp", name, Uuid::new_v4().simple()));

    let result = (|| -> std::io::Result<()> {
        let mut file = File::create(&tmp)?;
        file.write_all(bytes)?;
        file.sync_all()?;
        fs::rename(&tmp, path)
    })();

    if let Err(e) = result {
        let _ = fs::remove_file(&tmp);
        return Err(CoordinationError::io(path, e));
    }
    Ok(())
}

// =============================================================================
// Shutdown Marker
// =============================================================================

/// Contents of `shared/shutdown.signal`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShutdownSignal {
    pub requested_by: String,
    pub requested_at: DateTime<Utc>,
    pub grace_secs: u64,
}

impl ShutdownSignal {
    pub fn grace(&self) -> Duration {
        Duration::from_secs(self.grace_secs)
    }
}

// =============================================================================
// Coordinator
// =============================================================================

/// A message taken off a channel, waiting to be handled and acked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Incoming {
    pub channel: Channel,
    pub message: Message,
}

/// One terminal's view of the shared area.
pub struct Coordinator<Q: MessageQueue = FileQueue> {
    terminal_id: String,
    shared: SharedPaths,
    registry: Registry,
    queue: Q,
    audit: AuditLog,
    dedup: Mutex<Deduplicator>,
    started_at: DateTime<Utc>,
    settings: CoordinatorSettings,
}

impl Coordinator<FileQueue> {
    /// Coordinator over the filesystem transport.
    pub fn new(data_root: impl AsRef<Path>, terminal_id: &str, settings: CoordinatorSettings) -> Self {
        let queue = FileQueue::new(SharedPaths::new(&data_root).root());
        Self::with_queue(data_root, terminal_id, settings, queue)
    }
}

impl<Q: MessageQueue> Coordinator<Q> {
    pub fn with_queue(
        data_root: impl AsRef<Path>,
        terminal_id: &str,
        settings: CoordinatorSettings,
        queue: Q,
    ) -> Self {
        let shared = SharedPaths::new(data_root);
        Coordinator {
            terminal_id: terminal_id.to_string(),
            registry: Registry::new(shared.registry()),
            audit: AuditLog::new(shared.audit_log()),
            shared,
            queue,
            dedup: Mutex::new(Deduplicator::new(settings.dedup_capacity)),
            started_at: Utc::now(),
            settings,
        }
    }

    pub fn terminal_id(&self) -> &str {
        &self.terminal_id
    }

    pub fn shared(&self) -> &SharedPaths {
        &self.shared
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn audit_log(&self) -> &AuditLog {
        &self.audit
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn settings(&self) -> &CoordinatorSettings {
        &self.settings
    }

    pub fn update_settings(&mut self, settings: CoordinatorSettings) {
        self.settings = settings;
    }

    fn dedup(&self) -> MutexGuard<'_, Deduplicator> {
        self.dedup.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Runs `op`, retrying retryable failures with exponential backoff.
    ///
    /// Waits on the runtime timer between attempts, so other tasks keep
    /// running while a shared-area write is retried.
    async fn retry<T>(
        &self,
        operation: &str,
        mut op: impl FnMut() -> CoordinationResult<T>,
    ) -> CoordinationResult<T> {
        let mut backoff = self.settings.backoff();
        loop {
            match op() {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() => match backoff.next_backoff() {
                    Some(delay) => {
                        warn!(operation, error = %e, ?delay, "Coordination write failed, retrying");
                        tokio::time::sleep(delay).await;
                    }
                    None => return Err(e),
                },
                Err(e) => return Err(e),
            }
        }
    }

    // -------------------------------------------------------------------------
    // Registry
    // -------------------------------------------------------------------------

    /// Publishes this process in the registry.
    pub async fn register(
        &self,
        data_dir: impl Into<PathBuf>,
        state: TerminalState,
    ) -> CoordinationResult<RegistryEntry> {
        let entry = RegistryEntry::new(
            &self.terminal_id,
            std::process::id(),
            self.started_at,
            data_dir,
            state,
        );
        self.retry("register", || self.registry.register(&entry)).await?;
        info!(terminal_id = %self.terminal_id, pid = entry.pid, "Terminal registered");
        Ok(entry)
    }

    pub async fn set_state(&self, state: TerminalState) -> CoordinationResult<()> {
        self.retry("update_state", || self.registry.update_state(&self.terminal_id, state)).await?;
        Ok(())
    }

    pub async fn unregister(&self) -> CoordinationResult<bool> {
        let removed = self.retry("unregister", || self.registry.unregister(&self.terminal_id)).await?;
        info!(terminal_id = %self.terminal_id, "Terminal unregistered");
        Ok(removed)
    }

    /// Registered terminals other than this one.
    pub fn peers(&self) -> CoordinationResult<Vec<RegistryEntry>> {
        Ok(self
            .registry
            .list()?
            .into_iter()
            .filter(|e| e.terminal_id != self.terminal_id)
            .collect())
    }

    // -------------------------------------------------------------------------
    // Messaging
    // -------------------------------------------------------------------------

    /// Sends `payload` to one terminal's inbox.
    pub async fn send(&self, to: &str, payload: MessagePayload) -> CoordinationResult<Message> {
        let message = Message::new(&self.terminal_id, payload).with_ttl(self.settings.message_ttl());
        let channel = Channel::Inbox(to.to_string());
        self.retry("send", || self.queue.enqueue(&channel, &message)).await?;
        Ok(message)
    }

    /// Sends `payload` to every terminal.
    pub async fn broadcast(&self, payload: MessagePayload) -> CoordinationResult<Message> {
        let message = Message::new(&self.terminal_id, payload).with_ttl(self.settings.message_ttl());
        self.retry("broadcast", || self.queue.enqueue(&Channel::Broadcast, &message)).await?;
        Ok(message)
    }

    /// New messages: the inbox in arrival order, then broadcasts.
    ///
    /// Skips ids already handled, our own broadcasts, and broadcasts created
    /// before this coordinator started.
    pub fn receive(&self) -> CoordinationResult<Vec<Incoming>> {
        let inbox = Channel::Inbox(self.terminal_id.clone());
        let inbox_messages = self.queue.pending(&inbox)?;
        let broadcasts = self.queue.pending(&Channel::Broadcast)?;

        let dedup = self.dedup();
        let mut incoming = Vec::new();

        for message in inbox_messages {
            if dedup.contains(&message.id) {
                // Handled earlier; the previous ack did not stick.
                if let Err(e) = self.queue.ack(&inbox, message.id) {
                    warn!(message_id = %message.id, error = %e, "Re-ack failed");
                }
                continue;
            }
            incoming.push(Incoming {
                channel: inbox.clone(),
                message,
            });
        }

        for message in broadcasts {
            if message.sender == self.terminal_id
                || message.created_at < self.started_at
                || dedup.contains(&message.id)
            {
                continue;
            }
            incoming.push(Incoming {
                channel: Channel::Broadcast,
                message,
            });
        }

        Ok(incoming)
    }

    /// Marks a received message handled.
    pub fn ack(&self, incoming: &Incoming) -> CoordinationResult<()> {
        self.dedup().insert(incoming.message.id);
        self.queue.ack(&incoming.channel, incoming.message.id)?;
        debug!(message_id = %incoming.message.id, channel = %incoming.channel, "Message acked");
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Audit
    // -------------------------------------------------------------------------

    pub async fn record_audit(&self, request_id: &str, summary: &StoreSummary) -> CoordinationResult<AuditRecord> {
        let record = AuditRecord::from_summary(request_id, summary);
        self.retry("audit", || self.audit.append(&record)).await?;
        info!(request_id, terminal_id = %self.terminal_id, "Audit record appended");
        Ok(record)
    }

    // -------------------------------------------------------------------------
    // Shutdown
    // -------------------------------------------------------------------------

    /// Asks every terminal to drain and stop within `grace`.
    pub async fn request_shutdown(&self, grace: Duration) -> CoordinationResult<Message> {
        let signal = ShutdownSignal {
            requested_by: self.terminal_id.clone(),
            requested_at: Utc::now(),
            grace_secs: grace.as_secs(),
        };
        fs::create_dir_all(self.shared.root()).map_err(|e| CoordinationError::io(self.shared.root(), e))?;
        let bytes = serde_json::to_vec_pretty(&signal)?;
        let path = self.shared.shutdown_signal();
        self.retry("shutdown_signal", || write_atomic(&path, &bytes)).await?;

        let message = self
            .broadcast(MessagePayload::ShutdownRequest {
                grace_secs: grace.as_secs(),
            })
            .await?;
        info!(
            requested_by = %self.terminal_id,
            grace_secs = grace.as_secs(),
            "System-wide shutdown requested"
        );
        Ok(message)
    }

    /// The shutdown marker, if present.
    pub fn shutdown_signal(&self) -> CoordinationResult<Option<ShutdownSignal>> {
        let path = self.shared.shutdown_signal();
        match fs::read(&path) {
            Ok(bytes) => serde_json::from_slice(&bytes).map(Some).map_err(|e| {
                CoordinationError::Malformed {
                    what: "shutdown signal",
                    path,
                    reason: e.to_string(),
                }
            }),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(CoordinationError::io(path, e)),
        }
    }

    /// A marker written by someone else after this coordinator started.
    pub fn pending_shutdown(&self) -> CoordinationResult<Option<ShutdownSignal>> {
        Ok(self.shutdown_signal()?.filter(|signal| {
            signal.requested_by != self.terminal_id && signal.requested_at >= self.started_at
        }))
    }

    pub fn clear_shutdown_signal(&self) -> CoordinationResult<()> {
        let path = self.shared.shutdown_signal();
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(CoordinationError::io(path, e)),
        }
    }

    /// Polls the registry until no other terminal is registered or `grace`
    /// elapses. Returns the terminals still registered.
    pub async fn await_drain(
        &self,
        grace: Duration,
        poll: Duration,
    ) -> CoordinationResult<Vec<RegistryEntry>> {
        let deadline = tokio::time::Instant::now() + grace;
        loop {
            let remaining = self.peers()?;
            if remaining.is_empty() {
                info!("All terminals drained");
                return Ok(remaining);
            }

            let now = tokio::time::Instant::now();
            if now >= deadline {
                warn!(
                    remaining = remaining.len(),
                    "Drain grace elapsed with terminals still registered"
                );
                return Ok(remaining);
            }
            tokio::time::sleep(poll.min(deadline - now)).await;
        }
    }

    /// Sends SIGTERM to a registered terminal that did not drain.
    ///
    /// An entry whose process is already gone is removed from the registry.
    pub fn force_terminate(&self, entry: &RegistryEntry) -> CoordinationResult<()> {
        let refuse = |reason: String| CoordinationError::TerminateRefused {
            terminal_id: entry.terminal_id.clone(),
            reason,
        };
        if entry.pid == 0 || entry.pid == std::process::id() {
            return Err(refuse(format!("pid {} is not a terminal process", entry.pid)));
        }
        let local = titan_ledger::lock::hostname();
        if entry.hostname != local {
            return Err(refuse(format!("registered on host {}", entry.hostname)));
        }

        #[cfg(unix)]
        {
            use nix::errno::Errno;
            use nix::sys::signal::{kill, Signal};
            use nix::unistd::Pid;

            let raw = i32::try_from(entry.pid).map_err(|_| CoordinationError::Signal {
                pid: entry.pid,
                reason: "pid out of range".into(),
            })?;
            match kill(Pid::from_raw(raw), Signal::SIGTERM) {
                Ok(()) => {
                    warn!(terminal_id = %entry.terminal_id, pid = entry.pid, "Sent SIGTERM to terminal");
                    Ok(())
                }
                Err(Errno::ESRCH) => {
                    info!(
                        terminal_id = %entry.terminal_id,
                        pid = entry.pid,
                        "Terminal process already gone, removing registry entry"
                    );
                    self.registry.unregister(&entry.terminal_id)?;
                    Ok(())
                }
                Err(errno) => Err(CoordinationError::Signal {
                    pid: entry.pid,
                    reason: errno.to_string(),
                }),
            }
        }

        #[cfg(not(unix))]
        {
            Err(CoordinationError::Signal {
                pid: entry.pid,
                reason: "signals are not supported on this platform".into(),
            })
        }
    }
}
