//! WAL writer for durable append operations.
//!
//! ## Durability Model
//! ```text
//! append(op, Buffered)  ──► pending buffer ──┐  size or age threshold
//! append(op, Buffered)  ──► pending buffer ──┤  or the next Immediate
//! append(op, Immediate) ──► pending buffer ──┴─► write_all + sync_data
//!                                                    │
//!                                   ok ◄─────────────┴────► err
//!                          synced_len advances      truncate to synced_len,
//!                                                   drop buffer, rewind sequence
//! ```
//!
//! The file on disk is always a prefix of whole entries that were synced.
//! A crash can only lose entries that were still buffered.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use chrono::Utc;
use tracing::{debug, error, warn};

use super::entry::WalEntry;
use super::op::WalOp;
use super::reader::{CorruptTail, WalReader};
use crate::error::DurabilityError;

/// How an individual append must reach the disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Durability {
    /// Synced before `append` returns, together with anything buffered.
    Immediate,
    /// May stay in memory until a threshold or the next immediate append.
    Buffered,
}

/// Writer-wide sync policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPolicy {
    /// Every append is immediate.
    EveryAppend,
    /// Bufferable operations wait for one of the thresholds.
    Batched {
        max_buffered_entries: usize,
        max_buffer_age: Duration,
    },
}

impl Default for SyncPolicy {
    fn default() -> Self {
        SyncPolicy::EveryAppend
    }
}

impl SyncPolicy {
    /// Durability an operation gets under this policy.
    pub fn durability_for(&self, op: &WalOp) -> Durability {
        match self {
            SyncPolicy::Batched { .. } if op.is_bufferable() => Durability::Buffered,
            _ => Durability::Immediate,
        }
    }
}

/// WAL writer for durable append operations.
pub struct WalWriter {
    path: PathBuf,
    file: File,
    policy: SyncPolicy,
    next_sequence: u64,
    /// Sequence that follows the last synced entry.
    synced_next_sequence: u64,
    synced_len: u64,
    pending: Vec<u8>,
    pending_entries: usize,
    pending_since: Option<Instant>,
    truncated_tail: Option<CorruptTail>,
    poisoned: bool,
    #[cfg(test)]
    fail_next_sync: bool,
}

impl WalWriter {
    /// Opens or creates a WAL file.
    ///
    /// Scans the existing log, truncates a torn tail and continues the
    /// sequence after the last valid entry.
    pub fn open(path: impl AsRef<Path>, policy: SyncPolicy) -> std::io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let reader = WalReader::new(&path);
        let mut entries = reader.entries()?;
        let mut last_sequence = 0;
        for entry in entries.by_ref() {
            last_sequence = entry?.sequence;
        }
        let valid_len = entries.valid_len();
        let truncated_tail = entries.tail().cloned();

        let file = OpenOptions::new().create(true).append(true).open(&path)?;

        if let Some(tail) = &truncated_tail {
            warn!(
                path = %path.display(),
                offset = tail.offset,
                discarded_bytes = tail.discarded_bytes,
                reason = %tail.reason,
                "Truncating torn WAL tail"
            );
            file.set_len(valid_len)?;
            file.sync_all()?;
        }

        debug!(
            path = %path.display(),
            last_sequence,
            bytes = valid_len,
            "WAL opened"
        );

        Ok(WalWriter {
            path,
            file,
            policy,
            next_sequence: last_sequence + 1,
            synced_next_sequence: last_sequence + 1,
            synced_len: valid_len,
            pending: Vec::new(),
            pending_entries: 0,
            pending_since: None,
            truncated_tail,
            poisoned: false,
            #[cfg(test)]
            fail_next_sync: false,
        })
    }

    /// Appends an operation and returns the entry as written.
    ///
    /// The entry carries the assigned sequence number and timestamp, so the
    /// caller can apply exactly what replay will see. `EveryAppend` upgrades
    /// every request to `Immediate`.
    pub fn append(
        &mut self,
        op: WalOp,
        durability: Durability,
    ) -> Result<WalEntry, DurabilityError> {
        if self.poisoned {
            return Err(DurabilityError::Poisoned);
        }

        let durability = match self.policy {
            SyncPolicy::EveryAppend => Durability::Immediate,
            SyncPolicy::Batched { .. } => durability,
        };

        let entry = WalEntry::new(self.next_sequence, Utc::now(), op);
        let line = entry.encode()?;

        self.pending.extend_from_slice(&line);
        self.pending_entries += 1;
        self.pending_since.get_or_insert_with(Instant::now);
        self.next_sequence += 1;

        if durability == Durability::Immediate || self.buffer_full() {
            self.flush()?;
        }
        Ok(entry)
    }

    /// Forces buffered entries to stable storage.
    pub fn flush(&mut self) -> Result<(), DurabilityError> {
        if self.poisoned {
            return Err(DurabilityError::Poisoned);
        }
        if self.pending.is_empty() {
            return Ok(());
        }

        match self.write_and_sync() {
            Ok(()) => {
                self.synced_len += self.pending.len() as u64;
                self.synced_next_sequence = self.next_sequence;
                self.pending.clear();
                self.pending_entries = 0;
                self.pending_since = None;
                Ok(())
            }
            Err(source) => {
                let lost_entries = self.pending_entries;
                self.rollback();
                error!(
                    path = %self.path.display(),
                    lost_entries,
                    error = %source,
                    "WAL sync failed, unsynced entries dropped"
                );
                Err(DurabilityError::Io {
                    lost_entries,
                    source,
                })
            }
        }
    }

    /// Flushes if the oldest buffered entry has exceeded the age threshold.
    ///
    /// Returns whether a flush happened.
    pub fn flush_if_due(&mut self) -> Result<bool, DurabilityError> {
        let due = match (self.policy, self.pending_since) {
            (SyncPolicy::Batched { max_buffer_age, .. }, Some(since)) => {
                since.elapsed() >= max_buffer_age
            }
            _ => false,
        };
        if due {
            self.flush()?;
        }
        Ok(due)
    }

    fn buffer_full(&self) -> bool {
        match self.policy {
            SyncPolicy::EveryAppend => true,
            SyncPolicy::Batched {
                max_buffered_entries,
                max_buffer_age,
            } => {
                self.pending_entries >= max_buffered_entries
                    || self
                        .pending_since
                        .map_or(false, |since| since.elapsed() >= max_buffer_age)
            }
        }
    }

    fn write_and_sync(&mut self) -> std::io::Result<()> {
        self.file.write_all(&self.pending)?;
        if let Some(e) = self.injected_failure() {
            return Err(e);
        }
        self.file.sync_data()
    }

    #[cfg(not(test))]
    fn injected_failure(&mut self) -> Option<std::io::Error> {
        None
    }

    /// Simulates a write that reached the page cache but not the disk.
    #[cfg(test)]
    fn injected_failure(&mut self) -> Option<std::io::Error> {
        std::mem::take(&mut self.fail_next_sync)
            .then(|| std::io::Error::new(std::io::ErrorKind::Other, "injected sync failure"))
    }

    /// Restores the file and counters to the last synced state.
    fn rollback(&mut self) {
        self.pending.clear();
        self.pending_entries = 0;
        self.pending_since = None;
        self.next_sequence = self.synced_next_sequence;

        let restored = self
            .file
            .set_len(self.synced_len)
            .and_then(|()| self.file.sync_all());
        if let Err(e) = restored {
            error!(
                path = %self.path.display(),
                error = %e,
                "WAL rollback failed, writer disabled"
            );
            self.poisoned = true;
        }
    }

    /// Sequence number the next append will get.
    pub fn next_sequence(&self) -> u64 {
        self.next_sequence
    }

    /// Entries appended but not yet synced.
    pub fn pending_entries(&self) -> usize {
        self.pending_entries
    }

    /// Bytes known to be on stable storage.
    pub fn synced_len(&self) -> u64 {
        self.synced_len
    }

    /// The torn tail removed when the writer was opened, if any.
    pub fn truncated_tail(&self) -> Option<&CorruptTail> {
        self.truncated_tail.as_ref()
    }

    pub fn policy(&self) -> SyncPolicy {
        self.policy
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    #[cfg(test)]
    pub(crate) fn fail_next_sync(&mut self) {
        self.fail_next_sync = true;
    }
}

impl Drop for WalWriter {
    fn drop(&mut self) {
        if !self.pending.is_empty() && !self.poisoned {
            if let Err(e) = self.flush() {
                warn!(path = %self.path.display(), error = %e, "WAL flush on drop failed");
            }
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
