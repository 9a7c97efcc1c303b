//! # Terminal Lock Manager
//!
//! OS-process-level mutual exclusion per terminal, with stale-lock recovery.
//!
//! ## Acquisition
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  acquire("LANE-01")                                                     │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  flock(terminal.lock.guard)   ◄── released by the OS if we die here     │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  terminal.lock exists?                                                  │
//! │   ├── no ─────────────────────────────────────────────┐                 │
//! │   ├── yes, holder alive / unknown ──► AlreadyHeld     │                 │
//! │   ├── yes, holder dead ──► remove (StaleLockRecovered)┤                 │
//! │   └── unreadable ──► older than grace? remove : AlreadyHeld             │
//! │                                                       ▼                 │
//! │                           create_new(terminal.lock) + write record      │
//! │                                                       │                 │
//! │                                                       ▼                 │
//! │                                  unlock guard, return LockHandle        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Every check-and-create runs under the guard, so two processes that both
//! find the same stale record cannot both remove it and both win.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::LockError;
use crate::layout::TerminalPaths;

/// Default age after which an unreadable lock record is considered stale.
pub const DEFAULT_CORRUPT_LOCK_GRACE: Duration = Duration::from_secs(30);

// =============================================================================
// Process Liveness
// =============================================================================

/// Result of probing a process id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Liveness {
    Alive,
    Dead,
    /// The process exists but we may not signal it, or we cannot tell.
    Unknown,
}

/// Process liveness capability.
pub trait ProcessTable: Send + Sync {
    fn liveness(&self, pid: u32) -> Liveness;

    /// Conservative: only a definitely dead process counts as not alive.
    fn is_process_alive(&self, pid: u32) -> bool {
        self.liveness(pid) != Liveness::Dead
    }
}

/// Checks real processes with `kill(pid, 0)`.
#[derive(Debug, Clone, Copy, Default)]
pub struct OsProcessTable;

#[cfg(unix)]
impl ProcessTable for OsProcessTable {
    fn liveness(&self, pid: u32) -> Liveness {
        use nix::errno::Errno;
        use nix::sys::signal::kill;
        use nix::unistd::Pid;

        // 0 and negative values address process groups, not a process.
        let raw = match i32::try_from(pid) {
            Ok(raw) if raw > 0 => raw,
            _ => return Liveness::Dead,
        };

        match kill(Pid::from_raw(raw), None) {
            Ok(()) => Liveness::Alive,
            Err(Errno::ESRCH) => Liveness::Dead,
            Err(Errno::EPERM) => Liveness::Unknown,
            Err(_) => Liveness::Unknown,
        }
    }
}

#[cfg(not(unix))]
impl ProcessTable for OsProcessTable {
    fn liveness(&self, pid: u32) -> Liveness {
        if pid == std::process::id() {
            Liveness::Alive
        } else {
            Liveness::Unknown
        }
    }
}

/// Name of this machine, recorded in lock records.
pub fn hostname() -> String {
    #[cfg(unix)]
    {
        nix::unistd::gethostname()
            .ok()
            .and_then(|h| h.into_string().ok())
            .unwrap_or_else(|| "unknown".to_string())
    }
    #[cfg(not(unix))]
    {
        std::env::var("COMPUTERNAME").unwrap_or_else(|_| "unknown".to_string())
    }
}

// =============================================================================
// Lock Record
// =============================================================================

/// JSON content of `terminal.lock`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockRecord {
    pub pid: u32,
    pub acquired_at: DateTime<Utc>,
    pub terminal_id: String,
    pub hostname: String,
}

impl LockRecord {
    fn for_current_process(terminal_id: &str) -> Self {
        LockRecord {
            pid: std::process::id(),
            acquired_at: Utc::now(),
            terminal_id: terminal_id.to_string(),
            hostname: hostname(),
        }
    }
}

enum RecordState {
    Absent,
    Present(LockRecord),
    Unreadable { age: Duration, reason: String },
}

// =============================================================================
// Lock Manager
// =============================================================================

/// Acquires terminal locks under one data root.
pub struct LockManager<P: ProcessTable = OsProcessTable> {
    data_root: PathBuf,
    processes: P,
    corrupt_grace: Duration,
}

impl LockManager<OsProcessTable> {
    pub fn new(data_root: impl AsRef<Path>) -> Self {
        LockManager::with_processes(data_root, OsProcessTable)
    }
}

impl<P: ProcessTable> LockManager<P> {
    pub fn with_processes(data_root: impl AsRef<Path>, processes: P) -> Self {
        LockManager {
            data_root: data_root.as_ref().to_path_buf(),
            processes,
            corrupt_grace: DEFAULT_CORRUPT_LOCK_GRACE,
        }
    }

    /// Sets how old an unreadable lock record must be to count as stale.
    pub fn with_corrupt_grace(mut self, grace: Duration) -> Self {
        self.corrupt_grace = grace;
        self
    }

    /// Acquires the exclusive lock for `terminal_id`.
    pub fn acquire(&self, terminal_id: &str) -> Result<LockHandle, LockError> {
        let paths = TerminalPaths::new(&self.data_root, terminal_id);
        fs::create_dir_all(paths.dir()).map_err(|e| io_failure(paths.dir(), e))?;

        let guard_path = paths.lock_guard();
        let guard = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(&guard_path)
            .map_err(|e| io_failure(&guard_path, e))?;
        guard
            .lock_exclusive()
            .map_err(|e| io_failure(&guard_path, e))?;

        let result = self.acquire_guarded(terminal_id, &paths.lock());

        if let Err(e) = FileExt::unlock(&guard) {
            debug!(path = %guard_path.display(), error = %e, "Guard unlock failed; closing releases it");
        }
        result
    }

    /// Releases a handle. Same as dropping it, but reports errors.
    pub fn release(&self, mut handle: LockHandle) -> Result<(), LockError> {
        handle.release()
    }

    fn acquire_guarded(&self, terminal_id: &str, lock_path: &Path) -> Result<LockHandle, LockError> {
        match read_record(lock_path).map_err(|e| io_failure(lock_path, e))? {
            RecordState::Absent => {}
            RecordState::Present(record) => {
                let liveness = self.holder_liveness(&record);
                match liveness {
                    Liveness::Alive => {
                        return Err(already_held(terminal_id, Some(&record)));
                    }
                    Liveness::Unknown => {
                        warn!(
                            terminal_id,
                            holder_pid = record.pid,
                            holder_host = %record.hostname,
                            "Lock holder liveness unknown, treating as alive"
                        );
                        return Err(already_held(terminal_id, Some(&record)));
                    }
                    Liveness::Dead => {
                        info!(
                            terminal_id,
                            holder_pid = record.pid,
                            acquired_at = %record.acquired_at,
                            "StaleLockRecovered: previous holder is gone"
                        );
                        remove_if_exists(lock_path).map_err(|e| io_failure(lock_path, e))?;
                    }
                }
            }
            RecordState::Unreadable { age, reason } => {
                if age < self.corrupt_grace {
                    debug!(terminal_id, reason = %reason, "Unreadable lock record is recent");
                    return Err(already_held(terminal_id, None));
                }
                warn!(
                    terminal_id,
                    reason = %reason,
                    age_secs = age.as_secs(),
                    "StaleLockRecovered: removing unreadable lock record"
                );
                remove_if_exists(lock_path).map_err(|e| io_failure(lock_path, e))?;
            }
        }

        let record = LockRecord::for_current_process(terminal_id);
        write_record(lock_path, &record).map_err(|e| {
            if e.kind() == io::ErrorKind::AlreadyExists {
                already_held(terminal_id, None)
            } else {
                io_failure(lock_path, e)
            }
        })?;

        info!(terminal_id, pid = record.pid, "Terminal lock acquired");
        Ok(LockHandle {
            path: lock_path.to_path_buf(),
            record,
            released: false,
        })
    }

    fn holder_liveness(&self, record: &LockRecord) -> Liveness {
        // A pid from another machine means nothing here.
        if record.hostname != hostname() {
            return Liveness::Unknown;
        }
        self.processes.liveness(record.pid)
    }
}

// =============================================================================
// Lock Handle
// =============================================================================

/// Proof of holding a terminal lock. Released on drop.
#[derive(Debug)]
pub struct LockHandle {
    path: PathBuf,
    record: LockRecord,
    released: bool,
}

impl LockHandle {
    pub fn record(&self) -> &LockRecord {
        &self.record
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_released(&self) -> bool {
        self.released
    }

    /// Removes the lock record. Idempotent.
    ///
    /// A record that no longer belongs to this handle is left alone.
    pub fn release(&mut self) -> Result<(), LockError> {
        if self.released {
            return Ok(());
        }

        match read_record(&self.path) {
            Ok(RecordState::Present(on_disk)) if on_disk != self.record => {
                warn!(
                    path = %self.path.display(),
                    holder_pid = on_disk.pid,
                    "Lock record replaced by another holder, not removing"
                );
            }
            Ok(_) => {
                remove_if_exists(&self.path).map_err(|e| io_failure(&self.path, e))?;
            }
            Err(e) => return Err(io_failure(&self.path, e)),
        }

        self.released = true;
        info!(terminal_id = %self.record.terminal_id, "Terminal lock released");
        Ok(())
    }
}

impl Drop for LockHandle {
    fn drop(&mut self) {
        if let Err(e) = self.release() {
            warn!(error = %e, "Failed to release terminal lock on drop");
        }
    }
}

// =============================================================================
// File Helpers
// =============================================================================

fn read_record(path: &Path) -> io::Result<RecordState> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(RecordState::Absent),
        Err(e) => return Err(e),
    };

    match serde_json::from_slice::<LockRecord>(&bytes) {
        Ok(record) => Ok(RecordState::Present(record)),
        Err(e) => {
            let age = fs::metadata(path)
                .and_then(|m| m.modified())
                .ok()
                .and_then(|modified| modified.elapsed().ok())
                .unwrap_or_default();
            Ok(RecordState::Unreadable {
                age,
                reason: e.to_string(),
            })
        }
    }
}

fn write_record(path: &Path, record: &LockRecord) -> io::Result<()> {
    let json = serde_json::to_vec_pretty(record)?;
    let mut file: File = OpenOptions::new().write(true).create_new(true).open(path)?;
    file.write_all(&json)?;
    file.sync_all()
}

fn remove_if_exists(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

fn io_failure(path: &Path, source: io::Error) -> LockError {
    LockError::IoFailure {
        path: path.to_path_buf(),
        source,
    }
}

fn already_held(terminal_id: &str, record: Option<&LockRecord>) -> LockError {
    LockError::AlreadyHeld {
        terminal_id: terminal_id.to_string(),
        holder_pid: record.map(|r| r.pid),
        acquired_at: record.map(|r| r.acquired_at),
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
