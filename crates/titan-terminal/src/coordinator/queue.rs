//! # Message Queues
//!
//! Transport behind the coordinator's messaging.
//!
//! ## Filesystem Transport
//! ```text
//! shared/
//! ├── broadcast/                       every terminal reads, nobody acks
//! │   └── 00001760868000123456-<uuid>.json
//! └── inbox/
//!     └── LANE-01/                     only LANE-01 reads; ack deletes
//!         ├── 00001760868000123456-<uuid>.json
//!         └── 00001760868000200000-<uuid>.json
//! ```
//!
//! File names start with the enqueue time in microseconds, zero padded, so
//! sorting the directory listing gives arrival order. Files are published
//! by write-temp-then-rename; temp names start with `.` and are skipped.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::Utc;
use tracing::{debug, warn};
use uuid::Uuid;

use super::message::Message;
use super::write_atomic;
use crate::error::{CoordinationError, CoordinationResult};

/// Where a message goes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Channel {
    /// Seen by every terminal.
    Broadcast,
    /// Seen only by the named terminal.
    Inbox(String),
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Channel::Broadcast => write!(f, "broadcast"),
            Channel::Inbox(terminal_id) => write!(f, "inbox/{}", terminal_id),
        }
    }
}

/// Message transport between terminal processes.
///
/// Delivery is at-least-once, ordered within one inbox. Implementations
/// skip and purge expired messages.
pub trait MessageQueue: Send + Sync {
    /// Publishes `message` on `channel`.
    fn enqueue(&self, channel: &Channel, message: &Message) -> CoordinationResult<()>;

    /// Unexpired messages on `channel`, oldest first.
    fn pending(&self, channel: &Channel) -> CoordinationResult<Vec<Message>>;

    /// Marks a message handled. Broadcasts stay for other terminals.
    fn ack(&self, channel: &Channel, id: Uuid) -> CoordinationResult<()>;
}

// =============================================================================
// FileQueue
// =============================================================================

/// `MessageQueue` over the shared directory.
#[derive(Debug, Clone)]
pub struct FileQueue {
    shared: PathBuf,
}

impl FileQueue {
    /// `shared` is `<data_root>/shared`.
    pub fn new(shared: impl Into<PathBuf>) -> Self {
        FileQueue {
            shared: shared.into(),
        }
    }

    fn dir(&self, channel: &Channel) -> PathBuf {
        match channel {
            Channel::Broadcast => self.shared.join("broadcast"),
            Channel::Inbox(terminal_id) => self.shared.join("inbox").join(terminal_id),
        }
    }

    /// Published message files in `dir`, in name order.
    fn message_files(dir: &Path) -> CoordinationResult<Vec<PathBuf>> {
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(CoordinationError::io(dir, e)),
        };

        let mut files = Vec::new();
        for entry in entries {
            let path = entry.map_err(|e| CoordinationError::io(dir, e))?.path();
            if is_published(&path) {
                files.push(path);
            }
        }
        files.sort();
        Ok(files)
    }

    /// Moves an unparseable message aside so it is kept but not re-read.
    fn reject(path: &Path, reason: &str) {
        warn!(path = %path.display(), reason, "Rejecting malformed message");
        let rejected = path.with_extension("rejected");
        if let Err(e) = fs::rename(path, &rejected) {
            warn!(path = %path.display(), error = %e, "Could not move malformed message aside");
        }
    }
}

fn is_published(path: &Path) -> bool {
    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
        return false;
    };
    !name.starts_with('.') && name.ends_with(".json")
}

impl MessageQueue for FileQueue {
    fn enqueue(&self, channel: &Channel, message: &Message) -> CoordinationResult<()> {
        let dir = self.dir(channel);
        fs::create_dir_all(&dir).map_err(|e| CoordinationError::io(&dir, e))?;

        let micros = Utc::now().timestamp_micros().max(0);
        let path = dir.join(format!("{:020}-{}.json", micros, message.id));
        let bytes = serde_json::to_vec_pretty(message)?;
        write_atomic(&path, &bytes)?;

        debug!(
            channel = %channel,
            message_id = %message.id,
            kind = %message.kind(),
            "Message enqueued"
        );
        Ok(())
    }

    fn pending(&self, channel: &Channel) -> CoordinationResult<Vec<Message>> {
        let now = Utc::now();
        let mut messages = Vec::new();

        for path in Self::message_files(&self.dir(channel))? {
            let bytes = match fs::read(&path) {
                Ok(bytes) => bytes,
                // Acked or purged by someone else since the listing.
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(CoordinationError::io(&path, e)),
            };

            let message: Message = match serde_json::from_slice(&bytes) {
                Ok(message) => message,
                Err(e) => {
                    Self::reject(&path, &e.to_string());
                    continue;
                }
            };

            if message.is_expired(now) {
                debug!(message_id = %message.id, channel = %channel, "Purging expired message");
                match fs::remove_file(&path) {
                    Ok(()) => {}
                    Err(e) if e.kind() == ErrorKind::NotFound => {}
                    Err(e) => return Err(CoordinationError::io(&path, e)),
                }
                continue;
            }

            messages.push(message);
        }
        Ok(messages)
    }

    fn ack(&self, channel: &Channel, id: Uuid) -> CoordinationResult<()> {
        if *channel == Channel::Broadcast {
            return Ok(());
        }

        let suffix = format!("-{}.json", id);
        for path in Self::message_files(&self.dir(channel))? {
            let matches = path
                .file_name()
                .and_then(|n| n.to_str())
                .map_or(false, |n| n.ends_with(&suffix));
            if matches {
                match fs::remove_file(&path) {
                    Ok(()) => {}
                    Err(e) if e.kind() == ErrorKind::NotFound => {}
                    Err(e) => return Err(CoordinationError::io(&path, e)),
                }
            }
        }
        Ok(())
    }
}
