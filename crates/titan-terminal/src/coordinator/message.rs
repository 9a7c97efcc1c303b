//! Typed messages exchanged between terminal processes.
//!
//! ```json
//! {
//!   "id": "6f1c...",
//!   "sender": "LANE-01",
//!   "created_at": "2026-10-19T10:00:00Z",
//!   "expires_at": "2026-10-19T10:05:00Z",
//!   "payload": { "kind": "shutdown_request", "grace_secs": 30 }
//! }
//! ```

use std::collections::{BTreeMap, HashSet, VecDeque};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// What a message asks for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MessagePayload {
    /// New values for runtime settings, keyed `section.field`.
    ConfigChange { settings: BTreeMap<String, String> },
    /// Drain and stop within the grace period.
    ShutdownRequest { grace_secs: u64 },
    /// Append a summary line to the shared audit log.
    AuditRequest { request_id: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    ConfigChange,
    ShutdownRequest,
    AuditRequest,
}

impl std::fmt::Display for MessageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MessageKind::ConfigChange => write!(f, "config_change"),
            MessageKind::ShutdownRequest => write!(f, "shutdown_request"),
            MessageKind::AuditRequest => write!(f, "audit_request"),
        }
    }
}

impl MessagePayload {
    pub fn kind(&self) -> MessageKind {
        match self {
            MessagePayload::ConfigChange { .. } => MessageKind::ConfigChange,
            MessagePayload::ShutdownRequest { .. } => MessageKind::ShutdownRequest,
            MessagePayload::AuditRequest { .. } => MessageKind::AuditRequest,
        }
    }
}

/// One message on a channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub sender: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    pub payload: MessagePayload,
}

impl Message {
    pub fn new(sender: &str, payload: MessagePayload) -> Self {
        Message {
            id: Uuid::new_v4(),
            sender: sender.to_string(),
            created_at: Utc::now(),
            expires_at: None,
            payload,
        }
    }

    /// Sets the expiry `ttl` after creation.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.expires_at = chrono::Duration::from_std(ttl)
            .ok()
            .and_then(|ttl| self.created_at.checked_add_signed(ttl));
        self
    }

    pub fn kind(&self) -> MessageKind {
        self.payload.kind()
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map_or(false, |at| at <= now)
    }
}

// =============================================================================
// Deduplication
// =============================================================================

/// Remembers the last `capacity` message ids.
///
/// Delivery is at-least-once; consumers drop ids they have already handled.
#[derive(Debug)]
pub struct Deduplicator {
    capacity: usize,
    seen: HashSet<Uuid>,
    order: VecDeque<Uuid>,
}

impl Deduplicator {
    pub fn new(capacity: usize) -> Self {
        Deduplicator {
            capacity: capacity.max(1),
            seen: HashSet::new(),
            order: VecDeque::new(),
        }
    }

    pub fn contains(&self, id: &Uuid) -> bool {
        self.seen.contains(id)
    }

    /// Records `id`. Returns false if it was already known.
    pub fn insert(&mut self, id: Uuid) -> bool {
        if !self.seen.insert(id) {
            return false;
        }
        self.order.push_back(id);
        while self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.seen.remove(&oldest);
            }
        }
        true
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_wire_format() {
        let msg = Message::new("LANE-01", MessagePayload::ShutdownRequest { grace_secs: 30 });
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["payload"]["kind"], "shutdown_request");
        assert_eq!(json["payload"]["grace_secs"], 30);
        assert_eq!(msg.kind(), MessageKind::ShutdownRequest);
    }

    #[test]
    fn test_expiry() {
        let msg = Message::new(
            "admin",
            MessagePayload::AuditRequest {
                request_id: "r-1".into(),
            },
        )
        .with_ttl(Duration::from_secs(60));

        assert!(!msg.is_expired(msg.created_at));
        assert!(msg.is_expired(msg.created_at + chrono::Duration::seconds(61)));

        let forever = Message::new("admin", MessagePayload::ShutdownRequest { grace_secs: 0 });
        assert!(!forever.is_expired(Utc::now() + chrono::Duration::days(365)));
    }

    #[test]
    fn test_dedup_is_bounded() {
        let mut dedup = Deduplicator::new(2);
        let (a, b, c) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());

        assert!(dedup.insert(a));
        assert!(!dedup.insert(a));
        assert!(dedup.insert(b));
        assert!(dedup.insert(c));

        assert_eq!(dedup.len(), 2);
        assert!(!dedup.contains(&a));
        assert!(dedup.contains(&b) && dedup.contains(&c));
    }
}
