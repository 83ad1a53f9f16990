use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Milliseconds since the Unix epoch, assigned by the store clock —
/// never by the client.
pub type TimestampMs = i64;

/// Public profile snapshot of a user, as shown next to threads and
/// messages. Cached copies are read-only; only the owner mutates the
/// backing document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub uid: Uuid,
    pub display_name: Option<String>,
    pub photo_url: Option<String>,
    pub email: Option<String>,
}

/// Per-peer conversation metadata, one record per (owner, peer) pair.
/// Mirrored symmetrically: a send updates both participants' records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatThread {
    pub peer_uid: Uuid,
    pub last_message: Option<String>,
    pub updated_at: Option<TimestampMs>,
    pub unread_count: u32,
}

/// A thread enriched with the peer's current profile, as presented in
/// the inbox.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadView {
    pub peer_uid: Uuid,
    pub last_message: Option<String>,
    pub updated_at: Option<TimestampMs>,
    pub unread_count: u32,
    pub display_name: Option<String>,
    pub photo_url: Option<String>,
}

impl ThreadView {
    /// Presentable title: the peer's display name, falling back to the
    /// raw uid when the profile is unresolved.
    pub fn title(&self) -> String {
        self.display_name
            .clone()
            .unwrap_or_else(|| self.peer_uid.to_string())
    }
}

/// A single message within a conversation. Immutable once created; the
/// same record (same id) exists under both participants' mirrors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: Uuid,
    pub from_uid: Uuid,
    pub text: String,
    pub created_at: TimestampMs,
}

impl ChatMessage {
    pub fn created_at_utc(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp_millis(self.created_at)
    }
}

/// Transient connection state of a user. Not part of durable history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceState {
    pub is_online: bool,
    pub last_seen: Option<TimestampMs>,
}

impl PresenceState {
    pub const OFFLINE: PresenceState = PresenceState {
        is_online: false,
        last_seen: None,
    };

    pub fn last_seen_utc(&self) -> Option<DateTime<Utc>> {
        self.last_seen.and_then(DateTime::from_timestamp_millis)
    }
}
