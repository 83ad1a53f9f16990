use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::json;
use tracing::debug;
use uuid::Uuid;

use refugio_store::{Document, DocumentStore, FieldWrite, Identity, Watch, WriteBatch};
use refugio_types::ChatMessage;

use crate::error::ChatError;
use crate::paths;

/// Message history and sends for peer-to-peer conversations. Every
/// message is mirrored under both participants' views with one shared
/// id; thread metadata on both sides moves in the same atomic commit as
/// the message itself.
pub struct Conversations {
    identity: Arc<dyn Identity>,
    docs: Arc<dyn DocumentStore>,
}

impl Conversations {
    pub(crate) fn new(identity: Arc<dyn Identity>, docs: Arc<dyn DocumentStore>) -> Self {
        Self { identity, docs }
    }

    fn me(&self) -> Result<Uuid, ChatError> {
        self.identity
            .current_uid()
            .ok_or(ChatError::NotAuthenticated)
    }

    /// Live message history with `peer`, ascending by creation time.
    pub fn observe(&self, peer: Uuid) -> Result<Watch<Vec<ChatMessage>>, ChatError> {
        let me = self.me()?;
        Ok(self
            .docs
            .observe_collection(&paths::messages(me, peer))
            .map(|entries| parse_messages(entries)))
    }

    /// Send `text` to `peer`. One atomic commit writes the message
    /// under both mirrors, refreshes both thread docs, zeroes the
    /// sender's unread count and increments the recipient's by one —
    /// neither side can observe a partial send.
    pub async fn send(&self, peer: Uuid, text: &str) -> Result<(), ChatError> {
        let me = self.me()?;
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Err(ChatError::EmptyMessage);
        }

        let message_id = Uuid::new_v4();
        let message_fields = BTreeMap::from([
            (
                paths::FROM_UID.to_string(),
                FieldWrite::Value(json!(me.to_string())),
            ),
            (paths::TEXT.to_string(), FieldWrite::Value(json!(trimmed))),
            (paths::CREATED_AT.to_string(), FieldWrite::ServerTimestamp),
        ]);

        let batch = WriteBatch::new()
            .merge(
                paths::thread_doc(me, peer),
                BTreeMap::from([
                    (
                        paths::PEER_UID.to_string(),
                        FieldWrite::Value(json!(peer.to_string())),
                    ),
                    (
                        paths::LAST_MESSAGE.to_string(),
                        FieldWrite::Value(json!(trimmed)),
                    ),
                    (paths::UPDATED_AT.to_string(), FieldWrite::ServerTimestamp),
                    (paths::UNREAD_COUNT.to_string(), FieldWrite::Value(json!(0))),
                ]),
            )
            .merge(
                paths::thread_doc(peer, me),
                BTreeMap::from([
                    (
                        paths::PEER_UID.to_string(),
                        FieldWrite::Value(json!(me.to_string())),
                    ),
                    (
                        paths::LAST_MESSAGE.to_string(),
                        FieldWrite::Value(json!(trimmed)),
                    ),
                    (paths::UPDATED_AT.to_string(), FieldWrite::ServerTimestamp),
                    (paths::UNREAD_COUNT.to_string(), FieldWrite::Increment(1)),
                ]),
            )
            .set(paths::message_doc(me, peer, message_id), message_fields.clone())
            .set(paths::message_doc(peer, me, message_id), message_fields);

        self.docs.commit(batch).await?;
        debug!(%peer, %message_id, "message sent");
        Ok(())
    }

    /// Zero the caller's unread count for the thread with `peer`.
    /// Idempotent; the peer's metadata is untouched.
    pub async fn mark_read(&self, peer: Uuid) -> Result<(), ChatError> {
        let me = self.me()?;
        let batch = WriteBatch::new().merge(
            paths::thread_doc(me, peer),
            BTreeMap::from([(paths::UNREAD_COUNT.to_string(), FieldWrite::Value(json!(0)))]),
        );
        self.docs.commit(batch).await?;
        Ok(())
    }
}

fn parse_messages(entries: &[(String, Document)]) -> Vec<ChatMessage> {
    let mut messages: Vec<ChatMessage> = entries
        .iter()
        .filter_map(|(id, doc)| {
            let id: Uuid = id.parse().ok()?;
            // A message nobody sent is unattributable — skip it.
            let from_uid: Uuid = doc
                .get(paths::FROM_UID)
                .and_then(|v| v.as_str())
                .and_then(|s| s.parse().ok())?;
            Some(ChatMessage {
                id,
                from_uid,
                text: doc
                    .get(paths::TEXT)
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string(),
                created_at: doc
                    .get(paths::CREATED_AT)
                    .and_then(|v| v.as_i64())
                    .unwrap_or(0),
            })
        })
        .collect();

    // Ascending by store-assigned timestamp; id breaks ties stably.
    messages.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
    messages
}
