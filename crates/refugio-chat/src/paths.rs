//! Storage layout shared with the backends: document collections for
//! profiles, threads and message mirrors; ephemeral keys for presence
//! and typing.

use refugio_store::{CollectionPath, DocPath, KeyPath};
use uuid::Uuid;

pub const USERS: &str = "users";
pub const CHATS: &str = "chats";
pub const MESSAGES: &str = "messages";
pub const PRESENCE: &str = "presence";
pub const TYPING: &str = "typing";

// Document field names.
pub const DISPLAY_NAME: &str = "displayName";
pub const DISPLAY_NAME_LOWER: &str = "displayNameLower";
pub const PHOTO_URL: &str = "photoUrl";
pub const EMAIL: &str = "email";
pub const PEER_UID: &str = "peerUid";
pub const LAST_MESSAGE: &str = "lastMessage";
pub const UPDATED_AT: &str = "updatedAt";
pub const UNREAD_COUNT: &str = "unreadCount";
pub const FROM_UID: &str = "fromUid";
pub const TEXT: &str = "text";
pub const CREATED_AT: &str = "createdAt";

pub fn users() -> CollectionPath {
    CollectionPath::root(USERS)
}

pub fn user_doc(uid: Uuid) -> DocPath {
    users().doc(uid.to_string())
}

/// `users/{me}/chats` — one thread doc per peer.
pub fn threads(me: Uuid) -> CollectionPath {
    user_doc(me).collection(CHATS)
}

pub fn thread_doc(me: Uuid, peer: Uuid) -> DocPath {
    threads(me).doc(peer.to_string())
}

/// `users/{me}/chats/{peer}/messages` — this user's mirror of the
/// conversation.
pub fn messages(me: Uuid, peer: Uuid) -> CollectionPath {
    thread_doc(me, peer).collection(MESSAGES)
}

pub fn message_doc(me: Uuid, peer: Uuid, id: Uuid) -> DocPath {
    messages(me, peer).doc(id.to_string())
}

pub fn presence_key(uid: Uuid) -> KeyPath {
    KeyPath::new([PRESENCE, &uid.to_string()])
}

/// `typing/{to}/{from}` — the flag `from` raises toward `to`.
pub fn typing_key(to: Uuid, from: Uuid) -> KeyPath {
    KeyPath::new([TYPING, &to.to_string(), &from.to_string()])
}
