pub mod clock;
pub mod ephemeral;
pub mod error;
pub mod memory;
pub mod path;
pub mod value;
pub mod watch;

use async_trait::async_trait;
use serde_json::Value;

pub use clock::MonotonicClock;
pub use ephemeral::MemoryEphemeralStore;
pub use error::StoreError;
pub use memory::MemoryDocumentStore;
pub use path::{CollectionPath, DocPath, KeyPath};
pub use value::{Document, FieldWrite, WriteBatch, WriteOp, server_timestamp};
pub use watch::Watch;

use uuid::Uuid;

/// Structured document storage with live queries and atomic multi-path
/// writes. Documents live under alternating collection/id paths; a
/// commit applies every op in the batch or none of them.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// One-shot read of a single document.
    async fn get(&self, path: &DocPath) -> Result<Option<Document>, StoreError>;

    /// Apply a write batch atomically. Server timestamps within one
    /// batch all resolve to the same instant.
    async fn commit(&self, batch: WriteBatch) -> Result<(), StoreError>;

    /// Live subscription to a single document. Emits the current value
    /// immediately, then on every distinct change.
    fn observe_doc(&self, path: &DocPath) -> Watch<Option<Document>>;

    /// Live subscription to a collection: (doc id, document) pairs in
    /// id order. Emits the current snapshot immediately.
    fn observe_collection(&self, path: &CollectionPath) -> Watch<Vec<(String, Document)>>;
}

/// One client connection to the ephemeral store. Writes made through a
/// session are plain key/value mutations; disconnect hooks registered on
/// the session fire exactly once when the connection ends — cleanly via
/// [`EphemeralSession::disconnect`] or uncleanly by dropping the session.
pub trait EphemeralSession: Send + Sync {
    fn set(&self, path: &KeyPath, value: Value);
    fn remove(&self, path: &KeyPath);

    /// Register a compensating write to apply when this connection
    /// drops. One hook per path; a later registration replaces it.
    fn on_disconnect_set(&self, path: &KeyPath, value: Value);
    fn on_disconnect_remove(&self, path: &KeyPath);

    /// Tear the connection down now, firing any registered hooks.
    fn disconnect(&self);
}

/// Low-latency ephemeral key/value storage for presence and typing
/// state. Values are transient — nothing here is durable history.
pub trait EphemeralStore: Send + Sync {
    /// Live subscription to one key. `None` means the key is absent.
    fn observe(&self, path: &KeyPath) -> Watch<Option<Value>>;

    /// Open a connection-scoped session with disconnect hooks.
    fn session(&self) -> Box<dyn EphemeralSession>;
}

/// Identity capability: who is signed in right now, observable over
/// time. Sign-in/out operations live on concrete providers.
pub trait Identity: Send + Sync {
    fn current_uid(&self) -> Option<Uuid>;

    fn current_email(&self) -> Option<String> {
        None
    }

    /// Auth-state changes as a live subscription.
    fn watch(&self) -> Watch<Option<Uuid>>;
}
