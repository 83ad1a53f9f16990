use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{Value, json};
use tokio::task::JoinHandle;
use tracing::debug;
use uuid::Uuid;

use refugio_store::{EphemeralSession, EphemeralStore, Identity, Watch, server_timestamp};
use refugio_types::PresenceState;

use crate::error::ChatError;
use crate::paths;

/// Presence and typing state over the ephemeral store. Owns one store
/// session; the offline compensating write and the typing removals are
/// registered on it so an unclean disconnect leaves no stale state
/// behind. Typing flags additionally self-clear after the configured
/// debounce window.
#[derive(Clone)]
pub struct PresenceSignal {
    inner: Arc<SignalInner>,
}

struct SignalInner {
    identity: Arc<dyn Identity>,
    store: Arc<dyn EphemeralStore>,
    session: Box<dyn EphemeralSession>,
    typing_timers: Mutex<HashMap<Uuid, JoinHandle<()>>>,
    debounce: Duration,
}

impl PresenceSignal {
    pub(crate) fn new(
        identity: Arc<dyn Identity>,
        store: Arc<dyn EphemeralStore>,
        debounce: Duration,
    ) -> Self {
        let session = store.session();
        Self {
            inner: Arc::new(SignalInner {
                identity,
                store,
                session,
                typing_timers: Mutex::new(HashMap::new()),
                debounce,
            }),
        }
    }

    fn me(&self) -> Result<Uuid, ChatError> {
        self.inner
            .identity
            .current_uid()
            .ok_or(ChatError::NotAuthenticated)
    }

    /// Mark the current user online. The offline record is registered
    /// as a disconnect hook first, so a dropped connection flips the
    /// user offline and stamps `lastSeen` without any further call.
    pub fn set_online(&self) -> Result<(), ChatError> {
        let me = self.me()?;
        let key = paths::presence_key(me);
        self.inner.session.on_disconnect_set(
            &key,
            json!({ "online": false, "lastSeen": server_timestamp() }),
        );
        self.inner
            .session
            .set(&key, json!({ "online": true, "lastSeen": server_timestamp() }));
        debug!(%me, "presence online");
        Ok(())
    }

    /// Explicit clean offline.
    pub fn set_offline(&self) -> Result<(), ChatError> {
        let me = self.me()?;
        self.inner.session.set(
            &paths::presence_key(me),
            json!({ "online": false, "lastSeen": server_timestamp() }),
        );
        debug!(%me, "presence offline");
        Ok(())
    }

    /// Live presence of any user. A missing node reads as offline; a
    /// node without the `online` flag counts as online.
    pub fn observe_presence(&self, uid: Uuid) -> Watch<PresenceState> {
        self.inner
            .store
            .observe(&paths::presence_key(uid))
            .map(|value| presence_from_value(value))
    }

    /// Raise or clear the typing flag toward `peer`. Raising arms the
    /// debounce timer that clears the flag if no further input arrives,
    /// and registers removal on disconnect.
    pub fn set_typing(&self, peer: Uuid, typing: bool) -> Result<(), ChatError> {
        let me = self.me()?;
        let key = paths::typing_key(peer, me);

        let mut timers = self
            .inner
            .typing_timers
            .lock()
            .expect("typing timers lock poisoned");
        if let Some(timer) = timers.remove(&peer) {
            timer.abort();
        }

        if typing {
            self.inner.session.on_disconnect_remove(&key);
            self.inner.session.set(&key, json!(true));

            let signal = Arc::downgrade(&self.inner);
            let debounce = self.inner.debounce;
            let timer = tokio::spawn(async move {
                tokio::time::sleep(debounce).await;
                if let Some(signal) = signal.upgrade() {
                    debug!(%peer, "typing debounce expired");
                    signal.session.remove(&key);
                }
            });
            timers.insert(peer, timer);
        } else {
            self.inner.session.remove(&key);
        }
        Ok(())
    }

    /// Whether `peer` is currently flagged as typing toward the current
    /// user.
    pub fn observe_typing(&self, peer: Uuid) -> Result<Watch<bool>, ChatError> {
        let me = self.me()?;
        Ok(self
            .inner
            .store
            .observe(&paths::typing_key(me, peer))
            .map(|value| value.is_some()))
    }

    /// Sever the underlying store connection, firing the registered
    /// disconnect hooks — the unclean teardown path.
    pub fn disconnect(&self) {
        self.inner.session.disconnect();
    }
}

impl Drop for SignalInner {
    fn drop(&mut self) {
        let mut timers = self
            .typing_timers
            .lock()
            .expect("typing timers lock poisoned");
        for (_, timer) in timers.drain() {
            timer.abort();
        }
        // The session drops with us; its hooks handle the rest.
    }
}

fn presence_from_value(value: &Option<Value>) -> PresenceState {
    match value {
        None => PresenceState::OFFLINE,
        Some(v) => PresenceState {
            is_online: v.get("online").and_then(Value::as_bool).unwrap_or(true),
            last_seen: v.get("lastSeen").and_then(Value::as_i64),
        },
    }
}
