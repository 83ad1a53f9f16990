use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use serde_json::Value;
use tracing::debug;

use crate::clock::MonotonicClock;
use crate::path::KeyPath;
use crate::value::resolve_timestamps;
use crate::watch::{Registry, Watch};
use crate::{EphemeralSession, EphemeralStore};

/// In-memory ephemeral key/value store. Each session models one client
/// connection; compensating writes registered on a session fire exactly
/// once when it ends, whether the teardown was clean or the session was
/// simply dropped mid-flight.
#[derive(Clone)]
pub struct MemoryEphemeralStore {
    inner: Arc<EphemeralInner>,
}

struct EphemeralInner {
    values: Mutex<HashMap<KeyPath, Value>>,
    watchers: Registry<KeyPath, Option<Value>>,
    hooks: Mutex<HashMap<u64, Vec<(KeyPath, DisconnectWrite)>>>,
    next_session: AtomicU64,
    clock: MonotonicClock,
}

enum DisconnectWrite {
    Set(Value),
    Remove,
}

impl Default for MemoryEphemeralStore {
    fn default() -> Self {
        Self {
            inner: Arc::new(EphemeralInner {
                values: Mutex::new(HashMap::new()),
                watchers: Registry::new(),
                hooks: Mutex::new(HashMap::new()),
                next_session: AtomicU64::new(0),
                clock: MonotonicClock::new(),
            }),
        }
    }
}

impl MemoryEphemeralStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Live key subscriptions currently registered.
    pub fn watcher_count(&self) -> usize {
        self.inner.watchers.watcher_count()
    }
}

impl EphemeralInner {
    fn apply_set(&self, path: &KeyPath, value: Value) {
        let resolved = resolve_timestamps(&value, self.clock.now_ms());
        self.values
            .lock()
            .expect("ephemeral values lock poisoned")
            .insert(path.clone(), resolved.clone());
        self.watchers.publish(path, Some(resolved));
    }

    fn apply_remove(&self, path: &KeyPath) {
        self.values
            .lock()
            .expect("ephemeral values lock poisoned")
            .remove(path);
        self.watchers.publish(path, None);
    }
}

impl EphemeralStore for MemoryEphemeralStore {
    fn observe(&self, path: &KeyPath) -> Watch<Option<Value>> {
        let initial = self
            .inner
            .values
            .lock()
            .expect("ephemeral values lock poisoned")
            .get(path)
            .cloned();
        self.inner.watchers.subscribe(path.clone(), initial)
    }

    fn session(&self) -> Box<dyn EphemeralSession> {
        let id = self.inner.next_session.fetch_add(1, Ordering::Relaxed);
        self.inner
            .hooks
            .lock()
            .expect("disconnect hooks lock poisoned")
            .insert(id, Vec::new());
        debug!(session = id, "ephemeral session opened");
        Box::new(MemorySession {
            id,
            inner: Arc::clone(&self.inner),
            connected: AtomicBool::new(true),
        })
    }
}

struct MemorySession {
    id: u64,
    inner: Arc<EphemeralInner>,
    connected: AtomicBool,
}

impl MemorySession {
    fn register_hook(&self, path: &KeyPath, write: DisconnectWrite) {
        let mut hooks = self
            .inner
            .hooks
            .lock()
            .expect("disconnect hooks lock poisoned");
        if let Some(entries) = hooks.get_mut(&self.id) {
            // One hook per path; a later registration replaces it.
            entries.retain(|(registered, _)| registered != path);
            entries.push((path.clone(), write));
        }
    }
}

impl EphemeralSession for MemorySession {
    fn set(&self, path: &KeyPath, value: Value) {
        self.inner.apply_set(path, value);
    }

    fn remove(&self, path: &KeyPath) {
        self.inner.apply_remove(path);
    }

    fn on_disconnect_set(&self, path: &KeyPath, value: Value) {
        self.register_hook(path, DisconnectWrite::Set(value));
    }

    fn on_disconnect_remove(&self, path: &KeyPath) {
        self.register_hook(path, DisconnectWrite::Remove);
    }

    fn disconnect(&self) {
        if !self.connected.swap(false, Ordering::SeqCst) {
            return;
        }
        let entries = self
            .inner
            .hooks
            .lock()
            .expect("disconnect hooks lock poisoned")
            .remove(&self.id)
            .unwrap_or_default();
        debug!(session = self.id, hooks = entries.len(), "ephemeral session closed");
        for (path, write) in entries {
            match write {
                // Timestamp sentinels resolve now, at fire time.
                DisconnectWrite::Set(value) => self.inner.apply_set(&path, value),
                DisconnectWrite::Remove => self.inner.apply_remove(&path),
            }
        }
    }
}

impl Drop for MemorySession {
    fn drop(&mut self) {
        // An abandoned session counts as an unclean disconnect.
        self.disconnect();
    }
}
