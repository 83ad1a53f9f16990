use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex, Weak};

use tokio::sync::watch;

/// Live subscription handle. Holds the latest value; `changed` resolves
/// on every distinct emission. Dropping the watch releases whatever
/// backend listener feeds it — subscriptions never outlive their
/// consumers.
pub struct Watch<T> {
    rx: watch::Receiver<T>,
    _guard: Option<WatchGuard>,
    _keep: Option<watch::Sender<T>>,
}

impl<T: Clone> Watch<T> {
    /// Wrap a plain channel receiver (the sender side manages its own
    /// lifetime).
    pub fn from_channel(rx: watch::Receiver<T>) -> Self {
        Self {
            rx,
            _guard: None,
            _keep: None,
        }
    }

    /// Wrap a receiver together with a release action to run when the
    /// watch is dropped.
    pub fn with_guard(rx: watch::Receiver<T>, guard: WatchGuard) -> Self {
        Self {
            rx,
            _guard: Some(guard),
            _keep: None,
        }
    }

    /// A watch that holds `value` forever and never changes. No
    /// backend subscription is created.
    pub fn fixed(value: T) -> Self {
        let (tx, rx) = watch::channel(value);
        Self {
            rx,
            _guard: None,
            _keep: Some(tx),
        }
    }

    pub fn current(&self) -> T {
        self.rx.borrow().clone()
    }

    /// Wait for the next emission. Returns false once the feeding side
    /// is gone and no further change can arrive.
    pub async fn changed(&mut self) -> bool {
        self.rx.changed().await.is_ok()
    }
}

impl<T> Watch<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Derive a watch by applying `f` to every emission. Only distinct
    /// outputs are forwarded. Dropping the derived watch releases the
    /// upstream subscription as well.
    pub fn map<U, F>(mut self, f: F) -> Watch<U>
    where
        U: Clone + PartialEq + Send + Sync + 'static,
        F: Fn(&T) -> U + Send + 'static,
    {
        let initial = f(&self.rx.borrow());
        let (tx, rx) = watch::channel(initial);

        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    changed = self.rx.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        let next = f(&self.rx.borrow());
                        tx.send_if_modified(|current| {
                            if *current != next {
                                *current = next;
                                true
                            } else {
                                false
                            }
                        });
                    }
                    _ = tx.closed() => break,
                }
            }
            // `self` drops here, releasing the upstream listener.
        });

        Watch::with_guard(rx, WatchGuard::new(move || task.abort()))
    }
}

/// Release action run when a [`Watch`] is dropped.
pub struct WatchGuard {
    release: Option<Box<dyn FnOnce() + Send>>,
}

impl WatchGuard {
    pub fn new(release: impl FnOnce() + Send + 'static) -> Self {
        Self {
            release: Some(Box::new(release)),
        }
    }
}

impl Drop for WatchGuard {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

/// Keyed set of watch channels: one entry per active subscription.
/// Subscribing registers a sender under the key; the returned watch
/// unregisters itself on drop. Publishing fans a value out to every
/// subscriber of the key, skipping emissions that would repeat the
/// current value.
pub struct Registry<K, T> {
    inner: Arc<Mutex<RegistryInner<K, T>>>,
}

struct RegistryInner<K, T> {
    next_id: u64,
    entries: HashMap<K, Vec<(u64, watch::Sender<T>)>>,
}

impl<K, T> Default for Registry<K, T> {
    fn default() -> Self {
        Self {
            inner: Arc::new(Mutex::new(RegistryInner {
                next_id: 0,
                entries: HashMap::new(),
            })),
        }
    }
}

impl<K, T> Registry<K, T>
where
    K: Eq + Hash + Clone + Send + 'static,
    T: Clone + PartialEq + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, key: K, initial: T) -> Watch<T> {
        let (tx, rx) = watch::channel(initial);

        let mut inner = self.inner.lock().expect("watcher lock poisoned");
        let id = inner.next_id;
        inner.next_id += 1;
        inner.entries.entry(key.clone()).or_default().push((id, tx));
        drop(inner);

        let weak: Weak<Mutex<RegistryInner<K, T>>> = Arc::downgrade(&self.inner);
        let guard = WatchGuard::new(move || {
            if let Some(strong) = weak.upgrade() {
                let mut inner = strong.lock().expect("watcher lock poisoned");
                if let Some(senders) = inner.entries.get_mut(&key) {
                    senders.retain(|(entry_id, _)| *entry_id != id);
                    if senders.is_empty() {
                        inner.entries.remove(&key);
                    }
                }
            }
        });

        Watch::with_guard(rx, guard)
    }

    pub fn publish(&self, key: &K, value: T) {
        let mut inner = self.inner.lock().expect("watcher lock poisoned");
        let Some(senders) = inner.entries.get_mut(key) else {
            return;
        };
        senders.retain(|(_, tx)| !tx.is_closed());
        for (_, tx) in senders.iter() {
            tx.send_if_modified(|current| {
                if *current != value {
                    *current = value.clone();
                    true
                } else {
                    false
                }
            });
        }
        if senders.is_empty() {
            inner.entries.remove(key);
        }
    }

    pub fn has_watchers(&self, key: &K) -> bool {
        self.inner
            .lock()
            .expect("watcher lock poisoned")
            .entries
            .contains_key(key)
    }

    /// Total number of live subscriptions, across all keys.
    pub fn watcher_count(&self) -> usize {
        self.inner
            .lock()
            .expect("watcher lock poisoned")
            .entries
            .values()
            .map(Vec::len)
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_subscribe_publish_and_release() {
        let registry: Registry<String, i32> = Registry::new();

        let mut watch = registry.subscribe("k".to_string(), 0);
        assert_eq!(registry.watcher_count(), 1);
        assert_eq!(watch.current(), 0);

        registry.publish(&"k".to_string(), 5);
        assert!(watch.changed().await);
        assert_eq!(watch.current(), 5);

        drop(watch);
        assert_eq!(registry.watcher_count(), 0);
    }

    #[tokio::test]
    async fn test_duplicate_values_not_reemitted() {
        let registry: Registry<String, i32> = Registry::new();
        let mut watch = registry.subscribe("k".to_string(), 1);

        registry.publish(&"k".to_string(), 1);
        registry.publish(&"k".to_string(), 2);

        assert!(watch.changed().await);
        assert_eq!(watch.current(), 2);
        // The duplicate publish produced no intermediate emission.
        assert!(!watch.rx.has_changed().unwrap());
    }

    #[tokio::test]
    async fn test_map_forwards_distinct_outputs() {
        let registry: Registry<String, i32> = Registry::new();
        let watch = registry.subscribe("k".to_string(), 3);

        let mut even = watch.map(|n| n % 2 == 0);
        assert!(!even.current());

        registry.publish(&"k".to_string(), 5); // still odd — no emission
        registry.publish(&"k".to_string(), 6);
        assert!(even.changed().await);
        assert!(even.current());
    }

    #[tokio::test]
    async fn test_map_drop_releases_upstream() {
        let registry: Registry<String, i32> = Registry::new();
        let mapped = registry.subscribe("k".to_string(), 0).map(|n| *n);
        assert_eq!(registry.watcher_count(), 1);

        drop(mapped);
        // The forwarding task is aborted and drops the upstream watch.
        tokio::task::yield_now().await;
        for _ in 0..50 {
            if registry.watcher_count() == 0 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        }
        assert_eq!(registry.watcher_count(), 0);
    }

    #[test]
    fn test_fixed_watch_needs_no_registry() {
        let watch = Watch::fixed(42);
        assert_eq!(watch.current(), 42);
    }
}
