use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex};

use futures_util::future::join_all;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

use refugio_store::{Document, DocumentStore, StoreError, Watch};
use refugio_types::UserProfile;

use crate::paths;

/// Resolved profiles for a watched id set. `None` marks an id with no
/// backing profile document — a missing peer never fails the batch.
pub type ProfileMap = HashMap<Uuid, Option<UserProfile>>;

pub(crate) fn profile_from_doc(uid: Uuid, doc: &Document) -> UserProfile {
    UserProfile {
        uid,
        display_name: doc
            .get(paths::DISPLAY_NAME)
            .and_then(|v| v.as_str())
            .map(str::to_string),
        photo_url: doc
            .get(paths::PHOTO_URL)
            .and_then(|v| v.as_str())
            .map(str::to_string),
        email: doc
            .get(paths::EMAIL)
            .and_then(|v| v.as_str())
            .map(str::to_string),
    }
}

/// Process-wide cache of public profile snapshots. Single lookups go
/// through a bounded LRU; ids held by a live [`ProfileSet`] are pinned
/// and never evicted while subscribed. Updates arrive on arbitrary
/// subscription tasks, so all cache state sits behind one lock.
#[derive(Clone)]
pub struct ProfileCache {
    inner: Arc<CacheInner>,
}

struct CacheInner {
    docs: Arc<dyn DocumentStore>,
    lru: Mutex<LruState>,
    capacity: usize,
}

struct LruState {
    entries: HashMap<Uuid, (u64, UserProfile)>,
    pins: HashMap<Uuid, u32>,
    stamp: u64,
}

impl ProfileCache {
    pub fn new(docs: Arc<dyn DocumentStore>, capacity: usize) -> Self {
        Self {
            inner: Arc::new(CacheInner {
                docs,
                lru: Mutex::new(LruState {
                    entries: HashMap::new(),
                    pins: HashMap::new(),
                    stamp: 0,
                }),
                capacity,
            }),
        }
    }

    /// Cached snapshot, if any. Counts as a use for eviction order.
    pub fn cached(&self, uid: Uuid) -> Option<UserProfile> {
        let mut lru = self.inner.lru.lock().expect("profile cache lock poisoned");
        lru.stamp += 1;
        let stamp = lru.stamp;
        let (entry_stamp, profile) = lru.entries.get_mut(&uid)?;
        *entry_stamp = stamp;
        Some(profile.clone())
    }

    /// One-shot fetch through the cache.
    pub async fn get(&self, uid: Uuid) -> Result<Option<UserProfile>, StoreError> {
        let doc = self.inner.docs.get(&paths::user_doc(uid)).await?;
        let profile = doc.map(|d| profile_from_doc(uid, &d));
        self.store(uid, profile.as_ref());
        Ok(profile)
    }

    /// Live subscription to one profile, refreshing the cache on every
    /// change. `None` when the document does not exist.
    pub fn observe(&self, uid: Uuid) -> Watch<Option<UserProfile>> {
        let cache = self.clone();
        self.inner
            .docs
            .observe_doc(&paths::user_doc(uid))
            .map(move |doc| {
                let profile = doc.as_ref().map(|d| profile_from_doc(uid, d));
                cache.store(uid, profile.as_ref());
                profile
            })
    }

    /// A retargetable batch subscription over a set of ids.
    pub fn watch_set(&self) -> ProfileSet {
        ProfileSet::new(self.clone())
    }

    fn store(&self, uid: Uuid, profile: Option<&UserProfile>) {
        let mut lru = self.inner.lru.lock().expect("profile cache lock poisoned");
        match profile {
            Some(profile) => {
                lru.stamp += 1;
                let stamp = lru.stamp;
                lru.entries.insert(uid, (stamp, profile.clone()));
                while lru.entries.len() > self.inner.capacity {
                    let victim = lru
                        .entries
                        .iter()
                        .filter(|(id, _)| !lru.pins.contains_key(*id))
                        .min_by_key(|(_, (stamp, _))| *stamp)
                        .map(|(id, _)| *id);
                    match victim {
                        Some(id) => {
                            lru.entries.remove(&id);
                        }
                        // Everything left is pinned; run over capacity
                        // rather than evict a live entry.
                        None => break,
                    }
                }
            }
            None => {
                lru.entries.remove(&uid);
            }
        }
    }

    fn pin(&self, uid: Uuid) {
        let mut lru = self.inner.lru.lock().expect("profile cache lock poisoned");
        *lru.pins.entry(uid).or_insert(0) += 1;
    }

    fn unpin(&self, uid: Uuid) {
        let mut lru = self.inner.lru.lock().expect("profile cache lock poisoned");
        if let Some(count) = lru.pins.get_mut(&uid) {
            *count -= 1;
            if *count == 0 {
                lru.pins.remove(&uid);
            }
        }
    }
}

/// Live mapping from an id set to profiles. The set is retargeted
/// incrementally: added ids are fetched once and then subscribed live,
/// removed ids drop their subscriptions, unchanged ids are left alone.
/// Dropping the set releases every subscription and unpins its ids.
pub struct ProfileSet {
    inner: Arc<SetInner>,
}

struct SetInner {
    cache: ProfileCache,
    tracked: Mutex<HashMap<Uuid, JoinHandle<()>>>,
    resolved: Mutex<ProfileMap>,
    tx: watch::Sender<ProfileMap>,
}

impl SetInner {
    fn emit(&self) {
        let snapshot = self
            .resolved
            .lock()
            .expect("profile set lock poisoned")
            .clone();
        self.tx.send_if_modified(|current| {
            if *current != snapshot {
                *current = snapshot;
                true
            } else {
                false
            }
        });
    }
}

impl ProfileSet {
    fn new(cache: ProfileCache) -> Self {
        let (tx, _) = watch::channel(ProfileMap::new());
        Self {
            inner: Arc::new(SetInner {
                cache,
                tracked: Mutex::new(HashMap::new()),
                resolved: Mutex::new(ProfileMap::new()),
                tx,
            }),
        }
    }

    /// The resolved map as a live subscription. An empty set yields an
    /// empty map immediately.
    pub fn watch(&self) -> Watch<ProfileMap> {
        Watch::from_channel(self.inner.tx.subscribe())
    }

    /// Retarget the watched set to exactly `ids`.
    pub async fn set_ids(&self, ids: &BTreeSet<Uuid>) -> Result<(), StoreError> {
        // Diff under the lock; claim additions before any await so a
        // concurrent retarget cannot double-subscribe an id.
        let (dropped, added) = {
            let mut tracked = self.inner.tracked.lock().expect("profile set lock poisoned");
            let removed: Vec<Uuid> = tracked
                .keys()
                .filter(|uid| !ids.contains(*uid))
                .copied()
                .collect();
            let mut dropped = Vec::with_capacity(removed.len());
            for uid in removed {
                if let Some(task) = tracked.remove(&uid) {
                    dropped.push(task);
                }
                self.inner.cache.unpin(uid);
            }
            let added: Vec<Uuid> = ids
                .iter()
                .filter(|uid| !tracked.contains_key(*uid))
                .copied()
                .collect();
            (dropped, added)
        };

        for task in dropped {
            task.abort();
        }
        self.inner
            .resolved
            .lock()
            .expect("profile set lock poisoned")
            .retain(|uid, _| ids.contains(uid));

        if added.is_empty() {
            self.inner.emit();
            return Ok(());
        }

        debug!(added = added.len(), total = ids.len(), "retargeting profile set");
        for &uid in &added {
            self.inner.cache.pin(uid);
        }

        // Warm the added ids: cached snapshots first, one concurrent
        // round of fetches for the rest.
        let fetches = added.iter().map(|&uid| {
            let cache = self.inner.cache.clone();
            async move {
                match cache.cached(uid) {
                    Some(profile) => (uid, Some(profile)),
                    None => match cache.get(uid).await {
                        Ok(profile) => (uid, profile),
                        Err(e) => {
                            warn!(%uid, "profile fetch failed: {}", e);
                            (uid, None)
                        }
                    },
                }
            }
        });
        let warmed = join_all(fetches).await;
        {
            let mut resolved = self.inner.resolved.lock().expect("profile set lock poisoned");
            for (uid, profile) in warmed {
                resolved.insert(uid, profile);
            }
        }
        self.inner.emit();

        // Live subscriptions keep each added id current from here on.
        let mut tracked = self.inner.tracked.lock().expect("profile set lock poisoned");
        for &uid in &added {
            if tracked.contains_key(&uid) {
                continue;
            }
            let mut profile_watch = self.inner.cache.observe(uid);
            let inner = Arc::clone(&self.inner);
            let task = tokio::spawn(async move {
                loop {
                    let profile = profile_watch.current();
                    inner
                        .resolved
                        .lock()
                        .expect("profile set lock poisoned")
                        .insert(uid, profile);
                    inner.emit();
                    if !profile_watch.changed().await {
                        break;
                    }
                }
            });
            tracked.insert(uid, task);
        }

        Ok(())
    }
}

impl Drop for ProfileSet {
    fn drop(&mut self) {
        let mut tracked = self.inner.tracked.lock().expect("profile set lock poisoned");
        for (uid, task) in tracked.drain() {
            task.abort();
            self.inner.cache.unpin(uid);
        }
    }
}
