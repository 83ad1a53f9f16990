use std::collections::BTreeSet;
use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

use refugio_store::{Document, DocumentStore, Identity};
use refugio_types::{ChatThread, ThreadView};

use crate::error::ChatError;
use crate::paths;
use crate::profiles::{ProfileCache, ProfileMap};

/// Joins the raw thread collection with the profile cache into a live,
/// sorted, enriched inbox.
pub struct ThreadAggregator {
    identity: Arc<dyn Identity>,
    docs: Arc<dyn DocumentStore>,
    profiles: ProfileCache,
}

/// Live inbox handle. Dropping it stops the aggregation loop and
/// releases the thread and profile subscriptions behind it.
pub struct Inbox {
    rx: watch::Receiver<Vec<ThreadView>>,
    task: JoinHandle<()>,
}

impl Inbox {
    pub fn current(&self) -> Vec<ThreadView> {
        self.rx.borrow().clone()
    }

    /// Wait for the next re-emission of the enriched list.
    pub async fn changed(&mut self) -> bool {
        self.rx.changed().await.is_ok()
    }
}

impl Drop for Inbox {
    fn drop(&mut self) {
        self.task.abort();
    }
}

impl ThreadAggregator {
    pub(crate) fn new(
        identity: Arc<dyn Identity>,
        docs: Arc<dyn DocumentStore>,
        profiles: ProfileCache,
    ) -> Self {
        Self {
            identity,
            docs,
            profiles,
        }
    }

    /// Start aggregating the current user's inbox. The emitted list is
    /// the live join of threads and resolved peer profiles: it reflects
    /// every change to either source, not a one-time snapshot.
    pub fn inbox(&self) -> Result<Inbox, ChatError> {
        let me = self
            .identity
            .current_uid()
            .ok_or(ChatError::NotAuthenticated)?;

        let mut collection = self.docs.observe_collection(&paths::threads(me));
        let profile_set = self.profiles.watch_set();
        let mut resolved = profile_set.watch();
        let (tx, rx) = watch::channel(Vec::new());

        debug!(%me, "inbox aggregation started");
        let task = tokio::spawn(async move {
            loop {
                let threads = parse_threads(&collection.current());
                let peers: BTreeSet<Uuid> = threads.iter().map(|t| t.peer_uid).collect();
                if let Err(e) = profile_set.set_ids(&peers).await {
                    warn!("retargeting profile set failed: {}", e);
                }

                let enriched = enrich(&threads, &resolved.current());
                tx.send_if_modified(|current| {
                    if *current != enriched {
                        *current = enriched;
                        true
                    } else {
                        false
                    }
                });

                tokio::select! {
                    changed = collection.changed() => {
                        if !changed {
                            break;
                        }
                    }
                    changed = resolved.changed() => {
                        if !changed {
                            break;
                        }
                    }
                    _ = tx.closed() => break,
                }
            }
        });

        Ok(Inbox { rx, task })
    }
}

fn parse_threads(entries: &[(String, Document)]) -> Vec<ChatThread> {
    let mut threads: Vec<ChatThread> = entries
        .iter()
        .filter_map(|(id, doc)| {
            // Peer id from the stored field, falling back to the doc id.
            let peer_uid: Uuid = doc
                .get(paths::PEER_UID)
                .and_then(|v| v.as_str())
                .and_then(|s| s.parse().ok())
                .or_else(|| id.parse().ok())?;
            Some(ChatThread {
                peer_uid,
                last_message: doc
                    .get(paths::LAST_MESSAGE)
                    .and_then(|v| v.as_str())
                    .map(str::to_string),
                updated_at: doc.get(paths::UPDATED_AT).and_then(|v| v.as_i64()),
                unread_count: doc
                    .get(paths::UNREAD_COUNT)
                    .and_then(|v| v.as_u64())
                    .unwrap_or(0) as u32,
            })
        })
        .collect();

    // Most recently updated first; peer uid breaks ties so unrelated
    // updates never reshuffle the list.
    threads.sort_by(|a, b| {
        b.updated_at
            .unwrap_or(0)
            .cmp(&a.updated_at.unwrap_or(0))
            .then_with(|| a.peer_uid.cmp(&b.peer_uid))
    });
    threads
}

fn enrich(threads: &[ChatThread], profiles: &ProfileMap) -> Vec<ThreadView> {
    threads
        .iter()
        .map(|t| {
            let profile = profiles.get(&t.peer_uid).and_then(|p| p.as_ref());
            ThreadView {
                peer_uid: t.peer_uid,
                last_message: t.last_message.clone(),
                updated_at: t.updated_at,
                unread_count: t.unread_count,
                display_name: profile.and_then(|p| p.display_name.clone()),
                photo_url: profile.and_then(|p| p.photo_url.clone()),
            }
        })
        .collect()
}
