use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tracing::debug;

use crate::clock::MonotonicClock;
use crate::error::StoreError;
use crate::path::{CollectionPath, DocPath};
use crate::value::{Document, WriteBatch, apply_op};
use crate::watch::{Registry, Watch};
use crate::DocumentStore;

/// In-memory document store: the reference backend and the test
/// substrate. Documents live in one ordered map keyed by path; watchers
/// are notified after every commit with consistent snapshots taken
/// under the tree lock.
#[derive(Clone)]
pub struct MemoryDocumentStore {
    inner: Arc<MemoryInner>,
}

struct MemoryInner {
    docs: Mutex<BTreeMap<DocPath, Document>>,
    doc_watchers: Registry<DocPath, Option<Document>>,
    col_watchers: Registry<CollectionPath, Vec<(String, Document)>>,
    clock: MonotonicClock,
}

impl Default for MemoryDocumentStore {
    fn default() -> Self {
        Self {
            inner: Arc::new(MemoryInner {
                docs: Mutex::new(BTreeMap::new()),
                doc_watchers: Registry::new(),
                col_watchers: Registry::new(),
                clock: MonotonicClock::new(),
            }),
        }
    }
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Live document subscriptions currently registered. Used by tests
    /// asserting that dropped observations release their listeners.
    pub fn doc_watcher_count(&self) -> usize {
        self.inner.doc_watchers.watcher_count()
    }

    /// Live collection subscriptions currently registered.
    pub fn collection_watcher_count(&self) -> usize {
        self.inner.col_watchers.watcher_count()
    }

    fn collection_snapshot(
        docs: &BTreeMap<DocPath, Document>,
        path: &CollectionPath,
    ) -> Vec<(String, Document)> {
        let depth = path.segments().len() + 1;
        docs.iter()
            .filter(|(doc_path, _)| {
                doc_path.segments().len() == depth
                    && doc_path.segments()[..depth - 1] == *path.segments()
            })
            .map(|(doc_path, doc)| (doc_path.id().to_string(), doc.clone()))
            .collect()
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn get(&self, path: &DocPath) -> Result<Option<Document>, StoreError> {
        let docs = self.inner.docs.lock().expect("document tree lock poisoned");
        Ok(docs.get(path).cloned())
    }

    async fn commit(&self, batch: WriteBatch) -> Result<(), StoreError> {
        if batch.is_empty() {
            return Ok(());
        }

        // One instant for every server timestamp in the batch.
        let now = self.inner.clock.now_ms();

        let mut touched_docs: BTreeSet<DocPath> = BTreeSet::new();
        let mut touched_cols: BTreeSet<CollectionPath> = BTreeSet::new();

        let mut docs = self.inner.docs.lock().expect("document tree lock poisoned");
        for op in batch.ops() {
            let next = apply_op(docs.get(&op.path), op, now);
            docs.insert(op.path.clone(), next);
            touched_cols.insert(op.path.parent());
            touched_docs.insert(op.path.clone());
        }

        // Snapshots under the lock, notifications after releasing it.
        let doc_updates: Vec<(DocPath, Option<Document>)> = touched_docs
            .into_iter()
            .map(|path| {
                let doc = docs.get(&path).cloned();
                (path, doc)
            })
            .collect();
        let col_updates: Vec<(CollectionPath, Vec<(String, Document)>)> = touched_cols
            .into_iter()
            .filter(|path| self.inner.col_watchers.has_watchers(path))
            .map(|path| {
                let snapshot = Self::collection_snapshot(&docs, &path);
                (path, snapshot)
            })
            .collect();
        drop(docs);

        debug!(ops = batch.ops().len(), "committed write batch");

        for (path, doc) in doc_updates {
            self.inner.doc_watchers.publish(&path, doc);
        }
        for (path, snapshot) in col_updates {
            self.inner.col_watchers.publish(&path, snapshot);
        }

        Ok(())
    }

    fn observe_doc(&self, path: &DocPath) -> Watch<Option<Document>> {
        // Snapshot and registration under one lock, so no commit can
        // slip between them and leave the watch stale.
        let docs = self.inner.docs.lock().expect("document tree lock poisoned");
        let initial = docs.get(path).cloned();
        self.inner.doc_watchers.subscribe(path.clone(), initial)
    }

    fn observe_collection(&self, path: &CollectionPath) -> Watch<Vec<(String, Document)>> {
        let docs = self.inner.docs.lock().expect("document tree lock poisoned");
        let initial = Self::collection_snapshot(&docs, path);
        self.inner.col_watchers.subscribe(path.clone(), initial)
    }
}
