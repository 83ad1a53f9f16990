use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use rusqlite::{Connection, OptionalExtension};
use tracing::{debug, warn};

use refugio_store::value::apply_op;
use refugio_store::watch::{Registry, Watch};
use refugio_store::{
    CollectionPath, DocPath, Document, DocumentStore, MonotonicClock, StoreError, WriteBatch,
};

use crate::Database;

/// Durable document store on SQLite. A write batch applies inside one
/// SQL transaction, so the multi-path atomicity contract holds across
/// process crashes; watchers are notified after the transaction
/// commits.
pub struct SqliteDocumentStore {
    db: Arc<Database>,
    doc_watchers: Registry<DocPath, Option<Document>>,
    col_watchers: Registry<CollectionPath, Vec<(String, Document)>>,
    clock: MonotonicClock,
}

impl SqliteDocumentStore {
    pub fn new(db: Arc<Database>) -> Self {
        Self {
            db,
            doc_watchers: Registry::new(),
            col_watchers: Registry::new(),
            clock: MonotonicClock::new(),
        }
    }

    fn read_doc(conn: &Connection, path: &DocPath) -> anyhow::Result<Option<Document>> {
        let json: Option<String> = conn
            .query_row(
                "SELECT fields FROM documents WHERE collection = ?1 AND id = ?2",
                (path.parent().to_string(), path.id()),
                |row| row.get(0),
            )
            .optional()?;
        Ok(json.map(|j| serde_json::from_str(&j)).transpose()?)
    }

    fn read_collection(
        conn: &Connection,
        path: &CollectionPath,
    ) -> anyhow::Result<Vec<(String, Document)>> {
        let mut stmt = conn.prepare(
            "SELECT id, fields FROM documents WHERE collection = ?1 ORDER BY id",
        )?;
        let rows = stmt
            .query_map([path.to_string()], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let mut out = Vec::with_capacity(rows.len());
        for (id, json) in rows {
            out.push((id, serde_json::from_str(&json)?));
        }
        Ok(out)
    }
}

#[async_trait]
impl DocumentStore for SqliteDocumentStore {
    async fn get(&self, path: &DocPath) -> Result<Option<Document>, StoreError> {
        self.db
            .with_conn(|conn| Self::read_doc(conn, path))
            .map_err(|e| StoreError::Backend(e.to_string()))
    }

    async fn commit(&self, batch: WriteBatch) -> Result<(), StoreError> {
        if batch.is_empty() {
            return Ok(());
        }

        // One instant for every server timestamp in the batch.
        let now = self.clock.now_ms();

        self.db
            .with_conn_mut(|conn| {
                let tx = conn.transaction()?;
                for op in batch.ops() {
                    let existing = Self::read_doc(&tx, &op.path)?;
                    let next = apply_op(existing.as_ref(), op, now);
                    let json = serde_json::to_string(&next)?;
                    tx.execute(
                        "INSERT INTO documents (collection, id, fields, updated_at)
                         VALUES (?1, ?2, ?3, ?4)
                         ON CONFLICT(collection, id) DO UPDATE
                         SET fields = excluded.fields, updated_at = excluded.updated_at",
                        (op.path.parent().to_string(), op.path.id(), json, now),
                    )?;
                }
                tx.commit()?;
                Ok(())
            })
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        debug!(ops = batch.ops().len(), "committed write batch");

        let mut touched_docs: BTreeSet<DocPath> = BTreeSet::new();
        let mut touched_cols: BTreeSet<CollectionPath> = BTreeSet::new();
        for op in batch.ops() {
            touched_cols.insert(op.path.parent());
            touched_docs.insert(op.path.clone());
        }

        // Refresh each touched path and publish while still holding the
        // connection lock, so a concurrent observer's initial snapshot
        // cannot interleave with a stale publish.
        for path in touched_docs {
            if !self.doc_watchers.has_watchers(&path) {
                continue;
            }
            let refreshed = self.db.with_conn(|conn| {
                let doc = Self::read_doc(conn, &path)?;
                self.doc_watchers.publish(&path, doc);
                Ok(())
            });
            if let Err(e) = refreshed {
                warn!("post-commit refresh of {} failed: {}", path, e);
            }
        }
        for path in touched_cols {
            if !self.col_watchers.has_watchers(&path) {
                continue;
            }
            let refreshed = self.db.with_conn(|conn| {
                let snapshot = Self::read_collection(conn, &path)?;
                self.col_watchers.publish(&path, snapshot);
                Ok(())
            });
            if let Err(e) = refreshed {
                warn!("post-commit refresh of {} failed: {}", path, e);
            }
        }

        Ok(())
    }

    fn observe_doc(&self, path: &DocPath) -> Watch<Option<Document>> {
        // Initial read and registration under the connection lock — a
        // commit either lands fully before (we read its state) or
        // notifies after (we receive the publish).
        self.db
            .with_conn(|conn| {
                let initial = Self::read_doc(conn, path)?;
                Ok(self.doc_watchers.subscribe(path.clone(), initial))
            })
            .unwrap_or_else(|e| {
                warn!("initial read of {} failed: {}", path, e);
                self.doc_watchers.subscribe(path.clone(), None)
            })
    }

    fn observe_collection(&self, path: &CollectionPath) -> Watch<Vec<(String, Document)>> {
        self.db
            .with_conn(|conn| {
                let initial = Self::read_collection(conn, path)?;
                Ok(self.col_watchers.subscribe(path.clone(), initial))
            })
            .unwrap_or_else(|e| {
                warn!("initial read of {} failed: {}", path, e);
                self.col_watchers.subscribe(path.clone(), Vec::new())
            })
    }
}
