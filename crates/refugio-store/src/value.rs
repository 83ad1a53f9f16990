use std::collections::BTreeMap;

use serde_json::{Value, json};

use crate::path::DocPath;

/// Field map of one stored document.
pub type Document = BTreeMap<String, Value>;

/// One field mutation inside a write op. `ServerTimestamp` and
/// `Increment` resolve on the store side, never on the client.
#[derive(Debug, Clone)]
pub enum FieldWrite {
    Value(Value),
    ServerTimestamp,
    Increment(i64),
}

/// A write against one document: either a full replace or a merge into
/// whatever fields already exist.
#[derive(Debug, Clone)]
pub struct WriteOp {
    pub path: DocPath,
    pub fields: BTreeMap<String, FieldWrite>,
    pub merge: bool,
}

/// An atomic multi-path write: every op applies or none do.
#[derive(Debug, Clone, Default)]
pub struct WriteBatch {
    ops: Vec<WriteOp>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the document at `path` with exactly these fields.
    pub fn set(mut self, path: DocPath, fields: BTreeMap<String, FieldWrite>) -> Self {
        self.ops.push(WriteOp {
            path,
            fields,
            merge: false,
        });
        self
    }

    /// Merge these fields into the document at `path`, creating it if
    /// absent.
    pub fn merge(mut self, path: DocPath, fields: BTreeMap<String, FieldWrite>) -> Self {
        self.ops.push(WriteOp {
            path,
            fields,
            merge: true,
        });
        self
    }

    pub fn ops(&self) -> &[WriteOp] {
        &self.ops
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

/// Resolve one op against the existing document. Shared by every
/// backend so merge/increment/timestamp semantics cannot drift.
pub fn apply_op(existing: Option<&Document>, op: &WriteOp, now_ms: i64) -> Document {
    let mut doc = match (op.merge, existing) {
        (true, Some(current)) => current.clone(),
        _ => Document::new(),
    };

    for (name, write) in &op.fields {
        let value = match write {
            FieldWrite::Value(v) => v.clone(),
            FieldWrite::ServerTimestamp => Value::from(now_ms),
            FieldWrite::Increment(n) => {
                let current = doc.get(name).and_then(Value::as_i64).unwrap_or(0);
                Value::from(current + n)
            }
        };
        doc.insert(name.clone(), value);
    }

    doc
}

/// Timestamp sentinel for ephemeral values, substituted with the store
/// clock at apply time — including when a disconnect hook fires, so a
/// compensating `lastSeen` reflects the disconnect instant.
pub fn server_timestamp() -> Value {
    json!({ ".sv": "timestamp" })
}

/// Replace every timestamp sentinel in `value` with `now_ms`.
pub fn resolve_timestamps(value: &Value, now_ms: i64) -> Value {
    match value {
        Value::Object(map) => {
            if map.len() == 1 && map.get(".sv").and_then(Value::as_str) == Some("timestamp") {
                return Value::from(now_ms);
            }
            Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), resolve_timestamps(v, now_ms)))
                    .collect(),
            )
        }
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::path::CollectionPath;

    fn doc_path() -> DocPath {
        CollectionPath::root("users").doc("u1")
    }

    #[test]
    fn test_merge_keeps_existing_fields() {
        let mut existing = Document::new();
        existing.insert("a".to_string(), json!(1));
        existing.insert("b".to_string(), json!("keep"));

        let op = WriteOp {
            path: doc_path(),
            fields: BTreeMap::from([("a".to_string(), FieldWrite::Value(json!(2)))]),
            merge: true,
        };

        let out = apply_op(Some(&existing), &op, 10);
        assert_eq!(out.get("a"), Some(&json!(2)));
        assert_eq!(out.get("b"), Some(&json!("keep")));
    }

    #[test]
    fn test_set_replaces_document() {
        let mut existing = Document::new();
        existing.insert("old".to_string(), json!(true));

        let op = WriteOp {
            path: doc_path(),
            fields: BTreeMap::from([("new".to_string(), FieldWrite::Value(json!(1)))]),
            merge: false,
        };

        let out = apply_op(Some(&existing), &op, 10);
        assert!(!out.contains_key("old"));
        assert_eq!(out.get("new"), Some(&json!(1)));
    }

    #[test]
    fn test_increment_and_timestamp() {
        let mut existing = Document::new();
        existing.insert("unreadCount".to_string(), json!(2));

        let op = WriteOp {
            path: doc_path(),
            fields: BTreeMap::from([
                ("unreadCount".to_string(), FieldWrite::Increment(1)),
                ("updatedAt".to_string(), FieldWrite::ServerTimestamp),
            ]),
            merge: true,
        };

        let out = apply_op(Some(&existing), &op, 777);
        assert_eq!(out.get("unreadCount"), Some(&json!(3)));
        assert_eq!(out.get("updatedAt"), Some(&json!(777)));
    }

    #[test]
    fn test_increment_from_missing_starts_at_zero() {
        let op = WriteOp {
            path: doc_path(),
            fields: BTreeMap::from([("n".to_string(), FieldWrite::Increment(5))]),
            merge: true,
        };
        let out = apply_op(None, &op, 1);
        assert_eq!(out.get("n"), Some(&json!(5)));
    }

    #[test]
    fn test_timestamp_sentinel_resolution() {
        let value = json!({ "online": false, "lastSeen": server_timestamp() });
        let resolved = resolve_timestamps(&value, 123);
        assert_eq!(resolved, json!({ "online": false, "lastSeen": 123 }));
    }
}
