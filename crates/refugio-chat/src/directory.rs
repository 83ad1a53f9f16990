use std::sync::Arc;

use uuid::Uuid;

use refugio_store::{Document, DocumentStore, Identity, Watch};
use refugio_types::UserProfile;

use crate::config::ChatConfig;
use crate::paths;
use crate::profiles::profile_from_doc;

/// Live user directory: everyone except the current user, ordered by
/// lowercased display name, plus case-insensitive prefix search.
pub struct Directory {
    identity: Arc<dyn Identity>,
    docs: Arc<dyn DocumentStore>,
    limit: usize,
    min_query_len: usize,
}

impl Directory {
    pub(crate) fn new(
        identity: Arc<dyn Identity>,
        docs: Arc<dyn DocumentStore>,
        config: &ChatConfig,
    ) -> Self {
        Self {
            identity,
            docs,
            limit: config.directory_limit,
            min_query_len: config.search_min_len,
        }
    }

    pub fn observe_directory(&self) -> Watch<Vec<UserProfile>> {
        let me = self.identity.current_uid();
        let limit = self.limit;
        self.docs
            .observe_collection(&paths::users())
            .map(move |entries| {
                let mut users = parse_directory(entries, me);
                users.truncate(limit);
                users
            })
    }

    /// Live prefix search over display names. Queries shorter than the
    /// configured minimum resolve to a fixed empty result with no
    /// subscription created.
    pub fn search_prefix(&self, query: &str) -> Watch<Vec<UserProfile>> {
        let q = query.trim().to_lowercase();
        if q.chars().count() < self.min_query_len {
            return Watch::fixed(Vec::new());
        }

        let me = self.identity.current_uid();
        let limit = self.limit;
        self.docs
            .observe_collection(&paths::users())
            .map(move |entries| {
                let mut users: Vec<UserProfile> = parse_directory(entries, me)
                    .into_iter()
                    .filter(|profile| sort_key(profile).starts_with(&q))
                    .collect();
                users.truncate(limit);
                users
            })
    }
}

fn sort_key(profile: &UserProfile) -> String {
    profile
        .display_name
        .clone()
        .unwrap_or_else(|| profile.uid.to_string())
        .to_lowercase()
}

fn parse_directory(entries: &[(String, Document)], me: Option<Uuid>) -> Vec<UserProfile> {
    let mut users: Vec<UserProfile> = entries
        .iter()
        .filter_map(|(id, doc)| {
            let uid: Uuid = id.parse().ok()?;
            if Some(uid) == me {
                return None;
            }
            Some(profile_from_doc(uid, doc))
        })
        .collect();
    users.sort_by_key(sort_key);
    users
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::FixedIdentity;
    use refugio_store::{FieldWrite, MemoryDocumentStore, WriteBatch};
    use serde_json::json;
    use std::collections::BTreeMap;

    async fn write_profile(store: &MemoryDocumentStore, uid: Uuid, name: &str) {
        let batch = WriteBatch::new().merge(
            paths::user_doc(uid),
            BTreeMap::from([
                (
                    paths::DISPLAY_NAME.to_string(),
                    FieldWrite::Value(json!(name)),
                ),
                (
                    paths::DISPLAY_NAME_LOWER.to_string(),
                    FieldWrite::Value(json!(name.to_lowercase())),
                ),
            ]),
        );
        store.commit(batch).await.unwrap();
    }

    #[tokio::test]
    async fn test_directory_excludes_self_and_sorts() {
        let store = MemoryDocumentStore::new();
        let me = Uuid::new_v4();
        let carla = Uuid::new_v4();
        let ana = Uuid::new_v4();
        write_profile(&store, me, "Me").await;
        write_profile(&store, carla, "carla").await;
        write_profile(&store, ana, "Ana").await;

        let directory = Directory::new(
            Arc::new(FixedIdentity(me)),
            Arc::new(store.clone()),
            &ChatConfig::default(),
        );

        let listing = directory.observe_directory().current();
        let names: Vec<Option<&str>> = listing
            .iter()
            .map(|p| p.display_name.as_deref())
            .collect();
        assert_eq!(names, [Some("Ana"), Some("carla")]);
    }

    #[tokio::test]
    async fn test_search_requires_min_query_length() {
        let store = MemoryDocumentStore::new();
        let directory = Directory::new(
            Arc::new(FixedIdentity(Uuid::new_v4())),
            Arc::new(store.clone()),
            &ChatConfig::default(),
        );

        let results = directory.search_prefix("a");
        assert!(results.current().is_empty());
        assert_eq!(store.collection_watcher_count(), 0);
    }

    #[tokio::test]
    async fn test_search_matches_prefix_case_insensitively() {
        let store = MemoryDocumentStore::new();
        let me = Uuid::new_v4();
        let ana = Uuid::new_v4();
        let anibal = Uuid::new_v4();
        let carla = Uuid::new_v4();
        write_profile(&store, ana, "Ana").await;
        write_profile(&store, anibal, "Aníbal").await;
        write_profile(&store, carla, "Carla").await;

        let directory = Directory::new(
            Arc::new(FixedIdentity(me)),
            Arc::new(store.clone()),
            &ChatConfig::default(),
        );

        let mut results = directory.search_prefix("AN");
        let mut names: Vec<String> = results
            .current()
            .iter()
            .filter_map(|p| p.display_name.clone())
            .collect();
        assert_eq!(names, ["Ana", "Aníbal"]);

        // Live: a rename out of the prefix drops the row.
        write_profile(&store, ana, "Bea").await;
        assert!(results.changed().await);
        names = results
            .current()
            .iter()
            .filter_map(|p| p.display_name.clone())
            .collect();
        assert_eq!(names, ["Aníbal"]);
    }
}
