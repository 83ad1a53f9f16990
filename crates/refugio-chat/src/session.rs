use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::json;
use tracing::info;
use uuid::Uuid;

use refugio_store::{DocumentStore, EphemeralStore, FieldWrite, Identity, WriteBatch};

use crate::config::ChatConfig;
use crate::conversation::Conversations;
use crate::directory::Directory;
use crate::error::ChatError;
use crate::paths;
use crate::presence::PresenceSignal;
use crate::profiles::ProfileCache;
use crate::threads::ThreadAggregator;

/// Composition root of the chat core. Every collaborator is passed in
/// explicitly and every service hangs off this session — lifetimes are
/// scoped to the session, not the process. Dropping the session tears
/// everything down: aggregation loops stop, subscriptions release, the
/// ephemeral connection fires its disconnect hooks.
pub struct ChatSession {
    identity: Arc<dyn Identity>,
    docs: Arc<dyn DocumentStore>,
    profiles: ProfileCache,
    presence: PresenceSignal,
    threads: ThreadAggregator,
    conversations: Conversations,
    directory: Directory,
}

impl ChatSession {
    pub fn new(
        identity: Arc<dyn Identity>,
        docs: Arc<dyn DocumentStore>,
        ephemeral: Arc<dyn EphemeralStore>,
        config: ChatConfig,
    ) -> Self {
        let profiles = ProfileCache::new(Arc::clone(&docs), config.profile_cache_capacity);
        let presence = PresenceSignal::new(
            Arc::clone(&identity),
            ephemeral,
            config.typing_debounce,
        );
        let threads = ThreadAggregator::new(
            Arc::clone(&identity),
            Arc::clone(&docs),
            profiles.clone(),
        );
        let conversations = Conversations::new(Arc::clone(&identity), Arc::clone(&docs));
        let directory = Directory::new(Arc::clone(&identity), Arc::clone(&docs), &config);

        info!("chat session created");
        Self {
            identity,
            docs,
            profiles,
            presence,
            threads,
            conversations,
            directory,
        }
    }

    pub fn current_uid(&self) -> Option<Uuid> {
        self.identity.current_uid()
    }

    pub fn profiles(&self) -> &ProfileCache {
        &self.profiles
    }

    pub fn presence(&self) -> &PresenceSignal {
        &self.presence
    }

    pub fn threads(&self) -> &ThreadAggregator {
        &self.threads
    }

    pub fn conversations(&self) -> &Conversations {
        &self.conversations
    }

    pub fn directory(&self) -> &Directory {
        &self.directory
    }

    /// Merge the caller's public profile document. Display name changes
    /// also refresh the lowercased copy that prefix search runs on; the
    /// account email is carried along when the provider knows it.
    pub async fn update_profile(
        &self,
        display_name: Option<&str>,
        photo_url: Option<&str>,
    ) -> Result<(), ChatError> {
        let me = self
            .identity
            .current_uid()
            .ok_or(ChatError::NotAuthenticated)?;

        let mut fields = BTreeMap::new();
        if let Some(name) = display_name {
            let name = name.trim();
            fields.insert(
                paths::DISPLAY_NAME.to_string(),
                FieldWrite::Value(json!(name)),
            );
            fields.insert(
                paths::DISPLAY_NAME_LOWER.to_string(),
                FieldWrite::Value(json!(name.to_lowercase())),
            );
        }
        if let Some(url) = photo_url {
            fields.insert(paths::PHOTO_URL.to_string(), FieldWrite::Value(json!(url)));
        }
        if let Some(email) = self.identity.current_email() {
            fields.insert(paths::EMAIL.to_string(), FieldWrite::Value(json!(email)));
        }
        if fields.is_empty() {
            return Ok(());
        }

        let batch = WriteBatch::new().merge(paths::user_doc(me), fields);
        self.docs.commit(batch).await?;
        info!(%me, "profile updated");
        Ok(())
    }
}
