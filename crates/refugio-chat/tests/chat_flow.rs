use std::sync::Arc;
use std::time::Duration;

use uuid::Uuid;

use refugio_auth::LocalIdentity;
use refugio_chat::threads::Inbox;
use refugio_chat::{ChatConfig, ChatError, ChatSession};
use refugio_db::{Database, SqliteDocumentStore};
use refugio_store::{DocumentStore, EphemeralStore, MemoryDocumentStore, MemoryEphemeralStore, Watch};
use refugio_types::ThreadView;

/// Sign a fresh user up on their own identity provider (their own
/// device), against the shared backends.
async fn join(
    docs: &Arc<dyn DocumentStore>,
    ephemeral: &Arc<dyn EphemeralStore>,
    name: &str,
) -> (Uuid, ChatSession) {
    let auth = Arc::new(LocalIdentity::new());
    let uid = auth
        .sign_up(&format!("{}@example.com", name.to_lowercase()), "correcthorse")
        .unwrap();
    let session = ChatSession::new(
        auth,
        Arc::clone(docs),
        Arc::clone(ephemeral),
        ChatConfig::default(),
    );
    session.update_profile(Some(name), None).await.unwrap();
    (uid, session)
}

fn memory_backends() -> (Arc<dyn DocumentStore>, Arc<dyn EphemeralStore>) {
    (
        Arc::new(MemoryDocumentStore::new()),
        Arc::new(MemoryEphemeralStore::new()),
    )
}

async fn wait_inbox<F>(inbox: &mut Inbox, mut pred: F) -> Vec<ThreadView>
where
    F: FnMut(&[ThreadView]) -> bool,
{
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let current = inbox.current();
            if pred(&current) {
                return current;
            }
            assert!(inbox.changed().await, "inbox stream ended");
        }
    })
    .await
    .expect("timed out waiting for inbox state")
}

async fn wait_watch<T, F>(watch: &mut Watch<T>, mut pred: F) -> T
where
    T: Clone,
    F: FnMut(&T) -> bool,
{
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let current = watch.current();
            if pred(&current) {
                return current;
            }
            assert!(watch.changed().await, "watch stream ended");
        }
    })
    .await
    .expect("timed out waiting for watch state")
}

#[tokio::test]
async fn test_hello_scenario_updates_both_inboxes() {
    let (docs, ephemeral) = memory_backends();
    let (a, alice) = join(&docs, &ephemeral, "Alicia").await;
    let (b, bea) = join(&docs, &ephemeral, "Bea").await;

    let mut alice_inbox = alice.threads().inbox().unwrap();
    let mut bea_inbox = bea.threads().inbox().unwrap();

    alice.conversations().send(b, "Hello").await.unwrap();

    // Sender's side: thread with Bea, nothing unread, name resolved.
    let mine = wait_inbox(&mut alice_inbox, |threads| {
        threads
            .iter()
            .any(|t| t.peer_uid == b && t.display_name.is_some())
    })
    .await;
    let thread = mine.iter().find(|t| t.peer_uid == b).unwrap();
    assert_eq!(thread.last_message.as_deref(), Some("Hello"));
    assert_eq!(thread.unread_count, 0);
    assert!(thread.updated_at.is_some());
    assert_eq!(thread.title(), "Bea");

    // Recipient's side: same message, exactly one unread.
    let theirs = wait_inbox(&mut bea_inbox, |threads| {
        threads.iter().any(|t| t.peer_uid == a && t.unread_count == 1)
    })
    .await;
    let thread = theirs.iter().find(|t| t.peer_uid == a).unwrap();
    assert_eq!(thread.last_message.as_deref(), Some("Hello"));
    assert_eq!(thread.title(), "Alicia");

    // Bea reads; her count drops, Alicia's metadata is untouched.
    bea.conversations().mark_read(a).await.unwrap();
    bea.conversations().mark_read(a).await.unwrap();
    wait_inbox(&mut bea_inbox, |threads| {
        threads.iter().any(|t| t.peer_uid == a && t.unread_count == 0)
    })
    .await;
    let mine = alice_inbox.current();
    let thread = mine.iter().find(|t| t.peer_uid == b).unwrap();
    assert_eq!(thread.last_message.as_deref(), Some("Hello"));
    assert_eq!(thread.unread_count, 0);
}

#[tokio::test]
async fn test_inbox_is_a_live_join_of_threads_and_profiles() {
    let (docs, ephemeral) = memory_backends();
    let (_a, alice) = join(&docs, &ephemeral, "Alicia").await;
    let (b, bea) = join(&docs, &ephemeral, "Bea").await;

    let mut inbox = alice.threads().inbox().unwrap();
    alice.conversations().send(b, "hola").await.unwrap();
    wait_inbox(&mut inbox, |threads| {
        threads
            .iter()
            .any(|t| t.peer_uid == b && t.display_name.as_deref() == Some("Bea"))
    })
    .await;

    // A profile rename re-emits the inbox without any thread change.
    bea.update_profile(Some("Beatriz"), None).await.unwrap();
    wait_inbox(&mut inbox, |threads| {
        threads
            .iter()
            .any(|t| t.peer_uid == b && t.display_name.as_deref() == Some("Beatriz"))
    })
    .await;
}

#[tokio::test]
async fn test_conversation_order_is_non_decreasing_across_sides() {
    let (docs, ephemeral) = memory_backends();
    let (a, alice) = join(&docs, &ephemeral, "Alicia").await;
    let (b, bea) = join(&docs, &ephemeral, "Bea").await;

    alice.conversations().send(b, "one").await.unwrap();
    bea.conversations().send(a, "two").await.unwrap();
    alice.conversations().send(b, "three").await.unwrap();

    for session in [&alice, &bea] {
        let peer = if session.current_uid() == Some(a) { b } else { a };
        let messages = session.conversations().observe(peer).unwrap().current();
        let texts: Vec<&str> = messages.iter().map(|m| m.text.as_str()).collect();
        assert_eq!(texts, ["one", "two", "three"]);
        assert!(
            messages
                .windows(2)
                .all(|w| w[0].created_at <= w[1].created_at)
        );
    }
}

#[tokio::test]
async fn test_unread_counts_per_send_and_reply_resets_sender() {
    let (docs, ephemeral) = memory_backends();
    let (a, alice) = join(&docs, &ephemeral, "Alicia").await;
    let (b, bea) = join(&docs, &ephemeral, "Bea").await;

    alice.conversations().send(b, "one").await.unwrap();
    alice.conversations().send(b, "two").await.unwrap();

    let mut bea_inbox = bea.threads().inbox().unwrap();
    wait_inbox(&mut bea_inbox, |threads| {
        threads.iter().any(|t| t.peer_uid == a && t.unread_count == 2)
    })
    .await;

    // Bea replies: her own counter for the thread resets, Alicia's goes
    // to one.
    bea.conversations().send(a, "back").await.unwrap();
    wait_inbox(&mut bea_inbox, |threads| {
        threads.iter().any(|t| t.peer_uid == a && t.unread_count == 0)
    })
    .await;

    let mut alice_inbox = alice.threads().inbox().unwrap();
    wait_inbox(&mut alice_inbox, |threads| {
        threads.iter().any(|t| t.peer_uid == b && t.unread_count == 1)
    })
    .await;
}

#[tokio::test]
async fn test_presence_survives_unclean_disconnect() {
    let (docs, ephemeral) = memory_backends();
    let (a, alice) = join(&docs, &ephemeral, "Alicia").await;
    let (_b, bea) = join(&docs, &ephemeral, "Bea").await;

    alice.presence().set_online().unwrap();

    let mut presence = bea.presence().observe_presence(a);
    wait_watch(&mut presence, |state| state.is_online).await;

    // Connection drops without a clean set_offline.
    alice.presence().disconnect();
    let state = wait_watch(&mut presence, |state| !state.is_online).await;
    assert!(state.last_seen.is_some());
}

#[tokio::test]
async fn test_typing_clears_on_unclean_disconnect() {
    let (docs, ephemeral) = memory_backends();
    let (a, alice) = join(&docs, &ephemeral, "Alicia").await;
    let (b, bea) = join(&docs, &ephemeral, "Bea").await;

    let mut typing = bea.presence().observe_typing(a).unwrap();
    alice.presence().set_typing(b, true).unwrap();
    wait_watch(&mut typing, |typing| *typing).await;

    alice.presence().disconnect();
    wait_watch(&mut typing, |typing| !typing).await;
}

#[tokio::test]
async fn test_teardown_by_drop_reaches_offline() {
    let (docs, ephemeral) = memory_backends();
    let (a, alice) = join(&docs, &ephemeral, "Alicia").await;
    let (_b, bea) = join(&docs, &ephemeral, "Bea").await;

    alice.presence().set_online().unwrap();
    let mut presence = bea.presence().observe_presence(a);
    wait_watch(&mut presence, |state| state.is_online).await;

    drop(alice);
    let state = wait_watch(&mut presence, |state| !state.is_online).await;
    assert!(state.last_seen.is_some());
}

#[tokio::test]
async fn test_operations_require_a_signed_in_user() {
    let (docs, ephemeral) = memory_backends();
    let auth = Arc::new(LocalIdentity::new());
    let session = ChatSession::new(auth, docs, ephemeral, ChatConfig::default());

    assert!(matches!(
        session.threads().inbox(),
        Err(ChatError::NotAuthenticated)
    ));
    assert!(matches!(
        session.conversations().send(Uuid::new_v4(), "hola").await,
        Err(ChatError::NotAuthenticated)
    ));
    assert!(matches!(
        session.presence().set_online(),
        Err(ChatError::NotAuthenticated)
    ));
}

#[tokio::test]
async fn test_dropping_observations_releases_listeners() {
    let docs_impl = MemoryDocumentStore::new();
    let docs: Arc<dyn DocumentStore> = Arc::new(docs_impl.clone());
    let ephemeral: Arc<dyn EphemeralStore> = Arc::new(MemoryEphemeralStore::new());
    let (b, _bea) = join(&docs, &ephemeral, "Bea").await;
    let (_a, alice) = join(&docs, &ephemeral, "Alicia").await;

    let inbox = alice.threads().inbox().unwrap();
    let conversation = alice.conversations().observe(b).unwrap();
    assert!(docs_impl.collection_watcher_count() > 0);

    drop(inbox);
    drop(conversation);
    for _ in 0..50 {
        if docs_impl.collection_watcher_count() == 0 && docs_impl.doc_watcher_count() == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    assert_eq!(docs_impl.collection_watcher_count(), 0);
    assert_eq!(docs_impl.doc_watcher_count(), 0);
}

#[tokio::test]
async fn test_full_flow_on_sqlite_backend() {
    let dir = tempfile::tempdir().unwrap();
    let db = Database::open(&dir.path().join("refugio.db")).unwrap();
    let docs: Arc<dyn DocumentStore> = Arc::new(SqliteDocumentStore::new(Arc::new(db)));
    let ephemeral: Arc<dyn EphemeralStore> = Arc::new(MemoryEphemeralStore::new());

    let (a, alice) = join(&docs, &ephemeral, "Alicia").await;
    let (b, bea) = join(&docs, &ephemeral, "Bea").await;

    alice.conversations().send(b, "Hello").await.unwrap();

    let mut bea_inbox = bea.threads().inbox().unwrap();
    let threads = wait_inbox(&mut bea_inbox, |threads| {
        threads.iter().any(|t| t.peer_uid == a && t.unread_count == 1)
    })
    .await;
    assert_eq!(
        threads
            .iter()
            .find(|t| t.peer_uid == a)
            .unwrap()
            .last_message
            .as_deref(),
        Some("Hello")
    );

    bea.conversations().mark_read(a).await.unwrap();
    wait_inbox(&mut bea_inbox, |threads| {
        threads.iter().any(|t| t.peer_uid == a && t.unread_count == 0)
    })
    .await;

    let messages = bea.conversations().observe(a).unwrap().current();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].text, "Hello");
    assert_eq!(messages[0].from_uid, a);
}
