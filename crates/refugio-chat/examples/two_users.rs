//! Two users chatting over the in-memory backends. Run with
//! `cargo run -p refugio-chat --example two_users`.

use std::sync::Arc;
use std::time::Duration;

use tracing::info;
use uuid::Uuid;

use refugio_auth::LocalIdentity;
use refugio_chat::{ChatConfig, ChatSession};
use refugio_store::{DocumentStore, EphemeralStore, MemoryDocumentStore, MemoryEphemeralStore};

async fn join(
    docs: &Arc<dyn DocumentStore>,
    ephemeral: &Arc<dyn EphemeralStore>,
    name: &str,
    email: &str,
) -> (Uuid, ChatSession) {
    let auth = Arc::new(LocalIdentity::new());
    let uid = auth.sign_up(email, "correcthorse").expect("sign up");
    let session = ChatSession::new(
        auth,
        Arc::clone(docs),
        Arc::clone(ephemeral),
        ChatConfig::default(),
    );
    session
        .update_profile(Some(name), None)
        .await
        .expect("profile update");
    (uid, session)
}

#[tokio::main]
async fn main() {
    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "refugio=debug,two_users=info".into()),
        )
        .init();

    let docs: Arc<dyn DocumentStore> = Arc::new(MemoryDocumentStore::new());
    let ephemeral: Arc<dyn EphemeralStore> = Arc::new(MemoryEphemeralStore::new());

    let (a, alice) = join(&docs, &ephemeral, "Alicia", "alicia@example.com").await;
    let (b, bea) = join(&docs, &ephemeral, "Bea", "bea@example.com").await;

    alice.presence().set_online().expect("presence");
    bea.presence().set_online().expect("presence");

    // Alicia types, then sends.
    alice.presence().set_typing(b, true).expect("typing");
    let mut typing = bea.presence().observe_typing(a).expect("typing watch");
    if !typing.current() {
        typing.changed().await;
    }
    info!("Bea sees: Alicia is typing...");

    alice
        .conversations()
        .send(b, "Hola! ¿Sigue disponible el cachorro en adopción?")
        .await
        .expect("send");
    alice.presence().set_typing(b, false).expect("typing");

    // Bea's inbox picks the thread up, enriched with Alicia's profile.
    let mut inbox = bea.threads().inbox().expect("inbox");
    let threads = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let threads = inbox.current();
            if threads.iter().any(|t| t.peer_uid == a && t.unread_count > 0) {
                return threads;
            }
            inbox.changed().await;
        }
    })
    .await
    .expect("inbox update");

    for thread in &threads {
        info!(
            "inbox: {} — \"{}\" ({} unread)",
            thread.title(),
            thread.last_message.as_deref().unwrap_or(""),
            thread.unread_count
        );
    }

    bea.conversations().mark_read(a).await.expect("mark read");
    bea.conversations()
        .send(a, "¡Sí! Pásate por el refugio esta tarde.")
        .await
        .expect("send");

    let history = alice.conversations().observe(b).expect("history").current();
    for message in &history {
        let who = if message.from_uid == a { "Alicia" } else { "Bea" };
        info!("{}: {}", who, message.text);
    }

    // Alicia's connection drops uncleanly; Bea still sees her go
    // offline thanks to the disconnect hook.
    let mut presence = bea.presence().observe_presence(a);
    alice.presence().disconnect();
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if !presence.current().is_online {
                break;
            }
            presence.changed().await;
        }
    })
    .await
    .expect("presence update");
    info!("Bea sees: Alicia went offline (last seen stamped)");
}
