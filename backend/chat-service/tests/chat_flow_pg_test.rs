//! End-to-end storage properties, run against a local Postgres.
//!
//! Ignored by default: `DATABASE_URL=postgres://... cargo test -- --ignored`.

use std::sync::Arc;

use sqlx::{PgPool, Row};
use uuid::Uuid;

use chat_service::db;
use chat_service::error::AppError;
use chat_service::models::conversation::ConversationType;
use chat_service::realtime::PresenceRegistry;
use chat_service::services::chat_service::{ChatService, CreateConversation, SendMessage};
use chat_service::services::conversation_service::ConversationService;
use chat_service::services::encryption::EncryptionService;
use chat_service::services::message_service::MessageService;
use chat_service::services::notification_dispatch::{LogPushProvider, NotificationDispatcher};

async fn pool() -> PgPool {
    let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set for these tests");
    let pool = db::init_pool(&url).await.expect("connect");
    db::MIGRATOR.run(&pool).await.expect("migrate");
    pool
}

async fn seed_user(pool: &PgPool, name: &str) -> Uuid {
    let id = Uuid::new_v4();
    sqlx::query("INSERT INTO users (id, display_name) VALUES ($1, $2)")
        .bind(id)
        .bind(name)
        .execute(pool)
        .await
        .expect("seed user");
    id
}

fn service(pool: &PgPool) -> ChatService {
    ChatService::new(
        pool.clone(),
        Arc::new(EncryptionService::new([7u8; 32])),
        PresenceRegistry::new(),
        NotificationDispatcher::spawn(pool.clone(), Arc::new(LogPushProvider)),
    )
}

#[tokio::test]
#[ignore = "requires a local Postgres"]
async fn send_creates_status_rows_for_every_member() {
    let pool = pool().await;
    let chat = service(&pool);
    let alice = seed_user(&pool, "Alice").await;
    let bob = seed_user(&pool, "Bob").await;
    let carol = seed_user(&pool, "Carol").await;

    let (conversation, members) = chat
        .create_conversation(
            alice,
            CreateConversation {
                kind: "group".into(),
                name: Some("trio".into()),
                description: None,
                member_ids: vec![bob, carol],
            },
        )
        .await
        .expect("create");
    assert_eq!(members.len(), 3);

    let view = chat
        .send_message(
            alice,
            SendMessage {
                conversation_id: conversation.id,
                content: "hello everyone".into(),
                message_type: Default::default(),
                reply_to_message_id: None,
                forward_from_message_id: None,
                attachment_url: None,
                attachment_name: None,
                attachment_size: None,
                attachment_mime_type: None,
                metadata: None,
            },
        )
        .await
        .expect("send");
    assert_eq!(view.content, "hello everyone");

    let rows = sqlx::query(
        "SELECT user_id, status FROM message_status WHERE message_id = $1 ORDER BY status",
    )
    .bind(view.id)
    .fetch_all(&pool)
    .await
    .expect("status rows");
    assert_eq!(rows.len(), 3);
    let read: Vec<Uuid> = rows
        .iter()
        .filter(|r| r.get::<String, _>("status") == "read")
        .map(|r| r.get("user_id"))
        .collect();
    // Only the sender is pre-marked read.
    assert_eq!(read, vec![alice]);

    let updated = ConversationService::get_conversation(&pool, conversation.id)
        .await
        .expect("reload");
    assert!(updated.last_message_at > conversation.last_message_at);
}

#[tokio::test]
#[ignore = "requires a local Postgres"]
async fn concurrent_private_creates_converge_on_one_conversation() {
    let pool = pool().await;
    let alice = seed_user(&pool, "Alice").await;
    let bob = seed_user(&pool, "Bob").await;

    let mut handles = Vec::new();
    for _ in 0..4 {
        let pool = pool.clone();
        handles.push(tokio::spawn(async move {
            ConversationService::create_conversation(
                &pool,
                ConversationType::Private,
                alice,
                &[bob],
                None,
                None,
            )
            .await
        }));
    }

    let mut ids = Vec::new();
    for handle in handles {
        ids.push(handle.await.expect("join").expect("create").id);
    }
    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), 1, "all callers must converge on one id");

    let count: i64 = sqlx::query(
        "SELECT COUNT(*) AS n FROM conversations \
         WHERE conversation_type = 'private' AND is_active \
           AND private_pair_key = $1",
    )
    .bind(chat_service::models::conversation::private_pair_key(
        alice, bob,
    ))
    .fetch_one(&pool)
    .await
    .expect("count")
    .get("n");
    assert_eq!(count, 1);
}

#[tokio::test]
#[ignore = "requires a local Postgres"]
async fn non_member_send_is_rejected_with_no_writes() {
    let pool = pool().await;
    let chat = service(&pool);
    let alice = seed_user(&pool, "Alice").await;
    let bob = seed_user(&pool, "Bob").await;
    let mallory = seed_user(&pool, "Mallory").await;

    let (conversation, _) = chat
        .create_conversation(
            alice,
            CreateConversation {
                kind: "private".into(),
                name: None,
                description: None,
                member_ids: vec![bob],
            },
        )
        .await
        .expect("create");

    let err = chat
        .send_message(
            mallory,
            SendMessage {
                conversation_id: conversation.id,
                content: "let me in".into(),
                message_type: Default::default(),
                reply_to_message_id: None,
                forward_from_message_id: None,
                attachment_url: None,
                attachment_name: None,
                attachment_size: None,
                attachment_mime_type: None,
                metadata: None,
            },
        )
        .await
        .expect_err("must be rejected");
    assert!(matches!(err, AppError::NotMember));

    let count: i64 = sqlx::query("SELECT COUNT(*) AS n FROM messages WHERE conversation_id = $1")
        .bind(conversation.id)
        .fetch_one(&pool)
        .await
        .expect("count")
        .get("n");
    assert_eq!(count, 0);
}

#[tokio::test]
#[ignore = "requires a local Postgres"]
async fn group_without_a_name_is_created() {
    let pool = pool().await;
    let chat = service(&pool);
    let alice = seed_user(&pool, "Alice").await;
    let bob = seed_user(&pool, "Bob").await;
    let carol = seed_user(&pool, "Carol").await;

    let (conversation, members) = chat
        .create_conversation(
            alice,
            CreateConversation {
                kind: "group".into(),
                name: None,
                description: None,
                member_ids: vec![bob, carol],
            },
        )
        .await
        .expect("unnamed groups are valid");
    assert_eq!(conversation.name, None);
    assert_eq!(members.len(), 3);
}

#[tokio::test]
#[ignore = "requires a local Postgres"]
async fn mark_read_is_idempotent() {
    let pool = pool().await;
    let chat = service(&pool);
    let alice = seed_user(&pool, "Alice").await;
    let bob = seed_user(&pool, "Bob").await;

    let (conversation, _) = chat
        .create_conversation(
            alice,
            CreateConversation {
                kind: "private".into(),
                name: None,
                description: None,
                member_ids: vec![bob],
            },
        )
        .await
        .expect("create");

    let view = chat
        .send_message(
            alice,
            SendMessage {
                conversation_id: conversation.id,
                content: "ping".into(),
                message_type: Default::default(),
                reply_to_message_id: None,
                forward_from_message_id: None,
                attachment_url: None,
                attachment_name: None,
                attachment_size: None,
                attachment_mime_type: None,
                metadata: None,
            },
        )
        .await
        .expect("send");

    let first = chat
        .mark_message_read(bob, view.id, conversation.id)
        .await
        .expect("first mark")
        .expect("status row exists");
    let second = chat
        .mark_message_read(bob, view.id, conversation.id)
        .await
        .expect("second mark")
        .expect("status row exists");
    assert_eq!(first, second, "read_at must not advance on repeat marks");
}

#[tokio::test]
#[ignore = "requires a local Postgres"]
async fn mark_read_ignores_a_mismatched_conversation() {
    let pool = pool().await;
    let chat = service(&pool);
    let alice = seed_user(&pool, "Alice").await;
    let bob = seed_user(&pool, "Bob").await;

    let (home, _) = chat
        .create_conversation(
            alice,
            CreateConversation {
                kind: "private".into(),
                name: None,
                description: None,
                member_ids: vec![bob],
            },
        )
        .await
        .expect("create private");
    let (other, _) = chat
        .create_conversation(
            alice,
            CreateConversation {
                kind: "group".into(),
                name: Some("elsewhere".into()),
                description: None,
                member_ids: vec![bob],
            },
        )
        .await
        .expect("create group");

    let view = chat
        .send_message(
            alice,
            SendMessage {
                conversation_id: home.id,
                content: "stays put".into(),
                message_type: Default::default(),
                reply_to_message_id: None,
                forward_from_message_id: None,
                attachment_url: None,
                attachment_name: None,
                attachment_size: None,
                attachment_mime_type: None,
                metadata: None,
            },
        )
        .await
        .expect("send");

    // Bob is a member of both, but the message does not live in `other`:
    // the mark is a no-op and nothing would be broadcast there.
    let mismatched = chat
        .mark_message_read(bob, view.id, other.id)
        .await
        .expect("no error on mismatch");
    assert!(mismatched.is_none());

    let status: String =
        sqlx::query("SELECT status FROM message_status WHERE message_id = $1 AND user_id = $2")
            .bind(view.id)
            .bind(bob)
            .fetch_one(&pool)
            .await
            .expect("status row")
            .get("status");
    assert_eq!(status, "sent", "mismatched mark must not touch the row");

    // The correct pair still transitions.
    let read_at = chat
        .mark_message_read(bob, view.id, home.id)
        .await
        .expect("mark")
        .expect("row matched");
    assert!(read_at <= chrono::Utc::now());
}

#[tokio::test]
#[ignore = "requires a local Postgres"]
async fn history_round_trips_through_encryption() {
    let pool = pool().await;
    let chat = service(&pool);
    let alice = seed_user(&pool, "Alice").await;
    let bob = seed_user(&pool, "Bob").await;

    let (conversation, _) = chat
        .create_conversation(
            alice,
            CreateConversation {
                kind: "private".into(),
                name: None,
                description: None,
                member_ids: vec![bob],
            },
        )
        .await
        .expect("create");

    for body in ["first", "second", "third"] {
        chat.send_message(
            alice,
            SendMessage {
                conversation_id: conversation.id,
                content: body.into(),
                message_type: Default::default(),
                reply_to_message_id: None,
                forward_from_message_id: None,
                attachment_url: None,
                attachment_name: None,
                attachment_size: None,
                attachment_mime_type: None,
                metadata: None,
            },
        )
        .await
        .expect("send");
    }

    // Stored ciphertext differs from the plaintext.
    let stored: String = sqlx::query(
        "SELECT content FROM messages WHERE conversation_id = $1 ORDER BY created_at LIMIT 1",
    )
    .bind(conversation.id)
    .fetch_one(&pool)
    .await
    .expect("row")
    .get("content");
    assert_ne!(stored, "first");

    let history = chat
        .get_messages(bob, conversation.id, 10, None)
        .await
        .expect("history");
    let bodies: Vec<&str> = history.iter().map(|m| m.content.as_str()).collect();
    // Newest first.
    assert_eq!(bodies, vec!["third", "second", "first"]);
}

#[tokio::test]
#[ignore = "requires a local Postgres"]
async fn typing_rows_are_cleared_on_disconnect_path() {
    let pool = pool().await;
    let chat = service(&pool);
    let alice = seed_user(&pool, "Alice").await;
    let bob = seed_user(&pool, "Bob").await;

    let (conversation, _) = chat
        .create_conversation(
            alice,
            CreateConversation {
                kind: "private".into(),
                name: None,
                description: None,
                member_ids: vec![bob],
            },
        )
        .await
        .expect("create");

    chat.set_typing(alice, "Alice", conversation.id, true)
        .await
        .expect("typing on");

    let cleared = MessageService::clear_typing_for_user(&pool, alice)
        .await
        .expect("clear");
    assert_eq!(cleared, vec![conversation.id]);

    // Second pass finds nothing to reset.
    let cleared_again = MessageService::clear_typing_for_user(&pool, alice)
        .await
        .expect("clear again");
    assert!(cleared_again.is_empty());
}
