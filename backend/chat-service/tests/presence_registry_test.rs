//! Registry semantics that the disconnect and fan-out paths rely on.

use axum::extract::ws::Message;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver};
use uuid::Uuid;

use chat_service::realtime::PresenceRegistry;

fn text(s: &str) -> Message {
    Message::Text(s.to_string())
}

fn drain(rx: &mut UnboundedReceiver<Message>) -> Vec<Message> {
    let mut out = Vec::new();
    while let Ok(msg) = rx.try_recv() {
        out.push(msg);
    }
    out
}

#[tokio::test]
async fn first_and_last_connection_are_flagged() {
    let registry = PresenceRegistry::new();
    let user = Uuid::new_v4();
    let (tx_a, _rx_a) = unbounded_channel();
    let (tx_b, _rx_b) = unbounded_channel();
    let conn_a = Uuid::new_v4();
    let conn_b = Uuid::new_v4();

    assert!(registry.register(conn_a, user, "Ada".into(), tx_a).await);
    assert!(!registry.register(conn_b, user, "Ada".into(), tx_b).await);
    assert!(registry.is_user_online(user).await);

    let first = registry.unregister(conn_a).await.unwrap();
    assert!(!first.last_for_user);
    assert!(registry.is_user_online(user).await);

    let second = registry.unregister(conn_b).await.unwrap();
    assert!(second.last_for_user);
    assert_eq!(second.user_id, user);
    assert!(!registry.is_user_online(user).await);
}

#[tokio::test]
async fn unregister_is_idempotent() {
    let registry = PresenceRegistry::new();
    let conn = Uuid::new_v4();
    let (tx, _rx) = unbounded_channel();
    registry.register(conn, Uuid::new_v4(), "Ada".into(), tx).await;

    assert!(registry.unregister(conn).await.is_some());
    assert!(registry.unregister(conn).await.is_none());
    assert_eq!(registry.connection_count().await, 0);
}

#[tokio::test]
async fn room_broadcast_excludes_every_connection_of_one_user() {
    let registry = PresenceRegistry::new();
    let room = Uuid::new_v4();
    let typist = Uuid::new_v4();
    let other = Uuid::new_v4();

    let (tx_t1, mut rx_t1) = unbounded_channel();
    let (tx_t2, mut rx_t2) = unbounded_channel();
    let (tx_o, mut rx_o) = unbounded_channel();
    let conn_t1 = Uuid::new_v4();
    let conn_t2 = Uuid::new_v4();
    let conn_o = Uuid::new_v4();

    registry.register(conn_t1, typist, "Ada".into(), tx_t1).await;
    registry.register(conn_t2, typist, "Ada".into(), tx_t2).await;
    registry.register(conn_o, other, "Grace".into(), tx_o).await;
    for conn in [conn_t1, conn_t2, conn_o] {
        assert!(registry.join_room(conn, room).await);
    }

    registry.broadcast_room(room, text("typing"), Some(typist)).await;

    assert!(drain(&mut rx_t1).is_empty());
    assert!(drain(&mut rx_t2).is_empty());
    assert_eq!(drain(&mut rx_o).len(), 1);
}

#[tokio::test]
async fn broadcast_reaches_only_room_members() {
    let registry = PresenceRegistry::new();
    let room = Uuid::new_v4();

    let (tx_in, mut rx_in) = unbounded_channel();
    let (tx_out, mut rx_out) = unbounded_channel();
    let conn_in = Uuid::new_v4();
    let conn_out = Uuid::new_v4();

    registry.register(conn_in, Uuid::new_v4(), "Ada".into(), tx_in).await;
    registry.register(conn_out, Uuid::new_v4(), "Grace".into(), tx_out).await;
    registry.join_room(conn_in, room).await;

    registry.broadcast_room(room, text("hello"), None).await;

    assert_eq!(drain(&mut rx_in).len(), 1);
    assert!(drain(&mut rx_out).is_empty());
}

#[tokio::test]
async fn leaving_a_room_stops_delivery() {
    let registry = PresenceRegistry::new();
    let room = Uuid::new_v4();
    let conn = Uuid::new_v4();
    let (tx, mut rx) = unbounded_channel();

    registry.register(conn, Uuid::new_v4(), "Ada".into(), tx).await;
    registry.join_room(conn, room).await;
    assert_eq!(registry.room_size(room).await, 1);

    registry.leave_room(conn, room).await;
    assert_eq!(registry.room_size(room).await, 0);

    registry.broadcast_room(room, text("hello"), None).await;
    assert!(drain(&mut rx).is_empty());
}

#[tokio::test]
async fn unregister_cleans_room_memberships() {
    let registry = PresenceRegistry::new();
    let room = Uuid::new_v4();
    let conn = Uuid::new_v4();
    let (tx, _rx) = unbounded_channel();

    registry.register(conn, Uuid::new_v4(), "Ada".into(), tx).await;
    registry.join_room(conn, room).await;

    registry.unregister(conn).await;
    assert_eq!(registry.room_size(room).await, 0);
}

#[tokio::test]
async fn send_to_user_hits_all_devices() {
    let registry = PresenceRegistry::new();
    let user = Uuid::new_v4();
    let (tx_a, mut rx_a) = unbounded_channel();
    let (tx_b, mut rx_b) = unbounded_channel();

    registry.register(Uuid::new_v4(), user, "Ada".into(), tx_a).await;
    registry.register(Uuid::new_v4(), user, "Ada".into(), tx_b).await;

    registry.send_to_user(user, text("direct")).await;

    assert_eq!(drain(&mut rx_a).len(), 1);
    assert_eq!(drain(&mut rx_b).len(), 1);
}

#[tokio::test]
async fn online_users_filters_candidates() {
    let registry = PresenceRegistry::new();
    let online = Uuid::new_v4();
    let offline = Uuid::new_v4();
    let (tx, _rx) = unbounded_channel();
    registry.register(Uuid::new_v4(), online, "Ada".into(), tx).await;

    let result = registry.online_users(&[online, offline]).await;
    assert!(result.contains(&online));
    assert!(!result.contains(&offline));
}

#[tokio::test]
async fn join_room_fails_for_unknown_connection() {
    let registry = PresenceRegistry::new();
    assert!(!registry.join_room(Uuid::new_v4(), Uuid::new_v4()).await);
}
