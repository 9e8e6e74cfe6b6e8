use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use axum::extract::ws::Message;
use tokio::sync::mpsc::UnboundedSender;
use tokio::sync::RwLock;
use uuid::Uuid;

pub mod events;
pub mod handlers;

struct Connection {
    user_id: Uuid,
    display_name: String,
    sender: UnboundedSender<Message>,
    rooms: HashSet<Uuid>,
}

#[derive(Default)]
struct RegistryInner {
    connections: HashMap<Uuid, Connection>,
    // userId -> set<connectionId>; a user is online iff their set is non-empty
    by_user: HashMap<Uuid, HashSet<Uuid>>,
    // conversationId -> set<connectionId>
    rooms: HashMap<Uuid, HashSet<Uuid>>,
}

/// Result of unregistering a connection, driving the disconnect sequence.
pub struct Disconnected {
    pub user_id: Uuid,
    pub display_name: String,
    /// True when this was the user's last live connection.
    pub last_for_user: bool,
}

/// In-memory presence table keyed by connection id, with derived user and
/// room indexes. This is a rebuildable cache: the database stays the source
/// of truth, and a process restart reconstructs presence from nothing.
///
/// Broadcasts take the write lock, so events within one room are delivered
/// to all subscribers in the order they are processed here.
#[derive(Clone, Default)]
pub struct PresenceRegistry {
    inner: Arc<RwLock<RegistryInner>>,
}

impl PresenceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a new authenticated connection. Returns true when this is the
    /// user's first live connection (i.e. they just came online).
    pub async fn register(
        &self,
        connection_id: Uuid,
        user_id: Uuid,
        display_name: String,
        sender: UnboundedSender<Message>,
    ) -> bool {
        let mut guard = self.inner.write().await;
        guard.connections.insert(
            connection_id,
            Connection {
                user_id,
                display_name,
                sender,
                rooms: HashSet::new(),
            },
        );
        let conns = guard.by_user.entry(user_id).or_default();
        let first = conns.is_empty();
        conns.insert(connection_id);
        crate::metrics::WS_CONNECTIONS.inc();
        first
    }

    /// Remove a connection and all its room subscriptions. Idempotent: a
    /// second call for the same id returns `None`, so the disconnect sequence
    /// (offline broadcast, typing clear) fires exactly once.
    pub async fn unregister(&self, connection_id: Uuid) -> Option<Disconnected> {
        let mut guard = self.inner.write().await;
        let conn = guard.connections.remove(&connection_id)?;
        for room in &conn.rooms {
            if let Some(members) = guard.rooms.get_mut(room) {
                members.remove(&connection_id);
                if members.is_empty() {
                    guard.rooms.remove(room);
                }
            }
        }
        let last_for_user = match guard.by_user.get_mut(&conn.user_id) {
            Some(set) => {
                set.remove(&connection_id);
                if set.is_empty() {
                    guard.by_user.remove(&conn.user_id);
                    true
                } else {
                    false
                }
            }
            None => true,
        };
        crate::metrics::WS_CONNECTIONS.dec();
        Some(Disconnected {
            user_id: conn.user_id,
            display_name: conn.display_name,
            last_for_user,
        })
    }

    /// Subscribe a connection to a conversation room. Returns false if the
    /// connection is already gone.
    pub async fn join_room(&self, connection_id: Uuid, conversation_id: Uuid) -> bool {
        let mut guard = self.inner.write().await;
        let Some(conn) = guard.connections.get_mut(&connection_id) else {
            return false;
        };
        conn.rooms.insert(conversation_id);
        guard.rooms.entry(conversation_id).or_default().insert(connection_id);
        true
    }

    pub async fn leave_room(&self, connection_id: Uuid, conversation_id: Uuid) {
        let mut guard = self.inner.write().await;
        if let Some(conn) = guard.connections.get_mut(&connection_id) {
            conn.rooms.remove(&conversation_id);
        }
        if let Some(members) = guard.rooms.get_mut(&conversation_id) {
            members.remove(&connection_id);
            if members.is_empty() {
                guard.rooms.remove(&conversation_id);
            }
        }
    }

    /// Deliver to every connection in a room, optionally excluding all of one
    /// user's connections. Send failures are ignored here; the dead
    /// connection's own reader loop performs the authoritative cleanup.
    pub async fn broadcast_room(
        &self,
        conversation_id: Uuid,
        msg: Message,
        exclude_user: Option<Uuid>,
    ) {
        let guard = self.inner.write().await;
        let Some(members) = guard.rooms.get(&conversation_id) else {
            return;
        };
        for connection_id in members {
            if let Some(conn) = guard.connections.get(connection_id) {
                if Some(conn.user_id) == exclude_user {
                    continue;
                }
                let _ = conn.sender.send(msg.clone());
            }
        }
    }

    /// Deliver to every live connection (presence announcements).
    pub async fn broadcast_all(&self, msg: Message, exclude_user: Option<Uuid>) {
        let guard = self.inner.write().await;
        for conn in guard.connections.values() {
            if Some(conn.user_id) == exclude_user {
                continue;
            }
            let _ = conn.sender.send(msg.clone());
        }
    }

    /// Deliver to all of one user's connections, whatever rooms they joined.
    pub async fn send_to_user(&self, user_id: Uuid, msg: Message) {
        let guard = self.inner.write().await;
        let Some(conns) = guard.by_user.get(&user_id) else {
            return;
        };
        for connection_id in conns {
            if let Some(conn) = guard.connections.get(connection_id) {
                let _ = conn.sender.send(msg.clone());
            }
        }
    }

    pub async fn send_to_connection(&self, connection_id: Uuid, msg: Message) {
        let guard = self.inner.write().await;
        if let Some(conn) = guard.connections.get(&connection_id) {
            let _ = conn.sender.send(msg);
        }
    }

    pub async fn is_user_online(&self, user_id: Uuid) -> bool {
        self.inner.read().await.by_user.contains_key(&user_id)
    }

    /// Subset of `candidates` with at least one live connection.
    pub async fn online_users(&self, candidates: &[Uuid]) -> HashSet<Uuid> {
        let guard = self.inner.read().await;
        candidates
            .iter()
            .copied()
            .filter(|id| guard.by_user.contains_key(id))
            .collect()
    }

    pub async fn room_size(&self, conversation_id: Uuid) -> usize {
        self.inner
            .read()
            .await
            .rooms
            .get(&conversation_id)
            .map_or(0, |m| m.len())
    }

    pub async fn connection_count(&self) -> usize {
        self.inner.read().await.connections.len()
    }
}
