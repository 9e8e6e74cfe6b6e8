//! Websocket session lifecycle: upgrade, event loop, disconnect sequence.

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Query, State, WebSocketUpgrade};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc::unbounded_channel;
use tokio::time::{interval, Duration, Instant};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::auth::Identity;
use crate::realtime::events::{ClientEvent, ServerEvent};
use crate::realtime::PresenceRegistry;
use crate::services::conversation_service::ConversationService;
use crate::services::message_service::MessageService;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    token: Option<String>,
}

/// `GET /ws?token=...` — the credential is verified before the upgrade is
/// accepted, so an unauthenticated peer never gets a socket.
pub async fn ws_handler(
    State(state): State<AppState>,
    Query(query): Query<WsQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    let Some(token) = query.token else {
        return StatusCode::UNAUTHORIZED.into_response();
    };
    let identity = match state.verifier.verify(&token).await {
        Ok(identity) => identity,
        Err(_) => return StatusCode::UNAUTHORIZED.into_response(),
    };
    ws.on_upgrade(move |socket| handle_socket(state, identity, socket))
}

async fn handle_socket(state: AppState, identity: Identity, socket: WebSocket) {
    let connection_id = Uuid::new_v4();
    let (tx, mut rx) = unbounded_channel::<Message>();

    let first_connection = state
        .presence
        .register(
            connection_id,
            identity.user_id,
            identity.display_name.clone(),
            tx,
        )
        .await;
    info!(user_id = %identity.user_id, %connection_id, "websocket connected");

    if first_connection {
        if let Err(e) =
            ConversationService::set_user_presence(&state.db, identity.user_id, true).await
        {
            warn!(user_id = %identity.user_id, error = %e, "failed to persist online state");
        }
        broadcast_all_event(
            &state.presence,
            &ServerEvent::UserOnline {
                user_id: identity.user_id,
                name: identity.display_name.clone(),
                timestamp: Utc::now(),
            },
            Some(identity.user_id),
        )
        .await;
    }

    // Auto-subscribe to every conversation the user is an active member of.
    match ConversationService::list_active_conversation_ids(&state.db, identity.user_id).await {
        Ok(conversation_ids) => {
            for conversation_id in conversation_ids {
                state.presence.join_room(connection_id, conversation_id).await;
            }
        }
        Err(e) => {
            warn!(user_id = %identity.user_id, error = %e, "failed to load conversation rooms");
        }
    }

    let (mut sink, mut stream) = socket.split();
    let mut ping = interval(Duration::from_secs(state.config.ws_ping_interval_secs));
    let idle_timeout = Duration::from_secs(state.config.ws_timeout_secs);
    let mut last_seen = Instant::now();

    loop {
        tokio::select! {
            outbound = rx.recv() => {
                match outbound {
                    Some(msg) => {
                        if sink.send(msg).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
            inbound = stream.next() => {
                match inbound {
                    Some(Ok(Message::Text(text))) => {
                        last_seen = Instant::now();
                        match serde_json::from_str::<ClientEvent>(&text) {
                            Ok(event) => {
                                handle_client_event(&state, connection_id, &identity, event).await;
                            }
                            Err(e) => {
                                debug!(%connection_id, error = %e, "unparseable client event");
                                send_event(
                                    &state.presence,
                                    connection_id,
                                    &ServerEvent::Error {
                                        message: format!("invalid event: {e}"),
                                    },
                                )
                                .await;
                            }
                        }
                    }
                    Some(Ok(Message::Ping(_) | Message::Pong(_))) => {
                        last_seen = Instant::now();
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(Message::Binary(_))) => {
                        last_seen = Instant::now();
                        send_event(
                            &state.presence,
                            connection_id,
                            &ServerEvent::Error {
                                message: "binary frames are not supported".into(),
                            },
                        )
                        .await;
                    }
                    Some(Err(e)) => {
                        debug!(%connection_id, error = %e, "websocket read error");
                        break;
                    }
                }
            }
            _ = ping.tick() => {
                if last_seen.elapsed() > idle_timeout {
                    debug!(%connection_id, "websocket idle timeout");
                    break;
                }
                if sink.send(Message::Ping(Vec::new())).await.is_err() {
                    break;
                }
            }
        }
    }

    disconnect(&state, connection_id).await;
}

/// Disconnect sequence. `unregister` is idempotent, so the offline broadcast
/// and typing cleanup run at most once per connection.
async fn disconnect(state: &AppState, connection_id: Uuid) {
    let Some(gone) = state.presence.unregister(connection_id).await else {
        return;
    };
    info!(user_id = %gone.user_id, %connection_id, "websocket disconnected");
    if !gone.last_for_user {
        return;
    }

    if let Err(e) = ConversationService::set_user_presence(&state.db, gone.user_id, false).await {
        warn!(user_id = %gone.user_id, error = %e, "failed to persist offline state");
    }

    match MessageService::clear_typing_for_user(&state.db, gone.user_id).await {
        Ok(conversation_ids) => {
            for conversation_id in conversation_ids {
                broadcast_room_event(
                    &state.presence,
                    conversation_id,
                    &ServerEvent::UserTyping {
                        conversation_id,
                        user_id: gone.user_id,
                        user_name: gone.display_name.clone(),
                        is_typing: false,
                    },
                    Some(gone.user_id),
                )
                .await;
            }
        }
        Err(e) => {
            warn!(user_id = %gone.user_id, error = %e, "failed to clear typing state");
        }
    }

    broadcast_all_event(
        &state.presence,
        &ServerEvent::UserOffline {
            user_id: gone.user_id,
            name: gone.display_name,
            last_seen: Utc::now(),
        },
        None,
    )
    .await;
}

async fn handle_client_event(
    state: &AppState,
    connection_id: Uuid,
    identity: &Identity,
    event: ClientEvent,
) {
    match event {
        ClientEvent::JoinConversation { conversation_id } => {
            match ConversationService::is_active_member(&state.db, conversation_id, identity.user_id)
                .await
            {
                Ok(true) => {
                    state.presence.join_room(connection_id, conversation_id).await;
                }
                Ok(false) => {
                    send_event(
                        &state.presence,
                        connection_id,
                        &ServerEvent::Error {
                            message: "not a member of this conversation".into(),
                        },
                    )
                    .await;
                }
                Err(e) => report_error(&state.presence, connection_id, &e).await,
            }
        }
        ClientEvent::LeaveConversation { conversation_id } => {
            // Room-only; leaving the subscription does not leave the conversation.
            state.presence.leave_room(connection_id, conversation_id).await;
        }
        ClientEvent::SendMessage(input) => {
            // The service broadcasts new_message / conversation_updated itself.
            if let Err(e) = state.chat.send_message(identity.user_id, input).await {
                report_error(&state.presence, connection_id, &e).await;
            }
        }
        ClientEvent::TypingStart { conversation_id } => {
            set_typing(state, connection_id, identity, conversation_id, true).await;
        }
        ClientEvent::TypingStop { conversation_id } => {
            set_typing(state, connection_id, identity, conversation_id, false).await;
        }
        ClientEvent::MarkMessageRead {
            message_id,
            conversation_id,
        } => {
            // The service broadcasts message_read on success; a missing
            // status row is silently fine.
            if let Err(e) = state
                .chat
                .mark_message_read(identity.user_id, message_id, conversation_id)
                .await
            {
                report_error(&state.presence, connection_id, &e).await;
            }
        }
        ClientEvent::CreateConversation(req) => {
            match state.chat.create_conversation(identity.user_id, req).await {
                Ok((conversation, _member_ids)) => {
                    // Subscribe the creating connection right away; other
                    // members join on receipt of conversation_created.
                    state.presence.join_room(connection_id, conversation.id).await;
                }
                Err(e) => report_error(&state.presence, connection_id, &e).await,
            }
        }
    }
}

async fn set_typing(
    state: &AppState,
    connection_id: Uuid,
    identity: &Identity,
    conversation_id: Uuid,
    is_typing: bool,
) {
    if let Err(e) = state
        .chat
        .set_typing(
            identity.user_id,
            &identity.display_name,
            conversation_id,
            is_typing,
        )
        .await
    {
        report_error(&state.presence, connection_id, &e).await;
    }
}

async fn report_error(
    presence: &PresenceRegistry,
    connection_id: Uuid,
    err: &crate::error::AppError,
) {
    send_event(
        presence,
        connection_id,
        &ServerEvent::Error {
            message: err.to_string(),
        },
    )
    .await;
}

async fn send_event(presence: &PresenceRegistry, connection_id: Uuid, event: &ServerEvent) {
    match event.to_message() {
        Ok(msg) => presence.send_to_connection(connection_id, msg).await,
        Err(e) => error!(event = event.event_type(), error = %e, "failed to encode event"),
    }
}

async fn broadcast_room_event(
    presence: &PresenceRegistry,
    conversation_id: Uuid,
    event: &ServerEvent,
    exclude_user: Option<Uuid>,
) {
    match event.to_message() {
        Ok(msg) => presence.broadcast_room(conversation_id, msg, exclude_user).await,
        Err(e) => error!(event = event.event_type(), error = %e, "failed to encode event"),
    }
}

async fn broadcast_all_event(
    presence: &PresenceRegistry,
    event: &ServerEvent,
    exclude_user: Option<Uuid>,
) {
    match event.to_message() {
        Ok(msg) => presence.broadcast_all(msg, exclude_user).await,
        Err(e) => error!(event = event.event_type(), error = %e, "failed to encode event"),
    }
}
