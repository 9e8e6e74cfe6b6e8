//! Wire protocol for the realtime gateway.
//!
//! Both directions use internally tagged JSON (`"type": "..."`) with
//! snake_case event names. Unknown inbound types fail deserialization and are
//! answered with an `error` event on the offending connection only.

use axum::extract::ws::Message;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::conversation::Conversation;
use crate::models::message::MessageView;
use crate::services::chat_service::{CreateConversation, SendMessage};

/// Events a client may send over the socket.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientEvent {
    JoinConversation { conversation_id: Uuid },
    LeaveConversation { conversation_id: Uuid },
    SendMessage(SendMessage),
    TypingStart { conversation_id: Uuid },
    TypingStop { conversation_id: Uuid },
    MarkMessageRead {
        message_id: Uuid,
        conversation_id: Uuid,
    },
    CreateConversation(CreateConversation),
}

/// Events the gateway pushes to clients.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    UserOnline {
        user_id: Uuid,
        name: String,
        timestamp: DateTime<Utc>,
    },
    UserOffline {
        user_id: Uuid,
        name: String,
        last_seen: DateTime<Utc>,
    },
    NewMessage {
        #[serde(flatten)]
        message: MessageView,
    },
    ConversationUpdated {
        conversation_id: Uuid,
        last_message: String,
        last_message_at: DateTime<Utc>,
    },
    UserTyping {
        conversation_id: Uuid,
        user_id: Uuid,
        user_name: String,
        is_typing: bool,
    },
    MessageRead {
        message_id: Uuid,
        conversation_id: Uuid,
        user_id: Uuid,
        read_at: DateTime<Utc>,
    },
    ConversationCreated {
        #[serde(flatten)]
        conversation: Conversation,
        member_ids: Vec<Uuid>,
    },
    Error {
        message: String,
    },
}

impl ServerEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            ServerEvent::UserOnline { .. } => "user_online",
            ServerEvent::UserOffline { .. } => "user_offline",
            ServerEvent::NewMessage { .. } => "new_message",
            ServerEvent::ConversationUpdated { .. } => "conversation_updated",
            ServerEvent::UserTyping { .. } => "user_typing",
            ServerEvent::MessageRead { .. } => "message_read",
            ServerEvent::ConversationCreated { .. } => "conversation_created",
            ServerEvent::Error { .. } => "error",
        }
    }

    /// Encode as a websocket text frame.
    pub fn to_message(&self) -> Result<Message, serde_json::Error> {
        Ok(Message::Text(serde_json::to_string(self)?))
    }
}
