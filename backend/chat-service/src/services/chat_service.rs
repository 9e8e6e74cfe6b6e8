use chrono::{DateTime, Utc};
use serde::Deserialize;
use sqlx::{Pool, Postgres};
use std::sync::Arc;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::conversation::{Conversation, ConversationType};
use crate::models::message::{MessageType, MessageView};
use crate::realtime::events::ServerEvent;
use crate::realtime::PresenceRegistry;
use crate::services::conversation_service::{
    ConversationService, ConversationSummary, MemberProfile,
};
use crate::services::encryption::EncryptionService;
use crate::services::message_service::{
    ConversationStats, MessageService, NewMessage,
};
use crate::services::notification_dispatch::{NotificationDispatcher, NotificationJob};

#[derive(Debug, Clone, Deserialize)]
pub struct CreateConversation {
    // Named "kind" on the wire; "type" is the event tag in the realtime
    // protocol and cannot be reused inside the payload.
    pub kind: String,
    pub name: Option<String>,
    pub description: Option<String>,
    pub member_ids: Vec<Uuid>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SendMessage {
    pub conversation_id: Uuid,
    pub content: String,
    #[serde(default)]
    pub message_type: MessageType,
    #[serde(default)]
    pub reply_to_message_id: Option<Uuid>,
    #[serde(default)]
    pub forward_from_message_id: Option<Uuid>,
    #[serde(default)]
    pub attachment_url: Option<String>,
    #[serde(default)]
    pub attachment_name: Option<String>,
    #[serde(default)]
    pub attachment_size: Option<i64>,
    #[serde(default)]
    pub attachment_mime_type: Option<String>,
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
}

/// Business-logic core consumed by both the HTTP layer and the realtime
/// gateway. Owns the authorize → encode → persist → hydrate → notify pipeline.
#[derive(Clone)]
pub struct ChatService {
    db: Pool<Postgres>,
    encryption: Arc<EncryptionService>,
    presence: PresenceRegistry,
    notifier: NotificationDispatcher,
}

impl ChatService {
    pub fn new(
        db: Pool<Postgres>,
        encryption: Arc<EncryptionService>,
        presence: PresenceRegistry,
        notifier: NotificationDispatcher,
    ) -> Self {
        Self {
            db,
            encryption,
            presence,
            notifier,
        }
    }

    pub async fn create_conversation(
        &self,
        created_by: Uuid,
        req: CreateConversation,
    ) -> Result<(Conversation, Vec<Uuid>), AppError> {
        let kind = ConversationType::parse(&req.kind)
            .ok_or_else(|| AppError::InvalidConversationType(req.kind.clone()))?;

        let conversation = ConversationService::create_conversation(
            &self.db,
            kind,
            created_by,
            &req.member_ids,
            req.name,
            req.description,
        )
        .await?;

        let members = ConversationService::active_member_ids(&self.db, conversation.id).await?;

        // Announce to every member's live connections; offline members find
        // the conversation in their next list call.
        let event = ServerEvent::ConversationCreated {
            conversation: conversation.clone(),
            member_ids: members.clone(),
        };
        for member_id in &members {
            self.emit_to_user(*member_id, &event).await;
        }

        Ok((conversation, members))
    }

    /// Send pipeline. Fails with `NotMember` before any write; the append is
    /// one transaction; notification handoff happens only after commit and
    /// cannot fail the send.
    pub async fn send_message(
        &self,
        sender_id: Uuid,
        input: SendMessage,
    ) -> Result<MessageView, AppError> {
        // Authorize
        if !ConversationService::is_active_member(&self.db, input.conversation_id, sender_id)
            .await?
        {
            return Err(AppError::NotMember);
        }
        if input.content.trim().is_empty() && input.attachment_url.is_none() {
            return Err(AppError::BadRequest("message content cannot be empty".into()));
        }

        // Encode
        let (ciphertext, nonce) = self.encryption.encrypt(input.conversation_id, &input.content)?;

        // Persist (atomic fan-out)
        let (message_id, member_ids) = MessageService::append(
            &self.db,
            NewMessage {
                conversation_id: input.conversation_id,
                sender_id,
                content: ciphertext,
                content_nonce: nonce,
                content_plain: input.content.clone(),
                message_type: input.message_type,
                reply_to_message_id: input.reply_to_message_id,
                forward_from_message_id: input.forward_from_message_id,
                attachment_url: input.attachment_url,
                attachment_name: input.attachment_name,
                attachment_size: input.attachment_size,
                attachment_mime_type: input.attachment_mime_type,
                metadata: input.metadata,
            },
        )
        .await?;

        // Hydrate
        let view = MessageService::hydrate(&self.db, &self.encryption, message_id).await?;

        // Fan out to connected room subscribers.
        self.emit_to_room(
            view.conversation_id,
            &ServerEvent::NewMessage {
                message: view.clone(),
            },
            None,
        )
        .await;
        let preview: String = view.content.chars().take(140).collect();
        self.emit_to_room(
            view.conversation_id,
            &ServerEvent::ConversationUpdated {
                conversation_id: view.conversation_id,
                last_message: preview.clone(),
                last_message_at: view.created_at,
            },
            None,
        )
        .await;

        // Notify offline members, outside the transaction.
        let online = self.presence.online_users(&member_ids).await;
        for member_id in member_ids {
            if member_id == sender_id || online.contains(&member_id) {
                continue;
            }
            self.notifier.enqueue(NotificationJob {
                user_id: member_id,
                message_id,
                conversation_id: view.conversation_id,
                kind: "new_message".into(),
                title: format!("New message from {}", view.sender_name),
                body: preview.clone(),
                data: serde_json::json!({
                    "conversation_id": view.conversation_id,
                    "message_id": message_id,
                }),
            });
        }

        Ok(view)
    }

    /// Idempotent read-mark; the caller must be an active member and own a
    /// status row for a message in this conversation. The `message_read`
    /// broadcast only fires when the store confirmed the pair matched.
    pub async fn mark_message_read(
        &self,
        user_id: Uuid,
        message_id: Uuid,
        conversation_id: Uuid,
    ) -> Result<Option<DateTime<Utc>>, AppError> {
        if !ConversationService::is_active_member(&self.db, conversation_id, user_id).await? {
            return Err(AppError::NotMember);
        }
        let read_at =
            MessageService::mark_read(&self.db, conversation_id, message_id, user_id).await?;
        if let Some(read_at) = read_at {
            self.emit_to_room(
                conversation_id,
                &ServerEvent::MessageRead {
                    message_id,
                    conversation_id,
                    user_id,
                    read_at,
                },
                None,
            )
            .await;
        }
        Ok(read_at)
    }

    pub async fn set_typing(
        &self,
        user_id: Uuid,
        user_name: &str,
        conversation_id: Uuid,
        is_typing: bool,
    ) -> Result<(), AppError> {
        if !ConversationService::is_active_member(&self.db, conversation_id, user_id).await? {
            return Err(AppError::NotMember);
        }
        MessageService::set_typing(&self.db, conversation_id, user_id, is_typing).await?;
        // Excluded by user so none of the typist's own devices see the echo.
        self.emit_to_room(
            conversation_id,
            &ServerEvent::UserTyping {
                conversation_id,
                user_id,
                user_name: user_name.to_string(),
                is_typing,
            },
            Some(user_id),
        )
        .await;
        Ok(())
    }

    pub async fn members(
        &self,
        user_id: Uuid,
        conversation_id: Uuid,
    ) -> Result<Vec<MemberProfile>, AppError> {
        if !ConversationService::is_active_member(&self.db, conversation_id, user_id).await? {
            return Err(AppError::NotMember);
        }
        ConversationService::list_members(&self.db, conversation_id).await
    }

    pub async fn list_conversations(
        &self,
        user_id: Uuid,
    ) -> Result<Vec<ConversationSummary>, AppError> {
        ConversationService::list_conversations(&self.db, user_id).await
    }

    pub async fn get_messages(
        &self,
        user_id: Uuid,
        conversation_id: Uuid,
        limit: i64,
        before: Option<DateTime<Utc>>,
    ) -> Result<Vec<MessageView>, AppError> {
        if !ConversationService::is_active_member(&self.db, conversation_id, user_id).await? {
            return Err(AppError::NotMember);
        }
        MessageService::get_messages(&self.db, &self.encryption, conversation_id, limit, before)
            .await
    }

    pub async fn search(
        &self,
        user_id: Uuid,
        query: &str,
        conversation_id: Option<Uuid>,
        limit: i64,
    ) -> Result<Vec<MessageView>, AppError> {
        MessageService::search(
            &self.db,
            &self.encryption,
            user_id,
            query,
            conversation_id,
            limit,
        )
        .await
    }

    pub async fn stats(
        &self,
        user_id: Uuid,
        conversation_id: Uuid,
    ) -> Result<ConversationStats, AppError> {
        if !ConversationService::is_active_member(&self.db, conversation_id, user_id).await? {
            return Err(AppError::NotMember);
        }
        MessageService::stats(&self.db, conversation_id, user_id).await
    }

    /// Formal membership leave; realtime room subscriptions lapse on their
    /// own at the next reconnect.
    pub async fn leave_conversation(
        &self,
        user_id: Uuid,
        conversation_id: Uuid,
    ) -> Result<(), AppError> {
        ConversationService::leave_conversation(&self.db, conversation_id, user_id).await
    }

    pub async fn delete_message(
        &self,
        user_id: Uuid,
        message_id: Uuid,
    ) -> Result<(), AppError> {
        MessageService::soft_delete(&self.db, message_id, user_id).await
    }

    /// Decrypt a conversation-list preview for API output.
    pub fn decrypt_preview(&self, conversation_id: Uuid, ciphertext: &str, nonce: &str) -> String {
        self.encryption
            .decrypt_or_placeholder(conversation_id, ciphertext, nonce)
    }

    async fn emit_to_room(
        &self,
        conversation_id: Uuid,
        event: &ServerEvent,
        exclude_user: Option<Uuid>,
    ) {
        match event.to_message() {
            Ok(msg) => {
                self.presence
                    .broadcast_room(conversation_id, msg, exclude_user)
                    .await
            }
            Err(e) => {
                tracing::error!(event = event.event_type(), error = %e, "failed to encode event")
            }
        }
    }

    async fn emit_to_user(&self, user_id: Uuid, event: &ServerEvent) {
        match event.to_message() {
            Ok(msg) => self.presence.send_to_user(user_id, msg).await,
            Err(e) => {
                tracing::error!(event = event.event_type(), error = %e, "failed to encode event")
            }
        }
    }
}
