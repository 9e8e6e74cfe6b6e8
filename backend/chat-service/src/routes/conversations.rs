use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::error::AppError;
use crate::middleware::auth::AuthUser;
use crate::models::conversation::Conversation;
use crate::services::chat_service::CreateConversation;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct CreatedConversation {
    #[serde(flatten)]
    pub conversation: Conversation,
    pub member_ids: Vec<Uuid>,
}

/// `POST /api/v1/conversations`
pub async fn create(
    State(state): State<AppState>,
    AuthUser(identity): AuthUser,
    Json(req): Json<CreateConversation>,
) -> Result<(StatusCode, Json<CreatedConversation>), AppError> {
    let (conversation, member_ids) = state
        .chat
        .create_conversation(identity.user_id, req)
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(CreatedConversation {
            conversation,
            member_ids,
        }),
    ))
}

#[derive(Debug, Serialize)]
pub struct ConversationListItem {
    #[serde(flatten)]
    pub conversation: Conversation,
    pub unread_count: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_message: Option<LastMessageItem>,
}

#[derive(Debug, Serialize)]
pub struct LastMessageItem {
    pub id: Uuid,
    pub sender_id: Uuid,
    pub content: String,
    pub message_type: String,
    pub created_at: DateTime<Utc>,
}

/// `GET /api/v1/conversations` — caller's active conversations with unread
/// count and decrypted last-message preview.
pub async fn list(
    State(state): State<AppState>,
    AuthUser(identity): AuthUser,
) -> Result<Json<Vec<ConversationListItem>>, AppError> {
    let summaries = state.chat.list_conversations(identity.user_id).await?;
    let items = summaries
        .into_iter()
        .map(|s| {
            let last_message = s.last_message.map(|lm| LastMessageItem {
                id: lm.id,
                sender_id: lm.sender_id,
                content: state.chat.decrypt_preview(
                    s.conversation.id,
                    &lm.content,
                    &lm.content_nonce,
                ),
                message_type: lm.message_type,
                created_at: lm.created_at,
            });
            ConversationListItem {
                conversation: s.conversation,
                unread_count: s.unread_count,
                last_message,
            }
        })
        .collect();
    Ok(Json(items))
}

/// `GET /api/v1/conversations/:id/members`
pub async fn members(
    State(state): State<AppState>,
    AuthUser(identity): AuthUser,
    Path(conversation_id): Path<Uuid>,
) -> Result<Json<Vec<crate::services::conversation_service::MemberProfile>>, AppError> {
    let roster = state.chat.members(identity.user_id, conversation_id).await?;
    Ok(Json(roster))
}

/// `POST /api/v1/conversations/:id/leave`
pub async fn leave(
    State(state): State<AppState>,
    AuthUser(identity): AuthUser,
    Path(conversation_id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    state
        .chat
        .leave_conversation(identity.user_id, conversation_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
