use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;
use crate::middleware::auth::AuthUser;
use crate::models::message::{MessageType, MessageView};
use crate::services::chat_service::SendMessage;
use crate::services::message_service::ConversationStats;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    #[serde(default)]
    pub limit: Option<i64>,
    #[serde(default)]
    pub before: Option<DateTime<Utc>>,
}

/// `GET /api/v1/conversations/:id/messages?limit&before` — newest first.
pub async fn history(
    State(state): State<AppState>,
    AuthUser(identity): AuthUser,
    Path(conversation_id): Path<Uuid>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<Vec<MessageView>>, AppError> {
    let messages = state
        .chat
        .get_messages(
            identity.user_id,
            conversation_id,
            query.limit.unwrap_or(50),
            query.before,
        )
        .await?;
    Ok(Json(messages))
}

#[derive(Debug, Deserialize)]
pub struct SendMessageBody {
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

/// `POST /api/v1/conversations/:id/messages` — same pipeline as the realtime
/// `send_message` event, including room fan-out.
pub async fn send(
    State(state): State<AppState>,
    AuthUser(identity): AuthUser,
    Path(conversation_id): Path<Uuid>,
    Json(body): Json<SendMessageBody>,
) -> Result<(StatusCode, Json<MessageView>), AppError> {
    let view = state
        .chat
        .send_message(
            identity.user_id,
            SendMessage {
                conversation_id,
                content: body.content,
                message_type: body.message_type,
                reply_to_message_id: body.reply_to_message_id,
                forward_from_message_id: body.forward_from_message_id,
                attachment_url: body.attachment_url,
                attachment_name: body.attachment_name,
                attachment_size: body.attachment_size,
                attachment_mime_type: body.attachment_mime_type,
                metadata: body.metadata,
            },
        )
        .await?;
    Ok((StatusCode::CREATED, Json(view)))
}

#[derive(Debug, Deserialize)]
pub struct MarkReadBody {
    pub conversation_id: Uuid,
}

#[derive(Debug, Serialize)]
pub struct MarkReadResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub read_at: Option<DateTime<Utc>>,
}

/// `POST /api/v1/messages/:id/read` — idempotent; repeat calls return the
/// original `read_at`.
pub async fn mark_read(
    State(state): State<AppState>,
    AuthUser(identity): AuthUser,
    Path(message_id): Path<Uuid>,
    Json(body): Json<MarkReadBody>,
) -> Result<Json<MarkReadResponse>, AppError> {
    let read_at = state
        .chat
        .mark_message_read(identity.user_id, message_id, body.conversation_id)
        .await?;
    Ok(Json(MarkReadResponse { read_at }))
}

/// `DELETE /api/v1/messages/:id` — soft delete, sender only.
pub async fn remove(
    State(state): State<AppState>,
    AuthUser(identity): AuthUser,
    Path(message_id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    state.chat.delete_message(identity.user_id, message_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    pub q: String,
    #[serde(default)]
    pub conversation_id: Option<Uuid>,
    #[serde(default)]
    pub limit: Option<i64>,
}

/// `GET /api/v1/messages/search?q&conversation_id` — scoped to the caller's
/// memberships.
pub async fn search(
    State(state): State<AppState>,
    AuthUser(identity): AuthUser,
    Query(query): Query<SearchQuery>,
) -> Result<Json<Vec<MessageView>>, AppError> {
    let results = state
        .chat
        .search(
            identity.user_id,
            &query.q,
            query.conversation_id,
            query.limit.unwrap_or(50),
        )
        .await?;
    Ok(Json(results))
}

#[derive(Debug, Deserialize)]
pub struct TypingBody {
    pub is_typing: bool,
}

/// `POST /api/v1/conversations/:id/typing` — persists the indicator and
/// broadcasts `user_typing` to the room.
pub async fn typing(
    State(state): State<AppState>,
    AuthUser(identity): AuthUser,
    Path(conversation_id): Path<Uuid>,
    Json(body): Json<TypingBody>,
) -> Result<StatusCode, AppError> {
    state
        .chat
        .set_typing(
            identity.user_id,
            &identity.display_name,
            conversation_id,
            body.is_typing,
        )
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// `GET /api/v1/conversations/:id/stats`
pub async fn stats(
    State(state): State<AppState>,
    AuthUser(identity): AuthUser,
    Path(conversation_id): Path<Uuid>,
) -> Result<Json<ConversationStats>, AppError> {
    let stats = state.chat.stats(identity.user_id, conversation_id).await?;
    Ok(Json(stats))
}
