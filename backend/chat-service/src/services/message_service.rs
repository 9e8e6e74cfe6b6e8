use chrono::{DateTime, Utc};
use sqlx::{Pool, Postgres, Row};
use uuid::Uuid;

use crate::error::AppError;
use crate::models::message::{DeliveryState, MessageType, MessageView, ReplyPreview};
use crate::services::encryption::EncryptionService;

/// Everything needed to persist one message. Content arrives already
/// encrypted; the plaintext mirror is carried separately for search.
pub struct NewMessage {
    pub conversation_id: Uuid,
    pub sender_id: Uuid,
    pub content: String,
    pub content_nonce: String,
    pub content_plain: String,
    pub message_type: MessageType,
    pub reply_to_message_id: Option<Uuid>,
    pub forward_from_message_id: Option<Uuid>,
    pub attachment_url: Option<String>,
    pub attachment_name: Option<String>,
    pub attachment_size: Option<i64>,
    pub attachment_mime_type: Option<String>,
    pub metadata: Option<serde_json::Value>,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct ConversationStats {
    pub member_count: i64,
    pub message_count: i64,
    pub unread_count: i64,
}

pub struct MessageService;

impl MessageService {
    /// Atomic append: message row, one status row per active member (sender
    /// pre-marked read), and the conversation's `last_message_at`, all in one
    /// transaction. Partial failure leaves nothing behind — delivery and read
    /// accounting depend on the status rows being complete.
    pub async fn append(
        db: &Pool<Postgres>,
        msg: NewMessage,
    ) -> Result<(Uuid, Vec<Uuid>), AppError> {
        let message_id = Uuid::new_v4();
        let mut tx = db.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO messages (id, conversation_id, sender_id, content, content_nonce,
                                  content_plain, message_type, reply_to_message_id,
                                  forward_from_message_id, attachment_url, attachment_name,
                                  attachment_size, attachment_mime_type, metadata)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            "#,
        )
        .bind(message_id)
        .bind(msg.conversation_id)
        .bind(msg.sender_id)
        .bind(&msg.content)
        .bind(&msg.content_nonce)
        .bind(&msg.content_plain)
        .bind(msg.message_type.as_str())
        .bind(msg.reply_to_message_id)
        .bind(msg.forward_from_message_id)
        .bind(&msg.attachment_url)
        .bind(&msg.attachment_name)
        .bind(msg.attachment_size)
        .bind(&msg.attachment_mime_type)
        .bind(&msg.metadata)
        .execute(&mut *tx)
        .await?;

        // Membership is read inside the transaction so the fan-out matches the
        // active member set at send time.
        let member_rows = sqlx::query(
            "SELECT user_id FROM conversation_members \
             WHERE conversation_id = $1 AND left_at IS NULL",
        )
        .bind(msg.conversation_id)
        .fetch_all(&mut *tx)
        .await?;
        let member_ids: Vec<Uuid> = member_rows.into_iter().map(|r| r.get("user_id")).collect();

        for member_id in &member_ids {
            let is_sender = *member_id == msg.sender_id;
            sqlx::query(
                r#"
                INSERT INTO message_status (id, message_id, user_id, status, read_at)
                VALUES ($1, $2, $3, $4, CASE WHEN $5 THEN NOW() ELSE NULL END)
                "#,
            )
            .bind(Uuid::new_v4())
            .bind(message_id)
            .bind(member_id)
            .bind(if is_sender {
                DeliveryState::Read.as_str()
            } else {
                DeliveryState::Sent.as_str()
            })
            .bind(is_sender)
            .execute(&mut *tx)
            .await?;
        }

        sqlx::query("UPDATE conversations SET last_message_at = NOW() WHERE id = $1")
            .bind(msg.conversation_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok((message_id, member_ids))
    }

    /// Reload a message with sender details and the reply quote for delivery.
    pub async fn hydrate(
        db: &Pool<Postgres>,
        encryption: &EncryptionService,
        message_id: Uuid,
    ) -> Result<MessageView, AppError> {
        let row = sqlx::query(
            r#"
            SELECT m.id, m.conversation_id, m.sender_id, u.display_name AS sender_name,
                   m.content, m.content_nonce, m.message_type, m.reply_to_message_id,
                   m.forward_from_message_id, m.attachment_url, m.attachment_name,
                   m.attachment_size, m.attachment_mime_type, m.metadata,
                   m.is_edited, m.is_deleted, m.created_at,
                   rm.id AS reply_id, rm.sender_id AS reply_sender_id,
                   rm.content AS reply_content, rm.content_nonce AS reply_nonce
            FROM messages m
            JOIN users u ON u.id = m.sender_id
            LEFT JOIN messages rm ON rm.id = m.reply_to_message_id
            WHERE m.id = $1
            "#,
        )
        .bind(message_id)
        .fetch_optional(db)
        .await?
        .ok_or(AppError::NotFound)?;

        Ok(Self::view_from_row(&row, encryption))
    }

    fn view_from_row(row: &sqlx::postgres::PgRow, encryption: &EncryptionService) -> MessageView {
        let conversation_id: Uuid = row.get("conversation_id");
        let content_ct: String = row.get("content");
        let content_nonce: String = row.get("content_nonce");
        let message_type: String = row.get("message_type");

        let reply_to = row
            .try_get::<Option<Uuid>, _>("reply_id")
            .ok()
            .flatten()
            .map(|id| {
                let reply_ct: String = row.get("reply_content");
                let reply_nonce: String = row.get("reply_nonce");
                ReplyPreview {
                    id,
                    sender_id: row.get("reply_sender_id"),
                    content: encryption.decrypt_or_placeholder(
                        conversation_id,
                        &reply_ct,
                        &reply_nonce,
                    ),
                }
            });

        MessageView {
            id: row.get("id"),
            conversation_id,
            sender_id: row.get("sender_id"),
            sender_name: row.get("sender_name"),
            content: encryption.decrypt_or_placeholder(conversation_id, &content_ct, &content_nonce),
            message_type: MessageType::parse(&message_type).unwrap_or_default(),
            reply_to,
            forward_from_message_id: row.get("forward_from_message_id"),
            attachment_url: row.get("attachment_url"),
            attachment_name: row.get("attachment_name"),
            attachment_size: row.get("attachment_size"),
            attachment_mime_type: row.get("attachment_mime_type"),
            metadata: row.get("metadata"),
            is_edited: row.get("is_edited"),
            is_deleted: row.get("is_deleted"),
            created_at: row.get("created_at"),
        }
    }

    /// Idempotent read transition. Only the status row's owner is affected;
    /// a repeat call keeps the first `read_at` and still reports success.
    /// The message must belong to `conversation_id` so a receipt cannot be
    /// broadcast into a room the message was never in. Returns the effective
    /// read timestamp, or `None` if nothing matched.
    pub async fn mark_read(
        db: &Pool<Postgres>,
        conversation_id: Uuid,
        message_id: Uuid,
        user_id: Uuid,
    ) -> Result<Option<DateTime<Utc>>, AppError> {
        let row = sqlx::query(
            r#"
            UPDATE message_status ms
            SET status = 'read', read_at = COALESCE(ms.read_at, NOW())
            FROM messages m
            WHERE ms.message_id = $1 AND ms.user_id = $2
              AND m.id = ms.message_id AND m.conversation_id = $3
            RETURNING ms.read_at
            "#,
        )
        .bind(message_id)
        .bind(user_id)
        .bind(conversation_id)
        .fetch_optional(db)
        .await?;

        Ok(row.map(|r| r.get("read_at")))
    }

    /// Paginated history, newest first, soft-deleted rows excluded.
    pub async fn get_messages(
        db: &Pool<Postgres>,
        encryption: &EncryptionService,
        conversation_id: Uuid,
        limit: i64,
        before: Option<DateTime<Utc>>,
    ) -> Result<Vec<MessageView>, AppError> {
        let limit = limit.clamp(1, 200);
        let rows = sqlx::query(
            r#"
            SELECT m.id, m.conversation_id, m.sender_id, u.display_name AS sender_name,
                   m.content, m.content_nonce, m.message_type, m.reply_to_message_id,
                   m.forward_from_message_id, m.attachment_url, m.attachment_name,
                   m.attachment_size, m.attachment_mime_type, m.metadata,
                   m.is_edited, m.is_deleted, m.created_at,
                   rm.id AS reply_id, rm.sender_id AS reply_sender_id,
                   rm.content AS reply_content, rm.content_nonce AS reply_nonce
            FROM messages m
            JOIN users u ON u.id = m.sender_id
            LEFT JOIN messages rm ON rm.id = m.reply_to_message_id
            WHERE m.conversation_id = $1
              AND NOT m.is_deleted
              AND ($2::timestamptz IS NULL OR m.created_at < $2)
            ORDER BY m.created_at DESC
            LIMIT $3
            "#,
        )
        .bind(conversation_id)
        .bind(before)
        .bind(limit)
        .fetch_all(db)
        .await?;

        Ok(rows
            .iter()
            .map(|r| Self::view_from_row(r, encryption))
            .collect())
    }

    /// Case-insensitive substring search over the plaintext mirror, restricted
    /// to conversations the caller actively belongs to.
    pub async fn search(
        db: &Pool<Postgres>,
        encryption: &EncryptionService,
        user_id: Uuid,
        query: &str,
        conversation_id: Option<Uuid>,
        limit: i64,
    ) -> Result<Vec<MessageView>, AppError> {
        let limit = limit.clamp(1, 100);
        let pattern = format!("%{}%", query);
        let rows = sqlx::query(
            r#"
            SELECT m.id, m.conversation_id, m.sender_id, u.display_name AS sender_name,
                   m.content, m.content_nonce, m.message_type, m.reply_to_message_id,
                   m.forward_from_message_id, m.attachment_url, m.attachment_name,
                   m.attachment_size, m.attachment_mime_type, m.metadata,
                   m.is_edited, m.is_deleted, m.created_at,
                   NULL::uuid AS reply_id, NULL::uuid AS reply_sender_id,
                   NULL::text AS reply_content, NULL::text AS reply_nonce
            FROM messages m
            JOIN users u ON u.id = m.sender_id
            JOIN conversation_members cm
              ON cm.conversation_id = m.conversation_id
             AND cm.user_id = $1
             AND cm.left_at IS NULL
            WHERE NOT m.is_deleted
              AND m.content_plain ILIKE $2
              AND ($3::uuid IS NULL OR m.conversation_id = $3)
            ORDER BY m.created_at DESC
            LIMIT $4
            "#,
        )
        .bind(user_id)
        .bind(pattern)
        .bind(conversation_id)
        .bind(limit)
        .fetch_all(db)
        .await?;

        Ok(rows
            .iter()
            .map(|r| Self::view_from_row(r, encryption))
            .collect())
    }

    /// Soft delete; only the sender may flag their own message.
    pub async fn soft_delete(
        db: &Pool<Postgres>,
        message_id: Uuid,
        user_id: Uuid,
    ) -> Result<(), AppError> {
        let result =
            sqlx::query("UPDATE messages SET is_deleted = TRUE WHERE id = $1 AND sender_id = $2")
                .bind(message_id)
                .bind(user_id)
                .execute(db)
                .await?;
        if result.rows_affected() == 0 {
            return Err(AppError::NotFound);
        }
        Ok(())
    }

    pub async fn stats(
        db: &Pool<Postgres>,
        conversation_id: Uuid,
        user_id: Uuid,
    ) -> Result<ConversationStats, AppError> {
        let row = sqlx::query(
            r#"
            SELECT
              (SELECT COUNT(*) FROM conversation_members
                WHERE conversation_id = $1 AND left_at IS NULL) AS member_count,
              (SELECT COUNT(*) FROM messages
                WHERE conversation_id = $1 AND NOT is_deleted) AS message_count,
              (SELECT COUNT(*) FROM message_status ms
                 JOIN messages m ON m.id = ms.message_id
                WHERE m.conversation_id = $1 AND ms.user_id = $2
                  AND ms.status <> 'read') AS unread_count
            "#,
        )
        .bind(conversation_id)
        .bind(user_id)
        .fetch_one(db)
        .await?;

        Ok(ConversationStats {
            member_count: row.get("member_count"),
            message_count: row.get("message_count"),
            unread_count: row.get("unread_count"),
        })
    }

    /// Upsert the transient typing indicator; last state wins.
    pub async fn set_typing(
        db: &Pool<Postgres>,
        conversation_id: Uuid,
        user_id: Uuid,
        is_typing: bool,
    ) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO typing_status (conversation_id, user_id, is_typing, started_typing_at, last_typing_at)
            VALUES ($1, $2, $3, CASE WHEN $3 THEN NOW() ELSE NULL END, NOW())
            ON CONFLICT (conversation_id, user_id) DO UPDATE SET
                is_typing = EXCLUDED.is_typing,
                started_typing_at = CASE
                    WHEN EXCLUDED.is_typing AND NOT typing_status.is_typing THEN NOW()
                    WHEN EXCLUDED.is_typing THEN typing_status.started_typing_at
                    ELSE NULL
                END,
                last_typing_at = NOW()
            "#,
        )
        .bind(conversation_id)
        .bind(user_id)
        .bind(is_typing)
        .execute(db)
        .await?;
        Ok(())
    }

    /// Clear every typing row owned by a user (disconnect cleanup); returns
    /// the conversations whose indicators were actually reset.
    pub async fn clear_typing_for_user(
        db: &Pool<Postgres>,
        user_id: Uuid,
    ) -> Result<Vec<Uuid>, AppError> {
        let rows = sqlx::query(
            r#"
            UPDATE typing_status
            SET is_typing = FALSE, started_typing_at = NULL, last_typing_at = NOW()
            WHERE user_id = $1 AND is_typing
            RETURNING conversation_id
            "#,
        )
        .bind(user_id)
        .fetch_all(db)
        .await?;
        Ok(rows.into_iter().map(|r| r.get("conversation_id")).collect())
    }
}
