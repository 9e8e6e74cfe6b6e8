use chrono::{DateTime, Utc};
use sqlx::{Pool, Postgres, Row};
use uuid::Uuid;

use crate::error::AppError;
use crate::models::conversation::{private_pair_key, Conversation, ConversationType};
use crate::models::member::MemberRole;

/// Last-message preview attached to a conversation listing. Content is still
/// ciphertext here; the orchestrator decrypts before anything leaves the API.
pub struct LastMessagePreview {
    pub id: Uuid,
    pub sender_id: Uuid,
    pub content: String,
    pub content_nonce: String,
    pub message_type: String,
    pub created_at: DateTime<Utc>,
}

pub struct ConversationSummary {
    pub conversation: Conversation,
    pub unread_count: i64,
    pub last_message: Option<LastMessagePreview>,
}

/// Member roster entry joined against the user projection.
#[derive(Debug, Clone, serde::Serialize)]
pub struct MemberProfile {
    pub user_id: Uuid,
    pub display_name: String,
    pub role: MemberRole,
    pub is_online: bool,
    pub joined_at: DateTime<Utc>,
}

pub struct ConversationService;

impl ConversationService {
    fn conversation_from_row(row: &sqlx::postgres::PgRow) -> Result<Conversation, AppError> {
        let kind: String = row.get("conversation_type");
        Ok(Conversation {
            id: row.get("id"),
            conversation_type: ConversationType::parse(&kind)
                .ok_or_else(|| AppError::BadRequest(format!("unknown conversation type {kind}")))?,
            name: row.get("name"),
            description: row.get("description"),
            created_by: row.get("created_by"),
            is_active: row.get("is_active"),
            last_message_at: row.get("last_message_at"),
            created_at: row.get("created_at"),
        })
    }

    async fn user_exists(db: &Pool<Postgres>, user_id: Uuid) -> Result<bool, AppError> {
        let row = sqlx::query("SELECT 1 FROM users WHERE id = $1")
            .bind(user_id)
            .fetch_optional(db)
            .await?;
        Ok(row.is_some())
    }

    /// Create a conversation. For `private`, `member_ids` must contain exactly
    /// one other user; duplicate concurrent creates for the same pair converge
    /// on the surviving row via the partial unique index on the pair key.
    pub async fn create_conversation(
        db: &Pool<Postgres>,
        kind: ConversationType,
        created_by: Uuid,
        member_ids: &[Uuid],
        name: Option<String>,
        description: Option<String>,
    ) -> Result<Conversation, AppError> {
        // Deduplicate and drop the creator; role assignment adds them back.
        let mut others: Vec<Uuid> = Vec::new();
        for id in member_ids {
            if *id != created_by && !others.contains(id) {
                others.push(*id);
            }
        }

        let pair_key = match kind {
            ConversationType::Private => {
                if others.len() != 1 {
                    return Err(AppError::WrongPrivateMemberCount(others.len() + 1));
                }
                Some(private_pair_key(created_by, others[0]))
            }
            // Group names are optional; an unnamed group renders from its
            // member roster client-side.
            ConversationType::Group => None,
        };

        if !Self::user_exists(db, created_by).await? {
            return Err(AppError::UnknownCreator(created_by));
        }
        for member_id in &others {
            if !Self::user_exists(db, *member_id).await? {
                return Err(AppError::InvalidMember(*member_id));
            }
        }

        let conversation_id = Uuid::new_v4();
        let mut tx = db.begin().await?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO conversations (id, conversation_type, name, description, created_by, private_pair_key)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (private_pair_key) WHERE conversation_type = 'private' AND is_active
            DO NOTHING
            RETURNING id, conversation_type, name, description, created_by, is_active,
                      last_message_at, created_at
            "#,
        )
        .bind(conversation_id)
        .bind(kind.as_str())
        .bind(&name)
        .bind(&description)
        .bind(created_by)
        .bind(&pair_key)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = inserted else {
            // The pair's conversation already exists (concurrent creator or a
            // re-create after leaving). Converge on the surviving row and
            // reactivate both memberships.
            tx.rollback().await?;
            let (a, b) = (created_by, others[0]);
            let existing = Self::find_private_conversation(db, a, b)
                .await?
                .ok_or(AppError::Internal)?;
            sqlx::query(
                "UPDATE conversation_members SET left_at = NULL \
                 WHERE conversation_id = $1 AND user_id IN ($2, $3)",
            )
            .bind(existing.id)
            .bind(a)
            .bind(b)
            .execute(db)
            .await?;
            return Ok(existing);
        };
        let conversation = Self::conversation_from_row(&row)?;

        for member_id in std::iter::once(&created_by).chain(others.iter()) {
            let role = if *member_id == created_by {
                MemberRole::Admin
            } else {
                MemberRole::Member
            };
            sqlx::query(
                "INSERT INTO conversation_members (id, conversation_id, user_id, role) \
                 VALUES ($1, $2, $3, $4) \
                 ON CONFLICT (conversation_id, user_id) DO UPDATE SET left_at = NULL",
            )
            .bind(Uuid::new_v4())
            .bind(conversation_id)
            .bind(member_id)
            .bind(role.as_str())
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        tracing::info!(%conversation_id, kind=%kind.as_str(), "conversation created");
        Ok(conversation)
    }

    /// The existing active private conversation between exactly these two
    /// users, if any.
    pub async fn find_private_conversation(
        db: &Pool<Postgres>,
        a: Uuid,
        b: Uuid,
    ) -> Result<Option<Conversation>, AppError> {
        let row = sqlx::query(
            r#"
            SELECT id, conversation_type, name, description, created_by, is_active,
                   last_message_at, created_at
            FROM conversations
            WHERE conversation_type = 'private' AND is_active AND private_pair_key = $1
            "#,
        )
        .bind(private_pair_key(a, b))
        .fetch_optional(db)
        .await?;

        row.map(|r| Self::conversation_from_row(&r)).transpose()
    }

    pub async fn get_conversation(
        db: &Pool<Postgres>,
        conversation_id: Uuid,
    ) -> Result<Conversation, AppError> {
        let row = sqlx::query(
            r#"
            SELECT id, conversation_type, name, description, created_by, is_active,
                   last_message_at, created_at
            FROM conversations
            WHERE id = $1
            "#,
        )
        .bind(conversation_id)
        .fetch_optional(db)
        .await?
        .ok_or(AppError::NotFound)?;

        Self::conversation_from_row(&row)
    }

    /// Membership gate for every conversation operation and room join.
    pub async fn is_active_member(
        db: &Pool<Postgres>,
        conversation_id: Uuid,
        user_id: Uuid,
    ) -> Result<bool, AppError> {
        let row = sqlx::query(
            "SELECT 1 FROM conversation_members \
             WHERE conversation_id = $1 AND user_id = $2 AND left_at IS NULL LIMIT 1",
        )
        .bind(conversation_id)
        .bind(user_id)
        .fetch_optional(db)
        .await?;
        Ok(row.is_some())
    }

    pub async fn active_member_ids(
        db: &Pool<Postgres>,
        conversation_id: Uuid,
    ) -> Result<Vec<Uuid>, AppError> {
        let rows = sqlx::query(
            "SELECT user_id FROM conversation_members \
             WHERE conversation_id = $1 AND left_at IS NULL ORDER BY joined_at ASC",
        )
        .bind(conversation_id)
        .fetch_all(db)
        .await?;
        Ok(rows.into_iter().map(|r| r.get("user_id")).collect())
    }

    /// Conversation ids driving room-join on connect.
    pub async fn list_active_conversation_ids(
        db: &Pool<Postgres>,
        user_id: Uuid,
    ) -> Result<Vec<Uuid>, AppError> {
        let rows = sqlx::query(
            r#"
            SELECT c.id
            FROM conversations c
            JOIN conversation_members cm
              ON cm.conversation_id = c.id AND cm.user_id = $1 AND cm.left_at IS NULL
            WHERE c.is_active
            ORDER BY c.last_message_at DESC
            "#,
        )
        .bind(user_id)
        .fetch_all(db)
        .await?;
        Ok(rows.into_iter().map(|r| r.get("id")).collect())
    }

    /// Active member roster with display names, roles and coarse presence.
    pub async fn list_members(
        db: &Pool<Postgres>,
        conversation_id: Uuid,
    ) -> Result<Vec<MemberProfile>, AppError> {
        let rows = sqlx::query(
            r#"
            SELECT cm.user_id, cm.role, cm.joined_at, u.display_name, u.is_online
            FROM conversation_members cm
            JOIN users u ON u.id = cm.user_id
            WHERE cm.conversation_id = $1 AND cm.left_at IS NULL
            ORDER BY cm.joined_at
            "#,
        )
        .bind(conversation_id)
        .fetch_all(db)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| {
                let role: String = row.get("role");
                MemberProfile {
                    user_id: row.get("user_id"),
                    display_name: row.get("display_name"),
                    role: MemberRole::parse(&role).unwrap_or(MemberRole::Member),
                    is_online: row.get("is_online"),
                    joined_at: row.get("joined_at"),
                }
            })
            .collect())
    }

    /// Conversation list for the caller: active memberships ordered by most
    /// recent activity, with unread count and a last-message preview.
    pub async fn list_conversations(
        db: &Pool<Postgres>,
        user_id: Uuid,
    ) -> Result<Vec<ConversationSummary>, AppError> {
        let rows = sqlx::query(
            r#"
            SELECT c.id, c.conversation_type, c.name, c.description, c.created_by,
                   c.is_active, c.last_message_at, c.created_at,
                   (SELECT COUNT(*) FROM message_status ms
                      JOIN messages m ON m.id = ms.message_id
                     WHERE m.conversation_id = c.id
                       AND ms.user_id = $1
                       AND ms.status <> 'read') AS unread_count,
                   lm.id AS lm_id, lm.sender_id AS lm_sender_id, lm.content AS lm_content,
                   lm.content_nonce AS lm_nonce, lm.message_type AS lm_type,
                   lm.created_at AS lm_created_at
            FROM conversations c
            JOIN conversation_members cm
              ON cm.conversation_id = c.id AND cm.user_id = $1 AND cm.left_at IS NULL
            LEFT JOIN LATERAL (
                SELECT m.id, m.sender_id, m.content, m.content_nonce, m.message_type, m.created_at
                FROM messages m
                WHERE m.conversation_id = c.id AND NOT m.is_deleted
                ORDER BY m.created_at DESC
                LIMIT 1
            ) lm ON TRUE
            WHERE c.is_active
            ORDER BY c.last_message_at DESC
            LIMIT 100
            "#,
        )
        .bind(user_id)
        .fetch_all(db)
        .await?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let conversation = Self::conversation_from_row(&row)?;
            let unread_count: i64 = row.get("unread_count");
            let last_message_id: Option<Uuid> = row.try_get("lm_id").ok().flatten();
            let last_message = last_message_id.map(|id| LastMessagePreview {
                id,
                sender_id: row.get("lm_sender_id"),
                content: row.get("lm_content"),
                content_nonce: row.get("lm_nonce"),
                message_type: row.get("lm_type"),
                created_at: row.get("lm_created_at"),
            });
            out.push(ConversationSummary {
                conversation,
                unread_count,
                last_message,
            });
        }
        Ok(out)
    }

    /// Formal membership leave (sets `left_at`), distinct from the realtime
    /// room leave which has no persistence side effect.
    pub async fn leave_conversation(
        db: &Pool<Postgres>,
        conversation_id: Uuid,
        user_id: Uuid,
    ) -> Result<(), AppError> {
        let result = sqlx::query(
            "UPDATE conversation_members SET left_at = NOW() \
             WHERE conversation_id = $1 AND user_id = $2 AND left_at IS NULL",
        )
        .bind(conversation_id)
        .bind(user_id)
        .execute(db)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotMember);
        }
        Ok(())
    }

    /// Coarse presence annotation on the user projection; the live connection
    /// set in the gateway is the authority, this is the durable mirror.
    pub async fn set_user_presence(
        db: &Pool<Postgres>,
        user_id: Uuid,
        is_online: bool,
    ) -> Result<(), AppError> {
        sqlx::query("UPDATE users SET is_online = $2, last_seen = NOW() WHERE id = $1")
            .bind(user_id)
            .bind(is_online)
            .execute(db)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::postgres::PgPoolOptions;

    // A pool whose connections can never be established (port 1 refuses), so
    // any path that reaches the database fails with a connection error.
    fn dead_pool() -> Pool<Postgres> {
        PgPoolOptions::new()
            .acquire_timeout(std::time::Duration::from_millis(200))
            .connect_lazy("postgres://127.0.0.1:1/none")
            .expect("lazy pool")
    }

    #[tokio::test]
    async fn unnamed_group_passes_validation() {
        let err = ConversationService::create_conversation(
            &dead_pool(),
            ConversationType::Group,
            Uuid::new_v4(),
            &[Uuid::new_v4()],
            None,
            None,
        )
        .await
        .expect_err("dead pool cannot serve queries");
        // The payload is accepted; the only failure is the unreachable
        // database, not a validation rejection.
        assert!(matches!(err, AppError::Database(_)), "got {err:?}");
    }

    #[tokio::test]
    async fn private_member_count_is_checked_before_any_query() {
        let err = ConversationService::create_conversation(
            &dead_pool(),
            ConversationType::Private,
            Uuid::new_v4(),
            &[Uuid::new_v4(), Uuid::new_v4()],
            None,
            None,
        )
        .await
        .expect_err("three members cannot form a private conversation");
        assert!(matches!(err, AppError::WrongPrivateMemberCount(3)));
    }
}
