//! Outbound notification queue for offline recipients.
//!
//! Jobs are handed off after the send transaction commits, on a channel
//! consumed by a spawned worker. The worker persists the notification row and
//! forwards to the push collaborator behind [`PushProvider`]; nothing on this
//! path can fail the send that produced the job.

use async_trait::async_trait;
use sqlx::{Pool, Postgres};
use std::sync::Arc;
use tokio::sync::mpsc::{unbounded_channel, UnboundedSender};
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::AppError;

#[derive(Debug, Clone)]
pub struct NotificationJob {
    pub user_id: Uuid,
    pub message_id: Uuid,
    pub conversation_id: Uuid,
    pub kind: String,
    pub title: String,
    pub body: String,
    pub data: serde_json::Value,
}

/// Seam to the external push-delivery collaborator.
#[async_trait]
pub trait PushProvider: Send + Sync {
    async fn send(&self, job: &NotificationJob) -> Result<(), AppError>;
}

/// Default provider: records the handoff in the logs. Real transports (APNs,
/// FCM) live outside this service.
pub struct LogPushProvider;

#[async_trait]
impl PushProvider for LogPushProvider {
    async fn send(&self, job: &NotificationJob) -> Result<(), AppError> {
        info!(user_id=%job.user_id, message_id=%job.message_id, "push handed off");
        Ok(())
    }
}

#[derive(Clone)]
pub struct NotificationDispatcher {
    tx: UnboundedSender<NotificationJob>,
}

impl NotificationDispatcher {
    /// Spawn the dispatch worker and return the enqueue handle.
    pub fn spawn(db: Pool<Postgres>, push: Arc<dyn PushProvider>) -> Self {
        let (tx, mut rx) = unbounded_channel::<NotificationJob>();
        tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                if let Err(e) = process_job(&db, push.as_ref(), &job).await {
                    warn!(user_id=%job.user_id, message_id=%job.message_id, error=%e,
                        "notification dispatch failed");
                }
            }
        });
        Self { tx }
    }

    /// Best-effort, non-blocking handoff.
    pub fn enqueue(&self, job: NotificationJob) {
        if self.tx.send(job).is_err() {
            warn!("notification worker is gone; dropping job");
        }
    }
}

async fn process_job(
    db: &Pool<Postgres>,
    push: &dyn PushProvider,
    job: &NotificationJob,
) -> Result<(), AppError> {
    let notification_id = Uuid::new_v4();
    sqlx::query(
        r#"
        INSERT INTO notifications (id, user_id, message_id, conversation_id, kind, title, body, data)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        "#,
    )
    .bind(notification_id)
    .bind(job.user_id)
    .bind(job.message_id)
    .bind(job.conversation_id)
    .bind(&job.kind)
    .bind(&job.title)
    .bind(&job.body)
    .bind(&job.data)
    .execute(db)
    .await?;

    push.send(job).await?;

    sqlx::query("UPDATE notifications SET push_sent = TRUE WHERE id = $1")
        .bind(notification_id)
        .execute(db)
        .await?;
    Ok(())
}
