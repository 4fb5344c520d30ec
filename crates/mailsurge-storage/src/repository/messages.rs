//! Message repository

use mailsurge_common::types::{CampaignId, MessageId};
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::{CreateMessage, Message};

/// Message repository
#[derive(Clone)]
pub struct MessageRepository {
    pool: PgPool,
}

impl MessageRepository {
    /// Create a new message repository
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create a message record in queued status
    pub async fn create(&self, input: CreateMessage) -> Result<Message, sqlx::Error> {
        let id = Uuid::new_v4();

        sqlx::query_as::<_, Message>(
            r#"
            INSERT INTO messages (
                id, campaign_id, contact_id, recipient_email, recipient_name,
                subject, html_body, text_body, tracking_id, status, queued_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, 'queued', NOW())
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(input.campaign_id)
        .bind(input.contact_id)
        .bind(&input.recipient_email)
        .bind(&input.recipient_name)
        .bind(&input.subject)
        .bind(&input.html_body)
        .bind(&input.text_body)
        .bind(&input.tracking_id)
        .fetch_one(&self.pool)
        .await
    }

    /// Get a message by ID
    pub async fn get(&self, id: MessageId) -> Result<Option<Message>, sqlx::Error> {
        sqlx::query_as::<_, Message>("SELECT * FROM messages WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
    }

    /// Mark a message sent, recording the ID the provider assigned
    pub async fn mark_sent(
        &self,
        id: MessageId,
        provider_message_id: Option<&str>,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE messages SET
                status = 'sent',
                provider_message_id = COALESCE($2, provider_message_id),
                sent_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(provider_message_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Mark a message failed with the transport error
    pub async fn mark_failed(&self, id: MessageId, error: &str) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE messages SET
                status = 'failed',
                error_message = $2
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(error)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// List messages for a campaign, optionally filtered by status
    pub async fn list_by_campaign(
        &self,
        campaign_id: CampaignId,
        status: Option<&str>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Message>, sqlx::Error> {
        if let Some(status) = status {
            sqlx::query_as::<_, Message>(
                r#"
                SELECT * FROM messages
                WHERE campaign_id = $1 AND status = $2
                ORDER BY created_at DESC
                LIMIT $3 OFFSET $4
                "#,
            )
            .bind(campaign_id)
            .bind(status)
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.pool)
            .await
        } else {
            sqlx::query_as::<_, Message>(
                r#"
                SELECT * FROM messages
                WHERE campaign_id = $1
                ORDER BY created_at DESC
                LIMIT $2 OFFSET $3
                "#,
            )
            .bind(campaign_id)
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.pool)
            .await
        }
    }
}
