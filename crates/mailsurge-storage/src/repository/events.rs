//! Message event repository
//!
//! Callback-driven entries are written transactionally by the event
//! processor alongside the status flips they record; dispatch appends
//! its terminal send outcomes through `append`.

use mailsurge_common::types::MessageId;
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::MessageEvent;

/// Message event repository
#[derive(Clone)]
pub struct EventRepository {
    pool: PgPool,
}

impl EventRepository {
    /// Create a new event repository
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Append one event to a message's log
    pub async fn append(
        &self,
        message_id: MessageId,
        event_type: &str,
        payload: Option<serde_json::Value>,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO message_events (id, message_id, event_type, payload)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(message_id)
        .bind(event_type)
        .bind(payload)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// List events for a message, oldest first
    pub async fn list_by_message(
        &self,
        message_id: MessageId,
    ) -> Result<Vec<MessageEvent>, sqlx::Error> {
        sqlx::query_as::<_, MessageEvent>(
            r#"
            SELECT * FROM message_events
            WHERE message_id = $1
            ORDER BY created_at ASC
            "#,
        )
        .bind(message_id)
        .fetch_all(&self.pool)
        .await
    }
}
