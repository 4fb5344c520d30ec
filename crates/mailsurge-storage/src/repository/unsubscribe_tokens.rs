//! Unsubscribe token repository

use mailsurge_common::types::{CampaignId, ContactId};
use sqlx::PgPool;

use crate::models::UnsubscribeToken;

/// Unsubscribe token repository
#[derive(Clone)]
pub struct UnsubscribeTokenRepository {
    pool: PgPool,
}

impl UnsubscribeTokenRepository {
    /// Create a new unsubscribe token repository
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Issue a token tying a contact (and optionally the campaign that
    /// carried the link) to a single unsubscribe action
    pub async fn create(
        &self,
        token: &str,
        contact_id: ContactId,
        campaign_id: Option<CampaignId>,
    ) -> Result<UnsubscribeToken, sqlx::Error> {
        sqlx::query_as::<_, UnsubscribeToken>(
            r#"
            INSERT INTO unsubscribe_tokens (token, contact_id, campaign_id)
            VALUES ($1, $2, $3)
            RETURNING *
            "#,
        )
        .bind(token)
        .bind(contact_id)
        .bind(campaign_id)
        .fetch_one(&self.pool)
        .await
    }

    /// Get a token by value
    pub async fn get(&self, token: &str) -> Result<Option<UnsubscribeToken>, sqlx::Error> {
        sqlx::query_as::<_, UnsubscribeToken>(
            "SELECT * FROM unsubscribe_tokens WHERE token = $1",
        )
        .bind(token)
        .fetch_optional(&self.pool)
        .await
    }
}
