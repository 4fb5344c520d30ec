//! Campaign repository

use chrono::Utc;
use mailsurge_common::types::OrgId;
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::{Campaign, CampaignStatus, CreateCampaign, UpdateCampaign};

/// Campaign repository
#[derive(Clone)]
pub struct CampaignRepository {
    pool: PgPool,
}

impl CampaignRepository {
    /// Create a new campaign repository
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create a new campaign in draft status
    pub async fn create(&self, input: CreateCampaign) -> Result<Campaign, sqlx::Error> {
        let id = Uuid::new_v4();

        sqlx::query_as::<_, Campaign>(
            r#"
            INSERT INTO campaigns (
                id, org_id, name, subject, from_name, from_email, reply_to,
                html_body, text_body, scheduled_at, batch_size
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(input.org_id)
        .bind(&input.name)
        .bind(&input.subject)
        .bind(&input.from_name)
        .bind(&input.from_email)
        .bind(&input.reply_to)
        .bind(&input.html_body)
        .bind(&input.text_body)
        .bind(input.scheduled_at)
        .bind(input.batch_size.unwrap_or(50))
        .fetch_one(&self.pool)
        .await
    }

    /// Get a campaign by ID
    pub async fn get(&self, id: Uuid) -> Result<Option<Campaign>, sqlx::Error> {
        sqlx::query_as::<_, Campaign>("SELECT * FROM campaigns WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
    }

    /// Get a campaign by ID and organization
    pub async fn get_by_org(
        &self,
        org_id: OrgId,
        id: Uuid,
    ) -> Result<Option<Campaign>, sqlx::Error> {
        sqlx::query_as::<_, Campaign>("SELECT * FROM campaigns WHERE id = $1 AND org_id = $2")
            .bind(id)
            .bind(org_id)
            .fetch_optional(&self.pool)
            .await
    }

    /// List campaigns for an organization
    pub async fn list_by_org(
        &self,
        org_id: OrgId,
        status: Option<CampaignStatus>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Campaign>, sqlx::Error> {
        if let Some(status) = status {
            sqlx::query_as::<_, Campaign>(
                r#"
                SELECT * FROM campaigns
                WHERE org_id = $1 AND status = $2
                ORDER BY created_at DESC
                LIMIT $3 OFFSET $4
                "#,
            )
            .bind(org_id)
            .bind(status.to_string())
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.pool)
            .await
        } else {
            sqlx::query_as::<_, Campaign>(
                r#"
                SELECT * FROM campaigns
                WHERE org_id = $1
                ORDER BY created_at DESC
                LIMIT $2 OFFSET $3
                "#,
            )
            .bind(org_id)
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.pool)
            .await
        }
    }

    /// Update a campaign. Content fields are only writable while the
    /// campaign is still in draft; afterwards only the name changes.
    pub async fn update(
        &self,
        id: Uuid,
        org_id: OrgId,
        input: UpdateCampaign,
    ) -> Result<Option<Campaign>, sqlx::Error> {
        let current = match self.get_by_org(org_id, id).await? {
            Some(c) => c,
            None => return Ok(None),
        };

        if current.status != "draft" {
            return sqlx::query_as::<_, Campaign>(
                r#"
                UPDATE campaigns SET
                    name = COALESCE($3, name),
                    updated_at = NOW()
                WHERE id = $1 AND org_id = $2
                RETURNING *
                "#,
            )
            .bind(id)
            .bind(org_id)
            .bind(&input.name)
            .fetch_optional(&self.pool)
            .await;
        }

        sqlx::query_as::<_, Campaign>(
            r#"
            UPDATE campaigns SET
                name = COALESCE($3, name),
                subject = COALESCE($4, subject),
                from_name = COALESCE($5, from_name),
                from_email = COALESCE($6, from_email),
                reply_to = COALESCE($7, reply_to),
                html_body = COALESCE($8, html_body),
                text_body = COALESCE($9, text_body),
                scheduled_at = COALESCE($10, scheduled_at),
                batch_size = COALESCE($11, batch_size),
                updated_at = NOW()
            WHERE id = $1 AND org_id = $2
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(org_id)
        .bind(&input.name)
        .bind(&input.subject)
        .bind(&input.from_name)
        .bind(&input.from_email)
        .bind(&input.reply_to)
        .bind(&input.html_body)
        .bind(&input.text_body)
        .bind(input.scheduled_at)
        .bind(input.batch_size)
        .fetch_optional(&self.pool)
        .await
    }

    /// Guarded status transition. Only flips the row if it is still in
    /// `from`, so concurrent actors cannot double-apply a transition.
    /// Returns the updated campaign, or None if the guard lost the race.
    pub async fn transition(
        &self,
        id: Uuid,
        from: CampaignStatus,
        to: CampaignStatus,
    ) -> Result<Option<Campaign>, sqlx::Error> {
        let started_at = if to == CampaignStatus::Sending {
            Some(Utc::now())
        } else {
            None
        };

        let completed_at = if to.is_terminal() { Some(Utc::now()) } else { None };

        sqlx::query_as::<_, Campaign>(
            r#"
            UPDATE campaigns SET
                status = $3,
                started_at = COALESCE($4, started_at),
                completed_at = COALESCE($5, completed_at),
                updated_at = NOW()
            WHERE id = $1 AND status = $2
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(from.to_string())
        .bind(to.to_string())
        .bind(started_at)
        .bind(completed_at)
        .fetch_optional(&self.pool)
        .await
    }

    /// Mark a campaign failed with an error message, from any active status.
    pub async fn mark_failed(&self, id: Uuid, error: &str) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE campaigns SET
                status = 'failed',
                error_message = $2,
                completed_at = NOW(),
                updated_at = NOW()
            WHERE id = $1 AND status IN ('queued', 'sending', 'paused')
            "#,
        )
        .bind(id)
        .bind(error)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Record the batch plan computed at queue time
    pub async fn set_batch_plan(
        &self,
        id: Uuid,
        total_recipients: i32,
        total_batches: i32,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE campaigns SET
                total_recipients = $2,
                total_batches = $3,
                current_batch = 0,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(total_recipients)
        .bind(total_batches)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Advance the progress marker after a batch finishes.
    /// GREATEST keeps it monotonic when batches complete out of order.
    pub async fn advance_batch(&self, id: Uuid, batch_no: i32) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE campaigns SET
                current_batch = GREATEST(current_batch, $2),
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(batch_no)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Atomically increment send outcome counters
    pub async fn add_send_counts(
        &self,
        id: Uuid,
        sent: i32,
        failed: i32,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE campaigns SET
                sent_count = sent_count + $2,
                failed_count = failed_count + $3,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(sent)
        .bind(failed)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Mark a campaign completed once every recipient is in a final state.
    /// Returns true if this call performed the completion.
    pub async fn complete_if_done(&self, id: Uuid) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE campaigns SET
                status = 'completed',
                completed_at = NOW(),
                updated_at = NOW()
            WHERE id = $1
              AND status = 'sending'
              AND NOT EXISTS (
                  SELECT 1 FROM campaign_recipients
                  WHERE campaign_id = $1 AND status IN ('pending', 'queued')
              )
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Get campaigns ready to start (scheduled time has passed)
    pub async fn get_scheduled_ready(&self) -> Result<Vec<Campaign>, sqlx::Error> {
        sqlx::query_as::<_, Campaign>(
            r#"
            SELECT * FROM campaigns
            WHERE status = 'scheduled'
              AND scheduled_at IS NOT NULL
              AND scheduled_at <= NOW()
            ORDER BY scheduled_at ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await
    }

    /// Get campaigns stuck mid-dispatch, for restart recovery
    pub async fn get_in_flight(&self) -> Result<Vec<Campaign>, sqlx::Error> {
        sqlx::query_as::<_, Campaign>(
            "SELECT * FROM campaigns WHERE status IN ('queued', 'sending') ORDER BY created_at ASC",
        )
        .fetch_all(&self.pool)
        .await
    }

    /// Count campaigns by organization
    pub async fn count_by_org(
        &self,
        org_id: OrgId,
        status: Option<CampaignStatus>,
    ) -> Result<i64, sqlx::Error> {
        let count: (i64,) = if let Some(status) = status {
            sqlx::query_as("SELECT COUNT(*) FROM campaigns WHERE org_id = $1 AND status = $2")
                .bind(org_id)
                .bind(status.to_string())
                .fetch_one(&self.pool)
                .await?
        } else {
            sqlx::query_as("SELECT COUNT(*) FROM campaigns WHERE org_id = $1")
                .bind(org_id)
                .fetch_one(&self.pool)
                .await?
        };
        Ok(count.0)
    }

    /// Delete a campaign (drafts only)
    pub async fn delete(&self, id: Uuid, org_id: OrgId) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "DELETE FROM campaigns WHERE id = $1 AND org_id = $2 AND status = 'draft'",
        )
        .bind(id)
        .bind(org_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }
}
