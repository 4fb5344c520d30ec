//! Campaign recipient repository

use mailsurge_common::types::{CampaignId, ContactId, MessageId, RecipientId};
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::CampaignRecipient;

/// Campaign recipient repository
#[derive(Clone)]
pub struct RecipientRepository {
    pool: PgPool,
}

impl RecipientRepository {
    /// Create a new recipient repository
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Snapshot subscribed contacts of the organization into the
    /// campaign's recipient set. Duplicate contacts are ignored, so the
    /// operation is safe to re-run. Returns the number of rows inserted.
    pub async fn populate_from_contacts(
        &self,
        campaign_id: CampaignId,
    ) -> Result<i64, sqlx::Error> {
        let result = sqlx::query(
            r#"
            INSERT INTO campaign_recipients (id, campaign_id, contact_id)
            SELECT gen_random_uuid(), $1, c.id
            FROM contacts c
            JOIN campaigns cp ON cp.org_id = c.org_id
            WHERE cp.id = $1 AND c.status = 'subscribed'
            ON CONFLICT (campaign_id, contact_id) DO NOTHING
            "#,
        )
        .bind(campaign_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() as i64)
    }

    /// Add explicit contacts as recipients. Returns rows inserted.
    pub async fn add_contacts(
        &self,
        campaign_id: CampaignId,
        contact_ids: &[ContactId],
    ) -> Result<i64, sqlx::Error> {
        let mut inserted = 0i64;
        for contact_id in contact_ids {
            let result = sqlx::query(
                r#"
                INSERT INTO campaign_recipients (id, campaign_id, contact_id)
                VALUES ($1, $2, $3)
                ON CONFLICT (campaign_id, contact_id) DO NOTHING
                "#,
            )
            .bind(Uuid::new_v4())
            .bind(campaign_id)
            .bind(contact_id)
            .execute(&self.pool)
            .await?;
            inserted += result.rows_affected() as i64;
        }
        Ok(inserted)
    }

    /// Partition all pending recipients into numbered batches of
    /// `batch_size`. Assignment is deterministic (ordered by creation)
    /// and happens once, at queue time. Returns (recipient count,
    /// batch count).
    pub async fn assign_batches(
        &self,
        campaign_id: CampaignId,
        batch_size: i32,
    ) -> Result<(i64, i32), sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE campaign_recipients cr SET
                batch_no = numbered.batch_no,
                updated_at = NOW()
            FROM (
                SELECT id,
                       ((ROW_NUMBER() OVER (ORDER BY created_at, id) - 1) / $2)::INT + 1
                           AS batch_no
                FROM campaign_recipients
                WHERE campaign_id = $1 AND status = 'pending'
            ) numbered
            WHERE cr.id = numbered.id
            "#,
        )
        .bind(campaign_id)
        .bind(batch_size as i64)
        .execute(&self.pool)
        .await?;

        let total = result.rows_affected() as i64;
        let batches: (Option<i32>,) = sqlx::query_as(
            "SELECT MAX(batch_no) FROM campaign_recipients WHERE campaign_id = $1",
        )
        .bind(campaign_id)
        .fetch_one(&self.pool)
        .await?;

        Ok((total, batches.0.unwrap_or(0)))
    }

    /// Atomically claim the pending recipients of one batch, moving them
    /// to queued. SKIP LOCKED makes concurrent claims of the same batch
    /// disjoint, and the status guard means a second pass over an
    /// already-claimed batch returns nothing.
    pub async fn claim_batch(
        &self,
        campaign_id: CampaignId,
        batch_no: i32,
    ) -> Result<Vec<CampaignRecipient>, sqlx::Error> {
        sqlx::query_as::<_, CampaignRecipient>(
            r#"
            UPDATE campaign_recipients SET
                status = 'queued',
                queued_at = NOW(),
                updated_at = NOW()
            WHERE id IN (
                SELECT id FROM campaign_recipients
                WHERE campaign_id = $1 AND batch_no = $2 AND status = 'pending'
                ORDER BY created_at, id
                FOR UPDATE SKIP LOCKED
            )
            RETURNING *
            "#,
        )
        .bind(campaign_id)
        .bind(batch_no)
        .fetch_all(&self.pool)
        .await
    }

    /// Mark a recipient sent, linking the message it produced
    pub async fn mark_sent(
        &self,
        id: RecipientId,
        message_id: MessageId,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE campaign_recipients SET
                status = 'sent',
                message_id = $2,
                sent_at = NOW(),
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(message_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Mark a recipient failed with the error that stopped it
    pub async fn mark_failed(&self, id: RecipientId, error: &str) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE campaign_recipients SET
                status = 'failed',
                error_message = $2,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(error)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Mark a recipient skipped (unsubscribed or suppressed since queue time)
    pub async fn mark_skipped(&self, id: RecipientId, reason: &str) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE campaign_recipients SET
                status = 'skipped',
                error_message = $2,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(reason)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Return a batch's unsent queued recipients to pending for another
    /// attempt, bumping retry_count. Returns how many went back.
    pub async fn requeue_batch(
        &self,
        campaign_id: CampaignId,
        batch_no: i32,
    ) -> Result<i64, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE campaign_recipients SET
                status = 'pending',
                retry_count = retry_count + 1,
                queued_at = NULL,
                updated_at = NOW()
            WHERE campaign_id = $1 AND batch_no = $2 AND status = 'queued'
            "#,
        )
        .bind(campaign_id)
        .bind(batch_no)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() as i64)
    }

    /// Recipients of a batch that never reached a final state, left
    /// behind by a crash mid-dispatch. Abandons them as failed.
    pub async fn fail_stuck_in_batch(
        &self,
        campaign_id: CampaignId,
        batch_no: i32,
        error: &str,
    ) -> Result<i64, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE campaign_recipients SET
                status = 'failed',
                error_message = $3,
                updated_at = NOW()
            WHERE campaign_id = $1 AND batch_no = $2 AND status IN ('pending', 'queued')
            "#,
        )
        .bind(campaign_id)
        .bind(batch_no)
        .bind(error)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() as i64)
    }

    /// Close off every recipient that has not gone out yet. Used when a
    /// campaign is cancelled. Returns how many were skipped.
    pub async fn skip_remaining(
        &self,
        campaign_id: CampaignId,
        reason: &str,
    ) -> Result<i64, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE campaign_recipients SET
                status = 'skipped',
                error_message = $2,
                updated_at = NOW()
            WHERE campaign_id = $1 AND status IN ('pending', 'queued')
            "#,
        )
        .bind(campaign_id)
        .bind(reason)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() as i64)
    }

    /// List recipients of a campaign, newest first
    pub async fn list_by_campaign(
        &self,
        campaign_id: CampaignId,
        status: Option<&str>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<CampaignRecipient>, sqlx::Error> {
        if let Some(status) = status {
            sqlx::query_as::<_, CampaignRecipient>(
                r#"
                SELECT * FROM campaign_recipients
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
            sqlx::query_as::<_, CampaignRecipient>(
                r#"
                SELECT * FROM campaign_recipients
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

    /// Count recipients in a campaign, optionally by status
    pub async fn count(
        &self,
        campaign_id: CampaignId,
        status: Option<&str>,
    ) -> Result<i64, sqlx::Error> {
        let count: (i64,) = if let Some(status) = status {
            sqlx::query_as(
                "SELECT COUNT(*) FROM campaign_recipients WHERE campaign_id = $1 AND status = $2",
            )
            .bind(campaign_id)
            .bind(status)
            .fetch_one(&self.pool)
            .await?
        } else {
            sqlx::query_as("SELECT COUNT(*) FROM campaign_recipients WHERE campaign_id = $1")
                .bind(campaign_id)
                .fetch_one(&self.pool)
                .await?
        };
        Ok(count.0)
    }

    /// Batch numbers that still have pending recipients, in order
    pub async fn pending_batches(
        &self,
        campaign_id: CampaignId,
    ) -> Result<Vec<i32>, sqlx::Error> {
        let rows: Vec<(i32,)> = sqlx::query_as(
            r#"
            SELECT DISTINCT batch_no FROM campaign_recipients
            WHERE campaign_id = $1 AND status = 'pending' AND batch_no IS NOT NULL
            ORDER BY batch_no
            "#,
        )
        .bind(campaign_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|r| r.0).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    async fn seed_campaign(pool: &PgPool, org_id: Uuid) -> Uuid {
        let id = Uuid::new_v4();
        sqlx::query(
            r#"
            INSERT INTO campaigns
                (id, org_id, name, subject, from_name, from_email, html_body, status)
            VALUES ($1, $2, 'Launch', 'Hello', 'Acme', 'news@acme.test', '<p>Hi</p>', 'queued')
            "#,
        )
        .bind(id)
        .bind(org_id)
        .execute(pool)
        .await
        .unwrap();
        id
    }

    async fn seed_contact(pool: &PgPool, org_id: Uuid, email: &str) -> Uuid {
        let id = Uuid::new_v4();
        sqlx::query("INSERT INTO contacts (id, org_id, email) VALUES ($1, $2, $3)")
            .bind(id)
            .bind(org_id)
            .bind(email)
            .execute(pool)
            .await
            .unwrap();
        id
    }

    #[sqlx::test]
    async fn test_claim_batch_is_single_shot(pool: PgPool) {
        let org_id = Uuid::new_v4();
        let campaign_id = seed_campaign(&pool, org_id).await;
        let repo = RecipientRepository::new(pool.clone());

        let mut contact_ids = Vec::new();
        for i in 0..3 {
            contact_ids.push(seed_contact(&pool, org_id, &format!("c{}@example.com", i)).await);
        }
        assert_eq!(repo.add_contacts(campaign_id, &contact_ids).await.unwrap(), 3);

        let (total, batches) = repo.assign_batches(campaign_id, 2).await.unwrap();
        assert_eq!(total, 3);
        assert_eq!(batches, 2);

        let first = repo.claim_batch(campaign_id, 1).await.unwrap();
        assert_eq!(first.len(), 2);

        // A unit delivered twice claims nothing the second time
        assert!(repo.claim_batch(campaign_id, 1).await.unwrap().is_empty());
        assert_eq!(repo.claim_batch(campaign_id, 2).await.unwrap().len(), 1);
    }

    #[sqlx::test]
    async fn test_requeue_returns_claims_to_pending(pool: PgPool) {
        let org_id = Uuid::new_v4();
        let campaign_id = seed_campaign(&pool, org_id).await;
        let repo = RecipientRepository::new(pool.clone());

        let contact_id = seed_contact(&pool, org_id, "solo@example.com").await;
        repo.add_contacts(campaign_id, &[contact_id]).await.unwrap();
        repo.assign_batches(campaign_id, 50).await.unwrap();

        let claimed = repo.claim_batch(campaign_id, 1).await.unwrap();
        assert_eq!(claimed.len(), 1);

        assert_eq!(repo.requeue_batch(campaign_id, 1).await.unwrap(), 1);

        let reclaimed = repo.claim_batch(campaign_id, 1).await.unwrap();
        assert_eq!(reclaimed.len(), 1);
        assert_eq!(reclaimed[0].id, claimed[0].id);
        assert_eq!(reclaimed[0].retry_count, 1);
    }
}
