//! Delivery-event processor
//!
//! Applies provider callbacks and tracking hits to messages, campaigns,
//! and contacts. Callbacks arrive at-least-once, so every status flip is
//! a guarded update and the audit event plus counter increments commit
//! in the same transaction as the flip they belong to.

use anyhow::Result;
use mailsurge_storage::db::DatabasePool;
use mailsurge_storage::models::Message;
use sqlx::{PgPool, Postgres, Transaction};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::payload::{DeliveryNotification, NotificationKind};

/// Result of handling an unsubscribe request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnsubscribeOutcome {
    /// Token consumed, contact unsubscribed
    Confirmed,
    /// Token was already used; the contact is out, nothing to redo
    AlreadyUnsubscribed,
    /// Token does not exist
    InvalidToken,
}

/// Delivery-event processor
#[derive(Clone)]
pub struct EventProcessor {
    pool: PgPool,
}

impl EventProcessor {
    /// Create a new event processor
    pub fn new(db_pool: &DatabasePool) -> Self {
        Self {
            pool: db_pool.pool().clone(),
        }
    }

    /// Apply one provider notification
    pub async fn process_notification(&self, notification: &DeliveryNotification) -> Result<()> {
        let message = sqlx::query_as::<_, Message>(
            "SELECT * FROM messages WHERE provider_message_id = $1",
        )
        .bind(&notification.provider_message_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(message) = message else {
            // Message not known here: another system, or a test send
            warn!(
                provider_message_id = %notification.provider_message_id,
                kind = notification.kind.as_str(),
                "Notification for unknown message, ignoring"
            );
            return Ok(());
        };

        match notification.kind {
            NotificationKind::Delivery => self.apply_delivery(&message, notification).await,
            NotificationKind::Bounce => self.apply_bounce(&message, notification).await,
            NotificationKind::Complaint => self.apply_complaint(&message, notification).await,
            NotificationKind::Send => self.apply_send(&message, notification).await,
        }
    }

    async fn apply_delivery(
        &self,
        message: &Message,
        notification: &DeliveryNotification,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query(
            r#"
            UPDATE messages SET status = 'delivered', delivered_at = NOW()
            WHERE id = $1 AND status = 'sent'
            "#,
        )
        .bind(message.id)
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 0 {
            // Redelivered callback or out-of-order arrival
            debug!(message_id = %message.id, "Delivery already applied, skipping");
            return Ok(());
        }

        if let Some(campaign_id) = message.campaign_id {
            bump_campaign(&mut tx, campaign_id, "delivered_count = delivered_count + 1").await?;
        }

        append_event(&mut tx, message.id, "delivery", None, notification).await?;
        tx.commit().await?;

        debug!(message_id = %message.id, "Message delivered");
        Ok(())
    }

    async fn apply_bounce(
        &self,
        message: &Message,
        notification: &DeliveryNotification,
    ) -> Result<()> {
        let bounce_class = if notification.is_hard_bounce() {
            "hard"
        } else {
            "soft"
        };

        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query(
            r#"
            UPDATE messages SET
                status = 'bounced',
                bounce_type = $2,
                bounced_at = NOW()
            WHERE id = $1 AND status IN ('sent', 'delivered')
            "#,
        )
        .bind(message.id)
        .bind(bounce_class)
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 0 {
            debug!(message_id = %message.id, "Bounce already applied, skipping");
            return Ok(());
        }

        if let Some(campaign_id) = message.campaign_id {
            // A bounce is a delivery failure too, so both counters move
            bump_campaign(
                &mut tx,
                campaign_id,
                "bounced_count = bounced_count + 1, failed_count = failed_count + 1",
            )
            .await?;
        }

        if let Some(contact_id) = message.contact_id {
            sqlx::query(
                r#"
                UPDATE contacts SET
                    bounce_count = bounce_count + 1,
                    bounce_type = $2,
                    last_bounce_at = NOW(),
                    updated_at = NOW()
                WHERE id = $1
                "#,
            )
            .bind(contact_id)
            .bind(bounce_class)
            .execute(&mut *tx)
            .await?;

            // Hard bounces take the address out of circulation
            if bounce_class == "hard" {
                sqlx::query(
                    r#"
                    UPDATE contacts SET status = 'bounced', updated_at = NOW()
                    WHERE id = $1 AND status = 'subscribed'
                    "#,
                )
                .bind(contact_id)
                .execute(&mut *tx)
                .await?;
            }
        }

        append_event(
            &mut tx,
            message.id,
            "bounce",
            notification.bounce_type.as_deref(),
            notification,
        )
        .await?;
        tx.commit().await?;

        info!(
            message_id = %message.id,
            bounce_class,
            "Message bounced"
        );
        Ok(())
    }

    async fn apply_complaint(
        &self,
        message: &Message,
        notification: &DeliveryNotification,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query(
            r#"
            UPDATE messages SET status = 'complained'
            WHERE id = $1 AND status IN ('sent', 'delivered')
            "#,
        )
        .bind(message.id)
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 0 {
            debug!(message_id = %message.id, "Complaint already applied, skipping");
            return Ok(());
        }

        if let Some(campaign_id) = message.campaign_id {
            bump_campaign(&mut tx, campaign_id, "complained_count = complained_count + 1").await?;
        }

        // A complaint means stop mailing this contact entirely. It
        // overrides whatever status the contact holds, and doubles as
        // an unsubscribe.
        if let Some(contact_id) = message.contact_id {
            sqlx::query(
                r#"
                UPDATE contacts SET
                    status = 'complained',
                    unsubscribed_at = NOW(),
                    updated_at = NOW()
                WHERE id = $1
                "#,
            )
            .bind(contact_id)
            .execute(&mut *tx)
            .await?;
        }

        append_event(
            &mut tx,
            message.id,
            "complaint",
            notification.complaint_type.as_deref(),
            notification,
        )
        .await?;
        tx.commit().await?;

        info!(message_id = %message.id, "Complaint recorded");
        Ok(())
    }

    /// Send confirmations only land in the audit log; the sent status
    /// was already recorded at dispatch time. Skips the append when the
    /// log already holds one, so redeliveries stay quiet.
    async fn apply_send(
        &self,
        message: &Message,
        notification: &DeliveryNotification,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        let exists: (bool,) = sqlx::query_as(
            r#"
            SELECT EXISTS(
                SELECT 1 FROM message_events
                WHERE message_id = $1 AND event_type = 'send'
            )
            "#,
        )
        .bind(message.id)
        .fetch_one(&mut *tx)
        .await?;

        if !exists.0 {
            append_event(&mut tx, message.id, "send", None, notification).await?;
        }

        tx.commit().await?;
        Ok(())
    }

    /// Record an open from the tracking pixel. Returns false when the
    /// tracking ID is unknown.
    pub async fn record_open(
        &self,
        tracking_id: &str,
        user_agent: Option<&str>,
        ip_address: Option<&str>,
    ) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        // Row lock so first-open detection and the counter bumps are
        // atomic against a concurrent hit on the same pixel
        let message = sqlx::query_as::<_, Message>(
            "SELECT * FROM messages WHERE tracking_id = $1 FOR UPDATE",
        )
        .bind(tracking_id)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(message) = message else {
            return Ok(false);
        };

        let first_open = message.opened_at.is_none();

        sqlx::query(
            r#"
            UPDATE messages SET
                open_count = open_count + 1,
                opened_at = COALESCE(opened_at, NOW())
            WHERE id = $1
            "#,
        )
        .bind(message.id)
        .execute(&mut *tx)
        .await?;

        if let Some(campaign_id) = message.campaign_id {
            let unique = if first_open { 1 } else { 0 };
            sqlx::query(
                r#"
                UPDATE campaigns SET
                    opened_count = opened_count + 1,
                    unique_opens = unique_opens + $2,
                    updated_at = NOW()
                WHERE id = $1
                "#,
            )
            .bind(campaign_id)
            .bind(unique)
            .execute(&mut *tx)
            .await?;
        }

        // The contact's lifetime counter moves on every hit; only the
        // campaign's unique counter is first-gated
        if let Some(contact_id) = message.contact_id {
            sqlx::query(
                r#"
                UPDATE contacts SET
                    total_emails_opened = total_emails_opened + 1,
                    last_opened_at = NOW(),
                    updated_at = NOW()
                WHERE id = $1
                "#,
            )
            .bind(contact_id)
            .execute(&mut *tx)
            .await?;
        }

        insert_tracking_event(&mut tx, message.id, "open", None, user_agent, ip_address).await?;
        tx.commit().await?;

        debug!(message_id = %message.id, first_open, "Open recorded");
        Ok(true)
    }

    /// Record a click on a rewritten link. Returns false when the
    /// tracking ID is unknown.
    pub async fn record_click(
        &self,
        tracking_id: &str,
        link_url: &str,
        user_agent: Option<&str>,
        ip_address: Option<&str>,
    ) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        let message = sqlx::query_as::<_, Message>(
            "SELECT * FROM messages WHERE tracking_id = $1 FOR UPDATE",
        )
        .bind(tracking_id)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(message) = message else {
            return Ok(false);
        };

        let first_click = message.clicked_at.is_none();

        sqlx::query(
            r#"
            UPDATE messages SET
                click_count = click_count + 1,
                clicked_at = COALESCE(clicked_at, NOW()),
                opened_at = COALESCE(opened_at, NOW())
            WHERE id = $1
            "#,
        )
        .bind(message.id)
        .execute(&mut *tx)
        .await?;

        if let Some(campaign_id) = message.campaign_id {
            let unique = if first_click { 1 } else { 0 };
            sqlx::query(
                r#"
                UPDATE campaigns SET
                    clicked_count = clicked_count + 1,
                    unique_clicks = unique_clicks + $2,
                    updated_at = NOW()
                WHERE id = $1
                "#,
            )
            .bind(campaign_id)
            .bind(unique)
            .execute(&mut *tx)
            .await?;
        }

        if let Some(contact_id) = message.contact_id {
            sqlx::query(
                r#"
                UPDATE contacts SET
                    total_emails_clicked = total_emails_clicked + 1,
                    last_clicked_at = NOW(),
                    updated_at = NOW()
                WHERE id = $1
                "#,
            )
            .bind(contact_id)
            .execute(&mut *tx)
            .await?;
        }

        insert_tracking_event(&mut tx, message.id, "click", Some(link_url), user_agent, ip_address)
            .await?;
        tx.commit().await?;

        debug!(message_id = %message.id, first_click, "Click recorded");
        Ok(true)
    }

    /// Consume an unsubscribe token and take the contact out.
    /// The token is single-use; a repeated request reports soft success.
    pub async fn process_unsubscribe(
        &self,
        token: &str,
        reason: Option<&str>,
    ) -> Result<UnsubscribeOutcome> {
        let mut tx = self.pool.begin().await?;

        let consumed: Option<(Uuid, Option<Uuid>)> = sqlx::query_as(
            r#"
            UPDATE unsubscribe_tokens SET used_at = NOW(), reason = $2
            WHERE token = $1 AND used_at IS NULL
            RETURNING contact_id, campaign_id
            "#,
        )
        .bind(token)
        .bind(reason)
        .fetch_optional(&mut *tx)
        .await?;

        let Some((contact_id, campaign_id)) = consumed else {
            tx.rollback().await?;

            let exists: (bool,) = sqlx::query_as(
                "SELECT EXISTS(SELECT 1 FROM unsubscribe_tokens WHERE token = $1)",
            )
            .bind(token)
            .fetch_one(&self.pool)
            .await?;

            return Ok(if exists.0 {
                UnsubscribeOutcome::AlreadyUnsubscribed
            } else {
                UnsubscribeOutcome::InvalidToken
            });
        };

        sqlx::query(
            r#"
            UPDATE contacts SET
                status = 'unsubscribed',
                unsubscribed_at = NOW(),
                unsubscribe_reason = $2,
                updated_at = NOW()
            WHERE id = $1 AND status != 'unsubscribed'
            "#,
        )
        .bind(contact_id)
        .bind(reason)
        .execute(&mut *tx)
        .await?;

        if let Some(campaign_id) = campaign_id {
            bump_campaign(
                &mut tx,
                campaign_id,
                "unsubscribed_count = unsubscribed_count + 1",
            )
            .await?;

            // Log the event against the message that carried the link
            let message_id: Option<(Uuid,)> = sqlx::query_as(
                r#"
                SELECT id FROM messages
                WHERE campaign_id = $1 AND contact_id = $2
                ORDER BY created_at DESC
                LIMIT 1
                "#,
            )
            .bind(campaign_id)
            .bind(contact_id)
            .fetch_optional(&mut *tx)
            .await?;

            if let Some((message_id,)) = message_id {
                insert_tracking_event(&mut tx, message_id, "unsubscribe", None, None, None)
                    .await?;
            }
        }

        tx.commit().await?;

        info!(%contact_id, "Contact unsubscribed");
        Ok(UnsubscribeOutcome::Confirmed)
    }
}

async fn bump_campaign(
    tx: &mut Transaction<'_, Postgres>,
    campaign_id: Uuid,
    increment: &str,
) -> Result<()> {
    let sql = format!(
        "UPDATE campaigns SET {}, updated_at = NOW() WHERE id = $1",
        increment
    );
    sqlx::query(&sql).bind(campaign_id).execute(&mut **tx).await?;
    Ok(())
}

async fn append_event(
    tx: &mut Transaction<'_, Postgres>,
    message_id: Uuid,
    event_type: &str,
    event_subtype: Option<&str>,
    notification: &DeliveryNotification,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO message_events (id, message_id, event_type, event_subtype, payload)
        VALUES ($1, $2, $3, $4, $5)
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(message_id)
    .bind(event_type)
    .bind(event_subtype)
    .bind(&notification.payload)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

async fn insert_tracking_event(
    tx: &mut Transaction<'_, Postgres>,
    message_id: Uuid,
    event_type: &str,
    link_url: Option<&str>,
    user_agent: Option<&str>,
    ip_address: Option<&str>,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO message_events (id, message_id, event_type, link_url, user_agent, ip_address)
        VALUES ($1, $2, $3, $4, $5, $6)
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(message_id)
    .bind(event_type)
    .bind(link_url)
    .bind(user_agent)
    .bind(ip_address)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use sqlx::PgPool;

    async fn seed_campaign(pool: &PgPool, org_id: Uuid) -> Uuid {
        let id = Uuid::new_v4();
        sqlx::query(
            r#"
            INSERT INTO campaigns
                (id, org_id, name, subject, from_name, from_email, html_body, status)
            VALUES ($1, $2, 'Launch', 'Hello', 'Acme', 'news@acme.test', '<p>Hi</p>', 'sending')
            "#,
        )
        .bind(id)
        .bind(org_id)
        .execute(pool)
        .await
        .unwrap();
        id
    }

    async fn seed_contact(pool: &PgPool, org_id: Uuid, email: &str, status: &str) -> Uuid {
        let id = Uuid::new_v4();
        sqlx::query("INSERT INTO contacts (id, org_id, email, status) VALUES ($1, $2, $3, $4)")
            .bind(id)
            .bind(org_id)
            .bind(email)
            .bind(status)
            .execute(pool)
            .await
            .unwrap();
        id
    }

    async fn seed_sent_message(
        pool: &PgPool,
        campaign_id: Uuid,
        contact_id: Uuid,
        tracking_id: &str,
        provider_message_id: &str,
    ) -> Uuid {
        let id = Uuid::new_v4();
        sqlx::query(
            r#"
            INSERT INTO messages
                (id, campaign_id, contact_id, recipient_email, subject, html_body,
                 tracking_id, provider_message_id, status, sent_at)
            VALUES ($1, $2, $3, 'jane@example.com', 'Hello', '<p>Hi</p>', $4, $5, 'sent', NOW())
            "#,
        )
        .bind(id)
        .bind(campaign_id)
        .bind(contact_id)
        .bind(tracking_id)
        .bind(provider_message_id)
        .execute(pool)
        .await
        .unwrap();
        id
    }

    fn notification(kind: NotificationKind, provider_message_id: &str) -> DeliveryNotification {
        DeliveryNotification {
            kind,
            provider_message_id: provider_message_id.to_string(),
            bounce_type: None,
            bounce_subtype: None,
            complaint_type: None,
            payload: serde_json::json!({"mail": {"messageId": provider_message_id}}),
        }
    }

    async fn campaign_counters(pool: &PgPool, campaign_id: Uuid) -> (i32, i32, i32, i32) {
        sqlx::query_as(
            r#"
            SELECT bounced_count, failed_count, complained_count, unsubscribed_count
            FROM campaigns WHERE id = $1
            "#,
        )
        .bind(campaign_id)
        .fetch_one(pool)
        .await
        .unwrap()
    }

    #[sqlx::test(migrations = "../mailsurge-storage/migrations")]
    async fn test_bounce_redelivery_applies_once(pool: PgPool) {
        let org_id = Uuid::new_v4();
        let campaign_id = seed_campaign(&pool, org_id).await;
        let contact_id = seed_contact(&pool, org_id, "jane@example.com", "subscribed").await;
        seed_sent_message(&pool, campaign_id, contact_id, "trk-b", "prov-b").await;

        let processor = EventProcessor { pool: pool.clone() };
        let mut bounce = notification(NotificationKind::Bounce, "prov-b");
        bounce.bounce_type = Some("Permanent".to_string());

        processor.process_notification(&bounce).await.unwrap();
        // The provider delivers at least once, so the same callback
        // can arrive again
        processor.process_notification(&bounce).await.unwrap();

        let (bounced, failed, _, _) = campaign_counters(&pool, campaign_id).await;
        assert_eq!((bounced, failed), (1, 1));

        let (contact_status, bounce_count): (String, i32) =
            sqlx::query_as("SELECT status, bounce_count FROM contacts WHERE id = $1")
                .bind(contact_id)
                .fetch_one(&pool)
                .await
                .unwrap();
        assert_eq!(contact_status, "bounced");
        assert_eq!(bounce_count, 1);

        let (events,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM message_events WHERE event_type = 'bounce'",
        )
        .fetch_one(&pool)
        .await
        .unwrap();
        assert_eq!(events, 1);
    }

    #[sqlx::test(migrations = "../mailsurge-storage/migrations")]
    async fn test_complaint_suppresses_contact_in_any_status(pool: PgPool) {
        let org_id = Uuid::new_v4();
        let campaign_id = seed_campaign(&pool, org_id).await;
        // Already unsubscribed; the complaint still has to stick
        let contact_id = seed_contact(&pool, org_id, "jane@example.com", "unsubscribed").await;
        seed_sent_message(&pool, campaign_id, contact_id, "trk-c", "prov-c").await;

        let processor = EventProcessor { pool: pool.clone() };
        processor
            .process_notification(&notification(NotificationKind::Complaint, "prov-c"))
            .await
            .unwrap();

        let (status, unsubscribed_at): (String, Option<chrono::DateTime<chrono::Utc>>) =
            sqlx::query_as("SELECT status, unsubscribed_at FROM contacts WHERE id = $1")
                .bind(contact_id)
                .fetch_one(&pool)
                .await
                .unwrap();
        assert_eq!(status, "complained");
        assert!(unsubscribed_at.is_some());

        let (_, _, complained, _) = campaign_counters(&pool, campaign_id).await;
        assert_eq!(complained, 1);
    }

    #[sqlx::test(migrations = "../mailsurge-storage/migrations")]
    async fn test_repeat_opens_move_lifetime_counter(pool: PgPool) {
        let org_id = Uuid::new_v4();
        let campaign_id = seed_campaign(&pool, org_id).await;
        let contact_id = seed_contact(&pool, org_id, "jane@example.com", "subscribed").await;
        seed_sent_message(&pool, campaign_id, contact_id, "trk-o", "prov-o").await;

        let processor = EventProcessor { pool: pool.clone() };
        assert!(processor.record_open("trk-o", None, None).await.unwrap());
        assert!(processor.record_open("trk-o", None, None).await.unwrap());
        assert!(!processor.record_open("trk-missing", None, None).await.unwrap());

        let (opened, unique): (i32, i32) =
            sqlx::query_as("SELECT opened_count, unique_opens FROM campaigns WHERE id = $1")
                .bind(campaign_id)
                .fetch_one(&pool)
                .await
                .unwrap();
        assert_eq!((opened, unique), (2, 1));

        let (total_opened,): (i32,) =
            sqlx::query_as("SELECT total_emails_opened FROM contacts WHERE id = $1")
                .bind(contact_id)
                .fetch_one(&pool)
                .await
                .unwrap();
        assert_eq!(total_opened, 2);
    }

    #[sqlx::test(migrations = "../mailsurge-storage/migrations")]
    async fn test_repeat_clicks_move_lifetime_counter(pool: PgPool) {
        let org_id = Uuid::new_v4();
        let campaign_id = seed_campaign(&pool, org_id).await;
        let contact_id = seed_contact(&pool, org_id, "jane@example.com", "subscribed").await;
        seed_sent_message(&pool, campaign_id, contact_id, "trk-k", "prov-k").await;

        let processor = EventProcessor { pool: pool.clone() };
        let url = "https://acme.test/pricing";
        assert!(processor.record_click("trk-k", url, None, None).await.unwrap());
        assert!(processor.record_click("trk-k", url, None, None).await.unwrap());

        let (clicked, unique): (i32, i32) =
            sqlx::query_as("SELECT clicked_count, unique_clicks FROM campaigns WHERE id = $1")
                .bind(campaign_id)
                .fetch_one(&pool)
                .await
                .unwrap();
        assert_eq!((clicked, unique), (2, 1));

        let (total_clicked,): (i32,) =
            sqlx::query_as("SELECT total_emails_clicked FROM contacts WHERE id = $1")
                .bind(contact_id)
                .fetch_one(&pool)
                .await
                .unwrap();
        assert_eq!(total_clicked, 2);
    }

    #[sqlx::test(migrations = "../mailsurge-storage/migrations")]
    async fn test_unsubscribe_token_is_single_use(pool: PgPool) {
        let org_id = Uuid::new_v4();
        let campaign_id = seed_campaign(&pool, org_id).await;
        let contact_id = seed_contact(&pool, org_id, "jane@example.com", "subscribed").await;

        sqlx::query(
            "INSERT INTO unsubscribe_tokens (token, contact_id, campaign_id) VALUES ($1, $2, $3)",
        )
        .bind("tok-once")
        .bind(contact_id)
        .bind(campaign_id)
        .execute(&pool)
        .await
        .unwrap();

        let processor = EventProcessor { pool: pool.clone() };

        let first = processor
            .process_unsubscribe("tok-once", Some("too many emails"))
            .await
            .unwrap();
        assert_eq!(first, UnsubscribeOutcome::Confirmed);

        let second = processor.process_unsubscribe("tok-once", None).await.unwrap();
        assert_eq!(second, UnsubscribeOutcome::AlreadyUnsubscribed);

        let missing = processor.process_unsubscribe("tok-nope", None).await.unwrap();
        assert_eq!(missing, UnsubscribeOutcome::InvalidToken);

        let (_, _, _, unsubscribed) = campaign_counters(&pool, campaign_id).await;
        assert_eq!(unsubscribed, 1);

        let (status,): (String,) =
            sqlx::query_as("SELECT status FROM contacts WHERE id = $1")
                .bind(contact_id)
                .fetch_one(&pool)
                .await
                .unwrap();
        assert_eq!(status, "unsubscribed");
    }
}
