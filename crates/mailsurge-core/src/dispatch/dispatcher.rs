//! Batch dispatcher - works through queued campaign batches
//!
//! One unit of work is a (campaign, batch) pair. Units arrive over a
//! channel, run on a semaphore-bounded task set, and share a single
//! account-wide rate limiter. Claiming recipients is guarded in SQL, so
//! a unit delivered twice sends nothing twice.

use anyhow::{anyhow, Result};
use mailsurge_common::config::{DispatchConfig, TrackingConfig};
use mailsurge_common::types::{
    generate_tracking_id, generate_unsubscribe_token, BatchUnit,
};
use mailsurge_storage::db::DatabasePool;
use mailsurge_storage::models::{Campaign, CampaignRecipient, CampaignStatus, Contact, CreateMessage};
use mailsurge_storage::repository::{
    CampaignRepository, ContactRepository, EventRepository, MessageRepository,
    RecipientRepository, UnsubscribeTokenRepository,
};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, Semaphore};
use tokio::time::{sleep, Duration};
use tracing::{debug, error, info, warn};

use super::rate_limiter::SendRateLimiter;
use super::render::ContentRenderer;
use crate::transport::{OutboundEmail, SendOutcome, TransportGateway};

/// How a unit ended
enum UnitOutcome {
    /// Every claimed recipient reached a final state
    Completed,
    /// Stopped early on pause, cancel, or campaign disappearance
    Halted,
}

struct DispatchContext {
    campaign_repo: CampaignRepository,
    recipient_repo: RecipientRepository,
    message_repo: MessageRepository,
    contact_repo: ContactRepository,
    event_repo: EventRepository,
    token_repo: UnsubscribeTokenRepository,
    gateway: Arc<dyn TransportGateway>,
    renderer: ContentRenderer,
    limiter: SendRateLimiter,
    max_unit_attempts: u32,
}

/// Batch dispatcher worker
pub struct BatchDispatcher {
    ctx: Arc<DispatchContext>,
    rx: mpsc::UnboundedReceiver<BatchUnit>,
    concurrency: usize,
}

impl BatchDispatcher {
    /// Create a new dispatcher
    pub fn new(
        db_pool: &DatabasePool,
        gateway: Arc<dyn TransportGateway>,
        dispatch_config: &DispatchConfig,
        tracking_config: &TrackingConfig,
        rx: mpsc::UnboundedReceiver<BatchUnit>,
    ) -> Self {
        let pool = db_pool.pool().clone();
        Self {
            ctx: Arc::new(DispatchContext {
                campaign_repo: CampaignRepository::new(pool.clone()),
                recipient_repo: RecipientRepository::new(pool.clone()),
                message_repo: MessageRepository::new(pool.clone()),
                contact_repo: ContactRepository::new(pool.clone()),
                event_repo: EventRepository::new(pool.clone()),
                token_repo: UnsubscribeTokenRepository::new(pool),
                gateway,
                renderer: ContentRenderer::new(
                    tracking_config.base_url.clone(),
                    tracking_config.sender_name.clone(),
                ),
                limiter: SendRateLimiter::new(dispatch_config.send_rate_per_sec),
                max_unit_attempts: dispatch_config.max_unit_attempts,
            }),
            rx,
            concurrency: dispatch_config.concurrency,
        }
    }

    /// Run the dispatch loop until the channel closes
    pub async fn run(mut self) {
        let semaphore = Arc::new(Semaphore::new(self.concurrency));

        info!(concurrency = self.concurrency, "Batch dispatcher started");

        while let Some(unit) = self.rx.recv().await {
            let permit = match semaphore.clone().acquire_owned().await {
                Ok(p) => p,
                Err(_) => break,
            };
            let ctx = Arc::clone(&self.ctx);

            tokio::spawn(async move {
                process_unit(&ctx, unit).await;
                drop(permit);
            });
        }

        info!("Batch dispatcher stopped");
    }
}

/// Run one unit with retries. Exhausting the attempts fails the whole
/// campaign: a batch that cannot go out means the pipeline is broken,
/// not the recipients.
async fn process_unit(ctx: &DispatchContext, unit: BatchUnit) {
    for attempt in 1..=ctx.max_unit_attempts {
        match run_unit(ctx, &unit).await {
            Ok(UnitOutcome::Completed) => {
                if let Err(e) = finish_unit(ctx, &unit).await {
                    error!(
                        campaign_id = %unit.campaign_id,
                        batch_no = unit.batch_no,
                        "Failed to finalize batch: {}",
                        e
                    );
                }
                return;
            }
            Ok(UnitOutcome::Halted) => {
                debug!(
                    campaign_id = %unit.campaign_id,
                    batch_no = unit.batch_no,
                    "Batch halted"
                );
                return;
            }
            Err(e) => {
                warn!(
                    campaign_id = %unit.campaign_id,
                    batch_no = unit.batch_no,
                    attempt,
                    "Batch attempt failed: {}",
                    e
                );

                // Unsent claims go back to pending for the next attempt
                if let Err(e) = ctx
                    .recipient_repo
                    .requeue_batch(unit.campaign_id, unit.batch_no)
                    .await
                {
                    error!(campaign_id = %unit.campaign_id, "Failed to requeue batch: {}", e);
                }

                if attempt < ctx.max_unit_attempts {
                    sleep(Duration::from_secs(attempt as u64)).await;
                } else {
                    fail_unit(ctx, &unit, &e.to_string()).await;
                }
            }
        }
    }
}

async fn run_unit(ctx: &DispatchContext, unit: &BatchUnit) -> Result<UnitOutcome> {
    let Some(campaign) = ctx.campaign_repo.get(unit.campaign_id).await? else {
        return Ok(UnitOutcome::Halted);
    };

    match campaign.status_enum() {
        Some(CampaignStatus::Queued) => {
            // First unit to arrive flips the campaign to sending;
            // losing the race just means another unit got there first
            ctx.campaign_repo
                .transition(campaign.id, CampaignStatus::Queued, CampaignStatus::Sending)
                .await?;
        }
        Some(CampaignStatus::Sending) => {}
        _ => return Ok(UnitOutcome::Halted),
    }

    let claimed = ctx
        .recipient_repo
        .claim_batch(unit.campaign_id, unit.batch_no)
        .await?;

    if claimed.is_empty() {
        return Ok(UnitOutcome::Completed);
    }

    debug!(
        campaign_id = %unit.campaign_id,
        batch_no = unit.batch_no,
        recipients = claimed.len(),
        "Batch claimed"
    );

    let contact_ids: Vec<_> = claimed.iter().map(|r| r.contact_id).collect();
    let contacts: HashMap<_, _> = ctx
        .contact_repo
        .get_many(&contact_ids)
        .await?
        .into_iter()
        .map(|c| (c.id, c))
        .collect();

    for recipient in &claimed {
        // Pause and cancel take effect between recipients
        let Some(current) = ctx.campaign_repo.get(unit.campaign_id).await? else {
            return Ok(UnitOutcome::Halted);
        };
        match current.status_enum() {
            Some(CampaignStatus::Sending) => {}
            Some(CampaignStatus::Paused) => {
                let returned = ctx
                    .recipient_repo
                    .requeue_batch(unit.campaign_id, unit.batch_no)
                    .await?;
                info!(
                    campaign_id = %unit.campaign_id,
                    batch_no = unit.batch_no,
                    returned,
                    "Batch paused mid-send"
                );
                return Ok(UnitOutcome::Halted);
            }
            _ => return Ok(UnitOutcome::Halted),
        }

        match contacts.get(&recipient.contact_id) {
            Some(contact) if contact.is_subscribed() => {
                send_to_recipient(ctx, &campaign, recipient, contact).await?;
            }
            Some(_) => {
                ctx.recipient_repo
                    .mark_skipped(recipient.id, "Contact not subscribed")
                    .await?;
            }
            None => {
                ctx.recipient_repo
                    .mark_skipped(recipient.id, "Contact no longer exists")
                    .await?;
            }
        }
    }

    Ok(UnitOutcome::Completed)
}

/// Render, persist, and hand off one message
async fn send_to_recipient(
    ctx: &DispatchContext,
    campaign: &Campaign,
    recipient: &CampaignRecipient,
    contact: &Contact,
) -> Result<()> {
    ctx.limiter.acquire().await;

    let tracking_id = generate_tracking_id();
    let unsubscribe_token = generate_unsubscribe_token();
    ctx.token_repo
        .create(&unsubscribe_token, contact.id, Some(campaign.id))
        .await?;

    let subject = ctx.renderer.render_subject(&campaign.subject, contact);
    let html_body =
        ctx.renderer
            .render_html(&campaign.html_body, contact, &tracking_id, &unsubscribe_token);
    let text_body = campaign
        .text_body
        .as_ref()
        .map(|t| ctx.renderer.render_text(t, contact, &unsubscribe_token));

    let message = ctx
        .message_repo
        .create(CreateMessage {
            campaign_id: Some(campaign.id),
            contact_id: Some(contact.id),
            recipient_email: contact.email.clone(),
            recipient_name: contact.full_name.clone(),
            subject: subject.clone(),
            html_body: html_body.clone(),
            text_body: text_body.clone(),
            tracking_id,
        })
        .await?;

    let outbound = OutboundEmail {
        from_name: campaign.from_name.clone(),
        from_email: campaign.from_email.clone(),
        reply_to: campaign.reply_to.clone(),
        to_email: contact.email.clone(),
        to_name: contact.full_name.clone(),
        subject,
        html_body,
        text_body,
    };

    match ctx.gateway.send(&outbound).await {
        SendOutcome::Accepted {
            provider_message_id,
        } => {
            ctx.message_repo
                .mark_sent(message.id, provider_message_id.as_deref())
                .await?;
            ctx.recipient_repo.mark_sent(recipient.id, message.id).await?;
            ctx.campaign_repo.add_send_counts(campaign.id, 1, 0).await?;
            ctx.contact_repo.record_send(contact.id).await?;
            ctx.event_repo
                .append(
                    message.id,
                    "sent",
                    provider_message_id
                        .map(|id| serde_json::json!({ "providerMessageId": id })),
                )
                .await?;
            Ok(())
        }
        SendOutcome::PermanentFailure { error } => {
            warn!(
                message_id = %message.id,
                to = %contact.email,
                "Send permanently rejected: {}",
                error
            );
            ctx.message_repo.mark_failed(message.id, &error).await?;
            ctx.recipient_repo.mark_failed(recipient.id, &error).await?;
            ctx.campaign_repo.add_send_counts(campaign.id, 0, 1).await?;
            ctx.event_repo
                .append(message.id, "failed", Some(serde_json::json!({ "error": error })))
                .await?;
            Ok(())
        }
        SendOutcome::TemporaryFailure { error } => {
            // Leave the recipient claimed; the unit retry path resets
            // it to pending and tries again with a fresh message
            ctx.message_repo.mark_failed(message.id, &error).await?;
            ctx.event_repo
                .append(message.id, "error", Some(serde_json::json!({ "error": error })))
                .await?;
            Err(anyhow!("transport failure: {}", error))
        }
    }
}

async fn finish_unit(ctx: &DispatchContext, unit: &BatchUnit) -> Result<()> {
    ctx.campaign_repo
        .advance_batch(unit.campaign_id, unit.batch_no)
        .await?;

    if ctx.campaign_repo.complete_if_done(unit.campaign_id).await? {
        info!(campaign_id = %unit.campaign_id, "Campaign completed");
    }

    Ok(())
}

/// Attempts exhausted: close the batch and fail the campaign
async fn fail_unit(ctx: &DispatchContext, unit: &BatchUnit, error: &str) {
    error!(
        campaign_id = %unit.campaign_id,
        batch_no = unit.batch_no,
        "Batch failed permanently: {}",
        error
    );

    if let Err(e) = ctx
        .recipient_repo
        .fail_stuck_in_batch(unit.campaign_id, unit.batch_no, error)
        .await
    {
        error!(campaign_id = %unit.campaign_id, "Failed to close out batch: {}", e);
    }

    let reason = format!("Batch {} failed: {}", unit.batch_no, error);
    if let Err(e) = ctx.campaign_repo.mark_failed(unit.campaign_id, &reason).await {
        error!(campaign_id = %unit.campaign_id, "Failed to mark campaign failed: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::mock::MockGateway;
    use pretty_assertions::assert_eq;
    use sqlx::PgPool;
    use uuid::Uuid;

    fn context(pool: &PgPool, gateway: Arc<dyn TransportGateway>) -> DispatchContext {
        DispatchContext {
            campaign_repo: CampaignRepository::new(pool.clone()),
            recipient_repo: RecipientRepository::new(pool.clone()),
            message_repo: MessageRepository::new(pool.clone()),
            contact_repo: ContactRepository::new(pool.clone()),
            event_repo: EventRepository::new(pool.clone()),
            token_repo: UnsubscribeTokenRepository::new(pool.clone()),
            gateway,
            renderer: ContentRenderer::new(
                "https://track.acme.test".to_string(),
                "Acme Newsletter".to_string(),
            ),
            limiter: SendRateLimiter::new(100),
            max_unit_attempts: 3,
        }
    }

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

    async fn seed_contact(pool: &PgPool, org_id: Uuid) -> Uuid {
        let id = Uuid::new_v4();
        sqlx::query("INSERT INTO contacts (id, org_id, email) VALUES ($1, $2, 'jane@example.com')")
            .bind(id)
            .bind(org_id)
            .execute(pool)
            .await
            .unwrap();
        id
    }

    async fn claimed_recipient(
        ctx: &DispatchContext,
        campaign_id: Uuid,
        contact_id: Uuid,
    ) -> CampaignRecipient {
        ctx.recipient_repo
            .add_contacts(campaign_id, &[contact_id])
            .await
            .unwrap();
        ctx.recipient_repo.assign_batches(campaign_id, 50).await.unwrap();
        ctx.recipient_repo
            .claim_batch(campaign_id, 1)
            .await
            .unwrap()
            .remove(0)
    }

    #[sqlx::test(migrations = "../mailsurge-storage/migrations")]
    async fn test_accepted_send_appends_sent_event(pool: PgPool) {
        let org_id = Uuid::new_v4();
        let campaign_id = seed_campaign(&pool, org_id).await;
        let contact_id = seed_contact(&pool, org_id).await;

        let ctx = context(&pool, Arc::new(MockGateway::accepting()));
        let recipient = claimed_recipient(&ctx, campaign_id, contact_id).await;
        let campaign = ctx.campaign_repo.get(campaign_id).await.unwrap().unwrap();
        let contact = ctx
            .contact_repo
            .get_many(&[contact_id])
            .await
            .unwrap()
            .remove(0);

        send_to_recipient(&ctx, &campaign, &recipient, &contact)
            .await
            .unwrap();

        let (status, provider_id): (String, Option<String>) = sqlx::query_as(
            "SELECT status, provider_message_id FROM messages WHERE campaign_id = $1",
        )
        .bind(campaign_id)
        .fetch_one(&pool)
        .await
        .unwrap();
        assert_eq!(status, "sent");
        assert_eq!(provider_id.as_deref(), Some("mock-1"));

        // The event log carries the terminal outcome even before any
        // provider callback arrives
        let (events,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM message_events WHERE event_type = 'sent'")
                .fetch_one(&pool)
                .await
                .unwrap();
        assert_eq!(events, 1);

        let (sent_count,): (i32,) =
            sqlx::query_as("SELECT sent_count FROM campaigns WHERE id = $1")
                .bind(campaign_id)
                .fetch_one(&pool)
                .await
                .unwrap();
        assert_eq!(sent_count, 1);
    }

    #[sqlx::test(migrations = "../mailsurge-storage/migrations")]
    async fn test_permanent_rejection_appends_failed_event(pool: PgPool) {
        let org_id = Uuid::new_v4();
        let campaign_id = seed_campaign(&pool, org_id).await;
        let contact_id = seed_contact(&pool, org_id).await;

        let gateway = MockGateway::scripted(vec![SendOutcome::PermanentFailure {
            error: "550 5.1.1 User unknown".to_string(),
        }]);
        let ctx = context(&pool, Arc::new(gateway));
        let recipient = claimed_recipient(&ctx, campaign_id, contact_id).await;
        let campaign = ctx.campaign_repo.get(campaign_id).await.unwrap().unwrap();
        let contact = ctx
            .contact_repo
            .get_many(&[contact_id])
            .await
            .unwrap()
            .remove(0);

        // A permanent rejection consumes the recipient without failing
        // the unit
        send_to_recipient(&ctx, &campaign, &recipient, &contact)
            .await
            .unwrap();

        let (recipient_status,): (String,) =
            sqlx::query_as("SELECT status FROM campaign_recipients WHERE id = $1")
                .bind(recipient.id)
                .fetch_one(&pool)
                .await
                .unwrap();
        assert_eq!(recipient_status, "failed");

        let (events,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM message_events WHERE event_type = 'failed'")
                .fetch_one(&pool)
                .await
                .unwrap();
        assert_eq!(events, 1);

        let (failed_count,): (i32,) =
            sqlx::query_as("SELECT failed_count FROM campaigns WHERE id = $1")
                .bind(campaign_id)
                .fetch_one(&pool)
                .await
                .unwrap();
        assert_eq!(failed_count, 1);
    }
}
