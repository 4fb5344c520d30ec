//! Campaign manager - lifecycle actions and queueing

use chrono::{DateTime, Utc};
use mailsurge_common::types::{BatchUnit, ContactId, OrgId};
use mailsurge_storage::db::DatabasePool;
use mailsurge_storage::models::{Campaign, CampaignStatus, CreateCampaign, UpdateCampaign};
use mailsurge_storage::repository::{CampaignRepository, RecipientRepository};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::info;
use uuid::Uuid;

/// Campaign action errors
#[derive(Error, Debug)]
pub enum CampaignError {
    #[error("Campaign not found")]
    NotFound,

    #[error("Campaign status does not allow this action")]
    InvalidState,

    #[error("Campaign has no recipients")]
    NoRecipients,

    #[error("Scheduled time must be in the future")]
    ScheduledInPast,

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Snapshot of campaign metrics for the stats endpoint
#[derive(Debug, Clone, Serialize)]
pub struct CampaignStats {
    pub campaign_id: Uuid,
    pub status: String,
    pub total_recipients: i32,
    pub total_batches: i32,
    pub current_batch: i32,
    pub sent: i32,
    pub delivered: i32,
    pub opened: i32,
    pub unique_opens: i32,
    pub clicked: i32,
    pub unique_clicks: i32,
    pub bounced: i32,
    pub complained: i32,
    pub unsubscribed: i32,
    pub failed: i32,
    pub progress_percentage: f64,
}

/// Campaign manager - owns lifecycle transitions and hands batch units
/// to the dispatch worker
pub struct CampaignManager {
    campaign_repo: CampaignRepository,
    recipient_repo: RecipientRepository,
    dispatch_tx: mpsc::UnboundedSender<BatchUnit>,
}

impl CampaignManager {
    /// Create a new campaign manager
    pub fn new(db_pool: &DatabasePool, dispatch_tx: mpsc::UnboundedSender<BatchUnit>) -> Self {
        let pool = db_pool.pool().clone();
        Self {
            campaign_repo: CampaignRepository::new(pool.clone()),
            recipient_repo: RecipientRepository::new(pool),
            dispatch_tx,
        }
    }

    /// Create a draft campaign
    pub async fn create_campaign(&self, input: CreateCampaign) -> Result<Campaign, CampaignError> {
        let campaign = self.campaign_repo.create(input).await?;
        info!(campaign_id = %campaign.id, "Campaign created");
        Ok(campaign)
    }

    /// Get a campaign
    pub async fn get_campaign(
        &self,
        org_id: OrgId,
        campaign_id: Uuid,
    ) -> Result<Campaign, CampaignError> {
        self.campaign_repo
            .get_by_org(org_id, campaign_id)
            .await?
            .ok_or(CampaignError::NotFound)
    }

    /// List campaigns
    pub async fn list_campaigns(
        &self,
        org_id: OrgId,
        status: Option<CampaignStatus>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Campaign>, CampaignError> {
        Ok(self
            .campaign_repo
            .list_by_org(org_id, status, limit, offset)
            .await?)
    }

    /// Update a campaign (draft-only for content fields)
    pub async fn update_campaign(
        &self,
        org_id: OrgId,
        campaign_id: Uuid,
        input: UpdateCampaign,
    ) -> Result<Campaign, CampaignError> {
        self.campaign_repo
            .update(campaign_id, org_id, input)
            .await?
            .ok_or(CampaignError::NotFound)
    }

    /// Delete a draft campaign
    pub async fn delete_campaign(
        &self,
        org_id: OrgId,
        campaign_id: Uuid,
    ) -> Result<(), CampaignError> {
        let campaign = self.get_campaign(org_id, campaign_id).await?;
        if campaign.status != "draft" {
            return Err(CampaignError::InvalidState);
        }

        if self.campaign_repo.delete(campaign_id, org_id).await? {
            info!(%campaign_id, "Campaign deleted");
            Ok(())
        } else {
            Err(CampaignError::InvalidState)
        }
    }

    /// Add contacts to a campaign's recipient set. Allowed until the
    /// campaign is queued.
    pub async fn add_recipients(
        &self,
        org_id: OrgId,
        campaign_id: Uuid,
        contact_ids: &[ContactId],
    ) -> Result<i64, CampaignError> {
        let campaign = self.get_campaign(org_id, campaign_id).await?;
        if campaign.status != "draft" && campaign.status != "scheduled" {
            return Err(CampaignError::InvalidState);
        }

        let added = self
            .recipient_repo
            .add_contacts(campaign_id, contact_ids)
            .await?;
        info!(%campaign_id, added, "Recipients added");
        Ok(added)
    }

    /// Queue a campaign for immediate dispatch
    pub async fn send_campaign(
        &self,
        org_id: OrgId,
        campaign_id: Uuid,
    ) -> Result<Campaign, CampaignError> {
        let campaign = self.get_campaign(org_id, campaign_id).await?;
        let status = campaign
            .status_enum()
            .ok_or(CampaignError::InvalidState)?;

        if !status.can_transition(CampaignStatus::Queued) {
            return Err(CampaignError::InvalidState);
        }

        self.queue_campaign(&campaign, status).await
    }

    /// Schedule a draft campaign for later dispatch
    pub async fn schedule_campaign(
        &self,
        org_id: OrgId,
        campaign_id: Uuid,
        scheduled_at: DateTime<Utc>,
    ) -> Result<Campaign, CampaignError> {
        if scheduled_at <= Utc::now() {
            return Err(CampaignError::ScheduledInPast);
        }

        let campaign = self.get_campaign(org_id, campaign_id).await?;
        if campaign.status != "draft" {
            return Err(CampaignError::InvalidState);
        }

        self.campaign_repo
            .update(
                campaign_id,
                org_id,
                UpdateCampaign {
                    name: None,
                    subject: None,
                    from_name: None,
                    from_email: None,
                    reply_to: None,
                    html_body: None,
                    text_body: None,
                    scheduled_at: Some(scheduled_at),
                    batch_size: None,
                },
            )
            .await?;

        let updated = self
            .campaign_repo
            .transition(campaign_id, CampaignStatus::Draft, CampaignStatus::Scheduled)
            .await?
            .ok_or(CampaignError::InvalidState)?;

        info!(%campaign_id, %scheduled_at, "Campaign scheduled");
        Ok(updated)
    }

    /// Pause a sending campaign. In-flight batch tasks observe the new
    /// status between recipients and stop.
    pub async fn pause_campaign(
        &self,
        org_id: OrgId,
        campaign_id: Uuid,
    ) -> Result<Campaign, CampaignError> {
        self.get_campaign(org_id, campaign_id).await?;

        let updated = self
            .campaign_repo
            .transition(campaign_id, CampaignStatus::Sending, CampaignStatus::Paused)
            .await?
            .ok_or(CampaignError::InvalidState)?;

        info!(%campaign_id, "Campaign paused");
        Ok(updated)
    }

    /// Resume a paused campaign: back to queued, remaining batches
    /// re-enqueued
    pub async fn resume_campaign(
        &self,
        org_id: OrgId,
        campaign_id: Uuid,
    ) -> Result<Campaign, CampaignError> {
        self.get_campaign(org_id, campaign_id).await?;

        let updated = self
            .campaign_repo
            .transition(campaign_id, CampaignStatus::Paused, CampaignStatus::Queued)
            .await?
            .ok_or(CampaignError::InvalidState)?;

        let batches = self.recipient_repo.pending_batches(campaign_id).await?;
        let count = batches.len();
        for batch_no in batches {
            self.enqueue(BatchUnit {
                campaign_id,
                batch_no,
            });
        }

        info!(%campaign_id, batches = count, "Campaign resumed");
        Ok(updated)
    }

    /// Cancel a scheduled or paused campaign
    pub async fn cancel_campaign(
        &self,
        org_id: OrgId,
        campaign_id: Uuid,
    ) -> Result<Campaign, CampaignError> {
        let campaign = self.get_campaign(org_id, campaign_id).await?;
        let status = campaign
            .status_enum()
            .ok_or(CampaignError::InvalidState)?;

        if !status.can_transition(CampaignStatus::Cancelled) {
            return Err(CampaignError::InvalidState);
        }

        let updated = self
            .campaign_repo
            .transition(campaign_id, status, CampaignStatus::Cancelled)
            .await?
            .ok_or(CampaignError::InvalidState)?;

        // Recipients that never went out are closed off
        self.recipient_repo
            .skip_remaining(campaign_id, "Campaign cancelled")
            .await?;

        info!(%campaign_id, "Campaign cancelled");
        Ok(updated)
    }

    /// Campaign statistics
    pub async fn get_stats(
        &self,
        org_id: OrgId,
        campaign_id: Uuid,
    ) -> Result<CampaignStats, CampaignError> {
        let campaign = self.get_campaign(org_id, campaign_id).await?;
        let progress = campaign.progress_percentage();

        Ok(CampaignStats {
            campaign_id,
            status: campaign.status,
            total_recipients: campaign.total_recipients,
            total_batches: campaign.total_batches,
            current_batch: campaign.current_batch,
            sent: campaign.sent_count,
            delivered: campaign.delivered_count,
            opened: campaign.opened_count,
            unique_opens: campaign.unique_opens,
            clicked: campaign.clicked_count,
            unique_clicks: campaign.unique_clicks,
            bounced: campaign.bounced_count,
            complained: campaign.complained_count,
            unsubscribed: campaign.unsubscribed_count,
            failed: campaign.failed_count,
            progress_percentage: progress,
        })
    }

    /// Start scheduled campaigns whose time has come. Called by the
    /// sweep worker.
    pub async fn start_due_campaigns(&self) -> Result<usize, CampaignError> {
        let due = self.campaign_repo.get_scheduled_ready().await?;
        let mut started = 0;

        for campaign in due {
            match self.queue_campaign(&campaign, CampaignStatus::Scheduled).await {
                Ok(_) => started += 1,
                Err(CampaignError::NoRecipients) => {
                    self.campaign_repo
                        .mark_failed(campaign.id, "No recipients at scheduled time")
                        .await?;
                }
                Err(CampaignError::InvalidState) => {
                    // Another sweep or an operator got there first
                }
                Err(e) => return Err(e),
            }
        }

        Ok(started)
    }

    /// Re-enqueue batches for campaigns that were mid-dispatch when the
    /// process last stopped. Claiming is guarded, so an enqueue for a
    /// batch already in flight claims nothing.
    pub async fn recover_in_flight(&self) -> Result<usize, CampaignError> {
        let campaigns = self.campaign_repo.get_in_flight().await?;
        let mut enqueued = 0;

        for campaign in campaigns {
            for batch_no in self.recipient_repo.pending_batches(campaign.id).await? {
                self.enqueue(BatchUnit {
                    campaign_id: campaign.id,
                    batch_no,
                });
                enqueued += 1;
            }
        }

        Ok(enqueued)
    }

    /// Complete sending campaigns that have no work left
    pub async fn check_completions(&self) -> Result<(), CampaignError> {
        let campaigns = self.campaign_repo.get_in_flight().await?;
        for campaign in campaigns {
            if self.campaign_repo.complete_if_done(campaign.id).await? {
                info!(campaign_id = %campaign.id, "Campaign completed");
            }
        }
        Ok(())
    }

    /// Shared queue pipeline: snapshot recipients, partition into
    /// batches, flip to queued, hand units to the dispatch worker
    async fn queue_campaign(
        &self,
        campaign: &Campaign,
        from: CampaignStatus,
    ) -> Result<Campaign, CampaignError> {
        // Campaigns with no explicit recipient set go to every
        // subscribed contact in the organization
        let existing = self.recipient_repo.count(campaign.id, None).await?;
        if existing == 0 {
            self.recipient_repo
                .populate_from_contacts(campaign.id)
                .await?;
        }

        let (total, batches) = self
            .recipient_repo
            .assign_batches(campaign.id, campaign.batch_size)
            .await?;

        if total == 0 {
            return Err(CampaignError::NoRecipients);
        }

        self.campaign_repo
            .set_batch_plan(campaign.id, total as i32, batches)
            .await?;

        let updated = self
            .campaign_repo
            .transition(campaign.id, from, CampaignStatus::Queued)
            .await?
            .ok_or(CampaignError::InvalidState)?;

        for batch_no in 1..=batches {
            self.enqueue(BatchUnit {
                campaign_id: campaign.id,
                batch_no,
            });
        }

        info!(
            campaign_id = %campaign.id,
            recipients = total,
            batches,
            "Campaign queued for dispatch"
        );

        Ok(updated)
    }

    fn enqueue(&self, unit: BatchUnit) {
        // The receiver lives for the whole process; a send failure
        // means shutdown is underway and the unit will be recovered
        // from the database on next start
        let _ = self.dispatch_tx.send(unit);
    }
}
