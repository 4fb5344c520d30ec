//! Database models

use chrono::{DateTime, Utc};
use mailsurge_common::types::{CampaignId, ContactId, EventId, MessageId, OrgId, RecipientId};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Campaign status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CampaignStatus {
    Draft,
    Scheduled,
    Queued,
    Sending,
    Paused,
    Completed,
    Cancelled,
    Failed,
}

impl CampaignStatus {
    /// Whether the state machine permits moving from `self` to `to`.
    pub fn can_transition(self, to: CampaignStatus) -> bool {
        use CampaignStatus::*;
        matches!(
            (self, to),
            (Draft, Scheduled)
                | (Draft, Queued)
                | (Scheduled, Queued)
                | (Scheduled, Cancelled)
                | (Queued, Sending)
                | (Sending, Paused)
                | (Sending, Completed)
                | (Sending, Failed)
                | (Paused, Queued)
                | (Paused, Cancelled)
        )
    }

    /// Terminal states accept no further transitions.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            CampaignStatus::Completed | CampaignStatus::Cancelled | CampaignStatus::Failed
        )
    }
}

impl std::fmt::Display for CampaignStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CampaignStatus::Draft => write!(f, "draft"),
            CampaignStatus::Scheduled => write!(f, "scheduled"),
            CampaignStatus::Queued => write!(f, "queued"),
            CampaignStatus::Sending => write!(f, "sending"),
            CampaignStatus::Paused => write!(f, "paused"),
            CampaignStatus::Completed => write!(f, "completed"),
            CampaignStatus::Cancelled => write!(f, "cancelled"),
            CampaignStatus::Failed => write!(f, "failed"),
        }
    }
}

impl std::str::FromStr for CampaignStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(CampaignStatus::Draft),
            "scheduled" => Ok(CampaignStatus::Scheduled),
            "queued" => Ok(CampaignStatus::Queued),
            "sending" => Ok(CampaignStatus::Sending),
            "paused" => Ok(CampaignStatus::Paused),
            "completed" => Ok(CampaignStatus::Completed),
            "cancelled" => Ok(CampaignStatus::Cancelled),
            "failed" => Ok(CampaignStatus::Failed),
            _ => Err(format!("Invalid campaign status: {}", s)),
        }
    }
}

/// Campaign model
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Campaign {
    pub id: CampaignId,
    pub org_id: OrgId,
    pub name: String,
    pub subject: String,
    pub from_name: String,
    pub from_email: String,
    pub reply_to: Option<String>,
    pub html_body: String,
    pub text_body: Option<String>,
    pub status: String,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub batch_size: i32,
    pub current_batch: i32,
    pub total_batches: i32,
    pub total_recipients: i32,
    pub sent_count: i32,
    pub delivered_count: i32,
    pub opened_count: i32,
    pub unique_opens: i32,
    pub clicked_count: i32,
    pub unique_clicks: i32,
    pub bounced_count: i32,
    pub complained_count: i32,
    pub unsubscribed_count: i32,
    pub failed_count: i32,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Campaign {
    /// Get status enum
    pub fn status_enum(&self) -> Option<CampaignStatus> {
        self.status.parse().ok()
    }

    /// Calculate progress percentage
    pub fn progress_percentage(&self) -> f64 {
        if self.total_recipients == 0 {
            0.0
        } else {
            let done = (self.sent_count + self.failed_count) as f64;
            (done / self.total_recipients as f64) * 100.0
        }
    }
}

/// Create campaign input
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateCampaign {
    pub org_id: OrgId,
    pub name: String,
    pub subject: String,
    pub from_name: String,
    pub from_email: String,
    pub reply_to: Option<String>,
    pub html_body: String,
    pub text_body: Option<String>,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub batch_size: Option<i32>,
}

/// Update campaign input. Only `name` is applied once the campaign
/// has left draft.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateCampaign {
    pub name: Option<String>,
    pub subject: Option<String>,
    pub from_name: Option<String>,
    pub from_email: Option<String>,
    pub reply_to: Option<String>,
    pub html_body: Option<String>,
    pub text_body: Option<String>,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub batch_size: Option<i32>,
}

/// Campaign recipient status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecipientStatus {
    Pending,
    Queued,
    Sent,
    Failed,
    Skipped,
}

impl std::fmt::Display for RecipientStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RecipientStatus::Pending => write!(f, "pending"),
            RecipientStatus::Queued => write!(f, "queued"),
            RecipientStatus::Sent => write!(f, "sent"),
            RecipientStatus::Failed => write!(f, "failed"),
            RecipientStatus::Skipped => write!(f, "skipped"),
        }
    }
}

impl std::str::FromStr for RecipientStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(RecipientStatus::Pending),
            "queued" => Ok(RecipientStatus::Queued),
            "sent" => Ok(RecipientStatus::Sent),
            "failed" => Ok(RecipientStatus::Failed),
            "skipped" => Ok(RecipientStatus::Skipped),
            _ => Err(format!("Invalid recipient status: {}", s)),
        }
    }
}

/// Campaign recipient model - the unit of work for dispatch
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct CampaignRecipient {
    pub id: RecipientId,
    pub campaign_id: CampaignId,
    pub contact_id: ContactId,
    pub batch_no: Option<i32>,
    pub status: String,
    pub message_id: Option<MessageId>,
    pub error_message: Option<String>,
    pub retry_count: i32,
    pub queued_at: Option<DateTime<Utc>>,
    pub sent_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Message status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    Pending,
    Queued,
    Sent,
    Delivered,
    Failed,
    Bounced,
    Complained,
}

impl std::fmt::Display for MessageStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MessageStatus::Pending => write!(f, "pending"),
            MessageStatus::Queued => write!(f, "queued"),
            MessageStatus::Sent => write!(f, "sent"),
            MessageStatus::Delivered => write!(f, "delivered"),
            MessageStatus::Failed => write!(f, "failed"),
            MessageStatus::Bounced => write!(f, "bounced"),
            MessageStatus::Complained => write!(f, "complained"),
        }
    }
}

impl std::str::FromStr for MessageStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(MessageStatus::Pending),
            "queued" => Ok(MessageStatus::Queued),
            "sent" => Ok(MessageStatus::Sent),
            "delivered" => Ok(MessageStatus::Delivered),
            "failed" => Ok(MessageStatus::Failed),
            "bounced" => Ok(MessageStatus::Bounced),
            "complained" => Ok(MessageStatus::Complained),
            _ => Err(format!("Invalid message status: {}", s)),
        }
    }
}

/// Message model - one rendered, individually tracked email instance.
/// Recipient email/name are frozen at send time.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub campaign_id: Option<CampaignId>,
    pub contact_id: Option<ContactId>,
    pub recipient_email: String,
    pub recipient_name: Option<String>,
    pub subject: String,
    pub html_body: String,
    pub text_body: Option<String>,
    pub provider_message_id: Option<String>,
    pub tracking_id: String,
    pub status: String,
    pub bounce_type: Option<String>,
    pub open_count: i32,
    pub click_count: i32,
    pub error_message: Option<String>,
    pub queued_at: Option<DateTime<Utc>>,
    pub sent_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub opened_at: Option<DateTime<Utc>>,
    pub clicked_at: Option<DateTime<Utc>>,
    pub bounced_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Create message input
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateMessage {
    pub campaign_id: Option<CampaignId>,
    pub contact_id: Option<ContactId>,
    pub recipient_email: String,
    pub recipient_name: Option<String>,
    pub subject: String,
    pub html_body: String,
    pub text_body: Option<String>,
    pub tracking_id: String,
}

/// Message event model - append-only audit log entry
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct MessageEvent {
    pub id: EventId,
    pub message_id: MessageId,
    pub event_type: String,
    pub event_subtype: Option<String>,
    pub link_url: Option<String>,
    pub user_agent: Option<String>,
    pub ip_address: Option<String>,
    pub payload: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

/// Contact subscription status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContactStatus {
    Subscribed,
    Unsubscribed,
    Bounced,
    Complained,
}

impl std::fmt::Display for ContactStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ContactStatus::Subscribed => write!(f, "subscribed"),
            ContactStatus::Unsubscribed => write!(f, "unsubscribed"),
            ContactStatus::Bounced => write!(f, "bounced"),
            ContactStatus::Complained => write!(f, "complained"),
        }
    }
}

impl std::str::FromStr for ContactStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "subscribed" => Ok(ContactStatus::Subscribed),
            "unsubscribed" => Ok(ContactStatus::Unsubscribed),
            "bounced" => Ok(ContactStatus::Bounced),
            "complained" => Ok(ContactStatus::Complained),
            _ => Err(format!("Invalid contact status: {}", s)),
        }
    }
}

/// Contact model. Owned by the contact-management side; this core only
/// reads the snapshot fields and mutates the engagement counters.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Contact {
    pub id: ContactId,
    pub org_id: OrgId,
    pub email: String,
    pub full_name: Option<String>,
    pub company: Option<String>,
    pub phone: Option<String>,
    pub status: String,
    pub custom_fields: serde_json::Value,
    pub total_emails_sent: i32,
    pub total_emails_opened: i32,
    pub total_emails_clicked: i32,
    pub last_email_sent_at: Option<DateTime<Utc>>,
    pub last_opened_at: Option<DateTime<Utc>>,
    pub last_clicked_at: Option<DateTime<Utc>>,
    pub unsubscribed_at: Option<DateTime<Utc>>,
    pub unsubscribe_reason: Option<String>,
    pub bounce_count: i32,
    pub bounce_type: Option<String>,
    pub last_bounce_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Contact {
    /// Get status enum
    pub fn status_enum(&self) -> Option<ContactStatus> {
        self.status.parse().ok()
    }

    pub fn is_subscribed(&self) -> bool {
        self.status_enum() == Some(ContactStatus::Subscribed)
    }
}

/// Unsubscribe token model - single-use capability
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct UnsubscribeToken {
    pub token: String,
    pub contact_id: ContactId,
    pub campaign_id: Option<CampaignId>,
    pub used_at: Option<DateTime<Utc>>,
    pub reason: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl UnsubscribeToken {
    pub fn is_used(&self) -> bool {
        self.used_at.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_campaign_transitions() {
        use CampaignStatus::*;

        assert!(Draft.can_transition(Queued));
        assert!(Draft.can_transition(Scheduled));
        assert!(Scheduled.can_transition(Queued));
        assert!(Scheduled.can_transition(Cancelled));
        assert!(Queued.can_transition(Sending));
        assert!(Sending.can_transition(Paused));
        assert!(Sending.can_transition(Completed));
        assert!(Sending.can_transition(Failed));
        assert!(Paused.can_transition(Queued));
        assert!(Paused.can_transition(Cancelled));

        // Illegal moves
        assert!(!Draft.can_transition(Sending));
        assert!(!Sending.can_transition(Cancelled));
        assert!(!Completed.can_transition(Queued));
        assert!(!Cancelled.can_transition(Sending));
        assert!(!Failed.can_transition(Queued));
        assert!(!Paused.can_transition(Sending));
    }

    #[test]
    fn test_terminal_states() {
        assert!(CampaignStatus::Completed.is_terminal());
        assert!(CampaignStatus::Cancelled.is_terminal());
        assert!(CampaignStatus::Failed.is_terminal());
        assert!(!CampaignStatus::Paused.is_terminal());
    }

    #[test]
    fn test_status_roundtrip() {
        for s in [
            "draft",
            "scheduled",
            "queued",
            "sending",
            "paused",
            "completed",
            "cancelled",
            "failed",
        ] {
            let parsed: CampaignStatus = s.parse().unwrap();
            assert_eq!(parsed.to_string(), s);
        }
        assert!("bogus".parse::<CampaignStatus>().is_err());
    }

    #[test]
    fn test_filter_status_roundtrip() {
        // The API validates list filters through these parsers before
        // binding them into SQL
        for s in ["pending", "queued", "sent", "failed", "skipped"] {
            let parsed: RecipientStatus = s.parse().unwrap();
            assert_eq!(parsed.to_string(), s);
        }
        assert!("bounced".parse::<RecipientStatus>().is_err());

        for s in [
            "pending",
            "queued",
            "sent",
            "delivered",
            "failed",
            "bounced",
            "complained",
        ] {
            let parsed: MessageStatus = s.parse().unwrap();
            assert_eq!(parsed.to_string(), s);
        }
        assert!("skipped".parse::<MessageStatus>().is_err());
    }

    #[test]
    fn test_progress_percentage() {
        let mut campaign = sample_campaign();
        assert_eq!(campaign.progress_percentage(), 0.0);

        campaign.total_recipients = 4;
        campaign.sent_count = 2;
        campaign.failed_count = 1;
        assert_eq!(campaign.progress_percentage(), 75.0);
    }

    fn sample_campaign() -> Campaign {
        Campaign {
            id: uuid::Uuid::new_v4(),
            org_id: uuid::Uuid::new_v4(),
            name: "Launch".to_string(),
            subject: "Hello".to_string(),
            from_name: "Acme".to_string(),
            from_email: "news@acme.test".to_string(),
            reply_to: None,
            html_body: "<p>Hi</p>".to_string(),
            text_body: None,
            status: "draft".to_string(),
            scheduled_at: None,
            started_at: None,
            completed_at: None,
            batch_size: 50,
            current_batch: 0,
            total_batches: 0,
            total_recipients: 0,
            sent_count: 0,
            delivered_count: 0,
            opened_count: 0,
            unique_opens: 0,
            clicked_count: 0,
            unique_clicks: 0,
            bounced_count: 0,
            complained_count: 0,
            unsubscribed_count: 0,
            failed_count: 0,
            error_message: None,
            created_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
        }
    }
}
