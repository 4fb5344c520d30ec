//! Message inspection handlers
//!
//! Read-only views over the per-recipient messages a campaign produced
//! and the delivery event log behind each one.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use axum::http::HeaderMap;
use chrono::{DateTime, Utc};
use mailsurge_storage::models::{Message, MessageEvent, MessageStatus};
use mailsurge_storage::repository::{EventRepository, MessageRepository};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::error;
use uuid::Uuid;

use crate::state::AppState;

use super::campaigns::{api_error, map_campaign_error, org_from_headers, ApiError};

/// Query parameters for listing messages
#[derive(Debug, Deserialize)]
pub struct ListMessagesQuery {
    pub status: Option<String>,
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}

fn default_limit() -> i64 {
    50
}

/// Message row in list responses. Bodies are omitted; they are large
/// and already visible through the campaign content.
#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub id: Uuid,
    pub contact_id: Option<Uuid>,
    pub recipient_email: String,
    pub subject: String,
    pub status: String,
    pub bounce_type: Option<String>,
    pub open_count: i32,
    pub click_count: i32,
    pub error_message: Option<String>,
    pub sent_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub opened_at: Option<DateTime<Utc>>,
    pub clicked_at: Option<DateTime<Utc>>,
    pub bounced_at: Option<DateTime<Utc>>,
}

impl From<Message> for MessageResponse {
    fn from(m: Message) -> Self {
        Self {
            id: m.id,
            contact_id: m.contact_id,
            recipient_email: m.recipient_email,
            subject: m.subject,
            status: m.status,
            bounce_type: m.bounce_type,
            open_count: m.open_count,
            click_count: m.click_count,
            error_message: m.error_message,
            sent_at: m.sent_at,
            delivered_at: m.delivered_at,
            opened_at: m.opened_at,
            clicked_at: m.clicked_at,
            bounced_at: m.bounced_at,
        }
    }
}

/// Event row in the message event log
#[derive(Debug, Serialize)]
pub struct MessageEventResponse {
    pub id: Uuid,
    pub event_type: String,
    pub event_subtype: Option<String>,
    pub link_url: Option<String>,
    pub user_agent: Option<String>,
    pub ip_address: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<MessageEvent> for MessageEventResponse {
    fn from(e: MessageEvent) -> Self {
        Self {
            id: e.id,
            event_type: e.event_type,
            event_subtype: e.event_subtype,
            link_url: e.link_url,
            user_agent: e.user_agent,
            ip_address: e.ip_address,
            created_at: e.created_at,
        }
    }
}

/// List the messages a campaign produced
///
/// GET /api/v1/campaigns/:campaign_id/messages
pub async fn list_campaign_messages(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(campaign_id): Path<Uuid>,
    Query(query): Query<ListMessagesQuery>,
) -> Result<Json<Vec<MessageResponse>>, ApiError> {
    let org_id = org_from_headers(&headers)?;

    let status = query
        .status
        .as_deref()
        .map(|s| {
            s.parse::<MessageStatus>().map_err(|_| {
                api_error(
                    StatusCode::BAD_REQUEST,
                    "validation_error",
                    format!("Unknown message status: {}", s),
                )
            })
        })
        .transpose()?
        .map(|s| s.to_string());

    // Ownership check before touching the message table
    state
        .manager
        .get_campaign(org_id, campaign_id)
        .await
        .map_err(|e| map_campaign_error(e, "get"))?;

    let repo = MessageRepository::new(state.db_pool.pool().clone());
    let messages = repo
        .list_by_campaign(
            campaign_id,
            status.as_deref(),
            query.limit.clamp(1, 200),
            query.offset.max(0),
        )
        .await
        .map_err(|e| {
            error!("Failed to list messages: {}", e);
            api_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal_error",
                "Failed to list messages",
            )
        })?;

    Ok(Json(messages.into_iter().map(MessageResponse::from).collect()))
}

/// The delivery event log of one message, oldest first
///
/// GET /api/v1/campaigns/:campaign_id/messages/:message_id/events
pub async fn list_message_events(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path((campaign_id, message_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<Vec<MessageEventResponse>>, ApiError> {
    let org_id = org_from_headers(&headers)?;

    state
        .manager
        .get_campaign(org_id, campaign_id)
        .await
        .map_err(|e| map_campaign_error(e, "get"))?;

    let pool = state.db_pool.pool().clone();
    let message = MessageRepository::new(pool.clone())
        .get(message_id)
        .await
        .map_err(|e| {
            error!("Failed to load message: {}", e);
            api_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal_error",
                "Failed to load message",
            )
        })?;

    match message {
        Some(m) if m.campaign_id == Some(campaign_id) => {}
        _ => {
            return Err(api_error(
                StatusCode::NOT_FOUND,
                "not_found",
                "Message not found",
            ))
        }
    }

    let events = EventRepository::new(pool)
        .list_by_message(message_id)
        .await
        .map_err(|e| {
            error!("Failed to list message events: {}", e);
            api_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal_error",
                "Failed to list message events",
            )
        })?;

    Ok(Json(events.into_iter().map(MessageEventResponse::from).collect()))
}
