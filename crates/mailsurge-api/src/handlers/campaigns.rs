//! Campaign handlers

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use chrono::{DateTime, Utc};
use mailsurge_core::{CampaignError, CampaignStats};
use mailsurge_storage::models::{
    Campaign, CampaignRecipient, CampaignStatus, CreateCampaign, RecipientStatus,
    UpdateCampaign,
};
use mailsurge_storage::repository::{CampaignRepository, RecipientRepository};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::error;
use uuid::Uuid;

use crate::state::AppState;

/// Error response
#[derive(Debug, Clone, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

pub type ApiError = (StatusCode, Json<ErrorResponse>);

pub(crate) fn api_error(status: StatusCode, error: &str, message: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: error.to_string(),
            message: message.into(),
        }),
    )
}

/// Resolve the caller's organization from the X-Org-Id header set by
/// the auth gateway in front of this service
pub fn org_from_headers(headers: &HeaderMap) -> Result<Uuid, ApiError> {
    headers
        .get("x-org-id")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| Uuid::parse_str(v).ok())
        .ok_or_else(|| {
            api_error(
                StatusCode::BAD_REQUEST,
                "missing_org",
                "X-Org-Id header is required",
            )
        })
}

pub(crate) fn map_campaign_error(e: CampaignError, action: &str) -> ApiError {
    match e {
        CampaignError::NotFound => {
            api_error(StatusCode::NOT_FOUND, "not_found", "Campaign not found")
        }
        CampaignError::InvalidState => api_error(
            StatusCode::CONFLICT,
            "invalid_state",
            format!("Campaign status does not allow {}", action),
        ),
        CampaignError::NoRecipients => api_error(
            StatusCode::UNPROCESSABLE_ENTITY,
            "validation_error",
            "Campaign has no recipients",
        ),
        CampaignError::ScheduledInPast => api_error(
            StatusCode::UNPROCESSABLE_ENTITY,
            "validation_error",
            "Scheduled time must be in the future",
        ),
        CampaignError::Database(e) => {
            error!("Database error during campaign {}: {}", action, e);
            api_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal_error",
                format!("Failed to {} campaign", action),
            )
        }
    }
}

/// Query parameters for listing campaigns
#[derive(Debug, Deserialize)]
pub struct ListCampaignsQuery {
    pub status: Option<String>,
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}

fn default_limit() -> i64 {
    50
}

/// Campaign list response
#[derive(Debug, Serialize)]
pub struct CampaignListResponse {
    pub data: Vec<CampaignResponse>,
    pub total: i64,
    pub limit: i64,
    pub offset: i64,
}

/// Campaign response
#[derive(Debug, Serialize)]
pub struct CampaignResponse {
    pub id: Uuid,
    pub name: String,
    pub subject: String,
    pub from_name: String,
    pub from_email: String,
    pub reply_to: Option<String>,
    pub status: String,
    pub batch_size: i32,
    pub current_batch: i32,
    pub total_batches: i32,
    pub total_recipients: i32,
    pub sent_count: i32,
    pub delivered_count: i32,
    pub bounced_count: i32,
    pub failed_count: i32,
    pub progress_percentage: f64,
    pub error_message: Option<String>,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Campaign> for CampaignResponse {
    fn from(c: Campaign) -> Self {
        let progress = c.progress_percentage();
        Self {
            id: c.id,
            name: c.name,
            subject: c.subject,
            from_name: c.from_name,
            from_email: c.from_email,
            reply_to: c.reply_to,
            status: c.status,
            batch_size: c.batch_size,
            current_batch: c.current_batch,
            total_batches: c.total_batches,
            total_recipients: c.total_recipients,
            sent_count: c.sent_count,
            delivered_count: c.delivered_count,
            bounced_count: c.bounced_count,
            failed_count: c.failed_count,
            progress_percentage: progress,
            error_message: c.error_message,
            scheduled_at: c.scheduled_at,
            started_at: c.started_at,
            completed_at: c.completed_at,
            created_at: c.created_at,
            updated_at: c.updated_at,
        }
    }
}

/// Request body for creating a campaign
#[derive(Debug, Deserialize)]
pub struct CreateCampaignRequest {
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

/// Request body for updating a campaign
#[derive(Debug, Deserialize)]
pub struct UpdateCampaignRequest {
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

/// Request body for scheduling a campaign
#[derive(Debug, Deserialize)]
pub struct ScheduleCampaignRequest {
    pub scheduled_at: DateTime<Utc>,
}

/// Request body for adding recipients
#[derive(Debug, Deserialize)]
pub struct AddRecipientsRequest {
    pub contact_ids: Vec<Uuid>,
}

/// Response for adding recipients
#[derive(Debug, Serialize)]
pub struct AddRecipientsResponse {
    pub added: i64,
}

/// List campaigns
///
/// GET /api/v1/campaigns
pub async fn list_campaigns(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<ListCampaignsQuery>,
) -> Result<Json<CampaignListResponse>, ApiError> {
    let org_id = org_from_headers(&headers)?;
    let status = query
        .status
        .as_deref()
        .map(|s| {
            s.parse::<CampaignStatus>().map_err(|_| {
                api_error(
                    StatusCode::BAD_REQUEST,
                    "validation_error",
                    format!("Unknown campaign status: {}", s),
                )
            })
        })
        .transpose()?;

    let campaigns = state
        .manager
        .list_campaigns(org_id, status, query.limit.clamp(1, 200), query.offset.max(0))
        .await
        .map_err(|e| map_campaign_error(e, "list"))?;

    let repo = CampaignRepository::new(state.db_pool.pool().clone());
    let total = repo.count_by_org(org_id, status).await.unwrap_or(0);

    Ok(Json(CampaignListResponse {
        data: campaigns.into_iter().map(CampaignResponse::from).collect(),
        total,
        limit: query.limit,
        offset: query.offset,
    }))
}

/// Create a new draft campaign
///
/// POST /api/v1/campaigns
pub async fn create_campaign(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(input): Json<CreateCampaignRequest>,
) -> Result<(StatusCode, Json<CampaignResponse>), ApiError> {
    let org_id = org_from_headers(&headers)?;

    if input.name.trim().is_empty() {
        return Err(api_error(
            StatusCode::BAD_REQUEST,
            "validation_error",
            "Campaign name is required",
        ));
    }
    if input.subject.trim().is_empty() {
        return Err(api_error(
            StatusCode::BAD_REQUEST,
            "validation_error",
            "Subject is required",
        ));
    }
    if input.html_body.trim().is_empty() {
        return Err(api_error(
            StatusCode::BAD_REQUEST,
            "validation_error",
            "html_body is required",
        ));
    }
    if !input.from_email.contains('@') {
        return Err(api_error(
            StatusCode::BAD_REQUEST,
            "validation_error",
            "from_email is not a valid address",
        ));
    }
    if input.batch_size.is_some_and(|b| b < 1) {
        return Err(api_error(
            StatusCode::BAD_REQUEST,
            "validation_error",
            "batch_size must be positive",
        ));
    }

    let campaign = state
        .manager
        .create_campaign(CreateCampaign {
            org_id,
            name: input.name,
            subject: input.subject,
            from_name: input.from_name,
            from_email: input.from_email,
            reply_to: input.reply_to,
            html_body: input.html_body,
            text_body: input.text_body,
            scheduled_at: input.scheduled_at,
            batch_size: input.batch_size,
        })
        .await
        .map_err(|e| map_campaign_error(e, "create"))?;

    Ok((StatusCode::CREATED, Json(CampaignResponse::from(campaign))))
}

/// Get a campaign
///
/// GET /api/v1/campaigns/:campaign_id
pub async fn get_campaign(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(campaign_id): Path<Uuid>,
) -> Result<Json<CampaignResponse>, ApiError> {
    let org_id = org_from_headers(&headers)?;
    let campaign = state
        .manager
        .get_campaign(org_id, campaign_id)
        .await
        .map_err(|e| map_campaign_error(e, "get"))?;
    Ok(Json(CampaignResponse::from(campaign)))
}

/// Update a campaign
///
/// PUT /api/v1/campaigns/:campaign_id
pub async fn update_campaign(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(campaign_id): Path<Uuid>,
    Json(input): Json<UpdateCampaignRequest>,
) -> Result<Json<CampaignResponse>, ApiError> {
    let org_id = org_from_headers(&headers)?;

    let campaign = state
        .manager
        .update_campaign(
            org_id,
            campaign_id,
            UpdateCampaign {
                name: input.name,
                subject: input.subject,
                from_name: input.from_name,
                from_email: input.from_email,
                reply_to: input.reply_to,
                html_body: input.html_body,
                text_body: input.text_body,
                scheduled_at: input.scheduled_at,
                batch_size: input.batch_size,
            },
        )
        .await
        .map_err(|e| map_campaign_error(e, "update"))?;

    Ok(Json(CampaignResponse::from(campaign)))
}

/// Delete a draft campaign
///
/// DELETE /api/v1/campaigns/:campaign_id
pub async fn delete_campaign(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(campaign_id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    let org_id = org_from_headers(&headers)?;
    state
        .manager
        .delete_campaign(org_id, campaign_id)
        .await
        .map_err(|e| map_campaign_error(e, "delete"))?;
    Ok(StatusCode::NO_CONTENT)
}

/// Add recipients to a campaign
///
/// POST /api/v1/campaigns/:campaign_id/recipients
pub async fn add_recipients(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(campaign_id): Path<Uuid>,
    Json(input): Json<AddRecipientsRequest>,
) -> Result<Json<AddRecipientsResponse>, ApiError> {
    let org_id = org_from_headers(&headers)?;

    if input.contact_ids.is_empty() {
        return Err(api_error(
            StatusCode::BAD_REQUEST,
            "validation_error",
            "contact_ids must not be empty",
        ));
    }

    let added = state
        .manager
        .add_recipients(org_id, campaign_id, &input.contact_ids)
        .await
        .map_err(|e| map_campaign_error(e, "add recipients to"))?;

    Ok(Json(AddRecipientsResponse { added }))
}

/// Recipient row in list responses
#[derive(Debug, Serialize)]
pub struct RecipientResponse {
    pub id: Uuid,
    pub contact_id: Uuid,
    pub batch_no: Option<i32>,
    pub status: String,
    pub message_id: Option<Uuid>,
    pub error_message: Option<String>,
    pub sent_at: Option<DateTime<Utc>>,
}

impl From<CampaignRecipient> for RecipientResponse {
    fn from(r: CampaignRecipient) -> Self {
        Self {
            id: r.id,
            contact_id: r.contact_id,
            batch_no: r.batch_no,
            status: r.status,
            message_id: r.message_id,
            error_message: r.error_message,
            sent_at: r.sent_at,
        }
    }
}

/// List a campaign's recipients
///
/// GET /api/v1/campaigns/:campaign_id/recipients
pub async fn list_recipients(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(campaign_id): Path<Uuid>,
    Query(query): Query<ListCampaignsQuery>,
) -> Result<Json<Vec<RecipientResponse>>, ApiError> {
    let org_id = org_from_headers(&headers)?;

    // Reject filter values that can never match instead of silently
    // returning an empty list
    let status = query
        .status
        .as_deref()
        .map(|s| {
            s.parse::<RecipientStatus>().map_err(|_| {
                api_error(
                    StatusCode::BAD_REQUEST,
                    "validation_error",
                    format!("Unknown recipient status: {}", s),
                )
            })
        })
        .transpose()?
        .map(|s| s.to_string());

    // Ownership check before touching the recipient table
    state
        .manager
        .get_campaign(org_id, campaign_id)
        .await
        .map_err(|e| map_campaign_error(e, "get"))?;

    let repo = RecipientRepository::new(state.db_pool.pool().clone());
    let recipients = repo
        .list_by_campaign(
            campaign_id,
            status.as_deref(),
            query.limit.clamp(1, 200),
            query.offset.max(0),
        )
        .await
        .map_err(|e| {
            error!("Failed to list recipients: {}", e);
            api_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal_error",
                "Failed to list recipients",
            )
        })?;

    Ok(Json(
        recipients.into_iter().map(RecipientResponse::from).collect(),
    ))
}

/// Queue a campaign for immediate dispatch
///
/// POST /api/v1/campaigns/:campaign_id/send
pub async fn send_campaign(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(campaign_id): Path<Uuid>,
) -> Result<Json<CampaignResponse>, ApiError> {
    let org_id = org_from_headers(&headers)?;
    let campaign = state
        .manager
        .send_campaign(org_id, campaign_id)
        .await
        .map_err(|e| map_campaign_error(e, "send"))?;
    Ok(Json(CampaignResponse::from(campaign)))
}

/// Schedule a draft campaign
///
/// POST /api/v1/campaigns/:campaign_id/schedule
pub async fn schedule_campaign(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(campaign_id): Path<Uuid>,
    Json(input): Json<ScheduleCampaignRequest>,
) -> Result<Json<CampaignResponse>, ApiError> {
    let org_id = org_from_headers(&headers)?;
    let campaign = state
        .manager
        .schedule_campaign(org_id, campaign_id, input.scheduled_at)
        .await
        .map_err(|e| map_campaign_error(e, "schedule"))?;
    Ok(Json(CampaignResponse::from(campaign)))
}

/// Pause a sending campaign
///
/// POST /api/v1/campaigns/:campaign_id/pause
pub async fn pause_campaign(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(campaign_id): Path<Uuid>,
) -> Result<Json<CampaignResponse>, ApiError> {
    let org_id = org_from_headers(&headers)?;
    let campaign = state
        .manager
        .pause_campaign(org_id, campaign_id)
        .await
        .map_err(|e| map_campaign_error(e, "pause"))?;
    Ok(Json(CampaignResponse::from(campaign)))
}

/// Resume a paused campaign
///
/// POST /api/v1/campaigns/:campaign_id/resume
pub async fn resume_campaign(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(campaign_id): Path<Uuid>,
) -> Result<Json<CampaignResponse>, ApiError> {
    let org_id = org_from_headers(&headers)?;
    let campaign = state
        .manager
        .resume_campaign(org_id, campaign_id)
        .await
        .map_err(|e| map_campaign_error(e, "resume"))?;
    Ok(Json(CampaignResponse::from(campaign)))
}

/// Cancel a scheduled or paused campaign
///
/// POST /api/v1/campaigns/:campaign_id/cancel
pub async fn cancel_campaign(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(campaign_id): Path<Uuid>,
) -> Result<Json<CampaignResponse>, ApiError> {
    let org_id = org_from_headers(&headers)?;
    let campaign = state
        .manager
        .cancel_campaign(org_id, campaign_id)
        .await
        .map_err(|e| map_campaign_error(e, "cancel"))?;
    Ok(Json(CampaignResponse::from(campaign)))
}

/// Campaign statistics
///
/// GET /api/v1/campaigns/:campaign_id/stats
pub async fn get_campaign_stats(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(campaign_id): Path<Uuid>,
) -> Result<Json<CampaignStats>, ApiError> {
    let org_id = org_from_headers(&headers)?;
    let stats = state
        .manager
        .get_stats(org_id, campaign_id)
        .await
        .map_err(|e| map_campaign_error(e, "read stats for"))?;
    Ok(Json(stats))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_org_from_headers() {
        let org_id = Uuid::new_v4();
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-org-id",
            HeaderValue::from_str(&org_id.to_string()).unwrap(),
        );
        assert_eq!(org_from_headers(&headers).unwrap(), org_id);
    }

    #[test]
    fn test_org_from_headers_missing_or_invalid() {
        let headers = HeaderMap::new();
        assert!(org_from_headers(&headers).is_err());

        let mut headers = HeaderMap::new();
        headers.insert("x-org-id", HeaderValue::from_static("not-a-uuid"));
        assert!(org_from_headers(&headers).is_err());
    }

    #[test]
    fn test_error_mapping() {
        let (status, _) = map_campaign_error(CampaignError::NotFound, "get");
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = map_campaign_error(CampaignError::InvalidState, "pause");
        assert_eq!(status, StatusCode::CONFLICT);

        let (status, _) = map_campaign_error(CampaignError::NoRecipients, "send");
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    }
}
