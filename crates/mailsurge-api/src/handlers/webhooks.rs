//! Provider webhook handler
//!
//! The provider retries until it sees a 2xx, so this endpoint answers
//! fast and does the database work in a spawned task. Redelivered
//! notifications are absorbed by the processor's guarded updates.

use axum::{extract::State, http::StatusCode};
use mailsurge_core::events::{parse_callback, ProviderCallback};
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::state::AppState;

/// Receive a provider callback
///
/// POST /webhooks/provider
pub async fn provider_callback(
    State(state): State<Arc<AppState>>,
    body: String,
) -> StatusCode {
    let callback = match parse_callback(&body) {
        Ok(c) => c,
        Err(e) if e.is_malformed_body() => {
            warn!("Unparseable provider callback: {}", e);
            return StatusCode::BAD_REQUEST;
        }
        Err(e) => {
            // Well-formed but unusable (unknown type, no message ID).
            // Acknowledge it anyway; a non-2xx only makes the provider
            // redeliver something we will never process.
            warn!("Dropping unusable provider callback: {}", e);
            return StatusCode::OK;
        }
    };

    match callback {
        ProviderCallback::SubscriptionConfirmation { subscribe_url } => {
            // Confirmation is a manual step: log the URL for the
            // operator rather than fetching arbitrary endpoints
            info!(
                subscribe_url = subscribe_url.as_deref().unwrap_or("<missing>"),
                "Provider subscription confirmation received"
            );
            StatusCode::OK
        }
        ProviderCallback::Notification(notification) => {
            let processor = state.processor.clone();
            tokio::spawn(async move {
                if let Err(e) = processor.process_notification(&notification).await {
                    error!(
                        provider_message_id = %notification.provider_message_id,
                        "Failed to process notification: {}",
                        e
                    );
                }
            });
            StatusCode::OK
        }
    }
}
