//! Public tracking and unsubscribe handlers
//!
//! These endpoints are hit by mail clients and recipients, not by API
//! consumers: they always answer with something harmless, and the
//! recording work happens off the request path.

use axum::{
    extract::{Path, State},
    http::{header, HeaderMap, StatusCode},
    response::{Html, IntoResponse, Redirect, Response},
    Form,
};
use mailsurge_core::dispatch::render::decode_click_url;
use mailsurge_core::UnsubscribeOutcome;
use serde::Deserialize;
use std::sync::Arc;
use tracing::error;

use crate::state::AppState;

/// 1x1 transparent GIF served by the open pixel
const PIXEL_GIF: &[u8] = &[
    0x47, 0x49, 0x46, 0x38, 0x39, 0x61, 0x01, 0x00, 0x01, 0x00, 0x80, 0x00, 0x00, 0x00, 0x00,
    0x00, 0xff, 0xff, 0xff, 0x21, 0xf9, 0x04, 0x01, 0x00, 0x00, 0x00, 0x00, 0x2c, 0x00, 0x00,
    0x00, 0x00, 0x01, 0x00, 0x01, 0x00, 0x00, 0x02, 0x02, 0x44, 0x01, 0x00, 0x3b,
];

fn client_meta(headers: &HeaderMap) -> (Option<String>, Option<String>) {
    let user_agent = headers
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    // First hop in X-Forwarded-For is the client
    let ip_address = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|v| v.trim().to_string());

    (user_agent, ip_address)
}

/// Mail clients request the pixel with or without the .gif suffix
fn strip_gif_suffix(tracking_id: &str) -> &str {
    tracking_id.strip_suffix(".gif").unwrap_or(tracking_id)
}

/// Open-tracking pixel
///
/// GET /t/open/:tracking_id
pub async fn track_open(
    State(state): State<Arc<AppState>>,
    Path(tracking_id): Path<String>,
    headers: HeaderMap,
) -> Response {
    let tracking_id = strip_gif_suffix(&tracking_id).to_string();
    let (user_agent, ip_address) = client_meta(&headers);

    let processor = state.processor.clone();
    tokio::spawn(async move {
        if let Err(e) = processor
            .record_open(&tracking_id, user_agent.as_deref(), ip_address.as_deref())
            .await
        {
            error!(%tracking_id, "Failed to record open: {}", e);
        }
    });

    (
        [
            (header::CONTENT_TYPE, "image/gif"),
            (header::CACHE_CONTROL, "no-store, no-cache, must-revalidate"),
        ],
        PIXEL_GIF,
    )
        .into_response()
}

/// Click-tracking redirect
///
/// GET /t/click/:tracking_id/:encoded_url
pub async fn track_click(
    State(state): State<Arc<AppState>>,
    Path((tracking_id, encoded_url)): Path<(String, String)>,
    headers: HeaderMap,
) -> Redirect {
    let destination = decode_click_url(&encoded_url).unwrap_or_default();
    let (user_agent, ip_address) = client_meta(&headers);

    if !destination.is_empty() {
        let processor = state.processor.clone();
        let link_url = destination.clone();
        tokio::spawn(async move {
            if let Err(e) = processor
                .record_click(
                    &tracking_id,
                    &link_url,
                    user_agent.as_deref(),
                    ip_address.as_deref(),
                )
                .await
            {
                error!(%tracking_id, "Failed to record click: {}", e);
            }
        });
    }

    if destination.is_empty() {
        Redirect::temporary("/")
    } else {
        Redirect::temporary(&destination)
    }
}

/// Unsubscribe form fields
#[derive(Debug, Deserialize)]
pub struct UnsubscribeForm {
    pub reason: Option<String>,
}

fn page(title: &str, body: &str) -> Html<String> {
    Html(format!(
        concat!(
            "<!DOCTYPE html><html><head><meta charset=\"utf-8\">",
            "<title>{}</title>",
            "<style>body{{font-family:sans-serif;max-width:480px;",
            "margin:80px auto;text-align:center;color:#333;}}",
            "button{{padding:10px 24px;font-size:16px;cursor:pointer;}}",
            "</style></head><body><h2>{}</h2>{}</body></html>"
        ),
        title, title, body
    ))
}

fn confirm_page(token: &str) -> Html<String> {
    page(
        "Unsubscribe",
        &format!(
            concat!(
                "<p>Click below to stop receiving these emails.</p>",
                "<form method=\"post\" action=\"/unsubscribe/{}\">",
                "<button type=\"submit\">Unsubscribe</button></form>"
            ),
            token
        ),
    )
}

fn done_page() -> Html<String> {
    page(
        "Unsubscribed",
        "<p>You have been unsubscribed and will not receive further emails.</p>",
    )
}

fn already_page() -> Html<String> {
    page(
        "Already unsubscribed",
        "<p>This address was already unsubscribed. No further action is needed.</p>",
    )
}

fn invalid_page() -> Html<String> {
    page(
        "Invalid link",
        "<p>This unsubscribe link is not valid. It may have been truncated by your mail client.</p>",
    )
}

/// Unsubscribe confirmation page
///
/// GET /unsubscribe/:token
pub async fn unsubscribe_page(
    State(state): State<Arc<AppState>>,
    Path(token): Path<String>,
) -> Response {
    let pool = state.db_pool.pool().clone();
    let repo = mailsurge_storage::repository::UnsubscribeTokenRepository::new(pool);

    match repo.get(&token).await {
        Ok(Some(t)) if t.is_used() => already_page().into_response(),
        Ok(Some(_)) => confirm_page(&token).into_response(),
        Ok(None) => (StatusCode::NOT_FOUND, invalid_page()).into_response(),
        Err(e) => {
            error!("Failed to look up unsubscribe token: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                page("Error", "<p>Something went wrong. Please try again later.</p>"),
            )
                .into_response()
        }
    }
}

/// Perform the unsubscribe
///
/// POST /unsubscribe/:token
pub async fn unsubscribe_submit(
    State(state): State<Arc<AppState>>,
    Path(token): Path<String>,
    Form(form): Form<UnsubscribeForm>,
) -> Response {
    let reason = form
        .reason
        .as_deref()
        .map(str::trim)
        .filter(|r| !r.is_empty());

    match state.processor.process_unsubscribe(&token, reason).await {
        Ok(UnsubscribeOutcome::Confirmed) => done_page().into_response(),
        Ok(UnsubscribeOutcome::AlreadyUnsubscribed) => already_page().into_response(),
        Ok(UnsubscribeOutcome::InvalidToken) => {
            (StatusCode::NOT_FOUND, invalid_page()).into_response()
        }
        Err(e) => {
            error!("Failed to process unsubscribe: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                page("Error", "<p>Something went wrong. Please try again later.</p>"),
            )
                .into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_pixel_is_valid_gif() {
        assert_eq!(&PIXEL_GIF[..6], b"GIF89a");
        assert_eq!(PIXEL_GIF.len(), 43);
        assert_eq!(PIXEL_GIF[PIXEL_GIF.len() - 1], 0x3b);
    }

    #[test]
    fn test_strip_gif_suffix() {
        assert_eq!(strip_gif_suffix("abc123.gif"), "abc123");
        assert_eq!(strip_gif_suffix("abc123"), "abc123");
    }

    #[test]
    fn test_client_meta() {
        let mut headers = HeaderMap::new();
        headers.insert(header::USER_AGENT, "TestMail/1.0".parse().unwrap());
        headers.insert("x-forwarded-for", "10.1.2.3, 172.16.0.1".parse().unwrap());

        let (ua, ip) = client_meta(&headers);
        assert_eq!(ua.as_deref(), Some("TestMail/1.0"));
        assert_eq!(ip.as_deref(), Some("10.1.2.3"));
    }
}
