//! API routes

use axum::{
    routing::{delete, get, post, put},
    Router,
};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::handlers::{campaigns, health, messages, tracking, webhooks};
use crate::state::AppState;

/// Create the API router
pub fn create_router(state: Arc<AppState>) -> Router {
    // Health check routes
    let health_routes = Router::new()
        .route("/", get(health::health))
        .route("/ready", get(health::readiness));

    // Campaign routes
    let campaign_routes = Router::new()
        .route("/", get(campaigns::list_campaigns))
        .route("/", post(campaigns::create_campaign))
        .route("/:campaign_id", get(campaigns::get_campaign))
        .route("/:campaign_id", put(campaigns::update_campaign))
        .route("/:campaign_id", delete(campaigns::delete_campaign))
        .route("/:campaign_id/recipients", get(campaigns::list_recipients))
        .route("/:campaign_id/recipients", post(campaigns::add_recipients))
        .route("/:campaign_id/send", post(campaigns::send_campaign))
        .route("/:campaign_id/schedule", post(campaigns::schedule_campaign))
        .route("/:campaign_id/pause", post(campaigns::pause_campaign))
        .route("/:campaign_id/resume", post(campaigns::resume_campaign))
        .route("/:campaign_id/cancel", post(campaigns::cancel_campaign))
        .route("/:campaign_id/stats", get(campaigns::get_campaign_stats))
        .route(
            "/:campaign_id/messages",
            get(messages::list_campaign_messages),
        )
        .route(
            "/:campaign_id/messages/:message_id/events",
            get(messages::list_message_events),
        );

    // Public endpoints hit by mail clients and recipients
    let tracking_routes = Router::new()
        .route("/t/open/:tracking_id", get(tracking::track_open))
        .route(
            "/t/click/:tracking_id/:encoded_url",
            get(tracking::track_click),
        )
        .route("/unsubscribe/:token", get(tracking::unsubscribe_page))
        .route("/unsubscribe/:token", post(tracking::unsubscribe_submit))
        .layer(CorsLayer::permissive());

    Router::new()
        .nest("/health", health_routes)
        .nest("/api/v1/campaigns", campaign_routes)
        .route("/webhooks/provider", post(webhooks::provider_callback))
        .merge(tracking_routes)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
