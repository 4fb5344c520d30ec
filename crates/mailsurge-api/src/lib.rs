//! Mailsurge API - HTTP surface for campaign management, provider
//! callbacks, and recipient-facing tracking endpoints

pub mod handlers;
pub mod routes;
pub mod state;

pub use routes::create_router;
pub use state::AppState;
