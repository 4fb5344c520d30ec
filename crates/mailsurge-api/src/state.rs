//! Shared application state

use mailsurge_core::{CampaignManager, EventProcessor};
use mailsurge_storage::DatabasePool;
use std::sync::Arc;

/// State shared by all handlers
pub struct AppState {
    pub db_pool: DatabasePool,
    pub manager: Arc<CampaignManager>,
    pub processor: EventProcessor,
}
