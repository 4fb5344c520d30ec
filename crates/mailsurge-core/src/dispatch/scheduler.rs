//! Sweep worker - periodic campaign housekeeping
//!
//! Promotes scheduled campaigns whose time has come, re-enqueues work
//! left in flight by a restart, and closes out finished campaigns.

use std::sync::Arc;
use tokio::time::{interval, Duration};
use tracing::{error, info};

use super::manager::CampaignManager;

/// Periodic sweep over campaign state
pub struct SweepWorker {
    manager: Arc<CampaignManager>,
    interval_secs: u64,
}

impl SweepWorker {
    /// Create a new sweep worker
    pub fn new(manager: Arc<CampaignManager>, interval_secs: u64) -> Self {
        Self {
            manager,
            interval_secs,
        }
    }

    /// Run the sweep loop forever
    pub async fn run(&self) {
        let mut ticker = interval(Duration::from_secs(self.interval_secs));

        info!(interval_secs = self.interval_secs, "Sweep worker started");

        // First tick recovers anything that was mid-dispatch at the
        // last shutdown
        ticker.tick().await;
        match self.manager.recover_in_flight().await {
            Ok(0) => {}
            Ok(n) => info!(batches = n, "Recovered in-flight batches"),
            Err(e) => error!("Failed to recover in-flight batches: {}", e),
        }

        loop {
            self.sweep_once().await;
            ticker.tick().await;
        }
    }

    async fn sweep_once(&self) {
        match self.manager.start_due_campaigns().await {
            Ok(0) => {}
            Ok(n) => info!(campaigns = n, "Started scheduled campaigns"),
            Err(e) => error!("Failed to start scheduled campaigns: {}", e),
        }

        if let Err(e) = self.manager.check_completions().await {
            error!("Failed to check campaign completions: {}", e);
        }
    }
}
