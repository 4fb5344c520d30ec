//! Campaign dispatch: lifecycle, batching, pacing, rendering

pub mod dispatcher;
pub mod manager;
pub mod rate_limiter;
pub mod render;
pub mod scheduler;

pub use dispatcher::BatchDispatcher;
pub use manager::{CampaignError, CampaignManager, CampaignStats};
pub use rate_limiter::SendRateLimiter;
pub use render::ContentRenderer;
pub use scheduler::SweepWorker;
