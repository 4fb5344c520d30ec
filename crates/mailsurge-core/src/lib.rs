//! Mailsurge Core - campaign dispatch and delivery feedback engine
//!
//! Dispatch takes a queued campaign through batched, rate-limited
//! sending; events applies provider callbacks and recipient tracking
//! hits back onto messages, campaigns, and contacts.

pub mod dispatch;
pub mod events;
pub mod transport;

pub use dispatch::{
    BatchDispatcher, CampaignError, CampaignManager, CampaignStats, SendRateLimiter, SweepWorker,
};
pub use events::{EventProcessor, ProviderCallback, UnsubscribeOutcome};
pub use transport::{OutboundEmail, SendOutcome, SmtpGateway, TransportGateway};
