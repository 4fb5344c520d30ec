//! Repository layer for data access

pub mod campaigns;
pub mod contacts;
pub mod events;
pub mod messages;
pub mod recipients;
pub mod unsubscribe_tokens;

pub use campaigns::CampaignRepository;
pub use contacts::ContactRepository;
pub use events::EventRepository;
pub use messages::MessageRepository;
pub use recipients::RecipientRepository;
pub use unsubscribe_tokens::UnsubscribeTokenRepository;
