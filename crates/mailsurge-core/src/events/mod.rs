//! Delivery feedback: provider callbacks, tracking hits, unsubscribes

pub mod payload;
pub mod processor;

pub use payload::{
    parse_callback, DeliveryNotification, NotificationKind, PayloadError, ProviderCallback,
};
pub use processor::{EventProcessor, UnsubscribeOutcome};
