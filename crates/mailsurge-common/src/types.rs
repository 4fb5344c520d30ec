//! Common types for Mailsurge

use uuid::Uuid;

/// Unique identifier for organizations
pub type OrgId = Uuid;

/// Unique identifier for campaigns
pub type CampaignId = Uuid;

/// Unique identifier for contacts
pub type ContactId = Uuid;

/// Unique identifier for campaign recipients
pub type RecipientId = Uuid;

/// Unique identifier for messages
pub type MessageId = Uuid;

/// Unique identifier for message events
pub type EventId = Uuid;

/// Opaque per-message token embedded in pixel and click URLs.
///
/// Generated from two v4 UUIDs so it cannot be guessed from internal ids.
pub fn generate_tracking_id() -> String {
    format!(
        "{}{}",
        Uuid::new_v4().simple(),
        Uuid::new_v4().simple()
    )
}

/// Single-use unsubscribe token.
pub fn generate_unsubscribe_token() -> String {
    use std::fmt::Write;

    let mut token = String::with_capacity(64);
    for _ in 0..2 {
        let _ = write!(token, "{}", Uuid::new_v4().simple());
    }
    token
}

/// A dispatch unit: one batch of one campaign.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchUnit {
    pub campaign_id: CampaignId,
    pub batch_no: i32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_tracking_id_shape() {
        let id = generate_tracking_id();
        assert_eq!(id.len(), 64);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(id, generate_tracking_id());
    }

    #[test]
    fn test_unsubscribe_token_unique() {
        let a = generate_unsubscribe_token();
        let b = generate_unsubscribe_token();
        assert_eq!(a.len(), 64);
        assert_ne!(a, b);
    }
}
