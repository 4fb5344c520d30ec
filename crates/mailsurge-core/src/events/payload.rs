//! Provider callback payloads
//!
//! The provider posts an SNS-style envelope whose Message field is a
//! JSON string carrying the actual notification. The shapes are
//! duck-typed upstream, so everything optional here is genuinely
//! optional on the wire.

use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

/// Raw envelope as posted to the webhook
#[derive(Debug, Clone, Deserialize)]
pub struct CallbackEnvelope {
    #[serde(rename = "Type")]
    pub kind: Option<String>,
    #[serde(rename = "Message")]
    pub message: Option<String>,
    #[serde(rename = "SubscribeURL")]
    pub subscribe_url: Option<String>,
    #[serde(rename = "TopicArn")]
    pub topic_arn: Option<String>,
}

/// Notification categories the processor understands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationKind {
    Bounce,
    Complaint,
    Delivery,
    Send,
}

impl NotificationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            NotificationKind::Bounce => "bounce",
            NotificationKind::Complaint => "complaint",
            NotificationKind::Delivery => "delivery",
            NotificationKind::Send => "send",
        }
    }
}

/// Parsed callback, ready for the processor
#[derive(Debug, Clone)]
pub enum ProviderCallback {
    /// Endpoint verification handshake; confirm and move on
    SubscriptionConfirmation { subscribe_url: Option<String> },
    /// A delivery-lifecycle notification for one message
    Notification(DeliveryNotification),
}

/// One delivery-lifecycle notification
#[derive(Debug, Clone)]
pub struct DeliveryNotification {
    pub kind: NotificationKind,
    /// The provider's ID for the message, from mail.messageId
    pub provider_message_id: String,
    /// Raw bounceType value for bounces (Permanent, Transient, ...)
    pub bounce_type: Option<String>,
    pub bounce_subtype: Option<String>,
    /// Feedback type for complaints (abuse, fraud, ...)
    pub complaint_type: Option<String>,
    /// Full inner payload, kept for the audit log
    pub payload: Value,
}

impl DeliveryNotification {
    /// Hard bounces come from Permanent rejections; everything else is
    /// treated as soft and leaves the contact sendable
    pub fn is_hard_bounce(&self) -> bool {
        self.kind == NotificationKind::Bounce
            && self
                .bounce_type
                .as_deref()
                .is_some_and(|t| t.eq_ignore_ascii_case("permanent"))
    }
}

/// Payload parse failures
#[derive(Debug, Error)]
pub enum PayloadError {
    #[error("Invalid envelope: {0}")]
    InvalidEnvelope(String),

    #[error("Invalid notification message: {0}")]
    InvalidMessage(String),

    #[error("Unknown notification type: {0}")]
    UnknownType(String),

    #[error("Notification has no message ID")]
    MissingMessageId,
}

impl PayloadError {
    /// True only when the body was not JSON at all. A well-formed
    /// callback we cannot use (unknown type, missing message ID) must
    /// be acknowledged anyway, or the provider redelivers it forever.
    pub fn is_malformed_body(&self) -> bool {
        matches!(self, PayloadError::InvalidEnvelope(_))
    }
}

/// Parse a webhook body into a callback.
/// A body that is already a bare notification (no envelope) is
/// accepted too, since some provider configurations post raw JSON.
pub fn parse_callback(body: &str) -> Result<ProviderCallback, PayloadError> {
    let envelope: CallbackEnvelope = serde_json::from_str(body)
        .map_err(|e| PayloadError::InvalidEnvelope(e.to_string()))?;

    match envelope.kind.as_deref() {
        Some("SubscriptionConfirmation") => Ok(ProviderCallback::SubscriptionConfirmation {
            subscribe_url: envelope.subscribe_url,
        }),
        Some("Notification") => {
            let inner = envelope
                .message
                .ok_or_else(|| PayloadError::InvalidMessage("missing Message".to_string()))?;
            parse_notification(&inner).map(ProviderCallback::Notification)
        }
        // No envelope type: treat the body as a bare notification
        None => parse_notification(body).map(ProviderCallback::Notification),
        Some(other) => Err(PayloadError::UnknownType(other.to_string())),
    }
}

fn parse_notification(message: &str) -> Result<DeliveryNotification, PayloadError> {
    let payload: Value = serde_json::from_str(message)
        .map_err(|e| PayloadError::InvalidMessage(e.to_string()))?;

    // Some configurations use notificationType, newer ones eventType
    let type_str = payload
        .get("notificationType")
        .or_else(|| payload.get("eventType"))
        .and_then(Value::as_str)
        .ok_or_else(|| PayloadError::InvalidMessage("missing notification type".to_string()))?;

    let kind = match type_str.to_lowercase().as_str() {
        "bounce" => NotificationKind::Bounce,
        "complaint" => NotificationKind::Complaint,
        "delivery" => NotificationKind::Delivery,
        "send" => NotificationKind::Send,
        other => return Err(PayloadError::UnknownType(other.to_string())),
    };

    let provider_message_id = payload
        .pointer("/mail/messageId")
        .and_then(Value::as_str)
        .ok_or(PayloadError::MissingMessageId)?
        .to_string();

    let bounce_type = payload
        .pointer("/bounce/bounceType")
        .and_then(Value::as_str)
        .map(str::to_string);
    let bounce_subtype = payload
        .pointer("/bounce/bounceSubType")
        .and_then(Value::as_str)
        .map(str::to_string);
    let complaint_type = payload
        .pointer("/complaint/complaintFeedbackType")
        .and_then(Value::as_str)
        .map(str::to_string);

    Ok(DeliveryNotification {
        kind,
        provider_message_id,
        bounce_type,
        bounce_subtype,
        complaint_type,
        payload,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn envelope(message: &str) -> String {
        serde_json::json!({
            "Type": "Notification",
            "TopicArn": "arn:aws:sns:us-east-1:123:deliveries",
            "Message": message,
        })
        .to_string()
    }

    #[test]
    fn test_parse_subscription_confirmation() {
        let body = serde_json::json!({
            "Type": "SubscriptionConfirmation",
            "SubscribeURL": "https://sns.example.com/confirm?token=abc",
        })
        .to_string();

        match parse_callback(&body).unwrap() {
            ProviderCallback::SubscriptionConfirmation { subscribe_url } => {
                assert_eq!(
                    subscribe_url.as_deref(),
                    Some("https://sns.example.com/confirm?token=abc")
                );
            }
            other => panic!("unexpected callback: {:?}", other),
        }
    }

    #[test]
    fn test_parse_hard_bounce() {
        let inner = serde_json::json!({
            "notificationType": "Bounce",
            "bounce": {
                "bounceType": "Permanent",
                "bounceSubType": "General",
                "bouncedRecipients": [{"emailAddress": "gone@example.com"}]
            },
            "mail": {"messageId": "msg-123"}
        })
        .to_string();

        match parse_callback(&envelope(&inner)).unwrap() {
            ProviderCallback::Notification(n) => {
                assert_eq!(n.kind, NotificationKind::Bounce);
                assert_eq!(n.provider_message_id, "msg-123");
                assert!(n.is_hard_bounce());
                assert_eq!(n.bounce_subtype.as_deref(), Some("General"));
            }
            other => panic!("unexpected callback: {:?}", other),
        }
    }

    #[test]
    fn test_transient_bounce_is_soft() {
        let inner = serde_json::json!({
            "notificationType": "Bounce",
            "bounce": {"bounceType": "Transient"},
            "mail": {"messageId": "msg-9"}
        })
        .to_string();

        match parse_callback(&envelope(&inner)).unwrap() {
            ProviderCallback::Notification(n) => assert!(!n.is_hard_bounce()),
            other => panic!("unexpected callback: {:?}", other),
        }
    }

    #[test]
    fn test_parse_complaint() {
        let inner = serde_json::json!({
            "notificationType": "Complaint",
            "complaint": {"complaintFeedbackType": "abuse"},
            "mail": {"messageId": "msg-7"}
        })
        .to_string();

        match parse_callback(&envelope(&inner)).unwrap() {
            ProviderCallback::Notification(n) => {
                assert_eq!(n.kind, NotificationKind::Complaint);
                assert_eq!(n.complaint_type.as_deref(), Some("abuse"));
            }
            other => panic!("unexpected callback: {:?}", other),
        }
    }

    #[test]
    fn test_parse_delivery_with_event_type() {
        let inner = serde_json::json!({
            "eventType": "Delivery",
            "mail": {"messageId": "msg-del"}
        })
        .to_string();

        match parse_callback(&envelope(&inner)).unwrap() {
            ProviderCallback::Notification(n) => {
                assert_eq!(n.kind, NotificationKind::Delivery);
            }
            other => panic!("unexpected callback: {:?}", other),
        }
    }

    #[test]
    fn test_parse_bare_notification_without_envelope() {
        let body = serde_json::json!({
            "notificationType": "Send",
            "mail": {"messageId": "msg-raw"}
        })
        .to_string();

        match parse_callback(&body).unwrap() {
            ProviderCallback::Notification(n) => {
                assert_eq!(n.kind, NotificationKind::Send);
                assert_eq!(n.provider_message_id, "msg-raw");
            }
            other => panic!("unexpected callback: {:?}", other),
        }
    }

    #[test]
    fn test_parse_failures() {
        assert!(matches!(
            parse_callback("not json"),
            Err(PayloadError::InvalidEnvelope(_))
        ));

        let no_id = serde_json::json!({"notificationType": "Delivery"}).to_string();
        assert!(matches!(
            parse_callback(&envelope(&no_id)),
            Err(PayloadError::MissingMessageId)
        ));

        let unknown = serde_json::json!({
            "notificationType": "Rendered",
            "mail": {"messageId": "x"}
        })
        .to_string();
        assert!(matches!(
            parse_callback(&envelope(&unknown)),
            Err(PayloadError::UnknownType(_))
        ));
    }

    #[test]
    fn test_only_non_json_counts_as_malformed() {
        // Only a non-JSON body may be rejected back to the provider;
        // anything it could legitimately post has to be acknowledged
        assert!(parse_callback("not json").unwrap_err().is_malformed_body());

        let reject = serde_json::json!({
            "notificationType": "Reject",
            "mail": {"messageId": "msg-rej"}
        })
        .to_string();
        assert!(!parse_callback(&envelope(&reject))
            .unwrap_err()
            .is_malformed_body());

        let no_id = serde_json::json!({"eventType": "Delivery"}).to_string();
        assert!(!parse_callback(&envelope(&no_id))
            .unwrap_err()
            .is_malformed_body());
    }
}
