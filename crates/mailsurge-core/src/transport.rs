//! Transport gateway - hands rendered messages to the email provider

use async_trait::async_trait;
use lettre::{
    message::{header::ContentType, Mailbox, MultiPart, SinglePart},
    transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Message as EmailMessage, Tokio1Executor,
};
use mailsurge_common::config::TransportConfig;
use mailsurge_common::{Error, Result};
use std::time::Duration;
use tracing::debug;

/// Outcome of a single send attempt
#[derive(Debug, Clone)]
pub enum SendOutcome {
    /// Accepted by the provider
    Accepted { provider_message_id: Option<String> },
    /// Rejected in a way worth retrying
    TemporaryFailure { error: String },
    /// Rejected permanently
    PermanentFailure { error: String },
}

/// A rendered message ready for handoff
#[derive(Debug, Clone)]
pub struct OutboundEmail {
    pub from_name: String,
    pub from_email: String,
    pub reply_to: Option<String>,
    pub to_email: String,
    pub to_name: Option<String>,
    pub subject: String,
    pub html_body: String,
    pub text_body: Option<String>,
}

/// Gateway to the sending provider
#[async_trait]
pub trait TransportGateway: Send + Sync {
    /// Attempt to send one message
    async fn send(&self, email: &OutboundEmail) -> SendOutcome;
}

/// SMTP implementation backed by lettre
pub struct SmtpGateway {
    mailer: AsyncSmtpTransport<Tokio1Executor>,
}

impl SmtpGateway {
    /// Build the gateway from transport configuration
    pub fn new(config: &TransportConfig) -> Result<Self> {
        let builder = if config.use_starttls {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host)
                .map_err(|e| Error::Transport(format!("Failed to create SMTP transport: {}", e)))?
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&config.host)
        };

        let mut builder = builder.port(config.port);

        if let (Some(username), Some(password)) = (&config.username, &config.password) {
            builder = builder.credentials(Credentials::new(username.clone(), password.clone()));
        }

        let mailer = builder
            .timeout(Some(Duration::from_secs(config.timeout_secs)))
            .build();

        Ok(Self { mailer })
    }

    fn build_message(email: &OutboundEmail) -> std::result::Result<EmailMessage, String> {
        let from: Mailbox = format!("{} <{}>", email.from_name, email.from_email)
            .parse()
            .map_err(|e| format!("Invalid from address: {}", e))?;

        let to: Mailbox = match &email.to_name {
            Some(name) => format!("{} <{}>", name, email.to_email),
            None => email.to_email.clone(),
        }
        .parse()
        .map_err(|e| format!("Invalid to address: {}", e))?;

        let mut builder = EmailMessage::builder()
            .from(from)
            .to(to)
            .subject(&email.subject);

        if let Some(reply_to) = &email.reply_to {
            let reply_to: Mailbox = reply_to
                .parse()
                .map_err(|e| format!("Invalid reply-to address: {}", e))?;
            builder = builder.reply_to(reply_to);
        }

        let message = match &email.text_body {
            Some(text) => builder.multipart(
                MultiPart::alternative()
                    .singlepart(SinglePart::plain(text.clone()))
                    .singlepart(SinglePart::html(email.html_body.clone())),
            ),
            None => builder
                .header(ContentType::TEXT_HTML)
                .body(email.html_body.clone()),
        };

        message.map_err(|e| format!("Failed to build email: {}", e))
    }

    fn classify_error(error: String) -> SendOutcome {
        // 5xx rejections and unknown-user responses will not succeed
        // on retry
        if error.contains("5.1.1")
            || error.contains("550")
            || error.contains("User unknown")
            || error.contains("does not exist")
        {
            SendOutcome::PermanentFailure { error }
        } else {
            SendOutcome::TemporaryFailure { error }
        }
    }
}

#[async_trait]
impl TransportGateway for SmtpGateway {
    async fn send(&self, email: &OutboundEmail) -> SendOutcome {
        let message = match Self::build_message(email) {
            Ok(m) => m,
            Err(error) => return SendOutcome::PermanentFailure { error },
        };

        match self.mailer.send(message).await {
            Ok(response) => {
                debug!(to = %email.to_email, "Message accepted by provider");
                // The provider echoes its queue ID in the response; keep
                // it for correlating delivery callbacks.
                let provider_message_id = response
                    .message()
                    .next()
                    .map(|line| line.trim().to_string())
                    .filter(|s| !s.is_empty());
                SendOutcome::Accepted { provider_message_id }
            }
            Err(e) => Self::classify_error(e.to_string()),
        }
    }
}

#[cfg(test)]
pub mod mock {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Scriptable gateway for tests
    pub struct MockGateway {
        outcomes: Mutex<Vec<SendOutcome>>,
        sent: AtomicUsize,
    }

    impl MockGateway {
        /// Accepts everything
        pub fn accepting() -> Self {
            Self {
                outcomes: Mutex::new(Vec::new()),
                sent: AtomicUsize::new(0),
            }
        }

        /// Returns the scripted outcomes in order, then accepts
        pub fn scripted(outcomes: Vec<SendOutcome>) -> Self {
            Self {
                outcomes: Mutex::new(outcomes),
                sent: AtomicUsize::new(0),
            }
        }

        pub fn sent_count(&self) -> usize {
            self.sent.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl TransportGateway for MockGateway {
        async fn send(&self, _email: &OutboundEmail) -> SendOutcome {
            self.sent.fetch_add(1, Ordering::SeqCst);
            let mut outcomes = self.outcomes.lock().unwrap();
            if outcomes.is_empty() {
                SendOutcome::Accepted {
                    provider_message_id: Some(format!(
                        "mock-{}",
                        self.sent.load(Ordering::SeqCst)
                    )),
                }
            } else {
                outcomes.remove(0)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_classify_permanent() {
        let outcome = SmtpGateway::classify_error("550 5.1.1 User unknown".to_string());
        assert!(matches!(outcome, SendOutcome::PermanentFailure { .. }));
    }

    #[test]
    fn test_classify_temporary() {
        let outcome = SmtpGateway::classify_error("451 try again later".to_string());
        assert!(matches!(outcome, SendOutcome::TemporaryFailure { .. }));
    }

    #[test]
    fn test_build_message() {
        let email = OutboundEmail {
            from_name: "Acme".to_string(),
            from_email: "news@acme.test".to_string(),
            reply_to: Some("support@acme.test".to_string()),
            to_email: "jane@example.com".to_string(),
            to_name: Some("Jane Doe".to_string()),
            subject: "Hello".to_string(),
            html_body: "<p>Hi</p>".to_string(),
            text_body: Some("Hi".to_string()),
        };

        assert!(SmtpGateway::build_message(&email).is_ok());
    }

    #[tokio::test]
    async fn test_mock_gateway_scripted_then_accepting() {
        let gateway = mock::MockGateway::scripted(vec![SendOutcome::TemporaryFailure {
            error: "451 greylisted".to_string(),
        }]);
        let email = OutboundEmail {
            from_name: "Acme".to_string(),
            from_email: "news@acme.test".to_string(),
            reply_to: None,
            to_email: "jane@example.com".to_string(),
            to_name: None,
            subject: "Hello".to_string(),
            html_body: "<p>Hi</p>".to_string(),
            text_body: None,
        };

        assert!(matches!(
            gateway.send(&email).await,
            SendOutcome::TemporaryFailure { .. }
        ));
        assert!(matches!(
            gateway.send(&email).await,
            SendOutcome::Accepted { .. }
        ));
        assert_eq!(gateway.sent_count(), 2);
    }

    #[test]
    fn test_build_message_bad_address() {
        let email = OutboundEmail {
            from_name: "Acme".to_string(),
            from_email: "not an email".to_string(),
            reply_to: None,
            to_email: "jane@example.com".to_string(),
            to_name: None,
            subject: "Hello".to_string(),
            html_body: "<p>Hi</p>".to_string(),
            text_body: None,
        };

        let err = SmtpGateway::build_message(&email).unwrap_err();
        assert_eq!(err.contains("from address"), true);
    }
}
