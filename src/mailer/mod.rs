//! Outbound mail: the sender trait, the SMTP implementation, reply
//! templates and critical-error reports.

pub mod critical;
pub mod replies;
pub mod template;

use async_trait::async_trait;
use lettre::message::header::{ContentType, Header, HeaderName, HeaderValue};
use lettre::message::Mailbox;
use lettre::{SmtpTransport, Transport};
use tracing::info;

use crate::error::MailError;
use crate::message::MailAddress;

pub use critical::CriticalReporter;
pub use replies::Replies;
pub use template::Template;

#[async_trait]
pub trait MailSender: Send + Sync {
    async fn send(
        &self,
        from: &MailAddress,
        to: &MailAddress,
        subject: &str,
        body: &str,
    ) -> Result<(), MailError>;
}

/// `Auto-Submitted` header, marks every outgoing mail as machine generated.
#[derive(Debug, Clone)]
struct AutoSubmitted(String);

impl Header for AutoSubmitted {
    fn name() -> HeaderName {
        HeaderName::new_from_ascii_str("Auto-Submitted")
    }

    fn parse(s: &str) -> Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        Ok(Self(s.to_string()))
    }

    fn display(&self) -> HeaderValue {
        HeaderValue::new(Self::name(), self.0.clone())
    }
}

/// Unauthenticated SMTP relay.
pub struct SmtpMailer {
    host: String,
    port: u16,
}

impl SmtpMailer {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

fn mailbox(address: &MailAddress) -> Result<Mailbox, MailError> {
    let parsed = address
        .address
        .parse()
        .map_err(|e: lettre::address::AddressError| MailError::InvalidAddress {
            address: address.address.clone(),
            reason: e.to_string(),
        })?;
    let name = (!address.name.is_empty()).then(|| address.name.clone());
    Ok(Mailbox::new(name, parsed))
}

/// Build the outgoing message; split out for tests.
fn build_message(
    from: &MailAddress,
    to: &MailAddress,
    subject: &str,
    body: &str,
) -> Result<lettre::Message, MailError> {
    lettre::Message::builder()
        .from(mailbox(from)?)
        .to(mailbox(to)?)
        .subject(subject)
        .header(AutoSubmitted("auto-generated".into()))
        .header(ContentType::TEXT_PLAIN)
        .body(body.to_string())
        .map_err(|e| MailError::Build(e.to_string()))
}

#[async_trait]
impl MailSender for SmtpMailer {
    async fn send(
        &self,
        from: &MailAddress,
        to: &MailAddress,
        subject: &str,
        body: &str,
    ) -> Result<(), MailError> {
        let email = build_message(from, to, subject, body)?;
        info!(from = %from, to = %to, subject, "Sending mail");

        let host = self.host.clone();
        let port = self.port;
        tokio::task::spawn_blocking(move || {
            let transport = SmtpTransport::builder_dangerous(&host).port(port).build();
            transport
                .send(&email)
                .map(|_| ())
                .map_err(|e| MailError::SendFailed {
                    host: host.clone(),
                    reason: e.to_string(),
                })
        })
        .await
        .map_err(|e| MailError::SendFailed {
            host: self.host.clone(),
            reason: format!("send task failed: {e}"),
        })?
    }
}
