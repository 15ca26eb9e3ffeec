//! Automatic replies to senders.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, info, warn};

use super::{MailSender, Template};
use crate::error::MailError;
use crate::message::{MailAddress, Message};
use crate::ticketing::Request;
use crate::topology::{Desk, Installation};

/// Sends the "request created" and "wrong address" replies.
pub struct Replies {
    mailer: Arc<dyn MailSender>,
    send_emails: bool,
}

impl Replies {
    pub fn new(mailer: Arc<dyn MailSender>, send_emails: bool) -> Self {
        Self {
            mailer,
            send_emails,
        }
    }

    /// Confirm a new request to its sender.
    pub async fn request_created(
        &self,
        installation: &Installation,
        desk: &Desk,
        message: &Message,
        request: &Request,
    ) -> Result<(), MailError> {
        if !self.send_emails {
            debug!(key = %request.key, "send_emails is off, no confirmation");
            return Ok(());
        }
        let mut values = base_values(installation, message);
        values.insert("request.key", request.key.clone());
        values.insert("request.portal_link", request.portal_link.clone());
        values.insert("request.status", request.status.clone());
        values.insert("desk.project_key", desk.project_key.clone());

        let subject = format!("{} {}", request.key, message.subject);
        info!(key = %request.key, to = %message.from, "Sending request created reply");
        self.reply(
            desk.creation_template.as_ref(),
            desk.reply_address.as_ref(),
            message,
            &subject,
            &values,
        )
        .await
    }

    /// Tell the sender that an installation address cannot open requests.
    pub async fn wrong_address(
        &self,
        installation: &Installation,
        message: &Message,
    ) -> Result<(), MailError> {
        if !self.send_emails {
            debug!(url = %installation.url, "send_emails is off, no rejection");
            return Ok(());
        }
        let values = base_values(installation, message);
        let subject = format!("{} {}", installation.rejected_mail_subject, message.subject);
        info!(url = %installation.url, to = %message.from, "Sending wrong address reply");
        self.reply(
            installation.rejected_mail_template.as_ref(),
            installation.reply_address.as_ref(),
            message,
            &subject,
            &values,
        )
        .await
    }

    async fn reply(
        &self,
        template: Option<&Template>,
        from: Option<&MailAddress>,
        message: &Message,
        subject: &str,
        values: &HashMap<&str, String>,
    ) -> Result<(), MailError> {
        let (Some(template), Some(from)) = (template, from) else {
            warn!(subject, "No template or reply address, reply skipped");
            return Ok(());
        };
        let body = format!("{}\n{}", template.render(values)?, message.quoted_body());
        self.mailer.send(from, &message.from, subject, &body).await
    }
}

fn base_values(installation: &Installation, message: &Message) -> HashMap<&'static str, String> {
    HashMap::from([
        ("installation.url", installation.url.clone()),
        ("sender.name", message.from.name.clone()),
        ("sender.address", message.from.address.clone()),
        ("subject", message.subject.clone()),
    ])
}
