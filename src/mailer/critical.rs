//! Critical error reports: always logged, mailed to an operator when
//! configured.

use std::error::Error as StdError;
use std::sync::Arc;

use chrono::Local;
use tracing::{error, info};

use super::MailSender;
use crate::message::MailAddress;

struct Recipient {
    mailer: Arc<dyn MailSender>,
    from: MailAddress,
    to: MailAddress,
}

pub struct CriticalReporter {
    recipient: Option<Recipient>,
}

impl CriticalReporter {
    /// Log only.
    pub fn log_only() -> Self {
        Self { recipient: None }
    }

    pub fn with_mail(mailer: Arc<dyn MailSender>, from: &str, to: &str) -> Self {
        Self {
            recipient: Some(Recipient {
                mailer,
                from: MailAddress::bare(from),
                to: MailAddress::bare(to),
            }),
        }
    }

    /// Report a failure together with its source chain.
    pub async fn report(&self, context: &str, err: &(dyn StdError + Send + Sync + 'static)) {
        let chain = error_chain(err);
        error!(context, error = %chain, "Critical error");
        self.mail(&format!("{context}\n\n{chain}")).await;
    }

    /// Informational notice, e.g. a restart.
    pub async fn notice(&self, text: &str) {
        info!(notice = text, "Operator notice");
        self.mail(text).await;
    }

    async fn mail(&self, body: &str) {
        let Some(recipient) = &self.recipient else {
            return;
        };
        let subject = format!("inbound-router error at {}", Local::now().to_rfc2822());
        if let Err(e) = recipient
            .mailer
            .send(&recipient.from, &recipient.to, &subject, body)
            .await
        {
            error!(error = %e, to = %recipient.to.address, "Failed to mail critical report");
        }
    }
}

fn error_chain(err: &(dyn StdError + 'static)) -> String {
    let mut out = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        out.push_str("\ncaused by: ");
        out.push_str(&cause.to_string());
        source = cause.source();
    }
    out
}
