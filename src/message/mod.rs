//! Structured inbound messages.
//!
//! A [`Message`] is built once from an inbound webhook payload (see
//! [`parse`]) and never mutated afterwards. Routing only ever reads it.

pub mod parse;

use std::fmt;

use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};

pub use parse::{InboundForm, parse_inbound};

/// A mailbox: display name plus address. Either part may be empty.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MailAddress {
    pub name: String,
    pub address: String,
}

impl MailAddress {
    pub fn new(name: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            address: address.into(),
        }
    }

    /// Address without a display name.
    pub fn bare(address: impl Into<String>) -> Self {
        Self::new("", address)
    }
}

impl fmt::Display for MailAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} <{}>", self.name, self.address)
    }
}

/// A file carried by a message or an event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Attachment {
    pub name: String,
    #[serde(skip_serializing)]
    pub bytes: Vec<u8>,
}

impl Attachment {
    pub fn new(name: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            bytes: bytes.into(),
        }
    }
}

/// A parsed inbound email.
#[derive(Debug, Clone, Serialize)]
pub struct Message {
    pub date: DateTime<FixedOffset>,
    /// Effective sender: header From, completed from the envelope.
    pub from: MailAddress,
    pub header_from: MailAddress,
    pub envelope_from: MailAddress,
    /// Header To plus the first envelope recipient.
    pub to: Vec<MailAddress>,
    pub cc: Vec<MailAddress>,
    pub bcc: Vec<MailAddress>,
    pub reply_to: Option<MailAddress>,
    pub subject: String,
    pub sender_ip: String,
    pub spam_score: f64,
    pub text_body: String,
    pub attachments: Vec<Attachment>,
    pub auto_reply: bool,
    pub malware: bool,
}

impl Message {
    /// Recipients in topology scan order: To, then Cc, then Bcc.
    pub fn recipients(&self) -> impl Iterator<Item = &MailAddress> + Clone {
        self.to.iter().chain(&self.cc).chain(&self.bcc)
    }

    /// Addresses considered for participant enrollment: Cc, then To, then Bcc.
    pub fn participant_candidates(&self) -> impl Iterator<Item = &MailAddress> {
        self.cc.iter().chain(&self.to).chain(&self.bcc)
    }

    /// Header summary included in request descriptions and logs.
    pub fn stats(&self) -> String {
        let mut out = format!(
            "At: {} ({})\n",
            self.date.format("%d.%m.%Y %H:%M:%S"),
            self.date.offset()
        );
        out.push_str(&format!("To: {}\n", join_addresses(&self.to)));
        out.push_str(&format!("From: {}\n", self.from));
        if let Some(reply_to) = &self.reply_to {
            out.push_str(&format!("Reply To: {reply_to}\n"));
        }
        if !self.cc.is_empty() {
            out.push_str(&format!("Cc: {}\n", join_addresses(&self.cc)));
        }
        if !self.bcc.is_empty() {
            out.push_str(&format!("Bcc: {}\n", join_addresses(&self.bcc)));
        }
        out.push_str(&format!("Subject: {}\n", self.subject));
        out.push_str(&format!("Spam Score: {:.6}\n", self.spam_score));
        out.push_str(&format!("Envelope From: {}\n", self.envelope_from));
        out.push_str(&format!("Header From: {}\n", self.header_from));
        out
    }

    /// The original body quoted for inclusion in a reply.
    pub fn quoted_body(&self) -> String {
        let mut out = format!(
            "{} {}\n\n",
            self.date.format("%-d %B %Y %H:%M:%S"),
            self.from.address
        );
        for line in self.text_body.split('\n') {
            out.push_str("> ");
            out.push_str(line);
            out.push('\n');
        }
        out
    }
}

fn join_addresses(addresses: &[MailAddress]) -> String {
    addresses
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}
