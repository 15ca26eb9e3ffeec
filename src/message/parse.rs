//! Inbound-parse webhook payloads → [`Message`].
//!
//! The webhook posts a multipart form. Its text fields are kept as an
//! [`InboundForm`] and dumped as JSON, so a dump can be replayed through
//! the exact same parsing path later.

use std::collections::BTreeMap;

use chrono::{DateTime, FixedOffset, Utc};
use mail_parser::{MessageParser, MessagePart, MimeHeaders};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{Attachment, MailAddress, Message};
use crate::error::{ParseError, Result};
use crate::scanner::MalwareScanner;

/// Maximum body length kept from the text part, in characters.
const MAX_BODY_CHARS: usize = 32767;

/// Text fields of one inbound-parse webhook call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InboundForm {
    fields: BTreeMap<String, String>,
}

impl InboundForm {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.fields.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }

    fn require(&self, name: &'static str) -> std::result::Result<&str, ParseError> {
        self.get(name).ok_or(ParseError::MissingField(name))
    }

    pub fn to_json(&self) -> std::result::Result<Vec<u8>, ParseError> {
        Ok(serde_json::to_vec_pretty(self)?)
    }

    pub fn from_json(raw: &[u8]) -> std::result::Result<Self, ParseError> {
        Ok(serde_json::from_slice(raw)?)
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for InboundForm {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            fields: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default)]
    to: Vec<String>,
    #[serde(default)]
    from: String,
}

/// Parse one inbound form into a [`Message`], scanning attachments on the way.
pub async fn parse_inbound(form: &InboundForm, scanner: &dyn MalwareScanner) -> Result<Message> {
    let raw_email = form.require("email")?;
    let subject = form.require("subject")?.to_string();

    let header_to = parse_address_list(form.get("to").unwrap_or_default());
    let header_from = parse_address_list(form.get("from").unwrap_or_default())
        .into_iter()
        .next()
        .unwrap_or_default();
    if header_from.address.is_empty() {
        debug!("Header from unreadable, falling back to envelope sender");
    }

    let spam_score: f64 =
        form.require("spam_score")?
            .trim()
            .parse()
            .map_err(|e: std::num::ParseFloatError| ParseError::InvalidField {
                field: "spam_score",
                reason: e.to_string(),
            })?;

    let envelope: Envelope =
        serde_json::from_str(form.require("envelope")?).map_err(|e| ParseError::InvalidField {
            field: "envelope",
            reason: e.to_string(),
        })?;
    let envelope_to = envelope
        .to
        .first()
        .and_then(|raw| parse_address_list(raw).into_iter().next())
        .ok_or(ParseError::InvalidField {
            field: "envelope",
            reason: "no recipient".into(),
        })?;
    let envelope_from = parse_address_list(&envelope.from)
        .into_iter()
        .next()
        .unwrap_or_default();

    let mut from = header_from.clone();
    if from.address.is_empty() {
        from.address = envelope_from.address.clone();
    }
    if from.name.is_empty() {
        from.name = envelope_from.name.clone();
    }
    if envelope_from.address != header_from.address {
        warn!(
            envelope = %envelope_from.address,
            header = %header_from.address,
            "Envelope and header sender differ"
        );
    }

    let parsed = MessageParser::default()
        .parse(raw_email.as_bytes())
        .ok_or(ParseError::Mime)?;

    let text_body: String = parsed
        .body_text(0)
        .map(|text| text.chars().take(MAX_BODY_CHARS).collect())
        .unwrap_or_default();
    let text_body = text_body.trim().to_string();

    let attachments: Vec<Attachment> = parsed
        .attachments()
        .map(|part| Attachment::new(attachment_name(part), part.contents()))
        .collect();

    let auto_reply = is_auto_reply(|name| header_text(&parsed, name));

    let date = parsed
        .date()
        .and_then(|d| DateTime::parse_from_rfc3339(&d.to_rfc3339()).ok())
        .unwrap_or_else(|| {
            warn!("Message has no readable date, using arrival time");
            Utc::now().fixed_offset()
        });

    let malware = scanner.scan(&attachments).await?;

    let mut to = header_to;
    to.push(envelope_to);

    Ok(Message {
        date,
        from,
        header_from,
        envelope_from,
        to,
        cc: addresses(parsed.cc()),
        bcc: addresses(parsed.bcc()),
        reply_to: addresses(parsed.reply_to()).into_iter().next(),
        subject,
        sender_ip: form.get("sender_ip").unwrap_or_default().to_string(),
        spam_score,
        text_body,
        attachments,
        auto_reply,
        malware,
    })
}

/// Parse an RFC 5322 address list. Unreadable input yields an empty list.
pub fn parse_address_list(value: &str) -> Vec<MailAddress> {
    if value.trim().is_empty() {
        return Vec::new();
    }
    let raw = format!("To: {value}\r\n\r\n");
    MessageParser::default()
        .parse(raw.as_bytes())
        .map(|parsed| addresses(parsed.to()))
        .unwrap_or_default()
}

fn addresses(addr: Option<&mail_parser::Address>) -> Vec<MailAddress> {
    let Some(addr) = addr else {
        return Vec::new();
    };
    let to_mailbox = |a: &mail_parser::Addr| {
        a.address.as_ref().map(|address| MailAddress {
            name: a.name.as_deref().unwrap_or_default().to_string(),
            address: address.to_string(),
        })
    };
    match addr {
        mail_parser::Address::List(addrs) => addrs.iter().filter_map(to_mailbox).collect(),
        mail_parser::Address::Group(groups) => groups
            .iter()
            .flat_map(|g| g.addresses.iter().filter_map(to_mailbox))
            .collect(),
    }
}

fn header_text<'a>(parsed: &'a mail_parser::Message<'a>, name: &str) -> Option<&'a str> {
    parsed
        .headers()
        .iter()
        .find(|h| h.name().eq_ignore_ascii_case(name))
        .and_then(|h| h.value().as_text())
}

/// Auto-responder detection from the usual marker headers.
fn is_auto_reply<'a>(header: impl Fn(&str) -> Option<&'a str>) -> bool {
    if header("Auto-Submitted").is_some_and(|v| !v.trim().eq_ignore_ascii_case("no")) {
        return true;
    }
    if header("X-Autoreply").is_some() || header("X-Autorespond").is_some() {
        return true;
    }
    header("Precedence").is_some_and(|v| v.trim() == "auto_reply")
}

/// File name for an attachment, guessed from its content type when absent.
fn attachment_name(part: &MessagePart) -> String {
    if let Some(name) = part.attachment_name()
        && !name.trim().is_empty()
    {
        return name.to_string();
    }
    let stem = part
        .content_id()
        .map(|id| id.trim().trim_start_matches('<').trim_end_matches('>'))
        .filter(|id| !id.is_empty())
        .unwrap_or("unnamed_file");
    let extension = part
        .content_type()
        .and_then(|ct| ct.subtype().map(|sub| extension_for(ct.ctype(), sub)))
        .unwrap_or(".unknown");
    format!("{stem}{extension}")
}

fn extension_for(ctype: &str, subtype: &str) -> &'static str {
    match (
        ctype.to_ascii_lowercase().as_str(),
        subtype.to_ascii_lowercase().as_str(),
    ) {
        ("image", "jpeg") | ("image", "jpg") => ".jpg",
        ("image", "png") => ".png",
        ("image", "gif") => ".gif",
        ("image", "webp") => ".webp",
        ("image", "svg+xml") => ".svg",
        ("application", "pdf") => ".pdf",
        ("application", "zip") => ".zip",
        ("application", "json") => ".json",
        ("application", "msword") => ".doc",
        ("text", "plain") => ".txt",
        ("text", "html") => ".html",
        ("text", "csv") => ".csv",
        ("text", "calendar") => ".ics",
        ("message", "rfc822") => ".eml",
        _ => ".unknown",
    }
}
