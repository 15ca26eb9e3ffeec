//! Routing decision engine.
//!
//! Turns one parsed message (or one event batch) into ticketing actions:
//! create a request, comment on an existing one, or drop it with a logged
//! reason. Checks run in a fixed order and stop at the first terminal
//! outcome; nothing touches the network before the local checks passed.

mod context;
mod email;
mod events;
pub mod users;

use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use tracing::info;

use crate::config::Config;
use crate::dedup::DedupState;
use crate::mailer::Replies;
use crate::message::{InboundForm, Message, parse_inbound};
use crate::scanner::MalwareScanner;
use crate::topology::Topology;

pub use context::{DecisionContext, MatchedRequest};

/// Address lists and thresholds the engine applies to every message.
#[derive(Debug, Clone, Default)]
pub struct RoutingPolicy {
    /// Messages scoring at or above this are spam.
    pub max_spam_score: f64,
    /// Senders exempt from spam and auto-reply checks.
    pub whitelist: Vec<String>,
    /// Never replied to and never provisioned.
    pub dont_reply_to: Vec<String>,
    pub debug_parse_only: bool,
    /// Reporter for requests created from events; empty is anonymous.
    pub event_username: String,
}

impl RoutingPolicy {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_spam_score: config.max_spam_score,
            whitelist: config.email_whitelist.clone(),
            dont_reply_to: config.dont_reply_to_emails.clone(),
            debug_parse_only: config.debug_parse_only,
            event_username: config.handle_events_username.clone(),
        }
    }

    pub fn is_whitelisted(&self, address: &str) -> bool {
        listed(&self.whitelist, address)
    }

    pub fn is_dont_reply(&self, address: &str) -> bool {
        listed(&self.dont_reply_to, address)
    }
}

fn listed(list: &[String], address: &str) -> bool {
    list.iter()
        .any(|entry| entry == address || entry.to_lowercase() == address.to_lowercase())
}

/// Why a message was deliberately left alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DropReason {
    Malware,
    /// Sent from an address the router itself owns.
    SelfLoop,
    Spam,
    DuplicateAutoReply,
    AutoReplyWithoutRequest,
    UnknownRecipient,
    /// Sent to an installation without referencing a request; the sender
    /// got a rejection reply.
    WrongAddress,
    SuppressedStatus,
}

impl fmt::Display for DropReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DropReason::Malware => "malware",
            DropReason::SelfLoop => "self_loop",
            DropReason::Spam => "spam",
            DropReason::DuplicateAutoReply => "duplicate_auto_reply",
            DropReason::AutoReplyWithoutRequest => "auto_reply_without_request",
            DropReason::UnknownRecipient => "unknown_recipient",
            DropReason::WrongAddress => "wrong_address",
            DropReason::SuppressedStatus => "suppressed_status",
        };
        f.write_str(s)
    }
}

/// Terminal outcome for one message. Every variant counts as handled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Dropped(DropReason),
    Created { key: String },
    Commented { key: String },
    /// Parsed and logged only.
    ParsedOnly,
}

pub struct Router {
    policy: RoutingPolicy,
    topology: Arc<Topology>,
    replies: Replies,
    scanner: Arc<dyn MalwareScanner>,
    dedup: Box<dyn DedupState>,
}

impl Router {
    pub fn new(
        policy: RoutingPolicy,
        topology: Arc<Topology>,
        replies: Replies,
        scanner: Arc<dyn MalwareScanner>,
        dedup: Box<dyn DedupState>,
    ) -> Self {
        Self {
            policy,
            topology,
            replies,
            scanner,
            dedup,
        }
    }

    pub fn policy(&self) -> &RoutingPolicy {
        &self.policy
    }

    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    /// Parse a dumped inbound form and route it.
    pub async fn handle_email(&mut self, raw: &[u8]) -> crate::error::Result<Decision> {
        let form = InboundForm::from_json(raw)?;
        let message = parse_inbound(&form, self.scanner.as_ref()).await?;
        info!(stats = %message.stats(), "Parsed message");

        if self.policy.debug_parse_only {
            let pretty = serde_json::to_string_pretty(&message)
                .map_err(crate::error::ParseError::from)?;
            info!(message = %pretty, "Debug parse only, not routing");
            return Ok(Decision::ParsedOnly);
        }
        self.route_email(&message).await
    }

    /// Forget every sender whose auto-reply was handled.
    pub fn clear_dedup(&mut self) {
        self.dedup.clear_all();
        info!("Auto-reply dedup set cleared");
    }

    fn dropped(&self, reason: DropReason, message: &Message) -> Decision {
        info!(
            %reason,
            from = %message.from.address,
            subject = %message.subject,
            "Dropped message"
        );
        Decision::Dropped(reason)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lists_match_case_insensitively() {
        let policy = RoutingPolicy {
            whitelist: vec!["Boss@Example.com".into()],
            dont_reply_to: vec!["noreply@example.com".into()],
            ..RoutingPolicy::default()
        };
        assert!(policy.is_whitelisted("boss@example.com"));
        assert!(policy.is_whitelisted("Boss@Example.com"));
        assert!(!policy.is_whitelisted("other@example.com"));
        assert!(policy.is_dont_reply("NoReply@example.com"));
    }

    #[test]
    fn drop_reasons_render_snake_case() {
        assert_eq!(DropReason::AutoReplyWithoutRequest.to_string(), "auto_reply_without_request");
        assert_eq!(
            serde_json::to_string(&DropReason::SelfLoop).unwrap(),
            "\"self_loop\""
        );
    }
}
