//! Ticketing system interface.
//!
//! One [`TicketingClient`] exists per installation (plus an optional admin
//! client for customer provisioning). Routing only talks to this trait;
//! [`jira::JiraClient`] is the production implementation.

pub mod jira;

use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use serde::Serialize;

use crate::error::TicketingError;
use crate::message::Attachment;

pub use jira::JiraClient;

pub const MAX_SUMMARY_CHARS: usize = 255;
pub const MAX_DESCRIPTION_CHARS: usize = 32767;
pub const MAX_FILE_NAME_CHARS: usize = 50;
pub const MAX_FULL_NAME_CHARS: usize = 60;

/// A request as currently stored by the ticketing system.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Request {
    pub key: String,
    pub desk_id: String,
    pub portal_link: String,
    pub status: String,
    /// Username of the reporter; empty for anonymous requests.
    pub reporter: String,
    pub assignee: Option<String>,
}

impl Request {
    /// Placeholder for a request that was created but could not be read back.
    pub fn created(key: impl Into<String>, desk_id: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            desk_id: desk_id.into(),
            ..Self::default()
        }
    }

    /// Whether `user` is this request's reporter or assignee.
    pub fn is_owned_by(&self, user: &str) -> bool {
        self.reporter == user || self.assignee.as_deref() == Some(user)
    }
}

/// Payload for request creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewRequest<'a> {
    pub desk_id: &'a str,
    pub request_type_id: &'a str,
    pub summary: &'a str,
    pub description: &'a str,
    /// `None` creates the request anonymously.
    pub reporter: Option<&'a str>,
}

#[async_trait]
pub trait TicketingClient: Send + Sync {
    /// Username whose e-mail address equals `address`; prefers an exact
    /// display-name match when several accounts share the address.
    async fn find_user(
        &self,
        address: &str,
        display_name: &str,
    ) -> Result<Option<String>, TicketingError>;

    /// Provision a customer account. Needs admin privileges.
    async fn create_customer(&self, address: &str, display_name: &str)
    -> Result<(), TicketingError>;

    /// `None` when no such request exists.
    async fn get_request(&self, key: &str) -> Result<Option<Request>, TicketingError>;

    /// Returns the new request's key.
    async fn create_request(&self, request: &NewRequest<'_>) -> Result<String, TicketingError>;

    async fn create_comment(
        &self,
        desk_id: &str,
        key: &str,
        body: &str,
        attachments: &[Attachment],
    ) -> Result<(), TicketingError>;

    async fn add_participant(&self, key: &str, username: &str) -> Result<(), TicketingError>;

    /// Numeric desk id for a project key.
    async fn desk_id(&self, project_key: &str) -> Result<String, TicketingError>;

    /// Request type id for a request type name within a desk.
    async fn request_type_id(&self, desk_id: &str, name: &str) -> Result<String, TicketingError>;
}

// ── Field limits ────────────────────────────────────────────────────

static FORBIDDEN_FILE_NAME_CHARS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(\\")|[\\/%:$?*]"#).expect("static regex is valid")
});

/// Strip control characters (keeping whitespace), trim and truncate.
/// Empty mandatory text becomes `<blank>`.
pub fn cap_length(text: &str, max_chars: usize, empty_allowed: bool) -> String {
    let cleaned: String = text
        .chars()
        .filter(|c| !c.is_control() || c.is_whitespace())
        .collect();
    let trimmed = cleaned.trim();
    let value = if trimmed.is_empty() && !empty_allowed {
        "<blank>"
    } else {
        trimmed
    };
    value.chars().take(max_chars).collect()
}

/// File name acceptable for a temporary attachment upload.
pub fn sanitize_file_name(name: &str) -> String {
    let capped = cap_length(name, MAX_FILE_NAME_CHARS, false);
    FORBIDDEN_FILE_NAME_CHARS.replace_all(&capped, "").into_owned()
}

/// Customer full name: commas removed, falls back to the address.
pub fn customer_full_name(display_name: &str, address: &str) -> String {
    let name = if display_name.is_empty() {
        address
    } else {
        display_name
    };
    cap_length(&name.replace(',', ""), MAX_FULL_NAME_CHARS, false)
}
