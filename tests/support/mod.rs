//! Shared fakes for the integration tests.
//!
//! `FakeTicketing` keeps users and requests in memory and records every
//! call, so tests can assert both outcomes and exactly which network calls
//! a routing decision made.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{TimeZone, Utc};

use inbound_router::dedup::NotifiedSenders;
use inbound_router::error::{MailError, TicketingError};
use inbound_router::mailer::{MailSender, Replies, Template};
use inbound_router::message::{Attachment, MailAddress, Message};
use inbound_router::routing::{Router, RoutingPolicy};
use inbound_router::scanner::NoopScanner;
use inbound_router::ticketing::{NewRequest, Request, TicketingClient};
use inbound_router::topology::{Desk, Installation, Topology};

pub const JIRA_URL: &str = "https://jira.example.com";
pub const INSTALLATION_ADDRESS: &str = "jira@example.com";
pub const DESK_ADDRESS: &str = "support@example.com";
pub const DESK_ID: &str = "10";
pub const EVENT_DESK_ID: &str = "20";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    FindUser(String),
    CreateCustomer(String),
    GetRequest(String),
    CreateRequest {
        desk_id: String,
        summary: String,
        reporter: Option<String>,
    },
    Comment {
        key: String,
        body: String,
        attachments: usize,
    },
    AddParticipant {
        key: String,
        user: String,
    },
}

#[derive(Default)]
pub struct FakeTicketing {
    users: Mutex<HashMap<String, String>>,
    requests: Mutex<HashMap<String, Request>>,
    calls: Mutex<Vec<Call>>,
    attempts: Mutex<usize>,
    failing_attempts: Mutex<Vec<usize>>,
    created: Mutex<usize>,
    customer_creation: Mutex<CustomerCreation>,
    participant_adds: Mutex<usize>,
    failing_participant_adds: Mutex<Vec<usize>>,
}

/// What `create_customer` does.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CustomerCreation {
    /// Succeeds and the account becomes findable.
    #[default]
    Works,
    /// Fails with a 400.
    Fails,
    /// Reports success but the account never shows up in searches.
    Vanishes,
}

impl FakeTicketing {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn add_user(&self, address: &str, username: &str) {
        self.users
            .lock()
            .unwrap()
            .insert(address.to_string(), username.to_string());
    }

    pub fn add_request(&self, request: Request) {
        self.requests
            .lock()
            .unwrap()
            .insert(request.key.clone(), request);
    }

    /// The next `count` creation attempts fail with a 400.
    pub fn fail_next_creates(&self, count: usize) {
        let attempts = *self.attempts.lock().unwrap();
        self.failing_attempts
            .lock()
            .unwrap()
            .extend(attempts + 1..=attempts + count);
    }

    /// Creation attempt number `attempt`, counted from 1, fails with a 400.
    pub fn fail_attempt(&self, attempt: usize) {
        self.failing_attempts.lock().unwrap().push(attempt);
    }

    pub fn set_customer_creation(&self, behaviour: CustomerCreation) {
        *self.customer_creation.lock().unwrap() = behaviour;
    }

    /// Participant add number `attempt`, counted from 1, fails with a 400
    /// and is not recorded.
    pub fn fail_participant_add(&self, attempt: usize) {
        self.failing_participant_adds.lock().unwrap().push(attempt);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn creations(&self) -> Vec<Call> {
        self.calls()
            .into_iter()
            .filter(|c| matches!(c, Call::CreateRequest { .. }))
            .collect()
    }

    pub fn participants(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::AddParticipant { user, .. } => Some(user),
                _ => None,
            })
            .collect()
    }

    pub fn lookups(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::GetRequest(key) => Some(key),
                _ => None,
            })
            .collect()
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl TicketingClient for FakeTicketing {
    async fn find_user(
        &self,
        address: &str,
        _display_name: &str,
    ) -> Result<Option<String>, TicketingError> {
        self.record(Call::FindUser(address.to_string()));
        Ok(self.users.lock().unwrap().get(address).cloned())
    }

    async fn create_customer(
        &self,
        address: &str,
        _display_name: &str,
    ) -> Result<(), TicketingError> {
        self.record(Call::CreateCustomer(address.to_string()));
        match *self.customer_creation.lock().unwrap() {
            CustomerCreation::Fails => {
                return Err(TicketingError::Status {
                    endpoint: "/rest/servicedeskapi/customer".into(),
                    status: 400,
                    body: "customer signup disabled".into(),
                });
            }
            CustomerCreation::Vanishes => return Ok(()),
            CustomerCreation::Works => {}
        }
        let username = address.split('@').next().unwrap_or(address).to_string();
        self.add_user(address, &username);
        Ok(())
    }

    async fn get_request(&self, key: &str) -> Result<Option<Request>, TicketingError> {
        self.record(Call::GetRequest(key.to_string()));
        Ok(self.requests.lock().unwrap().get(key).cloned())
    }

    async fn create_request(&self, request: &NewRequest<'_>) -> Result<String, TicketingError> {
        self.record(Call::CreateRequest {
            desk_id: request.desk_id.to_string(),
            summary: request.summary.to_string(),
            reporter: request.reporter.map(str::to_string),
        });
        let attempt = {
            let mut attempts = self.attempts.lock().unwrap();
            *attempts += 1;
            *attempts
        };
        if self.failing_attempts.lock().unwrap().contains(&attempt) {
            return Err(TicketingError::Status {
                endpoint: "/rest/servicedeskapi/request".into(),
                status: 400,
                body: "reporter is not a customer".into(),
            });
        }
        let number = {
            let mut created = self.created.lock().unwrap();
            *created += 1;
            *created
        };
        let key = format!("SUP-{number}");
        self.add_request(Request {
            key: key.clone(),
            desk_id: request.desk_id.to_string(),
            portal_link: format!("{JIRA_URL}/servicedesk/customer/portal/1/{key}"),
            status: "Waiting for support".into(),
            reporter: request.reporter.unwrap_or_default().to_string(),
            assignee: None,
        });
        Ok(key)
    }

    async fn create_comment(
        &self,
        _desk_id: &str,
        key: &str,
        body: &str,
        attachments: &[Attachment],
    ) -> Result<(), TicketingError> {
        self.record(Call::Comment {
            key: key.to_string(),
            body: body.to_string(),
            attachments: attachments.len(),
        });
        Ok(())
    }

    async fn add_participant(&self, key: &str, username: &str) -> Result<(), TicketingError> {
        let attempt = {
            let mut adds = self.participant_adds.lock().unwrap();
            *adds += 1;
            *adds
        };
        if self.failing_participant_adds.lock().unwrap().contains(&attempt) {
            return Err(TicketingError::Status {
                endpoint: format!("/rest/servicedeskapi/request/{key}/participant"),
                status: 400,
                body: "user cannot be added".into(),
            });
        }
        self.record(Call::AddParticipant {
            key: key.to_string(),
            user: username.to_string(),
        });
        Ok(())
    }

    async fn desk_id(&self, _project_key: &str) -> Result<String, TicketingError> {
        Ok(DESK_ID.to_string())
    }

    async fn request_type_id(&self, _desk_id: &str, _name: &str) -> Result<String, TicketingError> {
        Ok("1".to_string())
    }
}

/// Mailer that keeps every outgoing mail.
#[derive(Default)]
pub struct RecordingMailer {
    pub sent: Mutex<Vec<SentMail>>,
}

#[derive(Debug, Clone)]
pub struct SentMail {
    pub from: String,
    pub to: String,
    pub subject: String,
    pub body: String,
}

impl RecordingMailer {
    pub fn sent(&self) -> Vec<SentMail> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl MailSender for RecordingMailer {
    async fn send(
        &self,
        from: &MailAddress,
        to: &MailAddress,
        subject: &str,
        body: &str,
    ) -> Result<(), MailError> {
        self.sent.lock().unwrap().push(SentMail {
            from: from.address.clone(),
            to: to.address.clone(),
            subject: subject.to_string(),
            body: body.to_string(),
        });
        Ok(())
    }
}

// ── Builders ────────────────────────────────────────────────────────

pub fn support_desk() -> Desk {
    Desk {
        project_key: "SUP".into(),
        id: DESK_ID.into(),
        request_type_id: "1".into(),
        emails: vec![DESK_ADDRESS.into()],
        reply_address: Some(MailAddress::new("Support", DESK_ADDRESS)),
        reply_above_this: "### reply above this line ###".into(),
        dont_comment_statuses: vec!["Closed".into()],
        creation_template: Some(
            Template::parse(
                "created",
                "Hello {{sender.name}}, we opened {{request.key}}: {{request.portal_link}}",
            )
            .unwrap(),
        ),
        max_participants: 10,
        ..Desk::default()
    }
}

pub fn event_desk() -> Desk {
    Desk {
        project_key: "EVT".into(),
        id: EVENT_DESK_ID.into(),
        request_type_id: "7".into(),
        event_sink: true,
        max_participants: 10,
        ..Desk::default()
    }
}

/// One installation owning `jira@example.com`, with the support desk and
/// an event sink desk.
pub fn installation(client: Arc<FakeTicketing>, desk: Desk) -> Installation {
    let mut installation = Installation::new(JIRA_URL, client);
    installation.emails = vec![INSTALLATION_ADDRESS.into()];
    installation.reply_address = Some(MailAddress::new("Jira", INSTALLATION_ADDRESS));
    installation.rejected_mail_subject = "[Rejected]".into();
    installation.rejected_mail_template = Some(
        Template::parse(
            "rejected",
            "{{installation.url}} only takes replies to existing requests.",
        )
        .unwrap(),
    );
    installation.desks = vec![desk, event_desk()];
    installation
}

pub fn topology(client: Arc<FakeTicketing>) -> Topology {
    Topology::new(vec![installation(client, support_desk())]).unwrap()
}

pub fn policy() -> RoutingPolicy {
    RoutingPolicy {
        max_spam_score: 5.0,
        whitelist: vec!["monitor@partner.example".into()],
        dont_reply_to: vec!["noreply@vendor.example".into()],
        debug_parse_only: false,
        event_username: "automation".into(),
    }
}

pub fn router(topology: Topology, mailer: Arc<RecordingMailer>) -> Router {
    Router::new(
        policy(),
        Arc::new(topology),
        Replies::new(mailer, true),
        Arc::new(NoopScanner),
        Box::new(NotifiedSenders::new()),
    )
}

pub fn message(from: &str, to: &[&str], subject: &str) -> Message {
    Message {
        date: Utc
            .with_ymd_and_hms(2024, 3, 5, 8, 7, 1)
            .unwrap()
            .fixed_offset(),
        from: MailAddress::new("Ann Example", from),
        header_from: MailAddress::new("Ann Example", from),
        envelope_from: MailAddress::bare(from),
        to: to.iter().map(|a| MailAddress::bare(*a)).collect(),
        cc: Vec::new(),
        bcc: Vec::new(),
        reply_to: None,
        subject: subject.into(),
        sender_ip: "192.0.2.1".into(),
        spam_score: 0.5,
        text_body: "The printer is on fire.".into(),
        attachments: Vec::new(),
        auto_reply: false,
        malware: false,
    }
}
