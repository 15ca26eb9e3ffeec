//! Jira Service Management REST client.
//!
//! Bearer-token authenticated `reqwest` client. Text sent to Jira is
//! sanitized and capped here so callers never have to care about field
//! limits.

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::{RequestBuilder, Response};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::json;
use tracing::{debug, info, warn};

use super::{
    MAX_DESCRIPTION_CHARS, MAX_SUMMARY_CHARS, NewRequest, Request, TicketingClient, cap_length,
    customer_full_name, sanitize_file_name,
};
use crate::error::TicketingError;
use crate::message::Attachment;

/// Desks fetched per page when looking up a project key.
const DESK_PAGE_SIZE: usize = 50;

/// Longest error body kept in a [`TicketingError::Status`].
const MAX_ERROR_BODY: usize = 500;

pub struct JiraClient {
    http: reqwest::Client,
    base_url: String,
    token: SecretString,
}

impl JiraClient {
    pub fn new(base_url: &str, token: SecretString) -> Self {
        info!(url = %base_url, "Creating Jira client");
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
        }
    }

    fn get(&self, endpoint: &str) -> RequestBuilder {
        self.http
            .get(format!("{}{endpoint}", self.base_url))
            .bearer_auth(self.token.expose_secret())
            .header("Accept", "application/json")
    }

    fn post(&self, endpoint: &str) -> RequestBuilder {
        self.http
            .post(format!("{}{endpoint}", self.base_url))
            .bearer_auth(self.token.expose_secret())
            .header("Accept", "application/json")
            .header("X-ExperimentalApi", "opt-in")
    }

    async fn fetch<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        request: RequestBuilder,
    ) -> Result<T, TicketingError> {
        let response = send(endpoint, request).await?;
        response
            .json::<T>()
            .await
            .map_err(|e| TicketingError::InvalidResponse {
                endpoint: endpoint.to_string(),
                reason: e.to_string(),
            })
    }

    /// Upload one file as a temporary attachment and return its id.
    async fn upload_temporary(
        &self,
        desk_id: &str,
        attachment: &Attachment,
    ) -> Result<String, TicketingError> {
        let endpoint = format!("/rest/servicedeskapi/servicedesk/{desk_id}/attachTemporaryFile");
        let file_name = sanitize_file_name(&attachment.name);
        debug!(file = %file_name, "Uploading temporary attachment");
        let form = Form::new().part(
            "file",
            Part::bytes(attachment.bytes.clone()).file_name(file_name),
        );
        let uploaded: TemporaryAttachments = self
            .fetch(
                &endpoint,
                self.post(&endpoint)
                    .header("X-Atlassian-Token", "no-check")
                    .multipart(form),
            )
            .await?;
        match uploaded.temporary_attachments.as_slice() {
            [single] => Ok(single.temporary_attachment_id.clone()),
            other => Err(TicketingError::InvalidResponse {
                endpoint,
                reason: format!("expected one temporary attachment, got {}", other.len()),
            }),
        }
    }
}

/// Send a request and turn non-2xx answers into errors.
async fn send(endpoint: &str, request: RequestBuilder) -> Result<Response, TicketingError> {
    let response = request.send().await.map_err(|e| TicketingError::Http {
        endpoint: endpoint.to_string(),
        reason: e.to_string(),
    })?;
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body: String = response
        .text()
        .await
        .unwrap_or_default()
        .chars()
        .take(MAX_ERROR_BODY)
        .collect();
    warn!(endpoint, status = status.as_u16(), body = %body, "Jira request failed");
    Err(TicketingError::Status {
        endpoint: endpoint.to_string(),
        status: status.as_u16(),
        body,
    })
}

/// A client error means the request does not exist or is not visible to us.
fn absent_on_client_error<T>(
    result: Result<T, TicketingError>,
) -> Result<Option<T>, TicketingError> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(TicketingError::Status { status, .. }) if (400..500).contains(&status) => Ok(None),
        Err(e) => Err(e),
    }
}

// ── Wire types ──────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UserEntry {
    name: String,
    #[serde(default)]
    email_address: String,
    #[serde(default)]
    display_name: String,
}

#[derive(Debug, Deserialize)]
struct NamedUser {
    #[serde(default)]
    name: String,
}

#[derive(Debug, Deserialize)]
struct Issue {
    fields: IssueFields,
}

#[derive(Debug, Deserialize)]
struct IssueFields {
    assignee: Option<NamedUser>,
}

#[derive(Debug, Default, Deserialize)]
struct Links {
    #[serde(default)]
    web: String,
}

#[derive(Debug, Deserialize)]
struct CurrentStatus {
    #[serde(default)]
    status: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ServiceDeskRequest {
    issue_key: String,
    service_desk_id: String,
    #[serde(rename = "_links", default)]
    links: Links,
    current_status: Option<CurrentStatus>,
    reporter: Option<NamedUser>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreatedRequest {
    issue_key: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TemporaryAttachments {
    #[serde(default)]
    temporary_attachments: Vec<TemporaryAttachment>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TemporaryAttachment {
    temporary_attachment_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Page<T> {
    #[serde(default)]
    is_last_page: bool,
    #[serde(default = "Vec::new")]
    values: Vec<T>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DeskEntry {
    id: String,
    project_key: String,
}

#[derive(Debug, Deserialize)]
struct RequestTypeEntry {
    id: String,
    name: String,
}

#[async_trait]
impl TicketingClient for JiraClient {
    async fn find_user(
        &self,
        address: &str,
        display_name: &str,
    ) -> Result<Option<String>, TicketingError> {
        let endpoint = "/rest/api/2/user/search";
        let users: Vec<UserEntry> = self
            .fetch(endpoint, self.get(endpoint).query(&[("username", address)]))
            .await?;

        // The search is fuzzy; only exact address matches count.
        let mut matching = users.into_iter().filter(|u| u.email_address == address);
        let Some(first) = matching.next() else {
            debug!(address, "User not found");
            return Ok(None);
        };
        if first.display_name == display_name {
            return Ok(Some(first.name));
        }
        match matching.find(|u| u.display_name == display_name) {
            Some(exact) => Ok(Some(exact.name)),
            None => Ok(Some(first.name)),
        }
    }

    async fn create_customer(
        &self,
        address: &str,
        display_name: &str,
    ) -> Result<(), TicketingError> {
        let endpoint = "/rest/servicedeskapi/customer";
        let full_name = customer_full_name(display_name, address);
        info!(address, full_name = %full_name, "Creating customer");
        send(
            endpoint,
            self.post(endpoint)
                .json(&json!({ "email": address, "fullName": full_name })),
        )
        .await?;
        Ok(())
    }

    async fn get_request(&self, key: &str) -> Result<Option<Request>, TicketingError> {
        let issue_endpoint = format!("/rest/api/2/issue/{key}");
        let issue: Option<Issue> = absent_on_client_error(
            self.fetch(
                &issue_endpoint,
                self.get(&issue_endpoint).query(&[("fields", "assignee")]),
            )
            .await,
        )?;
        let Some(issue) = issue else {
            debug!(key, "No such issue");
            return Ok(None);
        };

        let endpoint = format!("/rest/servicedeskapi/request/{key}");
        let request: Option<ServiceDeskRequest> =
            absent_on_client_error(self.fetch(&endpoint, self.get(&endpoint)).await)?;
        let Some(request) = request else {
            debug!(key, "Issue is not a service desk request");
            return Ok(None);
        };

        Ok(Some(Request {
            key: request.issue_key,
            desk_id: request.service_desk_id,
            portal_link: request.links.web,
            status: request.current_status.map(|s| s.status).unwrap_or_default(),
            reporter: request.reporter.map(|r| r.name).unwrap_or_default(),
            assignee: issue
                .fields
                .assignee
                .map(|a| a.name)
                .filter(|name| !name.is_empty()),
        }))
    }

    async fn create_request(&self, request: &NewRequest<'_>) -> Result<String, TicketingError> {
        let endpoint = "/rest/servicedeskapi/request";
        let summary = cap_length(request.summary, MAX_SUMMARY_CHARS, false);
        let description = cap_length(request.description, MAX_DESCRIPTION_CHARS, false);
        info!(
            desk = request.desk_id,
            reporter = request.reporter.unwrap_or("<anonymous>"),
            summary = %summary,
            "Creating request"
        );
        let mut body = json!({
            "serviceDeskId": request.desk_id,
            "requestTypeId": request.request_type_id,
            "requestFieldValues": {
                "summary": summary,
                "description": description,
            },
        });
        if let Some(reporter) = request.reporter {
            body["raiseOnBehalfOf"] = json!(reporter);
        }
        let created: CreatedRequest = self
            .fetch(endpoint, self.post(endpoint).json(&body))
            .await?;
        Ok(created.issue_key)
    }

    async fn create_comment(
        &self,
        desk_id: &str,
        key: &str,
        body: &str,
        attachments: &[Attachment],
    ) -> Result<(), TicketingError> {
        let body = cap_length(body, MAX_DESCRIPTION_CHARS, true);
        if attachments.is_empty() {
            let endpoint = format!("/rest/servicedeskapi/request/{key}/comment");
            send(
                &endpoint,
                self.post(&endpoint)
                    .json(&json!({ "body": body, "public": true })),
            )
            .await?;
            return Ok(());
        }

        let mut ids = Vec::with_capacity(attachments.len());
        for attachment in attachments {
            ids.push(self.upload_temporary(desk_id, attachment).await?);
        }
        let endpoint = format!("/rest/servicedeskapi/request/{key}/attachment");
        send(
            &endpoint,
            self.post(&endpoint).json(&json!({
                "temporaryAttachmentIds": ids,
                "public": true,
                "additionalComment": { "body": body },
            })),
        )
        .await?;
        Ok(())
    }

    async fn add_participant(&self, key: &str, username: &str) -> Result<(), TicketingError> {
        let endpoint = format!("/rest/servicedeskapi/request/{key}/participant");
        info!(key, username, "Adding participant");
        send(
            &endpoint,
            self.post(&endpoint)
                .json(&json!({ "usernames": [username] })),
        )
        .await?;
        Ok(())
    }

    async fn desk_id(&self, project_key: &str) -> Result<String, TicketingError> {
        let endpoint = "/rest/servicedeskapi/servicedesk";
        let mut start = 0usize;
        loop {
            let page: Page<DeskEntry> = self
                .fetch(
                    endpoint,
                    self.get(endpoint)
                        .query(&[("start", start), ("limit", DESK_PAGE_SIZE)]),
                )
                .await?;
            if let Some(desk) = page.values.iter().find(|d| d.project_key == project_key) {
                info!(project_key, id = %desk.id, "Resolved desk id");
                return Ok(desk.id.clone());
            }
            if page.is_last_page || page.values.is_empty() {
                break;
            }
            start += page.values.len();
        }
        Err(TicketingError::NotFound {
            what: "Desk".into(),
            name: project_key.to_string(),
        })
    }

    async fn request_type_id(&self, desk_id: &str, name: &str) -> Result<String, TicketingError> {
        let endpoint = format!("/rest/servicedeskapi/servicedesk/{desk_id}/requesttype");
        let page: Page<RequestTypeEntry> = self.fetch(&endpoint, self.get(&endpoint)).await?;
        if !page.is_last_page {
            return Err(TicketingError::InvalidResponse {
                endpoint,
                reason: "request types span several pages".into(),
            });
        }
        page.values
            .into_iter()
            .find(|t| t.name == name)
            .map(|t| t.id)
            .ok_or_else(|| TicketingError::NotFound {
                what: format!("Request type in desk {desk_id}"),
                name: name.to_string(),
            })
    }
}
