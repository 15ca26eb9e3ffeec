//! Webhook event classification.
//!
//! An event batch is a JSON array. Every element is tried against a fixed,
//! ordered list of shapes; the first shape whose required fields are all
//! present and non-empty wins. Elements matching no shape still become a
//! request, labelled "Unknown Event Type".

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};
use serde_json::ser::PrettyFormatter;
use tracing::debug;

use crate::error::ParseError;
use crate::message::Attachment;

pub const UNKNOWN_EVENT_SUMMARY: &str = "Unknown Event Type";

/// Normalized event, ready to become a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classified {
    /// Name of the matching shape, `unknown` for the fallback.
    pub shape: &'static str,
    pub summary: String,
    pub description: String,
    pub attachments: Vec<Attachment>,
}

type ShapeFn = fn(&str) -> Option<Classified>;

/// Shapes in priority order. A payload may satisfy several; order decides.
const SHAPES: &[ShapeFn] = &[sendgrid, github_monitor, jira_cve, sysdig];

/// Classify one event. Never fails.
pub fn classify(raw: &str) -> Classified {
    SHAPES
        .iter()
        .find_map(|shape| shape(raw))
        .inspect(|c| debug!(shape = c.shape, "Event classified"))
        .unwrap_or_else(|| Classified {
            shape: "unknown",
            summary: UNKNOWN_EVENT_SUMMARY.to_string(),
            description: raw.to_string(),
            attachments: Vec::new(),
        })
}

/// Split a batch into its elements, each re-serialized with four-space
/// indentation.
pub fn split_batch(raw: &[u8]) -> Result<Vec<String>, ParseError> {
    let elements: Vec<serde_json::Value> = serde_json::from_slice(raw)?;
    elements.iter().map(pretty).collect()
}

fn pretty(value: &serde_json::Value) -> Result<String, ParseError> {
    let mut out = Vec::new();
    let mut serializer =
        serde_json::Serializer::with_formatter(&mut out, PrettyFormatter::with_indent(b"    "));
    value.serialize(&mut serializer)?;
    String::from_utf8(out).map_err(|e| ParseError::InvalidField {
        field: "event",
        reason: e.to_string(),
    })
}

fn non_empty(field: Option<String>) -> Option<String> {
    field.filter(|s| !s.is_empty())
}

// ── Shapes ──────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct SendgridEvent {
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    event: Option<String>,
}

fn sendgrid(raw: &str) -> Option<Classified> {
    let event: SendgridEvent = serde_json::from_str(raw).ok()?;
    let email = non_empty(event.email)?;
    let kind = non_empty(event.event)?;
    Some(Classified {
        shape: "sendgrid",
        summary: format!("Sendgrid: {kind} {email}"),
        description: raw.to_string(),
        attachments: Vec::new(),
    })
}

#[derive(Deserialize)]
struct MonitorEvent {
    #[serde(default)]
    summary: Option<String>,
    #[serde(default)]
    event_body: Option<String>,
    #[serde(default, rename = "type")]
    kind: Option<String>,
}

fn github_monitor(raw: &str) -> Option<Classified> {
    let event: MonitorEvent = serde_json::from_str(raw).ok()?;
    if event.kind.as_deref() != Some("github_monitor") {
        return None;
    }
    let body = non_empty(event.event_body)?;
    Some(Classified {
        shape: "github_monitor",
        summary: format!("GitHub Monitor: {}", event.summary.unwrap_or_default()),
        description: body,
        attachments: Vec::new(),
    })
}

#[derive(Deserialize)]
struct EncodedFile {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    b64_data: Option<String>,
}

#[derive(Deserialize)]
struct CveEvent {
    #[serde(default)]
    subject: Option<String>,
    #[serde(default)]
    body: Option<String>,
    #[serde(default)]
    files: Option<Vec<EncodedFile>>,
    #[serde(default)]
    type_field: Option<String>,
}

fn jira_cve(raw: &str) -> Option<Classified> {
    let event: CveEvent = serde_json::from_str(raw).ok()?;
    if event.type_field.as_deref() != Some("cve_scanner") {
        return None;
    }
    let body = non_empty(event.body)?;
    let attachments = event
        .files
        .unwrap_or_default()
        .into_iter()
        .map(|file| {
            let bytes = STANDARD
                .decode(file.b64_data.unwrap_or_default())
                .ok()?;
            Some(Attachment::new(file.name.unwrap_or_default(), bytes))
        })
        .collect::<Option<Vec<_>>>()?;
    Some(Classified {
        shape: "jira_cve",
        summary: format!("Jira CVE: {}", event.subject.unwrap_or_default()),
        description: body,
        attachments,
    })
}

fn sysdig(raw: &str) -> Option<Classified> {
    let event: MonitorEvent = serde_json::from_str(raw).ok()?;
    let body = non_empty(event.event_body)?;
    Some(Classified {
        shape: "sysdig",
        summary: format!("Sysdig: {}", event.summary.unwrap_or_default()),
        description: body,
        attachments: Vec::new(),
    })
}
