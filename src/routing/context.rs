//! Per-message decision context and subject request matching.

use std::sync::LazyLock;

use regex::Regex;
use tracing::debug;

use super::RoutingPolicy;
use crate::error::Result;
use crate::message::Message;
use crate::ticketing::Request;
use crate::topology::{DeskRef, Target, Topology};

static REQUEST_KEY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[A-Z]+-\d+").expect("static regex is valid"));

/// A request referenced by the subject, with its owning desk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchedRequest {
    pub request: Request,
    pub desk: DeskRef,
}

/// Everything known about one message while it is being routed.
///
/// Local facts are computed up front; the subject match needs the
/// ticketing system and is filled in at most once, on demand.
pub struct DecisionContext<'a> {
    pub message: &'a Message,
    pub target: Option<Target>,
    pub whitelisted: bool,
    pub dont_reply: bool,
    matched: Option<Option<MatchedRequest>>,
}

impl<'a> DecisionContext<'a> {
    pub fn new(message: &'a Message, topology: &Topology, policy: &RoutingPolicy) -> Self {
        Self {
            message,
            target: topology.resolve_recipients(message.recipients()),
            whitelisted: policy.is_whitelisted(&message.from.address),
            dont_reply: policy.is_dont_reply(&message.from.address),
            matched: None,
        }
    }

    /// Look up the subject's request once; later calls are free.
    pub async fn match_request(&mut self, topology: &Topology) -> Result<Option<&MatchedRequest>> {
        if self.matched.is_none() {
            let found = match self.target {
                Some(target) => find_request(topology, target, &self.message.subject).await?,
                None => None,
            };
            self.matched = Some(found);
        }
        Ok(self.matched.as_ref().and_then(Option::as_ref))
    }

    /// Take the match out once routing no longer needs the context.
    pub fn take_match(&mut self) -> Option<MatchedRequest> {
        self.matched.take().flatten()
    }
}

/// Scan the subject left to right. The first key that exists in the
/// target installation and belongs to one of its mail desks wins.
async fn find_request(
    topology: &Topology,
    target: Target,
    subject: &str,
) -> Result<Option<MatchedRequest>> {
    let installation = topology.installation(target.installation);
    for candidate in REQUEST_KEY.find_iter(subject) {
        let key = candidate.as_str();
        let Some(request) = installation.client.get_request(key).await? else {
            debug!(key, url = %installation.url, "No such request");
            continue;
        };
        let Some(desk) = topology.resolve_desk_by_id(target.installation, &request.desk_id) else {
            debug!(key, desk_id = %request.desk_id, "Request belongs to an unregistered desk");
            continue;
        };
        debug!(key, project = %topology.desk(desk).project_key, "Subject references request");
        return Ok(Some(MatchedRequest { request, desk }));
    }
    Ok(None)
}
