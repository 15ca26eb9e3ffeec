//! The e-mail path of the router.

use std::sync::Arc;

use tracing::{info, warn};

use super::context::{DecisionContext, MatchedRequest};
use super::users::{self, UserLookup};
use super::{Decision, DropReason, Router};
use crate::error::Result;
use crate::message::Message;
use crate::ticketing::{NewRequest, Request, TicketingClient};
use crate::topology::{Desk, DeskRef, Installation, Topology};

impl Router {
    /// Route an already parsed message.
    pub async fn route_email(&mut self, message: &Message) -> Result<Decision> {
        let topology = Arc::clone(&self.topology);
        let mut ctx = DecisionContext::new(message, &topology, &self.policy);
        let sender = &message.from.address;

        if message.malware {
            return Ok(self.dropped(DropReason::Malware, message));
        }
        if let Some(owner) = topology.owner_label(sender) {
            info!(%owner, "Sender is one of our own addresses");
            return Ok(self.dropped(DropReason::SelfLoop, message));
        }

        if !ctx.whitelisted {
            if message.spam_score >= self.policy.max_spam_score {
                return Ok(self.dropped(DropReason::Spam, message));
            }
            if message.auto_reply {
                if self.dedup.already_notified(sender) {
                    return Ok(self.dropped(DropReason::DuplicateAutoReply, message));
                }
                if ctx.match_request(&topology).await?.is_none() {
                    return Ok(self.dropped(DropReason::AutoReplyWithoutRequest, message));
                }
                self.dedup.mark_notified(sender);
            }
        }

        let Some(target) = ctx.target else {
            return Ok(self.dropped(DropReason::UnknownRecipient, message));
        };
        let installation = topology.installation(target.installation);
        let identity = users::resolve_or_create_user(installation, &message.from, &self.policy).await?;
        ctx.match_request(&topology).await?;

        match (ctx.take_match(), target.desk) {
            (Some(matched), _) => {
                self.comment(&topology, installation, matched, message, &identity)
                    .await
            }
            (None, None) => {
                info!(url = %installation.url, "Installation addressed without a request key");
                self.replies.wrong_address(installation, message).await?;
                Ok(self.dropped(DropReason::WrongAddress, message))
            }
            (None, Some(desk)) => {
                self.create(&topology, installation, desk, message, &identity, ctx.dont_reply)
                    .await
            }
        }
    }

    async fn create(
        &self,
        topology: &Topology,
        installation: &Installation,
        desk_ref: DeskRef,
        message: &Message,
        identity: &UserLookup,
        dont_reply: bool,
    ) -> Result<Decision> {
        let desk = topology.desk(desk_ref);
        let client = installation.client.as_ref();
        let reporter = identity.username();
        let summary = summary(desk, message);
        let description = description(desk, message);

        let key = create_with_fallback(
            client,
            &NewRequest {
                desk_id: &desk.id,
                request_type_id: &desk.request_type_id,
                summary: &summary,
                description: &description,
                reporter,
            },
        )
        .await?;
        info!(key = %key, project = %desk.project_key, known_user = reporter.is_some(), "Created request");

        if !message.attachments.is_empty()
            && let Err(e) = client
                .create_comment(&desk.id, &key, "", &message.attachments)
                .await
        {
            warn!(key = %key, error = %e, "Attachment upload failed, request kept without them");
        }

        users::enroll_participants(
            topology,
            installation,
            desk,
            &key,
            message,
            reporter.unwrap_or_default(),
            None,
            &self.policy,
        )
        .await?;

        let request = client
            .get_request(&key)
            .await?
            .unwrap_or_else(|| Request::created(&key, &desk.id));

        if reporter.is_none() {
            if dont_reply {
                info!(key = %key, "Sender is on the do-not-reply list, no confirmation");
            } else {
                self.replies
                    .request_created(installation, desk, message, &request)
                    .await?;
            }
        }
        Ok(Decision::Created { key })
    }

    async fn comment(
        &self,
        topology: &Topology,
        installation: &Installation,
        matched: MatchedRequest,
        message: &Message,
        identity: &UserLookup,
    ) -> Result<Decision> {
        let MatchedRequest { request, desk } = matched;
        let desk = topology.desk(desk);
        if desk.suppresses_comments_in(&request.status) {
            info!(key = %request.key, status = %request.status, "Status does not take comments");
            return Ok(self.dropped(DropReason::SuppressedStatus, message));
        }

        let client = installation.client.as_ref();
        client
            .create_comment(
                &desk.id,
                &request.key,
                &description(desk, message),
                &message.attachments,
            )
            .await?;
        info!(key = %request.key, "Added comment");

        if let Some(user) = identity.username() {
            if request.is_owned_by(user) {
                info!(key = %request.key, user, "Commenter is reporter or assignee");
            } else {
                client.add_participant(&request.key, user).await?;
                info!(key = %request.key, user, "Added commenter as participant");
            }
        }

        users::enroll_participants(
            topology,
            installation,
            desk,
            &request.key,
            message,
            &request.reporter,
            request.assignee.as_deref(),
            &self.policy,
        )
        .await?;
        Ok(Decision::Commented { key: request.key })
    }
}

/// Create under the reporter; on any failure retry once anonymously.
async fn create_with_fallback(
    client: &dyn TicketingClient,
    request: &NewRequest<'_>,
) -> Result<String> {
    match client.create_request(request).await {
        Ok(key) => Ok(key),
        Err(e) if request.reporter.is_some() => {
            warn!(reporter = ?request.reporter, error = %e, "Creation failed, retrying anonymously");
            let anonymous = NewRequest {
                reporter: None,
                ..request.clone()
            };
            Ok(client.create_request(&anonymous).await?)
        }
        Err(e) => Err(e.into()),
    }
}

/// Subject plus the desk's postfix, on one line.
pub(crate) fn summary(desk: &Desk, message: &Message) -> String {
    let mut summary = message.subject.clone();
    if !desk.request_postfix.is_empty() {
        summary.push_str(" --- ");
        summary.push_str(&desk.request_postfix);
    }
    summary.trim().replace('\n', " ")
}

/// Header stats plus the body, cut at the desk's reply marker.
pub(crate) fn description(desk: &Desk, message: &Message) -> String {
    let body = if desk.reply_above_this.is_empty() {
        message.text_body.as_str()
    } else {
        message
            .text_body
            .split(desk.reply_above_this.as_str())
            .next()
            .unwrap_or_default()
    };
    format!("Received via mail\n\n{}\n\n{}", message.stats(), body)
}
