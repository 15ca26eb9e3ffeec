//! Resolving addresses to ticketing accounts and enrolling participants.

use tracing::{debug, info, warn};

use super::RoutingPolicy;
use crate::error::{ConsistencyError, Result, TicketingError};
use crate::message::{MailAddress, Message};
use crate::topology::{Desk, Installation, Topology};

/// Why an address ended up without an account.
#[derive(Debug)]
pub enum Unprovisioned {
    /// The installation has no admin credential.
    NoAdminCredential,
    /// Address is on the do-not-reply list.
    DoNotReply,
    /// Account creation failed; logged and otherwise ignored.
    Failed(TicketingError),
}

/// Outcome of [`resolve_or_create_user`].
#[derive(Debug)]
pub enum UserLookup {
    Found(String),
    Provisioned(String),
    Unknown(Unprovisioned),
}

impl UserLookup {
    pub fn username(&self) -> Option<&str> {
        match self {
            UserLookup::Found(user) | UserLookup::Provisioned(user) => Some(user),
            UserLookup::Unknown(_) => None,
        }
    }
}

/// Find the account for `address`, creating a customer when allowed.
///
/// Only the final re-lookup after a successful creation may fail with a
/// consistency error; a failed creation leaves the address unknown.
pub async fn resolve_or_create_user(
    installation: &Installation,
    address: &MailAddress,
    policy: &RoutingPolicy,
) -> Result<UserLookup> {
    let client = installation.client.as_ref();
    if let Some(user) = client.find_user(&address.address, &address.name).await? {
        return Ok(UserLookup::Found(user));
    }
    let lowered = address.address.to_lowercase();
    if lowered != address.address
        && let Some(user) = client.find_user(&lowered, &address.name).await?
    {
        return Ok(UserLookup::Found(user));
    }

    let Some(admin) = installation.admin_client.as_ref() else {
        debug!(address = %address.address, "No admin credential, not creating customer");
        return Ok(UserLookup::Unknown(Unprovisioned::NoAdminCredential));
    };
    if policy.is_dont_reply(&address.address) {
        debug!(address = %address.address, "Not creating customer on the do-not-reply list");
        return Ok(UserLookup::Unknown(Unprovisioned::DoNotReply));
    }

    if let Err(e) = admin.create_customer(&address.address, &address.name).await {
        warn!(address = %address.address, error = %e, "Customer creation failed, continuing without account");
        return Ok(UserLookup::Unknown(Unprovisioned::Failed(e)));
    }
    match client.find_user(&address.address, &address.name).await? {
        Some(user) => {
            info!(address = %address.address, user = %user, "Created customer");
            Ok(UserLookup::Provisioned(user))
        }
        None => Err(ConsistencyError::UserVanished {
            address: address.address.clone(),
        }
        .into()),
    }
}

/// Add the message's Cc, To and Bcc addresses to a request, in that order.
///
/// Addresses the router owns, unknown users, the reporter and the assignee
/// are skipped. Stops once the desk's cap is reached; returns how many
/// participants were added. An add failure aborts, earlier adds stay.
#[allow(clippy::too_many_arguments)]
pub async fn enroll_participants(
    topology: &Topology,
    installation: &Installation,
    desk: &Desk,
    key: &str,
    message: &Message,
    reporter: &str,
    assignee: Option<&str>,
    policy: &RoutingPolicy,
) -> Result<usize> {
    let mut added = 0;
    for address in message.participant_candidates() {
        if added >= desk.max_participants {
            info!(key, cap = desk.max_participants, "Participant cap reached");
            break;
        }
        if topology.owns(&address.address) {
            continue;
        }
        let lookup = resolve_or_create_user(installation, address, policy).await?;
        let Some(user) = lookup.username() else {
            continue;
        };
        if user == reporter || assignee == Some(user) {
            debug!(key, user, "Reporter or assignee, not adding as participant");
            continue;
        }
        installation.client.add_participant(key, user).await?;
        info!(key, user, address = %address.address, "Added participant");
        added += 1;
    }
    Ok(added)
}
