//! Build a [`Topology`] from configuration, resolving desk and request
//! type ids against each installation.

use std::sync::Arc;

use secrecy::{ExposeSecret, SecretString};
use tracing::{info, warn};

use super::{Desk, Installation, Topology};
use crate::config::{Config, DeskConfig, InstallationConfig};
use crate::error::{ConfigError, Result};
use crate::mailer::Template;
use crate::message::MailAddress;
use crate::ticketing::{JiraClient, TicketingClient};

/// Creates a ticketing client for an installation URL and token.
pub trait ClientFactory: Send + Sync {
    fn client(&self, url: &str, token: SecretString) -> Arc<dyn TicketingClient>;
}

impl<F> ClientFactory for F
where
    F: Fn(&str, SecretString) -> Arc<dyn TicketingClient> + Send + Sync,
{
    fn client(&self, url: &str, token: SecretString) -> Arc<dyn TicketingClient> {
        self(url, token)
    }
}

struct JiraFactory;

impl ClientFactory for JiraFactory {
    fn client(&self, url: &str, token: SecretString) -> Arc<dyn TicketingClient> {
        Arc::new(JiraClient::new(url, token))
    }
}

/// Connect every configured installation through [`JiraClient`].
pub async fn connect(config: &Config) -> Result<Topology> {
    connect_with(config, &JiraFactory).await
}

pub async fn connect_with(config: &Config, factory: &dyn ClientFactory) -> Result<Topology> {
    let mut installations = Vec::with_capacity(config.installations.len());
    for installation in &config.installations {
        installations.push(connect_installation(config, installation, factory).await?);
    }
    let topology = Topology::new(installations)?;
    info!(
        installations = topology.installations().len(),
        desks = topology.desks().count(),
        event_sink = topology.event_sink().is_some(),
        "Topology ready"
    );
    Ok(topology)
}

fn reveal(secret: &SecretString) -> SecretString {
    SecretString::from(secret.expose_secret().to_string())
}

fn load_template(send_emails: bool, path: Option<&std::path::Path>) -> Result<Option<Template>> {
    match path {
        Some(path) if send_emails => Ok(Some(Template::load(path)?)),
        _ => Ok(None),
    }
}

async fn connect_installation(
    config: &Config,
    cfg: &InstallationConfig,
    factory: &dyn ClientFactory,
) -> Result<Installation> {
    let token = cfg.token.as_ref().ok_or_else(|| ConfigError::MissingRequired {
        key: "token".into(),
        hint: format!("needed for installation {}", cfg.url),
    })?;
    let client = factory.client(&cfg.url, reveal(token));

    let mut installation = Installation::new(&cfg.url, client.clone());
    installation.admin_client = cfg
        .admin_token
        .as_ref()
        .map(|admin| factory.client(&cfg.url, reveal(admin)));
    if installation.admin_client.is_none() {
        warn!(url = %cfg.url, "Customer provisioning disabled");
    }
    installation.emails = cfg.emails.clone();
    installation.rejected_mail_subject = cfg.rejected_mail_subject.clone();
    installation.reply_address = cfg
        .emails
        .first()
        .map(|address| MailAddress::new(&cfg.reply_email_name, address));
    if !cfg.emails.is_empty() {
        installation.rejected_mail_template =
            load_template(config.send_emails, cfg.rejected_mail_template_path.as_deref())?;
    }

    for desk in &cfg.desks {
        installation
            .desks
            .push(connect_desk(config, cfg, desk, client.as_ref()).await?);
    }
    Ok(installation)
}

async fn connect_desk(
    config: &Config,
    installation: &InstallationConfig,
    cfg: &DeskConfig,
    client: &dyn TicketingClient,
) -> Result<Desk> {
    let id = client.desk_id(&cfg.project_key).await?;
    let request_type_id = client.request_type_id(&id, &cfg.request_type).await?;
    info!(
        project = %cfg.project_key,
        desk_id = %id,
        request_type_id = %request_type_id,
        "Resolved desk"
    );

    let reply_address = cfg
        .emails
        .first()
        .or(installation.emails.first())
        .map(|address| MailAddress::new(&cfg.reply_email_name, address));
    let creation_template = if cfg.emails.is_empty() {
        None
    } else {
        load_template(
            config.send_emails,
            cfg.request_creation_template_path.as_deref(),
        )?
    };

    Ok(Desk {
        project_key: cfg.project_key.clone(),
        id,
        request_type_id,
        emails: cfg.emails.clone(),
        reply_address,
        request_postfix: cfg.request_postfix.clone(),
        reply_above_this: cfg.reply_above_this.clone(),
        dont_comment_statuses: cfg.dont_comment_request_status.clone(),
        event_sink: cfg.create_event_requests,
        creation_template,
        max_participants: config.max_participants,
        ..Desk::default()
    })
}
