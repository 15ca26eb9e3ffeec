//! Addressing topology: installations, their desks, and who owns which
//! e-mail address.
//!
//! The topology is built once at startup and is read-only afterwards.
//! Addresses are compared case-insensitively.

pub mod connect;

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::ConfigError;
use crate::mailer::Template;
use crate::message::MailAddress;
use crate::ticketing::TicketingClient;

pub use connect::{ClientFactory, connect, connect_with};

/// Index of an installation within the topology.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct InstallationId(pub usize);

/// Position of a desk within the topology.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeskRef {
    pub installation: InstallationId,
    pub index: usize,
}

/// Entity owning an address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Owner {
    Desk(DeskRef),
    Installation(InstallationId),
}

/// Where a message's recipients point to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Target {
    pub installation: InstallationId,
    /// `None` when only an installation-level address was hit.
    pub desk: Option<DeskRef>,
}

/// A request intake endpoint.
#[derive(Default)]
pub struct Desk {
    /// Owning installation, set by [`Topology::new`].
    pub installation: InstallationId,
    pub project_key: String,
    /// Desk id resolved against the ticketing system.
    pub id: String,
    pub request_type_id: String,
    pub emails: Vec<String>,
    /// Sender of replies about this desk's requests.
    pub reply_address: Option<MailAddress>,
    pub request_postfix: String,
    pub reply_above_this: String,
    pub dont_comment_statuses: Vec<String>,
    /// Receives requests created from webhook events.
    pub event_sink: bool,
    /// Event sink without any mail routing; derived by [`Topology::new`].
    pub event_only: bool,
    pub creation_template: Option<Template>,
    pub max_participants: usize,
}

impl Desk {
    pub fn suppresses_comments_in(&self, status: &str) -> bool {
        self.dont_comment_statuses.iter().any(|s| s == status)
    }
}

/// One ticketing-system endpoint.
pub struct Installation {
    pub url: String,
    pub emails: Vec<String>,
    pub reply_address: Option<MailAddress>,
    pub rejected_mail_subject: String,
    pub rejected_mail_template: Option<Template>,
    pub client: Arc<dyn TicketingClient>,
    /// Present when customer provisioning is enabled.
    pub admin_client: Option<Arc<dyn TicketingClient>>,
    pub desks: Vec<Desk>,
}

impl Installation {
    pub fn new(url: impl Into<String>, client: Arc<dyn TicketingClient>) -> Self {
        Self {
            url: url.into(),
            emails: Vec::new(),
            reply_address: None,
            rejected_mail_subject: String::new(),
            rejected_mail_template: None,
            client,
            admin_client: None,
            desks: Vec::new(),
        }
    }
}

pub struct Topology {
    installations: Vec<Installation>,
    owners: HashMap<String, Owner>,
    event_sink: Option<DeskRef>,
}

impl Topology {
    /// Wire back-references and index every address.
    ///
    /// Fails when two entities claim the same address or more than one
    /// desk is marked as event sink.
    pub fn new(mut installations: Vec<Installation>) -> Result<Self, ConfigError> {
        let mut owners: HashMap<String, Owner> = HashMap::new();
        let mut event_sink = None;

        for (i, installation) in installations.iter_mut().enumerate() {
            let installation_id = InstallationId(i);
            let installation_has_mail = !installation.emails.is_empty();

            for (d, desk) in installation.desks.iter_mut().enumerate() {
                let desk_ref = DeskRef {
                    installation: installation_id,
                    index: d,
                };
                desk.installation = installation_id;
                desk.event_only = desk.event_sink && desk.emails.is_empty() && !installation_has_mail;

                if desk.event_sink && event_sink.replace(desk_ref).is_some() {
                    return Err(ConfigError::InvalidValue {
                        key: "create_event_requests".into(),
                        message: format!(
                            "set on {} and at least one other desk, only one is allowed",
                            desk.project_key
                        ),
                    });
                }
            }
        }

        for (i, installation) in installations.iter().enumerate() {
            let installation_id = InstallationId(i);
            for (d, desk) in installation.desks.iter().enumerate() {
                let owner = Owner::Desk(DeskRef {
                    installation: installation_id,
                    index: d,
                });
                for address in &desk.emails {
                    claim(&mut owners, &installations, address, owner)?;
                }
            }
            for address in &installation.emails {
                claim(
                    &mut owners,
                    &installations,
                    address,
                    Owner::Installation(installation_id),
                )?;
            }
        }

        Ok(Self {
            installations,
            owners,
            event_sink,
        })
    }

    pub fn installations(&self) -> &[Installation] {
        &self.installations
    }

    pub fn installation(&self, id: InstallationId) -> &Installation {
        &self.installations[id.0]
    }

    pub fn desk(&self, desk: DeskRef) -> &Desk {
        &self.installations[desk.installation.0].desks[desk.index]
    }

    pub fn desks(&self) -> impl Iterator<Item = (DeskRef, &Desk)> {
        self.installations.iter().enumerate().flat_map(|(i, inst)| {
            inst.desks.iter().enumerate().map(move |(d, desk)| {
                (
                    DeskRef {
                        installation: InstallationId(i),
                        index: d,
                    },
                    desk,
                )
            })
        })
    }

    /// The desk receiving webhook events, if any.
    pub fn event_sink(&self) -> Option<DeskRef> {
        self.event_sink
    }

    pub fn resolve_by_address(&self, address: &str) -> Option<Owner> {
        self.owners.get(&normalize(address)).copied()
    }

    /// Whether the address belongs to any desk or installation.
    pub fn owns(&self, address: &str) -> bool {
        self.resolve_by_address(address).is_some()
    }

    /// Mail-routable desk of `installation` with the given ticketing id.
    pub fn resolve_desk_by_id(&self, installation: InstallationId, id: &str) -> Option<DeskRef> {
        self.installation(installation)
            .desks
            .iter()
            .position(|desk| desk.id == id && !desk.event_only)
            .map(|index| DeskRef {
                installation,
                index,
            })
    }

    /// Resolve a recipient sequence, given in scan order.
    ///
    /// The first address owned by a desk wins, wherever it appears; only
    /// when no desk is addressed does the first installation address count.
    pub fn resolve_recipients<'a, I>(&self, recipients: I) -> Option<Target>
    where
        I: IntoIterator<Item = &'a MailAddress>,
        I::IntoIter: Clone,
    {
        let recipients = recipients.into_iter();
        let desk = recipients.clone().find_map(|r| match self.resolve_by_address(&r.address) {
            Some(Owner::Desk(desk)) => Some(desk),
            _ => None,
        });
        if let Some(desk) = desk {
            return Some(Target {
                installation: desk.installation,
                desk: Some(desk),
            });
        }
        recipients
            .filter_map(|r| match self.resolve_by_address(&r.address) {
                Some(Owner::Installation(id)) => Some(Target {
                    installation: id,
                    desk: None,
                }),
                _ => None,
            })
            .next()
    }

    /// Human readable owner of an address, for logs.
    pub fn owner_label(&self, address: &str) -> Option<String> {
        self.resolve_by_address(address)
            .map(|owner| describe(&self.installations, owner))
    }
}

fn normalize(address: &str) -> String {
    address.trim().to_lowercase()
}

fn describe(installations: &[Installation], owner: Owner) -> String {
    match owner {
        Owner::Desk(d) => format!(
            "desk {}",
            installations[d.installation.0].desks[d.index].project_key
        ),
        Owner::Installation(i) => format!("installation {}", installations[i.0].url),
    }
}

fn claim(
    owners: &mut HashMap<String, Owner>,
    installations: &[Installation],
    address: &str,
    owner: Owner,
) -> Result<(), ConfigError> {
    let key = normalize(address);
    if let Some(existing) = owners.insert(key, owner) {
        return Err(ConfigError::DuplicateAddress {
            address: address.to_string(),
            first: describe(installations, existing),
            second: describe(installations, owner),
        });
    }
    Ok(())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use async_trait::async_trait;

    use crate::error::TicketingError;
    use crate::message::Attachment;
    use crate::ticketing::{NewRequest, Request};

    /// Client that must never be called.
    pub(crate) struct Unreachable;

    #[async_trait]
    impl TicketingClient for Unreachable {
        async fn find_user(&self, _: &str, _: &str) -> Result<Option<String>, TicketingError> {
            unreachable!()
        }
        async fn create_customer(&self, _: &str, _: &str) -> Result<(), TicketingError> {
            unreachable!()
        }
        async fn get_request(&self, _: &str) -> Result<Option<Request>, TicketingError> {
            unreachable!()
        }
        async fn create_request(&self, _: &NewRequest<'_>) -> Result<String, TicketingError> {
            unreachable!()
        }
        async fn create_comment(
            &self,
            _: &str,
            _: &str,
            _: &str,
            _: &[Attachment],
        ) -> Result<(), TicketingError> {
            unreachable!()
        }
        async fn add_participant(&self, _: &str, _: &str) -> Result<(), TicketingError> {
            unreachable!()
        }
        async fn desk_id(&self, _: &str) -> Result<String, TicketingError> {
            unreachable!()
        }
        async fn request_type_id(&self, _: &str, _: &str) -> Result<String, TicketingError> {
            unreachable!()
        }
    }

    pub(crate) fn desk(key: &str, id: &str, emails: &[&str]) -> Desk {
        Desk {
            project_key: key.into(),
            id: id.into(),
            request_type_id: "1".into(),
            emails: emails.iter().map(|e| e.to_string()).collect(),
            max_participants: 10,
            ..Desk::default()
        }
    }

    fn installation(url: &str, emails: &[&str], desks: Vec<Desk>) -> Installation {
        let mut inst = Installation::new(url, Arc::new(Unreachable));
        inst.emails = emails.iter().map(|e| e.to_string()).collect();
        inst.desks = desks;
        inst
    }

    fn addrs(list: &[&str]) -> Vec<MailAddress> {
        list.iter().map(|a| MailAddress::bare(*a)).collect()
    }

    fn sample() -> Topology {
        Topology::new(vec![
            installation(
                "https://one",
                &["jira@one.example"],
                vec![desk("SUP", "3", &["support@one.example"]), desk("OPS", "4", &[])],
            ),
            installation(
                "https://two",
                &["jira@two.example"],
                vec![desk("HR", "3", &["hr@two.example"])],
            ),
        ])
        .unwrap()
    }

    #[test]
    fn resolves_owners_case_insensitively() {
        let topo = sample();
        assert_eq!(
            topo.resolve_by_address("Support@One.Example"),
            Some(Owner::Desk(DeskRef {
                installation: InstallationId(0),
                index: 0
            }))
        );
        assert_eq!(
            topo.resolve_by_address("jira@two.example"),
            Some(Owner::Installation(InstallationId(1)))
        );
        assert_eq!(topo.resolve_by_address("nobody@example.com"), None);
        let hr = DeskRef {
            installation: InstallationId(1),
            index: 0,
        };
        assert_eq!(topo.desk(hr).installation, InstallationId(1));
        assert_eq!(topo.owner_label("hr@two.example").as_deref(), Some("desk HR"));
    }

    #[test]
    fn desk_wins_over_earlier_installation() {
        let topo = sample();
        let recipients = addrs(&["jira@one.example", "someone@x", "hr@two.example"]);
        let target = topo.resolve_recipients(&recipients).unwrap();
        assert_eq!(target.installation, InstallationId(1));
        assert_eq!(
            target.desk,
            Some(DeskRef {
                installation: InstallationId(1),
                index: 0
            })
        );
    }

    #[test]
    fn first_installation_when_no_desk() {
        let topo = sample();
        let recipients = addrs(&["x@y", "jira@two.example", "jira@one.example"]);
        let target = topo.resolve_recipients(&recipients).unwrap();
        assert_eq!(target.installation, InstallationId(1));
        assert_eq!(target.desk, None);
        assert!(topo.resolve_recipients(&addrs(&["x@y"])).is_none());
    }

    #[test]
    fn desk_ids_are_scoped_to_installation() {
        let topo = sample();
        let one = topo.resolve_desk_by_id(InstallationId(0), "3").unwrap();
        let two = topo.resolve_desk_by_id(InstallationId(1), "3").unwrap();
        assert_eq!(topo.desk(one).project_key, "SUP");
        assert_eq!(topo.desk(two).project_key, "HR");
        assert!(topo.resolve_desk_by_id(InstallationId(1), "4").is_none());
    }

    #[test]
    fn duplicate_addresses_are_rejected() {
        let cases = vec![
            // two desks
            vec![installation(
                "https://one",
                &[],
                vec![desk("A", "1", &["x@e"]), desk("B", "2", &["X@e"])],
            )],
            // desk and installation
            vec![installation("https://one", &["x@e"], vec![desk("A", "1", &["x@e"])])],
            // two installations
            vec![
                installation("https://one", &["x@e"], vec![]),
                installation("https://two", &["x@e"], vec![]),
            ],
        ];
        for installations in cases {
            assert!(matches!(
                Topology::new(installations),
                Err(ConfigError::DuplicateAddress { .. })
            ));
        }
    }

    #[test]
    fn event_only_desk_is_not_routable() {
        let mut sink = desk("EVT", "9", &[]);
        sink.event_sink = true;
        let topo = Topology::new(vec![installation("https://one", &[], vec![sink])]).unwrap();
        let sink_ref = topo.event_sink().unwrap();
        assert!(topo.desk(sink_ref).event_only);
        assert!(topo.resolve_desk_by_id(InstallationId(0), "9").is_none());
    }

    #[test]
    fn sink_with_mail_stays_routable() {
        let mut sink = desk("EVT", "9", &["evt@e"]);
        sink.event_sink = true;
        let topo = Topology::new(vec![installation("https://one", &[], vec![sink])]).unwrap();
        assert!(!topo.desk(topo.event_sink().unwrap()).event_only);
        assert!(topo.resolve_desk_by_id(InstallationId(0), "9").is_some());
    }

    #[test]
    fn second_event_sink_is_rejected() {
        let mut a = desk("A", "1", &[]);
        a.event_sink = true;
        let mut b = desk("B", "2", &[]);
        b.event_sink = true;
        assert!(matches!(
            Topology::new(vec![installation("https://one", &[], vec![a, b])]),
            Err(ConfigError::InvalidValue { .. })
        ));
    }
}
