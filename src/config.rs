//! Configuration types.
//!
//! The whole configuration lives in one YAML file, located through
//! `CONFIG_PATH` (default `./config.yaml`). [`Config::validate`] enforces
//! everything that can be checked without talking to a ticketing system;
//! topology-level checks happen in [`crate::topology::Topology::new`].

use std::path::{Path, PathBuf};
use std::str::FromStr;

use secrecy::SecretString;
use serde::{Deserialize, Deserializer};
use tracing::warn;

use crate::error::ConfigError;

const DEFAULT_CONFIG_PATH: &str = "./config.yaml";
const DEFAULT_DB_PATH: &str = "./inbound_router.db";

/// Top-level configuration.
#[derive(Debug, Deserialize)]
pub struct Config {
    /// Recipient of critical error reports; empty disables them.
    #[serde(default)]
    pub critical_mail_to: String,
    #[serde(default)]
    pub critical_mail_from: String,

    /// Accept webhooks over HTTP and dump them to `dump_dir`.
    #[serde(default)]
    pub dump_requests: bool,
    /// Route inbound items (immediately, or by replaying dumps offline).
    #[serde(default)]
    pub parse_requests: bool,
    /// Parse and log messages without routing them.
    #[serde(default)]
    pub debug_parse_only: bool,
    #[serde(default)]
    pub send_emails: bool,
    #[serde(default)]
    pub handle_events: bool,
    /// Reporter of requests created from events; empty means anonymous.
    #[serde(default)]
    pub handle_events_username: String,

    #[serde(default)]
    pub check_malware: bool,
    /// clamd `host:port`.
    #[serde(default)]
    pub clamav_address: String,

    pub dump_dir: PathBuf,
    /// Retention for dumps and logs; 0 keeps everything.
    #[serde(default)]
    pub email_keep_days: u32,
    #[serde(default)]
    pub max_spam_score: f64,

    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default)]
    pub port: u16,
    /// Shared secret expected in the `token` query parameter.
    #[serde(default, deserialize_with = "optional_secret")]
    pub inbound_token: Option<SecretString>,
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
    /// Cron expression (with seconds) for periodic maintenance.
    #[serde(default)]
    pub maintenance_schedule: Option<String>,
    #[serde(default)]
    pub db_path: Option<PathBuf>,

    #[serde(default)]
    pub installations: Vec<InstallationConfig>,
    #[serde(default)]
    pub email_whitelist: Vec<String>,
    #[serde(default)]
    pub max_participants: usize,

    #[serde(default)]
    pub send_email_host: String,
    #[serde(default)]
    pub send_email_port: u16,
    #[serde(default)]
    pub dont_reply_to_emails: Vec<String>,
}

/// One ticketing installation.
#[derive(Debug, Deserialize)]
pub struct InstallationConfig {
    #[serde(default)]
    pub url: String,
    #[serde(default, deserialize_with = "optional_secret")]
    pub token: Option<SecretString>,
    /// Enables customer provisioning.
    #[serde(default, deserialize_with = "optional_secret")]
    pub admin_token: Option<SecretString>,
    #[serde(default)]
    pub emails: Vec<String>,
    #[serde(default)]
    pub rejected_mail_subject: String,
    #[serde(default)]
    pub rejected_mail_template_path: Option<PathBuf>,
    #[serde(default)]
    pub reply_email_name: String,
    #[serde(default)]
    pub desks: Vec<DeskConfig>,
}

/// One request desk within an installation.
#[derive(Debug, Deserialize)]
pub struct DeskConfig {
    #[serde(default)]
    pub project_key: String,
    #[serde(default)]
    pub create_event_requests: bool,
    #[serde(default)]
    pub emails: Vec<String>,
    #[serde(default)]
    pub reply_email_name: String,
    #[serde(default)]
    pub request_type: String,
    #[serde(default)]
    pub request_postfix: String,
    #[serde(default)]
    pub request_creation_template_path: Option<PathBuf>,
    #[serde(default)]
    pub dont_comment_request_status: Vec<String>,
    #[serde(default)]
    pub reply_above_this: String,
}

impl DeskConfig {
    /// Event sink that neither it nor its installation routes mail for.
    pub fn is_event_only(&self, installation: &InstallationConfig) -> bool {
        self.create_event_requests && self.emails.is_empty() && installation.emails.is_empty()
    }
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_max_body_bytes() -> usize {
    50 * 1024 * 1024
}

fn optional_secret<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<SecretString>, D::Error> {
    let value: Option<String> = Option::deserialize(deserializer)?;
    Ok(value.filter(|s| !s.is_empty()).map(SecretString::from))
}

fn missing(key: &str, hint: impl Into<String>) -> ConfigError {
    ConfigError::MissingRequired {
        key: key.to_string(),
        hint: hint.into(),
    }
}

fn invalid(key: &str, message: impl Into<String>) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        message: message.into(),
    }
}

fn require_file(key: &str, path: Option<&Path>, owner: &str) -> Result<(), ConfigError> {
    match path {
        Some(p) if p.is_file() => Ok(()),
        Some(p) => Err(invalid(
            key,
            format!("'{}' for {owner} is not a file", p.display()),
        )),
        None => Err(missing(key, format!("needed for {owner} when send_emails is set"))),
    }
}

impl Config {
    /// Load from `$CONFIG_PATH` (default `./config.yaml`) and validate.
    pub fn load() -> Result<Self, ConfigError> {
        let path =
            std::env::var("CONFIG_PATH").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        let config = Self::from_file(Path::new(&path))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        serde_yaml::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// Store location: `db_path`, else `$DB_PATH`, else `./inbound_router.db`.
    pub fn db_path(&self) -> PathBuf {
        self.db_path.clone().unwrap_or_else(|| {
            std::env::var("DB_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from(DEFAULT_DB_PATH))
        })
    }

    /// Whether critical errors are mailed.
    pub fn critical_mail_enabled(&self) -> bool {
        !self.critical_mail_to.is_empty()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.critical_mail_to.is_empty() != self.critical_mail_from.is_empty() {
            return Err(invalid(
                "critical_mail_to",
                "critical_mail_to and critical_mail_from must be set together",
            ));
        }
        if !self.dump_requests && !self.parse_requests {
            return Err(invalid(
                "dump_requests",
                "one or both of dump_requests and parse_requests must be true",
            ));
        }
        if self.check_malware && self.clamav_address.is_empty() {
            return Err(missing("clamav_address", "needed when check_malware is set"));
        }
        if !self.dump_dir.is_dir() {
            return Err(invalid(
                "dump_dir",
                format!("'{}' is not a directory", self.dump_dir.display()),
            ));
        }
        if !(self.max_spam_score > 0.0) {
            return Err(invalid("max_spam_score", "must be greater than 0"));
        }
        if self.dump_requests {
            if self.port == 0 {
                return Err(missing("port", "needed when dump_requests is set"));
            }
            if self.inbound_token.is_none() {
                return Err(missing("inbound_token", "needed when dump_requests is set"));
            }
        }
        if let Some(schedule) = &self.maintenance_schedule {
            cron::Schedule::from_str(schedule)
                .map_err(|e| invalid("maintenance_schedule", format!("invalid cron: {e}")))?;
        }
        if self.send_emails {
            if self.send_email_host.is_empty() {
                return Err(missing("send_email_host", "needed when send_emails is set"));
            }
            if self.send_email_port == 0 {
                return Err(missing("send_email_port", "needed when send_emails is set"));
            }
        }
        if self.parse_requests && !self.debug_parse_only {
            if self.max_participants == 0 {
                return Err(missing("max_participants", "must be greater than 0"));
            }
            for installation in &self.installations {
                self.validate_installation(installation)?;
            }
        }
        if self.handle_events {
            let sinks = self
                .installations
                .iter()
                .flat_map(|i| &i.desks)
                .filter(|d| d.create_event_requests)
                .count();
            if sinks != 1 {
                return Err(invalid(
                    "create_event_requests",
                    format!("exactly one desk must have it when handle_events is set, found {sinks}"),
                ));
            }
        }
        Ok(())
    }

    fn validate_installation(&self, installation: &InstallationConfig) -> Result<(), ConfigError> {
        if installation.url.is_empty() {
            return Err(missing("url", "needed for every installation"));
        }
        if installation.token.is_none() {
            return Err(missing(
                "token",
                format!("needed for installation {}", installation.url),
            ));
        }
        if installation.admin_token.is_none() {
            warn!(
                url = %installation.url,
                "No admin token, customer creation is disabled"
            );
        }
        if self.send_emails && !installation.emails.is_empty() {
            require_file(
                "rejected_mail_template_path",
                installation.rejected_mail_template_path.as_deref(),
                &format!("installation {}", installation.url),
            )?;
        }
        for desk in &installation.desks {
            self.validate_desk(installation, desk)?;
        }
        Ok(())
    }

    fn validate_desk(
        &self,
        installation: &InstallationConfig,
        desk: &DeskConfig,
    ) -> Result<(), ConfigError> {
        if desk.project_key.is_empty() {
            return Err(missing("project_key", "needed for every desk"));
        }
        if desk.request_type.is_empty() {
            return Err(missing(
                "request_type",
                format!("needed for desk {}", desk.project_key),
            ));
        }
        if desk.is_event_only(installation) {
            if !desk.request_postfix.is_empty()
                || !desk.reply_email_name.is_empty()
                || desk.request_creation_template_path.is_some()
                || !desk.reply_above_this.is_empty()
            {
                return Err(invalid(
                    "create_event_requests",
                    format!(
                        "desk {} only receives events; request_postfix, reply_email_name, \
                         request_creation_template_path and reply_above_this must be unset",
                        desk.project_key
                    ),
                ));
            }
            return Ok(());
        }
        if desk.emails.is_empty() && installation.emails.is_empty() {
            return Err(missing(
                "emails",
                format!(
                    "desk {} or installation {} must own an address",
                    desk.project_key, installation.url
                ),
            ));
        }
        if self.send_emails && !desk.emails.is_empty() {
            require_file(
                "request_creation_template_path",
                desk.request_creation_template_path.as_deref(),
                &format!("desk {}", desk.project_key),
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_yaml(dump_dir: &Path) -> String {
        format!(
            r#"
dump_requests: true
parse_requests: true
dump_dir: {dir}
max_spam_score: 5.0
port: 8443
inbound_token: s3cret
max_participants: 5
email_whitelist: [boss@example.com]
installations:
  - url: https://jira.example.com
    token: abc
    emails: [jira@example.com]
    rejected_mail_subject: "[rejected]"
    desks:
      - project_key: SUP
        request_type: Email request
        emails: [support@example.com]
        dont_comment_request_status: [Closed]
"#,
            dir = dump_dir.display()
        )
    }

    #[test]
    fn parses_and_validates() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::from_yaml(&base_yaml(dir.path())).unwrap();
        config.validate().unwrap();
        assert_eq!(config.bind_address, "0.0.0.0");
        assert_eq!(config.max_body_bytes, 50 * 1024 * 1024);
        assert_eq!(config.installations.len(), 1);
        let inst = &config.installations[0];
        assert!(inst.token.is_some());
        assert!(inst.admin_token.is_none());
        assert_eq!(inst.desks[0].dont_comment_request_status, ["Closed"]);
    }

    #[test]
    fn load_reads_config_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, base_yaml(dir.path())).unwrap();
        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.port, 8443);
    }

    #[test]
    fn spam_score_must_be_positive() {
        let dir = tempfile::tempdir().unwrap();
        let yaml = base_yaml(dir.path()).replace("max_spam_score: 5.0", "max_spam_score: 0");
        let err = Config::from_yaml(&yaml).unwrap().validate().unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { key, .. } if key == "max_spam_score"));
    }

    #[test]
    fn critical_mail_needs_both_ends() {
        let dir = tempfile::tempdir().unwrap();
        let yaml = format!("critical_mail_to: ops@example.com\n{}", base_yaml(dir.path()));
        assert!(Config::from_yaml(&yaml).unwrap().validate().is_err());
    }

    #[test]
    fn dump_dir_must_exist() {
        let dir = tempfile::tempdir().unwrap();
        let missing_dir = dir.path().join("nope");
        let config = Config::from_yaml(&base_yaml(&missing_dir)).unwrap();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { key, .. }) if key == "dump_dir"
        ));
    }

    #[test]
    fn send_emails_requires_templates() {
        let dir = tempfile::tempdir().unwrap();
        let yaml = format!(
            "send_emails: true\nsend_email_host: smtp.example.com\nsend_email_port: 25\n{}",
            base_yaml(dir.path())
        );
        let err = Config::from_yaml(&yaml).unwrap().validate().unwrap_err();
        assert!(
            matches!(err, ConfigError::MissingRequired { key, .. } if key == "rejected_mail_template_path")
        );
    }

    #[test]
    fn handle_events_needs_exactly_one_sink() {
        let dir = tempfile::tempdir().unwrap();
        let yaml = format!("handle_events: true\n{}", base_yaml(dir.path()));
        assert!(Config::from_yaml(&yaml).unwrap().validate().is_err());

        let with_sink = yaml.replace(
            "        dont_comment_request_status: [Closed]\n",
            "        dont_comment_request_status: [Closed]\n      - project_key: EVT\n        request_type: Event\n        create_event_requests: true\n",
        );
        Config::from_yaml(&with_sink).unwrap().validate().unwrap();
    }

    #[test]
    fn event_only_desk_rejects_mail_settings() {
        let dir = tempfile::tempdir().unwrap();
        let yaml = format!(
            r#"
parse_requests: true
dump_dir: {dir}
max_spam_score: 5.0
max_participants: 5
handle_events: true
installations:
  - url: https://jira.example.com
    token: abc
    desks:
      - project_key: EVT
        request_type: Event
        create_event_requests: true
        request_postfix: nope
"#,
            dir = dir.path().display()
        );
        assert!(Config::from_yaml(&yaml).unwrap().validate().is_err());
        let fixed = yaml.replace("        request_postfix: nope\n", "");
        Config::from_yaml(&fixed).unwrap().validate().unwrap();
    }

    #[test]
    fn bad_cron_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let yaml = format!("maintenance_schedule: \"every day\"\n{}", base_yaml(dir.path()));
        assert!(Config::from_yaml(&yaml).unwrap().validate().is_err());
        let yaml = format!("maintenance_schedule: \"0 0 3 * * *\"\n{}", base_yaml(dir.path()));
        Config::from_yaml(&yaml).unwrap().validate().unwrap();
    }

    #[test]
    fn db_path_prefers_config() {
        let dir = tempfile::tempdir().unwrap();
        let yaml = format!("db_path: /var/lib/router.db\n{}", base_yaml(dir.path()));
        let config = Config::from_yaml(&yaml).unwrap();
        assert_eq!(config.db_path(), PathBuf::from("/var/lib/router.db"));
    }
}
