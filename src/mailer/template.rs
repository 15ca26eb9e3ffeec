//! Plain-text reply templates with `{{placeholder}}` substitution.

use std::collections::HashMap;
use std::path::Path;
use std::sync::LazyLock;

use regex::{Captures, Regex};

use crate::error::{ConfigError, MailError};

/// Every placeholder a template may use.
pub const PLACEHOLDERS: &[&str] = &[
    "request.key",
    "request.portal_link",
    "request.status",
    "desk.project_key",
    "installation.url",
    "sender.name",
    "sender.address",
    "subject",
];

static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\{\s*([A-Za-z_.]+)\s*\}\}").expect("static regex is valid")
});

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    name: String,
    body: String,
}

impl Template {
    /// Read and check a template file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let body = std::fs::read_to_string(path).map_err(|e| ConfigError::Template {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        Self::parse(path.display().to_string(), body)
    }

    /// Fails on placeholders outside [`PLACEHOLDERS`].
    pub fn parse(name: impl Into<String>, body: impl Into<String>) -> Result<Self, ConfigError> {
        let name = name.into();
        let body = body.into();
        if let Some(unknown) = PLACEHOLDER
            .captures_iter(&body)
            .map(|c| c[1].to_string())
            .find(|p| !PLACEHOLDERS.contains(&p.as_str()))
        {
            return Err(ConfigError::Template {
                path: name,
                reason: format!("unknown placeholder {{{{{unknown}}}}}"),
            });
        }
        Ok(Self { name, body })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn render(&self, values: &HashMap<&str, String>) -> Result<String, MailError> {
        let mut missing = None;
        let rendered = PLACEHOLDER.replace_all(&self.body, |c: &Captures<'_>| {
            match values.get(&c[1]) {
                Some(value) => value.clone(),
                None => {
                    missing.get_or_insert_with(|| c[1].to_string());
                    String::new()
                }
            }
        });
        match missing {
            Some(placeholder) => Err(MailError::Render {
                name: self.name.clone(),
                placeholder,
            }),
            None => Ok(rendered.into_owned()),
        }
    }
}
