//! Credential lookup injected into the HTTP client.

use std::collections::HashMap;
use std::path::PathBuf;

use tracing::warn;

use crate::config::{Config, CredentialRecord, API_KEY_ENV};

pub const DEFAULT_AUTH_HEADER: &str = "Authorization";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credential {
    pub api_key: String,
    /// Overrides the client's base URL when set.
    pub endpoint: Option<String>,
    pub auth_header: Option<String>,
}

impl Credential {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self { api_key: api_key.into(), endpoint: None, auth_header: None }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    pub fn with_auth_header(mut self, header: impl Into<String>) -> Self {
        self.auth_header = Some(header.into());
        self
    }

    pub fn header_name(&self) -> &str {
        self.auth_header.as_deref().unwrap_or(DEFAULT_AUTH_HEADER)
    }
}

impl From<&CredentialRecord> for Credential {
    fn from(record: &CredentialRecord) -> Self {
        Self {
            api_key: record.api_key.clone(),
            endpoint: record.endpoint.clone(),
            auth_header: record.auth_header.clone(),
        }
    }
}

/// Resolves the credential for a model, called once per request.
pub trait CredentialProvider: Send + Sync {
    fn resolve(&self, model: &str) -> Option<Credential>;
}

/// Fixed set of credentials: exact model match, else the default.
#[derive(Debug, Clone, Default)]
pub struct StaticCredentials {
    default: Option<Credential>,
    per_model: HashMap<String, Credential>,
}

impl StaticCredentials {
    pub fn new(default: Credential) -> Self {
        Self { default: Some(default), per_model: HashMap::new() }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn with(mut self, model: impl Into<String>, credential: Credential) -> Self {
        self.per_model.insert(model.into(), credential);
        self
    }
}

impl CredentialProvider for StaticCredentials {
    fn resolve(&self, model: &str) -> Option<Credential> {
        self.per_model
            .get(model)
            .or(self.default.as_ref())
            .cloned()
    }
}

/// Reads the config file on every lookup so edits apply to the next request.
#[derive(Debug, Clone)]
pub struct ConfigCredentials {
    path: PathBuf,
}

impl ConfigCredentials {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn from_default_path() -> anyhow::Result<Self> {
        Ok(Self::new(Config::get_config_path()?))
    }
}

impl CredentialProvider for ConfigCredentials {
    fn resolve(&self, model: &str) -> Option<Credential> {
        let config = match Config::load_from(&self.path) {
            Ok(config) => config,
            Err(e) => {
                warn!("Ignoring unreadable config for credentials: {:#}", e);
                Config::new()
            }
        };

        let records = &config.credentials;
        let matched = records
            .iter()
            .find(|r| r.model.as_deref() == Some(model))
            .or_else(|| records.iter().find(|r| r.model.is_none()))
            .map(Credential::from);

        matched.or_else(|| {
            std::env::var(API_KEY_ENV)
                .ok()
                .filter(|k| !k.trim().is_empty())
                .map(Credential::new)
        })
    }
}
