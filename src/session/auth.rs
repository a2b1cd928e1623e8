//! Connection requests and credential building
//!
//! [`AuthConfigBuilder::build`] validates a request synchronously and picks the key to use.
//! Reading and converting the key file happens later, inside the session task, through
//! [`PendingAuth::resolve`].

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::config::ServiceSettings;
use crate::keys::{AuthError, KeyCatalog, KeyMaterialResolver};
use crate::ssh::{AuthConfig, Credential, KeepaliveConfig};

/// Authentication mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthType {
    #[default]
    Password,
    Key,
}

/// Connection request as the consumer sends it
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectRequest {
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub username: String,
    #[serde(default)]
    pub auth_type: AuthType,
    #[serde(default)]
    pub password: Option<String>,
    /// Key catalog id; ignored when `private_key_path` is set
    #[serde(default)]
    pub key_id: Option<String>,
    #[serde(default)]
    pub private_key_path: Option<PathBuf>,
    #[serde(default)]
    pub passphrase: Option<String>,
    /// Keepalive interval; 0 or unset uses the service default
    #[serde(default, alias = "keepalive")]
    pub keepalive_secs: Option<u64>,
}

fn default_port() -> u16 {
    22
}

impl ConnectRequest {
    pub fn with_password(
        host: impl Into<String>,
        port: u16,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            port,
            username: username.into(),
            auth_type: AuthType::Password,
            password: Some(password.into()),
            key_id: None,
            private_key_path: None,
            passphrase: None,
            keepalive_secs: None,
        }
    }

    pub fn with_key(
        host: impl Into<String>,
        port: u16,
        username: impl Into<String>,
        key_path: impl Into<PathBuf>,
        passphrase: Option<String>,
    ) -> Self {
        Self {
            host: host.into(),
            port,
            username: username.into(),
            auth_type: AuthType::Key,
            password: None,
            key_id: None,
            private_key_path: Some(key_path.into()),
            passphrase,
            keepalive_secs: None,
        }
    }
}

impl fmt::Debug for ConnectRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectRequest")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("auth_type", &self.auth_type)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("key_id", &self.key_id)
            .field("private_key_path", &self.private_key_path)
            .field("passphrase", &self.passphrase.as_ref().map(|_| "<redacted>"))
            .field("keepalive_secs", &self.keepalive_secs)
            .finish()
    }
}

/// Request validation failures, reported before any session exists
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Host is required")]
    InvalidHost,

    #[error("Username is required")]
    InvalidUsername,

    #[error("Invalid port: {0}")]
    InvalidPort(u16),

    #[error("Missing credential: {0}")]
    MissingCredential(String),
}

enum PendingCredential {
    Password(String),
    Key {
        path: PathBuf,
        passphrase: Option<String>,
    },
}

/// Validated request whose key, if any, has not been read yet
pub struct PendingAuth {
    host: String,
    port: u16,
    username: String,
    credential: PendingCredential,
    keepalive: KeepaliveConfig,
    connect_timeout: Duration,
}

impl PendingAuth {
    /// Key path this request will authenticate with
    pub fn key_path(&self) -> Option<&Path> {
        match &self.credential {
            PendingCredential::Key { path, .. } => Some(path),
            PendingCredential::Password(_) => None,
        }
    }

    /// Read (and if needed convert) the key, producing the final transport config
    pub async fn resolve(self, resolver: &KeyMaterialResolver) -> Result<AuthConfig, AuthError> {
        let credential = match self.credential {
            PendingCredential::Password(password) => Credential::Password(password),
            PendingCredential::Key { path, passphrase } => {
                let material = resolver.resolve(&path, passphrase.as_deref()).await?;
                Credential::Key {
                    path,
                    passphrase,
                    material,
                }
            }
        };

        Ok(AuthConfig {
            host: self.host,
            port: self.port,
            username: self.username,
            credential,
            keepalive: self.keepalive,
            connect_timeout: self.connect_timeout,
        })
    }
}

impl fmt::Debug for PendingAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingAuth")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("key_path", &self.key_path())
            .finish_non_exhaustive()
    }
}

/// Turns connection requests into [`PendingAuth`]
#[derive(Debug, Clone)]
pub struct AuthConfigBuilder {
    settings: ServiceSettings,
}

impl AuthConfigBuilder {
    pub fn new(settings: ServiceSettings) -> Self {
        Self { settings }
    }

    /// Validate `request` and select its credential.
    ///
    /// Key selection: explicit path, then the catalog entry named by `key_id`, then the
    /// catalog's default key.
    pub fn build(
        &self,
        request: &ConnectRequest,
        catalog: &KeyCatalog,
    ) -> Result<PendingAuth, ConfigError> {
        let host = request.host.trim();
        if host.is_empty() {
            return Err(ConfigError::InvalidHost);
        }
        let username = request.username.trim();
        if username.is_empty() {
            return Err(ConfigError::InvalidUsername);
        }
        if request.port == 0 {
            return Err(ConfigError::InvalidPort(request.port));
        }

        let credential = match request.auth_type {
            AuthType::Password => {
                let password = request.password.clone().ok_or_else(|| {
                    ConfigError::MissingCredential("password authentication needs a password".into())
                })?;
                PendingCredential::Password(password)
            }
            AuthType::Key => PendingCredential::Key {
                path: select_key_path(request, catalog)?,
                passphrase: request.passphrase.clone().filter(|p| !p.is_empty()),
            },
        };

        debug!(
            "Built auth for {}@{}:{} ({:?})",
            username, host, request.port, request.auth_type
        );

        Ok(PendingAuth {
            host: host.to_string(),
            port: request.port,
            username: username.to_string(),
            credential,
            keepalive: self.settings.keepalive(request.keepalive_secs),
            connect_timeout: self.settings.connect_timeout(),
        })
    }
}

fn select_key_path(request: &ConnectRequest, catalog: &KeyCatalog) -> Result<PathBuf, ConfigError> {
    if let Some(path) = request
        .private_key_path
        .as_ref()
        .filter(|p| !p.as_os_str().is_empty())
    {
        return Ok(expand_tilde(path));
    }

    let record = match request.key_id.as_deref().filter(|id| !id.is_empty()) {
        Some(id) => catalog
            .get(id)
            .ok_or_else(|| ConfigError::MissingCredential(format!("key {} not found", id)))?,
        None => catalog.default_key().ok_or_else(|| {
            ConfigError::MissingCredential("no key selected and no default key configured".into())
        })?,
    };

    Ok(expand_tilde(Path::new(&record.private_key_path)))
}

/// Expand `~/` to the home directory
fn expand_tilde(path: &Path) -> PathBuf {
    if let Ok(rest) = path.strip_prefix("~") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    path.to_path_buf()
}
