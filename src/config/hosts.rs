//! Saved host profiles and groups (`saved_hosts.json`)

use std::collections::HashSet;
use std::path::PathBuf;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use tokio::sync::Mutex;

use super::storage::{hosts_file, JsonFile, StorageError};
use crate::keys::KeyCatalog;
use crate::session::{AuthType, ConnectRequest};

/// Id of the group every host falls back to
pub const DEFAULT_GROUP_ID: &str = "default";

const DEFAULT_PORT: u16 = 22;

/// Host group
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostGroup {
    pub id: String,
    #[serde(default)]
    pub name: String,
}

impl HostGroup {
    pub fn default_group() -> Self {
        Self {
            id: DEFAULT_GROUP_ID.to_string(),
            name: "Default".to_string(),
        }
    }
}

/// Saved host. Fields the service does not know about are kept as-is.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HostProfile {
    #[serde(default, deserialize_with = "string_or_empty")]
    pub id: String,
    #[serde(default)]
    pub host: String,
    #[serde(
        default,
        deserialize_with = "lenient_number",
        skip_serializing_if = "Option::is_none"
    )]
    pub port: Option<u16>,
    #[serde(default)]
    pub username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub passphrase: Option<String>,
    #[serde(
        default,
        deserialize_with = "lenient_number",
        skip_serializing_if = "Option::is_none"
    )]
    pub keepalive: Option<u64>,
    #[serde(default, deserialize_with = "string_or_empty")]
    pub group_id: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl HostProfile {
    /// Build a connection request, picking the host's key or else the default key.
    ///
    /// Key mode is used when the profile asks for it, or when a key resolves and the
    /// profile does not insist on a password.
    pub fn to_request(&self, catalog: &KeyCatalog) -> ConnectRequest {
        let selected = match self.key_id.as_deref().filter(|id| !id.is_empty()) {
            Some(id) => catalog.get(id),
            None => catalog.default_key(),
        };

        let auth_type = self.auth_type.as_deref().map(str::to_ascii_lowercase);
        let use_key = auth_type.as_deref() == Some("key")
            || (selected.is_some() && auth_type.as_deref() != Some("password"));

        let mut request = ConnectRequest {
            host: self.host.clone(),
            port: self.port.filter(|p| *p != 0).unwrap_or(DEFAULT_PORT),
            username: self.username.clone(),
            auth_type: AuthType::Password,
            password: self.password.clone().filter(|p| !p.is_empty()),
            key_id: None,
            private_key_path: None,
            passphrase: None,
            keepalive_secs: self.keepalive,
        };

        if let (true, Some(key)) = (use_key, selected) {
            request.auth_type = AuthType::Key;
            request.key_id = Some(key.id.clone());
            request.private_key_path = Some(PathBuf::from(&key.private_key_path));
            request.passphrase = self.passphrase.clone().filter(|p| !p.is_empty());
            request.password = None;
        }

        request
    }
}

/// Contents of `saved_hosts.json`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HostStoreFile {
    pub hosts: Vec<HostProfile>,
    pub groups: Vec<HostGroup>,
}

impl Default for HostStoreFile {
    fn default() -> Self {
        Self {
            hosts: Vec::new(),
            groups: vec![HostGroup::default_group()],
        }
    }
}

/// Both on-disk layouts: the current object and the legacy bare host array
#[derive(Deserialize)]
#[serde(untagged)]
enum StoredHosts {
    Legacy(Vec<HostProfile>),
    Current {
        #[serde(default)]
        hosts: Vec<HostProfile>,
        #[serde(default)]
        groups: Vec<HostGroup>,
    },
}

impl From<StoredHosts> for HostStoreFile {
    fn from(stored: StoredHosts) -> Self {
        let (hosts, groups) = match stored {
            StoredHosts::Legacy(hosts) => (hosts, Vec::new()),
            StoredHosts::Current { hosts, groups } => (hosts, groups),
        };
        Self { hosts, groups }
    }
}

/// Host profile store
pub struct HostStore {
    file: JsonFile,
    lock: Mutex<()>,
}

impl HostStore {
    pub fn new() -> Result<Self, StorageError> {
        Ok(Self::with_path(hosts_file()?))
    }

    /// Store with custom path (for testing)
    pub fn with_path(path: PathBuf) -> Self {
        Self {
            file: JsonFile::with_path(path),
            lock: Mutex::new(()),
        }
    }

    /// Read hosts and groups. Every host gets a group and the default group always exists.
    pub async fn read(&self) -> Result<HostStoreFile, StorageError> {
        let mut store: HostStoreFile = self
            .file
            .load::<StoredHosts>()
            .await?
            .map(HostStoreFile::from)
            .unwrap_or_default();

        if store.groups.is_empty() {
            store.groups.push(HostGroup::default_group());
        }

        for host in &mut store.hosts {
            if host.group_id.is_empty() {
                host.group_id = DEFAULT_GROUP_ID.to_string();
            }
        }

        if !store.groups.iter().any(|g| g.id == DEFAULT_GROUP_ID) {
            store.groups.insert(0, HostGroup::default_group());
        }

        Ok(store)
    }

    /// Persist, dropping groups with a blank or repeated id
    pub async fn write(&self, store: &HostStoreFile) -> Result<(), StorageError> {
        let mut seen = HashSet::new();
        let mut groups: Vec<HostGroup> = store
            .groups
            .iter()
            .filter(|g| !g.id.is_empty() && seen.insert(g.id.clone()))
            .map(|g| HostGroup {
                id: g.id.clone(),
                name: if g.name.is_empty() {
                    g.id.clone()
                } else {
                    g.name.clone()
                },
            })
            .collect();

        if groups.is_empty() {
            groups.push(HostGroup::default_group());
        }

        self.file
            .save(&HostStoreFile {
                hosts: store.hosts.clone(),
                groups,
            })
            .await
    }

    /// Update a host by id (merging fields) or insert it under a fresh id.
    ///
    /// `group_name` names the group if it has to be created.
    pub async fn save_host(
        &self,
        mut host: HostProfile,
        group_name: Option<&str>,
    ) -> Result<HostStoreFile, StorageError> {
        let _guard = self.lock.lock().await;
        let mut store = self.read().await?;

        if host.group_id.is_empty() {
            host.group_id = DEFAULT_GROUP_ID.to_string();
        }
        if !store.groups.iter().any(|g| g.id == host.group_id) {
            store.groups.push(HostGroup {
                id: host.group_id.clone(),
                name: group_name
                    .filter(|n| !n.trim().is_empty())
                    .map(|n| n.trim().to_string())
                    .unwrap_or_else(|| host.group_id.clone()),
            });
        }

        let existing = store
            .hosts
            .iter_mut()
            .find(|h| !host.id.is_empty() && h.id == host.id);

        match existing {
            Some(current) => merge_host(current, host),
            None => {
                host.id = uuid::Uuid::new_v4().to_string();
                tracing::info!("Saving new host {} ({})", host.host, host.id);
                store.hosts.push(host);
            }
        }

        self.write(&store).await?;
        Ok(store)
    }

    pub async fn delete_host(&self, host_id: &str) -> Result<HostStoreFile, StorageError> {
        let _guard = self.lock.lock().await;
        let mut store = self.read().await?;
        store.hosts.retain(|h| h.id != host_id);
        self.write(&store).await?;
        Ok(store)
    }

    /// Add a group unless the name is blank or already taken (case-insensitive)
    pub async fn save_group(&self, name: &str) -> Result<HostStoreFile, StorageError> {
        let trimmed = name.trim();
        if trimmed.is_empty() {
            return self.read().await;
        }

        let _guard = self.lock.lock().await;
        let mut store = self.read().await?;
        let lowered = trimmed.to_lowercase();
        if store.groups.iter().any(|g| g.name.to_lowercase() == lowered) {
            return Ok(store);
        }

        store.groups.push(HostGroup {
            id: uuid::Uuid::new_v4().to_string(),
            name: trimmed.to_string(),
        });
        self.write(&store).await?;
        Ok(store)
    }
}

/// Overlay `update` onto `current`; absent optional fields keep their stored values
fn merge_host(current: &mut HostProfile, update: HostProfile) {
    if !update.host.is_empty() {
        current.host = update.host;
    }
    if update.port.is_some() {
        current.port = update.port;
    }
    if !update.username.is_empty() {
        current.username = update.username;
    }
    if update.password.is_some() {
        current.password = update.password;
    }
    if update.auth_type.is_some() {
        current.auth_type = update.auth_type;
    }
    if update.key_id.is_some() {
        current.key_id = update.key_id;
    }
    if update.passphrase.is_some() {
        current.passphrase = update.passphrase;
    }
    if update.keepalive.is_some() {
        current.keepalive = update.keepalive;
    }
    current.group_id = update.group_id;
    current.extra.extend(update.extra);
}

fn string_or_empty<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::String(s) => s,
        Value::Number(n) => n.to_string(),
        _ => String::new(),
    })
}

/// Accepts a number, a numeric string, or null; anything unparseable becomes `None`
fn lenient_number<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: std::str::FromStr,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::Number(n) => n.to_string().parse().ok(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    })
}
