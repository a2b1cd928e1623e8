//! Key catalog (`ssh_keys.json`) and key directory discovery

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::{keys_file, JsonFile, StorageError};

/// One usable private key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyRecord {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub private_key_path: String,
    #[serde(default)]
    pub public_key_path: String,
    /// Found by scanning the key directory rather than added by the user
    #[serde(default, skip_serializing_if = "is_false")]
    pub discovered: bool,
}

fn is_false(value: &bool) -> bool {
    !*value
}

/// Persisted key store shape
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyStoreFile {
    #[serde(default, deserialize_with = "records_skipping_invalid")]
    pub keys: Vec<KeyRecord>,
    #[serde(default)]
    pub default_key_id: Option<String>,
    #[serde(default)]
    pub ignored_paths: Vec<String>,
}

/// Stored keys merged with discovered ones
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyCatalog {
    pub keys: Vec<KeyRecord>,
    pub default_key_id: Option<String>,
    pub key_dir: PathBuf,
}

impl KeyCatalog {
    pub fn get(&self, id: &str) -> Option<&KeyRecord> {
        self.keys.iter().find(|k| k.id == id)
    }

    pub fn default_key(&self) -> Option<&KeyRecord> {
        self.default_key_id.as_deref().and_then(|id| self.get(id))
    }
}

/// JSON-backed key store plus discovery over one key directory
pub struct KeyStore {
    file: JsonFile,
    key_dir: PathBuf,
    lock: Mutex<()>,
}

impl KeyStore {
    /// Store at the default catalog path
    pub fn new(key_dir: PathBuf) -> Result<Self, StorageError> {
        Ok(Self::with_paths(keys_file()?, key_dir))
    }

    pub fn with_paths(path: PathBuf, key_dir: PathBuf) -> Self {
        Self {
            file: JsonFile::with_path(path),
            key_dir,
            lock: Mutex::new(()),
        }
    }

    pub fn key_dir(&self) -> &Path {
        &self.key_dir
    }

    /// Read the stored catalog; a missing or corrupted file reads as empty
    pub async fn read(&self) -> Result<KeyStoreFile, StorageError> {
        let mut store: KeyStoreFile = self.file.load_or_default().await?;
        if store.default_key_id.as_deref() == Some("") {
            store.default_key_id = None;
        }
        Ok(store)
    }

    /// Persist, de-duplicating by private key path and dropping records without an id
    /// or path
    pub async fn write(&self, store: &KeyStoreFile) -> Result<(), StorageError> {
        let mut seen = HashSet::new();
        let keys = store
            .keys
            .iter()
            .filter(|k| !k.id.is_empty() && !k.private_key_path.is_empty())
            .filter(|k| seen.insert(k.private_key_path.clone()))
            .map(|k| KeyRecord {
                id: k.id.clone(),
                name: if k.name.is_empty() {
                    file_name_of(&k.private_key_path)
                } else {
                    k.name.clone()
                },
                private_key_path: k.private_key_path.clone(),
                public_key_path: if k.public_key_path.is_empty() {
                    format!("{}.pub", k.private_key_path)
                } else {
                    k.public_key_path.clone()
                },
                discovered: false,
            })
            .collect();

        self.file
            .save(&KeyStoreFile {
                keys,
                default_key_id: store.default_key_id.clone().filter(|id| !id.is_empty()),
                ignored_paths: store.ignored_paths.clone(),
            })
            .await
    }

    /// Every regular file in the key directory with a `.pub` sibling, sorted by name
    pub async fn discover(&self) -> Vec<KeyRecord> {
        let mut entries = match tokio::fs::read_dir(&self.key_dir).await {
            Ok(entries) => entries,
            Err(e) => {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!("Key discovery in {} failed: {}", self.key_dir.display(), e);
                }
                return Vec::new();
            }
        };

        let mut discovered = Vec::new();
        loop {
            let entry = match entries.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(e) => {
                    warn!("Key discovery in {} stopped: {}", self.key_dir.display(), e);
                    break;
                }
            };

            let is_file = entry.file_type().await.map(|t| t.is_file()).unwrap_or(false);
            let name = entry.file_name().to_string_lossy().into_owned();
            if !is_file || name.ends_with(".pub") {
                continue;
            }

            let private_key_path = entry.path().to_string_lossy().into_owned();
            let public_key_path = format!("{}.pub", private_key_path);
            if tokio::fs::metadata(&public_key_path).await.is_err() {
                continue;
            }

            discovered.push(KeyRecord {
                id: format!("auto-{}", name),
                name,
                private_key_path,
                public_key_path,
                discovered: true,
            });
        }

        discovered.sort_by(|a, b| a.name.cmp(&b.name));
        debug!(
            "Discovered {} keys in {}",
            discovered.len(),
            self.key_dir.display()
        );
        discovered
    }

    /// Stored keys followed by discovered keys that are neither ignored nor stored
    pub async fn catalog(&self) -> Result<KeyCatalog, StorageError> {
        let store = self.read().await?;
        let discovered = self.discover().await;
        Ok(merge(store, discovered, self.key_dir.clone()))
    }

    /// Register an existing key file. Blank or missing paths and known paths are no-ops.
    pub async fn add_key(&self, path: &str, name: Option<&str>) -> Result<KeyCatalog, StorageError> {
        let trimmed = path.trim();
        if trimmed.is_empty() || tokio::fs::metadata(trimmed).await.is_err() {
            return self.catalog().await;
        }

        {
            let _guard = self.lock.lock().await;
            let mut store = self.read().await?;
            if !store.keys.iter().any(|k| k.private_key_path == trimmed) {
                store.keys.push(new_record(trimmed, name));
                self.write(&store).await?;
                info!("Added key {}", trimmed);
            }
        }

        self.catalog().await
    }

    /// Record a freshly generated key; it becomes the default if none is set
    pub(crate) async fn register_generated(
        &self,
        path: &Path,
        name: &str,
    ) -> Result<KeyCatalog, StorageError> {
        {
            let _guard = self.lock.lock().await;
            let mut store = self.read().await?;
            let path = path.to_string_lossy();

            let id = match store.keys.iter().find(|k| k.private_key_path == path) {
                Some(existing) => existing.id.clone(),
                None => {
                    let record = new_record(&path, Some(name));
                    let id = record.id.clone();
                    store.keys.push(record);
                    id
                }
            };

            if store.default_key_id.is_none() {
                store.default_key_id = Some(id);
            }
            self.write(&store).await?;
        }

        self.catalog().await
    }

    /// Forget a key. Deleting a discovered key hides its path from future scans.
    pub async fn delete_key(&self, id: &str) -> Result<KeyCatalog, StorageError> {
        if id.is_empty() {
            return self.catalog().await;
        }

        {
            let _guard = self.lock.lock().await;
            let mut store = self.read().await?;
            let merged = merge(store.clone(), self.discover().await, self.key_dir.clone());
            let Some(target) = merged.get(id).cloned() else {
                return Ok(merged);
            };

            store.keys.retain(|k| k.id != id);
            if target.discovered && !store.ignored_paths.contains(&target.private_key_path) {
                store.ignored_paths.push(target.private_key_path.clone());
            }
            if store.default_key_id.as_deref() == Some(id) {
                store.default_key_id = None;
            }
            self.write(&store).await?;
            info!("Removed key {}", target.private_key_path);
        }

        self.catalog().await
    }

    /// Set or clear the default key
    pub async fn set_default_key(&self, id: Option<&str>) -> Result<KeyCatalog, StorageError> {
        {
            let _guard = self.lock.lock().await;
            let mut store = self.read().await?;
            store.default_key_id = id.filter(|id| !id.is_empty()).map(String::from);
            self.write(&store).await?;
        }

        self.catalog().await
    }
}

fn merge(store: KeyStoreFile, discovered: Vec<KeyRecord>, key_dir: PathBuf) -> KeyCatalog {
    let ignored: HashSet<&str> = store.ignored_paths.iter().map(String::as_str).collect();
    let mut seen: HashSet<String> = store
        .keys
        .iter()
        .map(|k| k.private_key_path.clone())
        .collect();

    let extra: Vec<KeyRecord> = discovered
        .into_iter()
        .filter(|k| !ignored.contains(k.private_key_path.as_str()))
        .filter(|k| seen.insert(k.private_key_path.clone()))
        .collect();

    let mut keys = store.keys;
    keys.extend(extra);

    KeyCatalog {
        keys,
        default_key_id: store.default_key_id,
        key_dir,
    }
}

fn new_record(path: &str, name: Option<&str>) -> KeyRecord {
    KeyRecord {
        id: uuid::Uuid::new_v4().to_string(),
        name: name
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .map(String::from)
            .unwrap_or_else(|| file_name_of(path)),
        private_key_path: path.to_string(),
        public_key_path: format!("{}.pub", path),
        discovered: false,
    }
}

fn file_name_of(path: &str) -> String {
    Path::new(path)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string())
}

/// Null or malformed entries are skipped rather than failing the whole file
fn records_skipping_invalid<'de, D>(deserializer: D) -> Result<Vec<KeyRecord>, D::Error>
where
    D: Deserializer<'de>,
{
    let values = Option::<Vec<Value>>::deserialize(deserializer)?.unwrap_or_default();
    Ok(values
        .into_iter()
        .filter_map(|v| serde_json::from_value(v).ok())
        .collect())
}
