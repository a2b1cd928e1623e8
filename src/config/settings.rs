//! Service settings

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::storage::{default_key_dir, settings_file, JsonFile, StorageError};
use crate::ssh::{KeepaliveConfig, DEFAULT_KEEPALIVE_MAX, DEFAULT_KEEPALIVE_SECS, DEFAULT_TERM};

/// Default transport connect timeout in seconds
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 30;

/// Tunables for a `SessionService`. Every field has a default, so partial files load.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ServiceSettings {
    /// Keepalive probe interval, used when a request does not set one
    pub keepalive_interval_secs: u64,
    /// Missed probes before the transport declares the peer dead
    pub keepalive_count_max: usize,
    pub connect_timeout_secs: u64,
    /// Terminal type requested for interactive shells
    pub term: String,
    /// PuTTY key converter executable
    pub converter_program: String,
    /// Key generator executable
    pub keygen_program: String,
    /// Directory scanned for keys; `~/.ssh` when unset
    pub key_dir: Option<PathBuf>,
    /// Directory for converted key files; the OS temp dir when unset
    pub temp_dir: Option<PathBuf>,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            keepalive_interval_secs: DEFAULT_KEEPALIVE_SECS,
            keepalive_count_max: DEFAULT_KEEPALIVE_MAX,
            connect_timeout_secs: DEFAULT_CONNECT_TIMEOUT_SECS,
            term: DEFAULT_TERM.to_string(),
            converter_program: "puttygen".to_string(),
            keygen_program: "ssh-keygen".to_string(),
            key_dir: None,
            temp_dir: None,
        }
    }
}

impl ServiceSettings {
    /// Keepalive policy; a zero or absent override uses the configured interval
    pub fn keepalive(&self, interval_override: Option<u64>) -> KeepaliveConfig {
        let secs = match interval_override {
            Some(secs) if secs > 0 => secs,
            _ if self.keepalive_interval_secs > 0 => self.keepalive_interval_secs,
            _ => DEFAULT_KEEPALIVE_SECS,
        };
        KeepaliveConfig {
            interval: Duration::from_secs(secs),
            max_missed: self.keepalive_count_max,
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn resolved_key_dir(&self) -> Result<PathBuf, StorageError> {
        match &self.key_dir {
            Some(dir) => Ok(dir.clone()),
            None => default_key_dir(),
        }
    }

    pub fn resolved_temp_dir(&self) -> PathBuf {
        self.temp_dir.clone().unwrap_or_else(std::env::temp_dir)
    }
}

/// Loads and saves `settings.json`
pub struct SettingsStorage {
    file: JsonFile,
}

impl SettingsStorage {
    /// Storage at the default path
    pub fn new() -> Result<Self, StorageError> {
        Ok(Self::with_path(settings_file()?))
    }

    /// Storage with custom path (for testing)
    pub fn with_path(path: PathBuf) -> Self {
        Self {
            file: JsonFile::with_path(path),
        }
    }

    /// Load settings; missing or corrupted files yield defaults
    pub async fn load(&self) -> Result<ServiceSettings, StorageError> {
        self.file.load_or_default().await
    }

    pub async fn save(&self, settings: &ServiceSettings) -> Result<(), StorageError> {
        self.file.save(settings).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_defaults() {
        let settings = ServiceSettings::default();
        assert_eq!(settings.keepalive_interval_secs, 15);
        assert_eq!(settings.keepalive_count_max, 3);
        assert_eq!(settings.connect_timeout(), Duration::from_secs(30));
        assert_eq!(settings.term, "xterm-256color");
        assert_eq!(settings.converter_program, "puttygen");
    }

    #[test]
    fn test_keepalive_override() {
        let settings = ServiceSettings::default();
        assert_eq!(settings.keepalive(None).interval, Duration::from_secs(15));
        assert_eq!(settings.keepalive(Some(0)).interval, Duration::from_secs(15));
        assert_eq!(settings.keepalive(Some(60)).interval, Duration::from_secs(60));
        assert_eq!(settings.keepalive(Some(60)).max_missed, 3);
    }

    #[tokio::test]
    async fn test_partial_file_fills_defaults() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("settings.json");
        std::fs::write(&path, r#"{"connectTimeoutSecs": 5, "term": "vt100"}"#).unwrap();

        let settings = SettingsStorage::with_path(path).load().await.unwrap();
        assert_eq!(settings.connect_timeout_secs, 5);
        assert_eq!(settings.term, "vt100");
        assert_eq!(settings.keepalive_interval_secs, 15);
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let temp = tempdir().unwrap();
        let storage = SettingsStorage::with_path(temp.path().join("settings.json"));

        let settings = ServiceSettings {
            converter_program: "/opt/putty/puttygen".to_string(),
            key_dir: Some(temp.path().join("keys")),
            ..Default::default()
        };
        storage.save(&settings).await.unwrap();

        assert_eq!(storage.load().await.unwrap(), settings);
    }
}
