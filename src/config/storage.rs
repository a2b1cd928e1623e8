//! Configuration Storage
//!
//! Handles reading/writing JSON files to disk.
//! Config location: ~/.sshmux on macOS/Linux, %APPDATA%\sshmux on Windows

use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::fs;
use tokio::io::AsyncWriteExt;

/// Configuration storage errors
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Failed to determine config directory")]
    NoConfigDir,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Get the sshmux configuration directory
/// Returns %APPDATA%\sshmux on Windows, ~/.sshmux on macOS/Linux
pub fn config_dir() -> Result<PathBuf, StorageError> {
    #[cfg(windows)]
    {
        if let Some(app_data) = dirs::config_dir() {
            return Ok(app_data.join("sshmux"));
        }
        dirs::home_dir()
            .map(|home| home.join(".sshmux"))
            .ok_or(StorageError::NoConfigDir)
    }

    #[cfg(not(windows))]
    {
        dirs::home_dir()
            .map(|home| home.join(".sshmux"))
            .ok_or(StorageError::NoConfigDir)
    }
}

/// Get the log directory for storing application logs
pub fn log_dir() -> Result<PathBuf, StorageError> {
    Ok(config_dir()?.join("logs"))
}

/// Key catalog file path
pub fn keys_file() -> Result<PathBuf, StorageError> {
    Ok(config_dir()?.join("ssh_keys.json"))
}

/// Saved hosts file path
pub fn hosts_file() -> Result<PathBuf, StorageError> {
    Ok(config_dir()?.join("saved_hosts.json"))
}

/// Service settings file path
pub fn settings_file() -> Result<PathBuf, StorageError> {
    Ok(config_dir()?.join("settings.json"))
}

/// Default directory holding the user's SSH keys (`~/.ssh`)
pub fn default_key_dir() -> Result<PathBuf, StorageError> {
    dirs::home_dir()
        .map(|home| home.join(".ssh"))
        .ok_or(StorageError::NoConfigDir)
}

/// One JSON document on disk
#[derive(Debug, Clone)]
pub struct JsonFile {
    path: PathBuf,
}

impl JsonFile {
    pub fn with_path(path: PathBuf) -> Self {
        Self { path }
    }

    /// Ensure the parent directory exists
    async fn ensure_dir(&self) -> Result<(), StorageError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).await?;
        }
        Ok(())
    }

    /// Load the document.
    /// Returns `None` if the file doesn't exist.
    /// If the document is corrupted, creates a backup and returns `None`.
    pub async fn load<T: DeserializeOwned>(&self) -> Result<Option<T>, StorageError> {
        match fs::read_to_string(&self.path).await {
            Ok(contents) => match serde_json::from_str::<T>(&contents) {
                Ok(value) => Ok(Some(value)),
                Err(e) => {
                    tracing::warn!("{} is corrupted: {}", self.path.display(), e);

                    match self.backup().await {
                        Ok(backup_path) => {
                            tracing::warn!(
                                "Corrupted file backed up to {:?}, using defaults",
                                backup_path
                            );
                        }
                        Err(backup_err) => {
                            tracing::error!("Failed to backup corrupted file: {}", backup_err);
                        }
                    }

                    Ok(None)
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StorageError::Io(e)),
        }
    }

    /// Load the document, falling back to `T::default()`
    pub async fn load_or_default<T: DeserializeOwned + Default>(&self) -> Result<T, StorageError> {
        Ok(self.load().await?.unwrap_or_default())
    }

    /// Save the document
    pub async fn save<T: Serialize>(&self, value: &T) -> Result<(), StorageError> {
        self.ensure_dir().await?;

        // Write to temp file first, then rename (atomic write)
        let temp_path = self.path.with_extension("json.tmp");
        let json = serde_json::to_string_pretty(value)?;

        let mut file = fs::File::create(&temp_path).await?;
        file.write_all(json.as_bytes()).await?;
        file.sync_all().await?;

        fs::rename(&temp_path, &self.path).await?;

        Ok(())
    }

    /// Check if the file exists
    pub async fn exists(&self) -> bool {
        fs::metadata(&self.path).await.is_ok()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Create a backup of the current file
    pub async fn backup(&self) -> Result<PathBuf, StorageError> {
        let backup_path = self.path.with_extension(format!(
            "json.backup.{}",
            chrono::Utc::now().format("%Y%m%d_%H%M%S")
        ));

        if self.exists().await {
            fs::copy(&self.path, &backup_path).await?;
        }

        Ok(backup_path)
    }
}
