//! Key material resolution
//!
//! Turns a private key path into bytes the transport can parse. Keys russh reads natively
//! are returned untouched. PuTTY keys are converted through a [`KeyConverter`] into a
//! temporary file that is removed before [`KeyMaterialResolver::resolve`] returns.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info, warn};

use super::convert::KeyConverter;
use super::parse::{looks_like_putty_key, parse_private_key};
use super::tool::ToolError;
use crate::ssh::KeyMaterial;

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Key resolution failures, scoped to one attempt
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("Cannot read private key ({}): {reason}", .path.display())]
    Unreadable { path: PathBuf, reason: String },

    #[error("Cannot use private key ({}): {detail}", .path.display())]
    UnsupportedFormat { path: PathBuf, detail: String },

    #[error("PuTTY key detected. Install {program} and try again or export the key to OpenSSH format.")]
    ToolMissing { program: String },

    #[error("PuTTY key detected but conversion failed: {detail}")]
    ConversionFailed { detail: String },
}

/// Why a conversion produced no bytes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConversionFailure {
    ToolMissing { program: String },
    ConversionFailed(String),
}

/// Converted OpenSSH bytes, or why there are none
pub type KeyConversionResult = Result<Vec<u8>, ConversionFailure>;

impl From<ConversionFailure> for AuthError {
    fn from(failure: ConversionFailure) -> Self {
        match failure {
            ConversionFailure::ToolMissing { program } => AuthError::ToolMissing { program },
            ConversionFailure::ConversionFailed(detail) => AuthError::ConversionFailed { detail },
        }
    }
}

/// Resolves key files to parseable key material
#[derive(Clone)]
pub struct KeyMaterialResolver {
    converter: Arc<dyn KeyConverter>,
    temp_dir: PathBuf,
}

impl KeyMaterialResolver {
    pub fn new(converter: Arc<dyn KeyConverter>, temp_dir: PathBuf) -> Self {
        Self {
            converter,
            temp_dir,
        }
    }

    pub async fn resolve(
        &self,
        path: &Path,
        passphrase: Option<&str>,
    ) -> Result<KeyMaterial, AuthError> {
        let raw = tokio::fs::read(path)
            .await
            .map_err(|e| AuthError::Unreadable {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;

        let detail = match check_parses(raw.clone(), passphrase).await {
            Ok(()) => {
                debug!("Key {} parsed natively", path.display());
                return Ok(KeyMaterial::new(raw));
            }
            Err(detail) => detail,
        };

        if !looks_like_putty_key(&raw) {
            return Err(AuthError::UnsupportedFormat {
                path: path.to_path_buf(),
                detail,
            });
        }

        info!("PuTTY key detected at {}, converting", path.display());
        let converted = self.convert_foreign_key(path, passphrase).await?;

        check_parses(converted.clone(), passphrase)
            .await
            .map_err(|detail| AuthError::UnsupportedFormat {
                path: path.to_path_buf(),
                detail,
            })?;

        Ok(KeyMaterial::new(converted))
    }

    async fn convert_foreign_key(
        &self,
        path: &Path,
        passphrase: Option<&str>,
    ) -> KeyConversionResult {
        let mut output = TempOutput::new(&self.temp_dir, path);

        let result = match self.converter.convert(path, output.path(), passphrase).await {
            Ok(()) => tokio::fs::read(output.path()).await.map_err(|e| {
                ConversionFailure::ConversionFailed(format!("converted key is unreadable: {}", e))
            }),
            Err(ToolError::Missing { program }) => {
                warn!("Key converter {} is not installed", program);
                Err(ConversionFailure::ToolMissing { program })
            }
            Err(e) => Err(ConversionFailure::ConversionFailed(e.to_string())),
        };

        output.remove();
        result
    }
}

/// Parse off the async runtime; decrypting a key can be slow
async fn check_parses(bytes: Vec<u8>, passphrase: Option<&str>) -> Result<(), String> {
    let passphrase = passphrase.map(String::from);
    tokio::task::spawn_blocking(move || {
        parse_private_key(&bytes, passphrase.as_deref())
            .map(|_| ())
            .map_err(|e| e.to_string())
    })
    .await
    .map_err(|e| format!("key parser task failed: {}", e))?
}

/// Uniquely named conversion output; removed on drop
struct TempOutput {
    path: PathBuf,
    removed: bool,
}

impl TempOutput {
    fn new(dir: &Path, source: &Path) -> Self {
        let stamp = chrono::Utc::now()
            .timestamp_nanos_opt()
            .unwrap_or_default();
        let seq = TEMP_COUNTER.fetch_add(1, Ordering::Relaxed);
        let base = source
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "key".to_string());

        Self {
            path: dir.join(format!("openssh-{}-{}-{}", stamp, seq, base)),
            removed: false,
        }
    }

    fn path(&self) -> &Path {
        &self.path
    }

    fn remove(&mut self) {
        if self.removed {
            return;
        }
        self.removed = true;
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!("Removed converted key {}", self.path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to remove {}: {}", self.path.display(), e),
        }
    }
}

impl Drop for TempOutput {
    fn drop(&mut self) {
        self.remove();
    }
}
