//! Key generation via `ssh-keygen`

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use thiserror::Error;
use tracing::info;

use super::store::{KeyCatalog, KeyStore};
use super::tool::{run_tool, ToolError};
use crate::config::StorageError;

const DEFAULT_KEY_NAME: &str = "id_ed25519";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KeyType {
    #[default]
    Ed25519,
    Rsa,
    Ecdsa,
}

impl KeyType {
    /// Unknown or absent names fall back to ed25519
    pub fn parse_lenient(name: Option<&str>) -> Self {
        match name.map(|n| n.trim().to_ascii_lowercase()).as_deref() {
            Some("rsa") => KeyType::Rsa,
            Some("ecdsa") => KeyType::Ecdsa,
            _ => KeyType::Ed25519,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            KeyType::Ed25519 => "ed25519",
            KeyType::Rsa => "rsa",
            KeyType::Ecdsa => "ecdsa",
        }
    }

    fn takes_bits(&self) -> bool {
        matches!(self, KeyType::Rsa | KeyType::Ecdsa)
    }
}

/// Bit size from free-form input; anything not a positive integer means "tool default"
pub fn parse_key_bits(size: Option<&str>) -> Option<u32> {
    size.and_then(|s| s.trim().parse::<u32>().ok())
        .filter(|bits| *bits > 0)
}

/// Key generation request as the front end sends it
#[derive(Debug, Clone, Default)]
pub struct GenerateKeyRequest {
    pub name: Option<String>,
    pub passphrase: Option<String>,
    pub key_type: Option<String>,
    pub size: Option<String>,
    pub directory: Option<PathBuf>,
}

#[derive(Debug, Error)]
pub enum KeyGenError {
    #[error("Key {} already exists", .0.display())]
    AlreadyExists(PathBuf),

    #[error("Failed to create key directory {}: {reason}", .path.display())]
    CreateDir { path: PathBuf, reason: String },

    #[error(transparent)]
    Tool(#[from] ToolError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Creates a key pair at `path` (and `path.pub`)
#[async_trait]
pub trait KeyGenerator: Send + Sync {
    async fn generate(
        &self,
        key_type: KeyType,
        path: &Path,
        passphrase: &str,
        bits: Option<u32>,
    ) -> Result<(), ToolError>;
}

#[derive(Debug, Clone)]
pub struct SshKeygen {
    program: String,
}

impl SshKeygen {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl Default for SshKeygen {
    fn default() -> Self {
        Self::new("ssh-keygen")
    }
}

fn keygen_args(key_type: KeyType, path: &Path, passphrase: &str, bits: Option<u32>) -> Vec<OsString> {
    let mut args: Vec<OsString> = vec![
        "-t".into(),
        key_type.as_str().into(),
        "-f".into(),
        path.into(),
        "-N".into(),
        passphrase.into(),
    ];
    if let Some(bits) = bits.filter(|_| key_type.takes_bits()) {
        args.push("-b".into());
        args.push(bits.to_string().into());
    }
    args
}

#[async_trait]
impl KeyGenerator for SshKeygen {
    async fn generate(
        &self,
        key_type: KeyType,
        path: &Path,
        passphrase: &str,
        bits: Option<u32>,
    ) -> Result<(), ToolError> {
        run_tool(&self.program, keygen_args(key_type, path, passphrase, bits)).await
    }
}

/// Generate a key and register it in `store`.
///
/// Never overwrites: an existing file at the target path fails before the generator runs.
pub async fn generate_key(
    store: &KeyStore,
    generator: &dyn KeyGenerator,
    request: GenerateKeyRequest,
) -> Result<KeyCatalog, KeyGenError> {
    let name = request
        .name
        .as_deref()
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .unwrap_or(DEFAULT_KEY_NAME)
        .to_string();
    let key_type = KeyType::parse_lenient(request.key_type.as_deref());

    let dir = match request.directory.filter(|d| !d.as_os_str().is_empty()) {
        Some(dir) => std::path::absolute(&dir).map_err(|e| KeyGenError::CreateDir {
            path: dir.clone(),
            reason: e.to_string(),
        })?,
        None => store.key_dir().to_path_buf(),
    };
    let path = dir.join(&name);

    if tokio::fs::symlink_metadata(&path).await.is_ok() {
        return Err(KeyGenError::AlreadyExists(path));
    }

    ensure_key_dir(&dir).await?;

    let bits = if key_type.takes_bits() {
        parse_key_bits(request.size.as_deref())
    } else {
        None
    };
    let passphrase = request.passphrase.unwrap_or_default();

    generator.generate(key_type, &path, &passphrase, bits).await?;
    info!("Generated {} key {}", key_type.as_str(), path.display());

    Ok(store.register_generated(&path, &name).await?)
}

async fn ensure_key_dir(dir: &Path) -> Result<(), KeyGenError> {
    if tokio::fs::metadata(dir).await.is_ok() {
        return Ok(());
    }

    let mut builder = tokio::fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    builder.mode(0o700);

    builder
        .create(dir)
        .await
        .map_err(|e| KeyGenError::CreateDir {
            path: dir.to_path_buf(),
            reason: e.to_string(),
        })
}
