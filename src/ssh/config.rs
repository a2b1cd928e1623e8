//! Resolved connection configuration handed to the transport

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default keepalive probe interval when the request leaves it unset
pub const DEFAULT_KEEPALIVE_SECS: u64 = 15;

/// Missed keepalive replies before the transport declares the peer dead
pub const DEFAULT_KEEPALIVE_MAX: usize = 3;

/// Terminal type requested for interactive shells
pub const DEFAULT_TERM: &str = "xterm-256color";

/// Pseudo-terminal dimensions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PtySize {
    pub rows: u32,
    pub cols: u32,
}

impl PtySize {
    pub fn new(rows: u32, cols: u32) -> Self {
        Self { rows, cols }
    }
}

impl Default for PtySize {
    fn default() -> Self {
        Self { rows: 24, cols: 80 }
    }
}

/// Transport liveness policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeepaliveConfig {
    pub interval: Duration,
    pub max_missed: usize,
}

impl Default for KeepaliveConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(DEFAULT_KEEPALIVE_SECS),
            max_missed: DEFAULT_KEEPALIVE_MAX,
        }
    }
}

/// Private key bytes ready for the transport to decode
#[derive(Clone, PartialEq, Eq)]
pub struct KeyMaterial(Vec<u8>);

impl KeyMaterial {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "KeyMaterial({} bytes)", self.0.len())
    }
}

/// Credentials for a single connection attempt.
///
/// Exactly one of password or key bytes exists by construction.
#[derive(Clone)]
pub enum Credential {
    Password(String),
    Key {
        path: PathBuf,
        passphrase: Option<String>,
        material: KeyMaterial,
    },
}

impl Credential {
    /// Short label for logs
    pub fn kind(&self) -> &'static str {
        match self {
            Credential::Password(_) => "password",
            Credential::Key { .. } => "key",
        }
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credential::Password(_) => f.write_str("Password(<redacted>)"),
            Credential::Key {
                path,
                passphrase,
                material,
            } => f
                .debug_struct("Key")
                .field("path", path)
                .field("passphrase", &passphrase.as_ref().map(|_| "<redacted>"))
                .field("material", material)
                .finish(),
        }
    }
}

/// Fully validated and resolved connection configuration
#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub credential: Credential,
    pub keepalive: KeepaliveConfig,
    pub connect_timeout: Duration,
}

impl AuthConfig {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_redacts_secrets() {
        let cred = Credential::Password("hunter2".to_string());
        assert!(!format!("{:?}", cred).contains("hunter2"));

        let cred = Credential::Key {
            path: PathBuf::from("/tmp/id"),
            passphrase: Some("swordfish".to_string()),
            material: KeyMaterial::new(b"-----BEGIN".to_vec()),
        };
        let dbg = format!("{:?}", cred);
        assert!(!dbg.contains("swordfish"));
        assert!(!dbg.contains("BEGIN"));
        assert!(dbg.contains("/tmp/id"));
    }

    #[test]
    fn test_keepalive_defaults() {
        let keepalive = KeepaliveConfig::default();
        assert_eq!(keepalive.interval, Duration::from_secs(15));
        assert_eq!(keepalive.max_missed, 3);
    }
}
