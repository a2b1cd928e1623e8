//! sshmux - concurrent interactive SSH shell sessions
//!
//! A consumer opens shells through [`SessionService`] under ids of its choosing and reads a
//! single stream of [`SessionEvent`]s. Private keys in PuTTY format are converted on the fly
//! when native parsing fails.

pub mod config;
pub mod events;
pub mod keys;
pub mod session;
pub mod ssh;

use std::fs::OpenOptions;
use std::io::Write;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub use config::{HostProfile, HostStore, ServiceSettings, SettingsStorage, StorageError};
pub use events::{SessionEvent, SessionStatus};
pub use keys::{AuthError, GenerateKeyRequest, KeyCatalog, KeyGenError, KeyStore, KeyType};
pub use session::{
    AuthType, ConfigError, ConnectRequest, ServiceBuilder, SessionError, SessionInfo,
    SessionService, SessionState,
};
pub use ssh::{PtySize, SshError};

/// Append a line to `startup.log` in the log directory
pub fn write_startup_log(message: &str) {
    if let Ok(log_dir) = config::log_dir() {
        let _ = std::fs::create_dir_all(&log_dir);

        let log_file = log_dir.join("startup.log");
        if let Ok(mut file) = OpenOptions::new().create(true).append(true).open(&log_file) {
            let timestamp = chrono::Local::now().format("%Y-%m-%d %H:%M:%S");
            let _ = writeln!(file, "[{}] {}", timestamp, message);
        }
    }
}

/// Install the global tracing subscriber. `RUST_LOG` overrides the default `info` filter.
pub fn init_logging() {
    write_startup_log("sshmux starting");

    let _ = tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .try_init();
}
