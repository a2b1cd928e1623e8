//! Configuration Management Module
//!
//! Persistent JSON storage for service settings and saved host profiles.

pub mod hosts;
pub mod settings;
pub mod storage;

pub use hosts::{HostGroup, HostProfile, HostStore, HostStoreFile, DEFAULT_GROUP_ID};
pub use settings::{ServiceSettings, SettingsStorage, DEFAULT_CONNECT_TIMEOUT_SECS};
pub use storage::{
    config_dir, default_key_dir, hosts_file, keys_file, log_dir, settings_file, JsonFile,
    StorageError,
};
