//! Session Management Module
//!
//! Concurrent interactive shell sessions keyed by caller-chosen ids:
//! - Request validation and key selection (`auth`)
//! - Per-id registry with generation-checked replacement (`registry`)
//! - One controller task per session generation (`controller`)
//! - Byte relay between the consumer and the shell channel (`pipe`)
//! - The consumer-facing [`SessionService`]

mod auth;
mod controller;
mod pipe;
mod registry;
mod service;
mod state;
mod types;

#[cfg(test)]
mod testing;

pub use auth::{AuthConfigBuilder, AuthType, ConfigError, ConnectRequest, PendingAuth};
pub use pipe::{DataPipe, WriteError};
pub use registry::{RegistryError, SessionRegistry};
pub use service::{ServiceBuilder, SessionError, SessionService};
pub use state::{SessionState, SessionStateCell};
pub use types::{SessionCommand, SessionEntry, SessionInfo};
