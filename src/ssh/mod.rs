//! SSH module - transport seam and its russh implementation
//!
//! The session core drives connections through the [`Connector`] / [`Transport`] traits.
//! [`RusshConnector`] is the production implementation:
//! - russh client with keepalive probing
//! - single-owner handle task (see `handle_owner`)
//! - one pump task per interactive shell channel

mod client;
mod config;
mod error;
mod handle_owner;
mod shell;
mod transport;

pub use client::{ClientHandler, RusshConnector};
pub use config::{
    AuthConfig, Credential, KeepaliveConfig, KeyMaterial, PtySize, DEFAULT_KEEPALIVE_MAX,
    DEFAULT_KEEPALIVE_SECS, DEFAULT_TERM,
};
pub use error::SshError;
pub use handle_owner::{spawn_handle_owner_task, HandleCommand, HandleController};
pub use transport::{
    ChannelEvent, ChannelInput, Connector, ShellChannel, ShellRequest, Transport,
    TransportEvent, TransportLink,
};
