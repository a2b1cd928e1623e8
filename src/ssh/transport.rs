//! Transport seam
//!
//! The session core never touches russh types directly. A [`Connector`] dials and
//! authenticates, yielding a [`TransportLink`]: an owned [`Transport`] for opening the
//! shell channel plus a stream of transport-level lifecycle events. An opened shell is a
//! [`ShellChannel`], a pair of queues to and from the channel pump task.

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::config::{AuthConfig, PtySize};
use super::error::SshError;

/// Transport-level lifecycle notifications
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// The connection failed (network error, keepalive exhaustion, protocol error)
    Error(String),
    /// The peer closed the connection
    End,
    /// The connection is gone
    Close { had_error: bool },
}

/// Input for the shell channel pump
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelInput {
    Data(Vec<u8>),
    Resize(PtySize),
    Close,
}

/// Output of the shell channel pump
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    /// stdout or stderr bytes
    Data(Vec<u8>),
    /// Remote process exit status
    ExitStatus(u32),
    /// Remote process was killed by a signal
    ExitSignal(String),
    /// Window change notification from the peer
    WindowChange(PtySize),
    /// Channel closed
    Closed,
}

/// An open interactive shell
pub struct ShellChannel {
    pub input: mpsc::Sender<ChannelInput>,
    pub events: mpsc::UnboundedReceiver<ChannelEvent>,
}

/// Shell request parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShellRequest {
    pub term: String,
    pub size: PtySize,
}

/// An authenticated connection owned by exactly one session
#[async_trait]
pub trait Transport: Send {
    /// Open a session channel, allocate a pty and start the login shell
    async fn open_shell(&mut self, request: &ShellRequest) -> Result<ShellChannel, SshError>;

    /// Close the connection. Safe to call more than once.
    async fn disconnect(&mut self);
}

/// Result of a successful dial + authenticate
pub struct TransportLink {
    pub transport: Box<dyn Transport>,
    pub events: mpsc::UnboundedReceiver<TransportEvent>,
}

/// Dials and authenticates a transport
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, config: &AuthConfig) -> Result<TransportLink, SshError>;
}
