//! Session Types and Data Structures

use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::auth::{AuthType, ConnectRequest};
use super::state::{SessionState, SessionStateCell};
use crate::ssh::PtySize;

/// Commands from the service to a session's controller task
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionCommand {
    /// Keystrokes / input bytes
    Data(Vec<u8>),
    /// Terminal resize
    Resize(PtySize),
}

/// A registry slot. The transport itself lives in the controller task.
pub struct SessionEntry {
    pub id: String,
    /// Distinguishes this session from earlier ones under the same id
    pub generation: u64,
    /// Request the session was created from (for reconnect)
    pub request: ConnectRequest,
    pub state: SessionStateCell,
    /// Last size applied to the channel
    pub pty: Arc<RwLock<PtySize>>,
    pub cmd_tx: mpsc::Sender<SessionCommand>,
    pub cancel: CancellationToken,
    pub created_at: DateTime<Utc>,
}

impl SessionEntry {
    /// Ask the controller task to tear the session down
    pub fn terminate(&self) {
        self.cancel.cancel();
    }

    pub fn state(&self) -> SessionState {
        self.state.get()
    }
}

/// Session snapshot for the consumer
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    pub id: String,
    pub generation: u64,
    pub state: SessionState,
    pub host: String,
    pub port: u16,
    pub username: String,
    pub auth_type: AuthType,
    pub rows: u32,
    pub cols: u32,
    pub created_at: DateTime<Utc>,
}

impl From<&SessionEntry> for SessionInfo {
    fn from(entry: &SessionEntry) -> Self {
        let pty = *entry.pty.read();
        Self {
            id: entry.id.clone(),
            generation: entry.generation,
            state: entry.state(),
            host: entry.request.host.clone(),
            port: entry.request.port,
            username: entry.request.username.clone(),
            auth_type: entry.request.auth_type,
            rows: pty.rows,
            cols: pty.cols,
            created_at: entry.created_at,
        }
    }
}
