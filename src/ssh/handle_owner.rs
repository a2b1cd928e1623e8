//! Handle Owner Task
//!
//! Only one task owns the `Handle<ClientHandler>`. The owning session talks to it through
//! a [`HandleController`], which sends commands over an mpsc channel. This keeps the
//! handle out of any mutex and never holds a lock across `.await`.

use async_trait::async_trait;
use russh::client::{Handle, Msg};
use russh::Channel;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use super::client::ClientHandler;
use super::error::SshError;
use super::shell::spawn_shell_pump;
use super::transport::{ShellChannel, ShellRequest, Transport};

/// Commands sent to the Handle Owner Task
pub enum HandleCommand {
    /// Open a session channel (for PTY/shell)
    ChannelOpenSession {
        reply_tx: oneshot::Sender<Result<Channel<Msg>, russh::Error>>,
    },

    /// Disconnect the SSH connection
    Disconnect,
}

/// Controller for sending commands to the Handle Owner Task
pub struct HandleController {
    cmd_tx: mpsc::Sender<HandleCommand>,
    label: String,
}

impl HandleController {
    /// Open a session channel (for PTY/shell)
    pub async fn open_session_channel(&self) -> Result<Channel<Msg>, SshError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.cmd_tx
            .send(HandleCommand::ChannelOpenSession { reply_tx })
            .await
            .map_err(|_| SshError::Disconnected)?;
        reply_rx
            .await
            .map_err(|_| SshError::Disconnected)?
            .map_err(|e| SshError::ChannelError(e.to_string()))
    }

    /// Check if the Handle Owner Task is still running
    pub fn is_connected(&self) -> bool {
        !self.cmd_tx.is_closed()
    }
}

#[async_trait]
impl Transport for HandleController {
    async fn open_shell(&mut self, request: &ShellRequest) -> Result<ShellChannel, SshError> {
        let channel = self.open_session_channel().await?;

        debug!("Channel opened for {}, requesting PTY", self.label);

        channel
            .request_pty(
                false,
                &request.term,
                request.size.cols,
                request.size.rows,
                0,
                0,
                &[],
            )
            .await
            .map_err(|e| SshError::ChannelError(format!("PTY request failed: {}", e)))?;

        channel
            .request_shell(false)
            .await
            .map_err(|e| SshError::ChannelError(format!("Shell request failed: {}", e)))?;

        info!(
            "Interactive shell started for {} ({}x{})",
            self.label, request.size.cols, request.size.rows
        );

        Ok(spawn_shell_pump(channel, self.label.clone()))
    }

    async fn disconnect(&mut self) {
        let _ = self.cmd_tx.send(HandleCommand::Disconnect).await;
    }
}

/// Spawn the Handle Owner Task
///
/// Consumes ownership of the Handle and returns the controller for it. The task ends on
/// `Disconnect` or once the controller is dropped.
pub fn spawn_handle_owner_task(handle: Handle<ClientHandler>, label: String) -> HandleController {
    let (cmd_tx, mut cmd_rx) = mpsc::channel::<HandleCommand>(16);
    let task_label = label.clone();

    tokio::spawn(async move {
        let handle = handle;

        debug!("Handle owner task started for {}", task_label);

        while let Some(cmd) = cmd_rx.recv().await {
            match cmd {
                HandleCommand::ChannelOpenSession { reply_tx } => {
                    let result = handle.channel_open_session().await;
                    if reply_tx.send(result).is_err() {
                        // Channel is dropped here; the server closes it.
                        warn!("Caller dropped before receiving channel_open_session result");
                    }
                }
                HandleCommand::Disconnect => {
                    info!("Disconnect requested for {}", task_label);
                    break;
                }
            }
        }

        drain_pending_commands(&mut cmd_rx);

        let _ = handle
            .disconnect(russh::Disconnect::ByApplication, "Session closed", "en")
            .await;
        info!("Handle owner task terminated for {}", task_label);
    });

    HandleController { cmd_tx, label }
}

/// Drain all pending commands, returning Disconnected error to each
fn drain_pending_commands(cmd_rx: &mut mpsc::Receiver<HandleCommand>) {
    cmd_rx.close();

    while let Ok(cmd) = cmd_rx.try_recv() {
        match cmd {
            HandleCommand::ChannelOpenSession { reply_tx } => {
                let _ = reply_tx.send(Err(russh::Error::Disconnect));
            }
            HandleCommand::Disconnect => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_drain_replies_disconnected() {
        let (cmd_tx, mut cmd_rx) = mpsc::channel::<HandleCommand>(4);
        let (reply_tx, reply_rx) = oneshot::channel();
        cmd_tx
            .send(HandleCommand::ChannelOpenSession { reply_tx })
            .await
            .unwrap();
        cmd_tx.send(HandleCommand::Disconnect).await.unwrap();

        drain_pending_commands(&mut cmd_rx);

        let reply = reply_rx.await.unwrap();
        assert!(matches!(reply, Err(russh::Error::Disconnect)));
        assert!(cmd_tx.is_closed());
    }

    #[tokio::test]
    async fn test_controller_reports_disconnected_when_owner_gone() {
        let (cmd_tx, cmd_rx) = mpsc::channel::<HandleCommand>(4);
        drop(cmd_rx);
        let controller = HandleController {
            cmd_tx,
            label: "user@host:22".to_string(),
        };

        assert!(!controller.is_connected());
        let err = controller.open_session_channel().await.unwrap_err();
        assert!(matches!(err, SshError::Disconnected));
    }
}
