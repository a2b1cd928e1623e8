//! Scripted transport for lifecycle tests

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{mpsc, Notify};

use crate::ssh::{
    AuthConfig, ChannelEvent, ChannelInput, Connector, ShellChannel, ShellRequest, SshError,
    Transport, TransportEvent, TransportLink,
};

#[derive(Debug, Clone)]
pub(crate) enum ConnectBehavior {
    Succeed,
    /// Dial fails with `ConnectionFailed`
    Fail(String),
    /// Connects, then the shell request fails
    FailOpen(String),
    /// Connects; the shell opens only after [`FakeHarness::release_open`]
    GatedOpen,
}

/// Test side of one fake connection
pub(crate) struct FakeRemote {
    pub(crate) transport_tx: mpsc::UnboundedSender<TransportEvent>,
    disconnected: Arc<AtomicBool>,
    disconnect_notify: Arc<Notify>,
}

impl FakeRemote {
    /// Resolves once the session asked its transport to disconnect
    pub(crate) async fn wait_disconnected(&mut self) {
        let wait = async {
            while !self.disconnected.load(Ordering::SeqCst) {
                let notified = self.disconnect_notify.notified();
                if self.disconnected.load(Ordering::SeqCst) {
                    break;
                }
                notified.await;
            }
        };
        tokio::time::timeout(Duration::from_secs(5), wait)
            .await
            .expect("transport was never disconnected");
    }
}

/// Test side of one opened shell
pub(crate) struct FakeShell {
    pub(crate) request: ShellRequest,
    pub(crate) input_rx: mpsc::Receiver<ChannelInput>,
    pub(crate) events_tx: mpsc::UnboundedSender<ChannelEvent>,
}

pub(crate) struct FakeHarness {
    remotes: mpsc::UnboundedReceiver<FakeRemote>,
    shells: mpsc::UnboundedReceiver<FakeShell>,
    open_gate: Arc<Notify>,
}

impl FakeHarness {
    pub(crate) async fn next_remote(&mut self) -> FakeRemote {
        tokio::time::timeout(Duration::from_secs(5), self.remotes.recv())
            .await
            .expect("timed out waiting for a connection")
            .expect("connector dropped")
    }

    pub(crate) async fn next_shell(&mut self) -> FakeShell {
        tokio::time::timeout(Duration::from_secs(5), self.shells.recv())
            .await
            .expect("timed out waiting for a shell")
            .expect("connector dropped")
    }

    pub(crate) fn release_open(&self) {
        self.open_gate.notify_one();
    }
}

pub(crate) struct FakeConnector {
    behavior: ConnectBehavior,
    remotes_tx: mpsc::UnboundedSender<FakeRemote>,
    shells_tx: mpsc::UnboundedSender<FakeShell>,
    open_gate: Arc<Notify>,
    connects: AtomicUsize,
    last_auth: Mutex<Option<AuthConfig>>,
}

impl FakeConnector {
    pub(crate) fn new(behavior: ConnectBehavior) -> (Arc<Self>, FakeHarness) {
        let (remotes_tx, remotes) = mpsc::unbounded_channel();
        let (shells_tx, shells) = mpsc::unbounded_channel();
        let open_gate = Arc::new(Notify::new());
        (
            Arc::new(Self {
                behavior,
                remotes_tx,
                shells_tx,
                open_gate: open_gate.clone(),
                connects: AtomicUsize::new(0),
                last_auth: Mutex::new(None),
            }),
            FakeHarness {
                remotes,
                shells,
                open_gate,
            },
        )
    }

    pub(crate) fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub(crate) fn last_auth(&self) -> Option<AuthConfig> {
        self.last_auth.lock().clone()
    }
}

#[async_trait]
impl Connector for FakeConnector {
    async fn connect(&self, config: &AuthConfig) -> Result<TransportLink, SshError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        *self.last_auth.lock() = Some(config.clone());

        if let ConnectBehavior::Fail(reason) = &self.behavior {
            return Err(SshError::ConnectionFailed(reason.clone()));
        }

        let (transport_tx, events) = mpsc::unbounded_channel();
        let disconnected = Arc::new(AtomicBool::new(false));
        let disconnect_notify = Arc::new(Notify::new());

        let _ = self.remotes_tx.send(FakeRemote {
            transport_tx,
            disconnected: disconnected.clone(),
            disconnect_notify: disconnect_notify.clone(),
        });

        Ok(TransportLink {
            transport: Box::new(FakeTransport {
                behavior: self.behavior.clone(),
                shells_tx: self.shells_tx.clone(),
                open_gate: self.open_gate.clone(),
                disconnected,
                disconnect_notify,
            }),
            events,
        })
    }
}

struct FakeTransport {
    behavior: ConnectBehavior,
    shells_tx: mpsc::UnboundedSender<FakeShell>,
    open_gate: Arc<Notify>,
    disconnected: Arc<AtomicBool>,
    disconnect_notify: Arc<Notify>,
}

#[async_trait]
impl Transport for FakeTransport {
    async fn open_shell(&mut self, request: &ShellRequest) -> Result<ShellChannel, SshError> {
        match &self.behavior {
            ConnectBehavior::FailOpen(reason) => {
                return Err(SshError::ChannelError(reason.clone()));
            }
            ConnectBehavior::GatedOpen => self.open_gate.notified().await,
            _ => {}
        }

        let (input, input_rx) = mpsc::channel(64);
        let (events_tx, events) = mpsc::unbounded_channel();
        let _ = self.shells_tx.send(FakeShell {
            request: request.clone(),
            input_rx,
            events_tx,
        });

        Ok(ShellChannel { input, events })
    }

    async fn disconnect(&mut self) {
        self.disconnected.store(true, Ordering::SeqCst);
        self.disconnect_notify.notify_waiters();
    }
}
