//! Connection controller
//!
//! One tokio task per session generation. It owns the transport and the shell channel and
//! drives `Connecting -> Authenticated -> ChannelOpen -> Closed`. Every other component
//! reaches it through the registry slot's command channel and cancellation token.

use std::future::Future;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::auth::PendingAuth;
use super::pipe::{DataPipe, WriteError};
use super::registry::SessionRegistry;
use super::state::{SessionState, SessionStateCell};
use super::types::SessionCommand;
use crate::events::{SessionEmitter, SessionStatus};
use crate::keys::KeyMaterialResolver;
use crate::ssh::{ChannelEvent, Connector, PtySize, ShellRequest, TransportEvent, TransportLink};

/// How the open-channel phase ended
enum Ending {
    /// Replaced or disconnected; whoever cancelled owns the terminal event
    Cancelled,
    Closed {
        code: Option<u32>,
        signal: Option<String>,
        had_error: Option<bool>,
    },
    Disconnected,
    Error(String),
}

pub(crate) struct ConnectionController {
    pub(crate) emitter: SessionEmitter,
    pub(crate) registry: Arc<SessionRegistry>,
    pub(crate) connector: Arc<dyn Connector>,
    pub(crate) resolver: KeyMaterialResolver,
    pub(crate) pending: PendingAuth,
    pub(crate) state: SessionStateCell,
    pub(crate) pty: Arc<RwLock<PtySize>>,
    pub(crate) term: String,
    pub(crate) cmd_rx: mpsc::Receiver<SessionCommand>,
    pub(crate) cancel: CancellationToken,
}

impl ConnectionController {
    pub(crate) fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    async fn run(self) {
        let ConnectionController {
            emitter,
            registry,
            connector,
            resolver,
            pending,
            state,
            pty,
            term,
            mut cmd_rx,
            cancel,
        } = self;
        let id = emitter.session_id().to_string();
        let generation = emitter.generation();

        debug!("Controller started for session {} (generation {})", id, generation);

        // Key resolution
        let resolving = pending.resolve(&resolver);
        let auth = match await_with_commands(resolving, &cancel, &mut cmd_rx, &emitter).await {
            None => return cancelled(&emitter, &state),
            Some(Ok(auth)) => auth,
            Some(Err(e)) => {
                warn!("Session {} key resolution failed: {}", id, e);
                state.transition(SessionState::Errored);
                registry.remove_if_generation(&id, generation);
                emitter.fail(e.to_string());
                return;
            }
        };

        // Connecting
        info!(
            "Session {} connecting to {}@{}",
            id,
            auth.username,
            auth.address()
        );
        let connecting = connector.connect(&auth);
        let link = match await_with_commands(connecting, &cancel, &mut cmd_rx, &emitter).await {
            None => return cancelled(&emitter, &state),
            Some(Ok(link)) => link,
            Some(Err(e)) => {
                warn!("Session {} connection failed: {}", id, e);
                state.transition(SessionState::Errored);
                registry.remove_if_generation(&id, generation);
                emitter.fail(e.to_string());
                return;
            }
        };
        let TransportLink {
            mut transport,
            events: mut transport_events,
        } = link;

        // Authenticated
        emitter.status(SessionStatus::Connected);
        state.transition(SessionState::Authenticated);

        let request = ShellRequest {
            term,
            size: *pty.read(),
        };
        let opening = transport.open_shell(&request);
        let shell = match await_with_commands(opening, &cancel, &mut cmd_rx, &emitter).await {
            None => {
                transport.disconnect().await;
                return cancelled(&emitter, &state);
            }
            Some(Ok(shell)) => shell,
            Some(Err(e)) => {
                warn!("Session {} failed to open shell: {}", id, e);
                state.transition(SessionState::Errored);
                registry.remove_if_generation(&id, generation);
                emitter.fail(e.to_string());
                transport.disconnect().await;
                return;
            }
        };

        // ChannelOpen
        state.transition(SessionState::ChannelOpen);
        info!(
            "Session {} shell open ({}x{})",
            id, request.size.cols, request.size.rows
        );

        let mut pipe = DataPipe::new(shell);
        let ending = run_channel(
            &mut pipe,
            &mut transport_events,
            &mut cmd_rx,
            &cancel,
            &emitter,
            &pty,
        )
        .await;

        state.transition(SessionState::Closed);
        match ending {
            Ending::Cancelled => {
                debug!("Session {} generation {} cancelled", id, generation);
                emitter.retire();
            }
            Ending::Closed {
                code,
                signal,
                had_error,
            } => {
                info!("Session {} closed", id);
                registry.remove_if_generation(&id, generation);
                emitter.finish_status(SessionStatus::Closed, code, signal, had_error);
            }
            Ending::Disconnected => {
                info!("Session {} disconnected by peer", id);
                registry.remove_if_generation(&id, generation);
                emitter.finish_status(SessionStatus::Disconnected, None, None, None);
            }
            Ending::Error(message) => {
                warn!("Session {} transport error: {}", id, message);
                registry.remove_if_generation(&id, generation);
                emitter.fail(message);
            }
        }

        pipe.close().await;
        transport.disconnect().await;
        debug!("Controller finished for session {}", id);
    }
}

fn cancelled(emitter: &SessionEmitter, state: &SessionStateCell) {
    debug!("Session {} cancelled before the shell opened", emitter.session_id());
    state.transition(SessionState::Closed);
    emitter.retire();
}

/// Await `fut` while the channel is not open yet.
///
/// Input arriving meanwhile is answered with a recoverable error and resizes are dropped.
/// Returns `None` if the session is cancelled first.
async fn await_with_commands<F: Future>(
    fut: F,
    cancel: &CancellationToken,
    cmd_rx: &mut mpsc::Receiver<SessionCommand>,
    emitter: &SessionEmitter,
) -> Option<F::Output> {
    tokio::pin!(fut);
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return None,
            output = &mut fut => return Some(output),
            command = cmd_rx.recv() => match command {
                Some(SessionCommand::Data(_)) => {
                    emitter.recoverable_error(WriteError::NoActiveStream.to_string());
                }
                Some(SessionCommand::Resize(size)) => {
                    debug!(
                        "Dropping resize to {}x{} for {}: no channel yet",
                        size.cols, size.rows, emitter.session_id()
                    );
                }
                // Registry slot is gone
                None => return None,
            },
        }
    }
}

async fn run_channel(
    pipe: &mut DataPipe,
    transport_events: &mut mpsc::UnboundedReceiver<TransportEvent>,
    cmd_rx: &mut mpsc::Receiver<SessionCommand>,
    cancel: &CancellationToken,
    emitter: &SessionEmitter,
    pty: &RwLock<PtySize>,
) -> Ending {
    let mut exit_code = None;
    let mut exit_signal = None;

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ending::Cancelled,

            // Input ahead of output: a flooding shell must not starve keystrokes
            command = cmd_rx.recv() => match command {
                Some(SessionCommand::Data(data)) => {
                    if let Err(e) = pipe.write(data).await {
                        emitter.recoverable_error(e.to_string());
                    }
                }
                Some(SessionCommand::Resize(size)) => match pipe.resize(size).await {
                    Ok(()) => *pty.write() = size,
                    Err(e) => debug!("Resize not applied for {}: {}", emitter.session_id(), e),
                },
                None => return Ending::Cancelled,
            },

            event = pipe.next_event() => match event {
                Some(ChannelEvent::Data(data)) => {
                    emitter.data(data);
                }
                Some(ChannelEvent::ExitStatus(code)) => {
                    exit_code = Some(code);
                    emitter.exit(Some(code), None);
                }
                Some(ChannelEvent::ExitSignal(signal)) => {
                    exit_signal = Some(signal.clone());
                    emitter.exit(None, Some(signal));
                }
                Some(ChannelEvent::WindowChange(size)) => {
                    debug!(
                        "Window change {}x{} for {}",
                        size.cols, size.rows, emitter.session_id()
                    );
                    emitter.status(SessionStatus::WindowChange);
                }
                Some(ChannelEvent::Closed) | None => {
                    return Ending::Closed {
                        code: exit_code,
                        signal: exit_signal,
                        had_error: None,
                    };
                }
            },

            event = transport_events.recv() => match event {
                Some(TransportEvent::Error(message)) => return Ending::Error(message),
                Some(TransportEvent::End) => return Ending::Disconnected,
                Some(TransportEvent::Close { had_error }) => {
                    return Ending::Closed {
                        code: exit_code,
                        signal: exit_signal,
                        had_error: Some(had_error),
                    };
                }
                None => {
                    return Ending::Closed {
                        code: exit_code,
                        signal: exit_signal,
                        had_error: Some(false),
                    };
                }
            },
        }
    }
}
