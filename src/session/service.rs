//! Session service
//!
//! The consumer-facing entry point. Owns the registry, the event stream and the
//! collaborators (connector, key resolver, key store); all session operations go through
//! here.

use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::RwLock;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::auth::{AuthConfigBuilder, AuthType, ConfigError, ConnectRequest};
use super::controller::ConnectionController;
use super::pipe::WriteError;
use super::registry::SessionRegistry;
use super::state::SessionStateCell;
use super::types::{SessionCommand, SessionEntry, SessionInfo};
use crate::config::{ServiceSettings, StorageError};
use crate::events::{EventNotifier, SessionEvent, SessionStatus};
use crate::keys::{
    generate_key, GenerateKeyRequest, KeyCatalog, KeyConverter, KeyGenError, KeyGenerator,
    KeyMaterialResolver, KeyStore, PuttygenConverter, SshKeygen,
};
use crate::ssh::{Connector, PtySize, RusshConnector};

/// Per-session command queue depth
const COMMAND_QUEUE: usize = 1024;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Session {0} not found")]
    NotFound(String),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Assembles a [`SessionService`]; unset collaborators get production defaults
pub struct ServiceBuilder {
    settings: ServiceSettings,
    connector: Option<Arc<dyn Connector>>,
    converter: Option<Arc<dyn KeyConverter>>,
    generator: Option<Arc<dyn KeyGenerator>>,
    key_store: Option<KeyStore>,
}

impl ServiceBuilder {
    pub fn new(settings: ServiceSettings) -> Self {
        Self {
            settings,
            connector: None,
            converter: None,
            generator: None,
            key_store: None,
        }
    }

    pub fn connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connector = Some(connector);
        self
    }

    pub fn converter(mut self, converter: Arc<dyn KeyConverter>) -> Self {
        self.converter = Some(converter);
        self
    }

    pub fn generator(mut self, generator: Arc<dyn KeyGenerator>) -> Self {
        self.generator = Some(generator);
        self
    }

    pub fn key_store(mut self, key_store: KeyStore) -> Self {
        self.key_store = Some(key_store);
        self
    }

    pub fn build(self) -> Result<(SessionService, mpsc::UnboundedReceiver<SessionEvent>), StorageError> {
        let settings = self.settings;

        let key_store = match self.key_store {
            Some(store) => store,
            None => KeyStore::new(settings.resolved_key_dir()?)?,
        };
        let connector = self
            .connector
            .unwrap_or_else(|| Arc::new(RusshConnector::default()));
        let converter = self
            .converter
            .unwrap_or_else(|| Arc::new(PuttygenConverter::new(settings.converter_program.clone())));
        let generator = self
            .generator
            .unwrap_or_else(|| Arc::new(SshKeygen::new(settings.keygen_program.clone())));

        let (notifier, events) = EventNotifier::channel();
        let inner = ServiceInner {
            registry: Arc::new(SessionRegistry::new()),
            notifier,
            connector,
            resolver: KeyMaterialResolver::new(converter, settings.resolved_temp_dir()),
            key_store: Arc::new(key_store),
            generator,
            builder: AuthConfigBuilder::new(settings.clone()),
            retained: DashMap::new(),
            settings,
        };

        Ok((
            SessionService {
                inner: Arc::new(inner),
            },
            events,
        ))
    }
}

struct ServiceInner {
    registry: Arc<SessionRegistry>,
    notifier: Arc<EventNotifier>,
    connector: Arc<dyn Connector>,
    resolver: KeyMaterialResolver,
    key_store: Arc<KeyStore>,
    generator: Arc<dyn KeyGenerator>,
    builder: AuthConfigBuilder,
    /// Last request per session id, kept for reconnect after the session ends
    retained: DashMap<String, ConnectRequest>,
    settings: ServiceSettings,
}

#[derive(Clone)]
pub struct SessionService {
    inner: Arc<ServiceInner>,
}

impl SessionService {
    pub fn builder(settings: ServiceSettings) -> ServiceBuilder {
        ServiceBuilder::new(settings)
    }

    /// Production service: russh transport, `puttygen`, `ssh-keygen`, `~/.sshmux` key store
    pub fn with_russh(
        settings: ServiceSettings,
    ) -> Result<(Self, mpsc::UnboundedReceiver<SessionEvent>), StorageError> {
        ServiceBuilder::new(settings).build()
    }

    /// Start a session under `id`, replacing any session already there.
    ///
    /// Validation errors are returned here and no session is created. Everything after
    /// validation, including key resolution, is reported on the event stream.
    pub async fn connect(
        &self,
        id: &str,
        request: ConnectRequest,
        size: PtySize,
    ) -> Result<(), SessionError> {
        let inner = &self.inner;

        let catalog = if request.auth_type == AuthType::Key && request.private_key_path.is_none() {
            inner.key_store.catalog().await?
        } else {
            KeyCatalog {
                keys: Vec::new(),
                default_key_id: None,
                key_dir: inner.key_store.key_dir().to_path_buf(),
            }
        };
        let pending = inner.builder.build(&request, &catalog)?;

        let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_QUEUE);
        let cancel = CancellationToken::new();
        let state = SessionStateCell::new();
        let pty = Arc::new(RwLock::new(size));

        let generation = inner.registry.create_or_replace(id, || SessionEntry {
            id: id.to_string(),
            generation: inner.notifier.activate(id),
            request: request.clone(),
            state: state.clone(),
            pty: Arc::clone(&pty),
            cmd_tx,
            cancel: cancel.clone(),
            created_at: chrono::Utc::now(),
        });
        inner.retained.insert(id.to_string(), request);

        info!(
            "Session {} created (generation {}, {}x{})",
            id, generation, size.cols, size.rows
        );

        ConnectionController {
            emitter: inner.notifier.emitter(id, generation),
            registry: Arc::clone(&inner.registry),
            connector: Arc::clone(&inner.connector),
            resolver: inner.resolver.clone(),
            pending,
            state,
            pty,
            term: inner.settings.term.clone(),
            cmd_rx,
            cancel,
        }
        .spawn();

        Ok(())
    }

    /// End a session. Unknown ids are ignored, so repeated calls are harmless.
    pub fn disconnect(&self, id: &str) {
        let inner = &self.inner;
        inner.retained.remove(id);

        match inner.registry.remove(id) {
            Some(generation) => {
                inner
                    .notifier
                    .finish(id, generation, SessionEvent::status(id, SessionStatus::Disconnected));
                info!("Session {} disconnected", id);
            }
            None => debug!("Disconnect for unknown session {}", id),
        }
    }

    /// Queue input for the session's shell.
    ///
    /// Without an open session the input is discarded and a recoverable `error` event is
    /// emitted for `id`.
    pub async fn send_input(&self, id: &str, data: Vec<u8>) {
        let inner = &self.inner;
        if let Err(e) = inner
            .registry
            .send_command(id, SessionCommand::Data(data))
            .await
        {
            debug!("Input for {} discarded: {}", id, e);
            inner.notifier.notify(SessionEvent::error(
                id,
                WriteError::NoActiveStream.to_string(),
                true,
            ));
        }
    }

    /// Resize the session's pty. Dropped if no shell is open.
    pub async fn resize(&self, id: &str, rows: u32, cols: u32) {
        let size = PtySize::new(rows, cols);
        if let Err(e) = self
            .inner
            .registry
            .send_command(id, SessionCommand::Resize(size))
            .await
        {
            debug!("Resize to {}x{} for {} dropped: {}", cols, rows, id, e);
        }
    }

    /// Recreate a session from its last request at the given terminal size
    pub async fn reconnect(&self, id: &str, size: PtySize) -> Result<(), SessionError> {
        let request = self
            .inner
            .retained
            .get(id)
            .map(|r| r.value().clone())
            .ok_or_else(|| SessionError::NotFound(id.to_string()))?;

        info!("Reconnecting session {}", id);
        self.connect(id, request, size).await
    }

    pub fn session_info(&self, id: &str) -> Option<SessionInfo> {
        self.inner.registry.lookup(id)
    }

    pub fn list_sessions(&self) -> Vec<SessionInfo> {
        self.inner.registry.list()
    }

    /// Disconnect every session
    pub fn shutdown(&self) {
        let inner = &self.inner;
        for (id, generation) in inner.registry.drain() {
            inner
                .notifier
                .finish(&id, generation, SessionEvent::status(&id, SessionStatus::Disconnected));
        }
        inner.retained.clear();
        info!("Session service shut down");
    }

    pub fn key_store(&self) -> &KeyStore {
        &self.inner.key_store
    }

    pub async fn list_keys(&self) -> Result<KeyCatalog, StorageError> {
        self.inner.key_store.catalog().await
    }

    pub async fn generate_key(&self, request: GenerateKeyRequest) -> Result<KeyCatalog, KeyGenError> {
        generate_key(&self.inner.key_store, self.inner.generator.as_ref(), request).await
    }

    pub fn settings(&self) -> &ServiceSettings {
        &self.inner.settings
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::TEST_PUTTY_KEY;
    use crate::session::state::SessionState;
    use crate::session::testing::{ConnectBehavior, FakeConnector, FakeHarness};
    use crate::ssh::{ChannelEvent, ChannelInput, TransportEvent};
    use std::time::Duration;
    use tempfile::{tempdir, TempDir};
    use tokio::time::timeout;

    struct Fixture {
        service: SessionService,
        events: mpsc::UnboundedReceiver<SessionEvent>,
        harness: FakeHarness,
        connector: Arc<FakeConnector>,
        dir: TempDir,
    }

    fn fixture(behavior: ConnectBehavior) -> Fixture {
        let dir = tempdir().unwrap();
        let key_dir = dir.path().join("ssh");
        std::fs::create_dir_all(&key_dir).unwrap();

        let (connector, harness) = FakeConnector::new(behavior);
        let settings = ServiceSettings {
            temp_dir: Some(dir.path().join("scratch")),
            ..Default::default()
        };
        std::fs::create_dir_all(dir.path().join("scratch")).unwrap();

        let (service, events) = SessionService::builder(settings)
            .connector(connector.clone())
            .converter(Arc::new(PuttygenConverter::new("sshmux-missing-puttygen")))
            .generator(Arc::new(SshKeygen::new("sshmux-missing-keygen")))
            .key_store(KeyStore::with_paths(dir.path().join("ssh_keys.json"), key_dir))
            .build()
            .unwrap();

        Fixture {
            service,
            events,
            harness,
            connector,
            dir,
        }
    }

    fn password_request() -> ConnectRequest {
        ConnectRequest::with_password("h", 22, "u", "p")
    }

    async fn next_event(events: &mut mpsc::UnboundedReceiver<SessionEvent>) -> SessionEvent {
        timeout(Duration::from_secs(5), events.recv())
            .await
            .expect("timed out waiting for event")
            .expect("event stream closed")
    }

    async fn assert_quiet(events: &mut mpsc::UnboundedReceiver<SessionEvent>) {
        if let Ok(event) = timeout(Duration::from_millis(150), events.recv()).await {
            panic!("unexpected event: {:?}", event);
        }
    }

    fn status_of(event: &SessionEvent) -> Option<SessionStatus> {
        match event {
            SessionEvent::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    #[tokio::test]
    async fn test_password_session_end_to_end() {
        let mut f = fixture(ConnectBehavior::Succeed);
        f.service
            .connect("s1", password_request(), PtySize::new(24, 80))
            .await
            .unwrap();

        assert_eq!(status_of(&next_event(&mut f.events).await), Some(SessionStatus::Connected));
        let mut remote = f.harness.next_remote().await;
        let mut shell = f.harness.next_shell().await;
        assert_eq!(shell.request.term, "xterm-256color");
        assert_eq!(shell.request.size, PtySize::new(24, 80));

        let auth = f.connector.last_auth().unwrap();
        assert_eq!(auth.host, "h");
        assert_eq!(auth.keepalive.interval, Duration::from_secs(15));

        shell.events_tx.send(ChannelEvent::Data(b"welcome\r\n".to_vec())).unwrap();
        shell.events_tx.send(ChannelEvent::Data(b"$ ".to_vec())).unwrap();
        assert_eq!(
            next_event(&mut f.events).await,
            SessionEvent::Data {
                session_id: "s1".to_string(),
                data: b"welcome\r\n".to_vec()
            }
        );
        assert!(matches!(next_event(&mut f.events).await, SessionEvent::Data { .. }));

        f.service.send_input("s1", b"ls\n".to_vec()).await;
        assert_eq!(
            shell.input_rx.recv().await,
            Some(ChannelInput::Data(b"ls\n".to_vec()))
        );
        assert_eq!(f.service.session_info("s1").unwrap().state, SessionState::ChannelOpen);

        f.service.disconnect("s1");
        assert_eq!(
            status_of(&next_event(&mut f.events).await),
            Some(SessionStatus::Disconnected)
        );
        assert!(f.service.session_info("s1").is_none());

        remote.wait_disconnected().await;
        let _ = shell.events_tx.send(ChannelEvent::Data(b"late".to_vec()));
        assert_quiet(&mut f.events).await;
    }

    #[tokio::test]
    async fn test_create_twice_keeps_one_session() {
        let mut f = fixture(ConnectBehavior::Succeed);
        f.service
            .connect("s1", password_request(), PtySize::default())
            .await
            .unwrap();
        assert_eq!(status_of(&next_event(&mut f.events).await), Some(SessionStatus::Connected));
        let mut first_remote = f.harness.next_remote().await;
        let first_shell = f.harness.next_shell().await;

        f.service
            .connect("s1", password_request(), PtySize::default())
            .await
            .unwrap();
        assert_eq!(status_of(&next_event(&mut f.events).await), Some(SessionStatus::Connected));
        let second_shell = f.harness.next_shell().await;

        first_remote.wait_disconnected().await;
        let _ = first_shell.events_tx.send(ChannelEvent::Data(b"stale".to_vec()));
        second_shell.events_tx.send(ChannelEvent::Data(b"fresh".to_vec())).unwrap();

        match next_event(&mut f.events).await {
            SessionEvent::Data { data, .. } => assert_eq!(data, b"fresh"),
            other => panic!("unexpected event: {:?}", other),
        }
        assert_eq!(f.service.list_sessions().len(), 1);
        assert_quiet(&mut f.events).await;
    }

    #[tokio::test]
    async fn test_disconnect_is_idempotent() {
        let mut f = fixture(ConnectBehavior::Succeed);
        f.service
            .connect("s1", password_request(), PtySize::default())
            .await
            .unwrap();
        assert_eq!(status_of(&next_event(&mut f.events).await), Some(SessionStatus::Connected));
        let _shell = f.harness.next_shell().await;

        f.service.disconnect("s1");
        f.service.disconnect("s1");
        f.service.disconnect("never-existed");

        assert_eq!(
            status_of(&next_event(&mut f.events).await),
            Some(SessionStatus::Disconnected)
        );
        assert_quiet(&mut f.events).await;
        assert!(f.service.list_sessions().is_empty());
    }

    #[tokio::test]
    async fn test_resize_before_open_is_dropped() {
        let mut f = fixture(ConnectBehavior::GatedOpen);
        f.service
            .connect("s1", password_request(), PtySize::new(24, 80))
            .await
            .unwrap();
        assert_eq!(status_of(&next_event(&mut f.events).await), Some(SessionStatus::Connected));

        f.service.resize("s1", 50, 200).await;
        f.service.send_input("s1", b"early".to_vec()).await;
        match next_event(&mut f.events).await {
            SessionEvent::Error {
                message,
                recoverable,
                ..
            } => {
                assert_eq!(message, "No active stream for session");
                assert!(recoverable);
            }
            other => panic!("unexpected event: {:?}", other),
        }

        f.harness.release_open();
        let mut shell = f.harness.next_shell().await;
        assert_eq!(shell.request.size, PtySize::new(24, 80));

        f.service.resize("s1", 30, 100).await;
        assert_eq!(
            shell.input_rx.recv().await,
            Some(ChannelInput::Resize(PtySize::new(30, 100)))
        );
    }

    #[tokio::test]
    async fn test_putty_key_without_converter() {
        let mut f = fixture(ConnectBehavior::Succeed);
        let key_path = f.dir.path().join("work.ppk");
        std::fs::write(&key_path, TEST_PUTTY_KEY).unwrap();

        let request = ConnectRequest::with_key("h", 22, "u", &key_path, None);
        f.service
            .connect("s1", request, PtySize::default())
            .await
            .unwrap();

        match next_event(&mut f.events).await {
            SessionEvent::Error {
                message,
                recoverable,
                ..
            } => {
                assert!(message.contains("Install sshmux-missing-puttygen"), "{}", message);
                assert!(!recoverable);
            }
            other => panic!("unexpected event: {:?}", other),
        }
        assert!(f.service.list_sessions().is_empty());
        assert_eq!(f.connector.connect_count(), 0);
        assert_quiet(&mut f.events).await;

        let scratch = std::fs::read_dir(f.dir.path().join("scratch")).unwrap().count();
        assert_eq!(scratch, 0);
    }

    #[tokio::test]
    async fn test_exit_then_close() {
        let mut f = fixture(ConnectBehavior::Succeed);
        f.service
            .connect("s1", password_request(), PtySize::default())
            .await
            .unwrap();
        next_event(&mut f.events).await;
        let shell = f.harness.next_shell().await;

        shell.events_tx.send(ChannelEvent::ExitStatus(2)).unwrap();
        match next_event(&mut f.events).await {
            SessionEvent::Status { status, code, .. } => {
                assert_eq!(status, SessionStatus::Exit);
                assert_eq!(code, Some(2));
            }
            other => panic!("unexpected event: {:?}", other),
        }
        assert!(f.service.session_info("s1").is_some());

        shell.events_tx.send(ChannelEvent::Closed).unwrap();
        match next_event(&mut f.events).await {
            SessionEvent::Status { status, code, .. } => {
                assert_eq!(status, SessionStatus::Closed);
                assert_eq!(code, Some(2));
            }
            other => panic!("unexpected event: {:?}", other),
        }
        assert!(f.service.session_info("s1").is_none());
        assert_quiet(&mut f.events).await;
    }

    #[tokio::test]
    async fn test_window_change_is_informational() {
        let mut f = fixture(ConnectBehavior::Succeed);
        f.service
            .connect("s1", password_request(), PtySize::default())
            .await
            .unwrap();
        next_event(&mut f.events).await;
        let shell = f.harness.next_shell().await;

        shell
            .events_tx
            .send(ChannelEvent::WindowChange(PtySize::new(10, 10)))
            .unwrap();
        assert_eq!(
            status_of(&next_event(&mut f.events).await),
            Some(SessionStatus::WindowChange)
        );
        assert_eq!(f.service.session_info("s1").unwrap().state, SessionState::ChannelOpen);
    }

    #[tokio::test]
    async fn test_transport_end_disconnects() {
        let mut f = fixture(ConnectBehavior::Succeed);
        f.service
            .connect("s1", password_request(), PtySize::default())
            .await
            .unwrap();
        next_event(&mut f.events).await;
        let remote = f.harness.next_remote().await;
        let _shell = f.harness.next_shell().await;

        remote.transport_tx.send(TransportEvent::End).unwrap();
        remote
            .transport_tx
            .send(TransportEvent::Close { had_error: false })
            .unwrap();

        assert_eq!(
            status_of(&next_event(&mut f.events).await),
            Some(SessionStatus::Disconnected)
        );
        assert!(f.service.session_info("s1").is_none());
        assert_quiet(&mut f.events).await;
    }

    #[tokio::test]
    async fn test_transport_error_then_close() {
        let mut f = fixture(ConnectBehavior::Succeed);
        f.service
            .connect("s1", password_request(), PtySize::default())
            .await
            .unwrap();
        next_event(&mut f.events).await;
        let remote = f.harness.next_remote().await;
        let _shell = f.harness.next_shell().await;

        remote
            .transport_tx
            .send(TransportEvent::Error("keepalive timeout".to_string()))
            .unwrap();
        remote
            .transport_tx
            .send(TransportEvent::Close { had_error: true })
            .unwrap();

        assert_eq!(
            next_event(&mut f.events).await,
            SessionEvent::error("s1", "keepalive timeout", false)
        );
        assert!(f.service.session_info("s1").is_none());
        assert_quiet(&mut f.events).await;
    }

    #[tokio::test]
    async fn test_transport_close_reports_error_flag() {
        let mut f = fixture(ConnectBehavior::Succeed);
        f.service
            .connect("s1", password_request(), PtySize::default())
            .await
            .unwrap();
        next_event(&mut f.events).await;
        let remote = f.harness.next_remote().await;
        let _shell = f.harness.next_shell().await;

        remote
            .transport_tx
            .send(TransportEvent::Close { had_error: true })
            .unwrap();

        match next_event(&mut f.events).await {
            SessionEvent::Status {
                status, had_error, ..
            } => {
                assert_eq!(status, SessionStatus::Closed);
                assert_eq!(had_error, Some(true));
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_connect_failure() {
        let mut f = fixture(ConnectBehavior::Fail("connection refused".to_string()));
        f.service
            .connect("s1", password_request(), PtySize::default())
            .await
            .unwrap();

        match next_event(&mut f.events).await {
            SessionEvent::Error { message, .. } => {
                assert_eq!(message, "Connection failed: connection refused")
            }
            other => panic!("unexpected event: {:?}", other),
        }
        assert!(f.service.list_sessions().is_empty());
        assert_quiet(&mut f.events).await;
    }

    #[tokio::test]
    async fn test_open_failure_tears_down() {
        let mut f = fixture(ConnectBehavior::FailOpen("administratively prohibited".to_string()));
        f.service
            .connect("s1", password_request(), PtySize::default())
            .await
            .unwrap();

        assert_eq!(status_of(&next_event(&mut f.events).await), Some(SessionStatus::Connected));
        let mut remote = f.harness.next_remote().await;
        match next_event(&mut f.events).await {
            SessionEvent::Error { message, .. } => {
                assert!(message.contains("administratively prohibited"))
            }
            other => panic!("unexpected event: {:?}", other),
        }
        assert!(f.service.list_sessions().is_empty());
        remote.wait_disconnected().await;
    }

    #[tokio::test]
    async fn test_config_errors_are_synchronous() {
        let mut f = fixture(ConnectBehavior::Succeed);

        let err = f
            .service
            .connect("s1", ConnectRequest::with_password("", 22, "u", "p"), PtySize::default())
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::Config(ConfigError::InvalidHost)));

        let key_request = ConnectRequest {
            auth_type: AuthType::Key,
            password: None,
            ..password_request()
        };
        let err = f
            .service
            .connect("s1", key_request, PtySize::default())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            SessionError::Config(ConfigError::MissingCredential(_))
        ));

        assert!(f.service.list_sessions().is_empty());
        assert_quiet(&mut f.events).await;
    }

    #[tokio::test]
    async fn test_unknown_session_operations() {
        let mut f = fixture(ConnectBehavior::Succeed);

        f.service.send_input("nope", vec![1]).await;
        assert_eq!(
            next_event(&mut f.events).await,
            SessionEvent::error("nope", "No active stream for session", true)
        );

        f.service.resize("nope", 1, 1).await;
        assert_quiet(&mut f.events).await;

        assert!(matches!(
            f.service.reconnect("nope", PtySize::default()).await,
            Err(SessionError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_input_after_remote_close() {
        let mut f = fixture(ConnectBehavior::Succeed);
        f.service
            .connect("s1", password_request(), PtySize::default())
            .await
            .unwrap();
        next_event(&mut f.events).await;
        let shell = f.harness.next_shell().await;

        shell.events_tx.send(ChannelEvent::Closed).unwrap();
        assert_eq!(status_of(&next_event(&mut f.events).await), Some(SessionStatus::Closed));

        f.service.send_input("s1", b"ls\n".to_vec()).await;
        match next_event(&mut f.events).await {
            SessionEvent::Error {
                session_id,
                message,
                recoverable,
            } => {
                assert_eq!(session_id, "s1");
                assert_eq!(message, "No active stream for session");
                assert!(recoverable);
            }
            other => panic!("unexpected event: {:?}", other),
        }

        f.service.resize("s1", 40, 120).await;
        assert_quiet(&mut f.events).await;
    }

    #[tokio::test]
    async fn test_input_reaches_flooding_shell() {
        let mut f = fixture(ConnectBehavior::Succeed);
        f.service
            .connect("s1", password_request(), PtySize::default())
            .await
            .unwrap();
        next_event(&mut f.events).await;
        let mut shell = f.harness.next_shell().await;

        let events_tx = shell.events_tx.clone();
        let flood = tokio::spawn(async move {
            while events_tx.send(ChannelEvent::Data(b"y\n".to_vec())).is_ok() {
                tokio::task::yield_now().await;
            }
        });

        // Let the output backlog build up before typing
        for _ in 0..100 {
            tokio::task::yield_now().await;
        }
        f.service.send_input("s1", b"\x03".to_vec()).await;

        let received = timeout(Duration::from_secs(3), shell.input_rx.recv()).await;
        flood.abort();
        assert_eq!(
            received.expect("input starved by output"),
            Some(ChannelInput::Data(b"\x03".to_vec()))
        );
    }

    #[tokio::test]
    async fn test_reconnect_uses_new_size() {
        let mut f = fixture(ConnectBehavior::Succeed);
        f.service
            .connect("s1", password_request(), PtySize::new(24, 80))
            .await
            .unwrap();
        next_event(&mut f.events).await;
        let remote = f.harness.next_remote().await;
        let _shell = f.harness.next_shell().await;

        remote.transport_tx.send(TransportEvent::End).unwrap();
        assert_eq!(
            status_of(&next_event(&mut f.events).await),
            Some(SessionStatus::Disconnected)
        );

        f.service.reconnect("s1", PtySize::new(30, 100)).await.unwrap();
        assert_eq!(status_of(&next_event(&mut f.events).await), Some(SessionStatus::Connected));
        let shell = f.harness.next_shell().await;
        assert_eq!(shell.request.size, PtySize::new(30, 100));
        assert_eq!(f.connector.connect_count(), 2);
        assert_eq!(f.service.session_info("s1").unwrap().generation, 2);
    }

    #[tokio::test]
    async fn test_shutdown_disconnects_all() {
        let mut f = fixture(ConnectBehavior::Succeed);
        let mut shells = Vec::new();
        for id in ["a", "b"] {
            f.service
                .connect(id, password_request(), PtySize::default())
                .await
                .unwrap();
            assert_eq!(status_of(&next_event(&mut f.events).await), Some(SessionStatus::Connected));
            shells.push(f.harness.next_shell().await);
        }

        f.service.shutdown();
        let mut ids = Vec::new();
        for _ in 0..2 {
            let event = next_event(&mut f.events).await;
            assert_eq!(status_of(&event), Some(SessionStatus::Disconnected));
            ids.push(event.session_id().to_string());
        }
        ids.sort();
        assert_eq!(ids, vec!["a", "b"]);
        assert!(f.service.list_sessions().is_empty());
        assert_quiet(&mut f.events).await;
    }

    #[tokio::test]
    async fn test_generate_key_conflict_skips_tool() {
        let f = fixture(ConnectBehavior::Succeed);
        let existing = f.service.key_store().key_dir().join("id_ed25519");
        std::fs::write(&existing, "already here").unwrap();

        let err = f
            .service
            .generate_key(GenerateKeyRequest::default())
            .await
            .unwrap_err();
        match err {
            KeyGenError::AlreadyExists(path) => assert_eq!(path, existing),
            other => panic!("unexpected error: {:?}", other),
        }
    }
}
