//! SSH Client implementation using russh

use std::sync::Arc;

use async_trait::async_trait;
use russh::client::{self, DisconnectReason};
use russh::keys::key::PrivateKeyWithHashAlg;
use russh::keys::PublicKey;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::config::{AuthConfig, Credential};
use super::error::SshError;
use super::handle_owner::spawn_handle_owner_task;
use super::transport::{Connector, TransportEvent, TransportLink};
use crate::keys::parse_private_key;

/// [`Connector`] backed by a real russh client connection
#[derive(Debug, Default, Clone)]
pub struct RusshConnector;

impl RusshConnector {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Connector for RusshConnector {
    async fn connect(&self, config: &AuthConfig) -> Result<TransportLink, SshError> {
        let addr = config.address();

        info!("Connecting to SSH server at {}", addr);

        // Liveness is delegated to russh: after `keepalive_max` unanswered probes the
        // session ends and `disconnected` reports the error.
        let ssh_config = client::Config {
            inactivity_timeout: None,
            keepalive_interval: Some(config.keepalive.interval),
            keepalive_max: config.keepalive.max_missed,
            ..Default::default()
        };

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let handler = ClientHandler::new(config.host.clone(), config.port, events_tx);

        let mut handle = tokio::time::timeout(
            config.connect_timeout,
            client::connect(
                Arc::new(ssh_config),
                (config.host.as_str(), config.port),
                handler,
            ),
        )
        .await
        .map_err(|_| SshError::Timeout(format!("Connection to {} timed out", addr)))?
        .map_err(|e| match e {
            SshError::ProtocolError(msg) => SshError::ConnectionFailed(msg),
            other => other,
        })?;

        debug!("SSH handshake completed with {}", addr);

        let authenticated = match &config.credential {
            Credential::Password(password) => handle
                .authenticate_password(&config.username, password)
                .await
                .map_err(|e| SshError::AuthenticationFailed(e.to_string()))?,
            Credential::Key {
                path,
                passphrase,
                material,
            } => {
                let key = parse_private_key(material.as_bytes(), passphrase.as_deref())
                    .map_err(|e| {
                        SshError::KeyError(format!("{}: {}", path.display(), e))
                    })?;

                let key_with_hash = PrivateKeyWithHashAlg::new(Arc::new(key), None);

                handle
                    .authenticate_publickey(&config.username, key_with_hash)
                    .await
                    .map_err(|e| SshError::AuthenticationFailed(e.to_string()))?
            }
        };

        if !authenticated.success() {
            return Err(SshError::AuthenticationFailed(
                "Authentication rejected by server".to_string(),
            ));
        }

        info!(
            "SSH authentication successful for {}@{} ({})",
            config.username,
            addr,
            config.credential.kind()
        );

        let controller = spawn_handle_owner_task(handle, format!("{}@{}", config.username, addr));

        Ok(TransportLink {
            transport: Box::new(controller),
            events: events_rx,
        })
    }
}

/// Client handler for russh callbacks
///
/// Translates russh's disconnect callback into [`TransportEvent`]s for the owning session.
pub struct ClientHandler {
    host: String,
    port: u16,
    events: mpsc::UnboundedSender<TransportEvent>,
}

impl ClientHandler {
    pub fn new(host: String, port: u16, events: mpsc::UnboundedSender<TransportEvent>) -> Self {
        Self { host, port, events }
    }
}

impl client::Handler for ClientHandler {
    type Error = SshError;

    async fn check_server_key(
        &mut self,
        server_public_key: &PublicKey,
    ) -> Result<bool, Self::Error> {
        // Host keys are accepted unconditionally; pinning belongs to the consumer.
        info!(
            "Accepting {} host key for {}:{}",
            server_public_key.algorithm(),
            self.host,
            self.port
        );
        Ok(true)
    }

    async fn disconnected(
        &mut self,
        reason: DisconnectReason<Self::Error>,
    ) -> Result<(), Self::Error> {
        match reason {
            DisconnectReason::ReceivedDisconnect(_) => {
                info!("Peer {}:{} closed the connection", self.host, self.port);
                let _ = self.events.send(TransportEvent::End);
                let _ = self.events.send(TransportEvent::Close { had_error: false });
                Ok(())
            }
            DisconnectReason::Error(e) => {
                warn!("Connection to {}:{} failed: {}", self.host, self.port, e);
                let _ = self.events.send(TransportEvent::Error(e.to_string()));
                let _ = self.events.send(TransportEvent::Close { had_error: true });
                Err(e)
            }
        }
    }
}
