//! Data pipe between the consumer and an open shell channel

use thiserror::Error;
use tokio::sync::mpsc;

use crate::ssh::{ChannelEvent, ChannelInput, PtySize, ShellChannel};

/// Input that could not reach the channel. Never fatal to the session.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum WriteError {
    #[error("No active stream for session")]
    NoActiveStream,

    #[error("Shell channel is closed")]
    ChannelClosed,
}

/// Relays bytes both ways without buffering beyond the channel queues
pub struct DataPipe {
    input: mpsc::Sender<ChannelInput>,
    events: mpsc::UnboundedReceiver<ChannelEvent>,
}

impl DataPipe {
    pub fn new(channel: ShellChannel) -> Self {
        Self {
            input: channel.input,
            events: channel.events,
        }
    }

    pub async fn write(&self, data: Vec<u8>) -> Result<(), WriteError> {
        self.input
            .send(ChannelInput::Data(data))
            .await
            .map_err(|_| WriteError::ChannelClosed)
    }

    pub async fn resize(&self, size: PtySize) -> Result<(), WriteError> {
        self.input
            .send(ChannelInput::Resize(size))
            .await
            .map_err(|_| WriteError::ChannelClosed)
    }

    /// Next channel event; `None` once the channel pump is gone
    pub async fn next_event(&mut self) -> Option<ChannelEvent> {
        self.events.recv().await
    }

    /// Ask the pump to close the channel
    pub async fn close(&self) {
        let _ = self.input.send(ChannelInput::Close).await;
    }
}
