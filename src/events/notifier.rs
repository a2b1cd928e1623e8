//! Outbound session event stream
//!
//! All sessions share one unbounded channel to the consumer. Every send is gated on the
//! sender's generation still being live, so a torn-down session can never leak events.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::debug;

use super::sequencer::SessionSequencer;
use super::{SessionEvent, SessionStatus};

pub struct EventNotifier {
    tx: mpsc::UnboundedSender<SessionEvent>,
    sequencer: SessionSequencer,
}

impl EventNotifier {
    /// Create a notifier and the consumer's end of the event stream
    pub fn channel() -> (Arc<Self>, mpsc::UnboundedReceiver<SessionEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Arc::new(Self {
                tx,
                sequencer: SessionSequencer::new(),
            }),
            rx,
        )
    }

    /// Start a new generation for `session_id`; older generations go quiet immediately
    pub fn activate(&self, session_id: &str) -> u64 {
        self.sequencer.activate(session_id)
    }

    pub fn is_live(&self, session_id: &str, generation: u64) -> bool {
        self.sequencer.is_live(session_id, generation)
    }

    /// Deliver a non-terminal event; returns false if the generation is stale
    pub fn emit(&self, session_id: &str, generation: u64, event: SessionEvent) -> bool {
        self.sequencer
            .run_if_live(session_id, generation, || self.send(event))
    }

    /// Deliver a terminal event and retire the generation in one step.
    ///
    /// Returns false if the generation was already retired, in which case nothing is sent.
    pub fn finish(&self, session_id: &str, generation: u64, event: SessionEvent) -> bool {
        self.sequencer
            .retire_with(session_id, generation, || self.send(event))
    }

    /// Deliver an event for an id with no live generation, e.g. input to a closed session
    pub fn notify(&self, event: SessionEvent) {
        self.send(event);
    }

    /// Retire without an event
    pub fn retire(&self, session_id: &str, generation: u64) -> bool {
        self.sequencer.retire(session_id, generation)
    }

    pub fn emitter(self: &Arc<Self>, session_id: &str, generation: u64) -> SessionEmitter {
        SessionEmitter {
            notifier: Arc::clone(self),
            session_id: session_id.to_string(),
            generation,
        }
    }

    fn send(&self, event: SessionEvent) {
        if self.tx.send(event).is_err() {
            debug!("Event consumer gone, dropping session event");
        }
    }
}

/// Event sink bound to one session generation
#[derive(Clone)]
pub struct SessionEmitter {
    notifier: Arc<EventNotifier>,
    session_id: String,
    generation: u64,
}

impl SessionEmitter {
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_live(&self) -> bool {
        self.notifier.is_live(&self.session_id, self.generation)
    }

    pub fn status(&self, status: SessionStatus) -> bool {
        self.emit(SessionEvent::status(&self.session_id, status))
    }

    /// `exit` status with whichever of code or signal the remote reported
    pub fn exit(&self, code: Option<u32>, signal: Option<String>) -> bool {
        self.emit(SessionEvent::Status {
            session_id: self.session_id.clone(),
            status: SessionStatus::Exit,
            code,
            signal,
            had_error: None,
        })
    }

    pub fn data(&self, data: Vec<u8>) -> bool {
        self.emit(SessionEvent::Data {
            session_id: self.session_id.clone(),
            data,
        })
    }

    /// Error that leaves the session running
    pub fn recoverable_error(&self, message: impl Into<String>) -> bool {
        self.emit(SessionEvent::error(&self.session_id, message, true))
    }

    /// Terminal error; retires the generation
    pub fn fail(&self, message: impl Into<String>) -> bool {
        self.finish(SessionEvent::error(&self.session_id, message, false))
    }

    /// Terminal status; retires the generation
    pub fn finish_status(
        &self,
        status: SessionStatus,
        code: Option<u32>,
        signal: Option<String>,
        had_error: Option<bool>,
    ) -> bool {
        self.finish(SessionEvent::Status {
            session_id: self.session_id.clone(),
            status,
            code,
            signal,
            had_error,
        })
    }

    /// Go quiet without a terminal event
    pub fn retire(&self) -> bool {
        self.notifier.retire(&self.session_id, self.generation)
    }

    fn emit(&self, event: SessionEvent) -> bool {
        self.notifier.emit(&self.session_id, self.generation, event)
    }

    fn finish(&self, event: SessionEvent) -> bool {
        self.notifier.finish(&self.session_id, self.generation, event)
    }
}
