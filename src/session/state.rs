//! Session lifecycle state

use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Connection lifecycle
///
/// ```text
/// Connecting -> Authenticated -> ChannelOpen -> Closed
///      |              |
///      +--> Errored <-+
/// ```
///
/// Cancellation (replace or disconnect) can close a session from any live state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Connecting,
    Authenticated,
    ChannelOpen,
    Closed,
    Errored,
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Closed | SessionState::Errored)
    }

    pub fn can_transition_to(&self, next: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, next),
            (Connecting, Authenticated)
                | (Connecting, Errored)
                | (Connecting, Closed)
                | (Authenticated, ChannelOpen)
                | (Authenticated, Errored)
                | (Authenticated, Closed)
                | (ChannelOpen, Closed)
        )
    }
}

/// Shared, validated state cell. The controller writes; everyone else reads.
#[derive(Debug, Clone)]
pub struct SessionStateCell(Arc<RwLock<SessionState>>);

impl SessionStateCell {
    pub fn new() -> Self {
        Self(Arc::new(RwLock::new(SessionState::Connecting)))
    }

    pub fn get(&self) -> SessionState {
        *self.0.read()
    }

    /// Apply a transition; invalid transitions are logged and ignored
    pub fn transition(&self, next: SessionState) -> bool {
        let mut state = self.0.write();
        if state.can_transition_to(next) {
            *state = next;
            true
        } else {
            warn!("Ignoring invalid session transition {:?} -> {:?}", *state, next);
            false
        }
    }
}

impl Default for SessionStateCell {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path() {
        let cell = SessionStateCell::new();
        assert_eq!(cell.get(), SessionState::Connecting);
        assert!(cell.transition(SessionState::Authenticated));
        assert!(cell.transition(SessionState::ChannelOpen));
        assert!(cell.transition(SessionState::Closed));
        assert!(cell.get().is_terminal());
    }

    #[test]
    fn test_errored_only_before_channel_open() {
        assert!(SessionState::Connecting.can_transition_to(SessionState::Errored));
        assert!(SessionState::Authenticated.can_transition_to(SessionState::Errored));
        assert!(!SessionState::ChannelOpen.can_transition_to(SessionState::Errored));
    }

    #[test]
    fn test_terminal_states_are_final() {
        let cell = SessionStateCell::new();
        assert!(cell.transition(SessionState::Errored));
        assert!(!cell.transition(SessionState::Authenticated));
        assert!(!cell.transition(SessionState::Closed));
        assert_eq!(cell.get(), SessionState::Errored);
    }

    #[test]
    fn test_no_skipping_authentication() {
        let cell = SessionStateCell::new();
        assert!(!cell.transition(SessionState::ChannelOpen));
        assert_eq!(cell.get(), SessionState::Connecting);
    }
}
