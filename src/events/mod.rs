//! Session events delivered to the consumer

mod notifier;
mod sequencer;

pub use notifier::{EventNotifier, SessionEmitter};
pub use sequencer::SessionSequencer;

use serde::{Deserialize, Serialize};

/// Lifecycle status reported in `status` events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionStatus {
    Connected,
    Disconnected,
    Closed,
    Exit,
    #[serde(rename = "window-change")]
    WindowChange,
}

impl SessionStatus {
    /// Terminal statuses end the session
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionStatus::Closed | SessionStatus::Disconnected)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    #[serde(rename_all = "camelCase")]
    Status {
        session_id: String,
        status: SessionStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        code: Option<u32>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        signal: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        had_error: Option<bool>,
    },
    #[serde(rename_all = "camelCase")]
    Data { session_id: String, data: Vec<u8> },
    #[serde(rename_all = "camelCase")]
    Error {
        session_id: String,
        message: String,
        recoverable: bool,
    },
}

impl SessionEvent {
    pub fn status(session_id: &str, status: SessionStatus) -> Self {
        SessionEvent::Status {
            session_id: session_id.to_string(),
            status,
            code: None,
            signal: None,
            had_error: None,
        }
    }

    pub fn error(session_id: &str, message: impl Into<String>, recoverable: bool) -> Self {
        SessionEvent::Error {
            session_id: session_id.to_string(),
            message: message.into(),
            recoverable,
        }
    }

    pub fn session_id(&self) -> &str {
        match self {
            SessionEvent::Status { session_id, .. }
            | SessionEvent::Data { session_id, .. }
            | SessionEvent::Error { session_id, .. } => session_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_json_shape() {
        let event = SessionEvent::Status {
            session_id: "s1".to_string(),
            status: SessionStatus::WindowChange,
            code: None,
            signal: None,
            had_error: None,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"type": "status", "sessionId": "s1", "status": "window-change"})
        );

        let closed = SessionEvent::Status {
            session_id: "s1".to_string(),
            status: SessionStatus::Closed,
            code: Some(0),
            signal: None,
            had_error: Some(true),
        };
        let json = serde_json::to_value(&closed).unwrap();
        assert_eq!(json["status"], "Closed");
        assert_eq!(json["code"], 0);
        assert_eq!(json["hadError"], true);
    }

    #[test]
    fn test_error_json_shape() {
        let event = SessionEvent::error("s1", "boom", false);
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"type": "error", "sessionId": "s1", "message": "boom", "recoverable": false})
        );
        assert_eq!(event.session_id(), "s1");
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(SessionStatus::Closed.is_terminal());
        assert!(SessionStatus::Disconnected.is_terminal());
        assert!(!SessionStatus::Exit.is_terminal());
        assert!(!SessionStatus::WindowChange.is_terminal());
    }
}
