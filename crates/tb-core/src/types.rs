//! Core domain types

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Unique identifier for a terminal session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub Uuid);

impl SessionId {
    /// Generate a fresh session ID
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    /// First eight hex digits, enough to tell sessions apart in logs
    pub fn short(&self) -> String {
        self.0.simple().to_string()[..8].to_string()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session-{}", self.short())
    }
}

/// State of the connection owned by a session transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransportState {
    /// No connection and no attempt in progress
    Disconnected,
    /// First connection attempt in progress
    Connecting,
    /// Connected and exchanging frames
    Connected,
    /// Connection lost; retrying with backoff
    Reconnecting,
    /// Closed for good, either on request or after retries ran out
    Closed,
}

impl TransportState {
    /// Whether frames can be sent in this state
    pub fn is_connected(&self) -> bool {
        matches!(self, TransportState::Connected)
    }
}

impl fmt::Display for TransportState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportState::Disconnected => write!(f, "disconnected"),
            TransportState::Connecting => write!(f, "connecting"),
            TransportState::Connected => write!(f, "connected"),
            TransportState::Reconnecting => write!(f, "reconnecting"),
            TransportState::Closed => write!(f, "closed"),
        }
    }
}

/// Lifecycle state of a session controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    /// Created, not started
    Idle,
    /// Waiting for the first connection
    Connecting,
    /// Connected; terminal I/O flows
    Active,
    /// Connection lost; transport is retrying
    Reconnecting,
    /// Finished
    Closed,
}

impl SessionState {
    /// State the controller moves to when the transport reports `state`.
    ///
    /// `Idle` and `Connecting` hold until the first connection succeeds.
    pub fn on_transport(self, state: TransportState) -> SessionState {
        match (self, state) {
            (SessionState::Closed, _) => SessionState::Closed,
            (_, TransportState::Closed) => SessionState::Closed,
            (_, TransportState::Connected) => SessionState::Active,
            (SessionState::Active | SessionState::Reconnecting, TransportState::Reconnecting) => {
                SessionState::Reconnecting
            }
            (SessionState::Idle | SessionState::Connecting, _) => SessionState::Connecting,
            (current, TransportState::Disconnected | TransportState::Connecting) => current,
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Idle => write!(f, "idle"),
            SessionState::Connecting => write!(f, "connecting"),
            SessionState::Active => write!(f, "active"),
            SessionState::Reconnecting => write!(f, "reconnecting"),
            SessionState::Closed => write!(f, "closed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_id_display() {
        let id = SessionId::generate();
        let shown = id.to_string();
        assert!(shown.starts_with("session-"));
        assert_eq!(shown.len(), "session-".len() + 8);
        assert_ne!(id, SessionId::generate());
    }

    #[test]
    fn test_transport_state_display() {
        assert_eq!(format!("{}", TransportState::Connected), "connected");
        assert_eq!(format!("{}", TransportState::Reconnecting), "reconnecting");
    }

    #[test]
    fn test_session_state_transitions() {
        use SessionState::*;

        assert_eq!(Idle.on_transport(TransportState::Connecting), Connecting);
        assert_eq!(Connecting.on_transport(TransportState::Reconnecting), Connecting);
        assert_eq!(Connecting.on_transport(TransportState::Connected), Active);
        assert_eq!(Active.on_transport(TransportState::Reconnecting), Reconnecting);
        assert_eq!(Reconnecting.on_transport(TransportState::Connected), Active);
        assert_eq!(Active.on_transport(TransportState::Closed), Closed);
        assert_eq!(Closed.on_transport(TransportState::Connected), Closed);
    }
}
