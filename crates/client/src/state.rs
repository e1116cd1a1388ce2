//! Connection lifecycle state.

use std::fmt;

/// Lifecycle of a connector.
///
/// `Disconnected -> Pending` on a connect request, `Pending -> Connected` once
/// authentication and the initial synchronization succeed, and any state back
/// to `Disconnected` on socket closure or a failed handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Pending,
    Connected,
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, ConnectionState::Pending)
    }

    pub fn is_disconnected(&self) -> bool {
        matches!(self, ConnectionState::Disconnected)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Pending => write!(f, "pending"),
            ConnectionState::Connected => write!(f, "connected"),
        }
    }
}
