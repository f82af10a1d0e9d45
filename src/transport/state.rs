//! Socket lifecycle (RFC 6455 Section 4 and 7).

/// Lifecycle state of one WebSocket.
///
/// Sockets only exist after the upgrade, so every socket starts `Open`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SocketState {
    /// Data may flow both ways.
    Open,
    /// Close frame sent, waiting for the peer's close.
    Closing,
    /// Fully closed.
    Closed,
}

impl SocketState {
    /// Only `Open` allows data frames out.
    #[must_use]
    #[inline]
    pub const fn can_send(&self) -> bool {
        matches!(self, SocketState::Open)
    }
}

impl std::fmt::Display for SocketState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SocketState::Open => write!(f, "Open"),
            SocketState::Closing => write!(f, "Closing"),
            SocketState::Closed => write!(f, "Closed"),
        }
    }
}
