//! Endpoint role, which decides masking in both directions.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// Harness participants; mask every outgoing frame.
    Client,
    /// The relay; never masks, and requires masked inbound frames.
    Server,
}

impl Role {
    #[inline]
    #[must_use]
    pub const fn must_mask(self) -> bool {
        matches!(self, Role::Client)
    }

    /// Inbound frames must carry a mask exactly when we are the server.
    #[inline]
    #[must_use]
    pub const fn expects_masked(self) -> bool {
        matches!(self, Role::Server)
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Role::Client => "client",
            Role::Server => "server",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
