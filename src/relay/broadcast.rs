//! Fan-out of chat messages and join/leave notices.

use std::sync::Arc;

use tracing::{debug, trace, warn};

use crate::error::Result;
use crate::message::Message;
use crate::relay::registry::{ConnectionId, ConnectionRegistry, Outbound, Peer};

/// Forwards every message to all other open connections.
///
/// Holds no history: each call encodes one message, queues it for each
/// recipient and forgets it.
#[derive(Debug, Clone)]
pub struct BroadcastRelay {
    registry: Arc<ConnectionRegistry>,
}

impl BroadcastRelay {
    #[must_use]
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self { registry }
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Register `peer` and announce it to everyone else.
    ///
    /// Returns the number of peers the join notice reached; a peer that was
    /// already registered triggers no notice.
    pub fn on_connect(&self, peer: Arc<Peer>) -> usize {
        let id = peer.id();
        if !self.registry.add(peer) {
            debug!(%id, "connection already registered");
            return 0;
        }
        debug!(%id, open = self.registry.len(), "connection registered");
        self.broadcast(&Message::joined(), Some(id))
    }

    /// Decode a payload from `from` and forward it to every other peer.
    ///
    /// # Errors
    ///
    /// `Error::MalformedPayload` if the payload is not a valid message. The
    /// error concerns only `from`; nothing is forwarded.
    pub fn on_receive(&self, from: ConnectionId, payload: &[u8]) -> Result<usize> {
        let message = Message::decode(payload)?;
        trace!(%from, id = %message.id, sender = %message.sender, "relaying message");
        Ok(self.broadcast(&message, Some(from)))
    }

    /// Deregister `id` and tell the remaining peers.
    ///
    /// Only the first call for a given id broadcasts a notice.
    pub fn on_close(&self, id: ConnectionId) -> usize {
        let Some(peer) = self.registry.remove(id) else {
            return 0;
        };
        peer.mark_closing();
        debug!(%id, open = self.registry.len(), "connection deregistered");
        self.broadcast(&Message::left(), None)
    }

    fn broadcast(&self, message: &Message, except: Option<ConnectionId>) -> usize {
        let encoded: Arc<str> = Arc::from(message.encode());
        let mut delivered = 0;
        let mut failed = 0;

        self.registry.for_each_except(except, |peer| {
            match peer.send(Outbound::Text(Arc::clone(&encoded))) {
                Ok(()) => delivered += 1,
                Err(e) => {
                    failed += 1;
                    warn!(conn = %peer.id(), error = %e, "failed to queue message for peer");
                }
            }
        });

        trace!(kind = ?message.kind, delivered, failed, "broadcast complete");
        delivered
    }
}
