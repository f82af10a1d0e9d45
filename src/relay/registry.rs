//! Live set of open relay connections.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::RwLock;
use tokio::sync::mpsc;

use crate::error::{Error, Result};
use crate::transport::CloseFrame;

/// Identity of one accepted connection, unique for the life of a registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Work queued for a connection's writer task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// Encoded message shared by every recipient of one broadcast.
    Text(Arc<str>),
    Pong(Vec<u8>),
    Close(CloseFrame),
}

/// Relay-side handle to one connection.
#[derive(Debug)]
pub struct Peer {
    id: ConnectionId,
    tx: mpsc::UnboundedSender<Outbound>,
    open: AtomicBool,
}

impl Peer {
    /// Create a handle and the queue its writer task drains.
    #[must_use]
    pub fn new(id: ConnectionId) -> (Arc<Self>, mpsc::UnboundedReceiver<Outbound>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let peer = Self {
            id,
            tx,
            open: AtomicBool::new(true),
        };
        (Arc::new(peer), rx)
    }

    #[must_use]
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Open and ready: not closing and its writer still running.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire) && !self.tx.is_closed()
    }

    /// Stop accepting data; already queued items still drain.
    pub fn mark_closing(&self) {
        self.open.store(false, Ordering::Release);
    }

    /// Queue an item without waiting.
    ///
    /// # Errors
    ///
    /// `Error::TransportWrite` if the writer task has gone away.
    pub fn send(&self, item: Outbound) -> Result<()> {
        self.tx.send(item).map_err(|_| Error::TransportWrite {
            connection: self.id.as_u64(),
            reason: "writer task has stopped".into(),
        })
    }
}

/// Registry of open connections, safe to share across connection tasks.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    peers: RwLock<HashMap<ConnectionId, Arc<Peer>>>,
    next_id: AtomicU64,
}

impl ConnectionRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a fresh connection id.
    pub fn next_id(&self) -> ConnectionId {
        ConnectionId(self.next_id.fetch_add(1, Ordering::Relaxed) + 1)
    }

    /// Insert `peer`. Returns `false` (and changes nothing) if its id is
    /// already registered.
    pub fn add(&self, peer: Arc<Peer>) -> bool {
        let mut peers = self.peers.write();
        if peers.contains_key(&peer.id()) {
            return false;
        }
        peers.insert(peer.id(), peer);
        true
    }

    /// Remove `id`; removing an absent id is a no-op.
    pub fn remove(&self, id: ConnectionId) -> Option<Arc<Peer>> {
        self.peers.write().remove(&id)
    }

    /// Call `f` on every open peer except `except`. Returns the number of
    /// peers visited.
    ///
    /// The read lock is held for the whole pass, so membership cannot change
    /// in the middle of one fan-out.
    pub fn for_each_except<F>(&self, except: Option<ConnectionId>, mut f: F) -> usize
    where
        F: FnMut(&Peer),
    {
        let peers = self.peers.read();
        let mut visited = 0;
        for peer in peers.values() {
            if Some(peer.id()) == except || !peer.is_open() {
                continue;
            }
            f(peer);
            visited += 1;
        }
        visited
    }

    #[must_use]
    pub fn get(&self, id: ConnectionId) -> Option<Arc<Peer>> {
        self.peers.read().get(&id).cloned()
    }

    #[must_use]
    pub fn contains(&self, id: ConnectionId) -> bool {
        self.peers.read().contains_key(&id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.peers.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.peers.read().is_empty()
    }

    /// Empty the registry, handing back every peer.
    pub fn drain(&self) -> Vec<Arc<Peer>> {
        self.peers.write().drain().map(|(_, peer)| peer).collect()
    }
}
