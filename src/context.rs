//! Process-scoped relay state with explicit teardown.
//!
//! One [`RelayContext`] is built at startup and shared by reference with the
//! accept loop and every connection task. Shutting it down stops the
//! listener, closes every connection with 1001 and empties the registry.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{info, warn};

use crate::config::RelayConfig;
use crate::relay::{BroadcastRelay, ConnectionRegistry};

/// Everything the relay shares across tasks.
#[derive(Debug)]
pub struct RelayContext {
    config: RelayConfig,
    registry: Arc<ConnectionRegistry>,
    relay: BroadcastRelay,
    shutdown: CancellationToken,
    tasks: TaskTracker,
}

impl RelayContext {
    #[must_use]
    pub fn new(config: RelayConfig) -> Arc<Self> {
        let registry = Arc::new(ConnectionRegistry::new());
        let relay = BroadcastRelay::new(Arc::clone(&registry));
        Arc::new(Self {
            config,
            registry,
            relay,
            shutdown: CancellationToken::new(),
            tasks: TaskTracker::new(),
        })
    }

    #[must_use]
    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    #[must_use]
    pub fn relay(&self) -> &BroadcastRelay {
        &self.relay
    }

    /// Token cancelled when teardown starts.
    #[must_use]
    pub fn token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    #[must_use]
    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Tracker for connection tasks.
    #[must_use]
    pub fn tasks(&self) -> &TaskTracker {
        &self.tasks
    }

    /// Begin teardown. Idempotent.
    ///
    /// The registry is emptied before the token fires, so connections closing
    /// because of shutdown do not broadcast leave notices to each other.
    pub fn shutdown(&self) {
        if self.shutdown.is_cancelled() {
            return;
        }
        let peers = self.registry.drain();
        for peer in &peers {
            peer.mark_closing();
        }
        info!(connections = peers.len(), "relay shutting down");
        self.shutdown.cancel();
    }

    /// Wait for connection tasks to finish, up to the shutdown grace period.
    ///
    /// Returns `false` if the grace period ran out first.
    pub async fn wait_for_tasks(&self) -> bool {
        self.tasks.close();
        let grace = self.config.timeouts.shutdown_grace;
        if tokio::time::timeout(grace, self.tasks.wait()).await.is_err() {
            warn!(
                remaining = self.tasks.len(),
                grace_secs = grace.as_secs(),
                "shutdown grace period elapsed with tasks still running"
            );
            return false;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relay::Peer;

    #[test]
    fn test_shutdown_drains_and_cancels() {
        let ctx = RelayContext::new(RelayConfig::default());
        let (peer, _rx) = Peer::new(ctx.registry().next_id());
        ctx.relay().on_connect(Arc::clone(&peer));
        let token = ctx.token();

        assert!(!ctx.is_shutting_down());
        ctx.shutdown();

        assert!(token.is_cancelled());
        assert!(ctx.registry().is_empty());
        assert!(!peer.is_open());
        // A second call is harmless.
        ctx.shutdown();
    }

    #[tokio::test]
    async fn test_wait_for_tasks_completes() {
        let ctx = RelayContext::new(RelayConfig::default());
        let token = ctx.token();
        ctx.tasks().spawn(async move { token.cancelled().await });

        ctx.shutdown();
        assert!(ctx.wait_for_tasks().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_tasks_gives_up_after_grace() {
        let ctx = RelayContext::new(RelayConfig::default());
        ctx.tasks().spawn(std::future::pending::<()>());

        ctx.shutdown();
        assert!(!ctx.wait_for_tasks().await);
    }
}
