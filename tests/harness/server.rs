//! Relay instances on random ports.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;
use tokio::task::JoinHandle;

use wsrelay::config::{RelayConfig, Timeouts};
use wsrelay::context::RelayContext;
use wsrelay::relay::RelayServer;

/// Body of `index.html` in every test static root.
pub const INDEX_BODY: &str = "<!DOCTYPE html><title>chat</title>";

pub struct TestRelay {
    context: Arc<RelayContext>,
    handle: JoinHandle<wsrelay::Result<()>>,
    _static_root: TempDir,
}

impl TestRelay {
    pub async fn spawn() -> (Self, SocketAddr) {
        Self::spawn_with(|config| config).await
    }

    /// Spawn with a config derived from the test defaults.
    pub async fn spawn_with(customize: impl FnOnce(RelayConfig) -> RelayConfig) -> (Self, SocketAddr) {
        let static_root = tempfile::tempdir().unwrap();
        std::fs::write(static_root.path().join("index.html"), INDEX_BODY).unwrap();
        std::fs::write(static_root.path().join("app.js"), "console.log('hi');").unwrap();

        let config = RelayConfig::default()
            .with_port(0)
            .with_static_root(static_root.path())
            .with_timeouts(Timeouts {
                handshake: Duration::from_secs(2),
                shutdown_grace: Duration::from_secs(2),
            });
        let context = RelayContext::new(customize(config));
        let server = RelayServer::bind(Arc::clone(&context)).await.unwrap();
        let addr = server.local_addr().unwrap();
        let handle = tokio::spawn(server.run());

        (
            Self {
                context,
                handle,
                _static_root: static_root,
            },
            addr,
        )
    }

    pub fn context(&self) -> &Arc<RelayContext> {
        &self.context
    }

    /// Number of registered participants.
    pub fn connections(&self) -> usize {
        self.context.registry().len()
    }

    /// Poll until `count` participants are registered.
    pub async fn wait_for_connections(&self, count: usize) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while self.connections() != count {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap_or_else(|_| panic!("expected {count} connections, have {}", self.connections()));
    }

    pub async fn shutdown(self) {
        self.context.shutdown();
        self.handle.await.unwrap().unwrap();
    }
}
