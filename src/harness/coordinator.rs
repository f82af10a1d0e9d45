//! Runs every simulated client and gathers their metrics.

use std::sync::Arc;

use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::error::{Error, Result};
use crate::harness::barrier::CountdownBarrier;
use crate::harness::client::{LoadTestClient, client_id};
use crate::harness::config::HarnessConfig;
use crate::harness::metrics::{ClientMetrics, RunReport};

/// Owns one load-test run against a relay.
#[derive(Debug, Clone)]
pub struct LoadTestCoordinator {
    config: Arc<HarnessConfig>,
}

impl LoadTestCoordinator {
    #[must_use]
    pub fn new(config: HarnessConfig) -> Self {
        Self {
            config: Arc::new(config),
        }
    }

    #[must_use]
    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    /// Spawn all clients, hold them at the connection barrier until everyone
    /// is connected, then collect their metrics.
    ///
    /// # Errors
    ///
    /// `Error::Timeout` naming how many clients completed if the deadline
    /// passes first. The first client error ends the run early and is
    /// returned as is.
    pub async fn run(&self) -> Result<RunReport> {
        let n = self.config.num_clients;
        if n == 1 {
            warn!("a single client never receives broadcasts from others; the run will end at the deadline");
        }

        let connected = Arc::new(CountdownBarrier::new(n));
        let completed = Arc::new(CountdownBarrier::new(n));
        let cancel = CancellationToken::new();

        let mut clients: JoinSet<Result<ClientMetrics>> = JoinSet::new();
        for i in 0..n {
            let client = LoadTestClient::new(client_id(i), Arc::clone(&self.config));
            clients.spawn(client.run(
                Arc::clone(&connected),
                Arc::clone(&completed),
                cancel.clone(),
            ));
        }
        info!(
            clients = n,
            messages_per_client = self.config.messages_per_client,
            relay = %self.config.relay_addr(),
            "load test started"
        );

        let deadline = tokio::time::sleep(self.config.deadline);
        tokio::pin!(deadline);

        let mut report = RunReport::new();
        loop {
            tokio::select! {
                () = &mut deadline => {
                    cancel.cancel();
                    clients.shutdown().await;
                    return Err(Error::Timeout(format!(
                        "{} of {n} clients completed within {:?}",
                        completed.arrived(),
                        self.config.deadline
                    )));
                }
                joined = clients.join_next() => match joined {
                    None => break,
                    Some(Ok(Ok(metrics))) => report.insert(metrics),
                    Some(Ok(Err(e))) => {
                        error!(error = %e, "client failed, stopping run");
                        cancel.cancel();
                        clients.shutdown().await;
                        return Err(e);
                    }
                    Some(Err(e)) => {
                        cancel.cancel();
                        clients.shutdown().await;
                        return Err(join_failure(e));
                    }
                },
            }
        }

        info!(clients = report.len(), "load test finished");
        Ok(report)
    }
}

/// A client that panicked takes the run down with the same panic.
fn join_failure(e: JoinError) -> Error {
    match e.try_into_panic() {
        Ok(payload) => std::panic::resume_unwind(payload),
        Err(e) => Error::TaskAborted(format!("client task: {e}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::panic::{AssertUnwindSafe, catch_unwind};
    use std::time::Duration;

    #[tokio::test]
    async fn test_client_panic_is_reraised() {
        let err = tokio::spawn(async { panic!("client bug") }).await.unwrap_err();
        let reraised = catch_unwind(AssertUnwindSafe(|| join_failure(err))).unwrap_err();
        assert_eq!(reraised.downcast_ref::<&str>(), Some(&"client bug"));
    }

    #[tokio::test]
    async fn test_cancelled_client_is_aborted() {
        let handle = tokio::spawn(std::future::pending::<()>());
        handle.abort();
        let err = handle.await.unwrap_err();
        assert!(matches!(join_failure(err), Error::TaskAborted(_)));
    }

    #[tokio::test]
    async fn test_unreachable_relay_fails() {
        // Bind then drop to get a port nobody listens on.
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let config = HarnessConfig::default()
            .with_clients(2, 1)
            .with_port(port)
            .with_deadline(Duration::from_secs(5));
        let err = LoadTestCoordinator::new(config).run().await.unwrap_err();
        assert!(matches!(err, Error::Io(_)), "unexpected error: {err:?}");
    }
}
