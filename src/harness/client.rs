//! One simulated chat participant.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::error::{Error, Result};
use crate::harness::barrier::CountdownBarrier;
use crate::harness::config::HarnessConfig;
use crate::harness::metrics::{ClientMetrics, Timing};
use crate::message::{Message, MessageKind, now_millis};
use crate::transport::{CloseCode, CloseFrame, MessageReader, MessageWriter, WsMessage, connect};

/// How long a finished client waits for the relay to answer its Close.
const CLOSE_GRACE: Duration = Duration::from_secs(1);

/// Lifecycle of a simulated client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    Connecting,
    /// Connected, held at the connection barrier.
    Waiting,
    /// Sending its quota and sampling broadcasts.
    Active,
    Completed,
}

/// `Client_1`, `Client_2`, ... for zero-based index `i`.
#[must_use]
pub fn client_id(index: usize) -> String {
    format!("Client_{}", index + 1)
}

#[derive(Debug)]
pub struct LoadTestClient {
    id: String,
    config: Arc<HarnessConfig>,
    state: ClientState,
    timings: Vec<Timing>,
}

impl LoadTestClient {
    #[must_use]
    pub fn new(id: impl Into<String>, config: Arc<HarnessConfig>) -> Self {
        Self {
            id: id.into(),
            config,
            state: ClientState::Connecting,
            timings: Vec::new(),
        }
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[must_use]
    pub fn state(&self) -> ClientState {
        self.state
    }

    #[must_use]
    pub fn timings(&self) -> &[Timing] {
        &self.timings
    }

    /// Take a latency sample from a received payload at `now` (epoch ms).
    ///
    /// Only `message` kinds from other participants count. Join and leave
    /// notices are skipped silently, malformed payloads with a warning.
    pub fn record(&mut self, payload: &[u8], now: i64) -> bool {
        let message = match Message::decode(payload) {
            Ok(message) => message,
            Err(e) => {
                warn!(client = %self.id, error = %e, "skipping malformed broadcast");
                return false;
            }
        };
        if message.kind != MessageKind::Message || message.sender == self.id {
            return false;
        }

        let elapsed = u64::try_from(now.saturating_sub(message.iat)).unwrap_or(0);
        trace!(client = %self.id, from = %message.sender, elapsed, "sample");
        self.timings.push(Timing {
            message_id: message.id,
            time: elapsed,
            client_id: message.sender,
        });
        true
    }

    /// Drive the client through its whole lifecycle.
    ///
    /// # Errors
    ///
    /// `Error::Timeout` if the connect does not finish in time or the run is
    /// cancelled, otherwise any transport error seen on the connection.
    pub async fn run(
        mut self,
        connected: Arc<CountdownBarrier>,
        completed: Arc<CountdownBarrier>,
        cancel: CancellationToken,
    ) -> Result<ClientMetrics> {
        let addr = self.config.relay_addr();
        let limit = self.config.connect_timeout;
        let socket = tokio::select! {
            res = tokio::time::timeout(limit, connect(&addr, &self.config.ws_path, self.config.limits.clone())) => {
                res.map_err(|_| Error::Timeout(format!("{} could not connect to {addr} within {limit:?}", self.id)))??
            }
            () = cancel.cancelled() => return Err(self.cancelled()),
        };
        debug!(client = %self.id, "connected");

        self.state = ClientState::Waiting;
        if connected.arrive() {
            info!(clients = connected.target(), "all clients connected, starting traffic");
        }
        tokio::select! {
            () = connected.wait() => {}
            () = cancel.cancelled() => return Err(self.cancelled()),
        }

        self.state = ClientState::Active;
        let (mut reader, mut writer) = socket.split();
        let sender = self.id.clone();
        let quota = self.config.messages_per_client;
        let (received, sent) = tokio::join!(
            self.receive(&mut reader, &cancel),
            send_burst(&mut writer, &sender, quota, &cancel),
        );
        sent?;
        received?;

        writer
            .close(Some(CloseFrame::new(CloseCode::Normal, "")))
            .await?;
        // Wait briefly for the relay's Close so the connection ends cleanly.
        let _ = tokio::time::timeout(CLOSE_GRACE, drain(&mut reader)).await;
        if let Err(e) = writer.shutdown().await {
            debug!(client = %self.id, error = %e, "shutdown after close failed");
        }

        self.state = ClientState::Completed;
        debug!(client = %self.id, samples = self.timings.len(), "completed");
        if completed.arrive() {
            info!(clients = completed.target(), "all clients completed");
        }
        Ok(ClientMetrics::from_timings(self.id, self.timings))
    }

    async fn receive<R: AsyncRead + Unpin>(
        &mut self,
        reader: &mut MessageReader<R>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let quota = self.config.messages_per_client;
        while self.timings.len() < quota {
            let message = tokio::select! {
                message = reader.next_message() => message?,
                () = cancel.cancelled() => return Err(self.cancelled()),
            };
            match message {
                WsMessage::Text(text) => {
                    self.record(text.as_bytes(), now_millis());
                }
                WsMessage::Binary(data) => {
                    self.record(&data, now_millis());
                }
                WsMessage::Close(frame) => {
                    return Err(Error::ConnectionClosed(frame.map(|f| f.code.as_u16())));
                }
                WsMessage::Ping(_) | WsMessage::Pong(_) => {}
            }
        }
        Ok(())
    }

    fn cancelled(&self) -> Error {
        Error::Timeout(format!("{} cancelled in state {:?}", self.id, self.state))
    }
}

async fn send_burst<W: AsyncWrite + Unpin>(
    writer: &mut MessageWriter<W>,
    sender: &str,
    quota: usize,
    cancel: &CancellationToken,
) -> Result<()> {
    for j in 0..quota {
        let text = Message::user(sender, &format!("Message {} from {sender}", j + 1)).encode();
        tokio::select! {
            res = writer.send_text(&text) => res?,
            () = cancel.cancelled() => {
                return Err(Error::Timeout(format!("{sender} cancelled after sending {j} messages")));
            }
        }
    }
    Ok(())
}

/// Read until the peer's Close or the end of the stream.
async fn drain<R: AsyncRead + Unpin>(reader: &mut MessageReader<R>) {
    while let Ok(message) = reader.next_message().await {
        if message.is_close() {
            break;
        }
    }
}
