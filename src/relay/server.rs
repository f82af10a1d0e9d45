//! TCP accept loop, HTTP routing and per-connection WebSocket tasks.
//!
//! Each accepted stream is served as HTTP/1.1 by hyper with an axum router
//! behind it. The WebSocket path answers upgrades with 101 and hands the
//! upgraded stream to a reader loop plus a writer task fed by the peer's
//! queue. Upgrade requests for any other path lose their stream without a
//! response; remaining requests go to the static file routes.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum::extract::{ConnectInfo, Request, State};
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use bytes::BytesMut;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::{Service as _, service_fn};
use hyper_util::rt::{TokioIo, TokioTimer};
use hyper_util::service::TowerToHyperService;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tracing::{debug, error, info, trace, warn};

use crate::context::RelayContext;
use crate::error::{Error, Result};
use crate::relay::registry::{ConnectionId, Outbound, Peer};
use crate::relay::static_files;
use crate::transport::{
    CloseCode, CloseFrame, HandshakeRequest, HandshakeResponse, MessageWriter, RequestHead, Role,
    WebSocket, WsMessage,
};

/// Close reason sent to every connection during teardown.
pub const SHUTDOWN_REASON: &str = "server shutting down";

/// hyper refuses read buffers smaller than this.
const MIN_HTTP_BUFFER: usize = 8192;

/// Bound listener plus the context it serves.
pub struct RelayServer {
    context: Arc<RelayContext>,
    listener: TcpListener,
    router: Router,
}

impl RelayServer {
    /// Bind the configured address.
    ///
    /// # Errors
    ///
    /// - `Error::Config` if the WebSocket path is not an absolute path other than `/`
    /// - `Error::Io` if the address cannot be bound
    pub async fn bind(context: Arc<RelayContext>) -> Result<Self> {
        let router = router(&context)?;
        let listener = TcpListener::bind(context.config().listen_addr()).await?;
        Ok(Self {
            context,
            listener,
            router,
        })
    }

    /// # Errors
    ///
    /// Returns `Error::Io` if the socket address is unavailable.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    #[must_use]
    pub fn context(&self) -> &Arc<RelayContext> {
        &self.context
    }

    /// Accept connections until the context shuts down, then wait for the
    /// connection tasks to finish (bounded by the shutdown grace period).
    ///
    /// # Errors
    ///
    /// Accept failures are logged and do not end the loop; this currently
    /// always returns `Ok` once shutdown completes.
    pub async fn run(self) -> Result<()> {
        let token = self.context.token();
        info!(
            address = %self.local_addr()?,
            ws_path = %self.context.config().ws_path,
            "relay listening"
        );

        loop {
            tokio::select! {
                biased;
                () = token.cancelled() => break,
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, addr)) => {
                        trace!(peer = %addr, "accepted");
                        let context = Arc::clone(&self.context);
                        let router = self.router.clone();
                        self.context.tasks().spawn(async move {
                            if let Err(e) = serve_http(context, router, stream, addr).await {
                                debug!(peer = %addr, error = %e, "connection ended with error");
                            }
                        });
                    }
                    Err(e) => error!(error = %e, "failed to accept connection"),
                },
            }
        }

        drop(self.listener);
        self.context.shutdown();
        let clean = self.context.wait_for_tasks().await;
        info!(clean, "relay stopped");
        Ok(())
    }
}

fn router(context: &Arc<RelayContext>) -> Result<Router> {
    let config = context.config();
    if !config.ws_path.starts_with('/') || config.ws_path == "/" {
        return Err(Error::Config(format!(
            "ws_path must be an absolute path other than /, got '{}'",
            config.ws_path
        )));
    }
    Ok(Router::new()
        .route(&config.ws_path, get(upgrade))
        .with_state(Arc::clone(context))
        .merge(static_files::routes(&config.static_root, &config.index_file)))
}

fn request_head<B>(request: &axum::http::Request<B>) -> Result<RequestHead> {
    let headers = request
        .headers()
        .iter()
        .filter_map(|(name, value)| Some((name.as_str(), value.to_str().ok()?)));
    RequestHead::from_parts(request.method().as_str(), request.uri().path(), headers)
}

/// Serve HTTP/1.1 on one stream until it closes, upgrades, or the relay shuts down.
async fn serve_http(context: Arc<RelayContext>, router: Router, stream: TcpStream, addr: SocketAddr) -> Result<()> {
    stream.set_nodelay(true)?;
    let config = context.config();
    let ws_path = config.ws_path.clone();
    let routes = TowerToHyperService::new(router);

    let service = service_fn(move |mut request: hyper::Request<Incoming>| {
        request.extensions_mut().insert(ConnectInfo(addr));
        let stray_upgrade = request.uri().path() != ws_path
            && request_head(&request).is_ok_and(|head| head.is_websocket_upgrade());
        let routed = if stray_upgrade {
            Err(Error::InvalidHandshake(format!(
                "upgrade on unknown path {}",
                request.uri().path()
            )))
        } else {
            Ok(routes.call(request))
        };
        async move {
            match routed {
                Ok(response) => response.await.map_err(|never: Infallible| match never {}),
                // An error from the service makes hyper drop the stream unanswered.
                Err(e) => Err(e),
            }
        }
    });

    let mut builder = http1::Builder::new();
    builder
        .timer(TokioTimer::new())
        .header_read_timeout(config.timeouts.handshake)
        .max_buf_size(config.limits.max_handshake_size.max(MIN_HTTP_BUFFER));
    let connection = builder
        .serve_connection(TokioIo::new(stream), service)
        .with_upgrades();
    tokio::pin!(connection);

    let token = context.token();
    let result = tokio::select! {
        result = connection.as_mut() => result,
        () = token.cancelled() => {
            connection.as_mut().graceful_shutdown();
            connection.await
        }
    };
    result.map_err(|e| Error::Io(e.to_string()))
}

/// Answer a valid upgrade with 101 and run the session once hyper hands the
/// stream over.
async fn upgrade(
    State(context): State<Arc<RelayContext>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    mut request: Request,
) -> Result<Response> {
    let handshake = HandshakeRequest::from_head(&request_head(&request)?)?;
    let accept = HandshakeResponse::from_request(&handshake).accept;
    let accept = HeaderValue::from_str(&accept).map_err(|e| Error::InvalidHandshake(e.to_string()))?;

    let id = context.registry().next_id();
    let (peer, queue) = Peer::new(id);

    // Registered before the 101 is written: once a client sees the upgrade it
    // already receives broadcasts. Anything queued meanwhile follows the 101.
    let accepting = !context.is_shutting_down();
    if accepting {
        context.relay().on_connect(Arc::clone(&peer));
    }

    let on_upgrade = hyper::upgrade::on(&mut request);
    let session = Arc::clone(&context);
    context.tasks().spawn(async move {
        match on_upgrade.await {
            Ok(upgraded) => {
                serve_websocket(session, TokioIo::new(upgraded), peer, queue, addr, accepting).await;
            }
            Err(e) => {
                if accepting {
                    session.relay().on_close(id);
                }
                debug!(conn = %id, peer = %addr, error = %e, "upgrade failed");
            }
        }
    });

    let headers = [
        (header::UPGRADE, HeaderValue::from_static("websocket")),
        (header::CONNECTION, HeaderValue::from_static("Upgrade")),
        (header::SEC_WEBSOCKET_ACCEPT, accept),
    ];
    Ok((StatusCode::SWITCHING_PROTOCOLS, headers).into_response())
}

/// Drain the peer's queue onto the socket until a Close is written or every
/// sender is gone.
async fn write_loop<W>(mut writer: MessageWriter<W>, mut queue: mpsc::UnboundedReceiver<Outbound>, id: ConnectionId)
where
    W: AsyncWrite + Unpin,
{
    while let Some(item) = queue.recv().await {
        let result = match item {
            Outbound::Text(text) => writer.send_text(&text).await,
            Outbound::Pong(data) => writer.send(WsMessage::Pong(data)).await,
            Outbound::Close(frame) => {
                if let Err(e) = writer.close(Some(frame)).await {
                    debug!(conn = %id, error = %e, "failed to send close");
                }
                break;
            }
        };
        if let Err(e) = result {
            debug!(conn = %id, error = %e, "write failed; stopping writer");
            break;
        }
    }
    // Dropping the receiver here marks the peer as not open.
    drop(queue);
    if let Err(e) = writer.shutdown().await {
        trace!(conn = %id, error = %e, "shutdown after close");
    }
}

fn queue_close(peer: &Peer, code: CloseCode, reason: &str) {
    if let Err(e) = peer.send(Outbound::Close(CloseFrame::new(code, reason))) {
        trace!(conn = %peer.id(), error = %e, "writer already gone");
    }
}

async fn serve_websocket<S>(
    context: Arc<RelayContext>,
    stream: S,
    peer: Arc<Peer>,
    queue: mpsc::UnboundedReceiver<Outbound>,
    addr: SocketAddr,
    accepting: bool,
) where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let token = context.token();
    let relay = context.relay();
    let id = peer.id();

    let ws = WebSocket::from_upgraded(stream, Role::Server, context.config().limits.clone(), BytesMut::new());
    let (mut reader, writer) = ws.split();
    let writer_task = tokio::spawn(write_loop(writer, queue, id));

    if accepting {
        debug!(conn = %id, peer = %addr, "websocket open");

        loop {
            let next = tokio::select! {
                biased;
                () = token.cancelled() => {
                    queue_close(&peer, CloseCode::GoingAway, SHUTDOWN_REASON);
                    break;
                }
                next = reader.next_message() => next,
            };

            match next {
                Ok(WsMessage::Text(text)) => {
                    if let Err(e) = relay.on_receive(id, text.as_bytes()) {
                        warn!(conn = %id, error = %e, "dropping malformed message");
                    }
                }
                Ok(WsMessage::Binary(data)) => {
                    if let Err(e) = relay.on_receive(id, &data) {
                        warn!(conn = %id, error = %e, "dropping malformed message");
                    }
                }
                Ok(WsMessage::Ping(data)) => {
                    if peer.send(Outbound::Pong(data)).is_err() {
                        break;
                    }
                }
                Ok(WsMessage::Pong(_)) => {}
                Ok(WsMessage::Close(frame)) => {
                    let code = frame.map_or(CloseCode::Normal, |f| f.code);
                    trace!(conn = %id, code = code.as_u16(), "close received");
                    queue_close(&peer, code, "");
                    break;
                }
                Err(Error::ConnectionClosed(_)) => {
                    trace!(conn = %id, "stream ended without close");
                    break;
                }
                Err(e) => {
                    warn!(conn = %id, error = %e, "protocol error; closing connection");
                    queue_close(&peer, CloseCode::for_error(&e), "");
                    break;
                }
            }
        }

        relay.on_close(id);
    } else {
        queue_close(&peer, CloseCode::GoingAway, SHUTDOWN_REASON);
    }

    peer.mark_closing();
    drop(peer);

    let grace = context.config().timeouts.shutdown_grace;
    if tokio::time::timeout(grace, writer_task).await.is_err() {
        debug!(conn = %id, "writer did not finish within grace period");
    }
    debug!(conn = %id, "websocket closed");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RelayConfig;

    #[test]
    fn test_ws_path_must_be_absolute() {
        for path in ["/", "ws", ""] {
            let config = RelayConfig {
                ws_path: path.into(),
                ..RelayConfig::default()
            };
            let built = router(&RelayContext::new(config));
            assert!(matches!(built, Err(Error::Config(_))), "{path}");
        }
        assert!(router(&RelayContext::new(RelayConfig::default())).is_ok());
    }
}
