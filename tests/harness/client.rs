//! WebSocket and plain HTTP clients for the relay.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use wsrelay::config::Limits;
use wsrelay::message::Message;
use wsrelay::transport::{CloseFrame, WebSocket, WsMessage, connect};

const RECV_TIMEOUT: Duration = Duration::from_secs(5);

pub struct TestClient {
    socket: WebSocket<TcpStream>,
    pub name: String,
}

impl TestClient {
    pub async fn connect(addr: SocketAddr) -> wsrelay::Result<Self> {
        Self::connect_as(addr, "tester").await
    }

    pub async fn connect_as(addr: SocketAddr, name: &str) -> wsrelay::Result<Self> {
        Self::connect_path(addr, "/ws", name).await
    }

    pub async fn connect_path(addr: SocketAddr, path: &str, name: &str) -> wsrelay::Result<Self> {
        let socket = connect(&addr.to_string(), path, Limits::default()).await?;
        Ok(Self {
            socket,
            name: name.to_string(),
        })
    }

    pub async fn send_text(&mut self, text: &str) -> wsrelay::Result<()> {
        self.socket.send(WsMessage::text(text)).await
    }

    /// Send a chat message from this client and return it.
    pub async fn say(&mut self, content: &str) -> Message {
        let message = Message::user(&self.name, content);
        self.send_text(&message.encode()).await.unwrap();
        message
    }

    /// Next text payload, or `None` once the relay closes.
    pub async fn recv_text(&mut self) -> wsrelay::Result<Option<String>> {
        match self.recv_raw().await? {
            WsMessage::Text(text) => Ok(Some(text)),
            WsMessage::Close(_) => Ok(None),
            other => panic!("unexpected message: {other:?}"),
        }
    }

    /// Next decoded chat message; panics if nothing arrives in time.
    pub async fn recv_message(&mut self) -> Message {
        let text = tokio::time::timeout(RECV_TIMEOUT, self.recv_text())
            .await
            .expect("timed out waiting for a message")
            .unwrap()
            .expect("connection closed");
        Message::decode(text.as_bytes()).unwrap()
    }

    /// The close frame the relay sends, skipping data in between.
    pub async fn recv_close(&mut self) -> Option<CloseFrame> {
        tokio::time::timeout(RECV_TIMEOUT, async {
            loop {
                match self.socket.recv().await {
                    Ok(WsMessage::Close(frame)) => return frame,
                    Ok(_) => {}
                    Err(e) => panic!("no close frame: {e}"),
                }
            }
        })
        .await
        .expect("timed out waiting for close")
    }

    /// True if nothing arrives within `wait`.
    pub async fn is_silent_for(&mut self, wait: Duration) -> bool {
        tokio::time::timeout(wait, self.socket.recv()).await.is_err()
    }

    pub async fn close(&mut self) -> wsrelay::Result<()> {
        self.socket.close().await
    }

    async fn recv_raw(&mut self) -> wsrelay::Result<WsMessage> {
        self.socket.recv().await
    }
}

/// Send a raw HTTP request and read the response until the relay closes.
pub async fn http_request(addr: SocketAddr, request: &str) -> String {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(request.as_bytes()).await.unwrap();
    let mut response = Vec::new();
    tokio::time::timeout(RECV_TIMEOUT, stream.read_to_end(&mut response))
        .await
        .expect("timed out reading response")
        .unwrap();
    String::from_utf8_lossy(&response).into_owned()
}
