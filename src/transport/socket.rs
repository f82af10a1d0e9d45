//! Message-level WebSocket endpoint.
//!
//! A [`WebSocket`] owns both directions of an upgraded stream. It can be used
//! directly or split into a [`MessageReader`] and [`MessageWriter`] that live
//! on different tasks.

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::net::TcpStream;
use tracing::debug;

use crate::config::Limits;
use crate::error::{Error, Result};
use crate::transport::codec::{FrameReader, FrameWriter};
use crate::transport::frame::Frame;
use crate::transport::handshake::{
    HandshakeRequest, HandshakeResponse, generate_key, read_http_head,
};
use crate::transport::message::{CloseCode, CloseFrame, WsMessage};
use crate::transport::opcode::OpCode;
use crate::transport::role::Role;
use crate::transport::state::SocketState;

/// Reassembles frames into messages.
pub struct MessageReader<R> {
    frames: FrameReader<R>,
    fragments: Option<(OpCode, Vec<u8>)>,
    fragment_count: usize,
}

impl<R> MessageReader<R> {
    #[must_use]
    pub fn new(frames: FrameReader<R>) -> Self {
        Self {
            frames,
            fragments: None,
            fragment_count: 0,
        }
    }

    fn finish(opcode: OpCode, payload: Vec<u8>) -> Result<WsMessage> {
        match opcode {
            OpCode::Text => String::from_utf8(payload)
                .map(WsMessage::Text)
                .map_err(|_| Error::InvalidUtf8),
            _ => Ok(WsMessage::Binary(payload)),
        }
    }
}

impl<R: AsyncRead + Unpin> MessageReader<R> {
    /// Next complete message. Control frames are returned as they arrive,
    /// even in the middle of a fragmented message.
    ///
    /// # Errors
    ///
    /// - `Error::ConnectionClosed(None)` when the stream ends
    /// - `Error::ProtocolViolation` for out-of-order continuation frames
    /// - `Error::MessageTooLarge` / `Error::TooManyFragments` past the limits
    /// - `Error::InvalidUtf8` for a text message that is not UTF-8
    pub async fn next_message(&mut self) -> Result<WsMessage> {
        loop {
            let frame = self.frames.read_frame().await?;
            let opcode = frame.opcode;
            let fin = frame.fin;

            match opcode {
                OpCode::Ping => return Ok(WsMessage::Ping(frame.into_payload())),
                OpCode::Pong => return Ok(WsMessage::Pong(frame.into_payload())),
                OpCode::Close => {
                    return Ok(WsMessage::Close(CloseFrame::parse(frame.payload())?));
                }
                OpCode::Text | OpCode::Binary => {
                    if self.fragments.is_some() {
                        return Err(Error::ProtocolViolation(
                            "new data frame inside a fragmented message".into(),
                        ));
                    }
                    let payload = frame.into_payload();
                    self.frames.limits().check_message_size(payload.len())?;
                    if fin {
                        return Self::finish(opcode, payload);
                    }
                    self.fragment_count = 1;
                    self.fragments = Some((opcode, payload));
                }
                OpCode::Continuation => {
                    let Some((_, buffered)) = self.fragments.as_mut() else {
                        return Err(Error::ProtocolViolation(
                            "continuation frame without a message in progress".into(),
                        ));
                    };
                    self.fragment_count += 1;
                    self.frames.limits().check_fragment_count(self.fragment_count)?;
                    self.frames
                        .limits()
                        .check_message_size(buffered.len() + frame.payload().len())?;
                    buffered.extend_from_slice(frame.payload());

                    if fin {
                        self.fragment_count = 0;
                        if let Some((first, payload)) = self.fragments.take() {
                            return Self::finish(first, payload);
                        }
                    }
                }
            }
        }
    }
}

/// Sends messages and tracks the sending side of the close handshake.
pub struct MessageWriter<W> {
    frames: FrameWriter<W>,
    state: SocketState,
}

impl<W> MessageWriter<W> {
    #[must_use]
    pub fn new(frames: FrameWriter<W>) -> Self {
        Self {
            frames,
            state: SocketState::Open,
        }
    }

    #[must_use]
    pub fn state(&self) -> SocketState {
        self.state
    }
}

impl<W: AsyncWrite + Unpin> MessageWriter<W> {
    /// Send one message as a single frame.
    ///
    /// # Errors
    ///
    /// `Error::ConnectionClosed` once a Close has been sent, or `Error::Io`.
    pub async fn send(&mut self, message: WsMessage) -> Result<()> {
        if !self.state.can_send() {
            return Err(Error::ConnectionClosed(None));
        }
        let frame = match message {
            WsMessage::Text(text) => Frame::text(text),
            WsMessage::Binary(data) => Frame::binary(data),
            WsMessage::Ping(data) => Frame::ping(data),
            WsMessage::Pong(data) => Frame::pong(data),
            WsMessage::Close(close) => return self.close(close).await,
        };
        self.frames.write_frame(&frame).await
    }

    /// Send a text frame without building a [`WsMessage`].
    ///
    /// # Errors
    ///
    /// As [`MessageWriter::send`].
    pub async fn send_text(&mut self, text: &str) -> Result<()> {
        if !self.state.can_send() {
            return Err(Error::ConnectionClosed(None));
        }
        self.frames.write_frame(&Frame::text(text)).await
    }

    /// Send a Close frame; later calls are no-ops.
    ///
    /// # Errors
    ///
    /// Returns `Error::Io` if the frame cannot be written.
    pub async fn close(&mut self, close: Option<CloseFrame>) -> Result<()> {
        if !self.state.can_send() {
            return Ok(());
        }
        self.state = SocketState::Closing;
        let frame = match close {
            Some(c) => Frame::close(Some(c.code.as_u16()), &c.reason),
            None => Frame::close(None, ""),
        };
        self.frames.write_frame(&frame).await
    }

    /// Close the underlying write half.
    ///
    /// # Errors
    ///
    /// Returns `Error::Io` if the shutdown fails.
    pub async fn shutdown(&mut self) -> Result<()> {
        self.state = SocketState::Closed;
        self.frames.shutdown().await
    }
}

/// An open WebSocket over any async byte stream.
pub struct WebSocket<S> {
    reader: MessageReader<ReadHalf<S>>,
    writer: MessageWriter<WriteHalf<S>>,
    role: Role,
}

impl<S: AsyncRead + AsyncWrite> WebSocket<S> {
    /// Wrap a stream whose handshake is already complete.
    ///
    /// `leftover` holds any bytes read past the end of the handshake head.
    #[must_use]
    pub fn from_upgraded(stream: S, role: Role, limits: Limits, leftover: BytesMut) -> Self {
        let (rd, wr) = tokio::io::split(stream);
        Self {
            reader: MessageReader::new(FrameReader::with_buffered(rd, role, limits, leftover)),
            writer: MessageWriter::new(FrameWriter::new(wr, role)),
            role,
        }
    }

    #[must_use]
    pub fn role(&self) -> Role {
        self.role
    }

    #[must_use]
    pub fn state(&self) -> SocketState {
        self.writer.state()
    }

    /// Hand out both halves for use on separate tasks.
    #[must_use]
    pub fn split(self) -> (MessageReader<ReadHalf<S>>, MessageWriter<WriteHalf<S>>) {
        (self.reader, self.writer)
    }
}

impl<S: AsyncRead + AsyncWrite + Unpin> WebSocket<S> {
    /// Next data or close message. Pings are answered and pongs skipped.
    ///
    /// # Errors
    ///
    /// As [`MessageReader::next_message`], plus write errors for replies.
    pub async fn recv(&mut self) -> Result<WsMessage> {
        loop {
            match self.reader.next_message().await? {
                WsMessage::Ping(data) => self.writer.send(WsMessage::Pong(data)).await?,
                WsMessage::Pong(_) => {}
                WsMessage::Close(close) => {
                    let reply = close
                        .as_ref()
                        .map(|c| CloseFrame::new(c.code, ""));
                    self.writer.close(reply).await?;
                    return Ok(WsMessage::Close(close));
                }
                data => return Ok(data),
            }
        }
    }

    /// # Errors
    ///
    /// As [`MessageWriter::send`].
    pub async fn send(&mut self, message: WsMessage) -> Result<()> {
        self.writer.send(message).await
    }

    /// Start the close handshake with a normal closure.
    ///
    /// # Errors
    ///
    /// As [`MessageWriter::close`].
    pub async fn close(&mut self) -> Result<()> {
        self.writer
            .close(Some(CloseFrame::new(CloseCode::Normal, "")))
            .await
    }
}

/// Open a client WebSocket to `addr` (`host:port`) at `path`.
///
/// # Errors
///
/// - `Error::Io` if the TCP connection fails
/// - `Error::HandshakeTooLarge` if the response head exceeds the limit
/// - `Error::InvalidHandshake` if the server does not upgrade or the accept key is wrong
pub async fn connect(addr: &str, path: &str, limits: Limits) -> Result<WebSocket<TcpStream>> {
    let mut stream = TcpStream::connect(addr).await?;
    stream.set_nodelay(true)?;

    let request = HandshakeRequest {
        path: path.to_string(),
        host: addr.to_string(),
        key: generate_key()?,
        version: 13,
    };
    stream.write_all(&request.to_bytes()).await?;

    let (head, leftover) = read_http_head(&mut stream, &limits)
        .await
        .map_err(|e| match e {
            Error::ConnectionClosed(_) => {
                Error::InvalidHandshake("Connection closed during handshake".into())
            }
            other => other,
        })?;
    let response = HandshakeResponse::parse(&head)?;
    response.verify(&request.key)?;
    debug!(addr, path, "websocket connected");

    Ok(WebSocket::from_upgraded(stream, Role::Client, limits, leftover))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    fn pair() -> (WebSocket<tokio::io::DuplexStream>, WebSocket<tokio::io::DuplexStream>) {
        let (a, b) = duplex(4096);
        (
            WebSocket::from_upgraded(a, Role::Client, Limits::default(), BytesMut::new()),
            WebSocket::from_upgraded(b, Role::Server, Limits::default(), BytesMut::new()),
        )
    }

    async fn write_raw(writer: &mut FrameWriter<impl AsyncWrite + Unpin>, frame: Frame) {
        writer.write_frame(&frame).await.unwrap();
    }

    #[tokio::test]
    async fn test_text_both_directions() {
        let (mut client, mut server) = pair();

        client.send(WsMessage::text("ping?")).await.unwrap();
        assert_eq!(server.recv().await.unwrap(), WsMessage::text("ping?"));

        server.send(WsMessage::text("pong!")).await.unwrap();
        assert_eq!(client.recv().await.unwrap(), WsMessage::text("pong!"));
    }

    #[tokio::test]
    async fn test_fragmented_message_reassembled() {
        let (a, b) = duplex(4096);
        let mut raw = FrameWriter::new(a, Role::Client);
        let mut server = WebSocket::from_upgraded(b, Role::Server, Limits::default(), BytesMut::new());

        write_raw(&mut raw, Frame::new(false, OpCode::Text, b"Hel".to_vec())).await;
        write_raw(&mut raw, Frame::ping("mid")).await;
        write_raw(&mut raw, Frame::new(true, OpCode::Continuation, b"lo".to_vec())).await;

        assert_eq!(server.recv().await.unwrap(), WsMessage::text("Hello"));
    }

    #[tokio::test]
    async fn test_orphan_continuation_is_violation() {
        let (a, b) = duplex(4096);
        let mut raw = FrameWriter::new(a, Role::Client);
        let mut server = WebSocket::from_upgraded(b, Role::Server, Limits::default(), BytesMut::new());

        write_raw(&mut raw, Frame::new(true, OpCode::Continuation, b"x".to_vec())).await;
        assert!(matches!(server.recv().await, Err(Error::ProtocolViolation(_))));
    }

    #[tokio::test]
    async fn test_too_many_fragments() {
        let (a, b) = duplex(4096);
        let mut raw = FrameWriter::new(a, Role::Client);
        let limits = Limits::new(1024, 4096, 2, 1024);
        let mut server = WebSocket::from_upgraded(b, Role::Server, limits, BytesMut::new());

        write_raw(&mut raw, Frame::new(false, OpCode::Binary, vec![1])).await;
        write_raw(&mut raw, Frame::new(false, OpCode::Continuation, vec![2])).await;
        write_raw(&mut raw, Frame::new(true, OpCode::Continuation, vec![3])).await;
        assert_eq!(
            server.recv().await,
            Err(Error::TooManyFragments { count: 3, max: 2 })
        );
    }

    #[tokio::test]
    async fn test_invalid_utf8_text() {
        let (a, b) = duplex(4096);
        let mut raw = FrameWriter::new(a, Role::Client);
        let mut server = WebSocket::from_upgraded(b, Role::Server, Limits::default(), BytesMut::new());

        write_raw(&mut raw, Frame::text(vec![0xFF, 0xFE])).await;
        assert_eq!(server.recv().await, Err(Error::InvalidUtf8));
    }

    #[tokio::test]
    async fn test_ping_answered_by_recv() {
        let (mut client, mut server) = pair();
        let (mut client_rd, mut client_wr) = {
            client.send(WsMessage::Ping(b"hb".to_vec())).await.unwrap();
            client.split()
        };

        let serve = tokio::spawn(async move {
            // recv answers the ping, then returns the text.
            server.recv().await.unwrap()
        });
        assert_eq!(
            client_rd.next_message().await.unwrap(),
            WsMessage::Pong(b"hb".to_vec())
        );
        client_wr.send_text("after").await.unwrap();
        assert_eq!(serve.await.unwrap(), WsMessage::text("after"));
    }

    #[tokio::test]
    async fn test_close_handshake() {
        let (mut client, mut server) = pair();

        client.close().await.unwrap();
        assert_eq!(client.state(), SocketState::Closing);
        assert!(client.send(WsMessage::text("late")).await.is_err());

        let received = server.recv().await.unwrap();
        assert_eq!(
            received,
            WsMessage::Close(Some(CloseFrame::new(CloseCode::Normal, "")))
        );
        assert_eq!(server.state(), SocketState::Closing);

        // The echoed close reaches the client.
        assert!(client.recv().await.unwrap().is_close());
    }
}
