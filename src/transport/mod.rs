//! WebSocket transport (RFC 6455): framing, handshake and message endpoints.
//!
//! ## Layers
//!
//! 1. [`Frame`] - wire encoding of single frames
//! 2. [`FrameReader`] / [`FrameWriter`] - buffered frame I/O with limits
//! 3. [`MessageReader`] / [`MessageWriter`] - reassembled messages, close state
//! 4. [`WebSocket`] - both halves together, splittable
//!
//! ## Example
//!
//! ```rust,ignore
//! use wsrelay::config::Limits;
//! use wsrelay::transport::{connect, WsMessage};
//!
//! let mut ws = connect("127.0.0.1:8080", "/ws", Limits::default()).await?;
//! ws.send(WsMessage::text("hello")).await?;
//! let reply = ws.recv().await?;
//! ws.close().await?;
//! ```

pub mod codec;
pub mod frame;
pub mod handshake;
pub mod mask;
pub mod message;
pub mod opcode;
mod role;
pub mod socket;
mod state;

pub use codec::{FrameReader, FrameWriter};
pub use frame::{Frame, MAX_CONTROL_FRAME_PAYLOAD};
pub use handshake::{
    HandshakeRequest, HandshakeResponse, RequestHead, WS_GUID, compute_accept_key,
    find_head_end, generate_key, read_http_head,
};
pub use mask::apply_mask;
pub use message::{CloseCode, CloseFrame, WsMessage};
pub use opcode::OpCode;
pub use role::Role;
pub use socket::{MessageReader, MessageWriter, WebSocket, connect};
pub use state::SocketState;
