//! Reassembled WebSocket messages and close status codes.

use crate::error::{Error, Result};

/// Close status code (RFC 6455 Section 7.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[non_exhaustive]
pub enum CloseCode {
    /// 1000
    #[default]
    Normal,
    /// 1001, sent by the relay while shutting down.
    GoingAway,
    /// 1002
    ProtocolError,
    /// 1003
    UnsupportedData,
    /// 1007
    InvalidPayload,
    /// 1008
    PolicyViolation,
    /// 1009
    MessageTooBig,
    /// 1011
    InternalError,
    /// Registered (1012-1014) or application (3000-4999) codes.
    Other(u16),
}

impl CloseCode {
    #[must_use]
    pub const fn from_u16(code: u16) -> Self {
        match code {
            1000 => CloseCode::Normal,
            1001 => CloseCode::GoingAway,
            1002 => CloseCode::ProtocolError,
            1003 => CloseCode::UnsupportedData,
            1007 => CloseCode::InvalidPayload,
            1008 => CloseCode::PolicyViolation,
            1009 => CloseCode::MessageTooBig,
            1011 => CloseCode::InternalError,
            other => CloseCode::Other(other),
        }
    }

    #[must_use]
    pub const fn as_u16(&self) -> u16 {
        match self {
            CloseCode::Normal => 1000,
            CloseCode::GoingAway => 1001,
            CloseCode::ProtocolError => 1002,
            CloseCode::UnsupportedData => 1003,
            CloseCode::InvalidPayload => 1007,
            CloseCode::PolicyViolation => 1008,
            CloseCode::MessageTooBig => 1009,
            CloseCode::InternalError => 1011,
            CloseCode::Other(code) => *code,
        }
    }

    /// Whether the code may appear on the wire. 1004-1006 and 1015 never may.
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        matches!(self.as_u16(), 1000..=1003 | 1007..=1014 | 3000..=4999)
    }

    /// Pick the close code matching a protocol error.
    #[must_use]
    pub fn for_error(err: &Error) -> Self {
        match err {
            Error::InvalidUtf8 => CloseCode::InvalidPayload,
            Error::FrameTooLarge { .. }
            | Error::MessageTooLarge { .. }
            | Error::TooManyFragments { .. } => CloseCode::MessageTooBig,
            Error::Io(_) => CloseCode::InternalError,
            _ => CloseCode::ProtocolError,
        }
    }
}

/// Status code and reason carried by a Close frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseFrame {
    pub code: CloseCode,
    pub reason: String,
}

impl CloseFrame {
    #[must_use]
    pub fn new(code: CloseCode, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: reason.into(),
        }
    }

    /// Decode a Close frame payload.
    ///
    /// An empty payload means the peer sent no status.
    ///
    /// # Errors
    ///
    /// - `Error::ProtocolViolation` for a one-byte payload
    /// - `Error::InvalidCloseCode` for codes that must not be sent
    /// - `Error::InvalidUtf8` if the reason is not UTF-8
    pub fn parse(payload: &[u8]) -> Result<Option<Self>> {
        match payload.len() {
            0 => Ok(None),
            1 => Err(Error::ProtocolViolation(
                "close payload of one byte".to_string(),
            )),
            _ => {
                let raw = u16::from_be_bytes([payload[0], payload[1]]);
                let code = CloseCode::from_u16(raw);
                if !code.is_valid() {
                    return Err(Error::InvalidCloseCode(raw));
                }
                let reason = std::str::from_utf8(&payload[2..])?;
                Ok(Some(Self::new(code, reason)))
            }
        }
    }
}

/// A complete message as seen by applications.
///
/// Named `WsMessage` to keep it apart from the chat-level
/// [`Message`](crate::message::Message) it usually carries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WsMessage {
    Text(String),
    Binary(Vec<u8>),
    Ping(Vec<u8>),
    Pong(Vec<u8>),
    Close(Option<CloseFrame>),
}

impl WsMessage {
    #[must_use]
    pub fn text(s: impl Into<String>) -> Self {
        WsMessage::Text(s.into())
    }

    #[must_use]
    pub fn binary(data: impl Into<Vec<u8>>) -> Self {
        WsMessage::Binary(data.into())
    }

    #[must_use]
    pub fn close(code: CloseCode, reason: impl Into<String>) -> Self {
        WsMessage::Close(Some(CloseFrame::new(code, reason)))
    }

    #[must_use]
    pub const fn is_data(&self) -> bool {
        matches!(self, WsMessage::Text(_) | WsMessage::Binary(_))
    }

    #[must_use]
    pub const fn is_close(&self) -> bool {
        matches!(self, WsMessage::Close(_))
    }

    /// Payload bytes of a data message.
    #[must_use]
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            WsMessage::Text(s) => Some(s.as_bytes()),
            WsMessage::Binary(b) => Some(b),
            _ => None,
        }
    }

    #[must_use]
    pub fn into_text(self) -> Option<String> {
        match self {
            WsMessage::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl From<String> for WsMessage {
    fn from(s: String) -> Self {
        WsMessage::Text(s)
    }
}

impl From<&str> for WsMessage {
    fn from(s: &str) -> Self {
        WsMessage::Text(s.to_owned())
    }
}

impl From<Vec<u8>> for WsMessage {
    fn from(data: Vec<u8>) -> Self {
        WsMessage::Binary(data)
    }
}
