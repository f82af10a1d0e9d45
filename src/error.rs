//! Error types for the relay, its WebSocket transport and the load-test harness.
//!
//! Transport errors follow RFC 6455 requirements. The remaining variants
//! describe faults that stay contained at a connection boundary
//! (`MalformedPayload`, `TransportWrite`, `StaticAssetNotFound`) and faults
//! that end a harness run (`ResultsWrite`, `Timeout`, `ArgumentParse`,
//! `TaskAborted`).

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for relay and harness operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the relay, the transport or the harness.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum Error {
    /// Invalid frame structure or header.
    #[error("Invalid frame: {0}")]
    InvalidFrame(String),

    /// Protocol violation detected.
    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),

    /// Invalid UTF-8 in text frame.
    #[error("Invalid UTF-8 in text frame")]
    InvalidUtf8,

    /// Frame size exceeds configured maximum.
    #[error("Frame too large: {size} bytes (max: {max})")]
    FrameTooLarge {
        /// Actual frame size.
        size: usize,
        /// Maximum allowed size.
        max: usize,
    },

    /// Message size exceeds configured maximum.
    #[error("Message too large: {size} bytes (max: {max})")]
    MessageTooLarge {
        /// Actual message size.
        size: usize,
        /// Maximum allowed size.
        max: usize,
    },

    /// Too many fragments in a single message.
    #[error("Too many fragments: {count} (max: {max})")]
    TooManyFragments {
        /// Actual fragment count.
        count: usize,
        /// Maximum allowed fragments.
        max: usize,
    },

    /// Payload length does not fit in this platform's `usize`.
    #[error("Payload too large for platform: {size} bytes (max: {max})")]
    PayloadTooLargeForPlatform {
        /// Declared payload length.
        size: u64,
        /// Largest representable length.
        max: u64,
    },

    /// Connection has been closed.
    #[error("Connection closed: {0:?}")]
    ConnectionClosed(Option<u16>),

    /// Invalid WebSocket handshake or HTTP request head.
    #[error("Invalid handshake: {0}")]
    InvalidHandshake(String),

    /// Request or response head exceeds the configured maximum.
    #[error("Handshake too large: {size} bytes (max: {max})")]
    HandshakeTooLarge {
        /// Bytes received so far.
        size: usize,
        /// Maximum allowed size.
        max: usize,
    },

    /// I/O error occurred.
    #[error("I/O error: {0}")]
    Io(String),

    /// Invalid close code.
    #[error("Invalid close code: {0}")]
    InvalidCloseCode(u16),

    /// Reserved opcode used.
    #[error("Reserved opcode: {0:#x}")]
    ReservedOpcode(u8),

    /// Invalid opcode value.
    #[error("Invalid opcode: {0:#x}")]
    InvalidOpcode(u8),

    /// Control frame fragmented (RFC violation).
    #[error("Control frames cannot be fragmented")]
    FragmentedControlFrame,

    /// Control frame payload too large (>125 bytes).
    #[error("Control frame payload too large: {0} bytes (max: 125)")]
    ControlFrameTooLarge(usize),

    /// Unmasked client frame (security violation).
    #[error("Client frame must be masked")]
    UnmaskedClientFrame,

    /// Masked server frame (security violation).
    #[error("Server frame must not be masked")]
    MaskedServerFrame,

    /// Reserved bits set without extension.
    #[error("Reserved bits set without negotiated extension")]
    ReservedBitsSet,

    /// Incomplete frame data.
    #[error("Incomplete frame: need {needed} more bytes")]
    IncompleteFrame {
        /// Number of additional bytes needed.
        needed: usize,
    },

    /// Inbound payload is not a well-formed chat message.
    #[error("Malformed payload: {0}")]
    MalformedPayload(String),

    /// Writing to one fan-out recipient failed.
    #[error("Transport write failed for connection {connection}: {reason}")]
    TransportWrite {
        /// Identifier of the recipient connection.
        connection: u64,
        /// Why the write failed.
        reason: String,
    },

    /// A requested static file does not exist under the content root.
    #[error("Static asset not found: {0}")]
    StaticAssetNotFound(String),

    /// The aggregated results could not be persisted.
    #[error("Failed to write results to '{}': {reason}", path.display())]
    ResultsWrite {
        /// Target results file.
        path: PathBuf,
        /// Underlying cause.
        reason: String,
    },

    /// A command-line value could not be used.
    #[error("Invalid argument: {0}")]
    ArgumentParse(String),

    /// Configuration file could not be read or parsed.
    #[error("Configuration error: {0}")]
    Config(String),

    /// An operation did not finish before its deadline.
    #[error("Timed out: {0}")]
    Timeout(String),

    /// A harness task was cancelled before it produced a result.
    #[error("Task aborted: {0}")]
    TaskAborted(String),
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err.to_string())
    }
}

impl From<std::str::Utf8Error> for Error {
    fn from(_: std::str::Utf8Error) -> Self {
        Error::InvalidUtf8
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::MalformedPayload(err.to_string())
    }
}
