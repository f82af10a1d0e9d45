//! Buffered frame reading and writing over async byte streams.
//!
//! The two halves are separate types so a connection can be split into an
//! independently owned reader loop and writer task.

use bytes::{Buf, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::config::Limits;
use crate::error::{Error, Result};
use crate::transport::frame::{Frame, FrameHeader};
use crate::transport::role::Role;

const READ_CHUNK: usize = 4096;

/// Seed for the per-writer mask sequence, from the OS random source.
fn random_mask_seed() -> u32 {
    let mut buf = [0u8; 4];
    match getrandom::getrandom(&mut buf) {
        Ok(()) => u32::from_le_bytes(buf),
        Err(_) => chrono::Utc::now().timestamp_subsec_nanos() ^ 0x5bd1_e995,
    }
}

/// Reads whole frames from `R`, enforcing masking direction and size limits
/// before a frame's payload is buffered.
pub struct FrameReader<R> {
    io: R,
    buf: BytesMut,
    role: Role,
    limits: Limits,
}

impl<R> FrameReader<R> {
    #[must_use]
    pub fn new(io: R, role: Role, limits: Limits) -> Self {
        Self::with_buffered(io, role, limits, BytesMut::with_capacity(READ_CHUNK))
    }

    /// Start with bytes already read past the handshake.
    #[must_use]
    pub fn with_buffered(io: R, role: Role, limits: Limits, buf: BytesMut) -> Self {
        Self {
            io,
            buf,
            role,
            limits,
        }
    }

    #[must_use]
    pub fn role(&self) -> Role {
        self.role
    }

    #[must_use]
    pub fn limits(&self) -> &Limits {
        &self.limits
    }

    fn check_header(&self, header: &FrameHeader) -> Result<()> {
        let masked = header.mask.is_some();
        if self.role.expects_masked() && !masked {
            return Err(Error::UnmaskedClientFrame);
        }
        if !self.role.expects_masked() && masked {
            return Err(Error::MaskedServerFrame);
        }
        self.limits.check_frame_size(header.payload_len)
    }
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    /// Next validated frame.
    ///
    /// # Errors
    ///
    /// - `Error::ConnectionClosed(None)` if the stream ends
    /// - `Error::Io` on transport failure
    /// - any framing error from header checks or [`Frame::validate`]
    pub async fn read_frame(&mut self) -> Result<Frame> {
        loop {
            match FrameHeader::parse(&self.buf) {
                Ok(header) => {
                    self.check_header(&header)?;
                    match Frame::parse(&self.buf) {
                        Ok((frame, consumed)) => {
                            self.buf.advance(consumed);
                            frame.validate()?;
                            return Ok(frame);
                        }
                        Err(Error::IncompleteFrame { .. }) => {}
                        Err(e) => return Err(e),
                    }
                }
                Err(Error::IncompleteFrame { .. }) => {}
                Err(e) => return Err(e),
            }

            self.buf.reserve(READ_CHUNK);
            let n = self.io.read_buf(&mut self.buf).await?;
            if n == 0 {
                return Err(Error::ConnectionClosed(None));
            }
        }
    }
}

/// Serializes frames onto `W`, masking them when acting as a client.
pub struct FrameWriter<W> {
    io: W,
    buf: BytesMut,
    role: Role,
    mask_counter: u32,
}

impl<W> FrameWriter<W> {
    #[must_use]
    pub fn new(io: W, role: Role) -> Self {
        Self {
            io,
            buf: BytesMut::with_capacity(READ_CHUNK),
            role,
            mask_counter: random_mask_seed(),
        }
    }

    #[must_use]
    pub fn role(&self) -> Role {
        self.role
    }

    fn next_mask(&mut self) -> [u8; 4] {
        self.mask_counter = self.mask_counter.wrapping_add(0x9E37_79B9);
        let a = self.mask_counter.wrapping_mul(0x85EB_CA6B);
        let b = a ^ (a >> 13);
        b.wrapping_mul(0xC2B2_AE35).to_le_bytes()
    }
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    /// Encode and write one frame, then flush.
    ///
    /// # Errors
    ///
    /// Returns `Error::Io` if the write fails.
    pub async fn write_frame(&mut self, frame: &Frame) -> Result<()> {
        let mask = self.role.must_mask().then(|| self.next_mask());
        self.buf.clear();
        frame.encode(&mut self.buf, mask);
        self.io.write_all(&self.buf).await?;
        self.io.flush().await?;
        Ok(())
    }

    /// # Errors
    ///
    /// Returns `Error::Io` if the shutdown fails.
    pub async fn shutdown(&mut self) -> Result<()> {
        self.io.shutdown().await?;
        Ok(())
    }
}
