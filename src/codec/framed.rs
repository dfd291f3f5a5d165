use bytes::{Buf, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::config::Config;
use crate::connection::Role;
use crate::error::{Error, Result};
use crate::protocol::validation::FrameValidator;
use crate::protocol::{Frame, FrameHeader};

const HEADER_TERMINATOR: &[u8] = b"\r\n\r\n";

/// Seed for the mask generator. Falls back to the clock if the OS source fails.
fn random_mask_seed() -> u32 {
    let mut buf = [0u8; 4];
    if getrandom::getrandom(&mut buf).is_ok() {
        u32::from_le_bytes(buf)
    } else {
        use std::time::{SystemTime, UNIX_EPOCH};
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u32)
            .unwrap_or(0x1234_5678)
    }
}

/// Frame-level reader/writer for one connection.
pub struct WebSocketCodec<T> {
    io: T,
    read_buf: BytesMut,
    write_buf: BytesMut,
    role: Role,
    config: Config,
    mask_counter: u32,
    validator: FrameValidator,
}

impl<T> WebSocketCodec<T> {
    #[must_use]
    pub fn new(io: T, role: Role, config: Config) -> Self {
        let validator = FrameValidator::new(role, config.limits.clone())
            .with_accept_unmasked(config.accept_unmasked_frames);
        Self {
            io,
            read_buf: BytesMut::with_capacity(config.read_buffer_size),
            write_buf: BytesMut::with_capacity(config.write_buffer_size),
            role,
            config,
            mask_counter: random_mask_seed(),
            validator,
        }
    }

    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Accept RSV1 on incoming data frames once compression is negotiated.
    pub fn set_compression(&mut self, enabled: bool) {
        self.validator = self.validator.clone().with_rsv1(enabled);
    }

    /// Bytes received but not yet consumed.
    #[must_use]
    pub fn buffered(&self) -> &[u8] {
        &self.read_buf
    }

    #[must_use]
    pub fn get_ref(&self) -> &T {
        &self.io
    }

    #[must_use]
    pub fn into_inner(self) -> T {
        self.io
    }

    fn generate_mask(&mut self) -> [u8; 4] {
        self.mask_counter = self.mask_counter.wrapping_add(0x9E37_79B9);
        let a = self.mask_counter;
        let b = a.wrapping_mul(0x85EB_CA6B);
        let c = b ^ (b >> 13);
        let d = c.wrapping_mul(0xC2B2_AE35);
        d.to_le_bytes()
    }
}

impl<T: AsyncRead + AsyncWrite + Unpin> WebSocketCodec<T> {
    /// Pull more bytes into the read buffer. Returns the number read.
    async fn fill(&mut self, hint: usize) -> Result<usize> {
        self.read_buf.reserve(hint.max(self.config.read_buffer_size));
        let n = self.io.read_buf(&mut self.read_buf).await?;
        Ok(n)
    }

    /// Read an HTTP header block, up to and including the blank line.
    ///
    /// Anything the peer sent after the header stays buffered for
    /// [`read_frame`](Self::read_frame).
    ///
    /// # Errors
    ///
    /// - `Error::HandshakeTooLarge` if no header end is found within `max_handshake_size`
    /// - `Error::ConnectionClosed` on EOF before any byte arrived
    /// - `Error::InvalidHandshake` on EOF inside the header
    pub async fn read_handshake(&mut self) -> Result<Vec<u8>> {
        let mut searched = 0;
        loop {
            if let Some(pos) = self.read_buf[searched..]
                .windows(HEADER_TERMINATOR.len())
                .position(|w| w == HEADER_TERMINATOR)
            {
                let end = searched + pos + HEADER_TERMINATOR.len();
                self.config.limits.check_handshake_size(end)?;
                return Ok(self.read_buf.split_to(end).to_vec());
            }
            self.config.limits.check_handshake_size(self.read_buf.len())?;
            searched = self.read_buf.len().saturating_sub(HEADER_TERMINATOR.len() - 1);

            if self.fill(0).await? == 0 {
                return Err(if self.read_buf.is_empty() {
                    Error::ConnectionClosed(None)
                } else {
                    Error::InvalidHandshake("Connection closed during handshake".into())
                });
            }
        }
    }

    /// Read the next frame. The payload is returned still masked.
    ///
    /// # Errors
    ///
    /// - header validation errors, raised before the payload is read
    /// - `Error::ConnectionClosed` on EOF at a frame boundary
    /// - `Error::IncompleteFrame` on EOF inside a frame
    /// - `Error::Io` on transport failure
    pub async fn read_frame(&mut self) -> Result<Frame> {
        loop {
            let needed = match FrameHeader::parse(&self.read_buf) {
                Ok(header) => {
                    self.validator.validate_header(&header)?;
                    match Frame::parse(&self.read_buf) {
                        Ok((frame, consumed)) => {
                            self.read_buf.advance(consumed);
                            return Ok(frame);
                        }
                        Err(Error::IncompleteFrame { needed }) => needed,
                        Err(e) => return Err(e),
                    }
                }
                Err(Error::IncompleteFrame { needed }) => needed,
                Err(e) => return Err(e),
            };

            if self.fill(needed).await? == 0 {
                return Err(if self.read_buf.is_empty() {
                    Error::ConnectionClosed(None)
                } else {
                    Error::IncompleteFrame { needed }
                });
            }
        }
    }

    /// Serialize and write one frame. Clients mask with a fresh key.
    pub async fn write_frame(&mut self, frame: &Frame) -> Result<()> {
        let mask = if self.role.must_mask() {
            Some(self.generate_mask())
        } else {
            None
        };

        self.write_buf.clear();
        frame.write(&mut self.write_buf, mask);
        self.io.write_all(&self.write_buf).await?;
        Ok(())
    }

    /// Write raw bytes, used for the HTTP handshake.
    pub async fn write_raw(&mut self, data: &[u8]) -> Result<()> {
        self.io.write_all(data).await?;
        Ok(())
    }

    pub async fn flush(&mut self) -> Result<()> {
        self.io.flush().await?;
        Ok(())
    }

    /// Flush and shut down the write half of the stream.
    pub async fn shutdown(&mut self) -> Result<()> {
        self.io.shutdown().await?;
        Ok(())
    }
}
