//! WebSocket frame parsing and serialization (RFC 6455).
//!
//! Parsing is split in two steps so that a header can be validated as soon as
//! it is buffered, before the payload has arrived: [`FrameHeader::parse`]
//! decodes the fixed and extended header, [`Frame::parse`] additionally takes
//! the payload. Payloads are kept exactly as they appeared on the wire; a
//! masked payload stays masked until [`Frame::unmask_payload`] is called.

use bytes::{BufMut, BytesMut};

use crate::error::{Error, Result};
use crate::protocol::OpCode;
use crate::protocol::mask::apply_mask_fast;

/// Maximum payload size for control frames (RFC 6455).
pub const MAX_CONTROL_FRAME_PAYLOAD: usize = 125;

/// Decoded frame header.
///
/// ```text
///  0                   1                   2                   3
///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
/// +-+-+-+-+-------+-+-------------+-------------------------------+
/// |F|R|R|R| opcode|M| Payload len |    Extended payload length    |
/// |I|S|S|S|  (4)  |A|     (7)     |             (16/64)           |
/// |N|V|V|V|       |S|             |   (if payload len==126/127)   |
/// | |1|2|3|       |K|             |                               |
/// +-+-+-+-+-------+-+-------------+-------------------------------+
/// |                 Masking key (if MASK is set)                  |
/// +---------------------------------------------------------------+
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// Final fragment flag.
    pub fin: bool,
    /// RSV1, the permessage-deflate "compressed" marker.
    pub rsv1: bool,
    /// RSV2, unused.
    pub rsv2: bool,
    /// RSV3, unused.
    pub rsv3: bool,
    /// Frame opcode.
    pub opcode: OpCode,
    /// Masking key, present on client-to-server frames.
    pub mask: Option<[u8; 4]>,
    /// Payload length as declared on the wire.
    pub payload_len: u64,
    /// Header length in bytes, including extended length and mask key.
    pub header_len: usize,
}

impl FrameHeader {
    /// Parse a frame header from the start of `buf`.
    ///
    /// # Errors
    ///
    /// - `Error::IncompleteFrame` if the header is not fully buffered yet
    /// - `Error::ReservedOpcode` if a reserved opcode is used
    /// - `Error::ProtocolViolation` if the 64-bit length has its high bit set
    pub fn parse(buf: &[u8]) -> Result<Self> {
        if buf.len() < 2 {
            return Err(Error::IncompleteFrame {
                needed: 2 - buf.len(),
            });
        }

        let byte0 = buf[0];
        let byte1 = buf[1];
        let opcode = OpCode::from_u8(byte0)?;
        let masked = (byte1 & 0x80) != 0;

        let (payload_len, len_end) = match byte1 & 0x7F {
            126 => {
                let bytes = buf.get(2..4).ok_or_else(|| Error::IncompleteFrame {
                    needed: 4 - buf.len(),
                })?;
                (u64::from(u16::from_be_bytes([bytes[0], bytes[1]])), 4)
            }
            127 => {
                let bytes: [u8; 8] = buf
                    .get(2..10)
                    .and_then(|b| b.try_into().ok())
                    .ok_or_else(|| Error::IncompleteFrame {
                        needed: 10 - buf.len(),
                    })?;
                let len = u64::from_be_bytes(bytes);
                if len & (1 << 63) != 0 {
                    return Err(Error::ProtocolViolation(
                        "most significant bit of 64-bit payload length is set".into(),
                    ));
                }
                (len, 10)
            }
            short => (u64::from(short), 2),
        };

        let header_len = if masked { len_end + 4 } else { len_end };
        if buf.len() < header_len {
            return Err(Error::IncompleteFrame {
                needed: header_len - buf.len(),
            });
        }

        let mask = if masked {
            Some([
                buf[len_end],
                buf[len_end + 1],
                buf[len_end + 2],
                buf[len_end + 3],
            ])
        } else {
            None
        };

        Ok(Self {
            fin: (byte0 & 0x80) != 0,
            rsv1: (byte0 & 0x40) != 0,
            rsv2: (byte0 & 0x20) != 0,
            rsv3: (byte0 & 0x10) != 0,
            opcode,
            mask,
            payload_len,
            header_len,
        })
    }
}

/// A WebSocket frame as defined in RFC 6455.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Final fragment flag. True if this is the last fragment of a message.
    pub fin: bool,
    /// Reserved bit 1. Marks a compressed message under permessage-deflate.
    pub rsv1: bool,
    /// Reserved bit 2. Must be 0.
    pub rsv2: bool,
    /// Reserved bit 3. Must be 0.
    pub rsv3: bool,
    /// Frame opcode defining the interpretation of payload data.
    pub opcode: OpCode,
    mask: Option<[u8; 4]>,
    payload: Vec<u8>,
}

impl Frame {
    /// Create a new unmasked frame with the given parameters.
    #[must_use]
    pub fn new(fin: bool, opcode: OpCode, payload: Vec<u8>) -> Self {
        Self {
            fin,
            rsv1: false,
            rsv2: false,
            rsv3: false,
            opcode,
            mask: None,
            payload,
        }
    }

    /// Create a text frame.
    #[must_use]
    pub fn text(data: impl Into<Vec<u8>>) -> Self {
        Self::new(true, OpCode::Text, data.into())
    }

    /// Create a binary frame.
    #[must_use]
    pub fn binary(data: impl Into<Vec<u8>>) -> Self {
        Self::new(true, OpCode::Binary, data.into())
    }

    /// Create a close frame with optional status code and reason.
    #[must_use]
    pub fn close(code: Option<u16>, reason: &str) -> Self {
        let payload = match code {
            Some(code) => {
                let mut data = code.to_be_bytes().to_vec();
                data.extend_from_slice(reason.as_bytes());
                data
            }
            None => Vec::new(),
        };
        Self::new(true, OpCode::Close, payload)
    }

    /// Create a ping frame.
    #[must_use]
    pub fn ping(data: impl Into<Vec<u8>>) -> Self {
        Self::new(true, OpCode::Ping, data.into())
    }

    /// Create a pong frame.
    #[must_use]
    pub fn pong(data: impl Into<Vec<u8>>) -> Self {
        Self::new(true, OpCode::Pong, data.into())
    }

    /// Build a frame from a parsed header and its (still masked) payload.
    #[must_use]
    pub fn from_parts(header: &FrameHeader, payload: Vec<u8>) -> Self {
        Self {
            fin: header.fin,
            rsv1: header.rsv1,
            rsv2: header.rsv2,
            rsv3: header.rsv3,
            opcode: header.opcode,
            mask: header.mask,
            payload,
        }
    }

    /// Whether the frame arrived with a masking key.
    #[inline]
    #[must_use]
    pub fn is_masked(&self) -> bool {
        self.mask.is_some()
    }

    /// The masking key the frame arrived with.
    #[inline]
    #[must_use]
    pub fn mask_key(&self) -> Option<[u8; 4]> {
        self.mask
    }

    /// Get the payload bytes.
    #[inline]
    #[must_use]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Take ownership of the payload.
    #[must_use]
    pub fn into_payload(self) -> Vec<u8> {
        self.payload
    }

    /// Apply the frame's masking key to the payload in place.
    ///
    /// A no-op for unmasked frames. The key is kept, so a second call masks
    /// the payload again; call this exactly once per received frame.
    pub fn unmask_payload(&mut self) {
        if let Some(key) = self.mask {
            apply_mask_fast(&mut self.payload, key);
        }
    }

    /// Parse a complete frame from a buffer.
    ///
    /// Returns the frame and the number of bytes consumed. The payload is not
    /// unmasked.
    ///
    /// ## Errors
    ///
    /// - `Error::IncompleteFrame` if not enough data is available
    /// - `Error::FrameTooLarge` if the payload cannot be addressed on this platform
    /// - header errors from [`FrameHeader::parse`]
    pub fn parse(buf: &[u8]) -> Result<(Self, usize)> {
        let header = FrameHeader::parse(buf)?;
        let total_size = usize::try_from(header.payload_len)
            .ok()
            .and_then(|len| len.checked_add(header.header_len))
            .ok_or(Error::FrameTooLarge {
                size: header.payload_len,
                max: usize::MAX,
            })?;

        if buf.len() < total_size {
            return Err(Error::IncompleteFrame {
                needed: total_size - buf.len(),
            });
        }

        let payload = buf[header.header_len..total_size].to_vec();
        Ok((Self::from_parts(&header, payload), total_size))
    }

    /// Serialize the frame into `dst`.
    ///
    /// With `mask` set, the key is written after the length and the payload
    /// is masked on the way out (client role). Servers pass `None`.
    pub fn write(&self, dst: &mut BytesMut, mask: Option<[u8; 4]>) {
        let payload_len = self.payload.len();
        dst.reserve(self.wire_size(mask.is_some()));

        let mut byte0 = self.opcode.as_u8();
        if self.fin {
            byte0 |= 0x80;
        }
        if self.rsv1 {
            byte0 |= 0x40;
        }
        if self.rsv2 {
            byte0 |= 0x20;
        }
        if self.rsv3 {
            byte0 |= 0x10;
        }
        dst.put_u8(byte0);

        let mask_bit = if mask.is_some() { 0x80 } else { 0 };
        if payload_len <= 125 {
            dst.put_u8(mask_bit | payload_len as u8);
        } else if let Ok(len) = u16::try_from(payload_len) {
            dst.put_u8(mask_bit | 126);
            dst.put_u16(len);
        } else {
            dst.put_u8(mask_bit | 127);
            dst.put_u64(payload_len as u64);
        }

        match mask {
            Some(key) => {
                dst.put_slice(&key);
                let start = dst.len();
                dst.put_slice(&self.payload);
                apply_mask_fast(&mut dst[start..], key);
            }
            None => dst.put_slice(&self.payload),
        }
    }

    /// Calculate the size needed to write this frame.
    #[must_use]
    pub fn wire_size(&self, masked: bool) -> usize {
        let payload_len = self.payload.len();
        let extended_len_size = if payload_len <= 125 {
            0
        } else if payload_len <= 65535 {
            2
        } else {
            8
        };
        let mask_size = if masked { 4 } else { 0 };
        2 + extended_len_size + mask_size + payload_len
    }
}
