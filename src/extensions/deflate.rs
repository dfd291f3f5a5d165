//! Permessage-deflate WebSocket compression extension (RFC 7692).
//!
//! [`PerMessageDeflate`] is the per-connection compression context. The
//! send side keeps one raw deflate stream alive across messages unless no
//! context takeover was negotiated for it. The receive side inflates every
//! message with a fresh raw inflater primed with the previous 32 KiB of
//! output, which makes the end of a message's input detectable and so lets a
//! truncated payload fail instead of silently yielding a short message.

use std::fmt;

use flate2::{Compress, Compression, Decompress, FlushCompress, FlushDecompress, Status};

use crate::connection::Role;
use crate::error::{Error, Result};
use crate::protocol::{Frame, OpCode};

/// Extension token for permessage-deflate.
pub const PERMESSAGE_DEFLATE: &str = "permessage-deflate";

pub const SERVER_NO_CONTEXT_TAKEOVER: &str = "server_no_context_takeover";
pub const CLIENT_NO_CONTEXT_TAKEOVER: &str = "client_no_context_takeover";
pub const SERVER_MAX_WINDOW_BITS: &str = "server_max_window_bits";
pub const CLIENT_MAX_WINDOW_BITS: &str = "client_max_window_bits";

/// Smallest window RFC 7692 allows.
pub const MIN_WINDOW_BITS: u8 = 8;
/// Largest window RFC 7692 allows, and the default.
pub const MAX_WINDOW_BITS: u8 = 15;
/// Smallest window zlib's raw deflate engine accepts.
pub const ZLIB_MIN_WINDOW_BITS: u8 = 9;

const DEFLATE_TRAILER: [u8; 4] = [0x00, 0x00, 0xff, 0xff];
/// The sync-flush trailer followed by an empty final stored block.
const FINAL_BLOCK: [u8; 9] = [0x00, 0x00, 0xff, 0xff, 0x01, 0x00, 0x00, 0xff, 0xff];
const HISTORY_SIZE: usize = 1 << MAX_WINDOW_BITS;
const CHUNK: usize = 4096;

/// Compression parameters agreed for one connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeflateParams {
    pub server_no_context_takeover: bool,
    pub client_no_context_takeover: bool,
    pub server_max_window_bits: u8,
    pub client_max_window_bits: u8,
}

impl Default for DeflateParams {
    fn default() -> Self {
        Self {
            server_no_context_takeover: false,
            client_no_context_takeover: false,
            server_max_window_bits: MAX_WINDOW_BITS,
            client_max_window_bits: MAX_WINDOW_BITS,
        }
    }
}

impl DeflateParams {
    /// `(no_context_takeover, max_window_bits)` governing what `role` sends.
    fn outbound(&self, role: Role) -> (bool, u8) {
        match role {
            Role::Server => (self.server_no_context_takeover, self.server_max_window_bits),
            Role::Client => (self.client_no_context_takeover, self.client_max_window_bits),
        }
    }

    /// `(no_context_takeover, max_window_bits)` governing what `role` receives.
    fn inbound(&self, role: Role) -> (bool, u8) {
        self.outbound(role.peer())
    }
}

fn check_window_bits(name: &str, bits: u8, min: u8) -> Result<u8> {
    if !(min..=MAX_WINDOW_BITS).contains(&bits) {
        return Err(Error::InvalidExtension(format!(
            "{} must be {}-{}, got {}",
            name, min, MAX_WINDOW_BITS, bits
        )));
    }
    Ok(bits)
}

/// Server compression policy: the most the server is willing to agree to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeflateConfig {
    pub params: DeflateParams,
    /// zlib compression level, 0-9.
    pub compression_level: u32,
}

impl Default for DeflateConfig {
    fn default() -> Self {
        Self {
            params: DeflateParams::default(),
            compression_level: 6,
        }
    }
}

impl DeflateConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn server_no_context_takeover(mut self, value: bool) -> Self {
        self.params.server_no_context_takeover = value;
        self
    }

    pub fn client_no_context_takeover(mut self, value: bool) -> Self {
        self.params.client_no_context_takeover = value;
        self
    }

    /// Limit the window the server compresses with.
    ///
    /// 8 is legal on the wire but rejected: zlib cannot deflate with a
    /// 256-byte window.
    pub fn server_max_window_bits(mut self, bits: u8) -> Result<Self> {
        self.params.server_max_window_bits =
            check_window_bits(SERVER_MAX_WINDOW_BITS, bits, ZLIB_MIN_WINDOW_BITS)?;
        Ok(self)
    }

    /// Limit the window clients may compress with.
    pub fn client_max_window_bits(mut self, bits: u8) -> Result<Self> {
        self.params.client_max_window_bits =
            check_window_bits(CLIENT_MAX_WINDOW_BITS, bits, MIN_WINDOW_BITS)?;
        Ok(self)
    }

    pub fn compression_level(mut self, level: u32) -> Result<Self> {
        if level > 9 {
            return Err(Error::InvalidExtension(format!(
                "compression_level must be 0-9, got {}",
                level
            )));
        }
        self.compression_level = level;
        Ok(self)
    }
}

/// Per-connection permessage-deflate state for one endpoint.
pub struct PerMessageDeflate {
    params: DeflateParams,
    compressor: Compress,
    reset_compressor: bool,
    inflate_window_bits: u8,
    reset_history: bool,
    history: Vec<u8>,
    max_message_size: usize,
}

impl PerMessageDeflate {
    /// Create the compression context for `role` under negotiated `params`.
    ///
    /// Decompressed messages larger than `max_message_size` are rejected.
    pub fn new(role: Role, params: DeflateParams, level: u32, max_message_size: usize) -> Self {
        let (reset_compressor, send_bits) = params.outbound(role);
        let (reset_history, recv_bits) = params.inbound(role);
        let send_bits = send_bits.clamp(ZLIB_MIN_WINDOW_BITS, MAX_WINDOW_BITS);

        Self {
            params,
            compressor: Compress::new_with_window_bits(
                Compression::new(level.min(9)),
                false,
                send_bits,
            ),
            reset_compressor,
            inflate_window_bits: recv_bits.clamp(ZLIB_MIN_WINDOW_BITS, MAX_WINDOW_BITS),
            reset_history,
            history: Vec::new(),
            max_message_size,
        }
    }

    pub fn params(&self) -> DeflateParams {
        self.params
    }

    /// Whether the frame's payload is compressed (RSV1).
    pub fn is_compressed(&self, frame: &Frame) -> bool {
        frame.rsv1
    }

    /// Inflate a compressed message, returning it with RSV1 cleared.
    ///
    /// Frames without RSV1 pass through unchanged. `frame` must hold the
    /// whole message; fragments are reassembled first.
    ///
    /// # Errors
    ///
    /// - `Error::CompressedControlFrame` - RSV1 set on a control frame
    /// - `Error::Compression` - corrupt or truncated deflate stream
    /// - `Error::MessageTooLarge` - inflated size exceeds the limit
    pub fn decompress_frame(&mut self, frame: Frame) -> Result<Frame> {
        if !self.is_compressed(&frame) {
            return Ok(frame);
        }
        if frame.opcode.is_control() {
            return Err(Error::CompressedControlFrame);
        }

        let payload = self.inflate(frame.payload())?;
        Ok(Frame::new(frame.fin, frame.opcode, payload))
    }

    /// Deflate a whole data message and set RSV1.
    ///
    /// Control frames are returned unchanged.
    ///
    /// # Errors
    ///
    /// Returns `Error::Compression` if `frame` is a fragment or the
    /// compressor fails.
    pub fn compress_frame(&mut self, frame: Frame) -> Result<Frame> {
        if frame.opcode.is_control() {
            return Ok(frame);
        }
        if !frame.fin || frame.opcode == OpCode::Continuation {
            return Err(Error::Compression(
                "only whole messages can be compressed".into(),
            ));
        }

        let payload = self.deflate(frame.payload())?;
        let mut compressed = Frame::new(true, frame.opcode, payload);
        compressed.rsv1 = true;
        Ok(compressed)
    }

    fn deflate(&mut self, input: &[u8]) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(input.len() / 2 + 64);
        let start = self.compressor.total_in();

        loop {
            if out.capacity() - out.len() < CHUNK {
                out.reserve(CHUNK);
            }
            let consumed = (self.compressor.total_in() - start) as usize;
            self.compressor
                .compress_vec(&input[consumed..], &mut out, FlushCompress::Sync)?;

            let consumed = (self.compressor.total_in() - start) as usize;
            if consumed == input.len() && out.len() < out.capacity() {
                break;
            }
        }

        if out.ends_with(&DEFLATE_TRAILER) {
            out.truncate(out.len() - DEFLATE_TRAILER.len());
        }
        if self.reset_compressor {
            self.compressor.reset();
        }
        Ok(out)
    }

    fn inflate(&mut self, input: &[u8]) -> Result<Vec<u8>> {
        let mut inflater = Decompress::new_with_window_bits(false, self.inflate_window_bits);
        if !self.reset_history && !self.history.is_empty() {
            inflater.set_dictionary(&self.history)?;
        }

        let mut data = Vec::with_capacity(input.len() + FINAL_BLOCK.len());
        data.extend_from_slice(input);
        data.extend_from_slice(&FINAL_BLOCK);

        let initial = (input.len() * 2).clamp(CHUNK, self.max_message_size.max(CHUNK));
        let mut out = Vec::with_capacity(initial);
        loop {
            if out.capacity() - out.len() < CHUNK {
                out.reserve(CHUNK);
            }
            let (before_in, before_out) = (inflater.total_in(), inflater.total_out());
            let pending = &data[before_in as usize..];
            let status = inflater.decompress_vec(pending, &mut out, FlushDecompress::None)?;

            if out.len() > self.max_message_size {
                return Err(Error::MessageTooLarge {
                    size: out.len(),
                    max: self.max_message_size,
                });
            }
            if status == Status::StreamEnd {
                break;
            }
            if inflater.total_in() == before_in && inflater.total_out() == before_out {
                return Err(Error::Compression(
                    "truncated compressed payload".into(),
                ));
            }
        }

        if !self.reset_history {
            self.remember(&out);
        }
        Ok(out)
    }

    fn remember(&mut self, output: &[u8]) {
        if output.len() >= HISTORY_SIZE {
            self.history.clear();
            self.history
                .extend_from_slice(&output[output.len() - HISTORY_SIZE..]);
            return;
        }
        self.history.extend_from_slice(output);
        if self.history.len() > HISTORY_SIZE {
            let excess = self.history.len() - HISTORY_SIZE;
            self.history.drain(..excess);
        }
    }
}

impl fmt::Debug for PerMessageDeflate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PerMessageDeflate")
            .field("params", &self.params)
            .field("inflate_window_bits", &self.inflate_window_bits)
            .field("history_len", &self.history.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MAX: usize = 1 << 20;

    fn pair(params: DeflateParams) -> (PerMessageDeflate, PerMessageDeflate) {
        (
            PerMessageDeflate::new(Role::Server, params, 6, MAX),
            PerMessageDeflate::new(Role::Client, params, 6, MAX),
        )
    }

    #[test]
    fn test_compression_roundtrip() {
        let (mut server, mut client) = pair(DeflateParams::default());

        let original = b"Hello, WebSocket compression! This is a test message.".to_vec();
        let compressed = client.compress_frame(Frame::text(original.clone())).unwrap();
        assert!(compressed.rsv1);
        assert!(server.is_compressed(&compressed));
        assert!(!compressed.payload().ends_with(&DEFLATE_TRAILER));

        let plain = server.decompress_frame(compressed).unwrap();
        assert!(!plain.rsv1);
        assert_eq!(plain.opcode, OpCode::Text);
        assert_eq!(plain.payload(), &original[..]);
    }

    #[test]
    fn test_context_takeover_across_messages() {
        let (mut server, mut client) = pair(DeflateParams::default());
        let message = b"repeated payload repeated payload repeated payload".to_vec();

        let first = client.compress_frame(Frame::text(message.clone())).unwrap();
        let second = client.compress_frame(Frame::text(message.clone())).unwrap();
        assert!(second.payload().len() < first.payload().len());

        assert_eq!(server.decompress_frame(first).unwrap().payload(), &message[..]);
        assert_eq!(server.decompress_frame(second).unwrap().payload(), &message[..]);
    }

    #[test]
    fn test_no_context_takeover_messages_independent() {
        let params = DeflateParams {
            server_no_context_takeover: true,
            client_no_context_takeover: true,
            ..DeflateParams::default()
        };
        let (mut server, mut client) = pair(params);
        let message = b"independent message independent message".to_vec();

        let first = server.compress_frame(Frame::binary(message.clone())).unwrap();
        let second = server.compress_frame(Frame::binary(message.clone())).unwrap();
        assert_eq!(first.payload(), second.payload());

        // Each message inflates on its own, in any order.
        assert_eq!(client.decompress_frame(second).unwrap().payload(), &message[..]);
        assert_eq!(client.decompress_frame(first).unwrap().payload(), &message[..]);
    }

    #[test]
    fn test_small_windows() {
        let params = DeflateParams {
            server_max_window_bits: 9,
            client_max_window_bits: 8,
            ..DeflateParams::default()
        };
        let (mut server, mut client) = pair(params);
        let message: Vec<u8> = (0..4000u32).map(|i| (i % 97) as u8).collect();

        let compressed = server.compress_frame(Frame::binary(message.clone())).unwrap();
        assert_eq!(client.decompress_frame(compressed).unwrap().payload(), &message[..]);
    }

    #[test]
    fn test_large_incompressible_payload() {
        let (mut server, mut client) = pair(DeflateParams::default());
        let mut state = 0x1234_5678u32;
        let message: Vec<u8> = (0..100_000)
            .map(|_| {
                state ^= state << 13;
                state ^= state >> 17;
                state ^= state << 5;
                state as u8
            })
            .collect();

        let compressed = client.compress_frame(Frame::binary(message.clone())).unwrap();
        assert_eq!(server.decompress_frame(compressed).unwrap().payload(), &message[..]);
    }

    #[test]
    fn test_empty_payload() {
        let (mut server, mut client) = pair(DeflateParams::default());
        let compressed = client.compress_frame(Frame::text(Vec::new())).unwrap();
        assert!(compressed.rsv1);
        assert!(server.decompress_frame(compressed).unwrap().payload().is_empty());
    }

    #[test]
    fn test_control_frames_not_compressed() {
        let (mut server, _) = pair(DeflateParams::default());

        let ping = server.compress_frame(Frame::ping(b"ping".to_vec())).unwrap();
        assert!(!ping.rsv1);
        assert_eq!(ping.payload(), b"ping");

        let close = server.compress_frame(Frame::close(Some(1000), "bye")).unwrap();
        assert!(!close.rsv1);
    }

    #[test]
    fn test_compressed_control_frame_rejected() {
        let (mut server, _) = pair(DeflateParams::default());
        let mut frame = Frame::ping(b"test".to_vec());
        frame.rsv1 = true;
        assert_eq!(
            server.decompress_frame(frame),
            Err(Error::CompressedControlFrame)
        );
    }

    #[test]
    fn test_uncompressed_frame_passes_through() {
        let (mut server, _) = pair(DeflateParams::default());
        let frame = Frame::text("plain");
        assert_eq!(server.decompress_frame(frame.clone()).unwrap(), frame);
    }

    #[test]
    fn test_fragment_compression_rejected() {
        let (mut server, _) = pair(DeflateParams::default());
        let fragment = Frame::new(false, OpCode::Text, b"part".to_vec());
        assert!(matches!(
            server.compress_frame(fragment),
            Err(Error::Compression(_))
        ));
    }

    #[test]
    fn test_truncated_payload_is_error() {
        let (mut server, _) = pair(DeflateParams::default());
        // Stored block announcing 256 bytes, carrying 3.
        let mut frame = Frame::text(vec![0x00, 0x00, 0x01, 0xff, 0xfe, b'a', b'b', b'c']);
        frame.rsv1 = true;
        assert!(matches!(
            server.decompress_frame(frame),
            Err(Error::Compression(_))
        ));
    }

    #[test]
    fn test_cut_short_compressed_message_is_error() {
        let mut server = PerMessageDeflate::new(Role::Server, DeflateParams::default(), 6, MAX);
        // Level 0 emits stored blocks, so cutting the payload short always
        // leaves a block waiting for data.
        let mut client = PerMessageDeflate::new(Role::Client, DeflateParams::default(), 0, MAX);
        let message: Vec<u8> = (0..2000u32).map(|i| (i * 7 % 251) as u8).collect();
        let compressed = client.compress_frame(Frame::binary(message)).unwrap();

        let half = compressed.payload()[..compressed.payload().len() / 2].to_vec();
        let mut truncated = Frame::binary(half);
        truncated.rsv1 = true;
        assert!(matches!(
            server.decompress_frame(truncated),
            Err(Error::Compression(_))
        ));
    }

    #[test]
    fn test_corrupt_payload_is_error() {
        let (mut server, _) = pair(DeflateParams::default());
        // BTYPE=11 is reserved.
        let mut frame = Frame::binary(vec![0xff, 0xff, 0xff]);
        frame.rsv1 = true;
        assert!(matches!(
            server.decompress_frame(frame),
            Err(Error::Compression(_))
        ));
    }

    #[test]
    fn test_inflated_size_limited() {
        let params = DeflateParams::default();
        let mut client = PerMessageDeflate::new(Role::Client, params, 9, MAX);
        let mut server = PerMessageDeflate::new(Role::Server, params, 6, 1024);

        let compressed = client.compress_frame(Frame::binary(vec![0u8; 64 * 1024])).unwrap();
        assert!(compressed.payload().len() < 1024);
        assert!(matches!(
            server.decompress_frame(compressed),
            Err(Error::MessageTooLarge { max: 1024, .. })
        ));
    }

    #[test]
    fn test_window_bits_validation() {
        assert!(DeflateConfig::new().server_max_window_bits(9).is_ok());
        assert!(DeflateConfig::new().server_max_window_bits(15).is_ok());
        assert!(DeflateConfig::new().server_max_window_bits(8).is_err());
        assert!(DeflateConfig::new().server_max_window_bits(16).is_err());

        assert!(DeflateConfig::new().client_max_window_bits(8).is_ok());
        assert!(DeflateConfig::new().client_max_window_bits(15).is_ok());
        assert!(DeflateConfig::new().client_max_window_bits(7).is_err());
        assert!(DeflateConfig::new().client_max_window_bits(16).is_err());
    }

    #[test]
    fn test_compression_level_validation() {
        assert!(DeflateConfig::new().compression_level(0).is_ok());
        assert!(DeflateConfig::new().compression_level(9).is_ok());
        assert!(DeflateConfig::new().compression_level(10).is_err());
    }

    #[test]
    fn test_config_builder() {
        let config = DeflateConfig::new()
            .server_no_context_takeover(true)
            .client_no_context_takeover(true)
            .client_max_window_bits(10)
            .unwrap();
        assert!(config.params.server_no_context_takeover);
        assert!(config.params.client_no_context_takeover);
        assert_eq!(config.params.client_max_window_bits, 10);
        assert_eq!(config.params.server_max_window_bits, 15);
        assert_eq!(config.compression_level, 6);
    }
}
