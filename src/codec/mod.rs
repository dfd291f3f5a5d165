//! Buffered frame I/O over async streams.
//!
//! [`WebSocketCodec`] owns the stream and its read/write buffers. It reads
//! the HTTP upgrade header, then frames; each frame header is validated as
//! soon as it is buffered.

mod framed;

pub use framed::WebSocketCodec;
