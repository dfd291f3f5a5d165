//! Message fragmentation and reassembly for WebSocket (RFC 6455).
//!
//! permessage-deflate compresses whole messages and marks only the first
//! frame with RSV1, so the session assembles a message before handing it to
//! the decompressor.

use bytes::BytesMut;

use crate::config::Limits;
use crate::error::{Error, Result};
use crate::protocol::{Frame, OpCode};

/// Reassembles fragmented WebSocket messages.
#[derive(Debug)]
pub struct MessageAssembler {
    buffer: BytesMut,
    fragment_count: usize,
    opcode: Option<OpCode>,
    rsv1: bool,
    limits: Limits,
}

impl MessageAssembler {
    pub fn new(limits: Limits) -> Self {
        Self {
            buffer: BytesMut::new(),
            fragment_count: 0,
            opcode: None,
            rsv1: false,
            limits,
        }
    }

    /// Add an unmasked data frame to the message being assembled.
    ///
    /// Returns `Some(message)` when FIN=1, `None` otherwise. Control frames
    /// are ignored; they may interleave with fragments and are handled by
    /// the caller.
    pub fn push(&mut self, frame: Frame) -> Result<Option<AssembledMessage>> {
        if frame.opcode.is_control() {
            return Ok(None);
        }

        let opcode = match (frame.opcode, self.opcode) {
            (OpCode::Continuation, None) => {
                return Err(Error::ProtocolViolation(
                    "Unexpected continuation frame".into(),
                ));
            }
            (OpCode::Continuation, Some(opcode)) => {
                if frame.rsv1 {
                    return Err(Error::ProtocolViolation(
                        "RSV1 set on continuation frame".into(),
                    ));
                }
                opcode
            }
            (_, Some(_)) => {
                return Err(Error::ProtocolViolation(
                    "Expected continuation frame".into(),
                ));
            }
            (opcode, None) => {
                self.rsv1 = frame.rsv1;
                opcode
            }
        };
        self.opcode = Some(opcode);

        self.limits.check_fragment_count(self.fragment_count + 1)?;
        self.limits
            .check_message_size(self.buffer.len() + frame.payload().len())?;

        self.buffer.extend_from_slice(frame.payload());
        self.fragment_count += 1;

        if !frame.fin {
            return Ok(None);
        }

        let message = AssembledMessage {
            opcode,
            rsv1: self.rsv1,
            payload: self.buffer.split().to_vec(),
        };
        self.reset();
        Ok(Some(message))
    }

    pub fn is_assembling(&self) -> bool {
        self.opcode.is_some()
    }

    pub fn reset(&mut self) {
        self.buffer.clear();
        self.fragment_count = 0;
        self.opcode = None;
        self.rsv1 = false;
    }
}

/// A fully assembled WebSocket message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssembledMessage {
    pub opcode: OpCode,
    /// RSV1 of the first frame: the payload is compressed.
    pub rsv1: bool,
    pub payload: Vec<u8>,
}

impl AssembledMessage {
    /// Collapse the message into a single final frame.
    pub fn into_frame(self) -> Frame {
        let mut frame = Frame::new(true, self.opcode, self.payload);
        frame.rsv1 = self.rsv1;
        frame
    }
}
