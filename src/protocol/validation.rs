//! Header validation for incoming frames (RFC 6455, RFC 7692).
//!
//! Checks run on the header alone, as soon as it is buffered:
//! - Masking rules per RFC 6455 Section 5.1
//! - RSV bits, which only a negotiated extension may set
//! - Control frame constraints (unfragmented, at most 125 bytes, never compressed)
//! - Frame size limits

use crate::config::Limits;
use crate::connection::Role;
use crate::error::{Error, Result};
use crate::protocol::frame::{FrameHeader, MAX_CONTROL_FRAME_PAYLOAD};

/// Frame validator for incoming WebSocket frames.
#[derive(Debug, Clone)]
pub struct FrameValidator {
    role: Role,
    limits: Limits,
    accept_unmasked_frames: bool,
    rsv1_allowed: bool,
}

impl FrameValidator {
    /// Create a validator that allows no reserved bits.
    pub fn new(role: Role, limits: Limits) -> Self {
        Self {
            role,
            limits,
            accept_unmasked_frames: false,
            rsv1_allowed: false,
        }
    }

    /// Accept unmasked client frames (non-RFC compliant, testing only).
    pub fn with_accept_unmasked(mut self, accept: bool) -> Self {
        self.accept_unmasked_frames = accept;
        self
    }

    /// Allow RSV1 on data frames, once permessage-deflate is negotiated.
    pub fn with_rsv1(mut self, allowed: bool) -> Self {
        self.rsv1_allowed = allowed;
        self
    }

    /// Validate an incoming frame header.
    ///
    /// # Errors
    ///
    /// - `Error::UnmaskedClientFrame` - Server received unmasked frame from client
    /// - `Error::MaskedServerFrame` - Client received masked frame from server
    /// - `Error::ReservedBitsSet` - RSV bits set without negotiated extension
    /// - `Error::CompressedControlFrame` - RSV1 set on a control frame
    /// - `Error::FragmentedControlFrame` - Control frame without FIN
    /// - `Error::ControlFrameTooLarge` - Control frame payload over 125 bytes
    /// - `Error::FrameTooLarge` - Frame exceeds size limit
    pub fn validate_header(&self, header: &FrameHeader) -> Result<()> {
        self.validate_masking(header.mask.is_some())?;
        self.validate_rsv_bits(header)?;

        if header.opcode.is_control() {
            if !header.fin {
                return Err(Error::FragmentedControlFrame);
            }
            if header.payload_len > MAX_CONTROL_FRAME_PAYLOAD as u64 {
                return Err(Error::ControlFrameTooLarge(header.payload_len));
            }
        }

        self.limits.check_frame_size(header.payload_len)
    }

    fn validate_masking(&self, masked: bool) -> Result<()> {
        match self.role {
            Role::Server if !masked && !self.accept_unmasked_frames => {
                Err(Error::UnmaskedClientFrame)
            }
            Role::Client if masked => Err(Error::MaskedServerFrame),
            _ => Ok(()),
        }
    }

    fn validate_rsv_bits(&self, header: &FrameHeader) -> Result<()> {
        if header.rsv2 || header.rsv3 {
            return Err(Error::ReservedBitsSet);
        }
        if header.rsv1 {
            if !self.rsv1_allowed {
                return Err(Error::ReservedBitsSet);
            }
            if header.opcode.is_control() {
                return Err(Error::CompressedControlFrame);
            }
        }
        Ok(())
    }
}
