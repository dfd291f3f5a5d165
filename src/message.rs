//! WebSocket message types and close codes as defined in RFC 6455.

/// WebSocket close status code per RFC 6455 Section 7.4.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[non_exhaustive]
pub enum CloseCode {
    /// Normal closure (1000).
    #[default]
    Normal,
    /// Going away (1001).
    GoingAway,
    /// Protocol error (1002).
    ProtocolError,
    /// Invalid payload (1007), e.g. non-UTF-8 text.
    InvalidPayload,
    /// Message too big (1009).
    MessageTooBig,
    /// Any other code.
    Other(u16),
}

impl CloseCode {
    /// Create a `CloseCode` from its numeric value.
    #[must_use]
    pub const fn from_u16(code: u16) -> Self {
        match code {
            1000 => CloseCode::Normal,
            1001 => CloseCode::GoingAway,
            1002 => CloseCode::ProtocolError,
            1007 => CloseCode::InvalidPayload,
            1009 => CloseCode::MessageTooBig,
            other => CloseCode::Other(other),
        }
    }

    /// Get the numeric value of this close code.
    #[must_use]
    pub const fn as_u16(&self) -> u16 {
        match self {
            CloseCode::Normal => 1000,
            CloseCode::GoingAway => 1001,
            CloseCode::ProtocolError => 1002,
            CloseCode::InvalidPayload => 1007,
            CloseCode::MessageTooBig => 1009,
            CloseCode::Other(code) => *code,
        }
    }

    /// Whether `code` may appear in a close frame sent by a peer.
    ///
    /// 1004-1006 and 1015 are reserved for local reporting, and
    /// everything below 3000 outside the registered range is unassigned.
    #[must_use]
    pub const fn is_allowed(code: u16) -> bool {
        matches!(code, 1000..=1003 | 1007..=1014 | 3000..=4999)
    }
}

/// Close frame body: status code and optional reason.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseFrame {
    /// The close status code.
    pub code: CloseCode,
    /// Human-readable reason for closing (UTF-8, max 123 bytes).
    pub reason: String,
}

impl CloseFrame {
    /// Create a new close frame with the given code and reason.
    #[must_use]
    pub fn new(code: CloseCode, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: reason.into(),
        }
    }

    /// Decode a close frame payload.
    ///
    /// An empty payload carries no status. A one-byte payload or a status
    /// code peers may not send is reported as a protocol error, and a
    /// reason that is not UTF-8 as an invalid payload.
    #[must_use]
    pub fn parse(payload: &[u8]) -> Option<Self> {
        match payload {
            [] => None,
            [_] => Some(CloseFrame::new(
                CloseCode::ProtocolError,
                "Invalid close frame",
            )),
            [hi, lo, reason @ ..] => {
                let code = u16::from_be_bytes([*hi, *lo]);
                if !CloseCode::is_allowed(code) {
                    return Some(CloseFrame::new(
                        CloseCode::ProtocolError,
                        "Invalid close code",
                    ));
                }
                let code = CloseCode::from_u16(code);
                match std::str::from_utf8(reason) {
                    Ok(reason) => Some(CloseFrame::new(code, reason)),
                    Err(_) => Some(CloseFrame::new(CloseCode::InvalidPayload, "")),
                }
            }
        }
    }
}

/// A complete WebSocket message, as delivered to and returned from a
/// [`MessageHandler`](crate::connection::MessageHandler).
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum Message {
    /// A text message (UTF-8 encoded).
    Text(String),
    /// A binary message (arbitrary bytes).
    Binary(Vec<u8>),
}

impl Message {
    /// Create a text message.
    #[must_use]
    pub fn text(s: impl Into<String>) -> Self {
        Message::Text(s.into())
    }

    /// Create a binary message.
    #[must_use]
    pub fn binary(data: impl Into<Vec<u8>>) -> Self {
        Message::Binary(data.into())
    }

    /// Returns `true` if this is a text message.
    #[must_use]
    pub const fn is_text(&self) -> bool {
        matches!(self, Message::Text(_))
    }

    /// Get the payload as bytes.
    #[must_use]
    pub fn payload(&self) -> &[u8] {
        match self {
            Message::Text(s) => s.as_bytes(),
            Message::Binary(data) => data,
        }
    }

    /// Consume the message and return its payload bytes.
    #[must_use]
    pub fn into_payload(self) -> Vec<u8> {
        match self {
            Message::Text(s) => s.into_bytes(),
            Message::Binary(data) => data,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_close_code_roundtrip() {
        for code in [1000, 1001, 1002, 1007, 1009, 4000] {
            assert_eq!(CloseCode::from_u16(code).as_u16(), code);
        }
        assert_eq!(CloseCode::from_u16(4000), CloseCode::Other(4000));
    }

    #[test]
    fn test_close_frame_parse() {
        assert_eq!(CloseFrame::parse(&[]), None);

        let frame = CloseFrame::parse(&[0x03, 0xe8, b'b', b'y', b'e']).unwrap();
        assert_eq!(frame.code, CloseCode::Normal);
        assert_eq!(frame.reason, "bye");

        let short = CloseFrame::parse(&[0x03]).unwrap();
        assert_eq!(short.code, CloseCode::ProtocolError);

        let bad_utf8 = CloseFrame::parse(&[0x03, 0xe8, 0xff, 0xfe]).unwrap();
        assert_eq!(bad_utf8.code, CloseCode::InvalidPayload);
    }

    #[test]
    fn test_close_frame_parse_rejects_reserved_codes() {
        for code in [0u16, 999, 1004, 1005, 1006, 1015, 1016, 2999, 5000] {
            let [hi, lo] = code.to_be_bytes();
            let frame = CloseFrame::parse(&[hi, lo]).unwrap();
            assert_eq!(frame.code, CloseCode::ProtocolError, "code {}", code);
        }

        for code in [1003u16, 1011, 3000, 4999] {
            let [hi, lo] = code.to_be_bytes();
            let frame = CloseFrame::parse(&[hi, lo]).unwrap();
            assert_eq!(frame.code.as_u16(), code);
        }
    }

    #[test]
    fn test_message_payload() {
        let text = Message::text("hello");
        assert!(text.is_text());
        assert_eq!(text.payload(), b"hello");

        let binary = Message::binary(vec![1, 2, 3]);
        assert!(!binary.is_text());
        assert_eq!(binary.into_payload(), vec![1, 2, 3]);
    }
}
