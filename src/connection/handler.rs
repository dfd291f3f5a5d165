//! Application callback invoked for every complete message.

use crate::message::Message;

/// Reply text used by [`Acknowledge::default`].
pub const DEFAULT_ACK: &str = "this is an acknowledgement";

/// Handles one decoded message and optionally produces a reply.
///
/// One handler is shared by every connection of a server, so it must be
/// `Send + Sync`. Plain closures implement it:
///
/// ```
/// use std::sync::Arc;
/// use wsflate::{Message, MessageHandler};
///
/// let echo: Arc<dyn MessageHandler> = Arc::new(|msg: Message| Some(msg));
/// assert_eq!(echo.handle(Message::text("hi")), Some(Message::text("hi")));
/// ```
pub trait MessageHandler: Send + Sync {
    fn handle(&self, message: Message) -> Option<Message>;
}

impl<F> MessageHandler for F
where
    F: Fn(Message) -> Option<Message> + Send + Sync,
{
    fn handle(&self, message: Message) -> Option<Message> {
        self(message)
    }
}

/// Answers every message with the same text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Acknowledge {
    reply: String,
}

impl Acknowledge {
    pub fn new(reply: impl Into<String>) -> Self {
        Self {
            reply: reply.into(),
        }
    }

    pub fn reply(&self) -> &str {
        &self.reply
    }
}

impl Default for Acknowledge {
    fn default() -> Self {
        Self::new(DEFAULT_ACK)
    }
}

impl MessageHandler for Acknowledge {
    fn handle(&self, _message: Message) -> Option<Message> {
        Some(Message::text(self.reply.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_acknowledge_ignores_input() {
        let ack = Acknowledge::default();
        assert_eq!(
            ack.handle(Message::binary(vec![1, 2, 3])),
            Some(Message::text(DEFAULT_ACK))
        );
        assert_eq!(ack.handle(Message::text("hello")), Some(Message::text(DEFAULT_ACK)));
    }

    #[test]
    fn test_custom_acknowledge() {
        let ack = Acknowledge::new("ok");
        assert_eq!(ack.reply(), "ok");
        assert_eq!(ack.handle(Message::text("x")), Some(Message::text("ok")));
    }

    #[test]
    fn test_closure_handler() {
        let silent = |_: Message| None;
        assert_eq!(silent.handle(Message::text("x")), None);

        let upper = |msg: Message| match msg {
            Message::Text(s) => Some(Message::Text(s.to_uppercase())),
            other => Some(other),
        };
        assert_eq!(upper.handle(Message::text("abc")), Some(Message::text("ABC")));
    }
}
