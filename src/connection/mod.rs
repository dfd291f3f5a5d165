//! Per-connection session handling.
//!
//! A [`Session`] drives one upgraded stream through its lifecycle:
//!
//! 1. **Negotiating** - the upgrade request is read, validated and answered
//! 2. **Active** - frames are read, handled and answered
//! 3. **Closing** - the stream is being shut down
//! 4. **Closed** - nothing more happens on this connection
//!
//! Replies come from a shared [`MessageHandler`].

mod handler;
mod role;
mod session;
mod state;

pub use handler::{Acknowledge, DEFAULT_ACK, MessageHandler};
pub use role::Role;
pub use session::Session;
pub use state::SessionState;
