//! # wsflate - WebSocket server with permessage-deflate
//!
//! `wsflate` accepts RFC 6455 WebSocket connections, negotiates the
//! RFC 7692 `permessage-deflate` extension, and runs every connection
//! through a read → decompress → handle → compress → write pipeline.
//!
//! ## Layout
//!
//! - [`protocol`] - frames, masking, header validation, message assembly, HTTP upgrade
//! - [`extensions`] - `Sec-WebSocket-Extensions` grammar, deflate negotiation and compression
//! - [`codec`] - buffered frame I/O over tokio streams
//! - [`connection`] - per-connection [`Session`] and the [`MessageHandler`] callback
//! - [`server`] - TCP accept loop
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use wsflate::{Acknowledge, Config, Server};
//!
//! # async fn run() -> wsflate::Result<()> {
//! let handler = Arc::new(Acknowledge::default());
//! let server = Server::bind("127.0.0.1:8080", Config::default(), handler).await?;
//! server.run().await
//! # }
//! ```

pub mod codec;
pub mod config;
pub mod connection;
pub mod error;
pub mod extensions;
pub mod message;
pub mod protocol;
pub mod server;

pub use codec::WebSocketCodec;
pub use config::{Config, Limits};
pub use connection::{Acknowledge, DEFAULT_ACK, MessageHandler, Role, Session, SessionState};
pub use error::{Error, ErrorKind, Result};
pub use extensions::{DeflateConfig, DeflateParams, PerMessageDeflate};
pub use message::{CloseCode, CloseFrame, Message};
pub use protocol::{HandshakeRequest, HandshakeResponse, OpCode, WS_GUID, compute_accept_key};
pub use server::Server;
