//! Test harness: a wsflate server on an ephemeral port and a minimal client.

#![allow(dead_code)]

mod client;
mod server;

pub use client::TestClient;
pub use server::TestServer;
