//! wsflate server binary.
//!
//! Accepts WebSocket connections, negotiates permessage-deflate and
//! answers every message with an acknowledgement.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use wsflate::{Acknowledge, Config, DEFAULT_ACK, DeflateConfig, Server};

#[derive(Parser)]
#[command(name = "wsflate")]
#[command(version)]
#[command(about = "WebSocket server with permessage-deflate", long_about = None)]
struct Cli {
    /// Address to listen on
    #[arg(long, default_value = "127.0.0.1:8080")]
    addr: SocketAddr,

    /// Decline every permessage-deflate offer
    #[arg(long)]
    no_compression: bool,

    /// Require the server to reset its compressor after each message
    #[arg(long)]
    server_no_context_takeover: bool,

    /// Require clients to reset their compressor after each message
    #[arg(long)]
    client_no_context_takeover: bool,

    /// Largest server LZ77 window, 9-15
    #[arg(long, default_value_t = 15)]
    server_max_window_bits: u8,

    /// Largest client LZ77 window, 8-15
    #[arg(long, default_value_t = 15)]
    client_max_window_bits: u8,

    /// Compression level, 0-9
    #[arg(long, default_value_t = 6)]
    level: u32,

    /// Reply sent for every message
    #[arg(long, default_value = DEFAULT_ACK)]
    ack: String,

    /// Log level (trace, debug, info, warn, error); RUST_LOG takes precedence
    #[arg(long, default_value = "info")]
    log_level: String,
}

impl Cli {
    fn config(&self) -> anyhow::Result<Config> {
        if self.no_compression {
            return Ok(Config::default().without_compression());
        }

        let deflate = DeflateConfig::new()
            .server_no_context_takeover(self.server_no_context_takeover)
            .client_no_context_takeover(self.client_no_context_takeover)
            .server_max_window_bits(self.server_max_window_bits)
            .context("invalid --server-max-window-bits")?
            .client_max_window_bits(self.client_max_window_bits)
            .context("invalid --client-max-window-bits")?
            .compression_level(self.level)
            .context("invalid --level")?;

        Ok(Config::default().with_deflate(deflate))
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cli.log_level)),
        )
        .init();

    let config = cli.config()?;
    tracing::info!(deflate = ?config.deflate, "starting");

    let handler = Arc::new(Acknowledge::new(cli.ack.clone()));
    let server = Server::bind(cli.addr, config, handler)
        .await
        .with_context(|| format!("failed to bind {}", cli.addr))?;

    server.run().await.context("accept loop failed")?;
    Ok(())
}
