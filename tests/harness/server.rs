//! Spawns a [`Server`] on 127.0.0.1 with an ephemeral port.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::task::JoinHandle;
use wsflate::{Acknowledge, Config, MessageHandler, Server};

pub struct TestServer {
    handle: JoinHandle<wsflate::Result<()>>,
}

impl TestServer {
    /// Acknowledging server, as the binary runs it.
    pub async fn spawn_ack(config: Config) -> (Self, SocketAddr) {
        Self::spawn_with(config, Arc::new(Acknowledge::default())).await
    }

    pub async fn spawn_with(
        config: Config,
        handler: Arc<dyn MessageHandler>,
    ) -> (Self, SocketAddr) {
        let server = Server::bind("127.0.0.1:0", config, handler).await.unwrap();
        let addr = server.local_addr().unwrap();
        let handle = tokio::spawn(server.run());
        (Self { handle }, addr)
    }

    pub async fn shutdown(self) {
        self.handle.abort();
        let _ = self.handle.await;
    }
}
