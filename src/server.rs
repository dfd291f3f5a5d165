//! TCP accept loop serving one [`Session`] per connection.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::connection::{MessageHandler, Session};
use crate::error::{ErrorKind, Result};

/// WebSocket server bound to a TCP listener.
pub struct Server {
    listener: TcpListener,
    config: Config,
    handler: Arc<dyn MessageHandler>,
}

impl Server {
    /// Bind a listener on `addr`.
    ///
    /// # Errors
    ///
    /// Returns `Error::Io` if the address cannot be bound.
    pub async fn bind<A: ToSocketAddrs>(
        addr: A,
        config: Config,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self {
            listener,
            config,
            handler,
        })
    }

    /// Address the listener is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept connections until `accept` fails.
    ///
    /// Each connection runs on its own task; its errors are logged and
    /// never end the loop.
    ///
    /// # Errors
    ///
    /// Returns `Error::Io` when accepting a connection fails.
    pub async fn run(self) -> Result<()> {
        info!(addr = ?self.listener.local_addr().ok(), "listening");
        loop {
            let (stream, peer) = self.listener.accept().await?;
            debug!(%peer, "accepted connection");

            let config = self.config.clone();
            let handler = Arc::clone(&self.handler);
            tokio::spawn(async move {
                serve(stream, peer, config, handler).await;
            });
        }
    }
}

async fn serve(
    stream: TcpStream,
    peer: SocketAddr,
    config: Config,
    handler: Arc<dyn MessageHandler>,
) {
    if let Err(e) = stream.set_nodelay(true) {
        debug!(%peer, error = %e, "set_nodelay failed");
    }

    let mut session = match Session::accept(stream, config, handler).await {
        Ok(session) => session,
        Err(e) if e.kind() == ErrorKind::Closed => {
            debug!(%peer, "closed before upgrade");
            return;
        }
        Err(e) => {
            warn!(%peer, error = %e, "upgrade failed");
            return;
        }
    };

    info!(%peer, compression = session.params().is_some(), "connection upgraded");
    if let Err(e) = session.run().await {
        warn!(%peer, error = %e, "connection ended with error");
    }
}
