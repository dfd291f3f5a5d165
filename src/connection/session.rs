use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, info, warn};

use crate::codec::WebSocketCodec;
use crate::config::Config;
use crate::connection::{MessageHandler, Role, SessionState};
use crate::error::{Error, ErrorKind, Result};
use crate::extensions::{DeflateConfig, DeflateNegotiator, DeflateParams, PerMessageDeflate};
use crate::message::{CloseFrame, Message};
use crate::protocol::handshake::write_rejection;
use crate::protocol::{
    AssembledMessage, Frame, HandshakeRequest, HandshakeResponse, MessageAssembler, OpCode,
};

/// Server side of one WebSocket connection.
///
/// A session owns its stream. After the upgrade it runs a strictly
/// sequential read → decompress → handle → compress → write loop until the
/// peer closes or an error ends the connection.
///
/// ```rust,ignore
/// let (stream, _) = listener.accept().await?;
/// let mut session = Session::accept(stream, Config::default(), handler).await?;
/// session.run().await?;
/// ```
pub struct Session<T> {
    codec: WebSocketCodec<T>,
    state: SessionState,
    assembler: MessageAssembler,
    deflate: Option<PerMessageDeflate>,
    handler: Arc<dyn MessageHandler>,
}

impl<T> Session<T> {
    fn negotiating(codec: WebSocketCodec<T>, handler: Arc<dyn MessageHandler>) -> Self {
        let assembler = MessageAssembler::new(codec.config().limits.clone());
        Self {
            codec,
            state: SessionState::Negotiating,
            assembler,
            deflate: None,
            handler,
        }
    }

    fn activate(&mut self, params: Option<DeflateParams>) {
        let config = self.codec.config();
        let level = config
            .deflate
            .as_ref()
            .map_or(DeflateConfig::default().compression_level, |d| {
                d.compression_level
            });
        let max_message_size = config.limits.max_message_size;
        self.deflate =
            params.map(|p| PerMessageDeflate::new(Role::Server, p, level, max_message_size));
        self.codec.set_compression(self.deflate.is_some());
        self.state = SessionState::Active;
    }

    /// Wrap a stream whose upgrade was already completed elsewhere.
    ///
    /// `params` are the permessage-deflate parameters agreed during that
    /// upgrade, or `None` if no extension was accepted.
    pub fn from_upgraded(
        io: T,
        params: Option<DeflateParams>,
        config: Config,
        handler: Arc<dyn MessageHandler>,
    ) -> Self {
        let codec = WebSocketCodec::new(io, Role::Server, config);
        let mut session = Self::negotiating(codec, handler);
        session.activate(params);
        session
    }

    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Negotiated compression parameters, if any.
    #[must_use]
    pub fn params(&self) -> Option<DeflateParams> {
        self.deflate.as_ref().map(PerMessageDeflate::params)
    }
}

impl<T: AsyncRead + AsyncWrite + Unpin> Session<T> {
    /// Perform the server side of the upgrade on `io`.
    ///
    /// A bad request is answered with `400 Bad Request` and the stream is
    /// shut down before the error is returned.
    ///
    /// # Errors
    ///
    /// - handshake errors (`ErrorKind::Handshake`) for a malformed request
    /// - `Error::ConnectionClosed` if the peer left before sending anything
    /// - `Error::Io` on transport failure
    pub async fn accept(
        io: T,
        config: Config,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<Self> {
        let codec = WebSocketCodec::new(io, Role::Server, config);
        let mut session = Self::negotiating(codec, handler);
        session.handshake().await?;
        Ok(session)
    }

    /// Answer the upgrade request. Leaves the session `Active` on success
    /// and `Closed` on failure.
    async fn handshake(&mut self) -> Result<()> {
        match upgrade(&mut self.codec).await {
            Ok(params) => {
                debug!(compression = params.is_some(), "upgrade complete");
                self.activate(params);
                Ok(())
            }
            Err(err) => {
                if err.kind() == ErrorKind::Handshake {
                    warn!(error = %err, "rejecting upgrade");
                    let mut buf = Vec::new();
                    write_rejection(&mut buf, &err);
                    if let Err(e) = self.codec.write_raw(&buf).await {
                        debug!(error = %e, "failed to send rejection");
                    }
                }
                if let Err(e) = self.close().await {
                    debug!(error = %e, "shutdown after failed upgrade");
                }
                Err(err)
            }
        }
    }

    /// Serve frames until the connection ends.
    ///
    /// Returns `Ok(())` when the peer sends a close frame or closes the
    /// stream at a frame boundary. Any other failure closes the stream and
    /// is returned; no close frame is sent in that case.
    ///
    /// # Errors
    ///
    /// - `Error::ConnectionClosed` if the session is no longer active
    /// - protocol, compression or I/O errors raised while serving
    pub async fn run(&mut self) -> Result<()> {
        if !self.state.is_active() {
            return Err(Error::ConnectionClosed(None));
        }

        let result = self.serve().await;
        match &result {
            Ok(()) => debug!("session finished"),
            Err(err) => warn!(error = %err, kind = ?err.kind(), "session failed"),
        }

        if let Err(e) = self.close().await {
            debug!(error = %e, "shutdown failed");
        }
        result
    }

    /// Shut the stream down. Later calls do nothing.
    pub async fn close(&mut self) -> Result<()> {
        if !self.state.is_open() {
            return Ok(());
        }
        self.state = SessionState::Closing;
        let result = self.codec.shutdown().await;
        self.state = SessionState::Closed;
        info!("connection closed");
        result
    }

    async fn serve(&mut self) -> Result<()> {
        loop {
            let mut frame = match self.codec.read_frame().await {
                Ok(frame) => frame,
                Err(Error::ConnectionClosed(_)) => {
                    debug!("peer closed the stream");
                    return Ok(());
                }
                Err(e) => return Err(e),
            };
            frame.unmask_payload();
            debug!(
                opcode = %frame.opcode,
                fin = frame.fin,
                rsv1 = frame.rsv1,
                len = frame.payload().len(),
                "frame received"
            );

            match frame.opcode {
                OpCode::Ping => self.send(Frame::pong(frame.into_payload())).await?,
                OpCode::Pong => {}
                OpCode::Close => {
                    let reply = match CloseFrame::parse(frame.payload()) {
                        Some(close) => {
                            debug!(
                                code = close.code.as_u16(),
                                reason = %close.reason,
                                "close received"
                            );
                            Frame::close(Some(close.code.as_u16()), &close.reason)
                        }
                        None => Frame::close(None, ""),
                    };
                    self.send(reply).await?;
                    return Ok(());
                }
                OpCode::Text | OpCode::Binary | OpCode::Continuation => {
                    if let Some(assembled) = self.assembler.push(frame)? {
                        self.dispatch(assembled).await?;
                    }
                }
            }
        }
    }

    async fn dispatch(&mut self, assembled: AssembledMessage) -> Result<()> {
        let mut frame = assembled.into_frame();
        if frame.rsv1 {
            let deflate = self.deflate.as_mut().ok_or(Error::ReservedBitsSet)?;
            frame = deflate.decompress_frame(frame)?;
        }

        let message = match frame.opcode {
            OpCode::Text => Message::Text(
                String::from_utf8(frame.into_payload()).map_err(|_| Error::InvalidUtf8)?,
            ),
            OpCode::Binary => Message::Binary(frame.into_payload()),
            other => {
                return Err(Error::ProtocolViolation(format!(
                    "unexpected message opcode {}",
                    other
                )));
            }
        };

        let Some(reply) = self.handler.handle(message) else {
            return Ok(());
        };

        let mut frame = match reply {
            Message::Text(text) => Frame::text(text),
            Message::Binary(data) => Frame::binary(data),
        };
        if let Some(deflate) = self.deflate.as_mut() {
            frame = deflate.compress_frame(frame)?;
        }
        self.send(frame).await
    }

    async fn send(&mut self, frame: Frame) -> Result<()> {
        self.codec.write_frame(&frame).await?;
        self.codec.flush().await
    }
}

/// Read and answer the upgrade request, returning the agreed compression.
async fn upgrade<T: AsyncRead + AsyncWrite + Unpin>(
    codec: &mut WebSocketCodec<T>,
) -> Result<Option<DeflateParams>> {
    let raw = codec.read_handshake().await?;
    let limit = codec.config().limits.max_handshake_size;
    let request = HandshakeRequest::parse_with_limit(&raw, limit)?;
    request.validate()?;
    debug!(
        path = %request.path,
        host = %request.host,
        offers = ?request.extensions,
        "upgrade request"
    );

    let mut response = HandshakeResponse::from_request(&request);
    let mut params = None;
    if let Some(policy) = codec.config().deflate.clone() {
        let mut negotiator = DeflateNegotiator::new(policy);
        if let Some(token) = negotiator.negotiate(&request.extensions)? {
            response = response.with_extension(token.to_string());
        }
        params = negotiator.accepted();
    }

    let mut buf = Vec::new();
    response.write(&mut buf)?;
    codec.write_raw(&buf).await?;
    codec.flush().await?;
    Ok(params)
}
