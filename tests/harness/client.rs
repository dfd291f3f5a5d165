//! Minimal WebSocket client built from the crate's own codec pieces.

use std::net::SocketAddr;

use tokio::net::TcpStream;
use wsflate::extensions::ExtensionOffer;
use wsflate::protocol::Frame;
use wsflate::{
    Config, DeflateParams, Error, HandshakeRequest, HandshakeResponse, OpCode, PerMessageDeflate,
    Result, Role, WebSocketCodec, compute_accept_key,
};

pub struct TestClient {
    codec: WebSocketCodec<TcpStream>,
    deflate: Option<PerMessageDeflate>,
    pub id: usize,
    /// Text replies that arrived with RSV1 set.
    pub compressed_replies: usize,
}

impl TestClient {
    pub async fn connect_with_id(addr: SocketAddr, id: usize) -> Result<Self> {
        Self::connect(addr, id, None).await
    }

    /// Connect and offer permessage-deflate with `offer`.
    pub async fn connect_compressed(addr: SocketAddr, id: usize, offer: &str) -> Result<Self> {
        Self::connect(addr, id, Some(offer)).await
    }

    async fn connect(addr: SocketAddr, id: usize, offer: Option<&str>) -> Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        let mut codec = WebSocketCodec::new(stream, Role::Client, Config::default());

        let mut request = HandshakeRequest::new(addr.to_string(), "/")?;
        if let Some(offer) = offer {
            request = request.with_extension(offer);
        }
        let mut buf = Vec::new();
        request.write(&mut buf)?;
        codec.write_raw(&buf).await?;
        codec.flush().await?;

        let raw = codec.read_handshake().await?;
        let response = HandshakeResponse::parse(&raw)?;
        if response.accept != compute_accept_key(&request.key) {
            return Err(Error::InvalidHandshake("accept key mismatch".into()));
        }

        let deflate = match response.extension.as_deref() {
            Some(token) => {
                let params = DeflateParams::from_response(&ExtensionOffer::parse(token)?)?;
                codec.set_compression(true);
                Some(PerMessageDeflate::new(Role::Client, params, 6, 1 << 24))
            }
            None => None,
        };

        Ok(Self {
            codec,
            deflate,
            id,
            compressed_replies: 0,
        })
    }

    pub fn params(&self) -> Option<DeflateParams> {
        self.deflate.as_ref().map(PerMessageDeflate::params)
    }

    pub async fn send_text(&mut self, text: &str) -> Result<()> {
        let mut frame = Frame::text(text);
        if let Some(deflate) = self.deflate.as_mut() {
            frame = deflate.compress_frame(frame)?;
        }
        self.send_frame(&frame).await
    }

    pub async fn send_frame(&mut self, frame: &Frame) -> Result<()> {
        self.codec.write_frame(frame).await?;
        self.codec.flush().await
    }

    /// Next frame as sent by the server, still compressed.
    pub async fn recv_frame(&mut self) -> Result<Frame> {
        self.codec.read_frame().await
    }

    /// Next text message. `None` when the server closed.
    pub async fn recv_text(&mut self) -> Result<Option<String>> {
        loop {
            let mut frame = match self.recv_frame().await {
                Ok(frame) => frame,
                Err(Error::ConnectionClosed(_)) => return Ok(None),
                Err(e) => return Err(e),
            };
            let compressed = frame.rsv1;
            if let Some(deflate) = self.deflate.as_mut() {
                frame = deflate.decompress_frame(frame)?;
            }
            match frame.opcode {
                OpCode::Text => {
                    if compressed {
                        self.compressed_replies += 1;
                    }
                    return String::from_utf8(frame.into_payload())
                        .map(Some)
                        .map_err(|_| Error::InvalidUtf8);
                }
                OpCode::Close => return Ok(None),
                _ => {}
            }
        }
    }

    /// Send a close frame and wait for the echo.
    pub async fn close(&mut self) -> Result<()> {
        self.send_frame(&Frame::close(Some(1000), "")).await?;
        match self.recv_frame().await {
            Ok(frame) if frame.opcode == OpCode::Close => Ok(()),
            Ok(frame) => Err(Error::ProtocolViolation(format!(
                "expected close, got {}",
                frame.opcode
            ))),
            Err(Error::ConnectionClosed(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }
}
