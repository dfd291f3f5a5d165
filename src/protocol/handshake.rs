//! WebSocket opening handshake (RFC 6455 Section 4).
//!
//! The server side parses and validates the HTTP/1.1 upgrade request and
//! answers with `101 Switching Protocols` or `400 Bad Request`. The client
//! side (request serialization, response parsing) backs the test client.

use crate::error::{Error, Result};
use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use sha1::{Digest, Sha1};
use std::collections::HashMap;

/// The WebSocket GUID used in the Sec-WebSocket-Accept calculation (RFC 6455).
pub const WS_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Headers that must appear at most once in an upgrade request.
const SINGLETON_HEADERS: [&str; 5] = [
    "host",
    "upgrade",
    "connection",
    "sec-websocket-key",
    "sec-websocket-version",
];

/// Parse header lines into a map keyed by lowercase name.
///
/// Repeated headers outside `singletons` are folded into one comma-separated
/// value, which is how multiple `Sec-WebSocket-Extensions` lines combine.
fn parse_headers<'a, I>(lines: I, singletons: &[&str]) -> Result<HashMap<String, String>>
where
    I: Iterator<Item = &'a str>,
{
    let mut headers: HashMap<String, String> = HashMap::new();

    for line in lines {
        if line.is_empty() {
            break;
        }
        let Some((name, value)) = line.split_once(':') else {
            return Err(Error::InvalidHandshake(format!(
                "Malformed header line: {}",
                line
            )));
        };
        let name = name.trim().to_ascii_lowercase();
        let value = value.trim();

        match headers.get_mut(&name) {
            Some(_) if singletons.contains(&name.as_str()) => {
                return Err(Error::InvalidHandshake(format!("Duplicate header: {}", name)));
            }
            Some(existing) => {
                existing.push_str(", ");
                existing.push_str(value);
            }
            None => {
                headers.insert(name, value.to_string());
            }
        }
    }

    Ok(headers)
}

fn required<'a>(
    headers: &'a HashMap<String, String>,
    name: &str,
    display: &str,
) -> Result<&'a str> {
    headers
        .get(name)
        .map(String::as_str)
        .ok_or_else(|| Error::InvalidHandshake(format!("Missing {} header", display)))
}

fn validate_header_value(header_name: &str, value: &str) -> Result<()> {
    if value.contains('\r') || value.contains('\n') {
        return Err(Error::InvalidHeaderValue {
            header: header_name.to_string(),
            reason: "contains CR or LF characters".to_string(),
        });
    }
    Ok(())
}

/// Computes the Sec-WebSocket-Accept value from the client's Sec-WebSocket-Key.
///
/// The accept key is calculated as: Base64(SHA-1(key + GUID))
///
/// # Example
///
/// ```
/// use wsflate::protocol::handshake::compute_accept_key;
///
/// let key = "dGhlIHNhbXBsZSBub25jZQ==";
/// let accept = compute_accept_key(key);
/// assert_eq!(accept, "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=");
/// ```
pub fn compute_accept_key(key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(key.as_bytes());
    hasher.update(WS_GUID.as_bytes());
    BASE64.encode(hasher.finalize())
}

/// Generate a random Sec-WebSocket-Key for a client request.
pub fn generate_key() -> Result<String> {
    let mut nonce = [0u8; 16];
    getrandom::getrandom(&mut nonce)
        .map_err(|e| Error::Io(format!("Failed to generate handshake key: {}", e)))?;
    Ok(BASE64.encode(nonce))
}

/// Parsed WebSocket upgrade request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeRequest {
    /// The request path (e.g., "/chat").
    pub path: String,
    /// The Host header value.
    pub host: String,
    /// The Sec-WebSocket-Key header value.
    pub key: String,
    /// The Sec-WebSocket-Version (must be 13).
    pub version: u8,
    /// Raw Sec-WebSocket-Extensions values, one per offer.
    pub extensions: Vec<String>,
}

impl HandshakeRequest {
    /// Build a client request for `path` on `host` with a fresh key.
    pub fn new(host: impl Into<String>, path: impl Into<String>) -> Result<Self> {
        Ok(Self {
            path: path.into(),
            host: host.into(),
            key: generate_key()?,
            version: 13,
            extensions: Vec::new(),
        })
    }

    /// Offer an extension, e.g. `"permessage-deflate; client_max_window_bits"`.
    pub fn with_extension(mut self, offer: impl Into<String>) -> Self {
        self.extensions.push(offer.into());
        self
    }

    /// Parse a WebSocket upgrade request from raw HTTP data.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidHandshake`] if:
    /// - The data is not valid UTF-8.
    /// - The request line is malformed, not `GET`, or not `HTTP/1.1`.
    /// - A required header is missing or duplicated: `Upgrade`, `Connection`,
    ///   `Host`, `Sec-WebSocket-Key`, `Sec-WebSocket-Version`.
    /// - The `Upgrade` header is not `websocket`.
    /// - The `Connection` header does not contain `upgrade`.
    /// - The `Sec-WebSocket-Version` is not a valid integer.
    pub fn parse(data: &[u8]) -> Result<Self> {
        let text = std::str::from_utf8(data)
            .map_err(|_| Error::InvalidHandshake("Invalid UTF-8".into()))?;

        let mut lines = text.lines();

        let request_line = lines
            .next()
            .ok_or_else(|| Error::InvalidHandshake("Empty request".into()))?;

        let parts: Vec<&str> = request_line.split_whitespace().collect();
        let [method, path, http_version] = parts.as_slice() else {
            return Err(Error::InvalidHandshake("Invalid request line".into()));
        };

        if *method != "GET" {
            return Err(Error::InvalidHandshake(format!(
                "Expected GET method, got {}",
                method
            )));
        }

        if *http_version != "HTTP/1.1" {
            return Err(Error::InvalidHandshake(format!(
                "Expected HTTP/1.1, got {}",
                http_version
            )));
        }

        let headers = parse_headers(lines, &SINGLETON_HEADERS)?;

        let upgrade = required(&headers, "upgrade", "Upgrade")?;
        if !upgrade.eq_ignore_ascii_case("websocket") {
            return Err(Error::InvalidHandshake(format!(
                "Invalid Upgrade header: {}",
                upgrade
            )));
        }

        let connection = required(&headers, "connection", "Connection")?;
        if !connection
            .split(',')
            .any(|token| token.trim().eq_ignore_ascii_case("upgrade"))
        {
            return Err(Error::InvalidHandshake(format!(
                "Invalid Connection header: {}",
                connection
            )));
        }

        let host = required(&headers, "host", "Host")?.to_string();
        let key = required(&headers, "sec-websocket-key", "Sec-WebSocket-Key")?.to_string();

        let version_str = required(&headers, "sec-websocket-version", "Sec-WebSocket-Version")?;
        let version: u8 = version_str
            .parse()
            .map_err(|_| Error::InvalidHandshake(format!("Invalid version: {}", version_str)))?;

        let extensions = headers
            .get("sec-websocket-extensions")
            .map(|e| {
                e.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        Ok(Self {
            path: path.to_string(),
            host,
            key,
            version,
            extensions,
        })
    }

    /// Parse a request, rejecting data longer than `max_size`.
    ///
    /// # Errors
    ///
    /// - `Error::HandshakeTooLarge` if data exceeds max_size
    /// - Other handshake errors as per `parse()`
    pub fn parse_with_limit(data: &[u8], max_size: usize) -> Result<Self> {
        if data.len() > max_size {
            return Err(Error::HandshakeTooLarge {
                size: data.len(),
                max: max_size,
            });
        }
        Self::parse(data)
    }

    /// Validate the request according to RFC 6455.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidHandshake`] if the version is not 13, the key
    /// does not decode to exactly 16 bytes, or the `Host` header is empty.
    pub fn validate(&self) -> Result<()> {
        if self.version != 13 {
            return Err(Error::InvalidHandshake(format!(
                "Unsupported WebSocket version: {} (expected 13)",
                self.version
            )));
        }

        match BASE64.decode(&self.key) {
            Ok(decoded) if decoded.len() == 16 => {}
            Ok(decoded) => {
                return Err(Error::InvalidHandshake(format!(
                    "Sec-WebSocket-Key must be 16 bytes, got {}",
                    decoded.len()
                )));
            }
            Err(_) => {
                return Err(Error::InvalidHandshake(
                    "Invalid Sec-WebSocket-Key: not valid Base64".into(),
                ));
            }
        }

        if self.host.is_empty() {
            return Err(Error::InvalidHandshake("Host header cannot be empty".into()));
        }

        Ok(())
    }

    /// Serialize the request as a client would send it.
    ///
    /// # Errors
    /// Returns `Error::InvalidHeaderValue` if a field contains CR/LF.
    pub fn write(&self, buf: &mut Vec<u8>) -> Result<()> {
        validate_header_value("Host", &self.host)?;
        validate_header_value("Sec-WebSocket-Key", &self.key)?;
        buf.extend_from_slice(format!("GET {} HTTP/1.1\r\n", self.path).as_bytes());
        buf.extend_from_slice(format!("Host: {}\r\n", self.host).as_bytes());
        buf.extend_from_slice(b"Upgrade: websocket\r\n");
        buf.extend_from_slice(b"Connection: Upgrade\r\n");
        buf.extend_from_slice(format!("Sec-WebSocket-Key: {}\r\n", self.key).as_bytes());
        buf.extend_from_slice(format!("Sec-WebSocket-Version: {}\r\n", self.version).as_bytes());
        for ext in &self.extensions {
            validate_header_value("Sec-WebSocket-Extensions", ext)?;
            buf.extend_from_slice(format!("Sec-WebSocket-Extensions: {}\r\n", ext).as_bytes());
        }
        buf.extend_from_slice(b"\r\n");
        Ok(())
    }
}

/// `101 Switching Protocols` response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeResponse {
    /// The Sec-WebSocket-Accept value.
    pub accept: String,
    /// The accepted extension token, if any was negotiated.
    pub extension: Option<String>,
}

impl HandshakeResponse {
    /// Create a response for a validated request, without extensions.
    pub fn from_request(req: &HandshakeRequest) -> Self {
        Self {
            accept: compute_accept_key(&req.key),
            extension: None,
        }
    }

    /// Attach the accepted `Sec-WebSocket-Extensions` token.
    pub fn with_extension(mut self, token: impl Into<String>) -> Self {
        self.extension = Some(token.into());
        self
    }

    /// Write the HTTP response to a buffer.
    ///
    /// # Errors
    /// Returns `Error::InvalidHeaderValue` if the extension contains CR/LF.
    pub fn write(&self, buf: &mut Vec<u8>) -> Result<()> {
        buf.extend_from_slice(b"HTTP/1.1 101 Switching Protocols\r\n");
        buf.extend_from_slice(b"Upgrade: websocket\r\n");
        buf.extend_from_slice(b"Connection: Upgrade\r\n");
        buf.extend_from_slice(format!("Sec-WebSocket-Accept: {}\r\n", self.accept).as_bytes());

        if let Some(ref ext) = self.extension {
            validate_header_value("Sec-WebSocket-Extensions", ext)?;
            buf.extend_from_slice(format!("Sec-WebSocket-Extensions: {}\r\n", ext).as_bytes());
        }

        buf.extend_from_slice(b"\r\n");
        Ok(())
    }

    /// Parse a `101` response as a client receives it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidHandshake`] if the status is not 101, the
    /// `Upgrade`/`Connection` headers are wrong, or `Sec-WebSocket-Accept`
    /// is missing.
    pub fn parse(data: &[u8]) -> Result<Self> {
        let text = std::str::from_utf8(data)
            .map_err(|_| Error::InvalidHandshake("Invalid UTF-8".into()))?;

        let mut lines = text.lines();

        let status_line = lines
            .next()
            .ok_or_else(|| Error::InvalidHandshake("Empty response".into()))?;

        if !status_line.starts_with("HTTP/1.1 101") {
            return Err(Error::InvalidHandshake(format!(
                "Expected 101 status, got: {}",
                status_line
            )));
        }

        let headers = parse_headers(lines, &[])?;

        let upgrade = required(&headers, "upgrade", "Upgrade")?;
        if !upgrade.eq_ignore_ascii_case("websocket") {
            return Err(Error::InvalidHandshake(format!(
                "Invalid Upgrade header: {}",
                upgrade
            )));
        }

        let accept =
            required(&headers, "sec-websocket-accept", "Sec-WebSocket-Accept")?.to_string();
        let extension = headers.get("sec-websocket-extensions").cloned();

        Ok(Self { accept, extension })
    }
}

/// Write a `400 Bad Request` answer to a failed upgrade.
pub fn write_rejection(buf: &mut Vec<u8>, err: &Error) {
    let reason = err.to_string().replace(['\r', '\n'], " ");
    buf.extend_from_slice(b"HTTP/1.1 400 Bad Request\r\n");
    buf.extend_from_slice(b"Connection: close\r\n");
    buf.extend_from_slice(b"Sec-WebSocket-Version: 13\r\n");
    buf.extend_from_slice(b"Content-Type: text/plain; charset=utf-8\r\n");
    buf.extend_from_slice(format!("Content-Length: {}\r\n\r\n", reason.len()).as_bytes());
    buf.extend_from_slice(reason.as_bytes());
}

#[cfg(test)]
mod tests {
    use super::*;

    const UPGRADE: &[u8] = b"GET /chat HTTP/1.1\r\n\
        Host: server.example.com\r\n\
        Upgrade: websocket\r\n\
        Connection: Upgrade\r\n\
        Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\
        Sec-WebSocket-Version: 13\r\n\
        \r\n";

    fn valid_request() -> HandshakeRequest {
        HandshakeRequest {
            path: "/chat".to_string(),
            host: "example.com".to_string(),
            key: "dGhlIHNhbXBsZSBub25jZQ==".to_string(),
            version: 13,
            extensions: vec![],
        }
    }

    #[test]
    fn test_compute_accept_key_rfc_example() {
        let key = "dGhlIHNhbXBsZSBub25jZQ==";
        assert_eq!(compute_accept_key(key), "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=");
    }

    #[test]
    fn test_parse_valid_request() {
        let req = HandshakeRequest::parse(UPGRADE).unwrap();
        assert_eq!(req.path, "/chat");
        assert_eq!(req.host, "server.example.com");
        assert_eq!(req.key, "dGhlIHNhbXBsZSBub25jZQ==");
        assert_eq!(req.version, 13);
        assert!(req.extensions.is_empty());
        assert!(req.validate().is_ok());
    }

    #[test]
    fn test_parse_extension_offers() {
        let request = b"GET / HTTP/1.1\r\n\
            Host: x\r\n\
            Upgrade: websocket\r\n\
            Connection: keep-alive, Upgrade\r\n\
            Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\
            Sec-WebSocket-Version: 13\r\n\
            Sec-WebSocket-Extensions: permessage-deflate; client_max_window_bits, x-foo\r\n\
            Sec-WebSocket-Extensions: permessage-deflate\r\n\
            \r\n";

        let req = HandshakeRequest::parse(request).unwrap();
        assert_eq!(
            req.extensions,
            vec![
                "permessage-deflate; client_max_window_bits",
                "x-foo",
                "permessage-deflate"
            ]
        );
    }

    #[test]
    fn test_parse_request_missing_key() {
        let request = b"GET /chat HTTP/1.1\r\n\
            Host: server.example.com\r\n\
            Upgrade: websocket\r\n\
            Connection: Upgrade\r\n\
            Sec-WebSocket-Version: 13\r\n\
            \r\n";

        let err = HandshakeRequest::parse(request).unwrap_err();
        assert!(matches!(err, Error::InvalidHandshake(msg) if msg.contains("Sec-WebSocket-Key")));
    }

    #[test]
    fn test_parse_request_missing_upgrade() {
        let request = b"GET /chat HTTP/1.1\r\n\
            Host: server.example.com\r\n\
            Connection: Upgrade\r\n\
            Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\
            Sec-WebSocket-Version: 13\r\n\
            \r\n";

        let err = HandshakeRequest::parse(request).unwrap_err();
        assert!(matches!(err, Error::InvalidHandshake(msg) if msg.contains("Upgrade")));
    }

    #[test]
    fn test_connection_header_needs_upgrade_token() {
        let request = b"GET / HTTP/1.1\r\n\
            Host: x\r\n\
            Upgrade: websocket\r\n\
            Connection: keep-alive\r\n\
            Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\
            Sec-WebSocket-Version: 13\r\n\
            \r\n";

        let err = HandshakeRequest::parse(request).unwrap_err();
        assert!(matches!(err, Error::InvalidHandshake(msg) if msg.contains("Connection")));
    }

    #[test]
    fn test_validate_request() {
        assert!(valid_request().validate().is_ok());

        let short_key = HandshakeRequest {
            key: "c2hvcnQ=".to_string(),
            ..valid_request()
        };
        assert!(short_key.validate().is_err());

        let not_base64 = HandshakeRequest {
            key: "!!!".to_string(),
            ..valid_request()
        };
        assert!(not_base64.validate().is_err());

        let wrong_version = HandshakeRequest {
            version: 8,
            ..valid_request()
        };
        assert!(matches!(
            wrong_version.validate(),
            Err(Error::InvalidHandshake(msg)) if msg.contains("version")
        ));
    }

    #[test]
    fn test_case_insensitive_headers() {
        let request = b"GET /chat HTTP/1.1\r\n\
            HOST: server.example.com\r\n\
            UPGRADE: WebSocket\r\n\
            CONNECTION: upgrade\r\n\
            SEC-WEBSOCKET-KEY: dGhlIHNhbXBsZSBub25jZQ==\r\n\
            SEC-WEBSOCKET-VERSION: 13\r\n\
            \r\n";

        let req = HandshakeRequest::parse(request).unwrap();
        assert_eq!(req.host, "server.example.com");
        assert!(req.validate().is_ok());
    }

    #[test]
    fn test_duplicate_host_header_rejected() {
        let request = b"GET / HTTP/1.1\r\n\
Host: example.com\r\n\
Host: evil.com\r\n\
Upgrade: websocket\r\n\
Connection: Upgrade\r\n\
Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\
Sec-WebSocket-Version: 13\r\n\r\n";

        assert!(matches!(
            HandshakeRequest::parse(request),
            Err(Error::InvalidHandshake(msg)) if msg.contains("Duplicate")
        ));
    }

    #[test]
    fn test_invalid_request_line() {
        let post = b"POST /chat HTTP/1.1\r\nHost: x\r\n\r\n";
        assert!(matches!(
            HandshakeRequest::parse(post),
            Err(Error::InvalidHandshake(msg)) if msg.contains("GET")
        ));

        let http10 = b"GET /chat HTTP/1.0\r\nHost: x\r\n\r\n";
        assert!(matches!(
            HandshakeRequest::parse(http10),
            Err(Error::InvalidHandshake(msg)) if msg.contains("HTTP/1.1")
        ));

        assert!(HandshakeRequest::parse(b"garbage\r\n\r\n").is_err());
    }

    #[test]
    fn test_handshake_size_limit() {
        let large_data = vec![b'A'; 10000];
        assert!(matches!(
            HandshakeRequest::parse_with_limit(&large_data, 8192),
            Err(Error::HandshakeTooLarge { .. })
        ));
        assert!(HandshakeRequest::parse_with_limit(UPGRADE, 8192).is_ok());
    }

    #[test]
    fn test_response_write_with_extension() {
        let resp = HandshakeResponse::from_request(&valid_request())
            .with_extension("permessage-deflate; server_no_context_takeover");

        let mut buf = Vec::new();
        resp.write(&mut buf).unwrap();
        let text = String::from_utf8(buf).unwrap();

        assert!(text.starts_with("HTTP/1.1 101 Switching Protocols\r\n"));
        assert!(text.contains("Sec-WebSocket-Accept: s3pPLMBiTxaQ9kYGzzhZRbK+xOo=\r\n"));
        assert!(text.contains(
            "Sec-WebSocket-Extensions: permessage-deflate; server_no_context_takeover\r\n"
        ));
        assert!(text.ends_with("\r\n\r\n"));
    }

    #[test]
    fn test_response_without_extension() {
        let mut buf = Vec::new();
        HandshakeResponse::from_request(&valid_request())
            .write(&mut buf)
            .unwrap();
        let text = String::from_utf8(buf).unwrap();
        assert!(!text.contains("Sec-WebSocket-Extensions"));
    }

    #[test]
    fn test_crlf_in_extension_rejected() {
        let resp = HandshakeResponse::from_request(&valid_request())
            .with_extension("permessage-deflate\nX-Evil: bad");
        let mut buf = Vec::new();
        assert!(matches!(
            resp.write(&mut buf),
            Err(Error::InvalidHeaderValue { .. })
        ));
    }

    #[test]
    fn test_client_request_roundtrip() {
        let req = HandshakeRequest::new("localhost:8080", "/")
            .unwrap()
            .with_extension("permessage-deflate; client_max_window_bits");
        let mut buf = Vec::new();
        req.write(&mut buf).unwrap();

        let parsed = HandshakeRequest::parse(&buf).unwrap();
        assert!(parsed.validate().is_ok());
        assert_eq!(parsed, req);

        let mut resp_buf = Vec::new();
        HandshakeResponse::from_request(&parsed)
            .with_extension("permessage-deflate")
            .write(&mut resp_buf)
            .unwrap();
        let resp = HandshakeResponse::parse(&resp_buf).unwrap();
        assert_eq!(resp.accept, compute_accept_key(&req.key));
        assert_eq!(resp.extension.as_deref(), Some("permessage-deflate"));
    }

    #[test]
    fn test_parse_response_rejects_other_status() {
        let response = b"HTTP/1.1 400 Bad Request\r\nConnection: close\r\n\r\n";
        assert!(matches!(
            HandshakeResponse::parse(response),
            Err(Error::InvalidHandshake(msg)) if msg.contains("101")
        ));
    }

    #[test]
    fn test_rejection_response() {
        let mut buf = Vec::new();
        write_rejection(&mut buf, &Error::InvalidHandshake("Missing Host header".into()));
        let text = String::from_utf8(buf).unwrap();
        assert!(text.starts_with("HTTP/1.1 400 Bad Request\r\n"));
        assert!(text.contains("Connection: close\r\n"));
        assert!(text.ends_with("Missing Host header"));
    }
}
