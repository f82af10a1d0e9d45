//! HTTP/1.1 request heads and the WebSocket opening handshake (RFC 6455 Section 4).
//!
//! The relay validates upgrade requests that arrive through its HTTP router.
//! The client half (request builder, head reader, response check) is used by
//! the load-test harness.

use std::collections::HashMap;

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use bytes::BytesMut;
use sha1::{Digest, Sha1};
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::config::Limits;
use crate::error::{Error, Result};

/// GUID appended to the client key before hashing.
pub const WS_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Headers that may appear at most once in an upgrade request.
const SINGLE_VALUED: [&str; 5] = [
    "host",
    "upgrade",
    "connection",
    "sec-websocket-key",
    "sec-websocket-version",
];

/// Offset just past the blank line ending an HTTP head, if present.
#[must_use]
pub fn find_head_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n").map(|pos| pos + 4)
}

/// Read from `stream` until a complete HTTP head has arrived.
///
/// Returns the head (blank line included) and any bytes that followed it.
///
/// # Errors
///
/// - `Error::HandshakeTooLarge` once more than `limits.max_handshake_size`
///   bytes arrive without a blank line
/// - `Error::ConnectionClosed(None)` if the stream ends first
/// - `Error::Io` on read failure
pub async fn read_http_head<S>(stream: &mut S, limits: &Limits) -> Result<(BytesMut, BytesMut)>
where
    S: AsyncRead + Unpin,
{
    let mut buf = BytesMut::with_capacity(1024);
    loop {
        if let Some(end) = find_head_end(&buf) {
            let head = buf.split_to(end);
            return Ok((head, buf));
        }
        limits.check_handshake_size(buf.len())?;
        if stream.read_buf(&mut buf).await? == 0 {
            return Err(Error::ConnectionClosed(None));
        }
    }
}

/// `Base64(SHA-1(key + GUID))`.
///
/// ```
/// use wsrelay::transport::compute_accept_key;
///
/// assert_eq!(
///     compute_accept_key("dGhlIHNhbXBsZSBub25jZQ=="),
///     "s3pPLMBiTxaQ9kYGzzhZRbK+xOo="
/// );
/// ```
#[must_use]
pub fn compute_accept_key(key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(key.as_bytes());
    hasher.update(WS_GUID.as_bytes());
    BASE64.encode(hasher.finalize())
}

/// Fresh random `Sec-WebSocket-Key` (16 random bytes, Base64).
///
/// # Errors
///
/// Returns `Error::Io` if the OS random source fails.
pub fn generate_key() -> Result<String> {
    let mut nonce = [0u8; 16];
    getrandom::getrandom(&mut nonce).map_err(|e| Error::Io(e.to_string()))?;
    Ok(BASE64.encode(nonce))
}

fn insert_header(
    headers: &mut HashMap<String, String>,
    name: &str,
    value: &str,
    single_valued: &[&str],
) -> Result<()> {
    let name = name.trim().to_ascii_lowercase();
    if single_valued.contains(&name.as_str()) && headers.contains_key(&name) {
        return Err(Error::InvalidHandshake(format!("Duplicate header: {name}")));
    }
    headers.insert(name, value.trim().to_string());
    Ok(())
}

fn parse_headers<'a>(
    lines: impl Iterator<Item = &'a str>,
    single_valued: &[&str],
) -> Result<HashMap<String, String>> {
    let mut headers = HashMap::new();

    for line in lines {
        if line.is_empty() {
            break;
        }
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        insert_header(&mut headers, name, value, single_valued)?;
    }

    Ok(headers)
}

fn strip_query(target: &str) -> String {
    target.split('?').next().unwrap_or(target).to_string()
}

/// Request line and headers of one HTTP/1.1 request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestHead {
    pub method: String,
    /// Target without the query string.
    pub path: String,
    headers: HashMap<String, String>,
}

impl RequestHead {
    /// Parse a request head (everything up to and including the blank line).
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidHandshake` for non-UTF-8 input, a malformed
    /// request line, a version other than HTTP/1.1, or a duplicated
    /// upgrade-related header.
    pub fn parse(data: &[u8]) -> Result<Self> {
        let text = std::str::from_utf8(data)
            .map_err(|_| Error::InvalidHandshake("Invalid UTF-8".into()))?;
        let mut lines = text.lines();

        let request_line = lines
            .next()
            .ok_or_else(|| Error::InvalidHandshake("Empty request".into()))?;
        let parts: Vec<&str> = request_line.split_whitespace().collect();
        let [method, target, version] = parts[..] else {
            return Err(Error::InvalidHandshake(format!(
                "Invalid request line: {request_line}"
            )));
        };
        if !version.starts_with("HTTP/1.1") {
            return Err(Error::InvalidHandshake(format!(
                "Expected HTTP/1.1, got {version}"
            )));
        }

        let headers = parse_headers(lines, &SINGLE_VALUED)?;

        Ok(Self {
            method: method.to_string(),
            path: strip_query(target),
            headers,
        })
    }

    /// Build a head from an already-parsed request, one `(name, value)` pair
    /// per header line.
    ///
    /// # Errors
    ///
    /// `Error::InvalidHandshake` if an upgrade-related header appears twice.
    pub fn from_parts<'a>(
        method: &str,
        target: &str,
        headers: impl IntoIterator<Item = (&'a str, &'a str)>,
    ) -> Result<Self> {
        let mut map = HashMap::new();
        for (name, value) in headers {
            insert_header(&mut map, name, value, &SINGLE_VALUED)?;
        }
        Ok(Self {
            method: method.to_string(),
            path: strip_query(target),
            headers: map,
        })
    }

    /// Parse with an upper bound on the head size.
    ///
    /// # Errors
    ///
    /// `Error::HandshakeTooLarge` when `data` exceeds `max_size`, otherwise as [`RequestHead::parse`].
    pub fn parse_with_limit(data: &[u8], max_size: usize) -> Result<Self> {
        if data.len() > max_size {
            return Err(Error::HandshakeTooLarge {
                size: data.len(),
                max: max_size,
            });
        }
        Self::parse(data)
    }

    /// Case-insensitive header lookup.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    /// `Upgrade: websocket` together with a `Connection` header listing `upgrade`.
    #[must_use]
    pub fn is_websocket_upgrade(&self) -> bool {
        let upgrade = self
            .header("upgrade")
            .is_some_and(|v| v.eq_ignore_ascii_case("websocket"));
        let connection = self.header("connection").is_some_and(|v| {
            v.split(',')
                .any(|token| token.trim().eq_ignore_ascii_case("upgrade"))
        });
        upgrade && connection
    }
}

/// Validated client upgrade request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeRequest {
    pub path: String,
    pub host: String,
    pub key: String,
    pub version: u8,
}

impl HandshakeRequest {
    /// Extract and validate the upgrade fields of `head`.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidHandshake` if the method is not GET, a required
    /// header is missing, the version is not 13, or the key does not decode
    /// to 16 bytes.
    pub fn from_head(head: &RequestHead) -> Result<Self> {
        if head.method != "GET" {
            return Err(Error::InvalidHandshake(format!(
                "Expected GET method, got {}",
                head.method
            )));
        }
        if !head.is_websocket_upgrade() {
            return Err(Error::InvalidHandshake(
                "Missing Upgrade/Connection headers".into(),
            ));
        }

        let required = |name: &str| {
            head.header(name)
                .map(str::to_string)
                .ok_or_else(|| Error::InvalidHandshake(format!("Missing {name} header")))
        };
        let host = required("host")?;
        let key = required("sec-websocket-key")?;
        let version_str = required("sec-websocket-version")?;
        let version: u8 = version_str
            .parse()
            .map_err(|_| Error::InvalidHandshake(format!("Invalid version: {version_str}")))?;

        let request = Self {
            path: head.path.clone(),
            host,
            key,
            version,
        };
        request.validate()?;
        Ok(request)
    }

    /// # Errors
    ///
    /// `Error::InvalidHandshake` if the version is not 13, the key is not a
    /// Base64 16-byte nonce, or the host is empty.
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

    /// Serialize a client upgrade request.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        format!(
            "GET {} HTTP/1.1\r\n\
             Host: {}\r\n\
             Upgrade: websocket\r\n\
             Connection: Upgrade\r\n\
             Sec-WebSocket-Key: {}\r\n\
             Sec-WebSocket-Version: {}\r\n\
             \r\n",
            self.path, self.host, self.key, self.version
        )
        .into_bytes()
    }
}

/// Server's `101 Switching Protocols` answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeResponse {
    pub accept: String,
}

impl HandshakeResponse {
    #[must_use]
    pub fn from_request(req: &HandshakeRequest) -> Self {
        Self {
            accept: compute_accept_key(&req.key),
        }
    }

    pub fn write(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(b"HTTP/1.1 101 Switching Protocols\r\n");
        buf.extend_from_slice(b"Upgrade: websocket\r\n");
        buf.extend_from_slice(b"Connection: Upgrade\r\n");
        buf.extend_from_slice(format!("Sec-WebSocket-Accept: {}\r\n", self.accept).as_bytes());
        buf.extend_from_slice(b"\r\n");
    }

    /// Parse a server response head.
    ///
    /// # Errors
    ///
    /// `Error::InvalidHandshake` if the status is not 101 or the upgrade
    /// headers or `Sec-WebSocket-Accept` are missing.
    pub fn parse(data: &[u8]) -> Result<Self> {
        let text = std::str::from_utf8(data)
            .map_err(|_| Error::InvalidHandshake("Invalid UTF-8".into()))?;
        let mut lines = text.lines();

        let status_line = lines
            .next()
            .ok_or_else(|| Error::InvalidHandshake("Empty response".into()))?;
        if !status_line.starts_with("HTTP/1.1 101") {
            return Err(Error::InvalidHandshake(format!(
                "Expected 101 status, got: {status_line}"
            )));
        }

        let headers = parse_headers(lines, &[])?;
        let upgrade_ok = headers
            .get("upgrade")
            .is_some_and(|v| v.eq_ignore_ascii_case("websocket"));
        if !upgrade_ok {
            return Err(Error::InvalidHandshake(
                "Missing or invalid Upgrade header in response".into(),
            ));
        }
        let accept = headers
            .get("sec-websocket-accept")
            .ok_or_else(|| Error::InvalidHandshake("Missing Sec-WebSocket-Accept header".into()))?
            .clone();

        Ok(Self { accept })
    }

    /// Check the accept value against the key we sent.
    ///
    /// # Errors
    ///
    /// `Error::InvalidHandshake` on mismatch.
    pub fn verify(&self, key: &str) -> Result<()> {
        if self.accept != compute_accept_key(key) {
            return Err(Error::InvalidHandshake(
                "Sec-WebSocket-Accept does not match key".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const UPGRADE: &[u8] = b"GET /ws?room=1 HTTP/1.1\r\n\
        Host: localhost:8080\r\n\
        Upgrade: websocket\r\n\
        Connection: keep-alive, Upgrade\r\n\
        Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\
        Sec-WebSocket-Version: 13\r\n\
        \r\n";

    #[test]
    fn test_compute_accept_key_rfc_example() {
        assert_eq!(
            compute_accept_key("dGhlIHNhbXBsZSBub25jZQ=="),
            "s3pPLMBiTxaQ9kYGzzhZRbK+xOo="
        );
    }

    #[test]
    fn test_generate_key_is_16_byte_nonce() {
        let key = generate_key().unwrap();
        assert_eq!(BASE64.decode(&key).unwrap().len(), 16);
        assert_ne!(key, generate_key().unwrap());
    }

    #[test]
    fn test_parse_upgrade_head() {
        let head = RequestHead::parse(UPGRADE).unwrap();
        assert_eq!(head.method, "GET");
        assert_eq!(head.path, "/ws");
        assert_eq!(head.header("HOST"), Some("localhost:8080"));
        assert!(head.is_websocket_upgrade());

        let req = HandshakeRequest::from_head(&head).unwrap();
        assert_eq!(req.key, "dGhlIHNhbXBsZSBub25jZQ==");
        assert_eq!(req.version, 13);
    }

    #[test]
    fn test_plain_get_is_not_upgrade() {
        let head = RequestHead::parse(b"GET /index.html HTTP/1.1\r\nHost: x\r\n\r\n").unwrap();
        assert!(!head.is_websocket_upgrade());
        assert!(HandshakeRequest::from_head(&head).is_err());
    }

    #[test]
    fn test_duplicate_key_rejected() {
        let data = b"GET /ws HTTP/1.1\r\n\
            Sec-WebSocket-Key: a\r\n\
            Sec-WebSocket-Key: b\r\n\
            \r\n";
        assert!(matches!(
            RequestHead::parse(data),
            Err(Error::InvalidHandshake(msg)) if msg.contains("Duplicate")
        ));
    }

    #[test]
    fn test_head_from_parts() {
        let head = RequestHead::from_parts(
            "GET",
            "/ws?token=1",
            [
                ("Host", "localhost:8080"),
                ("Upgrade", "websocket"),
                ("Connection", "Upgrade"),
                ("Sec-WebSocket-Key", "dGhlIHNhbXBsZSBub25jZQ=="),
                ("Sec-WebSocket-Version", "13"),
            ],
        )
        .unwrap();
        assert_eq!(head.path, "/ws");
        assert!(head.is_websocket_upgrade());
        assert_eq!(HandshakeRequest::from_head(&head).unwrap().version, 13);

        let twice = RequestHead::from_parts("GET", "/ws", [("upgrade", "websocket"), ("Upgrade", "h2c")]);
        assert!(matches!(twice, Err(Error::InvalidHandshake(msg)) if msg.contains("upgrade")));
    }

    #[test]
    fn test_bad_request_line() {
        assert!(RequestHead::parse(b"GET\r\n\r\n").is_err());
        assert!(RequestHead::parse(b"GET / HTTP/1.0\r\n\r\n").is_err());
    }

    #[test]
    fn test_validate_rules() {
        let valid = HandshakeRequest {
            path: "/ws".into(),
            host: "example.com".into(),
            key: "dGhlIHNhbXBsZSBub25jZQ==".into(),
            version: 13,
        };
        assert!(valid.validate().is_ok());

        let short_key = HandshakeRequest {
            key: "c2hvcnQ=".into(),
            ..valid.clone()
        };
        assert!(short_key.validate().is_err());

        let old_version = HandshakeRequest {
            version: 8,
            ..valid.clone()
        };
        assert!(old_version.validate().is_err());
    }

    #[test]
    fn test_head_size_limit() {
        assert_eq!(
            RequestHead::parse_with_limit(UPGRADE, 16),
            Err(Error::HandshakeTooLarge {
                size: UPGRADE.len(),
                max: 16
            })
        );
    }

    #[test]
    fn test_response_write_and_verify() {
        let head = RequestHead::parse(UPGRADE).unwrap();
        let req = HandshakeRequest::from_head(&head).unwrap();
        let mut buf = Vec::new();
        HandshakeResponse::from_request(&req).write(&mut buf);

        assert_eq!(find_head_end(&buf), Some(buf.len()));
        let resp = HandshakeResponse::parse(&buf).unwrap();
        assert_eq!(resp.accept, "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=");
        assert!(resp.verify(&req.key).is_ok());
        assert!(resp.verify("AAAAAAAAAAAAAAAAAAAAAA==").is_err());
    }

    #[test]
    fn test_response_wrong_status() {
        let resp = HandshakeResponse::parse(b"HTTP/1.1 404 Not Found\r\n\r\n");
        assert!(matches!(resp, Err(Error::InvalidHandshake(msg)) if msg.contains("101")));
    }

    #[tokio::test]
    async fn test_read_http_head_keeps_trailing_bytes() {
        let mut input: &[u8] = b"GET / HTTP/1.1\r\nHost: x\r\n\r\n\x81\x00";
        let (head, rest) = read_http_head(&mut input, &Limits::default()).await.unwrap();
        assert!(head.ends_with(b"\r\n\r\n"));
        assert_eq!(&rest[..], b"\x81\x00");
    }

    #[tokio::test]
    async fn test_read_http_head_limits() {
        let tight = Limits {
            max_handshake_size: 16,
            ..Limits::default()
        };
        let mut endless: &[u8] = &[b'a'; 64];
        assert!(matches!(
            read_http_head(&mut endless, &tight).await,
            Err(Error::HandshakeTooLarge { max: 16, .. })
        ));

        let mut truncated: &[u8] = b"GET / HTTP/1.1\r\n";
        assert_eq!(
            read_http_head(&mut truncated, &Limits::default()).await,
            Err(Error::ConnectionClosed(None))
        );
    }

    #[test]
    fn test_client_request_parses_back() {
        let req = HandshakeRequest {
            path: "/ws".into(),
            host: "127.0.0.1:8080".into(),
            key: generate_key().unwrap(),
            version: 13,
        };
        let head = RequestHead::parse(&req.to_bytes()).unwrap();
        assert_eq!(HandshakeRequest::from_head(&head).unwrap(), req);
    }
}
