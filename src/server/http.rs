//! Pre-upgrade HTTP handling.
//!
//! The inspector listener answers two very different things on one port:
//! plain `GET /json*` discovery requests and RFC 6455 upgrades. Neither the
//! WebSocket layer nor an HTTP framework covers that split cleanly, so the
//! request head is read and parsed here, the response (JSON body, error, or
//! `101 Switching Protocols`) is written raw, and only then does the socket
//! hand over to the WebSocket state machine.
//!
//! Non-upgrade responses are HTTP/1.0-style: `Connection: close`, one
//! request per socket.

// ============================================================================
// Imports
// ============================================================================

use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, ReadBuf};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::handshake::derive_accept_key;

use crate::error::{Error, Result};

// ============================================================================
// Constants
// ============================================================================

/// How long a socket may take to deliver its complete request head.
pub(crate) const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

/// Upper bound on the request head; anything larger is not a devtools
/// frontend.
const MAX_HEAD_BYTES: usize = 8 * 1024;

// ============================================================================
// RequestHead
// ============================================================================

/// A parsed HTTP/1.1 request head.
#[derive(Debug)]
pub(crate) struct RequestHead {
    /// Request method, e.g. `GET`.
    pub method: String,
    /// Raw request target, query string included.
    pub target: String,
    /// Header name/value pairs in arrival order.
    pub headers: Vec<(String, String)>,
}

impl RequestHead {
    /// Request path with any query string discarded. Matching is
    /// case-sensitive per the discovery contract.
    pub fn path(&self) -> &str {
        match self.target.split_once('?') {
            Some((path, _query)) => path,
            None => &self.target,
        }
    }

    /// First header with the given name, compared case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Validates the WebSocket upgrade headers and returns the
    /// `Sec-WebSocket-Key` when the request is a well-formed upgrade.
    ///
    /// Requires `Upgrade: websocket`, a `Connection` token list containing
    /// `upgrade`, and a non-empty key.
    pub fn websocket_key(&self) -> Option<&str> {
        let upgrade = self.header("upgrade")?;
        if !upgrade.trim().eq_ignore_ascii_case("websocket") {
            return None;
        }
        let connection = self.header("connection")?;
        let has_upgrade_token = connection
            .split(',')
            .any(|token| token.trim().eq_ignore_ascii_case("upgrade"));
        if !has_upgrade_token {
            return None;
        }
        self.header("sec-websocket-key")
            .map(str::trim)
            .filter(|key| !key.is_empty())
    }
}

// ============================================================================
// Head Reading
// ============================================================================

/// Reads one request head off `stream`, returning it together with any
/// bytes that arrived after the terminating blank line.
///
/// The leftover matters: a fast client may pipeline its first WebSocket
/// frame behind the upgrade request, and those bytes must reach the framing
/// layer, not the floor.
pub(crate) async fn read_request_head<S>(stream: &mut S) -> Result<(RequestHead, Vec<u8>)>
where
    S: AsyncRead + Unpin,
{
    let outcome = timeout(HANDSHAKE_TIMEOUT, async {
        let mut buffer: Vec<u8> = Vec::with_capacity(512);
        let mut chunk = [0u8; 1024];
        loop {
            if let Some(end) = find_head_end(&buffer) {
                let leftover = buffer.split_off(end);
                buffer.truncate(end - 4);
                let head = parse_request_head(&buffer)?;
                return Ok((head, leftover));
            }
            if buffer.len() > MAX_HEAD_BYTES {
                return Err(Error::handshake("request head exceeds 8 KiB"));
            }
            let read = stream.read(&mut chunk).await?;
            if read == 0 {
                return Err(Error::handshake("connection closed before request head"));
            }
            buffer.extend_from_slice(&chunk[..read]);
        }
    })
    .await;

    match outcome {
        Ok(result) => result,
        Err(_elapsed) => Err(Error::handshake("timed out reading request head")),
    }
}

/// Index one past the `\r\n\r\n` terminator, if present.
fn find_head_end(buffer: &[u8]) -> Option<usize> {
    buffer
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .map(|i| i + 4)
}

/// Parses the request line and headers. Obsolete line folding is rejected.
fn parse_request_head(head: &[u8]) -> Result<RequestHead> {
    let text = std::str::from_utf8(head)
        .map_err(|_| Error::handshake("request head is not valid UTF-8"))?;
    let mut lines = text.split("\r\n");

    let request_line = lines
        .next()
        .ok_or_else(|| Error::handshake("empty request"))?;
    let mut parts = request_line.split(' ');
    let method = parts
        .next()
        .filter(|m| !m.is_empty())
        .ok_or_else(|| Error::handshake("missing request method"))?;
    let target = parts
        .next()
        .filter(|t| !t.is_empty())
        .ok_or_else(|| Error::handshake("missing request target"))?;
    match parts.next() {
        Some(version) if version.starts_with("HTTP/1.") => {}
        _ => return Err(Error::handshake("unsupported HTTP version")),
    }

    let mut headers = Vec::new();
    for line in lines {
        if line.is_empty() {
            continue;
        }
        if line.starts_with(' ') || line.starts_with('\t') {
            return Err(Error::handshake("obsolete header line folding"));
        }
        let Some((name, value)) = line.split_once(':') else {
            return Err(Error::handshake("malformed header line"));
        };
        headers.push((name.trim().to_string(), value.trim().to_string()));
    }

    Ok(RequestHead {
        method: method.to_string(),
        target: target.to_string(),
        headers,
    })
}

// ============================================================================
// Response Builders
// ============================================================================

/// `200 OK` with a JSON body, closing the connection.
pub(crate) fn json_response(body: &str) -> String {
    format!(
        "HTTP/1.0 200 OK\r\n\
         Content-Type: application/json; charset=UTF-8\r\n\
         Cache-Control: no-cache\r\n\
         Content-Length: {}\r\n\
         Connection: close\r\n\
         \r\n\
         {}",
        body.len(),
        body
    )
}

/// A plain-text error response, closing the connection.
pub(crate) fn plain_response(status: u16, reason: &str, body: &str) -> String {
    format!(
        "HTTP/1.0 {status} {reason}\r\n\
         Content-Type: text/plain; charset=UTF-8\r\n\
         Cache-Control: no-cache\r\n\
         Content-Length: {}\r\n\
         Connection: close\r\n\
         \r\n\
         {}",
        body.len(),
        body
    )
}

/// `101 Switching Protocols` for a validated upgrade.
///
/// No `Sec-WebSocket-Protocol` header: the inspector protocol does not
/// negotiate a subprotocol, and frontends reject one they did not ask for.
pub(crate) fn upgrade_response(websocket_key: &str) -> String {
    format!(
        "HTTP/1.1 101 Switching Protocols\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Accept: {}\r\n\
         \r\n",
        derive_accept_key(websocket_key.as_bytes())
    )
}

// ============================================================================
// PrefixedStream
// ============================================================================

/// A stream that replays buffered bytes before reading from the socket.
///
/// Used to hand the WebSocket layer any frame bytes that arrived in the
/// same segments as the upgrade request head.
pub(crate) struct PrefixedStream<S> {
    prefix: Vec<u8>,
    consumed: usize,
    inner: S,
}

impl<S> PrefixedStream<S> {
    pub(crate) fn new(prefix: Vec<u8>, inner: S) -> Self {
        Self {
            prefix,
            consumed: 0,
            inner,
        }
    }
}

impl<S: AsyncRead + Unpin> AsyncRead for PrefixedStream<S> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        if self.consumed < self.prefix.len() {
            let remaining = &self.prefix[self.consumed..];
            let take = remaining.len().min(buf.remaining());
            buf.put_slice(&remaining[..take]);
            self.consumed += take;
            return Poll::Ready(Ok(()));
        }
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for PrefixedStream<S> {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        Pin::new(&mut self.inner).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use tokio::io::AsyncReadExt;

    use super::*;

    fn parse(text: &str) -> RequestHead {
        parse_request_head(text.as_bytes()).expect("head should parse")
    }

    #[test]
    fn test_parse_request_line_and_headers() {
        let head = parse("GET /json/list HTTP/1.1\r\nHost: localhost:9229\r\nAccept: */*");
        assert_eq!(head.method, "GET");
        assert_eq!(head.path(), "/json/list");
        assert_eq!(head.header("host"), Some("localhost:9229"));
        assert_eq!(head.header("HOST"), Some("localhost:9229"));
        assert_eq!(head.header("x-missing"), None);
    }

    #[test]
    fn test_path_discards_query_string() {
        let head = parse("GET /abc-def?experiments=true HTTP/1.1\r\nHost: x");
        assert_eq!(head.path(), "/abc-def");
    }

    #[test]
    fn test_websocket_key_requires_all_three_headers() {
        let full = parse(
            "GET /id HTTP/1.1\r\nUpgrade: websocket\r\nConnection: keep-alive, Upgrade\r\n\
             Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==",
        );
        assert_eq!(full.websocket_key(), Some("dGhlIHNhbXBsZSBub25jZQ=="));

        let no_upgrade =
            parse("GET /id HTTP/1.1\r\nConnection: Upgrade\r\nSec-WebSocket-Key: abc");
        assert_eq!(no_upgrade.websocket_key(), None);

        let wrong_connection = parse(
            "GET /id HTTP/1.1\r\nUpgrade: websocket\r\nConnection: close\r\nSec-WebSocket-Key: abc",
        );
        assert_eq!(wrong_connection.websocket_key(), None);

        let no_key = parse("GET /id HTTP/1.1\r\nUpgrade: websocket\r\nConnection: Upgrade");
        assert_eq!(no_key.websocket_key(), None);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(parse_request_head(b"").is_err());
        assert!(parse_request_head(b"GET").is_err());
        assert!(parse_request_head(b"GET /x SPDY/3").is_err());
        assert!(parse_request_head(b"GET /x HTTP/1.1\r\nbroken-header-line").is_err());
        assert!(parse_request_head(b"GET /x HTTP/1.1\r\nA: b\r\n folded").is_err());
    }

    #[test]
    fn test_upgrade_response_uses_rfc_sample_accept_hash() {
        // Key/accept pair from RFC 6455 section 1.3.
        let response = upgrade_response("dGhlIHNhbXBsZSBub25jZQ==");
        assert!(response.starts_with("HTTP/1.1 101 Switching Protocols\r\n"));
        assert!(response.contains("Sec-WebSocket-Accept: s3pPLMBiTxaQ9kYGzzhZRbK+xOo=\r\n"));
        assert!(!response.contains("Sec-WebSocket-Protocol"));
    }

    #[test]
    fn test_json_response_headers() {
        let response = json_response("[]");
        assert!(response.starts_with("HTTP/1.0 200 OK\r\n"));
        assert!(response.contains("Content-Type: application/json; charset=UTF-8\r\n"));
        assert!(response.contains("Cache-Control: no-cache\r\n"));
        assert!(response.contains("Content-Length: 2\r\n"));
        assert!(response.contains("Connection: close\r\n"));
        assert!(response.ends_with("\r\n\r\n[]"));
    }

    #[tokio::test]
    async fn test_read_request_head_keeps_pipelined_bytes() {
        let raw = b"GET /json HTTP/1.1\r\nHost: x\r\n\r\n\x81\x85extra".to_vec();
        let mut stream = std::io::Cursor::new(raw);
        let (head, leftover) = read_request_head(&mut stream).await.expect("parse");
        assert_eq!(head.path(), "/json");
        assert_eq!(leftover, b"\x81\x85extra");
    }

    #[tokio::test]
    async fn test_read_request_head_rejects_early_close() {
        let mut stream = std::io::Cursor::new(b"GET /json HTT".to_vec());
        let err = read_request_head(&mut stream).await.unwrap_err();
        assert!(matches!(err, Error::HandshakeFailed { .. }));
    }

    #[tokio::test]
    async fn test_prefixed_stream_replays_prefix_first() {
        let inner = std::io::Cursor::new(b"socket".to_vec());
        let mut stream = PrefixedStream::new(b"head".to_vec(), inner);
        let mut out = Vec::new();
        stream.read_to_end(&mut out).await.unwrap();
        assert_eq!(out, b"headsocket");
    }
}
