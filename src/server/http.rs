// src/server/http.rs
//
// Just enough HTTP/1.1 for GET endpoints and a Server-Sent Events stream.
// Every response closes the connection; no keep-alive, no request bodies.

use serde::Serialize;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Upper bound on request line plus headers
pub const MAX_HEAD_LEN: usize = 8 * 1024;

/// Idle clients that never finish their request are dropped after this
pub const HEAD_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Error, Debug)]
pub enum HttpError {
    /// Peer closed before sending a complete request head
    #[error("connection closed before request")]
    Closed,

    #[error("request head exceeds 8 KiB")]
    TooLarge,

    #[error("timed out waiting for request")]
    Timeout,

    #[error("malformed request: {0}")]
    Malformed(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RequestHead {
    pub method: String,
    /// Path without query string
    pub path: String,
}

// ============================================================================
// Request Parsing
// ============================================================================

/// Read until the blank line ending the head and parse the request line.
/// Headers are read but not interpreted.
pub async fn read_request_head<R: AsyncRead + Unpin>(
    reader: &mut R,
) -> Result<RequestHead, HttpError> {
    match tokio::time::timeout(HEAD_TIMEOUT, read_head_bytes(reader)).await {
        Ok(Ok(bytes)) => parse_request_head(&bytes),
        Ok(Err(e)) => Err(e),
        Err(_) => Err(HttpError::Timeout),
    }
}

async fn read_head_bytes<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Vec<u8>, HttpError> {
    let mut buf = Vec::with_capacity(1024);
    let mut chunk = [0u8; 1024];
    loop {
        let n = reader.read(&mut chunk).await?;
        if n == 0 {
            return Err(HttpError::Closed);
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(end) = find_head_end(&buf) {
            buf.truncate(end);
            return Ok(buf);
        }
        if buf.len() > MAX_HEAD_LEN {
            return Err(HttpError::TooLarge);
        }
    }
}

fn find_head_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n")
}

/// Parse `METHOD /path?query HTTP/1.x` from the head bytes
pub fn parse_request_head(bytes: &[u8]) -> Result<RequestHead, HttpError> {
    let text = std::str::from_utf8(bytes)
        .map_err(|_| HttpError::Malformed("request head is not UTF-8".to_string()))?;
    let line = text.lines().next().unwrap_or("");

    let mut parts = line.split_whitespace();
    let (method, target, version) = match (parts.next(), parts.next(), parts.next()) {
        (Some(m), Some(t), Some(v)) => (m, t, v),
        _ => return Err(HttpError::Malformed(format!("bad request line '{}'", line))),
    };
    if !version.starts_with("HTTP/1.") {
        return Err(HttpError::Malformed(format!("unsupported version '{}'", version)));
    }
    if !target.starts_with('/') {
        return Err(HttpError::Malformed(format!("bad target '{}'", target)));
    }

    let path = target.split(['?', '#']).next().unwrap_or(target);
    Ok(RequestHead {
        method: method.to_ascii_uppercase(),
        path: path.to_string(),
    })
}

// ============================================================================
// Responses
// ============================================================================

pub fn reason_phrase(status: u16) -> &'static str {
    match status {
        200 => "OK",
        204 => "No Content",
        400 => "Bad Request",
        404 => "Not Found",
        405 => "Method Not Allowed",
        408 => "Request Timeout",
        431 => "Request Header Fields Too Large",
        _ => "Internal Server Error",
    }
}

const CORS_HEADERS: &str = "Access-Control-Allow-Origin: *\r\n\
     Access-Control-Allow-Methods: GET, OPTIONS\r\n\
     Access-Control-Allow-Headers: *\r\n";

/// Write a complete JSON response
pub async fn write_json<W, T>(writer: &mut W, status: u16, body: &T) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize + ?Sized,
{
    let body = serde_json::to_vec(body)?;
    let head = format!(
        "HTTP/1.1 {} {}\r\n\
         Content-Type: application/json\r\n\
         Content-Length: {}\r\n\
         {}\
         Connection: close\r\n\r\n",
        status,
        reason_phrase(status),
        body.len(),
        CORS_HEADERS
    );
    writer.write_all(head.as_bytes()).await?;
    writer.write_all(&body).await?;
    writer.flush().await
}

/// Bodiless response, used for CORS preflight
pub async fn write_empty<W: AsyncWrite + Unpin>(writer: &mut W, status: u16) -> std::io::Result<()> {
    let head = format!(
        "HTTP/1.1 {} {}\r\n\
         Content-Length: 0\r\n\
         {}\
         Connection: close\r\n\r\n",
        status,
        reason_phrase(status),
        CORS_HEADERS
    );
    writer.write_all(head.as_bytes()).await?;
    writer.flush().await
}

/// Response head for an event stream. The body runs until either side closes.
pub async fn write_event_stream_head<W: AsyncWrite + Unpin>(writer: &mut W) -> std::io::Result<()> {
    let head = format!(
        "HTTP/1.1 200 OK\r\n\
         Content-Type: text/event-stream\r\n\
         Cache-Control: no-cache\r\n\
         {}\
         Connection: keep-alive\r\n\r\n",
        CORS_HEADERS
    );
    writer.write_all(head.as_bytes()).await?;
    writer.flush().await
}

/// One `data: <json>` event
pub async fn write_event<W, T>(writer: &mut W, data: &T) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize + ?Sized,
{
    let mut event = Vec::with_capacity(160);
    event.extend_from_slice(b"data: ");
    serde_json::to_writer(&mut event, data)?;
    event.extend_from_slice(b"\n\n");
    writer.write_all(&event).await?;
    writer.flush().await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_request_line() {
        let head = parse_request_head(b"GET /api/lidar HTTP/1.1\r\nHost: pi:5000").unwrap();
        assert_eq!(head.method, "GET");
        assert_eq!(head.path, "/api/lidar");
    }

    #[test]
    fn test_parse_strips_query() {
        let head = parse_request_head(b"get /api/lidar/stream?t=123 HTTP/1.0").unwrap();
        assert_eq!(head.method, "GET");
        assert_eq!(head.path, "/api/lidar/stream");
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(matches!(
            parse_request_head(b"hello"),
            Err(HttpError::Malformed(_))
        ));
        assert!(matches!(
            parse_request_head(b"GET /x SPDY/3"),
            Err(HttpError::Malformed(_))
        ));
        assert!(matches!(
            parse_request_head(b"GET http://x/ HTTP/1.1"),
            Err(HttpError::Malformed(_))
        ));
    }

    #[tokio::test]
    async fn test_read_head_across_chunks() {
        let (mut client, mut server) = tokio::io::duplex(64);
        let writer = tokio::spawn(async move {
            for part in ["GET /api/st", "atus HTTP/1.1\r\n", "Host: x\r\n", "\r\n"] {
                client.write_all(part.as_bytes()).await.unwrap();
                tokio::task::yield_now().await;
            }
            client
        });
        let head = read_request_head(&mut server).await.unwrap();
        assert_eq!(head.path, "/api/status");
        drop(writer.await.unwrap());
    }

    #[tokio::test]
    async fn test_read_head_closed_early() {
        let (mut client, mut server) = tokio::io::duplex(64);
        client.write_all(b"GET / HTTP/1.1\r\n").await.unwrap();
        drop(client);
        assert!(matches!(
            read_request_head(&mut server).await,
            Err(HttpError::Closed)
        ));
    }

    #[tokio::test]
    async fn test_read_head_too_large() {
        let (mut client, mut server) = tokio::io::duplex(MAX_HEAD_LEN * 2);
        let mut big = b"GET / HTTP/1.1\r\nX-Pad: ".to_vec();
        big.resize(MAX_HEAD_LEN + 100, b'a');
        client.write_all(&big).await.unwrap();
        assert!(matches!(
            read_request_head(&mut server).await,
            Err(HttpError::TooLarge)
        ));
    }

    #[tokio::test]
    async fn test_json_response_format() {
        let mut out = Vec::new();
        write_json(&mut out, 404, &serde_json::json!({"error": "not found"}))
            .await
            .unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("HTTP/1.1 404 Not Found\r\n"));
        assert!(text.contains("Access-Control-Allow-Origin: *\r\n"));
        assert!(text.contains("Content-Length: 21\r\n"));
        assert!(text.ends_with("\r\n\r\n{\"error\":\"not found\"}"));
    }

    #[tokio::test]
    async fn test_event_format() {
        let mut out = Vec::new();
        write_event(&mut out, &serde_json::json!({"distanceCm": 5}))
            .await
            .unwrap();
        assert_eq!(out, b"data: {\"distanceCm\":5}\n\n");
    }
}
