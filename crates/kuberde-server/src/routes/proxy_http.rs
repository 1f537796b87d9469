//! Minimal HTTP/1.1 framing over an opaque byte stream, used solely to
//! carry one proxied request/response across a tunnel stream (spec
//! §4.1 item 3: "write the HTTP request through it to the agent, and
//! write the response back... Non-keepalive transport per request is
//! acceptable"). This is deliberately not a general HTTP client: one
//! request, one response, then the stream is dropped.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use kuberde_types::CoreError;

pub async fn write_request<S: AsyncWrite + Unpin>(
    stream: &mut S,
    method: &axum::http::Method,
    path_and_query: &str,
    headers: &axum::http::HeaderMap,
    body: &[u8],
) -> Result<(), CoreError> {
    let mut head = format!("{method} {path_and_query} HTTP/1.1\r\n");
    for (name, value) in headers.iter() {
        if let Ok(v) = value.to_str() {
            head.push_str(&format!("{name}: {v}\r\n"));
        }
    }
    if !headers.contains_key(axum::http::header::CONTENT_LENGTH) {
        head.push_str(&format!("content-length: {}\r\n", body.len()));
    }
    head.push_str("connection: close\r\n\r\n");

    stream.write_all(head.as_bytes()).await.map_err(|e| CoreError::BadGateway(e.to_string()))?;
    stream.write_all(body).await.map_err(|e| CoreError::BadGateway(e.to_string()))?;
    stream.flush().await.map_err(|e| CoreError::BadGateway(e.to_string()))?;
    Ok(())
}

pub struct RawResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

/// Reads a full HTTP/1.1 response: the status line and headers, then
/// the body (by `Content-Length` when present, else by reading to EOF,
/// matching the "non-keepalive" framing this module assumes).
pub async fn read_response<S: AsyncRead + Unpin>(stream: &mut S) -> Result<RawResponse, CoreError> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    let header_end = loop {
        if let Some(pos) = find_header_end(&buf) {
            break pos;
        }
        let n = stream.read(&mut chunk).await.map_err(|e| CoreError::BadGateway(e.to_string()))?;
        if n == 0 {
            return Err(CoreError::BadGateway("agent closed connection before sending headers".into()));
        }
        buf.extend_from_slice(&chunk[..n]);
    };

    let head = String::from_utf8_lossy(&buf[..header_end]).to_string();
    let mut lines = head.split("\r\n");
    let status_line = lines.next().unwrap_or_default();
    let status = status_line.split_whitespace().nth(1).and_then(|s| s.parse::<u16>().ok()).unwrap_or(502);

    let mut headers = Vec::new();
    let mut content_length: Option<usize> = None;
    for line in lines {
        if let Some((name, value)) = line.split_once(':') {
            let name = name.trim().to_string();
            let value = value.trim().to_string();
            if name.eq_ignore_ascii_case("content-length") {
                content_length = value.parse().ok();
            }
            headers.push((name, value));
        }
    }

    let body_start = header_end + 4;
    let mut body = buf[body_start..].to_vec();

    match content_length {
        Some(len) => {
            while body.len() < len {
                let n = stream.read(&mut chunk).await.map_err(|e| CoreError::BadGateway(e.to_string()))?;
                if n == 0 {
                    break;
                }
                body.extend_from_slice(&chunk[..n]);
            }
            body.truncate(len);
        }
        None => loop {
            let n = stream.read(&mut chunk).await.map_err(|e| CoreError::BadGateway(e.to_string()))?;
            if n == 0 {
                break;
            }
            body.extend_from_slice(&chunk[..n]);
        },
    }

    Ok(RawResponse { status, headers, body })
}

fn find_header_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn reads_response_with_content_length() {
        let raw = b"HTTP/1.1 200 OK\r\ncontent-type: text/plain\r\ncontent-length: 5\r\n\r\nhello";
        let mut cursor = std::io::Cursor::new(raw.to_vec());
        let resp = read_response(&mut cursor).await.unwrap();
        assert_eq!(resp.status, 200);
        assert_eq!(resp.body, b"hello");
        assert!(resp.headers.iter().any(|(k, v)| k.eq_ignore_ascii_case("content-type") && v == "text/plain"));
    }

    #[tokio::test]
    async fn reads_response_to_eof_without_content_length() {
        let raw = b"HTTP/1.1 204 No Content\r\n\r\n";
        let mut cursor = std::io::Cursor::new(raw.to_vec());
        let resp = read_response(&mut cursor).await.unwrap();
        assert_eq!(resp.status, 204);
        assert!(resp.body.is_empty());
    }
}
