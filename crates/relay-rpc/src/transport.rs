//! Content-Length framing shared by both channels.
//!
//! A frame is one or more `Key: Value\r\n` header lines, a blank line,
//! then exactly `Content-Length` bytes of UTF-8 JSON.

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;

use crate::error::RpcError;

const CONTENT_LENGTH: &str = "Content-Length";

/// Frame a serialized JSON body with its header.
pub fn frame(body: &[u8]) -> Vec<u8> {
    let header = format!("{CONTENT_LENGTH}: {}\r\n\r\n", body.len());
    let mut bytes = Vec::with_capacity(header.len() + body.len());
    bytes.extend_from_slice(header.as_bytes());
    bytes.extend_from_slice(body);
    bytes
}

/// Parse one `Key: Value` header line (without line terminator).
///
/// Returns the Content-Length if this line carries it, `None` for any
/// other well-formed header.
pub fn parse_header_line(line: &str) -> Result<Option<usize>, RpcError> {
    let (key, value) = line
        .split_once(':')
        .ok_or_else(|| RpcError::Protocol(format!("malformed header line: {line:?}")))?;
    if !key.trim().eq_ignore_ascii_case(CONTENT_LENGTH) {
        return Ok(None);
    }
    let value = value.trim();
    value
        .parse::<usize>()
        .map(Some)
        .map_err(|_| RpcError::Protocol(format!("invalid Content-Length: {value}")))
}

/// Read one frame.
///
/// Returns `Ok(None)` on a clean end of stream between frames.
pub async fn read_frame<R>(reader: &mut R) -> Result<Option<serde_json::Value>, RpcError>
where
    R: AsyncBufRead + Unpin,
{
    let mut content_length: Option<usize> = None;
    let mut saw_header = false;
    let mut line = String::new();

    loop {
        line.clear();
        if reader.read_line(&mut line).await? == 0 {
            if saw_header {
                return Err(RpcError::Protocol("stream ended inside header".into()));
            }
            return Ok(None);
        }
        let trimmed = line.trim_end_matches(['\r', '\n']);
        if trimmed.is_empty() {
            if saw_header {
                break;
            }
            // Stray line break between frames.
            continue;
        }
        saw_header = true;
        if let Some(len) = parse_header_line(trimmed)? {
            content_length = Some(len);
        }
    }

    let length =
        content_length.ok_or_else(|| RpcError::Protocol("missing Content-Length header".into()))?;
    let mut body = vec![0u8; length];
    reader.read_exact(&mut body).await?;

    serde_json::from_slice(&body)
        .map(Some)
        .map_err(|e| RpcError::Protocol(format!("invalid JSON body: {e}")))
}

/// Serializes concurrent writers onto one output stream.
///
/// The lock is held across header, body and flush so frames from
/// different callers never interleave.
pub struct FrameWriter {
    inner: Mutex<Box<dyn AsyncWrite + Send + Unpin>>,
}

impl FrameWriter {
    pub fn new<W>(writer: W) -> Self
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self {
            inner: Mutex::new(Box::new(writer)),
        }
    }

    /// Write one JSON message as a frame.
    pub async fn write(&self, message: &serde_json::Value) -> Result<(), RpcError> {
        let body = serde_json::to_vec(message)
            .map_err(|e| RpcError::Protocol(format!("cannot serialize message: {e}")))?;
        let header = format!("{CONTENT_LENGTH}: {}\r\n\r\n", body.len());

        let mut out = self.inner.lock().await;
        out.write_all(header.as_bytes()).await?;
        out.write_all(&body).await?;
        out.flush().await?;
        Ok(())
    }
}

impl std::fmt::Debug for FrameWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameWriter").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::io::BufReader;

    #[test]
    fn frame_has_exact_length() {
        let framed = frame(b"hello world");
        assert_eq!(
            String::from_utf8(framed).unwrap(),
            "Content-Length: 11\r\n\r\nhello world"
        );
    }

    #[test]
    fn header_line_parsing() {
        assert_eq!(parse_header_line("Content-Length: 42").unwrap(), Some(42));
        assert_eq!(parse_header_line("content-length:7").unwrap(), Some(7));
        assert_eq!(
            parse_header_line("Content-Type: application/vscode-jsonrpc").unwrap(),
            None
        );
        assert!(parse_header_line("garbage").is_err());
        assert!(parse_header_line("Content-Length: abc").is_err());
    }

    #[tokio::test]
    async fn reads_consecutive_frames() {
        let mut data = frame(br#"{"seq":1}"#);
        data.extend(frame(br#"{"seq":2}"#));
        let mut reader = BufReader::new(&data[..]);

        assert_eq!(read_frame(&mut reader).await.unwrap(), Some(json!({"seq": 1})));
        assert_eq!(read_frame(&mut reader).await.unwrap(), Some(json!({"seq": 2})));
        assert_eq!(read_frame(&mut reader).await.unwrap(), None);
    }

    #[tokio::test]
    async fn extra_headers_are_ignored() {
        let data = b"Content-Type: application/json\r\nContent-Length: 2\r\n\r\n{}";
        let mut reader = BufReader::new(&data[..]);
        assert_eq!(read_frame(&mut reader).await.unwrap(), Some(json!({})));
    }

    #[tokio::test]
    async fn utf8_body_uses_byte_length() {
        let body = r#"{"name":"héllo"}"#.as_bytes();
        let data = frame(body);
        let mut reader = BufReader::new(&data[..]);
        let value = read_frame(&mut reader).await.unwrap().unwrap();
        assert_eq!(value["name"], "héllo");
    }

    #[tokio::test]
    async fn missing_content_length_is_error() {
        let data = b"X-Other: 1\r\n\r\n{}";
        let mut reader = BufReader::new(&data[..]);
        let err = read_frame(&mut reader).await.unwrap_err();
        assert!(err.to_string().contains("missing Content-Length"));
    }

    #[tokio::test]
    async fn short_body_is_transport_error() {
        let data = b"Content-Length: 100\r\n\r\n{\"short\":true}";
        let mut reader = BufReader::new(&data[..]);
        assert!(matches!(
            read_frame(&mut reader).await,
            Err(RpcError::Transport(_))
        ));
    }

    #[tokio::test]
    async fn writer_output_is_readable() {
        let (client, server) = tokio::io::duplex(1024);
        let writer = FrameWriter::new(client);
        writer.write(&json!({"method": "ping"})).await.unwrap();
        drop(writer);

        let mut reader = BufReader::new(server);
        let value = read_frame(&mut reader).await.unwrap().unwrap();
        assert_eq!(value["method"], "ping");
    }
}
