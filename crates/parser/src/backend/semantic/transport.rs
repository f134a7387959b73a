//! `Content-Length` framed JSON-RPC over a byte stream.

use serde_json::Value;
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot};

const MAX_MESSAGE_BYTES: usize = if cfg!(test) { 64 * 1024 } else { 64 * 1024 * 1024 };
const MAX_HEADER_BYTES: usize = 8 * 1024;
const READ_CHUNK_BYTES: usize = 16 * 1024;

fn find_double_newline(buf: &[u8]) -> Option<usize> {
    // Prefer CRLFCRLF, fall back to LFLF.
    if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
        return Some(pos + 4);
    }
    buf.windows(2).position(|w| w == b"\n\n").map(|pos| pos + 2)
}

fn parse_content_length(headers: &str) -> Option<usize> {
    const PREFIX: &str = "content-length:";
    headers.lines().find_map(|raw_line| {
        let line = raw_line.trim_end_matches('\r').trim();
        if line.len() < PREFIX.len() || !line.as_bytes()[..PREFIX.len()].eq_ignore_ascii_case(PREFIX.as_bytes()) {
            return None;
        }
        line[PREFIX.len()..].trim().parse::<usize>().ok()
    })
}

fn invalid(msg: impl Into<String>) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg.into())
}

/// Frame a message for the wire.
pub fn encode_frame(message: &Value) -> io::Result<Vec<u8>> {
    let body = serde_json::to_vec(message).map_err(|e| invalid(e.to_string()))?;
    let mut frame = format!("Content-Length: {}\r\n\r\n", body.len()).into_bytes();
    frame.extend_from_slice(&body);
    Ok(frame)
}

/// Incremental decoder over an async reader.
pub struct FrameReader<R> {
    read: R,
    buf: Vec<u8>,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(read: R) -> Self {
        Self {
            read,
            buf: Vec::new(),
        }
    }

    /// Next message, or `None` on a clean end of stream.
    pub async fn next_message(&mut self) -> io::Result<Option<Value>> {
        loop {
            if let Some(message) = self.try_decode()? {
                return Ok(Some(message));
            }

            let mut chunk = [0u8; READ_CHUNK_BYTES];
            let n = self.read.read(&mut chunk).await?;
            if n == 0 {
                if self.buf.iter().all(u8::is_ascii_whitespace) {
                    return Ok(None);
                }
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "stream ended inside a frame",
                ));
            }
            self.buf.extend_from_slice(&chunk[..n]);
        }
    }

    fn try_decode(&mut self) -> io::Result<Option<Value>> {
        let Some(header_end) = find_double_newline(&self.buf) else {
            if self.buf.len() > MAX_HEADER_BYTES {
                return Err(invalid("header block too large"));
            }
            return Ok(None);
        };

        let headers = std::str::from_utf8(&self.buf[..header_end]).map_err(|e| invalid(e.to_string()))?;
        let len = parse_content_length(headers).ok_or_else(|| invalid("missing Content-Length header"))?;
        if len > MAX_MESSAGE_BYTES {
            return Err(invalid(format!(
                "Content-Length {len} exceeds maximum supported message size {MAX_MESSAGE_BYTES}"
            )));
        }
        if self.buf.len() < header_end + len {
            return Ok(None);
        }

        let message = serde_json::from_slice(&self.buf[header_end..header_end + len])
            .map_err(|e| invalid(e.to_string()));
        self.buf.drain(..header_end + len);
        message.map(Some)
    }
}

pub struct WriteRequest {
    pub bytes: Vec<u8>,
    pub reply: oneshot::Sender<io::Result<()>>,
}

/// Serialize all writes through one task; stops after the first write error.
pub async fn run_write_loop<W: AsyncWrite + Unpin>(mut write: W, mut rx: mpsc::Receiver<WriteRequest>) {
    while let Some(req) = rx.recv().await {
        let result = async {
            write.write_all(&req.bytes).await?;
            write.flush().await?;
            Ok(())
        }
        .await;
        let should_stop = result.is_err();
        let _ = req.reply.send(result);
        if should_stop {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn content_length_is_case_insensitive() {
        assert_eq!(parse_content_length("content-length: 12\r\n\r\n"), Some(12));
        assert_eq!(
            parse_content_length("Content-Type: x\r\nCONTENT-LENGTH:7\r\n"),
            Some(7)
        );
        assert_eq!(parse_content_length("Content-Type: x\r\n"), None);
    }

    #[tokio::test]
    async fn decodes_split_and_back_to_back_frames() {
        let mut wire = encode_frame(&json!({"id": 1})).unwrap();
        wire.extend(encode_frame(&json!({"id": 2})).unwrap());

        let (mut client, server) = tokio::io::duplex(8);
        let writer = tokio::spawn(async move {
            client.write_all(&wire).await.unwrap();
        });

        let mut reader = FrameReader::new(server);
        assert_eq!(reader.next_message().await.unwrap(), Some(json!({"id": 1})));
        assert_eq!(reader.next_message().await.unwrap(), Some(json!({"id": 2})));
        writer.await.unwrap();
        assert_eq!(reader.next_message().await.unwrap(), None);
    }

    #[tokio::test]
    async fn rejects_oversized_frames() {
        let header = format!("Content-Length: {}\r\n\r\n", MAX_MESSAGE_BYTES + 1);
        let mut reader = FrameReader::new(header.as_bytes());
        let err = reader.next_message().await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[tokio::test]
    async fn truncated_frame_is_unexpected_eof() {
        let mut reader = FrameReader::new(&b"Content-Length: 10\r\n\r\n{\"a\""[..]);
        let err = reader.next_message().await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }
}
