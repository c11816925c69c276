/// Upstream wire protocol (§6 External Interfaces).
///
/// The front-end speaks JSON messages framed by `Content-Length: N\r\n\r\n`,
/// same framing as DAP. This module only needs the three generic message
/// kinds — request, response, event — reduced to `serde_json::Value`
/// bodies; translating specific DAP request/response shapes is C6's job.
/// The framing code itself is grounded on the teacher pack's DAP adapter
/// (`probe-rs`'s `debug_adapter::protocol`), ported from blocking
/// `Read`/`Write` to tokio's async I/O.
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed Content-Length header: {0:?}")]
    BadHeader(String),
    #[error("malformed JSON body: {0}")]
    BadJson(#[from] serde_json::Error),
    #[error("connection closed")]
    Closed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub seq: i64,
    #[serde(rename = "type")]
    pub type_: String,
    pub command: String,
    #[serde(default)]
    pub arguments: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    pub seq: i64,
    #[serde(rename = "type")]
    pub type_: String,
    pub request_seq: i64,
    pub success: bool,
    pub command: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub seq: i64,
    #[serde(rename = "type")]
    pub type_: String,
    pub event: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct TypeProbe {
    #[serde(rename = "type")]
    type_: String,
}

/// Reads/writes framed JSON messages over a pair of async streams. Not
/// `Clone`; callers that need concurrent read+write hold the reader and
/// writer halves separately (see `lib.rs`'s session loop).
pub struct FramedWriter<W> {
    output: W,
    seq: i64,
}

impl<W: AsyncWrite + Unpin> FramedWriter<W> {
    pub fn new(output: W) -> Self {
        FramedWriter { output, seq: 1 }
    }

    async fn send_raw(&mut self, body: &[u8]) -> Result<(), ProtocolError> {
        let header = format!("Content-Length: {}\r\n\r\n", body.len());
        self.output.write_all(header.as_bytes()).await?;
        self.output.write_all(body).await?;
        self.output.flush().await?;
        self.seq += 1;
        Ok(())
    }

    pub async fn send_response(
        &mut self,
        request: &Request,
        result: Result<Option<serde_json::Value>, String>,
    ) -> Result<(), ProtocolError> {
        let response = match result {
            Ok(body) => Response {
                seq: self.seq,
                type_: "response".to_string(),
                request_seq: request.seq,
                success: true,
                command: request.command.clone(),
                message: None,
                body,
            },
            Err(message) => Response {
                seq: self.seq,
                type_: "response".to_string(),
                request_seq: request.seq,
                success: false,
                command: request.command.clone(),
                message: Some(message),
                body: None,
            },
        };
        let encoded = serde_json::to_vec(&response)?;
        self.send_raw(&encoded).await
    }

    pub async fn send_event(
        &mut self,
        event: &str,
        body: Option<serde_json::Value>,
    ) -> Result<(), ProtocolError> {
        let event = Event {
            seq: self.seq,
            type_: "event".to_string(),
            event: event.to_string(),
            body,
        };
        let encoded = serde_json::to_vec(&event)?;
        self.send_raw(&encoded).await
    }
}

pub struct FramedReader<R> {
    input: BufReader<R>,
}

impl<R: AsyncRead + Unpin> FramedReader<R> {
    pub fn new(input: R) -> Self {
        FramedReader {
            input: BufReader::new(input),
        }
    }

    /// Reads one framed message; returns `Ok(None)` only if the caller
    /// should retry (never happens on the async path, but kept for parity
    /// with the header-then-body protocol shape), `Err(Closed)` on EOF.
    pub async fn read_request(&mut self) -> Result<Request, ProtocolError> {
        let body = self.read_frame().await?;
        let probe: TypeProbe = serde_json::from_slice(&body)?;
        if probe.type_ != "request" {
            return Err(ProtocolError::BadHeader(format!(
                "expected a request message, got type '{}'",
                probe.type_
            )));
        }
        Ok(serde_json::from_slice(&body)?)
    }

    async fn read_frame(&mut self) -> Result<Vec<u8>, ProtocolError> {
        let mut header = String::new();
        let n = self.input.read_line(&mut header).await?;
        if n == 0 {
            return Err(ProtocolError::Closed);
        }

        // The header line is followed by a blank CRLF-terminated line per
        // the Content-Length framing convention.
        let mut blank = String::new();
        self.input.read_line(&mut blank).await?;

        let content_length = parse_content_length(&header)
            .ok_or_else(|| ProtocolError::BadHeader(header.trim_end().to_string()))?;

        let mut buf = vec![0u8; content_length];
        self.input.read_exact(&mut buf).await?;
        Ok(buf)
    }
}

fn parse_content_length(header: &str) -> Option<usize> {
    let mut parts = header.trim_end().split_ascii_whitespace();
    if parts.next()? != "Content-Length:" {
        return None;
    }
    parts.next()?.parse::<usize>().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn reads_one_framed_request() {
        let content = r#"{"seq":3,"type":"request","command":"initialize","arguments":{}}"#;
        let input = format!("Content-Length: {}\r\n\r\n{}", content.len(), content);
        let mut reader = FramedReader::new(input.as_bytes());

        let request = reader.read_request().await.unwrap();
        assert_eq!(request.seq, 3);
        assert_eq!(request.command, "initialize");
    }

    #[tokio::test]
    async fn rejects_non_request_type() {
        let content = r#"{"seq":3,"type":"response","command":"initialize"}"#;
        let input = format!("Content-Length: {}\r\n\r\n{}", content.len(), content);
        let mut reader = FramedReader::new(input.as_bytes());

        assert!(reader.read_request().await.is_err());
    }

    #[tokio::test]
    async fn eof_reports_closed() {
        let mut reader = FramedReader::new(&b""[..]);
        assert!(matches!(
            reader.read_request().await,
            Err(ProtocolError::Closed)
        ));
    }

    #[tokio::test]
    async fn writes_response_then_event_with_monotonic_seq() {
        let mut buf = Vec::new();
        {
            let mut writer = FramedWriter::new(&mut buf);
            let request = Request {
                seq: 1,
                type_: "request".to_string(),
                command: "threads".to_string(),
                arguments: serde_json::Value::Null,
            };
            writer
                .send_response(&request, Ok(Some(serde_json::json!({"threads": []}))))
                .await
                .unwrap();
            writer.send_event("stopped", None).await.unwrap();
        }
        let text = String::from_utf8(buf).unwrap();
        assert!(text.contains("\"command\":\"threads\""));
        assert!(text.contains("\"event\":\"stopped\""));
    }
}
