//! JSON-RPC 2.0 message types and stdio framing.
//!
//! Two framings are supported per server entry: line-delimited JSON and
//! LSP-style `Content-Length` headers. The decoder handles both even within
//! a mixed stream: each message starts a fresh detection, and anything
//! without a header falls back to line mode.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Protocol version sent in `initialize`.
pub const PROTOCOL_VERSION: &str = "2024-11-05";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FramingMode {
    /// One JSON-RPC message per `\n`-terminated line.
    #[default]
    Line,
    /// `Content-Length: <n>\r\n\r\n` followed by `n` bytes.
    LengthPrefixed,
}

#[derive(Debug, Serialize)]
pub struct JsonRpcRequest<'a> {
    pub jsonrpc: &'static str,
    pub id: u64,
    pub method: &'a str,
    pub params: Value,
}

impl<'a> JsonRpcRequest<'a> {
    pub fn new(id: u64, method: &'a str, params: Value) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            method,
            params,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct JsonRpcNotification<'a> {
    pub jsonrpc: &'static str,
    pub method: &'a str,
    pub params: Value,
}

impl<'a> JsonRpcNotification<'a> {
    pub fn new(method: &'a str, params: Value) -> Self {
        Self {
            jsonrpc: "2.0",
            method,
            params,
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct RpcErrorBody {
    pub code: i64,
    pub message: String,
    #[serde(default)]
    pub data: Option<Value>,
}

/// Incoming message: response (id + result/error) or server-initiated
/// request/notification (method).
#[derive(Clone, Debug, Deserialize)]
pub struct IncomingMessage {
    #[serde(default)]
    pub id: Option<Value>,
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<RpcErrorBody>,
}

impl IncomingMessage {
    /// Numeric response id, if this is a response to one of our requests.
    pub fn response_id(&self) -> Option<u64> {
        match &self.id {
            Some(Value::Number(n)) if self.method.is_none() => n.as_u64(),
            _ => None,
        }
    }
}

/// Encodes one serialized JSON payload per the framing mode.
pub fn encode_frame(mode: FramingMode, payload: &str) -> Vec<u8> {
    match mode {
        FramingMode::Line => {
            let mut out = payload.as_bytes().to_vec();
            out.push(b'\n');
            out
        }
        FramingMode::LengthPrefixed => {
            let mut out = format!("Content-Length: {}\r\n\r\n", payload.len()).into_bytes();
            out.extend_from_slice(payload.as_bytes());
            out
        }
    }
}

/// Incremental frame decoder over a raw byte stream.
#[derive(Default)]
pub struct FrameDecoder {
    buf: Vec<u8>,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Extracts the next complete message payload, if any.
    pub fn next_frame(&mut self) -> Option<String> {
        loop {
            // Skip inter-message whitespace so header detection anchors on
            // real content.
            let start = self
                .buf
                .iter()
                .position(|b| !b.is_ascii_whitespace())
                .unwrap_or(self.buf.len());
            if start > 0 {
                self.buf.drain(..start);
            }
            if self.buf.is_empty() {
                return None;
            }

            if let Some(frame) = self.try_length_prefixed() {
                return Some(frame);
            }
            if self.looks_length_prefixed() {
                // Header present but body incomplete.
                return None;
            }

            // Line mode fallback.
            let nl = self.buf.iter().position(|&b| b == b'\n')?;
            let line: Vec<u8> = self.buf.drain(..=nl).collect();
            let text = String::from_utf8_lossy(&line).trim().to_string();
            if text.is_empty() {
                continue;
            }
            return Some(text);
        }
    }

    fn looks_length_prefixed(&self) -> bool {
        let head = &self.buf[..self.buf.len().min(16)];
        let head = String::from_utf8_lossy(head).to_ascii_lowercase();
        "content-length:".starts_with(&head) || head.starts_with("content-length:")
    }

    fn try_length_prefixed(&mut self) -> Option<String> {
        let head = String::from_utf8_lossy(&self.buf[..self.buf.len().min(16)]).to_ascii_lowercase();
        if !head.starts_with("content-length:") {
            return None;
        }
        let header_end = find_subslice(&self.buf, b"\r\n\r\n")?;
        let header = String::from_utf8_lossy(&self.buf[..header_end]);
        let len: usize = header
            .split(':')
            .nth(1)?
            .trim()
            .parse()
            .ok()?;
        let body_start = header_end + 4;
        if self.buf.len() < body_start + len {
            return None;
        }
        let body = self.buf[body_start..body_start + len].to_vec();
        self.buf.drain(..body_start + len);
        Some(String::from_utf8_lossy(&body).into_owned())
    }
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|w| w == needle)
}
