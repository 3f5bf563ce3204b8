//! LSPスタイルのContent-Lengthヘッダーによるメッセージフレーミング
//!
//! ヘッダー行の終端は常に `\r\n`。本文は宣言された長さだけ読み、
//! 行区切りには一切依存しない。

use log::debug;
use regex::Regex;
use serde_json::Value;
use std::sync::OnceLock;

use super::transport::Transport;
use super::types::{Request, Response};
use crate::error::{HarnessError, HarnessResult};

/// Header line terminator used by both halves of a connection
pub const LINE_TERMINATOR: &str = "\r\n";

pub const CONTENT_LENGTH: &str = "Content-Length";

/// ヘッダーブロック（先頭の空行を含む）の最大行数
const MAX_HEADER_LINES: usize = 32;

/// 受け付ける本文の最大バイト数
pub const MAX_BODY_BYTES: usize = 64 * 1024 * 1024;

fn header_regex() -> &'static Regex {
    static HEADER: OnceLock<Regex> = OnceLock::new();
    HEADER.get_or_init(|| {
        Regex::new(r"^([A-Za-z0-9-]+):[ \t]*(.*?)[ \t]*$").expect("header regex is valid")
    })
}

/// A decoded frame: its headers and the raw body bytes
#[derive(Debug, Clone, PartialEq)]
pub struct FramedMessage {
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl FramedMessage {
    /// Case-insensitive header lookup
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Parse the body as JSON
    pub fn json(&self) -> HarnessResult<Value> {
        serde_json::from_slice(&self.body)
            .map_err(|e| HarnessError::Decode(format!("body is not valid JSON: {}", e)))
    }
}

/// Prefix a body with its `Content-Length` header block
pub fn encode_frame(body: &[u8]) -> Vec<u8> {
    let header = format!(
        "{}: {}{}{}",
        CONTENT_LENGTH,
        body.len(),
        LINE_TERMINATOR,
        LINE_TERMINATOR
    );

    let mut frame = Vec::with_capacity(header.len() + body.len());
    frame.extend_from_slice(header.as_bytes());
    frame.extend_from_slice(body);
    frame
}

/// Encode a request as a compact JSON body inside a frame
///
/// The body is the serde form of [`Request`]:
/// `{"jsonrpc":"2.0","id":<id>,"method":<method>,"params":<params>}`
/// with no insignificant whitespace.
pub fn encode(method: &str, params: &Value, id: u64) -> Vec<u8> {
    let request = Request::new(id, method, params.clone());
    // String, u64, Value だけなのでシリアライズは失敗しない
    let body = serde_json::to_vec(&request).expect("request serializes to JSON");
    encode_frame(&body)
}

/// Parse a `Content-Length` value as a non-negative decimal integer
fn parse_content_length(value: &str) -> HarnessResult<usize> {
    if value.is_empty() || !value.bytes().all(|b| b.is_ascii_digit()) {
        return Err(HarnessError::Framing(format!(
            "Content-Length is not a non-negative integer: {:?}",
            value
        )));
    }
    value
        .parse::<usize>()
        .map_err(|_| HarnessError::Framing(format!("Content-Length out of range: {}", value)))
}

/// Read one frame: header block, then exactly `Content-Length` body bytes
///
/// Blank lines before the first header are skipped; some servers pad frames
/// with a trailing `\r\n`.
pub async fn read_frame<T: Transport + ?Sized>(transport: &mut T) -> HarnessResult<FramedMessage> {
    let mut headers: Vec<(String, String)> = Vec::new();
    let mut content_length: Option<usize> = None;

    for _ in 0..MAX_HEADER_LINES {
        let raw = transport.read_line().await?;
        let line = raw
            .strip_suffix(LINE_TERMINATOR.as_bytes())
            .ok_or_else(|| {
                HarnessError::Framing(format!(
                    "header line not terminated by CRLF: {:?}",
                    String::from_utf8_lossy(&raw)
                ))
            })?;
        let line = std::str::from_utf8(line)
            .map_err(|_| HarnessError::Framing("header line is not valid UTF-8".to_string()))?;

        if line.is_empty() {
            if headers.is_empty() {
                continue;
            }

            let length = content_length.ok_or_else(|| {
                HarnessError::Framing("no Content-Length header before end of headers".to_string())
            })?;
            if length > MAX_BODY_BYTES {
                return Err(HarnessError::Framing(format!(
                    "Content-Length {} exceeds the {} byte limit",
                    length, MAX_BODY_BYTES
                )));
            }
            let body = transport.read_bytes(length).await?;
            debug!("Received frame body: {}", String::from_utf8_lossy(&body));

            return Ok(FramedMessage { headers, body });
        }

        let captures = header_regex()
            .captures(line)
            .ok_or_else(|| HarnessError::Framing(format!("malformed header line: {:?}", line)))?;
        let name = captures[1].to_string();
        let value = captures[2].to_string();

        if name.eq_ignore_ascii_case(CONTENT_LENGTH) {
            let length = parse_content_length(&value)?;
            if content_length.is_some_and(|previous| previous != length) {
                return Err(HarnessError::Framing(
                    "conflicting Content-Length headers".to_string(),
                ));
            }
            content_length = Some(length);
        }
        headers.push((name, value));
    }

    Err(HarnessError::Framing(format!(
        "header block exceeds {} lines",
        MAX_HEADER_LINES
    )))
}

/// Read one frame and decode it as a JSON-RPC response
pub async fn decode_frame<T: Transport + ?Sized>(transport: &mut T) -> HarnessResult<Response> {
    let frame = read_frame(transport).await?;
    Response::from_value(frame.json()?)
}
