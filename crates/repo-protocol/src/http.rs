//! Framed HTTP response codec (`application/http; msgtype=response`).
//!
//! A framed response is the archived HTTP exchange as it appeared on the
//! wire: status line, header lines, a blank line, then the payload.

use crate::error::{ProtocolError, ProtocolResult};
use crate::headers::{Headers, StatusLine};

/// Encode the status line and headers, including the terminating blank line.
pub fn encode_response_head(status: &StatusLine, headers: &Headers) -> Vec<u8> {
    let mut head = format!("{status}\r\n");
    head.push_str(&headers.to_lines());
    head.push_str("\r\n");
    head.into_bytes()
}

/// Encode a complete framed response held in memory.
pub fn encode_response(status: &StatusLine, headers: &Headers, payload: &[u8]) -> Vec<u8> {
    let mut out = encode_response_head(status, headers);
    out.extend_from_slice(payload);
    out
}

/// Split a framed response into status line, headers and payload.
///
/// Accepts CRLF or bare LF line endings in the head. The payload is
/// everything after the blank line; a `Content-Length` header shorter than
/// the remaining bytes truncates it.
pub fn decode_response(framed: &[u8]) -> ProtocolResult<(StatusLine, Headers, &[u8])> {
    let (head_end, body_start) = find_head_end(framed)
        .ok_or_else(|| ProtocolError::HttpFraming("missing end of headers".to_string()))?;

    let head = std::str::from_utf8(&framed[..head_end])
        .map_err(|_| ProtocolError::HttpFraming("non UTF-8 response head".to_string()))?;

    let mut lines = head.split('\n');
    let status: StatusLine = lines
        .next()
        .filter(|l| !l.trim().is_empty())
        .ok_or_else(|| ProtocolError::HttpFraming("missing status line".to_string()))?
        .parse()?;

    let mut headers = Headers::new();
    for line in lines {
        let line = line.trim_end_matches('\r');
        if !line.is_empty() {
            headers.push_line(line)?;
        }
    }

    let mut payload = &framed[body_start..];
    if let Some(len) = headers.content_length() {
        if (len as usize) < payload.len() {
            payload = &payload[..len as usize];
        }
    }

    Ok((status, headers, payload))
}

/// Locate the blank line ending the head: returns (end of head, start of body).
fn find_head_end(bytes: &[u8]) -> Option<(usize, usize)> {
    for i in 0..bytes.len() {
        if bytes[i..].starts_with(b"\r\n\r\n") {
            return Some((i, i + 4));
        }
        if bytes[i..].starts_with(b"\n\n") {
            return Some((i, i + 2));
        }
    }
    None
}
