//! `multipart/form-data` codec.
//!
//! Encoding streams: parts may be backed by readers, and the whole body is
//! produced as a single chained reader so large payloads are never copied.
//! Decoding works on a body held in memory.

use std::io::{self, Cursor, Read};

use crate::error::{ProtocolError, ProtocolResult};
use crate::headers::Headers;
use crate::CONTENT_TYPE_MULTIPART;

/// A decoded multipart part.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Part {
    /// The `name` parameter of the part's `Content-Disposition`.
    pub name: String,
    pub headers: Headers,
    pub body: Vec<u8>,
}

impl Part {
    pub fn content_type(&self) -> Option<&str> {
        self.headers.get("Content-Type")
    }

    pub fn body_str(&self) -> ProtocolResult<&str> {
        std::str::from_utf8(&self.body)
            .map_err(|_| ProtocolError::Multipart(format!("part {} is not UTF-8", self.name)))
    }
}

enum PartBody {
    Bytes(Vec<u8>),
    Stream(Box<dyn Read + Send>),
}

/// Builds a multipart body part by part.
pub struct MultipartBuilder {
    boundary: String,
    parts: Vec<(String, Headers, PartBody)>,
}

impl MultipartBuilder {
    pub fn new() -> Self {
        Self::with_boundary(format!("repo-{}", uuid::Uuid::new_v4().simple()))
    }

    pub fn with_boundary(boundary: impl Into<String>) -> Self {
        Self {
            boundary: boundary.into(),
            parts: Vec::new(),
        }
    }

    pub fn boundary(&self) -> &str {
        &self.boundary
    }

    /// Value for the `Content-Type` header of the encoded body.
    pub fn content_type(&self) -> String {
        format!("{CONTENT_TYPE_MULTIPART}; boundary={}", self.boundary)
    }

    /// Add a part held in memory.
    pub fn bytes(mut self, name: &str, content_type: &str, body: impl Into<Vec<u8>>) -> Self {
        let headers = part_headers(name, content_type);
        self.parts
            .push((name.to_string(), headers, PartBody::Bytes(body.into())));
        self
    }

    /// Add a part backed by a reader.
    pub fn stream(mut self, name: &str, content_type: &str, body: impl Read + Send + 'static) -> Self {
        let headers = part_headers(name, content_type);
        self.parts
            .push((name.to_string(), headers, PartBody::Stream(Box::new(body))));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    /// Produce the encoded body as a reader.
    ///
    /// A builder with no parts encodes to the closing delimiter alone, which
    /// is a well-formed empty multipart body.
    pub fn into_reader(self) -> Box<dyn Read + Send> {
        let boundary = self.boundary;
        let mut reader: Box<dyn Read + Send> = Box::new(io::empty());
        for (_, headers, body) in self.parts {
            let head = format!("--{boundary}\r\n{}\r\n", headers.to_lines());
            reader = Box::new(reader.chain(Cursor::new(head.into_bytes())));
            reader = match body {
                PartBody::Bytes(bytes) => Box::new(reader.chain(Cursor::new(bytes))),
                PartBody::Stream(stream) => Box::new(reader.chain(stream)),
            };
            reader = Box::new(reader.chain(Cursor::new(b"\r\n".to_vec())));
        }
        let tail = format!("--{boundary}--\r\n");
        Box::new(reader.chain(Cursor::new(tail.into_bytes())))
    }

    /// Encode the whole body into memory.
    pub fn into_bytes(self) -> io::Result<Vec<u8>> {
        let mut out = Vec::new();
        self.into_reader().read_to_end(&mut out)?;
        Ok(out)
    }
}

impl Default for MultipartBuilder {
    fn default() -> Self {
        Self::new()
    }
}

fn part_headers(name: &str, content_type: &str) -> Headers {
    Headers::new()
        .with("Content-Disposition", format!("form-data; name=\"{name}\""))
        .with("Content-Type", content_type)
}

/// Extract the `boundary` parameter from a multipart content type.
pub fn boundary_from_content_type(content_type: &str) -> Option<String> {
    let (mime, params) = content_type.split_once(';')?;
    if !mime.trim().eq_ignore_ascii_case(CONTENT_TYPE_MULTIPART) {
        return None;
    }
    params.split(';').find_map(|param| {
        let (key, value) = param.split_once('=')?;
        if key.trim().eq_ignore_ascii_case("boundary") {
            Some(value.trim().trim_matches('"').to_string())
        } else {
            None
        }
    })
}

/// Decode a multipart body.
pub fn parse(body: &[u8], boundary: &str) -> ProtocolResult<Vec<Part>> {
    if boundary.is_empty() {
        return Err(ProtocolError::Multipart("empty boundary".to_string()));
    }
    let delimiter = format!("--{boundary}").into_bytes();
    let separator = format!("\r\n--{boundary}").into_bytes();

    let mut pos = find(body, &delimiter, 0)
        .ok_or_else(|| ProtocolError::Multipart("missing opening boundary".to_string()))?;
    let mut parts = Vec::new();

    loop {
        pos += delimiter.len();
        if body[pos..].starts_with(b"--") {
            return Ok(parts);
        }
        // Skip transport padding up to the end of the delimiter line.
        let line_end = find(body, b"\n", pos)
            .ok_or_else(|| ProtocolError::Multipart("truncated boundary line".to_string()))?;
        pos = line_end + 1;

        let (head, body_start) = if body[pos..].starts_with(b"\r\n") {
            (&body[pos..pos], pos + 2)
        } else {
            let end = find(body, b"\r\n\r\n", pos)
                .ok_or_else(|| ProtocolError::Multipart("unterminated part headers".to_string()))?;
            (&body[pos..end], end + 4)
        };
        let head = std::str::from_utf8(head)
            .map_err(|_| ProtocolError::Multipart("non UTF-8 part headers".to_string()))?;
        let headers = Headers::parse_lines(head)?;

        let body_end = find(body, &separator, body_start)
            .ok_or_else(|| ProtocolError::Multipart("unterminated part body".to_string()))?;

        let name = headers
            .get("Content-Disposition")
            .and_then(disposition_name)
            .ok_or_else(|| ProtocolError::Multipart("part without a name".to_string()))?;

        parts.push(Part {
            name,
            headers,
            body: body[body_start..body_end].to_vec(),
        });

        // Continue at the delimiter following the CRLF.
        pos = body_end + 2;
    }
}

fn disposition_name(disposition: &str) -> Option<String> {
    disposition.split(';').skip(1).find_map(|param| {
        let (key, value) = param.split_once('=')?;
        if key.trim().eq_ignore_ascii_case("name") {
            Some(value.trim().trim_matches('"').to_string())
        } else {
            None
        }
    })
}

fn find(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    if from > haystack.len() || needle.is_empty() {
        return None;
    }
    haystack[from..]
        .windows(needle.len())
        .position(|window| window == needle)
        .map(|p| p + from)
}
