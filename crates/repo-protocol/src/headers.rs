//! HTTP header multimap and status line.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;

/// Ordered, case-insensitive header multimap.
///
/// Names keep the case they were inserted with; lookups ignore case.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Headers(Vec<(String, String)>);

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a value, keeping any existing values for the same name.
    pub fn append(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.0.push((name.into(), value.into()));
    }

    /// Replace all values for `name` with a single value.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        self.remove(&name);
        self.0.push((name, value.into()));
    }

    /// Builder-style [`Headers::set`].
    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.set(name, value);
        self
    }

    /// First value for `name`.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// All values for `name`, in insertion order.
    pub fn get_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.0
            .iter()
            .filter(move |(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn remove(&mut self, name: &str) {
        self.0.retain(|(n, _)| !n.eq_ignore_ascii_case(name));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Parse a `Content-Length` header, if present and well formed.
    pub fn content_length(&self) -> Option<u64> {
        self.get("Content-Length").and_then(|v| v.trim().parse().ok())
    }

    /// Serialize as `Name: value\r\n` lines (no terminating blank line).
    pub fn to_lines(&self) -> String {
        let mut out = String::new();
        for (name, value) in &self.0 {
            out.push_str(name);
            out.push_str(": ");
            out.push_str(value);
            out.push_str("\r\n");
        }
        out
    }

    /// Parse `Name: value` lines separated by CRLF or LF.
    pub fn parse_lines(text: &str) -> Result<Self, ProtocolError> {
        let mut headers = Headers::new();
        for line in text.split('\n') {
            let line = line.trim_end_matches('\r');
            if line.is_empty() {
                continue;
            }
            headers.push_line(line)?;
        }
        Ok(headers)
    }

    /// Parse and append a single `Name: value` line.
    pub fn push_line(&mut self, line: &str) -> Result<(), ProtocolError> {
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| ProtocolError::HttpFraming(format!("malformed header line: {line}")))?;
        let name = name.trim();
        if name.is_empty() {
            return Err(ProtocolError::HttpFraming(format!(
                "empty header name: {line}"
            )));
        }
        self.append(name, value.trim());
        Ok(())
    }
}

impl<N: Into<String>, V: Into<String>> FromIterator<(N, V)> for Headers {
    fn from_iter<I: IntoIterator<Item = (N, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(n, v)| (n.into(), v.into())).collect())
    }
}

/// HTTP status line, e.g. `HTTP/1.1 200 OK`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusLine {
    pub version: String,
    pub code: u16,
    pub reason: String,
}

impl StatusLine {
    pub fn new(code: u16, reason: impl Into<String>) -> Self {
        Self {
            version: "HTTP/1.1".to_string(),
            code,
            reason: reason.into(),
        }
    }

    pub fn ok() -> Self {
        Self::new(200, "OK")
    }
}

impl fmt::Display for StatusLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.reason.is_empty() {
            write!(f, "{} {}", self.version, self.code)
        } else {
            write!(f, "{} {} {}", self.version, self.code, self.reason)
        }
    }
}

impl FromStr for StatusLine {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let line = s.trim_end_matches(['\r', '\n']);
        let mut fields = line.splitn(3, ' ');
        let version = fields.next().unwrap_or_default();
        if !version.starts_with("HTTP/") {
            return Err(ProtocolError::HttpFraming(format!("bad status line: {line}")));
        }
        let code = fields
            .next()
            .and_then(|c| c.parse::<u16>().ok())
            .ok_or_else(|| ProtocolError::HttpFraming(format!("bad status code: {line}")))?;
        Ok(Self {
            version: version.to_string(),
            code,
            reason: fields.next().unwrap_or_default().to_string(),
        })
    }
}
