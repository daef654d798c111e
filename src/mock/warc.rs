//! Minimal WARC reading and writing for archive import.
//!
//! Records are `WARC/1.0` header blocks followed by `Content-Length` bytes
//! of content and a blank line. Only what bulk import needs is understood:
//! record type, id, target URI, date and the content block.

use repo_protocol::http::encode_response;
use repo_protocol::{Headers, StatusLine};

/// One record read from an archive
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WarcRecord {
    /// Byte offset of the record's first line
    pub offset: u64,
    pub record_type: String,
    pub record_id: String,
    pub target_uri: Option<String>,
    pub date: Option<String>,
    pub block: Vec<u8>,
}

/// Iterator over the records of an in-memory archive.
///
/// Stops after the first malformed record.
pub struct WarcReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> WarcReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn read_record(&mut self) -> Result<WarcRecord, String> {
        let start = self.pos;
        let rest = &self.data[start..];
        if !rest.starts_with(b"WARC/") {
            return Err(format!("no WARC record at offset {start}"));
        }
        let head_len = rest
            .windows(4)
            .position(|w| w == b"\r\n\r\n")
            .ok_or_else(|| format!("unterminated record header at offset {start}"))?;
        let head = std::str::from_utf8(&rest[..head_len])
            .map_err(|_| format!("non UTF-8 record header at offset {start}"))?;

        let header_lines = head.split_once("\r\n").map(|(_, h)| h).unwrap_or("");
        let headers = Headers::parse_lines(header_lines).map_err(|e| e.to_string())?;

        let length = headers
            .content_length()
            .ok_or_else(|| format!("record at offset {start} has no Content-Length"))?
            as usize;
        let block_start = start + head_len + 4;
        let block_end = block_start
            .checked_add(length)
            .filter(|end| *end <= self.data.len())
            .ok_or_else(|| format!("truncated record at offset {start}"))?;

        let mut next = block_end;
        while self.data[next..].starts_with(b"\r\n") {
            next += 2;
        }
        self.pos = next;

        Ok(WarcRecord {
            offset: start as u64,
            record_type: headers.get("WARC-Type").unwrap_or("").to_string(),
            record_id: headers.get("WARC-Record-ID").unwrap_or("").to_string(),
            target_uri: headers.get("WARC-Target-URI").map(String::from),
            date: headers.get("WARC-Date").map(String::from),
            block: self.data[block_start..block_end].to_vec(),
        })
    }
}

impl Iterator for WarcReader<'_> {
    type Item = Result<WarcRecord, String>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.pos >= self.data.len() {
            return None;
        }
        let record = self.read_record();
        if record.is_err() {
            self.pos = self.data.len();
        }
        Some(record)
    }
}

/// Builds an archive record by record
#[derive(Debug, Default)]
pub struct WarcBuilder {
    out: Vec<u8>,
}

impl WarcBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an archived HTTP response.
    pub fn response(self, uri: &str, status: &StatusLine, headers: &Headers, payload: &[u8]) -> Self {
        let block = encode_response(status, headers, payload);
        self.record("response", Some(uri), "application/http; msgtype=response", &block)
    }

    /// Add a non-HTTP resource.
    pub fn resource(self, uri: &str, content_type: &str, payload: &[u8]) -> Self {
        self.record("resource", Some(uri), content_type, payload)
    }

    /// Add an archive description record.
    pub fn warcinfo(self, fields: &str) -> Self {
        self.record("warcinfo", None, "application/warc-fields", fields.as_bytes())
    }

    fn record(mut self, kind: &str, uri: Option<&str>, content_type: &str, block: &[u8]) -> Self {
        let mut headers = Headers::new()
            .with("WARC-Type", kind)
            .with("WARC-Record-ID", format!("<urn:uuid:{}>", uuid::Uuid::new_v4()))
            .with("WARC-Date", chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string());
        if let Some(uri) = uri {
            headers.append("WARC-Target-URI", uri);
        }
        headers.append("Content-Type", content_type);
        headers.append("Content-Length", block.len().to_string());

        self.out.extend_from_slice(b"WARC/1.0\r\n");
        self.out.extend_from_slice(headers.to_lines().as_bytes());
        self.out.extend_from_slice(b"\r\n");
        self.out.extend_from_slice(block);
        self.out.extend_from_slice(b"\r\n\r\n");
        self
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_back_built_archive() {
        let archive = WarcBuilder::new()
            .warcinfo("software: test\r\n")
            .response(
                "http://x/a",
                &StatusLine::ok(),
                &Headers::new().with("Content-Type", "text/html"),
                b"<html/>",
            )
            .resource("http://x/b", "text/plain", b"plain")
            .into_bytes();

        let records: Vec<WarcRecord> = WarcReader::new(&archive).map(|r| r.unwrap()).collect();
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].record_type, "warcinfo");
        assert_eq!(records[0].offset, 0);
        assert_eq!(records[1].record_type, "response");
        assert_eq!(records[1].target_uri.as_deref(), Some("http://x/a"));
        assert!(records[1].record_id.starts_with("<urn:uuid:"));
        assert!(records[1].block.starts_with(b"HTTP/1.1 200 OK\r\n"));
        assert_eq!(records[2].block, b"plain");
        assert!(records[2].offset > records[1].offset);
    }

    #[test]
    fn test_truncated_record_stops_reader() {
        let mut archive = WarcBuilder::new()
            .resource("http://x/a", "text/plain", b"0123456789")
            .into_bytes();
        archive.truncate(archive.len() - 8);

        let mut reader = WarcReader::new(&archive);
        assert!(reader.next().unwrap().is_err());
        assert!(reader.next().is_none());
    }

    #[test]
    fn test_garbage_is_rejected() {
        let mut reader = WarcReader::new(b"not an archive");
        assert!(reader.next().unwrap().is_err());
    }
}
