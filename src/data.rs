//! Artifact payloads.
//!
//! [`ArtifactData`] is an artifact's metadata together with the archived HTTP
//! response: optional status line, headers and a content stream. The stream
//! is single-use; the cache hands out fresh [`ContentStream`]s over buffered
//! bytes so a cached payload can be read any number of times.

use std::fmt;
use std::io::{self, Cursor, Read};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use repo_protocol::{Artifact, ArtifactIdentifier, Headers, StatusLine};

/// How much payload a fetch should return.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum IncludeContent {
    /// Always include the payload.
    Always,
    /// Include the payload only if it is no larger than the small content
    /// threshold.
    #[default]
    IfSmall,
    /// Never include the payload.
    Never,
}

impl IncludeContent {
    pub fn as_str(&self) -> &'static str {
        match self {
            IncludeContent::Always => "ALWAYS",
            IncludeContent::IfSmall => "IF_SMALL",
            IncludeContent::Never => "NEVER",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ALWAYS" => Some(IncludeContent::Always),
            "IF_SMALL" => Some(IncludeContent::IfSmall),
            "NEVER" => Some(IncludeContent::Never),
            _ => None,
        }
    }

    /// Whether content of `length` bytes is wanted given `threshold`.
    pub fn wants(&self, length: i64, threshold: u64) -> bool {
        match self {
            IncludeContent::Always => true,
            IncludeContent::IfSmall => length >= 0 && (length as u64) <= threshold,
            IncludeContent::Never => false,
        }
    }
}

impl fmt::Display for IncludeContent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Readable artifact content.
pub enum ContentStream {
    /// Replayable bytes held in memory (shared with the cache).
    Buffered(Cursor<Arc<[u8]>>),
    /// Bytes still arriving from elsewhere, e.g. a response body.
    Streaming(Box<dyn Read + Send>),
}

impl ContentStream {
    pub fn from_bytes(bytes: impl Into<Arc<[u8]>>) -> Self {
        ContentStream::Buffered(Cursor::new(bytes.into()))
    }

    pub fn from_reader(reader: impl Read + Send + 'static) -> Self {
        ContentStream::Streaming(Box::new(reader))
    }

    /// The complete buffered content, if this stream is buffered and unread.
    pub fn buffered(&self) -> Option<&Arc<[u8]>> {
        match self {
            ContentStream::Buffered(cursor) if cursor.position() == 0 => Some(cursor.get_ref()),
            _ => None,
        }
    }

    pub fn into_bytes(mut self) -> io::Result<Vec<u8>> {
        let mut out = Vec::new();
        self.read_to_end(&mut out)?;
        Ok(out)
    }
}

impl Read for ContentStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            ContentStream::Buffered(cursor) => cursor.read(buf),
            ContentStream::Streaming(reader) => reader.read(buf),
        }
    }
}

impl fmt::Debug for ContentStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContentStream::Buffered(cursor) => write!(f, "Buffered({} bytes)", cursor.get_ref().len()),
            ContentStream::Streaming(_) => write!(f, "Streaming"),
        }
    }
}

/// An artifact with its archived HTTP response.
pub struct ArtifactData {
    pub identifier: ArtifactIdentifier,
    pub committed: bool,
    /// Payload length in bytes, `-1` when not yet known (before upload).
    pub content_length: i64,
    pub content_digest: String,
    pub storage_url: Option<String>,
    pub collection_date: Option<i64>,
    pub http_status: Option<StatusLine>,
    pub headers: Headers,
    content: Option<ContentStream>,
    pub store_date: Option<DateTime<Utc>>,
}

impl ArtifactData {
    /// Build data to upload: an archived response for `identifier`.
    pub fn new(
        identifier: ArtifactIdentifier,
        http_status: Option<StatusLine>,
        headers: Headers,
        content: ContentStream,
    ) -> Self {
        let content_length = content
            .buffered()
            .map(|b| b.len() as i64)
            .unwrap_or(-1);
        Self {
            identifier,
            committed: false,
            content_length,
            content_digest: String::new(),
            storage_url: None,
            collection_date: None,
            http_status,
            headers,
            content: Some(content),
            store_date: None,
        }
    }

    /// Build data to upload from an in-memory payload.
    pub fn from_bytes(
        identifier: ArtifactIdentifier,
        http_status: Option<StatusLine>,
        headers: Headers,
        payload: impl Into<Vec<u8>>,
    ) -> Self {
        let payload: Vec<u8> = payload.into();
        Self::new(identifier, http_status, headers, ContentStream::from_bytes(payload))
    }

    /// Combine stored metadata with a decoded response.
    pub fn from_artifact(
        artifact: &Artifact,
        http_status: Option<StatusLine>,
        headers: Headers,
        content: Option<ContentStream>,
    ) -> Self {
        Self {
            identifier: artifact.identifier.clone(),
            committed: artifact.committed,
            content_length: artifact.content_length,
            content_digest: artifact.content_digest.clone(),
            storage_url: artifact.storage_url.clone(),
            collection_date: artifact.collection_date,
            http_status,
            headers,
            content,
            store_date: None,
        }
    }

    pub fn with_collection_date(mut self, millis: i64) -> Self {
        self.collection_date = Some(millis);
        self
    }

    pub fn with_store_date(mut self, date: DateTime<Utc>) -> Self {
        self.store_date = Some(date);
        self
    }

    /// Metadata view of this data.
    pub fn artifact(&self) -> Artifact {
        Artifact {
            identifier: self.identifier.clone(),
            committed: self.committed,
            content_length: self.content_length,
            content_digest: self.content_digest.clone(),
            storage_url: self.storage_url.clone(),
            collection_date: self.collection_date,
        }
    }

    /// Refresh the metadata fields from a newer repository answer.
    pub fn update_metadata(&mut self, artifact: &Artifact) {
        self.identifier = artifact.identifier.clone();
        self.committed = artifact.committed;
        self.content_length = artifact.content_length;
        self.content_digest = artifact.content_digest.clone();
        self.storage_url = artifact.storage_url.clone();
        self.collection_date = artifact.collection_date;
    }

    pub fn namespace(&self) -> &str {
        &self.identifier.namespace
    }

    pub fn uuid(&self) -> &str {
        &self.identifier.uuid
    }

    pub fn has_content(&self) -> bool {
        self.content.is_some()
    }

    pub fn content(&self) -> Option<&ContentStream> {
        self.content.as_ref()
    }

    /// Take the content stream. A second call returns `None`.
    pub fn take_content(&mut self) -> Option<ContentStream> {
        self.content.take()
    }

    pub fn set_content(&mut self, content: Option<ContentStream>) {
        self.content = content;
    }

    /// Read the whole content into memory.
    pub fn read_content(&mut self) -> io::Result<Option<Vec<u8>>> {
        match self.content.take() {
            Some(stream) => stream.into_bytes().map(Some),
            None => Ok(None),
        }
    }
}

impl fmt::Debug for ArtifactData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArtifactData")
            .field("identifier", &self.identifier)
            .field("committed", &self.committed)
            .field("content_length", &self.content_length)
            .field("http_status", &self.http_status)
            .field("headers", &self.headers.len())
            .field("content", &self.content)
            .field("store_date", &self.store_date)
            .finish()
    }
}
