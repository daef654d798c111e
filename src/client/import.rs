//! Bulk archive import results.

use std::fmt;
use std::io::Read;
use std::sync::Arc;

use repo_protocol::ImportStatus;
use serde_json::de::IoRead;
use serde_json::StreamDeserializer;
use tracing::debug;

use crate::cache::ArtifactCache;
use crate::error::{RepoError, RepoResult};

/// Container format of an archive passed to bulk import
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveType {
    Warc,
    Arc,
    Zip,
}

impl ArchiveType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArchiveType::Warc => "WARC",
            ArchiveType::Arc => "ARC",
            ArchiveType::Zip => "ZIP",
        }
    }
}

impl fmt::Display for ArchiveType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

type StatusStream = StreamDeserializer<'static, IoRead<Box<dyn Read + Send>>, ImportStatus>;

/// Per-record import results, decoded as the response streams in.
///
/// Single pass and not restartable. When the stream ends (or the iterator is
/// dropped) the AU is invalidated in the cache, since the import changed it.
pub struct ImportStatusIter {
    stream: StatusStream,
    done: bool,
    cache: Arc<ArtifactCache>,
    namespace: String,
    auid: String,
}

impl ImportStatusIter {
    pub(crate) fn new(body: Box<dyn Read + Send>, cache: Arc<ArtifactCache>, namespace: &str, auid: &str) -> Self {
        Self {
            stream: serde_json::Deserializer::from_reader(body).into_iter(),
            done: false,
            cache,
            namespace: namespace.to_string(),
            auid: auid.to_string(),
        }
    }

    fn finish(&mut self) {
        if !self.done {
            self.done = true;
            debug!(namespace = %self.namespace, auid = %self.auid, "archive import stream finished");
            self.cache.invalidate_au(&self.namespace, &self.auid);
        }
    }
}

impl Iterator for ImportStatusIter {
    type Item = RepoResult<ImportStatus>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.stream.next() {
            Some(Ok(status)) => Some(Ok(status)),
            Some(Err(e)) => {
                self.finish();
                Some(Err(RepoError::from(e)))
            }
            None => {
                self.finish();
                None
            }
        }
    }
}

impl Drop for ImportStatusIter {
    fn drop(&mut self) {
        self.finish();
    }
}
