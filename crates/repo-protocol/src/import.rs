//! Bulk archive import results.

use serde::{Deserialize, Serialize};

/// Outcome of importing one archive record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ImportStatusKind {
    Ok,
    Error,
    /// Identical to the latest stored version; not stored again.
    Duplicate,
    /// Record's HTTP status matched the exclusion pattern.
    Excluded,
}

/// Per-record import result streamed back by a bulk import.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportStatus {
    /// `WARC-Record-ID` of the source record.
    #[serde(default)]
    pub warc_id: String,
    /// Byte offset of the record in the archive.
    #[serde(default)]
    pub offset: u64,
    #[serde(default)]
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact_uuid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub digest: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<i32>,
    pub status: ImportStatusKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_message: Option<String>,
}
