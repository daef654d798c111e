//! Repository, storage and AU size reports.

use serde::{Deserialize, Serialize};

/// Disk usage of one storage area.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageInfo {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub used: u64,
    #[serde(default)]
    pub avail: u64,
    #[serde(default)]
    pub percent_used: f64,
}

/// Storage report for the artifact store and its index.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepositoryInfo {
    pub store_info: StorageInfo,
    pub index_info: StorageInfo,
}

/// Size breakdown of an AU.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuSize {
    /// Bytes of the latest committed version of each URL.
    pub total_latest_versions: u64,
    /// Bytes of every committed version.
    pub total_all_versions: u64,
    /// Bytes occupied on disk by the AU's archive files.
    pub total_warc_size: u64,
}

/// Readiness report of the repository service.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiStatus {
    #[serde(default)]
    pub api_version: String,
    #[serde(default)]
    pub component_name: String,
    pub ready: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}
