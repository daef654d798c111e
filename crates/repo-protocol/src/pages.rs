//! Paged list responses.

use serde::{Deserialize, Serialize};

use crate::artifact::Artifact;

/// Paging metadata attached to every list page.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageInfo {
    /// Cursor for the next page; absent on the last page.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub continuation_token: Option<String>,
    #[serde(default)]
    pub results_per_page: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_count: Option<u64>,
}

/// One page of artifact records.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactPage {
    #[serde(default)]
    pub artifacts: Vec<Artifact>,
    #[serde(default)]
    pub page_info: PageInfo,
}

/// One page of AU identifiers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuidPage {
    #[serde(default)]
    pub auids: Vec<String>,
    #[serde(default)]
    pub page_info: PageInfo,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_last_page_has_no_token() {
        let page: AuidPage =
            serde_json::from_str(r#"{"auids":["a","b"],"pageInfo":{"resultsPerPage":2}}"#).unwrap();
        assert_eq!(page.auids, vec!["a", "b"]);
        assert!(page.page_info.continuation_token.is_none());

        let page: ArtifactPage = serde_json::from_str(
            r#"{"artifacts":[],"pageInfo":{"continuationToken":"t1","resultsPerPage":10}}"#,
        )
        .unwrap();
        assert_eq!(page.page_info.continuation_token.as_deref(), Some("t1"));
    }
}
