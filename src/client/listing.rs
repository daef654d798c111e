//! Page sources for the repository's list endpoints.

use std::sync::Arc;

use repo_protocol::{Artifact, ArtifactPage, AuidPage, PARAM_CONTINUATION_TOKEN, PARAM_LIMIT, PARAM_NAMESPACE};

use super::transport::{HttpRequest, Transport};
use super::execute_json;
use crate::cache::ArtifactCache;
use crate::error::RepoResult;
use crate::paging::{Page, PageSource};

/// Versions returned by an artifact listing
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ArtifactVersions {
    #[default]
    All,
    Latest,
}

impl ArtifactVersions {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArtifactVersions::All => "all",
            ArtifactVersions::Latest => "latest",
        }
    }
}

/// Namespaces arrive as one unpaged list.
pub(crate) struct NamespaceSource {
    pub transport: Arc<dyn Transport>,
}

impl PageSource<String> for NamespaceSource {
    fn fetch_page(&mut self, _token: Option<&str>, _limit: usize) -> RepoResult<Page<String>> {
        let namespaces: Vec<String> = execute_json(self.transport.as_ref(), HttpRequest::get(&["namespaces"]))?;
        Ok(Page::last(namespaces))
    }
}

pub(crate) struct AuidSource {
    pub transport: Arc<dyn Transport>,
    pub namespace: String,
}

impl PageSource<String> for AuidSource {
    fn fetch_page(&mut self, token: Option<&str>, limit: usize) -> RepoResult<Page<String>> {
        let request = HttpRequest::get(&["aus"])
            .query(PARAM_NAMESPACE, self.namespace.as_str())
            .query(PARAM_LIMIT, limit.to_string())
            .query_opt(PARAM_CONTINUATION_TOKEN, token);
        let page: AuidPage = execute_json(self.transport.as_ref(), request)?;
        Ok(Page::new(page.auids, page.page_info.continuation_token))
    }
}

/// Selection of an artifact listing
#[derive(Debug, Clone, Default)]
pub(crate) struct ListingQuery {
    pub namespace: String,
    /// `None` lists across every AU of the namespace.
    pub auid: Option<String>,
    pub url: Option<String>,
    pub url_prefix: Option<String>,
    pub versions: ArtifactVersions,
    /// Exact version; only for single-AU listings.
    pub version: Option<i32>,
    pub include_uncommitted: bool,
}

impl ListingQuery {
    fn request(&self, token: Option<&str>, limit: usize) -> HttpRequest {
        let request = match &self.auid {
            Some(auid) => {
                let version = match self.version {
                    Some(v) => v.to_string(),
                    None => self.versions.as_str().to_string(),
                };
                HttpRequest::get(&["aus", auid.as_str(), "artifacts"])
                    .query("version", version)
                    .query_opt("includeUncommitted", self.include_uncommitted.then_some("true"))
            }
            None => HttpRequest::get(&["artifacts"]).query("versions", self.versions.as_str()),
        };
        request
            .query(PARAM_NAMESPACE, self.namespace.as_str())
            .query_opt("url", self.url.as_deref())
            .query_opt("urlPrefix", self.url_prefix.as_deref())
            .query(PARAM_LIMIT, limit.to_string())
            .query_opt(PARAM_CONTINUATION_TOKEN, token)
    }
}

/// Artifact listing that feeds what it sees into the cache.
pub(crate) struct ArtifactSource {
    pub transport: Arc<dyn Transport>,
    pub cache: Arc<ArtifactCache>,
    pub query: ListingQuery,
}

impl PageSource<Artifact> for ArtifactSource {
    fn fetch_page(&mut self, token: Option<&str>, limit: usize) -> RepoResult<Page<Artifact>> {
        let since = self.cache.generation();
        let page: ArtifactPage = execute_json(self.transport.as_ref(), self.query.request(token, limit))?;
        for artifact in &page.artifacts {
            if self.query.versions == ArtifactVersions::Latest && artifact.committed {
                self.cache.put_latest_since(artifact, since);
            } else {
                self.cache.put_since(artifact, since);
            }
        }
        Ok(Page::new(page.artifacts, page.page_info.continuation_token))
    }
}
