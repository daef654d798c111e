//! The repository client.

use std::io::{Cursor, Read};
use std::sync::Arc;
use std::time::Duration;

use repo_protocol::http::encode_response_head;
use repo_protocol::{
    parts, ApiStatus, Artifact, AuSize, MultipartBuilder, RepositoryInfo, StorageInfo,
    CONTENT_TYPE_HTTP_RESPONSE, CONTENT_TYPE_MULTIPART, CONTENT_TYPE_WARC, PARAM_NAMESPACE,
};
use serde_json::json;
use tracing::{debug, info, warn};

use super::fetch::decode_artifact_response;
use super::import::{ArchiveType, ImportStatusIter};
use super::listing::{ArtifactSource, ArtifactVersions, AuidSource, ListingQuery, NamespaceSource};
use super::transport::{HttpRequest, HttpResponse, HttpTransport, Method, RequestBody, Transport};
use super::{execute, execute_json, not_found};
use crate::cache::{ArtifactCache, CacheConfig, CacheEnabler, CacheState, EnablerSettings};
use crate::config::ClientConfig;
use crate::data::{ArtifactData, ContentStream, IncludeContent};
use crate::error::{require, RepoError, RepoResult};
use crate::paging::{PagingConfig, PagingIter};
use crate::pubsub::PubSub;

/// Client for one artifact repository.
///
/// Owns its cache. The cache stays disabled until [`enable_cache`] has
/// confirmed that invalidations arrive over the pub/sub channel.
///
/// [`enable_cache`]: RepositoryClient::enable_cache
pub struct RepositoryClient {
    transport: Arc<dyn Transport>,
    cache: Arc<ArtifactCache>,
    cache_config: CacheConfig,
    enabler: Option<CacheEnabler>,
    paging: PagingConfig,
    client_id: String,
}

impl RepositoryClient {
    pub fn new(transport: Arc<dyn Transport>, config: &ClientConfig) -> Self {
        let cache_config = config.cache_config();
        Self {
            transport,
            cache: Arc::new(ArtifactCache::new(&cache_config)),
            cache_config,
            enabler: None,
            paging: config.paging_config(),
            client_id: uuid::Uuid::new_v4().to_string(),
        }
    }

    /// Client over HTTP to `config.base_url`.
    pub fn connect(config: &ClientConfig) -> RepoResult<Self> {
        let transport = HttpTransport::new(&config.http_config())?;
        Ok(Self::new(Arc::new(transport), config))
    }

    /// Replace the paging settings used by later listings.
    pub fn with_paging(mut self, paging: PagingConfig) -> Self {
        self.paging = paging;
        self
    }

    /// Use `sizes` as the page size schedule of later listings.
    pub fn set_page_sizes(&mut self, sizes: &[usize]) {
        self.paging.page_sizes = sizes.to_vec();
    }

    /// Start enabling the cache in the background.
    ///
    /// Returns immediately; see [`cache_state`](Self::cache_state). Does
    /// nothing when the cache is disabled by configuration.
    pub fn enable_cache(&mut self, pubsub: Arc<dyn PubSub>) -> RepoResult<()> {
        if !self.cache_config.enabled {
            info!("artifact cache disabled by configuration");
            return Ok(());
        }
        if self.enabler.is_some() {
            return Ok(());
        }
        let settings = EnablerSettings {
            topic: self.cache_config.topic.clone(),
            client_id: self.client_id.clone(),
            echo_interval: self.cache_config.echo_interval,
            retry_initial_delay: self.cache_config.retry_initial_delay,
            retry_max_delay: self.cache_config.retry_max_delay,
        };
        self.enabler = Some(CacheEnabler::start(Arc::clone(&self.cache), pubsub, settings)?);
        Ok(())
    }

    /// Identity this client echoes during the cache handshake.
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn cache(&self) -> &Arc<ArtifactCache> {
        &self.cache
    }

    pub fn cache_state(&self) -> CacheState {
        self.enabler
            .as_ref()
            .map_or(CacheState::Disabled, CacheEnabler::state)
    }

    /// Block until the cache reaches `state`; false on timeout.
    pub fn wait_for_cache_state(&self, state: CacheState, timeout: Duration) -> bool {
        match &self.enabler {
            Some(enabler) => enabler.wait_for_state(state, timeout),
            None => state == CacheState::Disabled,
        }
    }

    // === Service ===

    pub fn get_status(&self) -> RepoResult<ApiStatus> {
        execute_json(self.transport.as_ref(), HttpRequest::get(&["status"]))
    }

    /// Whether the repository reports itself ready. Errors count as not ready.
    pub fn is_ready(&self) -> bool {
        match self.get_status() {
            Ok(status) => {
                if !status.ready {
                    debug!(reason = ?status.reason, "repository not ready");
                }
                status.ready
            }
            Err(e) => {
                debug!(error = %e, "repository status unavailable");
                false
            }
        }
    }

    // === Artifact lifecycle ===

    /// Upload `data` as a new uncommitted artifact.
    pub fn add_artifact(&self, mut data: ArtifactData) -> RepoResult<Artifact> {
        let id = data.identifier.clone();
        require(&id.namespace, "namespace")?;
        require(&id.auid, "auid")?;
        require(&id.uri, "uri")?;
        let content = data
            .take_content()
            .ok_or_else(|| RepoError::invalid("artifact data content is required"))?;
        let retained = content.buffered().cloned();

        let mut props = json!({
            "namespace": id.namespace,
            "auid": id.auid,
            "uri": id.uri,
        });
        if let Some(date) = data.collection_date {
            props["collectionDate"] = json!(date);
        }

        let builder = MultipartBuilder::new().bytes(parts::ARTIFACT_PROPS, "application/json", props.to_string());
        let builder = match &data.http_status {
            Some(status) => {
                let head = encode_response_head(status, &data.headers);
                builder.stream(parts::PAYLOAD, CONTENT_TYPE_HTTP_RESPONSE, Cursor::new(head).chain(content))
            }
            None => {
                let content_type = data
                    .headers
                    .get("Content-Type")
                    .unwrap_or("application/octet-stream")
                    .to_string();
                builder
                    .bytes(parts::HTTP_HEADERS, "text/plain", data.headers.to_lines())
                    .stream(parts::PAYLOAD, &content_type, content)
            }
        };

        let content_type = builder.content_type();
        let request = HttpRequest::new(Method::Post, &["artifacts"])
            .query(PARAM_NAMESPACE, id.namespace.as_str())
            .body(&content_type, RequestBody::Stream(builder.into_reader()));
        let since = self.cache.generation();
        let artifact: Artifact = execute_json(self.transport.as_ref(), request)?;
        debug!(namespace = %id.namespace, uuid = %artifact.uuid(), version = artifact.version(), "artifact added");

        data.update_metadata(&artifact);
        data.set_content(retained.map(ContentStream::from_bytes));
        self.cache.put_since(&artifact, since);
        self.cache.put_data_since(data, since);
        Ok(artifact)
    }

    /// Bulk-load an archive into an AU.
    ///
    /// Only WARC archives are supported. The returned iterator yields one
    /// status per archived record as the repository reports it.
    pub fn add_artifacts(
        &self,
        namespace: &str,
        auid: &str,
        archive: impl Read + Send + 'static,
        archive_type: ArchiveType,
        store_duplicate: bool,
        exclude_status_pattern: Option<&str>,
    ) -> RepoResult<ImportStatusIter> {
        require(namespace, "namespace")?;
        require(auid, "auid")?;
        if archive_type != ArchiveType::Warc {
            return Err(RepoError::NotImplemented(format!("{archive_type} archive import")));
        }

        self.cache.invalidate_au(namespace, auid);
        let builder = MultipartBuilder::new().stream(parts::ARCHIVE, CONTENT_TYPE_WARC, archive);
        let content_type = builder.content_type();
        let request = HttpRequest::new(Method::Post, &["aus", auid, "archives"])
            .query(PARAM_NAMESPACE, namespace)
            .query("storeDuplicate", store_duplicate.to_string())
            .query_opt("excludeStatusPattern", exclude_status_pattern.filter(|p| !p.is_empty()))
            .body(&content_type, RequestBody::Stream(builder.into_reader()));

        let response = execute(self.transport.as_ref(), request)?;
        info!(namespace, auid, "archive import started");
        Ok(ImportStatusIter::new(response.into_body(), Arc::clone(&self.cache), namespace, auid))
    }

    /// Data of `artifact`; see [`get_artifact_data_by_uuid`](Self::get_artifact_data_by_uuid).
    pub fn get_artifact_data(&self, artifact: &Artifact, include: IncludeContent) -> RepoResult<ArtifactData> {
        self.get_artifact_data_by_uuid(artifact.namespace(), artifact.uuid(), include)
    }

    /// Fetch an artifact with its archived response, cache first.
    pub fn get_artifact_data_by_uuid(
        &self,
        namespace: &str,
        uuid: &str,
        include: IncludeContent,
    ) -> RepoResult<ArtifactData> {
        require(namespace, "namespace")?;
        require(uuid, "uuid")?;

        if let Some(data) = self.cache.get_data(namespace, uuid, include) {
            debug!(namespace, uuid, %include, "artifact data cache hit");
            return Ok(data);
        }

        let request = HttpRequest::get(&["artifacts", uuid])
            .query(PARAM_NAMESPACE, namespace)
            .query("includeContent", include.as_str())
            .header("Accept", CONTENT_TYPE_MULTIPART);
        let since = self.cache.generation();
        let response = execute(self.transport.as_ref(), request).map_err(not_found(namespace, uuid))?;
        let data = decode_artifact_response(response)?;
        Ok(self.cache.put_data_since(data, since))
    }

    /// Mark an artifact committed.
    ///
    /// Commits can complete out of order, so the result is not assumed to be
    /// the latest version of its URL.
    pub fn commit_artifact(&self, namespace: &str, uuid: &str) -> RepoResult<Artifact> {
        require(namespace, "namespace")?;
        require(uuid, "uuid")?;

        let empty = MultipartBuilder::new();
        let content_type = empty.content_type();
        let request = HttpRequest::new(Method::Put, &["artifacts", uuid])
            .query(PARAM_NAMESPACE, namespace)
            .query("committed", "true")
            .body(&content_type, RequestBody::Stream(empty.into_reader()));

        let since = self.cache.generation();
        let artifact: Artifact =
            execute_json(self.transport.as_ref(), request).map_err(not_found(namespace, uuid))?;
        self.cache.apply_commit(&artifact, since);
        Ok(artifact)
    }

    pub fn delete_artifact(&self, namespace: &str, uuid: &str) -> RepoResult<()> {
        require(namespace, "namespace")?;
        require(uuid, "uuid")?;

        self.cache.invalidate_uuid(namespace, uuid);
        let request = HttpRequest::new(Method::Delete, &["artifacts", uuid]).query(PARAM_NAMESPACE, namespace);
        execute(self.transport.as_ref(), request).map_err(not_found(namespace, uuid))?;
        // A fetch racing the delete may have cached it again.
        self.cache.invalidate_uuid(namespace, uuid);
        Ok(())
    }

    // === Lookups ===

    /// Latest committed version of `url`, if any.
    pub fn get_artifact(&self, namespace: &str, auid: &str, url: &str) -> RepoResult<Option<Artifact>> {
        require(namespace, "namespace")?;
        require(auid, "auid")?;
        require(url, "url")?;

        if let Some(artifact) = self.cache.get_latest(namespace, auid, url) {
            return Ok(Some(artifact));
        }
        self.first_of(ListingQuery {
            namespace: namespace.to_string(),
            auid: Some(auid.to_string()),
            url: Some(url.to_string()),
            versions: ArtifactVersions::Latest,
            ..Default::default()
        })
    }

    /// A specific version of `url`, if it exists.
    pub fn get_artifact_version(
        &self,
        namespace: &str,
        auid: &str,
        url: &str,
        version: i32,
        include_uncommitted: bool,
    ) -> RepoResult<Option<Artifact>> {
        require(namespace, "namespace")?;
        require(auid, "auid")?;
        require(url, "url")?;

        if let Some(artifact) = self.cache.get_versioned(namespace, auid, url, version) {
            if artifact.committed || include_uncommitted {
                return Ok(Some(artifact));
            }
        }
        self.first_of(ListingQuery {
            namespace: namespace.to_string(),
            auid: Some(auid.to_string()),
            url: Some(url.to_string()),
            version: Some(version),
            include_uncommitted,
            ..Default::default()
        })
    }

    /// First record of a query expected to match at most one.
    ///
    /// Extra records point at an index problem on the repository side; they
    /// are logged and ignored.
    fn first_of(&self, query: ListingQuery) -> RepoResult<Option<Artifact>> {
        let description = format!("{}/{}/{}", query.namespace, query.auid.as_deref().unwrap_or("*"), query.url.as_deref().unwrap_or(""));
        let mut results = self.list(query);
        let first = results.next().transpose()?;
        if first.is_some() && matches!(results.has_next(), Ok(true)) {
            warn!(query = %description, "repository returned more than one artifact for a unique query; using the first");
        }
        results.close();
        Ok(first)
    }

    // === Enumeration ===

    pub fn get_namespaces(&self) -> PagingIter<String> {
        PagingIter::start(
            NamespaceSource {
                transport: Arc::clone(&self.transport),
            },
            &self.paging,
        )
    }

    pub fn get_au_ids(&self, namespace: &str) -> RepoResult<PagingIter<String>> {
        require(namespace, "namespace")?;
        Ok(PagingIter::start(
            AuidSource {
                transport: Arc::clone(&self.transport),
                namespace: namespace.to_string(),
            },
            &self.paging,
        ))
    }

    /// Latest committed version of every URL in an AU.
    pub fn get_artifacts(&self, namespace: &str, auid: &str) -> RepoResult<PagingIter<Artifact>> {
        self.au_listing(namespace, auid, None, None, ArtifactVersions::Latest)
    }

    /// Every committed version of every URL in an AU.
    pub fn get_artifacts_all_versions_all_urls(&self, namespace: &str, auid: &str) -> RepoResult<PagingIter<Artifact>> {
        self.au_listing(namespace, auid, None, None, ArtifactVersions::All)
    }

    /// Every committed version of one URL.
    pub fn get_artifacts_all_versions(&self, namespace: &str, auid: &str, url: &str) -> RepoResult<PagingIter<Artifact>> {
        require(url, "url")?;
        self.au_listing(namespace, auid, Some(url), None, ArtifactVersions::All)
    }

    /// Latest committed version of every URL starting with `prefix`.
    pub fn get_artifacts_with_prefix(&self, namespace: &str, auid: &str, prefix: &str) -> RepoResult<PagingIter<Artifact>> {
        require(prefix, "url prefix")?;
        self.au_listing(namespace, auid, None, Some(prefix), ArtifactVersions::Latest)
    }

    pub fn get_artifacts_with_prefix_all_versions(
        &self,
        namespace: &str,
        auid: &str,
        prefix: &str,
    ) -> RepoResult<PagingIter<Artifact>> {
        require(prefix, "url prefix")?;
        self.au_listing(namespace, auid, None, Some(prefix), ArtifactVersions::All)
    }

    /// Versions of `url` in every AU of the namespace.
    pub fn get_artifacts_with_url_from_all_aus(
        &self,
        namespace: &str,
        url: &str,
        versions: ArtifactVersions,
    ) -> RepoResult<PagingIter<Artifact>> {
        require(namespace, "namespace")?;
        require(url, "url")?;
        Ok(self.list(ListingQuery {
            namespace: namespace.to_string(),
            url: Some(url.to_string()),
            versions,
            ..Default::default()
        }))
    }

    /// Versions of URLs starting with `prefix` in every AU of the namespace.
    pub fn get_artifacts_with_url_prefix_from_all_aus(
        &self,
        namespace: &str,
        prefix: &str,
        versions: ArtifactVersions,
    ) -> RepoResult<PagingIter<Artifact>> {
        require(namespace, "namespace")?;
        require(prefix, "url prefix")?;
        Ok(self.list(ListingQuery {
            namespace: namespace.to_string(),
            url_prefix: Some(prefix.to_string()),
            versions,
            ..Default::default()
        }))
    }

    fn au_listing(
        &self,
        namespace: &str,
        auid: &str,
        url: Option<&str>,
        prefix: Option<&str>,
        versions: ArtifactVersions,
    ) -> RepoResult<PagingIter<Artifact>> {
        require(namespace, "namespace")?;
        require(auid, "auid")?;
        Ok(self.list(ListingQuery {
            namespace: namespace.to_string(),
            auid: Some(auid.to_string()),
            url: url.map(String::from),
            url_prefix: prefix.map(String::from),
            versions,
            ..Default::default()
        }))
    }

    fn list(&self, query: ListingQuery) -> PagingIter<Artifact> {
        let source = ArtifactSource {
            transport: Arc::clone(&self.transport),
            cache: Arc::clone(&self.cache),
            query,
        };
        PagingIter::start(source, &self.paging)
    }

    // === Reports ===

    pub fn au_size(&self, namespace: &str, auid: &str) -> RepoResult<AuSize> {
        require(namespace, "namespace")?;
        require(auid, "auid")?;
        let request = HttpRequest::get(&["aus", auid, "size"]).query(PARAM_NAMESPACE, namespace);
        execute_json(self.transport.as_ref(), request)
    }

    pub fn get_repository_info(&self) -> RepoResult<RepositoryInfo> {
        execute_json(self.transport.as_ref(), HttpRequest::get(&["repoinfo"]))
    }

    pub fn get_storage_info(&self) -> RepoResult<StorageInfo> {
        execute_json(self.transport.as_ref(), HttpRequest::get(&["repoinfo", "storage"]))
    }

    // === Bulk store ===

    /// Put an AU into bulk mode: artifacts added are indexed only when
    /// [`finish_bulk_store`](Self::finish_bulk_store) is called.
    pub fn start_bulk_store(&self, namespace: &str, auid: &str) -> RepoResult<()> {
        self.bulk_op(namespace, auid, "start")?;
        self.cache.invalidate_au(namespace, auid);
        Ok(())
    }

    /// Leave bulk mode. Blocks until the repository has indexed everything
    /// stored meanwhile, which can take a long time.
    pub fn finish_bulk_store(&self, namespace: &str, auid: &str) -> RepoResult<()> {
        self.bulk_op(namespace, auid, "finish")?;
        self.cache.invalidate_au(namespace, auid);
        info!(namespace, auid, "bulk store finished");
        Ok(())
    }

    fn bulk_op(&self, namespace: &str, auid: &str, op: &str) -> RepoResult<HttpResponse> {
        require(namespace, "namespace")?;
        require(auid, "auid")?;
        let request = HttpRequest::new(Method::Put, &["aus", auid, "bulk"])
            .query(PARAM_NAMESPACE, namespace)
            .query("op", op);
        execute(self.transport.as_ref(), request)
    }
}
