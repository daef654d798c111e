//! Mock Repository Implementation
//!
//! In-process implementation of the repository REST protocol for tests.

use std::collections::HashMap;
use std::sync::Arc;
use std::thread;

use parking_lot::Mutex;
use repo_protocol::http::{decode_response, encode_response};
use repo_protocol::multipart::{self, boundary_from_content_type};
use repo_protocol::{
    parts, shapes, ApiStatus, ArtifactPage, AuidPage, CacheMessage, Headers, ImportStatus,
    ImportStatusKind, InvalidateOp, MultipartBuilder, PageInfo, Part, RepositoryInfo, StatusLine,
    StorageInfo, CONTENT_TYPE_HTTP_RESPONSE, HEADER_ARTIFACT_DATA_TYPE, HEADER_CONTENT_INCLUDED,
    PARAM_CONTINUATION_TOKEN, PARAM_LIMIT, PARAM_NAMESPACE,
};
use serde_json::json;
use tracing::debug;

use super::failure::{FailureConfig, FailureInjector};
use super::state::{content_digest, ArtifactQuery, MockState, NewArtifact, VersionFilter};
use super::warc::{WarcReader, WarcRecord};
use super::Route;
use crate::client::transport::{HttpRequest, HttpResponse, TransportError};
use crate::data::IncludeContent;
use crate::pubsub::LocalBroker;

/// Page size used when a listing request names none
const DEFAULT_LIMIT: usize = 1000;

/// Handler outcome; `Err` carries an error response.
type Reply = Result<HttpResponse, HttpResponse>;

/// Behaviour switches for the mock repository
#[derive(Debug, Clone)]
pub struct MockOptions {
    /// Reported by `GET /status`
    pub ready: bool,
    /// Payloads up to this size are included for `IF_SMALL`
    pub small_content_threshold: u64,
    /// Send HTTP responses in the `resource` shape instead of framed
    pub resource_shape: bool,
    /// Send the `X-Artifact-Data-Type` header
    pub shape_header: bool,
    /// Answer latest-version queries with every match twice
    pub duplicate_latest: bool,
}

impl Default for MockOptions {
    fn default() -> Self {
        Self {
            ready: true,
            small_content_threshold: 4096,
            resource_shape: false,
            shape_header: true,
            duplicate_latest: false,
        }
    }
}

/// Configurable in-process repository
///
/// Cloning yields another handle to the same repository.
#[derive(Clone, Default)]
pub struct MockRepository {
    state: Arc<Mutex<MockState>>,
    failures: Arc<Mutex<FailureInjector>>,
    requests: Arc<Mutex<HashMap<Route, usize>>>,
    options: Arc<Mutex<MockOptions>>,
    invalidations: Arc<Mutex<Option<(LocalBroker, String)>>>,
}

impl MockRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_options(options: MockOptions) -> Self {
        let repository = Self::new();
        *repository.options.lock() = options;
        repository
    }

    // === Public API for test configuration ===

    pub fn configure(&self, f: impl FnOnce(&mut MockOptions)) {
        f(&mut self.options.lock());
    }

    pub fn set_ready(&self, ready: bool) {
        self.options.lock().ready = ready;
    }

    /// Publish invalidations for commits, deletes and AU changes on `topic`.
    pub fn publish_invalidations(&self, broker: &LocalBroker, topic: &str) {
        *self.invalidations.lock() = Some((broker.clone(), topic.to_string()));
    }

    pub fn inject_failure(&self, route: Route, config: FailureConfig) {
        self.failures.lock().inject(route, config);
    }

    pub fn clear_failures(&self) {
        self.failures.lock().clear();
    }

    /// Requests received on `route`
    pub fn request_count(&self, route: Route) -> usize {
        self.requests.lock().get(&route).copied().unwrap_or(0)
    }

    pub fn total_requests(&self) -> usize {
        self.requests.lock().values().sum()
    }

    pub fn reset_request_counts(&self) {
        self.requests.lock().clear();
    }

    /// Store an archived `200 OK` text response directly.
    pub fn seed(&self, namespace: &str, auid: &str, uri: &str, payload: &[u8], committed: bool) -> repo_protocol::Artifact {
        let mut state = self.state.lock();
        let artifact = state.add(NewArtifact {
            namespace: namespace.to_string(),
            auid: auid.to_string(),
            uri: uri.to_string(),
            collection_date: None,
            http_status: Some(StatusLine::ok()),
            headers: Headers::new()
                .with("Content-Type", "text/plain")
                .with("Content-Length", payload.len().to_string()),
            payload: payload.to_vec(),
        });
        if committed {
            state.commit(namespace, artifact.uuid()).unwrap_or(artifact)
        } else {
            artifact
        }
    }

    pub fn contains(&self, namespace: &str, uuid: &str) -> bool {
        self.state.lock().get(namespace, uuid).is_some()
    }

    pub fn artifact_count(&self) -> usize {
        self.state.lock().len()
    }

    // === Request handling ===

    /// Serve one request.
    pub fn handle(&self, mut request: HttpRequest) -> Result<HttpResponse, TransportError> {
        let Some(route) = Route::resolve(request.method, &request.path) else {
            return Ok(error(404, "no such endpoint"));
        };
        *self.requests.lock().entry(route).or_insert(0) += 1;

        let failure = self.failures.lock().check(route);
        if let Some(failure) = failure {
            if let Some(delay) = failure.delay {
                thread::sleep(delay);
            }
            if failure.disconnect {
                return Err(TransportError::ConnectionFailed(format!("injected failure on {route:?}")));
            }
            if let Some(status) = failure.status {
                let message = failure.message.as_deref().unwrap_or("injected failure");
                return Ok(error(status, message));
            }
        }

        let body = request.read_body()?;
        debug!(?route, method = request.method.as_str(), "mock repository request");
        Ok(self.dispatch(route, &request, &body).unwrap_or_else(|e| e))
    }

    fn dispatch(&self, route: Route, request: &HttpRequest, body: &[u8]) -> Reply {
        match route {
            Route::Status => Ok(self.status()),
            Route::Namespaces => Ok(HttpResponse::json(200, &self.state.lock().namespaces())),
            Route::Aus => self.list_aus(request),
            Route::AuArtifacts => self.list_au_artifacts(request),
            Route::Artifacts => self.list_artifacts(request),
            Route::AddArtifact => self.add_artifact(request, body),
            Route::GetArtifact => self.get_artifact(request),
            Route::CommitArtifact => self.commit_artifact(request, body),
            Route::DeleteArtifact => self.delete_artifact(request),
            Route::AddArchive => self.add_archive(request, body),
            Route::AuSize => {
                let namespace = namespace(request)?;
                let size = self.state.lock().au_size(&namespace, &request.path[1]);
                Ok(HttpResponse::json(200, &size))
            }
            Route::BulkStore => self.bulk_store(request),
            Route::RepoInfo => Ok(HttpResponse::json(
                200,
                &RepositoryInfo {
                    store_info: storage("store"),
                    index_info: storage("index"),
                },
            )),
            Route::StorageInfo => Ok(HttpResponse::json(200, &storage("store"))),
        }
    }

    fn status(&self) -> HttpResponse {
        let ready = self.options.lock().ready;
        HttpResponse::json(
            200,
            &ApiStatus {
                api_version: "2.0.0".to_string(),
                component_name: "mock-repository".to_string(),
                ready,
                reason: (!ready).then(|| "starting".to_string()),
            },
        )
    }

    fn list_aus(&self, request: &HttpRequest) -> Reply {
        let namespace = namespace(request)?;
        let (offset, limit) = paging(request)?;
        let auids = self.state.lock().auids(&namespace);
        let (auids, token) = slice_page(&auids, offset, limit);
        Ok(HttpResponse::json(
            200,
            &AuidPage {
                page_info: page_info(auids.len(), token),
                auids,
            },
        ))
    }

    fn list_au_artifacts(&self, request: &HttpRequest) -> Reply {
        let namespace = namespace(request)?;
        let (offset, limit) = paging(request)?;
        let (url, url_prefix) = url_params(request)?;
        let versions = match request.query_param("version").unwrap_or("all") {
            "all" => VersionFilter::All,
            "latest" => VersionFilter::Latest,
            n => VersionFilter::Exact(
                n.parse()
                    .map_err(|_| error(400, &format!("invalid version: {n}")))?,
            ),
        };

        let query = ArtifactQuery {
            namespace: &namespace,
            auid: Some(&request.path[1]),
            url,
            url_prefix,
            versions,
            include_uncommitted: request.query_param("includeUncommitted") == Some("true"),
        };
        Ok(self.artifact_page(&query, offset, limit))
    }

    fn list_artifacts(&self, request: &HttpRequest) -> Reply {
        let namespace = namespace(request)?;
        let (offset, limit) = paging(request)?;
        let (url, url_prefix) = url_params(request)?;
        if url.is_none() && url_prefix.is_none() {
            return Err(error(400, "url or urlPrefix is required"));
        }
        let versions = match request.query_param("versions").unwrap_or("all") {
            "all" => VersionFilter::All,
            "latest" => VersionFilter::Latest,
            other => return Err(error(400, &format!("invalid versions: {other}"))),
        };

        let query = ArtifactQuery {
            namespace: &namespace,
            auid: None,
            url,
            url_prefix,
            versions,
            include_uncommitted: false,
        };
        Ok(self.artifact_page(&query, offset, limit))
    }

    fn artifact_page(&self, query: &ArtifactQuery<'_>, offset: usize, limit: usize) -> HttpResponse {
        let mut found = self.state.lock().query(query);
        if query.versions == VersionFilter::Latest && self.options.lock().duplicate_latest {
            found = found.into_iter().flat_map(|a| [a.clone(), a]).collect();
        }
        let (artifacts, token) = slice_page(&found, offset, limit);
        HttpResponse::json(
            200,
            &ArtifactPage {
                page_info: page_info(artifacts.len(), token),
                artifacts,
            },
        )
    }

    fn add_artifact(&self, request: &HttpRequest, body: &[u8]) -> Reply {
        let parts = parse_parts(request, body)?;
        let props = find_part(&parts, parts::ARTIFACT_PROPS)?;
        let props: serde_json::Value = serde_json::from_slice(&props.body)
            .map_err(|e| error(400, &format!("invalid artifactProps: {e}")))?;
        let field = |name: &str| -> Result<String, HttpResponse> {
            props
                .get(name)
                .and_then(|v| v.as_str())
                .filter(|v| !v.is_empty())
                .map(String::from)
                .ok_or_else(|| error(400, &format!("artifactProps.{name} is required")))
        };

        let payload = find_part(&parts, parts::PAYLOAD)?;
        let (http_status, headers, payload) = if payload
            .content_type()
            .is_some_and(|ct| ct.starts_with("application/http"))
        {
            let (status, headers, bytes) = decode_response(&payload.body)
                .map_err(|e| error(400, &format!("invalid payload: {e}")))?;
            (Some(status), headers, bytes.to_vec())
        } else {
            let content_type = payload.content_type().unwrap_or("application/octet-stream");
            let mut headers = match parts.iter().find(|p| p.name == parts::HTTP_HEADERS) {
                Some(part) => part
                    .body_str()
                    .and_then(Headers::parse_lines)
                    .map_err(|e| error(400, &format!("invalid httpHeaders: {e}")))?,
                None => Headers::new(),
            };
            if headers.get("Content-Type").is_none() {
                headers.append("Content-Type", content_type);
            }
            (None, headers, payload.body.clone())
        };

        let artifact = self.state.lock().add(NewArtifact {
            namespace: field("namespace")?,
            auid: field("auid")?,
            uri: field("uri")?,
            collection_date: props.get("collectionDate").and_then(|v| v.as_i64()),
            http_status,
            headers,
            payload,
        });
        Ok(HttpResponse::json(200, &artifact))
    }

    fn get_artifact(&self, request: &HttpRequest) -> Reply {
        let namespace = namespace(request)?;
        let uuid = &request.path[1];
        let include = request.query_param("includeContent").unwrap_or("ALWAYS");
        let include = IncludeContent::parse(include)
            .ok_or_else(|| error(400, &format!("invalid includeContent: {include}")))?;

        let stored = self
            .state
            .lock()
            .get(&namespace, uuid)
            .cloned()
            .ok_or_else(|| error(404, "artifact not found"))?;
        let options = self.options.lock().clone();
        let with_content = include.wants(stored.artifact.content_length, options.small_content_threshold);

        let mut props = serde_json::to_value(&stored.artifact).map_err(|e| error(500, &e.to_string()))?;
        props["storeDate"] = json!(stored.store_date.to_rfc3339());

        let mut builder = MultipartBuilder::new().bytes(parts::ARTIFACT_PROPS, "application/json", props.to_string());
        let shape = match (&stored.http_status, with_content) {
            (Some(status), true) if !options.resource_shape => {
                let framed = encode_response(status, &stored.headers, &stored.payload);
                builder = builder.bytes(parts::PAYLOAD, CONTENT_TYPE_HTTP_RESPONSE, framed);
                shapes::HTTP_RESPONSE
            }
            (status, with_content) => {
                if let Some(status) = status {
                    builder = builder.bytes(parts::HTTP_STATUS, "text/plain", status.to_string());
                }
                builder = builder.bytes(parts::HTTP_HEADERS, "text/plain", stored.headers.to_lines());
                if with_content {
                    let content_type = stored.headers.get("Content-Type").unwrap_or("application/octet-stream");
                    builder = builder.bytes(parts::PAYLOAD, content_type, stored.payload.clone());
                    shapes::RESOURCE
                } else {
                    shapes::HEADERS_ONLY
                }
            }
        };

        let mut headers = Headers::new().with("Content-Type", builder.content_type());
        if options.shape_header {
            headers.append(HEADER_ARTIFACT_DATA_TYPE, shape);
            headers.append(HEADER_CONTENT_INCLUDED, with_content.to_string());
        }
        let body = builder.into_bytes().map_err(|e| error(500, &e.to_string()))?;
        Ok(HttpResponse::from_bytes(200, headers, body))
    }

    fn commit_artifact(&self, request: &HttpRequest, body: &[u8]) -> Reply {
        let namespace = namespace(request)?;
        if request.query_param("committed") != Some("true") {
            return Err(error(400, "committed=true is required"));
        }
        parse_parts(request, body)?;

        let artifact = self
            .state
            .lock()
            .commit(&namespace, &request.path[1])
            .ok_or_else(|| error(404, "artifact not found"))?;
        self.publish(CacheMessage::InvalidateArtifact {
            op: InvalidateOp::Commit,
            id: artifact.identifier.clone(),
        });
        Ok(HttpResponse::json(200, &artifact))
    }

    fn delete_artifact(&self, request: &HttpRequest) -> Reply {
        let namespace = namespace(request)?;
        let artifact = self
            .state
            .lock()
            .delete(&namespace, &request.path[1])
            .ok_or_else(|| error(404, "artifact not found"))?;
        self.publish(CacheMessage::InvalidateArtifact {
            op: InvalidateOp::Delete,
            id: artifact.identifier,
        });
        Ok(HttpResponse::empty(200))
    }

    fn add_archive(&self, request: &HttpRequest, body: &[u8]) -> Reply {
        let namespace = namespace(request)?;
        let auid = request.path[1].clone();
        let parts = parse_parts(request, body)?;
        let archive = find_part(&parts, parts::ARCHIVE)?;
        let store_duplicate = request.query_param("storeDuplicate") == Some("true");
        let exclude = match request.query_param("excludeStatusPattern").filter(|p| !p.is_empty()) {
            Some(pattern) => Some(
                regex_lite::Regex::new(&format!("^(?:{pattern})$"))
                    .map_err(|e| error(400, &format!("invalid excludeStatusPattern: {e}")))?,
            ),
            None => None,
        };

        let mut out = Vec::new();
        for record in WarcReader::new(&archive.body) {
            let status = match record {
                Ok(record) => match self.import_record(&namespace, &auid, &record, store_duplicate, exclude.as_ref()) {
                    Some(status) => status,
                    None => continue,
                },
                Err(message) => ImportStatus {
                    warc_id: String::new(),
                    offset: 0,
                    url: String::new(),
                    artifact_uuid: None,
                    digest: None,
                    version: None,
                    status: ImportStatusKind::Error,
                    status_message: Some(message),
                },
            };
            let line = serde_json::to_string(&status).map_err(|e| error(500, &e.to_string()))?;
            out.extend_from_slice(line.as_bytes());
            out.push(b'\n');
        }

        self.publish(CacheMessage::InvalidateAu {
            namespace,
            auid,
        });
        let headers = Headers::new().with("Content-Type", "application/x-ndjson");
        Ok(HttpResponse::from_bytes(200, headers, out))
    }

    /// Import one record; `None` for records that carry no artifact.
    fn import_record(
        &self,
        namespace: &str,
        auid: &str,
        record: &WarcRecord,
        store_duplicate: bool,
        exclude: Option<&regex_lite::Regex>,
    ) -> Option<ImportStatus> {
        let mut status = ImportStatus {
            warc_id: record.record_id.clone(),
            offset: record.offset,
            url: record.target_uri.clone().unwrap_or_default(),
            artifact_uuid: None,
            digest: None,
            version: None,
            status: ImportStatusKind::Error,
            status_message: None,
        };

        let (http_status, headers, payload) = match record.record_type.as_str() {
            "response" => match decode_response(&record.block) {
                Ok((s, h, p)) => (Some(s), h, p.to_vec()),
                Err(e) => {
                    status.status_message = Some(e.to_string());
                    return Some(status);
                }
            },
            "resource" => (None, Headers::new(), record.block.clone()),
            _ => return None,
        };

        let Some(uri) = record.target_uri.clone() else {
            status.status_message = Some("record has no WARC-Target-URI".to_string());
            return Some(status);
        };

        if let (Some(pattern), Some(s)) = (exclude, &http_status) {
            if pattern.is_match(&s.code.to_string()) {
                status.status = ImportStatusKind::Excluded;
                status.status_message = Some(format!("HTTP status {} excluded", s.code));
                return Some(status);
            }
        }

        let digest = content_digest(&payload);
        let mut state = self.state.lock();
        if !store_duplicate {
            if let Some(latest) = state.latest(namespace, auid, &uri) {
                if latest.content_digest == digest {
                    status.status = ImportStatusKind::Duplicate;
                    status.artifact_uuid = Some(latest.uuid().to_string());
                    status.version = Some(latest.version());
                    status.digest = Some(digest);
                    return Some(status);
                }
            }
        }

        let collection_date = record
            .date
            .as_deref()
            .and_then(|d| chrono::DateTime::parse_from_rfc3339(d).ok())
            .map(|d| d.timestamp_millis());
        let artifact = state.add(NewArtifact {
            namespace: namespace.to_string(),
            auid: auid.to_string(),
            uri,
            collection_date,
            http_status,
            headers,
            payload,
        });
        if !artifact.committed {
            state.commit(namespace, artifact.uuid());
        }

        status.status = ImportStatusKind::Ok;
        status.artifact_uuid = Some(artifact.uuid().to_string());
        status.version = Some(artifact.version());
        status.digest = Some(artifact.content_digest);
        Some(status)
    }

    fn bulk_store(&self, request: &HttpRequest) -> Reply {
        let namespace = namespace(request)?;
        let auid = request.path[1].clone();
        match request.query_param("op") {
            Some("start") => {
                self.state.lock().start_bulk(&namespace, &auid);
            }
            Some("finish") => {
                let indexed = self.state.lock().finish_bulk(&namespace, &auid);
                debug!(indexed, %auid, "bulk store finished");
                self.publish(CacheMessage::InvalidateAu { namespace, auid });
            }
            _ => return Err(error(400, "op must be start or finish")),
        }
        Ok(HttpResponse::empty(200))
    }

    fn publish(&self, message: CacheMessage) {
        let target = self.invalidations.lock().clone();
        if let Some((broker, topic)) = target {
            broker.publish(&topic, &message.to_map());
        }
    }
}

fn error(status: u16, message: &str) -> HttpResponse {
    HttpResponse::json(status, &json!({ "status": status, "message": message }))
}

fn namespace(request: &HttpRequest) -> Result<String, HttpResponse> {
    request
        .query_param(PARAM_NAMESPACE)
        .filter(|ns| !ns.is_empty())
        .map(String::from)
        .ok_or_else(|| error(400, "namespace is required"))
}

fn paging(request: &HttpRequest) -> Result<(usize, usize), HttpResponse> {
    let limit = match request.query_param(PARAM_LIMIT) {
        Some(l) => l
            .parse::<usize>()
            .ok()
            .filter(|l| *l > 0)
            .ok_or_else(|| error(400, &format!("invalid limit: {l}")))?,
        None => DEFAULT_LIMIT,
    };
    let offset = match request.query_param(PARAM_CONTINUATION_TOKEN) {
        Some(t) => t
            .strip_prefix("offset:")
            .and_then(|o| o.parse::<usize>().ok())
            .ok_or_else(|| error(400, &format!("invalid continuation token: {t}")))?,
        None => 0,
    };
    Ok((offset, limit))
}

fn url_params(request: &HttpRequest) -> Result<(Option<&str>, Option<&str>), HttpResponse> {
    let url = request.query_param("url");
    let prefix = request.query_param("urlPrefix");
    if url.is_some() && prefix.is_some() {
        return Err(error(400, "url and urlPrefix are mutually exclusive"));
    }
    Ok((url, prefix))
}

fn slice_page<T: Clone>(items: &[T], offset: usize, limit: usize) -> (Vec<T>, Option<String>) {
    let start = offset.min(items.len());
    let end = start.saturating_add(limit).min(items.len());
    let token = (end < items.len()).then(|| format!("offset:{end}"));
    (items[start..end].to_vec(), token)
}

fn page_info(results: usize, token: Option<String>) -> PageInfo {
    PageInfo {
        continuation_token: token,
        results_per_page: results,
        total_count: None,
    }
}

fn parse_parts(request: &HttpRequest, body: &[u8]) -> Result<Vec<Part>, HttpResponse> {
    let boundary = request
        .headers
        .get("Content-Type")
        .and_then(boundary_from_content_type)
        .ok_or_else(|| error(415, "multipart/form-data body required"))?;
    multipart::parse(body, &boundary).map_err(|e| error(400, &e.to_string()))
}

fn find_part<'a>(parts: &'a [Part], name: &str) -> Result<&'a Part, HttpResponse> {
    parts
        .iter()
        .find(|p| p.name == name)
        .ok_or_else(|| error(400, &format!("missing part: {name}")))
}

fn storage(name: &str) -> StorageInfo {
    let size: u64 = 100 * 1024 * 1024 * 1024;
    let used: u64 = 25 * 1024 * 1024 * 1024;
    StorageInfo {
        kind: "disk".to_string(),
        name: name.to_string(),
        size,
        used,
        avail: size - used,
        percent_used: used as f64 / size as f64,
    }
}
