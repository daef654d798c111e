//! Mock Repository Implementation
//!
//! In-process stand-in for the remote artifact repository, used by tests
//! through [`crate::client::MockTransport`].
//!
//! # Endpoints
//!
//! - `status`, `namespaces`: readiness and namespace list
//! - `aus`, `aus/{auid}/artifacts`, `artifacts`: continuation-token paging
//! - `artifacts` (POST), `artifacts/{uuid}` (GET, PUT, DELETE): lifecycle
//! - `aus/{auid}/archives`: WARC import with NDJSON status records
//! - `aus/{auid}/size`, `repoinfo`, `repoinfo/storage`: reports
//! - `aus/{auid}/bulk`: bulk store mode
//!
//! Every route supports failure injection and request counting. Commits,
//! deletes and AU changes can be published as invalidations on a
//! [`crate::pubsub::LocalBroker`] topic, where an [`EchoResponder`] answers
//! the cache handshake.

mod failure;
mod repository;
mod responder;
mod state;
mod warc;

pub use failure::{FailureConfig, FailureInjector};
pub use repository::{MockOptions, MockRepository};
pub use responder::EchoResponder;
pub use state::{content_digest, ArtifactQuery, MockState, NewArtifact, StoredArtifact, VersionFilter};
pub use warc::{WarcBuilder, WarcReader, WarcRecord};

use crate::client::transport::Method;

/// Endpoints served by the mock repository
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Route {
    Status,
    Namespaces,
    Aus,
    AuArtifacts,
    AuSize,
    AddArchive,
    BulkStore,
    Artifacts,
    AddArtifact,
    GetArtifact,
    CommitArtifact,
    DeleteArtifact,
    RepoInfo,
    StorageInfo,
}

impl Route {
    /// Route for a method and path, if the repository serves it.
    pub fn resolve(method: Method, path: &[String]) -> Option<Route> {
        let segments: Vec<&str> = path.iter().map(String::as_str).collect();
        let route = match (method, segments.as_slice()) {
            (Method::Get, ["status"]) => Route::Status,
            (Method::Get, ["namespaces"]) => Route::Namespaces,
            (Method::Get, ["aus"]) => Route::Aus,
            (Method::Get, ["aus", _, "artifacts"]) => Route::AuArtifacts,
            (Method::Get, ["aus", _, "size"]) => Route::AuSize,
            (Method::Post, ["aus", _, "archives"]) => Route::AddArchive,
            (Method::Put, ["aus", _, "bulk"]) => Route::BulkStore,
            (Method::Get, ["artifacts"]) => Route::Artifacts,
            (Method::Post, ["artifacts"]) => Route::AddArtifact,
            (Method::Get, ["artifacts", _]) => Route::GetArtifact,
            (Method::Put, ["artifacts", _]) => Route::CommitArtifact,
            (Method::Delete, ["artifacts", _]) => Route::DeleteArtifact,
            (Method::Get, ["repoinfo"]) => Route::RepoInfo,
            (Method::Get, ["repoinfo", "storage"]) => Route::StorageInfo,
            _ => return None,
        };
        Some(route)
    }
}
