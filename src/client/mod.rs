//! Repository Client
//!
//! Talks to the artifact repository over a [`Transport`], consulting and
//! populating the [`crate::cache::ArtifactCache`] along the way.
//!
//! # Modules
//!
//! - `transport`: request/response types, HTTP and mock adapters
//! - `fetch`: decoding of the three artifact fetch shapes
//! - `listing`: page sources for the list endpoints
//! - `import`: streamed bulk import results
//! - `repository`: [`RepositoryClient`], the public operations

mod fetch;
mod import;
mod listing;
mod repository;
pub mod transport;

pub use fetch::DataShape;
pub use import::{ArchiveType, ImportStatusIter};
pub use listing::ArtifactVersions;
pub use repository::RepositoryClient;
pub use transport::{
    HttpConfig, HttpRequest, HttpResponse, HttpTransport, Method, MockTransport, RequestBody, Transport,
    TransportError,
};

use serde::de::DeserializeOwned;

use crate::error::{RepoError, RepoResult};

/// Send `request`, turning any non-2xx answer into [`RepoError::Remote`].
pub(crate) fn execute(transport: &dyn Transport, request: HttpRequest) -> RepoResult<HttpResponse> {
    let response = transport.execute(request)?;
    if response.is_success() {
        return Ok(response);
    }
    let status = response.status;
    Err(RepoError::Remote {
        status,
        message: response.error_message(),
    })
}

/// Send `request` and decode a JSON answer.
pub(crate) fn execute_json<T: DeserializeOwned>(transport: &dyn Transport, request: HttpRequest) -> RepoResult<T> {
    let response = execute(transport, request)?;
    Ok(response.read_json::<T>()??)
}

/// Map a 404 on an identity-addressed request to `NoSuchArtifact`.
pub(crate) fn not_found<'a>(namespace: &'a str, uuid: &'a str) -> impl FnOnce(RepoError) -> RepoError + 'a {
    move |err| match err {
        RepoError::Remote { status: 404, .. } => RepoError::NoSuchArtifact {
            namespace: namespace.to_string(),
            uuid: uuid.to_string(),
        },
        other => other,
    }
}
