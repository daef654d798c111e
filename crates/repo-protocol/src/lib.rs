//! Artifact Repository Protocol Types
//!
//! Wire-level value types and codecs shared by the repository client and the
//! in-process mock repository. Nothing in this crate performs I/O policy:
//! callers decide where bytes come from and where they go.

pub mod artifact;
pub mod error;
pub mod headers;
pub mod http;
pub mod import;
pub mod info;
pub mod message;
pub mod multipart;
pub mod pages;

pub use artifact::{Artifact, ArtifactIdentifier};
pub use error::{ProtocolError, ProtocolResult};
pub use headers::{Headers, StatusLine};
pub use import::{ImportStatus, ImportStatusKind};
pub use info::{ApiStatus, AuSize, RepositoryInfo, StorageInfo};
pub use message::{CacheMessage, InvalidateOp, MessageError};
pub use multipart::{MultipartBuilder, Part};
pub use pages::{ArtifactPage, AuidPage, PageInfo};

/// Query parameter carrying the namespace on every endpoint.
pub const PARAM_NAMESPACE: &str = "namespace";

/// Query parameter carrying the server-issued paging cursor.
pub const PARAM_CONTINUATION_TOKEN: &str = "continuationToken";

/// Query parameter carrying the requested page size.
pub const PARAM_LIMIT: &str = "limit";

/// Response header naming the shape of an artifact fetch response.
pub const HEADER_ARTIFACT_DATA_TYPE: &str = "X-Artifact-Data-Type";

/// Response header stating whether payload bytes are part of the response.
pub const HEADER_CONTENT_INCLUDED: &str = "X-Artifact-Content-Included";

/// Content type of a framed HTTP response.
pub const CONTENT_TYPE_HTTP_RESPONSE: &str = "application/http; msgtype=response";

/// Content type of multipart request and response bodies.
pub const CONTENT_TYPE_MULTIPART: &str = "multipart/form-data";

/// Content type of WARC archives accepted by bulk import.
pub const CONTENT_TYPE_WARC: &str = "application/warc";

/// Multipart part names.
pub mod parts {
    pub const ARTIFACT_PROPS: &str = "artifactProps";
    pub const HTTP_STATUS: &str = "httpStatus";
    pub const HTTP_HEADERS: &str = "httpHeaders";
    pub const PAYLOAD: &str = "payload";
    pub const ARCHIVE: &str = "archive";
}

/// Values of [`HEADER_ARTIFACT_DATA_TYPE`].
pub mod shapes {
    pub const HTTP_RESPONSE: &str = "http-response";
    pub const RESOURCE: &str = "resource";
    pub const HEADERS_ONLY: &str = "headers-only";
}

/// Default pub/sub topic carrying cache invalidation messages.
pub const DEFAULT_CACHE_TOPIC: &str = "artifact-cache";
