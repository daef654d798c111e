//! Artifact Repository Client
//!
//! Client for a versioned web-archive artifact repository: upload, commit,
//! fetch, delete and enumerate archived HTTP responses, with a local cache
//! kept coherent by invalidation messages from the repository.
//!
//! The client speaks to the repository through a [`client::Transport`]; the
//! HTTP adapter is [`client::HttpTransport`] and [`mock::MockRepository`] is
//! an in-memory repository for tests.

pub mod cache;
pub mod client;
pub mod config;
pub mod data;
pub mod error;
pub mod mock;
pub mod paging;
pub mod pubsub;

pub use cache::{ArtifactCache, CacheConfig, CacheState};
pub use client::{ArchiveType, ArtifactVersions, ImportStatusIter, RepositoryClient};
pub use config::ClientConfig;
pub use data::{ArtifactData, ContentStream, IncludeContent};
pub use error::{RepoError, RepoResult};
pub use paging::{PagingConfig, PagingIter};
pub use repo_protocol::{Artifact, ArtifactIdentifier, Headers, ImportStatus, ImportStatusKind, StatusLine};
