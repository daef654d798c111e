//! Artifact Cache
//!
//! In-memory cache of artifact metadata and artifact data kept consistent
//! with the repository by invalidation messages received over a pub/sub
//! topic.
//!
//! ## Parts
//!
//! - Metadata: `(namespace, uuid) -> Artifact` with two secondary indices,
//!   `(namespace, auid, url, version)` and `(namespace, auid, url)` for the
//!   latest version. LRU bounded.
//! - Data: `(namespace, uuid) -> ArtifactData` with buffered content. LRU
//!   bounded separately and smaller, since entries carry payload bytes.
//!
//! ## Enablement
//!
//! ```text
//! Disabled -> Connecting -> ProbeSent -> Enabled
//!     ^           |                        |
//!     +-----------+------(connection lost)-+        any -> Stopped
//! ```
//!
//! Only `Enabled` serves lookups. See [`enabler`] for the handshake.

pub mod enabler;
mod store;

pub use enabler::{CacheEnabler, EnablerSettings};
pub use store::{ArtifactCache, Generation};

use std::time::Duration;

use repo_protocol::DEFAULT_CACHE_TOPIC;

/// Sizing and handshake settings for the cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    /// Whether to start the enabler at all.
    pub enabled: bool,
    pub max_artifacts: usize,
    pub max_artifact_data: usize,
    /// Largest payload buffered into the data part.
    pub max_cached_content_bytes: u64,
    /// Payloads up to this size count as small for `IF_SMALL` fetches.
    pub small_content_threshold: u64,
    pub topic: String,
    pub echo_interval: Duration,
    pub retry_initial_delay: Duration,
    pub retry_max_delay: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_artifacts: 500,
            max_artifact_data: 20,
            max_cached_content_bytes: 4 * 1024 * 1024,
            small_content_threshold: 4096,
            topic: DEFAULT_CACHE_TOPIC.to_string(),
            echo_interval: Duration::from_secs(10),
            retry_initial_delay: Duration::from_secs(1),
            retry_max_delay: Duration::from_secs(60),
        }
    }
}

/// Observable enablement state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheState {
    Disabled,
    Connecting,
    ProbeSent,
    Enabled,
    Stopped,
}

/// Counters since the cache was created.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub stores: u64,
    pub invalidations: u64,
    pub data_hits: u64,
    pub data_misses: u64,
    pub data_stores: u64,
}
