//! Two-part LRU store for artifacts and artifact data.

use std::collections::HashMap;
use std::io::{Cursor, Read};
use std::num::NonZeroUsize;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use lru::LruCache;
use parking_lot::Mutex;
use repo_protocol::{Artifact, ArtifactIdentifier, CacheMessage, Headers, InvalidateOp, MessageError, StatusLine};
use tracing::{debug, warn};

use super::{CacheConfig, CacheStats};
use crate::data::{ArtifactData, ContentStream, IncludeContent};
use crate::pubsub::Message;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct UuidKey {
    namespace: String,
    uuid: String,
}

impl UuidKey {
    fn new(namespace: &str, uuid: &str) -> Self {
        Self {
            namespace: namespace.to_string(),
            uuid: uuid.to_string(),
        }
    }

    fn of(id: &ArtifactIdentifier) -> Self {
        Self::new(&id.namespace, &id.uuid)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct VersionKey {
    namespace: String,
    auid: String,
    uri: String,
    version: i32,
}

impl VersionKey {
    fn of(id: &ArtifactIdentifier) -> Self {
        Self {
            namespace: id.namespace.clone(),
            auid: id.auid.clone(),
            uri: id.uri.clone(),
            version: id.version,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct LatestKey {
    namespace: String,
    auid: String,
    uri: String,
}

impl LatestKey {
    fn new(namespace: &str, auid: &str, uri: &str) -> Self {
        Self {
            namespace: namespace.to_string(),
            auid: auid.to_string(),
            uri: uri.to_string(),
        }
    }

    fn of(id: &ArtifactIdentifier) -> Self {
        Self::new(&id.namespace, &id.auid, &id.uri)
    }
}

/// Cached response of one artifact, content buffered if small enough.
struct CachedData {
    artifact: Artifact,
    http_status: Option<StatusLine>,
    headers: Headers,
    store_date: Option<DateTime<Utc>>,
    content: Option<Arc<[u8]>>,
}

impl CachedData {
    fn to_data(&self, with_content: bool) -> ArtifactData {
        let content = if with_content {
            self.content.clone().map(ContentStream::from_bytes)
        } else {
            None
        };
        let mut data = ArtifactData::from_artifact(
            &self.artifact,
            self.http_status.clone(),
            self.headers.clone(),
            content,
        );
        data.store_date = self.store_date;
        data
    }
}

struct CacheInner {
    enabled: bool,
    artifacts: LruCache<UuidKey, Artifact>,
    versions: HashMap<VersionKey, String>,
    latest: HashMap<LatestKey, String>,
    data: LruCache<UuidKey, CachedData>,
    stats: CacheStats,
    /// Bumped by every invalidation and flush.
    generation: u64,
}

impl CacheInner {
    fn insert_artifact(&mut self, artifact: &Artifact) {
        let key = UuidKey::of(&artifact.identifier);
        self.versions
            .insert(VersionKey::of(&artifact.identifier), artifact.uuid().to_string());
        if let Some((old_key, old)) = self.artifacts.push(key.clone(), artifact.clone()) {
            if old_key != key {
                self.drop_indices(&old.identifier);
            }
        }
        if let Some(entry) = self.data.peek_mut(&key) {
            entry.artifact = artifact.clone();
        }
        self.stats.stores += 1;
    }

    /// Remove index entries that still point at `id`'s uuid.
    fn drop_indices(&mut self, id: &ArtifactIdentifier) {
        let version_key = VersionKey::of(id);
        if self.versions.get(&version_key).is_some_and(|u| *u == id.uuid) {
            self.versions.remove(&version_key);
        }
        let latest_key = LatestKey::of(id);
        if self.latest.get(&latest_key).is_some_and(|u| *u == id.uuid) {
            self.latest.remove(&latest_key);
        }
    }

    /// Identity of a cached uuid, from either part.
    fn identity(&self, key: &UuidKey) -> Option<ArtifactIdentifier> {
        self.artifacts
            .peek(key)
            .map(|a| a.identifier.clone())
            .or_else(|| self.data.peek(key).map(|d| d.artifact.identifier.clone()))
    }

    fn remove_uuid(&mut self, key: &UuidKey) {
        if let Some(old) = self.artifacts.pop(key) {
            self.drop_indices(&old.identifier);
        }
        self.data.pop(key);
    }

    fn invalidate(&mut self, op: InvalidateOp, id: &ArtifactIdentifier) {
        let uuid = if id.is_assigned() {
            Some(id.uuid.clone())
        } else {
            self.versions.get(&VersionKey::of(id)).cloned()
        };
        if let Some(uuid) = uuid {
            self.remove_uuid(&UuidKey::new(&id.namespace, &uuid));
        }
        if op.affects_latest() {
            self.latest.remove(&LatestKey::of(id));
        }
        self.generation += 1;
        self.stats.invalidations += 1;
    }

    fn invalidate_au(&mut self, namespace: &str, auid: &str) {
        let matches = |id: &ArtifactIdentifier| id.namespace == namespace && id.auid == auid;

        let keys: Vec<UuidKey> = self
            .artifacts
            .iter()
            .filter(|(_, a)| matches(&a.identifier))
            .map(|(k, _)| k.clone())
            .collect();
        for key in &keys {
            self.artifacts.pop(key);
        }

        let keys: Vec<UuidKey> = self
            .data
            .iter()
            .filter(|(_, d)| matches(&d.artifact.identifier))
            .map(|(k, _)| k.clone())
            .collect();
        for key in &keys {
            self.data.pop(key);
        }

        self.versions
            .retain(|k, _| !(k.namespace == namespace && k.auid == auid));
        self.latest
            .retain(|k, _| !(k.namespace == namespace && k.auid == auid));
        self.generation += 1;
        self.stats.invalidations += 1;
    }

    fn flush(&mut self) {
        self.artifacts.clear();
        self.versions.clear();
        self.latest.clear();
        self.data.clear();
        self.generation += 1;
    }

    /// Whether results fetched at `since` may still be stored.
    fn accepts(&self, since: Generation) -> bool {
        self.enabled && self.generation == since.0
    }
}

/// Point in the cache's invalidation history.
///
/// Taken before a request is sent; a result fetched at an older generation
/// is not stored, since an invalidation it predates may already have been
/// applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Generation(u64);

/// Bounded, invalidation-driven cache of artifacts and their data.
///
/// Starts disabled; while disabled every lookup misses and every store is
/// ignored. All operations take one lock, so readers never see a partial
/// update.
pub struct ArtifactCache {
    inner: Mutex<CacheInner>,
    max_content_bytes: u64,
    small_content_threshold: u64,
}

impl ArtifactCache {
    pub fn new(config: &CacheConfig) -> Self {
        let capacity = |n: usize| NonZeroUsize::new(n).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner: Mutex::new(CacheInner {
                enabled: false,
                artifacts: LruCache::new(capacity(config.max_artifacts)),
                versions: HashMap::new(),
                latest: HashMap::new(),
                data: LruCache::new(capacity(config.max_artifact_data)),
                stats: CacheStats::default(),
                generation: 0,
            }),
            max_content_bytes: config.max_cached_content_bytes,
            small_content_threshold: config.small_content_threshold,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.lock().enabled
    }

    /// Enable or disable. Disabling drops every entry.
    pub fn set_enabled(&self, enabled: bool) {
        let mut inner = self.inner.lock();
        if inner.enabled != enabled {
            debug!(enabled, "artifact cache toggled");
            inner.generation += 1;
        }
        inner.enabled = enabled;
        if !enabled {
            inner.flush();
        }
    }

    pub fn stats(&self) -> CacheStats {
        self.inner.lock().stats
    }

    /// Number of cached artifacts.
    pub fn len(&self) -> usize {
        self.inner.lock().artifacts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of cached artifact data entries.
    pub fn data_len(&self) -> usize {
        self.inner.lock().data.len()
    }

    // === Metadata part ===

    pub fn get(&self, namespace: &str, uuid: &str) -> Option<Artifact> {
        let mut inner = self.inner.lock();
        if !inner.enabled {
            return None;
        }
        let found = inner.artifacts.get(&UuidKey::new(namespace, uuid)).cloned();
        let stats = &mut inner.stats;
        record(&mut stats.hits, &mut stats.misses, found.is_some());
        found
    }

    pub fn get_versioned(&self, namespace: &str, auid: &str, uri: &str, version: i32) -> Option<Artifact> {
        let mut inner = self.inner.lock();
        if !inner.enabled {
            return None;
        }
        let key = VersionKey {
            namespace: namespace.to_string(),
            auid: auid.to_string(),
            uri: uri.to_string(),
            version,
        };
        let found = match inner.versions.get(&key).cloned() {
            Some(uuid) => inner.artifacts.get(&UuidKey::new(namespace, &uuid)).cloned(),
            None => None,
        };
        let stats = &mut inner.stats;
        record(&mut stats.hits, &mut stats.misses, found.is_some());
        found
    }

    /// Latest committed version of a URL, if known.
    pub fn get_latest(&self, namespace: &str, auid: &str, uri: &str) -> Option<Artifact> {
        let mut inner = self.inner.lock();
        if !inner.enabled {
            return None;
        }
        let found = match inner.latest.get(&LatestKey::new(namespace, auid, uri)).cloned() {
            Some(uuid) => inner.artifacts.get(&UuidKey::new(namespace, &uuid)).cloned(),
            None => None,
        };
        let stats = &mut inner.stats;
        record(&mut stats.hits, &mut stats.misses, found.is_some());
        found
    }

    /// Current invalidation generation; see [`Generation`].
    pub fn generation(&self) -> Generation {
        Generation(self.inner.lock().generation)
    }

    pub fn put(&self, artifact: &Artifact) {
        self.put_since(artifact, self.generation());
    }

    /// Store `artifact` unless an invalidation was applied after `since`.
    pub fn put_since(&self, artifact: &Artifact, since: Generation) -> bool {
        let mut inner = self.inner.lock();
        if !inner.accepts(since) || !artifact.identifier.is_assigned() {
            return false;
        }
        inner.insert_artifact(artifact);
        true
    }

    /// Store `artifact` as the latest version of its URL.
    pub fn put_latest(&self, artifact: &Artifact) {
        self.put_latest_since(artifact, self.generation());
    }

    /// [`put_latest`](Self::put_latest), skipped when stale like [`put_since`](Self::put_since).
    pub fn put_latest_since(&self, artifact: &Artifact, since: Generation) -> bool {
        let mut inner = self.inner.lock();
        if !inner.accepts(since) || !artifact.identifier.is_assigned() {
            return false;
        }
        inner.insert_artifact(artifact);
        inner
            .latest
            .insert(LatestKey::of(&artifact.identifier), artifact.uuid().to_string());
        true
    }

    /// Record a commit acknowledged by the repository.
    ///
    /// Commits may complete out of order, so the latest entry for the URL is
    /// dropped rather than pointed at `artifact`. The artifact itself is
    /// only stored when nothing was invalidated since `since`.
    pub fn apply_commit(&self, artifact: &Artifact, since: Generation) {
        let mut inner = self.inner.lock();
        if !inner.enabled || !artifact.identifier.is_assigned() {
            return;
        }
        let current = inner.accepts(since);
        inner.latest.remove(&LatestKey::of(&artifact.identifier));
        inner.generation += 1;
        if current {
            inner.insert_artifact(artifact);
        }
    }

    // === Data part ===

    /// Cache `data` and return it with a readable content stream.
    ///
    /// Content up to the configured limit is buffered so later reads get
    /// their own copy. Larger content is passed through unbuffered and the
    /// entry is cached without it.
    pub fn put_data(&self, data: ArtifactData) -> ArtifactData {
        self.put_data_since(data, self.generation())
    }

    /// [`put_data`](Self::put_data) for data fetched at `since`.
    ///
    /// The data is handed back either way; it is only cached when no
    /// invalidation was applied in between.
    pub fn put_data_since(&self, mut data: ArtifactData, since: Generation) -> ArtifactData {
        if !self.inner.lock().accepts(since) || !data.identifier.is_assigned() {
            return data;
        }

        let (cached, returned) = match data.take_content() {
            None => (None, None),
            Some(stream) => match buffer_content(stream, self.max_content_bytes) {
                Ok(bytes) => (Some(Arc::clone(&bytes)), Some(ContentStream::from_bytes(bytes))),
                Err(stream) => (None, Some(stream)),
            },
        };
        data.set_content(returned);

        let artifact = data.artifact();
        let entry = CachedData {
            artifact: artifact.clone(),
            http_status: data.http_status.clone(),
            headers: data.headers.clone(),
            store_date: data.store_date,
            content: cached,
        };

        let mut inner = self.inner.lock();
        if inner.accepts(since) {
            inner.insert_artifact(&artifact);
            inner.data.put(UuidKey::of(&artifact.identifier), entry);
            inner.stats.data_stores += 1;
        } else {
            debug!(namespace = %artifact.namespace(), uuid = %artifact.uuid(), "invalidated while fetching; not caching");
        }
        data
    }

    /// Cached data satisfying `include`, with an independent content stream.
    pub fn get_data(&self, namespace: &str, uuid: &str, include: IncludeContent) -> Option<ArtifactData> {
        let threshold = self.small_content_threshold;
        let mut inner = self.inner.lock();
        if !inner.enabled {
            return None;
        }

        let found = inner.data.get(&UuidKey::new(namespace, uuid)).and_then(|entry| {
            let usable = match include {
                IncludeContent::Always => entry.content.is_some(),
                IncludeContent::Never => true,
                IncludeContent::IfSmall => {
                    entry.content.is_some() || entry.artifact.content_length > threshold as i64
                }
            };
            usable.then(|| entry.to_data(include != IncludeContent::Never))
        });
        let stats = &mut inner.stats;
        record(&mut stats.data_hits, &mut stats.data_misses, found.is_some());
        found
    }

    // === Invalidation ===

    pub fn invalidate_artifact(&self, op: InvalidateOp, id: &ArtifactIdentifier) {
        let mut inner = self.inner.lock();
        if inner.enabled {
            debug!(op = op.as_str(), namespace = %id.namespace, uuid = %id.uuid, "invalidating artifact");
            inner.invalidate(op, id);
        }
    }

    /// Drop everything cached for a uuid whose artifact is being deleted.
    pub fn invalidate_uuid(&self, namespace: &str, uuid: &str) {
        let mut inner = self.inner.lock();
        if !inner.enabled {
            return;
        }
        let key = UuidKey::new(namespace, uuid);
        match inner.identity(&key) {
            Some(id) => inner.invalidate(InvalidateOp::Delete, &id),
            None => {
                inner.remove_uuid(&key);
                inner.generation += 1;
            }
        }
    }

    /// Drop every entry of an AU.
    pub fn invalidate_au(&self, namespace: &str, auid: &str) {
        let mut inner = self.inner.lock();
        if inner.enabled {
            debug!(namespace, auid, "invalidating AU");
            inner.invalidate_au(namespace, auid);
        }
    }

    pub fn flush(&self) {
        let mut inner = self.inner.lock();
        inner.flush();
        inner.stats.invalidations += 1;
    }

    /// Apply a decoded invalidation. Handshake messages are ignored here.
    pub fn apply_message(&self, message: &CacheMessage) {
        match message {
            CacheMessage::InvalidateArtifact { op, id } => self.invalidate_artifact(*op, id),
            CacheMessage::InvalidateAu { namespace, auid } => self.invalidate_au(namespace, auid),
            CacheMessage::Flush => {
                debug!("flushing artifact cache on request");
                self.flush();
            }
            CacheMessage::Echo { .. } | CacheMessage::EchoResp { .. } => {}
        }
    }

    /// Decode and apply a raw topic message.
    ///
    /// Unknown and malformed messages are logged and dropped.
    pub fn handle_message(&self, message: &Message) -> Option<CacheMessage> {
        match CacheMessage::from_map(message) {
            Ok(decoded) => {
                self.apply_message(&decoded);
                Some(decoded)
            }
            Err(MessageError::UnknownAction(action)) => {
                debug!(%action, "ignoring cache message with unknown action");
                None
            }
            Err(MessageError::Malformed(reason)) => {
                warn!(%reason, "ignoring malformed cache message");
                None
            }
        }
    }
}

fn record(hits: &mut u64, misses: &mut u64, hit: bool) {
    if hit {
        *hits += 1;
    } else {
        *misses += 1;
    }
}

/// Buffer content of at most `limit` bytes.
///
/// On `Err` the returned stream still yields the complete content.
fn buffer_content(stream: ContentStream, limit: u64) -> Result<Arc<[u8]>, ContentStream> {
    let mut stream = match stream {
        ContentStream::Buffered(cursor) if cursor.position() == 0 => {
            let bytes = cursor.into_inner();
            return if bytes.len() as u64 <= limit {
                Ok(bytes)
            } else {
                Err(ContentStream::from_bytes(bytes))
            };
        }
        other => other,
    };

    let mut prefix = Vec::new();
    match stream.by_ref().take(limit.saturating_add(1)).read_to_end(&mut prefix) {
        Ok(_) if prefix.len() as u64 <= limit => Ok(Arc::from(prefix)),
        Ok(_) => Err(ContentStream::from_reader(Cursor::new(prefix).chain(stream))),
        Err(e) => {
            warn!(error = %e, "could not buffer artifact content; not caching it");
            Err(ContentStream::from_reader(Cursor::new(prefix).chain(stream)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    fn config() -> CacheConfig {
        CacheConfig {
            max_artifacts: 4,
            max_artifact_data: 2,
            max_cached_content_bytes: 16,
            small_content_threshold: 8,
            ..CacheConfig::default()
        }
    }

    fn enabled_cache() -> ArtifactCache {
        let cache = ArtifactCache::new(&config());
        cache.set_enabled(true);
        cache
    }

    fn artifact(auid: &str, uri: &str, version: i32, uuid: &str) -> Artifact {
        Artifact {
            identifier: ArtifactIdentifier::new("ns", auid, uri, version, uuid),
            committed: true,
            content_length: 5,
            content_digest: "SHA-256:ab".to_string(),
            storage_url: None,
            collection_date: None,
        }
    }

    fn data_for(artifact: &Artifact, payload: &[u8]) -> ArtifactData {
        ArtifactData::from_artifact(
            artifact,
            Some(StatusLine::ok()),
            Headers::new().with("Content-Type", "text/plain"),
            Some(ContentStream::from_bytes(payload.to_vec())),
        )
    }

    // === Enable/disable ===

    #[test]
    fn test_disabled_cache_is_noop() {
        let cache = ArtifactCache::new(&config());
        let a = artifact("au", "http://x/1", 1, "u1");
        cache.put(&a);
        assert!(cache.get("ns", "u1").is_none());
        assert!(cache.is_empty());
        assert_eq!(cache.stats(), CacheStats::default());
    }

    #[test]
    fn test_disable_flushes() {
        let cache = enabled_cache();
        cache.put(&artifact("au", "http://x/1", 1, "u1"));
        cache.set_enabled(false);
        cache.set_enabled(true);
        assert!(cache.get("ns", "u1").is_none());
    }

    // === Lookups ===

    #[test]
    fn test_three_indices() {
        let cache = enabled_cache();
        let v1 = artifact("au", "http://x/1", 1, "u1");
        let v2 = artifact("au", "http://x/1", 2, "u2");
        cache.put(&v1);
        cache.put_latest(&v2);

        assert_eq!(cache.get("ns", "u1"), Some(v1.clone()));
        assert_eq!(cache.get_versioned("ns", "au", "http://x/1", 1), Some(v1));
        assert_eq!(cache.get_latest("ns", "au", "http://x/1"), Some(v2));
        assert!(cache.get_latest("ns", "au", "http://x/other").is_none());
        assert!(cache.get("other-ns", "u1").is_none());

        let stats = cache.stats();
        assert_eq!(stats.hits, 3);
        assert_eq!(stats.misses, 2);
    }

    #[test]
    fn test_eviction_drops_indices() {
        let cache = enabled_cache();
        cache.put_latest(&artifact("au", "http://x/0", 1, "u0"));
        for i in 1..=4 {
            cache.put(&artifact("au", &format!("http://x/{i}"), 1, &format!("u{i}")));
        }
        assert_eq!(cache.len(), 4);
        assert!(cache.get_latest("ns", "au", "http://x/0").is_none());
        assert!(cache.get_versioned("ns", "au", "http://x/0", 1).is_none());
        assert_eq!(cache.inner.lock().versions.len(), 4);
        assert!(cache.inner.lock().latest.is_empty());
    }

    // === Data part ===

    #[test]
    fn test_cached_content_is_replayable() {
        let cache = enabled_cache();
        let a = artifact("au", "http://x/1", 1, "u1");
        let mut returned = cache.put_data(data_for(&a, b"hello"));
        assert_eq!(returned.read_content().unwrap().unwrap(), b"hello");

        for _ in 0..2 {
            let mut hit = cache.get_data("ns", "u1", IncludeContent::Always).unwrap();
            assert_eq!(hit.read_content().unwrap().unwrap(), b"hello");
            assert_eq!(hit.headers.get("content-type"), Some("text/plain"));
        }
        assert_eq!(cache.get("ns", "u1"), Some(a));
    }

    #[test]
    fn test_large_streamed_content_is_not_buffered() {
        let cache = enabled_cache();
        let mut a = artifact("au", "http://x/big", 1, "big");
        a.content_length = 40;
        let data = ArtifactData::from_artifact(
            &a,
            None,
            Headers::new(),
            Some(ContentStream::from_reader(io::repeat(b'z').take(40))),
        );

        let mut returned = cache.put_data(data);
        assert_eq!(returned.read_content().unwrap().unwrap(), vec![b'z'; 40]);

        assert!(cache.get_data("ns", "big", IncludeContent::Always).is_none());
        // Too big to count as small, so a content-less entry satisfies IF_SMALL.
        let hit = cache.get_data("ns", "big", IncludeContent::IfSmall).unwrap();
        assert!(!hit.has_content());
        assert!(cache.get_data("ns", "big", IncludeContent::Never).is_some());
    }

    #[test]
    fn test_never_strips_content() {
        let cache = enabled_cache();
        let a = artifact("au", "http://x/1", 1, "u1");
        cache.put_data(data_for(&a, b"hello"));
        let hit = cache.get_data("ns", "u1", IncludeContent::Never).unwrap();
        assert!(!hit.has_content());
    }

    #[test]
    fn test_small_entry_without_content_misses_if_small() {
        let cache = enabled_cache();
        let a = artifact("au", "http://x/1", 1, "u1");
        let data = ArtifactData::from_artifact(&a, None, Headers::new(), None);
        cache.put_data(data);

        assert!(cache.get_data("ns", "u1", IncludeContent::IfSmall).is_none());
        assert!(cache.get_data("ns", "u1", IncludeContent::Never).is_some());
    }

    #[test]
    fn test_data_part_has_its_own_bound() {
        let cache = enabled_cache();
        for i in 0..3 {
            let a = artifact("au", &format!("http://x/{i}"), 1, &format!("u{i}"));
            cache.put_data(data_for(&a, b"x"));
        }
        assert_eq!(cache.data_len(), 2);
        assert_eq!(cache.len(), 3);
        assert!(cache.get_data("ns", "u0", IncludeContent::Always).is_none());
    }

    // === Commit and invalidation ===

    #[test]
    fn test_commit_refreshes_data_metadata_and_drops_latest() {
        let cache = enabled_cache();
        let mut a = artifact("au", "http://x/1", 1, "u1");
        a.committed = false;
        cache.put_latest(&artifact("au", "http://x/1", 0, "u0"));
        cache.put_data(data_for(&a, b"hello"));

        a.committed = true;
        cache.apply_commit(&a, cache.generation());

        let hit = cache.get_data("ns", "u1", IncludeContent::Never).unwrap();
        assert!(hit.committed);
        assert!(cache.get_latest("ns", "au", "http://x/1").is_none());
    }

    #[test]
    fn test_update_spares_latest_but_delete_does_not() {
        let cache = enabled_cache();
        let v1 = artifact("au", "http://x/1", 1, "u1");
        let v2 = artifact("au", "http://x/1", 2, "u2");
        cache.put(&v1);
        cache.put_latest(&v2);

        cache.invalidate_artifact(InvalidateOp::Update, &v1.identifier);
        assert!(cache.get("ns", "u1").is_none());
        assert!(cache.get_latest("ns", "au", "http://x/1").is_some());

        cache.put(&v1);
        cache.invalidate_artifact(InvalidateOp::Delete, &v1.identifier);
        assert!(cache.get("ns", "u1").is_none());
        assert!(cache.get_latest("ns", "au", "http://x/1").is_none());
        assert!(cache.get("ns", "u2").is_some());
    }

    #[test]
    fn test_invalidate_uuid_uses_data_identity() {
        let cache = ArtifactCache::new(&CacheConfig {
            max_artifacts: 1,
            ..config()
        });
        cache.set_enabled(true);
        let a = artifact("au", "http://x/1", 1, "u1");
        cache.put_data(data_for(&a, b"x"));
        cache.put(&artifact("au", "http://x/2", 1, "u2"));

        cache.invalidate_uuid("ns", "u1");
        assert!(cache.get_data("ns", "u1", IncludeContent::Never).is_none());
    }

    #[test]
    fn test_invalidate_au_is_scoped() {
        let cache = enabled_cache();
        cache.put_latest(&artifact("a1", "http://x/1", 1, "u1"));
        cache.put(&artifact("a2", "http://x/1", 1, "u2"));
        cache.put_data(data_for(&artifact("a1", "http://x/2", 1, "u3"), b"x"));

        cache.invalidate_au("ns", "a1");

        assert!(cache.get("ns", "u1").is_none());
        assert!(cache.get_latest("ns", "a1", "http://x/1").is_none());
        assert!(cache.get_data("ns", "u3", IncludeContent::Never).is_none());
        assert!(cache.get("ns", "u2").is_some());
    }

    #[test]
    fn test_handle_message_ignores_unknown_and_malformed() {
        let cache = enabled_cache();
        cache.put(&artifact("au", "http://x/1", 1, "u1"));

        let unknown = serde_json::json!({"action": "Compact", "key": "x"});
        assert!(cache.handle_message(unknown.as_object().unwrap()).is_none());
        let malformed = serde_json::json!({"action": "InvalidateAu", "key": 12});
        assert!(cache.handle_message(malformed.as_object().unwrap()).is_none());
        assert!(cache.get("ns", "u1").is_some());

        let flush = CacheMessage::Flush.to_map();
        assert_eq!(cache.handle_message(&flush), Some(CacheMessage::Flush));
        assert!(cache.get("ns", "u1").is_none());
    }

    // === Results fetched across an invalidation ===

    #[test]
    fn test_stale_results_are_not_stored() {
        let cache = enabled_cache();
        let a = artifact("au", "http://x/1", 1, "u1");
        let since = cache.generation();

        cache.invalidate_uuid("ns", "u1");

        let mut returned = cache.put_data_since(data_for(&a, b"hello"), since);
        assert_eq!(returned.read_content().unwrap().unwrap(), b"hello");
        assert!(!cache.put_since(&a, since));
        assert!(!cache.put_latest_since(&a, since));
        assert!(cache.get_data("ns", "u1", IncludeContent::Never).is_none());
        assert!(cache.get_latest("ns", "au", "http://x/1").is_none());

        assert!(cache.put_latest_since(&a, cache.generation()));
        assert!(cache.get_latest("ns", "au", "http://x/1").is_some());
    }

    #[test]
    fn test_generation_moves_on_every_invalidation() {
        let cache = enabled_cache();
        let mut seen = vec![cache.generation()];
        cache.invalidate_artifact(InvalidateOp::Update, &ArtifactIdentifier::new("ns", "au", "http://x/1", 1, "u1"));
        seen.push(cache.generation());
        cache.invalidate_au("ns", "au");
        seen.push(cache.generation());
        cache.flush();
        seen.push(cache.generation());
        cache.apply_commit(&artifact("au", "http://x/1", 1, "u1"), cache.generation());
        seen.push(cache.generation());

        for pair in seen.windows(2) {
            assert_ne!(pair[0], pair[1]);
        }
    }

    #[test]
    fn test_commit_after_invalidation_only_drops_latest() {
        let cache = enabled_cache();
        cache.put_latest(&artifact("au", "http://x/1", 1, "u1"));
        let since = cache.generation();
        cache.invalidate_uuid("ns", "u2");

        cache.apply_commit(&artifact("au", "http://x/1", 2, "u2"), since);

        assert!(cache.get("ns", "u2").is_none());
        assert!(cache.get_latest("ns", "au", "http://x/1").is_none());
    }
}
