//! Mock Repository State Management
//!
//! Stores artifacts, assigns versions and answers queries for the mock
//! repository.

use std::collections::{BTreeSet, HashMap, HashSet};

use chrono::{DateTime, Utc};
use repo_protocol::{Artifact, ArtifactIdentifier, AuSize, Headers, StatusLine};
use sha2::{Digest, Sha256};

type UuidKey = (String, String);

/// An artifact together with its archived response
#[derive(Debug, Clone)]
pub struct StoredArtifact {
    pub artifact: Artifact,
    /// Absent for resources that were not HTTP responses.
    pub http_status: Option<StatusLine>,
    pub headers: Headers,
    pub payload: Vec<u8>,
    pub store_date: DateTime<Utc>,
}

/// Upload accepted by the repository
#[derive(Debug, Clone)]
pub struct NewArtifact {
    pub namespace: String,
    pub auid: String,
    pub uri: String,
    pub collection_date: Option<i64>,
    pub http_status: Option<StatusLine>,
    pub headers: Headers,
    pub payload: Vec<u8>,
}

/// Version selection of a query
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionFilter {
    All,
    Latest,
    Exact(i32),
}

/// Artifact query. `auid: None` searches every AU of the namespace.
#[derive(Debug, Clone)]
pub struct ArtifactQuery<'a> {
    pub namespace: &'a str,
    pub auid: Option<&'a str>,
    pub url: Option<&'a str>,
    pub url_prefix: Option<&'a str>,
    pub versions: VersionFilter,
    pub include_uncommitted: bool,
}

impl<'a> ArtifactQuery<'a> {
    pub fn new(namespace: &'a str) -> Self {
        Self {
            namespace,
            auid: None,
            url: None,
            url_prefix: None,
            versions: VersionFilter::All,
            include_uncommitted: false,
        }
    }

    fn matches(&self, artifact: &Artifact) -> bool {
        artifact.namespace() == self.namespace
            && self.auid.map_or(true, |a| artifact.auid() == a)
            && self.url.map_or(true, |u| artifact.uri() == u)
            && self.url_prefix.map_or(true, |p| artifact.uri().starts_with(p))
            && (artifact.committed || self.include_uncommitted)
            && match self.versions {
                VersionFilter::Exact(v) => artifact.version() == v,
                _ => true,
            }
    }
}

/// `SHA-256:<hex>` digest of a payload
pub fn content_digest(payload: &[u8]) -> String {
    format!("SHA-256:{}", hex::encode(Sha256::digest(payload)))
}

/// State of the mock repository
#[derive(Debug, Default)]
pub struct MockState {
    artifacts: HashMap<UuidKey, StoredArtifact>,
    /// Stored while their AU was in bulk mode; not indexed yet.
    pending: HashMap<UuidKey, StoredArtifact>,
    bulk_aus: HashSet<UuidKey>,
}

impl MockState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store an upload as a new uncommitted version.
    ///
    /// While the AU is in bulk mode the artifact is committed immediately
    /// but stays invisible until the bulk store finishes.
    pub fn add(&mut self, new: NewArtifact) -> Artifact {
        let version = self.next_version(&new.namespace, &new.auid, &new.uri);
        let uuid = uuid::Uuid::new_v4().to_string();
        let bulk = self
            .bulk_aus
            .contains(&(new.namespace.clone(), new.auid.clone()));

        let artifact = Artifact {
            identifier: ArtifactIdentifier::new(&new.namespace, &new.auid, &new.uri, version, &uuid),
            committed: bulk,
            content_length: new.payload.len() as i64,
            content_digest: content_digest(&new.payload),
            storage_url: Some(format!("mock:///{}/{}/{}", new.namespace, new.auid, uuid)),
            collection_date: new.collection_date,
        };
        let stored = StoredArtifact {
            artifact: artifact.clone(),
            http_status: new.http_status,
            headers: new.headers,
            payload: new.payload,
            store_date: Utc::now(),
        };

        let key = (new.namespace, uuid);
        if bulk {
            self.pending.insert(key, stored);
        } else {
            self.artifacts.insert(key, stored);
        }
        artifact
    }

    fn next_version(&self, namespace: &str, auid: &str, uri: &str) -> i32 {
        self.artifacts
            .values()
            .chain(self.pending.values())
            .map(|s| &s.artifact)
            .filter(|a| a.namespace() == namespace && a.auid() == auid && a.uri() == uri)
            .map(Artifact::version)
            .max()
            .unwrap_or(0)
            + 1
    }

    pub fn get(&self, namespace: &str, uuid: &str) -> Option<&StoredArtifact> {
        self.artifacts.get(&(namespace.to_string(), uuid.to_string()))
    }

    pub fn commit(&mut self, namespace: &str, uuid: &str) -> Option<Artifact> {
        let stored = self
            .artifacts
            .get_mut(&(namespace.to_string(), uuid.to_string()))?;
        stored.artifact.committed = true;
        Some(stored.artifact.clone())
    }

    pub fn delete(&mut self, namespace: &str, uuid: &str) -> Option<Artifact> {
        self.artifacts
            .remove(&(namespace.to_string(), uuid.to_string()))
            .map(|s| s.artifact)
    }

    /// Matching artifacts ordered by AU, URL, then descending version.
    pub fn query(&self, query: &ArtifactQuery<'_>) -> Vec<Artifact> {
        let mut found: Vec<Artifact> = self
            .artifacts
            .values()
            .map(|s| &s.artifact)
            .filter(|a| query.matches(a))
            .cloned()
            .collect();
        found.sort_by(|a, b| {
            (a.auid(), a.uri(), b.version()).cmp(&(b.auid(), b.uri(), a.version()))
        });

        if query.versions == VersionFilter::Latest {
            found.dedup_by(|later, first| later.auid() == first.auid() && later.uri() == first.uri());
        }
        found
    }

    /// Latest committed version of a URL.
    pub fn latest(&self, namespace: &str, auid: &str, uri: &str) -> Option<Artifact> {
        let mut query = ArtifactQuery::new(namespace);
        query.auid = Some(auid);
        query.url = Some(uri);
        query.versions = VersionFilter::Latest;
        self.query(&query).into_iter().next()
    }

    pub fn auids(&self, namespace: &str) -> Vec<String> {
        let set: BTreeSet<&str> = self
            .artifacts
            .values()
            .filter(|s| s.artifact.namespace() == namespace)
            .map(|s| s.artifact.auid())
            .collect();
        set.into_iter().map(String::from).collect()
    }

    pub fn namespaces(&self) -> Vec<String> {
        let set: BTreeSet<&str> = self
            .artifacts
            .values()
            .map(|s| s.artifact.namespace())
            .collect();
        set.into_iter().map(String::from).collect()
    }

    pub fn au_size(&self, namespace: &str, auid: &str) -> AuSize {
        let mut query = ArtifactQuery::new(namespace);
        query.auid = Some(auid);
        let all = self.query(&query);
        query.versions = VersionFilter::Latest;
        let latest = self.query(&query);

        let total = |list: &[Artifact]| list.iter().map(|a| a.content_length.max(0) as u64).sum();
        let warc: u64 = self
            .artifacts
            .values()
            .filter(|s| s.artifact.namespace() == namespace && s.artifact.auid() == auid)
            .map(|s| s.payload.len() as u64)
            .sum();

        AuSize {
            total_latest_versions: total(&latest),
            total_all_versions: total(&all),
            total_warc_size: warc,
        }
    }

    pub fn start_bulk(&mut self, namespace: &str, auid: &str) {
        self.bulk_aus.insert((namespace.to_string(), auid.to_string()));
    }

    /// Leave bulk mode, indexing everything stored meanwhile.
    ///
    /// Returns the number of artifacts indexed.
    pub fn finish_bulk(&mut self, namespace: &str, auid: &str) -> usize {
        self.bulk_aus.remove(&(namespace.to_string(), auid.to_string()));
        let keys: Vec<UuidKey> = self
            .pending
            .iter()
            .filter(|(_, s)| s.artifact.namespace() == namespace && s.artifact.auid() == auid)
            .map(|(k, _)| k.clone())
            .collect();
        for key in &keys {
            if let Some(stored) = self.pending.remove(key) {
                self.artifacts.insert(key.clone(), stored);
            }
        }
        keys.len()
    }

    pub fn is_bulk(&self, namespace: &str, auid: &str) -> bool {
        self.bulk_aus
            .contains(&(namespace.to_string(), auid.to_string()))
    }

    pub fn len(&self) -> usize {
        self.artifacts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.artifacts.is_empty()
    }
}
