//! Artifact identity and metadata.
//!
//! An artifact is one version of one URL inside one archival unit (AU) of a
//! namespace. Artifacts are immutable value objects: a given
//! `(namespace, uuid)` names exactly one version for its whole lifetime.

use serde::{Deserialize, Serialize};

/// Identity of a single artifact version.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ArtifactIdentifier {
    /// Top-level partition of the repository.
    pub namespace: String,
    /// Archival unit the artifact belongs to.
    pub auid: String,
    /// URL the artifact was collected from.
    pub uri: String,
    /// Version number assigned by the repository (0 = not yet assigned).
    #[serde(default)]
    pub version: i32,
    /// Repository-assigned unique id (empty = not yet assigned).
    #[serde(default)]
    pub uuid: String,
}

impl ArtifactIdentifier {
    /// Create a fully assigned identifier.
    pub fn new(
        namespace: impl Into<String>,
        auid: impl Into<String>,
        uri: impl Into<String>,
        version: i32,
        uuid: impl Into<String>,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            auid: auid.into(),
            uri: uri.into(),
            version,
            uuid: uuid.into(),
        }
    }

    /// Create an identifier for an artifact that has not been stored yet.
    ///
    /// The repository assigns the version and uuid on upload.
    pub fn unassigned(
        namespace: impl Into<String>,
        auid: impl Into<String>,
        uri: impl Into<String>,
    ) -> Self {
        Self::new(namespace, auid, uri, 0, String::new())
    }

    /// Whether the repository has assigned a uuid to this identity.
    pub fn is_assigned(&self) -> bool {
        !self.uuid.is_empty()
    }
}

/// Metadata of one stored artifact version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Artifact {
    #[serde(flatten)]
    pub identifier: ArtifactIdentifier,
    /// Set once by commit; never reverts.
    #[serde(default)]
    pub committed: bool,
    pub content_length: i64,
    /// Digest of the payload, e.g. `SHA-256:<hex>`.
    #[serde(default)]
    pub content_digest: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_url: Option<String>,
    /// Milliseconds since the epoch at which the content was collected.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collection_date: Option<i64>,
}

impl Artifact {
    pub fn namespace(&self) -> &str {
        &self.identifier.namespace
    }

    pub fn auid(&self) -> &str {
        &self.identifier.auid
    }

    pub fn uri(&self) -> &str {
        &self.identifier.uri
    }

    pub fn version(&self) -> i32 {
        self.identifier.version
    }

    pub fn uuid(&self) -> &str {
        &self.identifier.uuid
    }
}
