//! Artifact Lifecycle Tests
//!
//! Upload, commit, fetch in each response shape, delete, and the service
//! reports, through the public client against the in-memory repository.

mod common;

use std::io::Cursor;

use artifact_repo_client::client::TransportError;
use artifact_repo_client::mock::{FailureConfig, MockOptions, MockRepository, Route};
use artifact_repo_client::{
    ArtifactData, ArtifactIdentifier, ContentStream, Headers, IncludeContent, RepoError, StatusLine,
};
use common::plain_client;

fn html(ns: &str, auid: &str, uri: &str, body: &[u8]) -> ArtifactData {
    ArtifactData::from_bytes(
        ArtifactIdentifier::unassigned(ns, auid, uri),
        Some(StatusLine::ok()),
        Headers::new().with("Content-Type", "text/html").with("Server", "test"),
        body.to_vec(),
    )
}

// =============================================================================
// Upload and commit
// =============================================================================

#[test]
fn test_add_assigns_identity_and_versions() {
    let repository = MockRepository::new();
    let client = plain_client(&repository);

    let v1 = client.add_artifact(html("ns1", "au1", "http://x.test/", b"one")).unwrap();
    let v2 = client.add_artifact(html("ns1", "au1", "http://x.test/", b"two!")).unwrap();

    assert_eq!(v1.version(), 1);
    assert_eq!(v2.version(), 2);
    assert_ne!(v1.uuid(), v2.uuid());
    assert!(!v1.committed);
    assert_eq!(v2.content_length, 4);
    assert!(v2.content_digest.starts_with("SHA-256:"));
    assert!(repository.contains("ns1", v1.uuid()));
}

#[test]
fn test_add_streams_unbuffered_content() {
    let repository = MockRepository::new();
    let client = plain_client(&repository);
    let data = ArtifactData::new(
        ArtifactIdentifier::unassigned("ns1", "au1", "http://x.test/stream"),
        Some(StatusLine::new(404, "Not Found")),
        Headers::new().with("Content-Type", "text/plain"),
        ContentStream::from_reader(Cursor::new(b"missing page".to_vec())),
    );

    let added = client.add_artifact(data).unwrap();
    let mut fetched = client
        .get_artifact_data(&added, IncludeContent::Always)
        .unwrap();

    assert_eq!(fetched.http_status.as_ref().map(|s| s.code), Some(404));
    assert_eq!(fetched.read_content().unwrap().unwrap(), b"missing page");
}

#[test]
fn test_add_resource_without_status_line() {
    let repository = MockRepository::new();
    let client = plain_client(&repository);
    let data = ArtifactData::from_bytes(
        ArtifactIdentifier::unassigned("ns1", "au1", "urn:x-resource:1"),
        None,
        Headers::new().with("Content-Type", "application/pdf"),
        b"%PDF".to_vec(),
    )
    .with_collection_date(1_700_000_000_000);

    let added = client.add_artifact(data).unwrap();
    let fetched = client
        .get_artifact_data(&added, IncludeContent::Never)
        .unwrap();

    assert_eq!(added.collection_date, Some(1_700_000_000_000));
    assert!(fetched.http_status.is_none());
    assert_eq!(fetched.headers.get("Content-Type"), Some("application/pdf"));
}

#[test]
fn test_resource_headers_survive_refetch() {
    let repository = MockRepository::new();
    let client = plain_client(&repository);
    client.cache().set_enabled(true);
    let data = ArtifactData::from_bytes(
        ArtifactIdentifier::unassigned("ns1", "au1", "urn:x-resource:scan"),
        None,
        Headers::new()
            .with("Content-Type", "image/tiff")
            .with("X-Source", "scan-42"),
        b"II*\0".to_vec(),
    );

    let added = client.add_artifact(data).unwrap();
    let cached = client.get_artifact_data(&added, IncludeContent::Never).unwrap();
    client.cache().flush();
    let mut remote = client.get_artifact_data(&added, IncludeContent::Always).unwrap();

    assert_eq!(repository.request_count(Route::GetArtifact), 1);
    assert_eq!(cached.headers.get("X-Source"), Some("scan-42"));
    assert_eq!(remote.headers.get("X-Source"), Some("scan-42"));
    assert_eq!(remote.headers.get("Content-Type"), Some("image/tiff"));
    assert!(remote.http_status.is_none());
    assert_eq!(remote.read_content().unwrap().unwrap(), b"II*\0");
}

#[test]
fn test_commit_makes_artifact_visible() {
    let repository = MockRepository::new();
    let client = plain_client(&repository);
    let added = client.add_artifact(html("ns1", "au1", "http://x.test/", b"x")).unwrap();

    assert_eq!(client.get_artifact("ns1", "au1", "http://x.test/").unwrap(), None);
    let uncommitted = client
        .get_artifact_version("ns1", "au1", "http://x.test/", 1, true)
        .unwrap();
    assert_eq!(uncommitted.map(|a| a.uuid().to_string()), Some(added.uuid().to_string()));

    let committed = client.commit_artifact("ns1", added.uuid()).unwrap();
    let latest = client.get_artifact("ns1", "au1", "http://x.test/").unwrap();

    assert_eq!(latest, Some(committed));
}

#[test]
fn test_latest_follows_newest_commit() {
    let repository = MockRepository::new();
    let client = plain_client(&repository);
    client.cache().set_enabled(true);
    let v1 = client.add_artifact(html("ns1", "au1", "http://x.test/", b"1")).unwrap();
    client.commit_artifact("ns1", v1.uuid()).unwrap();
    assert_eq!(client.get_artifact("ns1", "au1", "http://x.test/").unwrap().unwrap().version(), 1);

    let v2 = client.add_artifact(html("ns1", "au1", "http://x.test/", b"2")).unwrap();
    client.commit_artifact("ns1", v2.uuid()).unwrap();

    let latest = client.get_artifact("ns1", "au1", "http://x.test/").unwrap().unwrap();
    assert_eq!(latest.version(), 2);
}

#[test]
fn test_version_lookup_ignores_uncommitted_unless_asked() {
    let repository = MockRepository::new();
    let client = plain_client(&repository);
    client.cache().set_enabled(true);
    let added = client.add_artifact(html("ns1", "au1", "http://x.test/", b"x")).unwrap();

    assert_eq!(
        client
            .get_artifact_version("ns1", "au1", "http://x.test/", added.version(), false)
            .unwrap(),
        None
    );
    assert!(client
        .get_artifact_version("ns1", "au1", "http://x.test/", added.version(), true)
        .unwrap()
        .is_some());
}

// =============================================================================
// Fetch shapes
// =============================================================================

#[test]
fn test_resource_shape_fetch() {
    let repository = MockRepository::with_options(MockOptions {
        resource_shape: true,
        ..MockOptions::default()
    });
    let client = plain_client(&repository);
    let seeded = repository.seed("ns1", "au1", "http://x.test/r", b"resource body", true);

    let mut data = client
        .get_artifact_data(&seeded, IncludeContent::Always)
        .unwrap();

    assert_eq!(data.http_status.as_ref().map(|s| s.code), Some(200));
    assert_eq!(data.headers.get("Content-Type"), Some("text/plain"));
    assert_eq!(data.read_content().unwrap().unwrap(), b"resource body");
    assert!(data.store_date.is_some());
}

#[test]
fn test_if_small_omits_large_content() {
    let repository = MockRepository::with_options(MockOptions {
        small_content_threshold: 8,
        ..MockOptions::default()
    });
    let client = plain_client(&repository);
    let small = repository.seed("ns1", "au1", "http://x.test/s", b"tiny", true);
    let large = repository.seed("ns1", "au1", "http://x.test/l", b"well over eight bytes", true);

    let small = client.get_artifact_data(&small, IncludeContent::IfSmall).unwrap();
    let large = client.get_artifact_data(&large, IncludeContent::IfSmall).unwrap();

    assert!(small.has_content());
    assert!(!large.has_content());
    assert_eq!(large.headers.get("Content-Type"), Some("text/plain"));
    assert_eq!(large.content_length, 21);
}

#[test]
fn test_shape_inferred_without_header() {
    let repository = MockRepository::with_options(MockOptions {
        shape_header: false,
        ..MockOptions::default()
    });
    let client = plain_client(&repository);
    let seeded = repository.seed("ns1", "au1", "http://x.test/i", b"inferred", true);

    let mut full = client.get_artifact_data(&seeded, IncludeContent::Always).unwrap();
    let bare = client.get_artifact_data(&seeded, IncludeContent::Never).unwrap();

    assert_eq!(full.read_content().unwrap().unwrap(), b"inferred");
    assert!(!bare.has_content());
}

// =============================================================================
// Delete
// =============================================================================

#[test]
fn test_delete_removes_artifact() {
    let repository = MockRepository::new();
    let client = plain_client(&repository);
    let seeded = repository.seed("ns1", "au1", "http://x.test/", b"x", true);

    client.delete_artifact("ns1", seeded.uuid()).unwrap();

    assert!(!repository.contains("ns1", seeded.uuid()));
    assert_eq!(client.get_artifact("ns1", "au1", "http://x.test/").unwrap(), None);
    assert!(client.delete_artifact("ns1", seeded.uuid()).unwrap_err().is_not_found());
}

// =============================================================================
// Errors
// =============================================================================

#[test]
fn test_blank_arguments_send_nothing() {
    let repository = MockRepository::new();
    let client = plain_client(&repository);

    assert!(matches!(
        client.add_artifact(html("", "au1", "http://x.test/", b"x")),
        Err(RepoError::InvalidArgument(_))
    ));
    assert!(matches!(
        client.add_artifact(html("ns1", "au1", "", b"x")),
        Err(RepoError::InvalidArgument(_))
    ));
    assert!(matches!(client.delete_artifact("ns1", ""), Err(RepoError::InvalidArgument(_))));
    assert!(matches!(client.get_artifact("ns1", "au1", ""), Err(RepoError::InvalidArgument(_))));
    assert!(matches!(client.get_artifacts("", "au1"), Err(RepoError::InvalidArgument(_))));
    assert!(matches!(client.au_size("ns1", ""), Err(RepoError::InvalidArgument(_))));
    assert_eq!(repository.total_requests(), 0);
}

#[test]
fn test_server_errors_propagate() {
    let repository = MockRepository::new();
    let client = plain_client(&repository);
    let seeded = repository.seed("ns1", "au1", "http://x.test/", b"x", true);
    repository.inject_failure(Route::GetArtifact, FailureConfig::status(503, "busy").with_fail_count(1));

    let err = client.get_artifact_data(&seeded, IncludeContent::Always).unwrap_err();
    assert!(matches!(err, RepoError::Remote { status: 503, .. }));
    assert!(client.get_artifact_data(&seeded, IncludeContent::Always).is_ok());
}

#[test]
fn test_transport_errors_propagate() {
    let repository = MockRepository::new();
    let client = plain_client(&repository);
    repository.inject_failure(Route::CommitArtifact, FailureConfig::disconnect());

    let err = client.commit_artifact("ns1", "u1").unwrap_err();
    assert!(matches!(err, RepoError::Transport(TransportError::ConnectionFailed(_))));
}

// =============================================================================
// Service reports
// =============================================================================

#[test]
fn test_status_and_readiness() {
    let repository = MockRepository::new();
    let client = plain_client(&repository);

    assert!(client.get_status().unwrap().ready);
    assert!(client.is_ready());

    repository.inject_failure(Route::Status, FailureConfig::disconnect());
    assert!(!client.is_ready());
}

#[test]
fn test_au_size() {
    let repository = MockRepository::new();
    let client = plain_client(&repository);
    repository.seed("ns1", "au1", "http://x.test/a", b"1234", true);
    repository.seed("ns1", "au1", "http://x.test/a", b"123456", true);
    repository.seed("ns1", "au1", "http://x.test/b", b"12", true);

    let size = client.au_size("ns1", "au1").unwrap();

    assert_eq!(size.total_all_versions, 12);
    assert_eq!(size.total_latest_versions, 8);
}

#[test]
fn test_repository_and_storage_info() {
    let repository = MockRepository::new();
    let client = plain_client(&repository);

    let info = client.get_repository_info().unwrap();
    let storage = client.get_storage_info().unwrap();

    assert!(!info.store_info.kind.is_empty());
    assert!(!info.index_info.kind.is_empty());
    assert_eq!(storage.kind, info.store_info.kind);
}
