//! Paging Iterator Tests
//!
//! Listings driven through the client against the in-memory repository:
//! totality across page boundaries, termination, abandonment and failures.

mod common;

use std::thread;
use std::time::Duration;

use artifact_repo_client::mock::{FailureConfig, MockRepository, Route};
use artifact_repo_client::paging::IterState;
use artifact_repo_client::{PagingConfig, RepoError, RepositoryClient};
use common::plain_client;
use proptest::prelude::*;

fn seed_urls(repository: &MockRepository, auid: &str, n: usize) -> Vec<String> {
    (0..n)
        .map(|i| {
            let uri = format!("http://x.test/{i:04}");
            repository.seed("ns1", auid, &uri, uri.as_bytes(), true);
            uri
        })
        .collect()
}

fn client_with(repository: &MockRepository, paging: PagingConfig) -> RepositoryClient {
    plain_client(repository).with_paging(paging)
}

// =============================================================================
// Totality
// =============================================================================

#[test]
fn test_five_records_in_pages_of_two() {
    let repository = MockRepository::new();
    let expected = seed_urls(&repository, "au1", 5);
    let mut client = plain_client(&repository);
    client.set_page_sizes(&[2]);

    let mut records = client.get_artifacts("ns1", "au1").unwrap();
    let mut seen = Vec::new();
    for _ in 0..5 {
        assert!(records.has_next().unwrap());
        seen.push(records.next().unwrap().unwrap().uri().to_string());
    }

    assert!(!records.has_next().unwrap());
    assert!(records.next().is_none());
    assert_eq!(seen, expected);
    assert_eq!(records.state(), IterState::Done);
    assert_eq!(repository.request_count(Route::AuArtifacts), 3);
}

#[test]
fn test_growing_page_sizes() {
    let repository = MockRepository::new();
    let expected = seed_urls(&repository, "au1", 12);
    let client = client_with(
        &repository,
        PagingConfig {
            page_sizes: vec![1, 3, 5],
            ..PagingConfig::default()
        },
    );

    let seen: Vec<String> = client
        .get_artifacts_all_versions_all_urls("ns1", "au1")
        .unwrap()
        .map(|r| r.unwrap().uri().to_string())
        .collect();

    assert_eq!(seen, expected);
    // 1 + 3 + 5, then 3 left in one more page of 5
    assert_eq!(repository.request_count(Route::AuArtifacts), 4);
}

#[test]
fn test_empty_listing() {
    let repository = MockRepository::new();
    let client = plain_client(&repository);

    let mut records = client.get_artifacts("ns1", "nothing").unwrap();
    assert!(!records.has_next().unwrap());
    assert!(records.next().is_none());
}

#[test]
fn test_au_ids_across_pages() {
    let repository = MockRepository::new();
    for i in 0..7 {
        repository.seed("ns1", &format!("au{i}"), "http://x.test/", b"x", true);
    }
    repository.seed("ns2", "other", "http://x.test/", b"x", true);
    let mut client = plain_client(&repository);
    client.set_page_sizes(&[3]);

    let auids: Vec<String> = client.get_au_ids("ns1").unwrap().map(Result::unwrap).collect();

    assert_eq!(auids, (0..7).map(|i| format!("au{i}")).collect::<Vec<_>>());
    assert_eq!(repository.request_count(Route::Aus), 3);
}

#[test]
fn test_namespaces_single_request() {
    let repository = MockRepository::new();
    repository.seed("b", "au", "http://x.test/", b"x", true);
    repository.seed("a", "au", "http://x.test/", b"x", true);
    let mut client = plain_client(&repository);
    client.set_page_sizes(&[1]);

    let namespaces: Vec<String> = client.get_namespaces().map(Result::unwrap).collect();

    assert_eq!(namespaces, vec!["a", "b"]);
    assert_eq!(repository.request_count(Route::Namespaces), 1);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn prop_every_record_once_in_order(
        n in 0usize..40,
        sizes in proptest::collection::vec(1usize..8, 1..4),
    ) {
        let repository = MockRepository::new();
        let expected = seed_urls(&repository, "au1", n);
        let client = client_with(&repository, PagingConfig {
            page_sizes: sizes,
            queue_capacity: 2,
            queue_timeout: Duration::from_secs(5),
        });

        let seen: Vec<String> = client
            .get_artifacts("ns1", "au1")
            .unwrap()
            .map(|r| r.unwrap().uri().to_string())
            .collect();

        prop_assert_eq!(seen, expected);
    }
}

// =============================================================================
// Abandonment
// =============================================================================

#[test]
fn test_dropped_iterator_stops_fetching() {
    let repository = MockRepository::new();
    seed_urls(&repository, "au1", 50);
    let client = client_with(
        &repository,
        PagingConfig {
            page_sizes: vec![1],
            queue_capacity: 1,
            queue_timeout: Duration::from_secs(5),
        },
    );

    let mut records = client.get_artifacts("ns1", "au1").unwrap();
    records.next().unwrap().unwrap();
    records.next().unwrap().unwrap();
    drop(records);

    thread::sleep(Duration::from_millis(100));
    let settled = repository.request_count(Route::AuArtifacts);
    thread::sleep(Duration::from_millis(200));

    assert_eq!(repository.request_count(Route::AuArtifacts), settled);
    assert!(settled < 10, "producer kept fetching: {settled} requests");
}

#[test]
fn test_close_discards_buffered_records() {
    let repository = MockRepository::new();
    seed_urls(&repository, "au1", 6);
    let client = plain_client(&repository);

    let mut records = client.get_artifacts("ns1", "au1").unwrap();
    assert!(records.next().is_some());
    records.close();

    assert_eq!(records.state(), IterState::Terminated);
    assert!(!records.has_next().unwrap());
    assert!(records.next().is_none());
}

// =============================================================================
// Failures
// =============================================================================

#[test]
fn test_remote_error_is_terminal() {
    let repository = MockRepository::new();
    seed_urls(&repository, "au1", 3);
    repository.inject_failure(Route::AuArtifacts, FailureConfig::status(500, "index offline"));
    let client = plain_client(&repository);

    let mut records = client.get_artifacts("ns1", "au1").unwrap();
    match records.next() {
        Some(Err(RepoError::Remote { status, message })) => {
            assert_eq!(status, 500);
            assert_eq!(message, "index offline");
        }
        other => panic!("expected remote error, got {other:?}"),
    }
    assert!(records.next().is_none());
    assert_eq!(records.state(), IterState::Done);
}

#[test]
fn test_slow_page_times_out() {
    let repository = MockRepository::new();
    seed_urls(&repository, "au1", 3);
    repository.inject_failure(Route::AuArtifacts, FailureConfig::delay(Duration::from_millis(500)));
    let client = client_with(
        &repository,
        PagingConfig {
            queue_timeout: Duration::from_millis(50),
            ..PagingConfig::default()
        },
    );

    let mut records = client.get_artifacts("ns1", "au1").unwrap();
    assert!(matches!(records.has_next(), Err(RepoError::IteratorTimeout(_))));
    assert_eq!(records.state(), IterState::Terminated);
    assert!(records.next().is_none());
}

#[test]
fn test_unique_lookup_takes_first_of_duplicates() {
    let repository = MockRepository::new();
    let seeded = repository.seed("ns1", "au1", "http://x.test/dup", b"x", true);
    repository.configure(|o| o.duplicate_latest = true);
    let client = plain_client(&repository);

    let found = client.get_artifact("ns1", "au1", "http://x.test/dup").unwrap();

    assert_eq!(found, Some(seeded));
}
