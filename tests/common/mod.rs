//! Shared fixtures: a client wired to an in-memory repository and broker.

#![allow(dead_code)]

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use artifact_repo_client::client::MockTransport;
use artifact_repo_client::mock::{EchoResponder, MockRepository};
use artifact_repo_client::pubsub::LocalBroker;
use artifact_repo_client::{CacheState, ClientConfig, RepositoryClient};
use serde_json::json;

pub const TOPIC: &str = "test-cache";
pub const WAIT: Duration = Duration::from_secs(5);

/// Config with short handshake timings.
pub fn config() -> ClientConfig {
    ClientConfig::from_layers([json!({
        "cache": {
            "topic": TOPIC,
            "echo_interval_ms": 50,
            "retry_initial_delay_ms": 10,
            "retry_max_delay_ms": 50
        },
        "paging": { "queue_timeout_seconds": 5 }
    })])
    .unwrap()
}

/// Client without a cache.
pub fn plain_client(repository: &MockRepository) -> RepositoryClient {
    let transport = Arc::new(MockTransport::with_repository(repository.clone()));
    RepositoryClient::new(transport, &config())
}

/// A repository publishing invalidations, with an echo responder running.
pub struct Fixture {
    pub repository: MockRepository,
    pub broker: LocalBroker,
    _responder: EchoResponder,
}

impl Fixture {
    pub fn new() -> Self {
        let broker = LocalBroker::new();
        let repository = MockRepository::new();
        repository.publish_invalidations(&broker, TOPIC);
        let responder = EchoResponder::start(&broker, TOPIC).unwrap();
        Self {
            repository,
            broker,
            _responder: responder,
        }
    }

    /// Client whose cache is enabled.
    pub fn client(&self) -> RepositoryClient {
        let mut client = plain_client(&self.repository);
        client.enable_cache(Arc::new(self.broker.clone())).unwrap();
        assert!(
            client.wait_for_cache_state(CacheState::Enabled, WAIT),
            "cache did not enable, state {:?}",
            client.cache_state()
        );
        client
    }
}

/// Poll `condition` until it holds or `WAIT` passes.
pub fn eventually(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + WAIT;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    condition()
}
