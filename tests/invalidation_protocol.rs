//! Invalidation Protocol Tests
//!
//! Raw messages on the cache topic and their effect on an enabled client.

mod common;

use artifact_repo_client::pubsub::Message;
use artifact_repo_client::{CacheState, IncludeContent};
use common::{eventually, Fixture, TOPIC};
use repo_protocol::{CacheMessage, InvalidateOp};
use serde_json::json;

fn raw(value: serde_json::Value) -> Message {
    value.as_object().cloned().unwrap()
}

#[test]
fn test_flush_empties_cache() {
    let fixture = Fixture::new();
    let client = fixture.client();
    let a = fixture.repository.seed("ns1", "au1", "http://x.test/a", b"a", true);
    let b = fixture.repository.seed("ns2", "au2", "http://x.test/b", b"b", true);
    client.get_artifact_data(&a, IncludeContent::Always).unwrap();
    client.get_artifact_data(&b, IncludeContent::Always).unwrap();

    fixture.broker.publish(TOPIC, &CacheMessage::Flush.to_map());

    assert!(eventually(|| client.cache().is_empty() && client.cache().data_len() == 0));
    assert_eq!(client.cache_state(), CacheState::Enabled);
}

#[test]
fn test_update_drops_one_version() {
    let fixture = Fixture::new();
    let client = fixture.client();
    let v1 = fixture.repository.seed("ns1", "au1", "http://x.test/", b"1", true);
    let v2 = fixture.repository.seed("ns1", "au1", "http://x.test/", b"22", true);
    client.get_artifact_data(&v1, IncludeContent::Always).unwrap();
    client.get_artifact_data(&v2, IncludeContent::Always).unwrap();

    let update = CacheMessage::InvalidateArtifact {
        op: InvalidateOp::Update,
        id: v1.identifier.clone(),
    };
    fixture.broker.publish(TOPIC, &update.to_map());

    assert!(eventually(|| client.cache().get("ns1", v1.uuid()).is_none()));
    assert!(client.cache().get("ns1", v2.uuid()).is_some());
}

#[test]
fn test_au_message_spares_other_aus() {
    let fixture = Fixture::new();
    let client = fixture.client();
    let inside = fixture.repository.seed("ns1", "au1", "http://x.test/", b"in", true);
    let other_au = fixture.repository.seed("ns1", "au2", "http://x.test/", b"au2", true);
    let other_ns = fixture.repository.seed("ns2", "au1", "http://x.test/", b"ns2", true);
    for artifact in [&inside, &other_au, &other_ns] {
        client.get_artifact_data(artifact, IncludeContent::Always).unwrap();
    }

    let message = CacheMessage::InvalidateAu {
        namespace: "ns1".to_string(),
        auid: "au1".to_string(),
    };
    fixture.broker.publish(TOPIC, &message.to_map());

    assert!(eventually(|| client.cache().get("ns1", inside.uuid()).is_none()));
    assert!(client.cache().get("ns1", other_au.uuid()).is_some());
    assert!(client.cache().get("ns2", other_ns.uuid()).is_some());
}

#[test]
fn test_bad_messages_are_dropped() {
    let fixture = Fixture::new();
    let client = fixture.client();
    let kept = fixture.repository.seed("ns1", "au1", "http://x.test/", b"k", true);
    let marker = fixture.repository.seed("ns1", "au2", "http://x.test/", b"m", true);
    client.get_artifact_data(&kept, IncludeContent::Always).unwrap();
    client.get_artifact_data(&marker, IncludeContent::Always).unwrap();

    for message in [
        json!({ "action": "InvalidateArtifact", "op": "Update", "key": "not json" }),
        json!({ "action": "InvalidateArtifact", "op": "Rename", "key": "[\"ns1\",\"au1\",\"u\",1,\"x\"]" }),
        json!({ "action": "InvalidateAu", "key": "[\"ns1\"]" }),
        json!({ "action": "Reindex", "key": "[\"ns1\",\"au1\"]" }),
        json!({ "key": "[\"ns1\",\"au1\"]" }),
    ] {
        fixture.broker.publish(TOPIC, &raw(message));
    }
    // Delivered in order, so once this lands the bad ones were handled
    let sentinel = CacheMessage::InvalidateAu {
        namespace: "ns1".to_string(),
        auid: "au2".to_string(),
    };
    fixture.broker.publish(TOPIC, &sentinel.to_map());

    assert!(eventually(|| client.cache().get("ns1", marker.uuid()).is_none()));
    assert!(client.cache().get("ns1", kept.uuid()).is_some());
    assert_eq!(client.cache_state(), CacheState::Enabled);
}

#[test]
fn test_repository_publishes_on_commit() {
    let fixture = Fixture::new();
    let observer = fixture.client();
    let writer = fixture.client();
    let seeded = fixture.repository.seed("ns1", "au1", "http://x.test/", b"v1", true);

    observer.get_artifact("ns1", "au1", "http://x.test/").unwrap();
    assert!(observer.cache().get_latest("ns1", "au1", "http://x.test/").is_some());

    let added = writer
        .add_artifact(artifact_repo_client::ArtifactData::from_bytes(
            artifact_repo_client::ArtifactIdentifier::unassigned("ns1", "au1", "http://x.test/"),
            Some(artifact_repo_client::StatusLine::ok()),
            artifact_repo_client::Headers::new(),
            b"v2".to_vec(),
        ))
        .unwrap();
    writer.commit_artifact("ns1", added.uuid()).unwrap();

    // The latest pointer for the URL is dropped, so the next lookup sees v2
    assert!(eventually(|| observer
        .cache()
        .get_latest("ns1", "au1", "http://x.test/")
        .is_none()));
    let latest = observer.get_artifact("ns1", "au1", "http://x.test/").unwrap().unwrap();
    assert_eq!(latest.version(), 2);
    assert_ne!(latest.uuid(), seeded.uuid());
}

#[test]
fn test_two_clients_handshake_independently() {
    let fixture = Fixture::new();
    let first = fixture.client();
    let second = fixture.client();

    assert_ne!(first.client_id(), second.client_id());
    assert!(first.cache().is_enabled());
    assert!(second.cache().is_enabled());
    assert_eq!(fixture.broker.subscriber_count(TOPIC), 3);
}
