//! Cache invalidation messages.
//!
//! Messages travel over a publish/subscribe topic as flat JSON maps with the
//! keys `action`, `key` and, for artifact invalidations, `op`. Keys are
//! compact JSON arrays so that no component needs escaping:
//!
//! - artifact: `["<namespace>","<auid>","<uri>",<version>,"<uuid>"]`
//! - AU: `["<namespace>","<auid>"]`

use serde_json::{json, Map, Value};
use thiserror::Error;

use crate::artifact::ArtifactIdentifier;

pub mod actions {
    pub const INVALIDATE_ARTIFACT: &str = "InvalidateArtifact";
    pub const INVALIDATE_AU: &str = "InvalidateAu";
    pub const FLUSH: &str = "Flush";
    pub const ECHO: &str = "Echo";
    pub const ECHO_RESP: &str = "EchoResp";
}

/// What happened to an artifact whose cache entries must be dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InvalidateOp {
    /// Only this version changed (e.g. its storage location moved).
    Update,
    /// A version was committed; the latest version may have changed.
    Commit,
    /// A version was deleted; the latest version may have changed.
    Delete,
}

impl InvalidateOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvalidateOp::Update => "Update",
            InvalidateOp::Commit => "Commit",
            InvalidateOp::Delete => "Delete",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "Update" => Some(InvalidateOp::Update),
            "Commit" => Some(InvalidateOp::Commit),
            "Delete" => Some(InvalidateOp::Delete),
            _ => None,
        }
    }

    /// Whether the "latest version" entry for the same URL must also go.
    pub fn affects_latest(&self) -> bool {
        !matches!(self, InvalidateOp::Update)
    }
}

/// A decoded cache protocol message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheMessage {
    InvalidateArtifact {
        op: InvalidateOp,
        id: ArtifactIdentifier,
    },
    InvalidateAu {
        namespace: String,
        auid: String,
    },
    Flush,
    Echo {
        key: String,
    },
    EchoResp {
        key: String,
    },
}

/// Why a message could not be decoded.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MessageError {
    #[error("unknown action: {0}")]
    UnknownAction(String),

    #[error("malformed message: {0}")]
    Malformed(String),
}

impl CacheMessage {
    pub fn action(&self) -> &'static str {
        match self {
            CacheMessage::InvalidateArtifact { .. } => actions::INVALIDATE_ARTIFACT,
            CacheMessage::InvalidateAu { .. } => actions::INVALIDATE_AU,
            CacheMessage::Flush => actions::FLUSH,
            CacheMessage::Echo { .. } => actions::ECHO,
            CacheMessage::EchoResp { .. } => actions::ECHO_RESP,
        }
    }

    /// Encode as the map carried on the topic.
    pub fn to_map(&self) -> Map<String, Value> {
        let mut map = Map::new();
        map.insert("action".to_string(), json!(self.action()));
        match self {
            CacheMessage::InvalidateArtifact { op, id } => {
                map.insert("op".to_string(), json!(op.as_str()));
                map.insert("key".to_string(), json!(artifact_key(id)));
            }
            CacheMessage::InvalidateAu { namespace, auid } => {
                map.insert("key".to_string(), json!(au_key(namespace, auid)));
            }
            CacheMessage::Flush => {}
            CacheMessage::Echo { key } | CacheMessage::EchoResp { key } => {
                map.insert("key".to_string(), json!(key));
            }
        }
        map
    }

    /// Decode a map received from the topic.
    pub fn from_map(map: &Map<String, Value>) -> Result<Self, MessageError> {
        let action = map
            .get("action")
            .and_then(Value::as_str)
            .ok_or_else(|| MessageError::Malformed("missing action".to_string()))?;

        match action {
            actions::INVALIDATE_ARTIFACT => {
                let op = map
                    .get("op")
                    .and_then(Value::as_str)
                    .ok_or_else(|| MessageError::Malformed("missing op".to_string()))?;
                let op = InvalidateOp::parse(op)
                    .ok_or_else(|| MessageError::Malformed(format!("unknown op: {op}")))?;
                let id = parse_artifact_key(required_key(map)?)?;
                Ok(CacheMessage::InvalidateArtifact { op, id })
            }
            actions::INVALIDATE_AU => {
                let (namespace, auid) = parse_au_key(required_key(map)?)?;
                Ok(CacheMessage::InvalidateAu { namespace, auid })
            }
            actions::FLUSH => Ok(CacheMessage::Flush),
            actions::ECHO => Ok(CacheMessage::Echo {
                key: required_key(map)?.to_string(),
            }),
            actions::ECHO_RESP => Ok(CacheMessage::EchoResp {
                key: required_key(map)?.to_string(),
            }),
            other => Err(MessageError::UnknownAction(other.to_string())),
        }
    }
}

fn required_key(map: &Map<String, Value>) -> Result<&str, MessageError> {
    map.get("key")
        .and_then(Value::as_str)
        .ok_or_else(|| MessageError::Malformed("missing key".to_string()))
}

/// Encode the invalidation key for one artifact version.
pub fn artifact_key(id: &ArtifactIdentifier) -> String {
    json!([id.namespace, id.auid, id.uri, id.version, id.uuid]).to_string()
}

/// Encode the invalidation key for an AU.
pub fn au_key(namespace: &str, auid: &str) -> String {
    json!([namespace, auid]).to_string()
}

pub fn parse_artifact_key(key: &str) -> Result<ArtifactIdentifier, MessageError> {
    let fields: Vec<Value> = serde_json::from_str(key)
        .map_err(|e| MessageError::Malformed(format!("artifact key {key:?}: {e}")))?;
    match fields.as_slice() {
        [Value::String(ns), Value::String(auid), Value::String(uri), Value::Number(version), Value::String(uuid)] =>
        {
            let version = version
                .as_i64()
                .and_then(|v| i32::try_from(v).ok())
                .ok_or_else(|| MessageError::Malformed(format!("bad version in key {key:?}")))?;
            Ok(ArtifactIdentifier::new(
                ns.as_str(),
                auid.as_str(),
                uri.as_str(),
                version,
                uuid.as_str(),
            ))
        }
        _ => Err(MessageError::Malformed(format!("bad artifact key {key:?}"))),
    }
}

pub fn parse_au_key(key: &str) -> Result<(String, String), MessageError> {
    let fields: Vec<String> = serde_json::from_str(key)
        .map_err(|e| MessageError::Malformed(format!("AU key {key:?}: {e}")))?;
    match <[String; 2]>::try_from(fields) {
        Ok([namespace, auid]) => Ok((namespace, auid)),
        Err(_) => Err(MessageError::Malformed(format!("bad AU key {key:?}"))),
    }
}
