//! Publish/subscribe channel abstraction
//!
//! The artifact cache learns about remote changes from a topic carrying
//! JSON map messages. Any broker can be plugged in by implementing
//! [`PubSub`]; [`LocalBroker`] is an in-memory implementation.

mod local;

pub use local::LocalBroker;

use std::time::Duration;

use serde_json::{Map, Value};

/// A message on a topic.
pub type Message = Map<String, Value>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PubSubError {
    #[error("Failed to connect to broker: {0}")]
    ConnectFailed(String),

    #[error("Broker connection lost")]
    Disconnected,
}

/// A broker that can be subscribed to.
pub trait PubSub: Send + Sync {
    /// Open a connection subscribed to `topic`.
    fn subscribe(&self, topic: &str) -> Result<Box<dyn Subscription>, PubSubError>;
}

/// One connection to a topic.
pub trait Subscription: Send {
    /// Publish to the subscribed topic.
    fn publish(&self, message: &Message) -> Result<(), PubSubError>;

    /// Wait up to `timeout` for the next message. `Ok(None)` on timeout.
    fn receive(&mut self, timeout: Duration) -> Result<Option<Message>, PubSubError>;
}
