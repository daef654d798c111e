//! In-memory fan-out broker.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use tracing::debug;

use super::{Message, PubSub, PubSubError, Subscription};

#[derive(Default)]
struct BrokerState {
    topics: HashMap<String, Vec<(u64, Sender<Message>)>>,
    next_id: u64,
    fail_next: usize,
}

impl BrokerState {
    fn is_registered(&self, topic: &str, id: u64) -> bool {
        self.topics
            .get(topic)
            .is_some_and(|subs| subs.iter().any(|(sid, _)| *sid == id))
    }
}

/// In-memory broker delivering every message to every subscriber of its
/// topic, the publisher included.
///
/// Cloning yields another handle to the same broker.
#[derive(Clone, Default)]
pub struct LocalBroker {
    state: Arc<Mutex<BrokerState>>,
}

impl LocalBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver `message` to all current subscribers of `topic`.
    ///
    /// Returns the number of subscribers reached.
    pub fn publish(&self, topic: &str, message: &Message) -> usize {
        publish_to(&self.state, topic, message)
    }

    /// Make the next `n` subscription attempts fail.
    pub fn fail_next_subscriptions(&self, n: usize) {
        self.state.lock().fail_next = n;
    }

    /// Drop every open connection, as a broker restart would.
    pub fn disconnect_all(&self) {
        let mut state = self.state.lock();
        let dropped: usize = state.topics.values().map(Vec::len).sum();
        state.topics.clear();
        debug!(dropped, "broker dropped all connections");
    }

    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.state.lock().topics.get(topic).map_or(0, Vec::len)
    }
}

fn publish_to(state: &Mutex<BrokerState>, topic: &str, message: &Message) -> usize {
    let mut state = state.lock();
    let Some(subscribers) = state.topics.get_mut(topic) else {
        return 0;
    };
    subscribers.retain(|(_, tx)| tx.send(message.clone()).is_ok());
    subscribers.len()
}

impl PubSub for LocalBroker {
    fn subscribe(&self, topic: &str) -> Result<Box<dyn Subscription>, PubSubError> {
        let mut state = self.state.lock();
        if state.fail_next > 0 {
            state.fail_next -= 1;
            return Err(PubSubError::ConnectFailed("broker unavailable".to_string()));
        }

        let (tx, rx) = unbounded();
        let id = state.next_id;
        state.next_id += 1;
        state.topics.entry(topic.to_string()).or_default().push((id, tx));

        Ok(Box::new(LocalSubscription {
            state: Arc::clone(&self.state),
            topic: topic.to_string(),
            id,
            receiver: rx,
        }))
    }
}

struct LocalSubscription {
    state: Arc<Mutex<BrokerState>>,
    topic: String,
    id: u64,
    receiver: Receiver<Message>,
}

impl Subscription for LocalSubscription {
    fn publish(&self, message: &Message) -> Result<(), PubSubError> {
        if !self.state.lock().is_registered(&self.topic, self.id) {
            return Err(PubSubError::Disconnected);
        }
        publish_to(&self.state, &self.topic, message);
        Ok(())
    }

    fn receive(&mut self, timeout: Duration) -> Result<Option<Message>, PubSubError> {
        match self.receiver.recv_timeout(timeout) {
            Ok(message) => Ok(Some(message)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(PubSubError::Disconnected),
        }
    }
}

impl Drop for LocalSubscription {
    fn drop(&mut self) {
        let mut state = self.state.lock();
        if let Some(subscribers) = state.topics.get_mut(&self.topic) {
            subscribers.retain(|(id, _)| *id != self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn msg(action: &str) -> Message {
        json!({ "action": action }).as_object().cloned().unwrap()
    }

    #[test]
    fn test_fan_out_includes_publisher() {
        let broker = LocalBroker::new();
        let mut a = broker.subscribe("t").unwrap();
        let mut b = broker.subscribe("t").unwrap();
        let mut other = broker.subscribe("u").unwrap();

        a.publish(&msg("Flush")).unwrap();

        let timeout = Duration::from_millis(100);
        assert_eq!(a.receive(timeout).unwrap(), Some(msg("Flush")));
        assert_eq!(b.receive(timeout).unwrap(), Some(msg("Flush")));
        assert_eq!(other.receive(Duration::from_millis(10)).unwrap(), None);
    }

    #[test]
    fn test_failed_subscriptions() {
        let broker = LocalBroker::new();
        broker.fail_next_subscriptions(2);
        assert!(broker.subscribe("t").is_err());
        assert!(broker.subscribe("t").is_err());
        assert!(broker.subscribe("t").is_ok());
    }

    #[test]
    fn test_disconnect_all_breaks_connections() {
        let broker = LocalBroker::new();
        let mut sub = broker.subscribe("t").unwrap();
        assert_eq!(broker.subscriber_count("t"), 1);

        broker.disconnect_all();
        assert_eq!(sub.receive(Duration::from_millis(10)), Err(PubSubError::Disconnected));
        assert_eq!(sub.publish(&msg("Flush")), Err(PubSubError::Disconnected));
    }

    #[test]
    fn test_dropped_subscription_unregisters() {
        let broker = LocalBroker::new();
        let sub = broker.subscribe("t").unwrap();
        drop(sub);
        assert_eq!(broker.subscriber_count("t"), 0);
        assert_eq!(broker.publish("t", &msg("Flush")), 0);
    }
}
