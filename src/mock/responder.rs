//! Echo responder standing in for the repository side of the cache
//! handshake.

use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TryRecvError};
use repo_protocol::CacheMessage;
use tracing::debug;

use crate::pubsub::{LocalBroker, PubSub, PubSubError, Subscription};

const POLL: Duration = Duration::from_millis(20);

/// Answers every `Echo` on a topic with the matching `EchoResp`.
///
/// Reconnects after the broker drops it; stops when dropped.
pub struct EchoResponder {
    stop: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl EchoResponder {
    /// Subscribe to `topic` and start answering.
    pub fn start(broker: &LocalBroker, topic: &str) -> Result<Self, PubSubError> {
        let subscription = broker.subscribe(topic)?;
        let broker = broker.clone();
        let topic = topic.to_string();
        let (stop, stop_rx) = bounded::<()>(0);

        let handle = thread::Builder::new()
            .name("mock-echo-responder".to_string())
            .spawn(move || respond(broker, topic, subscription, stop_rx))
            .map_err(|e| PubSubError::ConnectFailed(e.to_string()))?;

        Ok(Self {
            stop: Some(stop),
            handle: Some(handle),
        })
    }
}

fn respond(broker: LocalBroker, topic: String, mut subscription: Box<dyn Subscription>, stop: Receiver<()>) {
    loop {
        if matches!(stop.try_recv(), Err(TryRecvError::Disconnected)) {
            return;
        }
        match subscription.receive(POLL) {
            Ok(Some(message)) => {
                if let Ok(CacheMessage::Echo { key }) = CacheMessage::from_map(&message) {
                    // A failed publish shows up as a receive error next time.
                    let _ = subscription.publish(&CacheMessage::EchoResp { key }.to_map());
                }
            }
            Ok(None) => {}
            Err(e) => {
                debug!(error = %e, "echo responder reconnecting");
                subscription = loop {
                    if matches!(stop.recv_timeout(POLL), Err(RecvTimeoutError::Disconnected)) {
                        return;
                    }
                    if let Ok(s) = broker.subscribe(&topic) {
                        break s;
                    }
                };
            }
        }
    }
}

impl Drop for EchoResponder {
    fn drop(&mut self) {
        self.stop.take();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}
