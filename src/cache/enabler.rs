//! Background enablement of the artifact cache.
//!
//! The cache may only be trusted while invalidations are flowing. The
//! enabler thread subscribes to the invalidation topic, publishes an `Echo`
//! carrying the client's id and enables the cache once the matching
//! `EchoResp` arrives. A lost connection disables (and so flushes) the cache
//! and starts over. Connection attempts back off exponentially with jitter
//! and are retried until the enabler is stopped.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TryRecvError};
use parking_lot::{Condvar, Mutex};
use rand::Rng;
use repo_protocol::CacheMessage;
use tracing::{debug, info, warn};

use super::{ArtifactCache, CacheState};
use crate::pubsub::{PubSub, Subscription};

/// How often the listener wakes up to check for a stop request.
const RECEIVE_POLL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone)]
pub struct EnablerSettings {
    pub topic: String,
    /// Identity echoed back by the remote side.
    pub client_id: String,
    /// Interval between echoes while waiting for a response.
    pub echo_interval: Duration,
    pub retry_initial_delay: Duration,
    pub retry_max_delay: Duration,
}

struct Shared {
    state: Mutex<CacheState>,
    changed: Condvar,
}

impl Shared {
    fn set(&self, state: CacheState) {
        let mut current = self.state.lock();
        if *current != state {
            debug!(from = ?*current, to = ?state, "cache state change");
            *current = state;
            self.changed.notify_all();
        }
    }

    fn get(&self) -> CacheState {
        *self.state.lock()
    }
}

/// Handle to the enabler thread. Dropping it stops the thread and leaves
/// the cache disabled.
pub struct CacheEnabler {
    shared: Arc<Shared>,
    stop: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl CacheEnabler {
    pub fn start(
        cache: Arc<ArtifactCache>,
        broker: Arc<dyn PubSub>,
        settings: EnablerSettings,
    ) -> std::io::Result<Self> {
        let shared = Arc::new(Shared {
            state: Mutex::new(CacheState::Disabled),
            changed: Condvar::new(),
        });
        let (stop, stop_rx) = bounded::<()>(0);

        let listener = Listener {
            cache,
            broker,
            backoff: Backoff::new(settings.retry_initial_delay, settings.retry_max_delay),
            settings,
            shared: Arc::clone(&shared),
            stop: stop_rx,
        };
        let handle = thread::Builder::new()
            .name("repo-cache-enabler".to_string())
            .spawn(move || listener.run())?;

        Ok(Self {
            shared,
            stop: Some(stop),
            handle: Some(handle),
        })
    }

    pub fn state(&self) -> CacheState {
        self.shared.get()
    }

    /// Block until the enabler reaches `state`. Returns false on timeout.
    pub fn wait_for_state(&self, state: CacheState, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut current = self.shared.state.lock();
        while *current != state {
            if self.shared.changed.wait_until(&mut current, deadline).timed_out() {
                return *current == state;
            }
        }
        true
    }

    /// Stop the thread and wait for it to exit.
    pub fn stop(&mut self) {
        self.stop.take();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("cache enabler thread panicked");
            }
        }
    }
}

impl Drop for CacheEnabler {
    fn drop(&mut self) {
        self.stop();
    }
}

enum SessionEnd {
    Stopped,
    Lost,
}

struct Listener {
    cache: Arc<ArtifactCache>,
    broker: Arc<dyn PubSub>,
    settings: EnablerSettings,
    backoff: Backoff,
    shared: Arc<Shared>,
    stop: Receiver<()>,
}

impl Listener {
    fn run(mut self) {
        loop {
            if self.stop_requested() {
                break;
            }
            self.shared.set(CacheState::Connecting);

            match self.broker.subscribe(&self.settings.topic) {
                Ok(mut subscription) => match self.session(subscription.as_mut()) {
                    SessionEnd::Stopped => break,
                    SessionEnd::Lost => {
                        warn!(topic = %self.settings.topic, "invalidation channel lost; disabling cache");
                        self.cache.set_enabled(false);
                        self.shared.set(CacheState::Disabled);
                    }
                },
                Err(e) => {
                    self.shared.set(CacheState::Disabled);
                    let delay = self.backoff.next_delay();
                    warn!(error = %e, retry_in = ?delay, "cannot subscribe to invalidation topic");
                    if self.sleep(delay) {
                        break;
                    }
                    continue;
                }
            }

            let delay = self.backoff.next_delay();
            if self.sleep(delay) {
                break;
            }
        }

        self.cache.set_enabled(false);
        self.shared.set(CacheState::Stopped);
        debug!("cache enabler stopped");
    }

    fn session(&mut self, subscription: &mut dyn Subscription) -> SessionEnd {
        let client_id = self.settings.client_id.clone();
        let echo = CacheMessage::Echo {
            key: client_id.clone(),
        }
        .to_map();

        if let Err(e) = subscription.publish(&echo) {
            debug!(error = %e, "echo publish failed");
            return SessionEnd::Lost;
        }
        self.shared.set(CacheState::ProbeSent);
        let mut last_echo = Instant::now();

        loop {
            if self.stop_requested() {
                return SessionEnd::Stopped;
            }

            match subscription.receive(RECEIVE_POLL) {
                Ok(Some(message)) => {
                    if let Some(CacheMessage::EchoResp { key }) = self.cache.handle_message(&message) {
                        if key == client_id && self.shared.get() != CacheState::Enabled {
                            self.cache.set_enabled(true);
                            self.shared.set(CacheState::Enabled);
                            self.backoff.reset();
                            info!(topic = %self.settings.topic, "artifact cache enabled");
                        }
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    debug!(error = %e, "invalidation channel receive failed");
                    return SessionEnd::Lost;
                }
            }

            if self.shared.get() == CacheState::ProbeSent
                && last_echo.elapsed() >= self.settings.echo_interval
            {
                if subscription.publish(&echo).is_err() {
                    return SessionEnd::Lost;
                }
                last_echo = Instant::now();
            }
        }
    }

    fn stop_requested(&self) -> bool {
        matches!(self.stop.try_recv(), Err(TryRecvError::Disconnected))
    }

    /// Sleep for `delay`; true if stopped meanwhile.
    fn sleep(&self, delay: Duration) -> bool {
        matches!(self.stop.recv_timeout(delay), Err(RecvTimeoutError::Disconnected))
    }
}

/// Capped exponential backoff with jitter.
#[derive(Debug, Clone)]
struct Backoff {
    initial: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    fn new(initial: Duration, max: Duration) -> Self {
        let max = max.max(initial);
        Self {
            initial,
            max,
            current: initial,
        }
    }

    /// Next delay, between half and all of the current step.
    fn next_delay(&mut self) -> Duration {
        let step = self.current;
        self.current = (self.current * 2).min(self.max);
        step.mul_f64(rand::thread_rng().gen_range(0.5..=1.0))
    }

    fn reset(&mut self) {
        self.current = self.initial;
    }
}
