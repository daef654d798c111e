//! Paging Iterator
//!
//! Turns a paged list endpoint into one lazy sequence of records. A
//! background producer thread fetches pages, following the server's
//! continuation token, and pushes them onto a small bounded queue; the
//! consumer pulls from the queue with a bounded wait.
//!
//! ## Lifecycle
//!
//! ```text
//! Fetching ──(terminal page pushed)──> Draining ──(consumer drained)──> Done
//!     └──────────────(close / drop / timeout)──────────────> Terminated
//! ```
//!
//! The producer blocks indefinitely on a full queue, since the consumer sets
//! the pace. Closing or dropping the iterator disconnects the stop channel,
//! which interrupts that wait and is also checked before every fetch. At most
//! one in-flight request finishes after a stop.

mod schedule;

pub use schedule::{PageSizeSchedule, DEFAULT_PAGE_SIZE};

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel::{bounded, select, Receiver, RecvTimeoutError, Sender, TryRecvError};
use tracing::{debug, warn};

use crate::error::{RepoError, RepoResult};

/// One page fetched from a list endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page<T> {
    pub items: Vec<T>,
    /// Cursor for the following page; `None` on the last page.
    pub continuation_token: Option<String>,
}

impl<T> Page<T> {
    pub fn new(items: Vec<T>, continuation_token: Option<String>) -> Self {
        Self {
            items,
            continuation_token,
        }
    }

    /// A page with no successor.
    pub fn last(items: Vec<T>) -> Self {
        Self::new(items, None)
    }
}

/// A paged list endpoint.
pub trait PageSource<T>: Send + 'static {
    /// Fetch the page following `token` (the first page when `None`),
    /// asking for at most `limit` records.
    fn fetch_page(&mut self, token: Option<&str>, limit: usize) -> RepoResult<Page<T>>;
}

/// Queue sizing and timing for paging iterators.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PagingConfig {
    pub page_sizes: Vec<usize>,
    /// Pages buffered ahead of the consumer.
    pub queue_capacity: usize,
    /// Longest the consumer waits for the next page.
    pub queue_timeout: Duration,
}

impl Default for PagingConfig {
    fn default() -> Self {
        Self {
            page_sizes: vec![100, 1000],
            queue_capacity: 3,
            queue_timeout: Duration::from_secs(60),
        }
    }
}

/// Observable iterator state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IterState {
    /// Producer running.
    Fetching,
    /// Producer finished; records may remain to be consumed.
    Draining,
    /// Every record (or the terminal error) has been delivered.
    Done,
    /// Stopped by the consumer before completion.
    Terminated,
}

enum PageMessage<T> {
    Page(Vec<T>),
    Error(RepoError),
    End,
}

/// Lazy, forward-only sequence of records from a [`PageSource`].
///
/// Yields `Ok(record)` in server order, then `None`. A producer-side failure
/// is yielded once as `Err` and ends the sequence.
pub struct PagingIter<T> {
    receiver: Receiver<PageMessage<T>>,
    stop: Option<Sender<()>>,
    producer_finished: Arc<AtomicBool>,
    buffer: VecDeque<T>,
    state: IterState,
    timeout: Duration,
    startup_error: Option<RepoError>,
}

impl<T: Send + 'static> PagingIter<T> {
    /// Start the producer for `source`.
    pub fn start<S: PageSource<T>>(source: S, config: &PagingConfig) -> Self {
        let (tx, receiver) = bounded(config.queue_capacity.max(1));
        let (stop, stop_rx) = bounded::<()>(0);
        let producer_finished = Arc::new(AtomicBool::new(false));

        let schedule = PageSizeSchedule::new(&config.page_sizes);
        let finished = Arc::clone(&producer_finished);
        let spawned = thread::Builder::new()
            .name("repo-pager".to_string())
            .spawn(move || produce(source, schedule, tx, stop_rx, finished));

        let startup_error = match spawned {
            Ok(_) => None,
            Err(e) => Some(RepoError::Io(e)),
        };

        Self {
            receiver,
            stop: Some(stop),
            producer_finished,
            buffer: VecDeque::new(),
            state: IterState::Fetching,
            timeout: config.queue_timeout,
            startup_error,
        }
    }
}

impl<T> PagingIter<T> {
    /// Whether another item (record or error) is available.
    ///
    /// Blocks up to the queue timeout for the next page. Errors are reported
    /// here once and end the sequence.
    pub fn has_next(&mut self) -> RepoResult<bool> {
        if !self.buffer.is_empty() {
            return Ok(true);
        }
        if let Some(err) = self.startup_error.take() {
            self.finish(IterState::Done);
            return Err(err);
        }
        if matches!(self.state, IterState::Done | IterState::Terminated) {
            return Ok(false);
        }

        loop {
            match self.receiver.recv_timeout(self.timeout) {
                Ok(PageMessage::Page(items)) => {
                    if items.is_empty() {
                        continue;
                    }
                    self.buffer.extend(items);
                    return Ok(true);
                }
                Ok(PageMessage::End) => {
                    self.finish(IterState::Done);
                    return Ok(false);
                }
                Ok(PageMessage::Error(err)) => {
                    self.finish(IterState::Done);
                    return Err(err);
                }
                Err(RecvTimeoutError::Timeout) => {
                    warn!(timeout = ?self.timeout, "no page arrived in time; stopping producer");
                    self.finish(IterState::Terminated);
                    return Err(RepoError::IteratorTimeout(self.timeout));
                }
                Err(RecvTimeoutError::Disconnected) => {
                    self.finish(IterState::Done);
                    return Err(RepoError::Protocol(
                        "page producer exited without a terminal page".to_string(),
                    ));
                }
            }
        }
    }

    /// Stop the producer. Buffered records are discarded.
    pub fn close(&mut self) {
        if self.state != IterState::Done {
            self.buffer.clear();
            self.finish(IterState::Terminated);
        }
    }

    pub fn state(&self) -> IterState {
        match self.state {
            IterState::Fetching if self.producer_finished.load(Ordering::Acquire) => IterState::Draining,
            state => state,
        }
    }

    fn finish(&mut self, state: IterState) {
        if self.stop.take().is_some() && state == IterState::Terminated {
            debug!("paging iterator closed");
        }
        self.state = state;
    }
}

impl<T> Iterator for PagingIter<T> {
    type Item = RepoResult<T>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.has_next() {
            Ok(true) => self.buffer.pop_front().map(Ok),
            Ok(false) => None,
            Err(err) => Some(Err(err)),
        }
    }
}

impl<T> Drop for PagingIter<T> {
    fn drop(&mut self) {
        self.close();
    }
}

fn stop_requested(stop: &Receiver<()>) -> bool {
    matches!(stop.try_recv(), Err(TryRecvError::Disconnected))
}

/// Push one message, giving up if the consumer goes away first.
fn deliver<T>(tx: &Sender<PageMessage<T>>, stop: &Receiver<()>, message: PageMessage<T>) -> bool {
    select! {
        send(tx, message) -> sent => sent.is_ok(),
        recv(stop) -> _ => false,
    }
}

fn produce<T, S: PageSource<T>>(
    mut source: S,
    mut schedule: PageSizeSchedule,
    tx: Sender<PageMessage<T>>,
    stop: Receiver<()>,
    finished: Arc<AtomicBool>,
) {
    let mut token: Option<String> = None;
    let mut pages = 0usize;

    loop {
        if stop_requested(&stop) {
            debug!(pages, "page producer stopped");
            return;
        }

        let limit = schedule.next_size();
        let message = match source.fetch_page(token.as_deref(), limit) {
            Ok(page) if page.items.is_empty() => PageMessage::End,
            Ok(page) => {
                pages += 1;
                token = page.continuation_token;
                PageMessage::Page(page.items)
            }
            Err(err) => {
                debug!(error = %err, pages, "page fetch failed");
                PageMessage::Error(err)
            }
        };

        let terminal = !matches!(message, PageMessage::Page(_));
        if !deliver(&tx, &stop, message) {
            debug!(pages, "page producer stopped while queue full");
            return;
        }
        if terminal {
            finished.store(true, Ordering::Release);
            return;
        }
        if token.is_none() {
            if deliver(&tx, &stop, PageMessage::End) {
                finished.store(true, Ordering::Release);
            }
            debug!(pages, "page producer reached last page");
            return;
        }
    }
}
