//! Rate-limited deduplicating work queue.
//!
//! Every tracked key sits in exactly one place:
//!
//! - **pending**: in `queue` (and `dirty`), waiting for a worker
//! - **processing**: leased to exactly one worker
//! - **dirty while processing**: in `dirty` and `processing`; it goes back to
//!   `queue` when the current lease is released
//!
//! Delayed keys wait in a heap ordered by ready time until they become
//! pending. A key waiting twice keeps the earlier ready time.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, HashSet, VecDeque};
use std::fmt;
use std::hash::Hash;
use std::pin::pin;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, trace};

use crate::rate_limiter::{default_controller_rate_limiter, RateLimiter};

/// A delayed add.
struct Waiting<K> {
    ready_at: Instant,
    sequence: u64,
    key: K,
}

impl<K> PartialEq for Waiting<K> {
    fn eq(&self, other: &Self) -> bool {
        self.ready_at == other.ready_at && self.sequence == other.sequence
    }
}

impl<K> Eq for Waiting<K> {}

impl<K> PartialOrd for Waiting<K> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

// BinaryHeap is a max-heap: reverse so the earliest ready time pops first.
impl<K> Ord for Waiting<K> {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .ready_at
            .cmp(&self.ready_at)
            .then_with(|| other.sequence.cmp(&self.sequence))
    }
}

struct State<K> {
    queue: VecDeque<K>,
    dirty: HashSet<K>,
    processing: HashSet<K>,
    waiting: BinaryHeap<Waiting<K>>,
    waiting_ready_at: HashMap<K, Instant>,
    next_sequence: u64,
    shutting_down: bool,
}

impl<K: Clone + Eq + Hash> State<K> {
    fn new() -> Self {
        Self {
            queue: VecDeque::new(),
            dirty: HashSet::new(),
            processing: HashSet::new(),
            waiting: BinaryHeap::new(),
            waiting_ready_at: HashMap::new(),
            next_sequence: 0,
            shutting_down: false,
        }
    }

    /// Returns true if the key became visible to `get`.
    fn insert(&mut self, key: K) -> bool {
        if self.shutting_down {
            return false;
        }
        if self.dirty.contains(&key) {
            return false;
        }
        self.dirty.insert(key.clone());
        if self.processing.contains(&key) {
            return false;
        }
        self.queue.push_back(key);
        true
    }

    /// Returns true if `key` now waits with an earlier ready time than before.
    fn insert_waiting(&mut self, key: K, ready_at: Instant) -> bool {
        if self.shutting_down {
            return false;
        }
        if let Some(existing) = self.waiting_ready_at.get(&key) {
            if *existing <= ready_at {
                return false;
            }
        }
        self.waiting_ready_at.insert(key.clone(), ready_at);
        let sequence = self.next_sequence;
        self.next_sequence = self.next_sequence.wrapping_add(1);
        self.waiting.push(Waiting {
            ready_at,
            sequence,
            key,
        });
        true
    }

    /// Move every waiting key whose ready time has passed into pending.
    fn promote_ready(&mut self, now: Instant) {
        while self.waiting.peek().is_some_and(|top| top.ready_at <= now) {
            let Some(entry) = self.waiting.pop() else {
                break;
            };
            // Superseded by an earlier ready time for the same key.
            if self.waiting_ready_at.get(&entry.key) != Some(&entry.ready_at) {
                continue;
            }
            self.waiting_ready_at.remove(&entry.key);
            self.insert(entry.key);
        }
    }

    fn next_ready_at(&self) -> Option<Instant> {
        self.waiting.peek().map(|top| top.ready_at)
    }

    fn take(&mut self) -> Option<K> {
        let key = self.queue.pop_front()?;
        self.processing.insert(key.clone());
        self.dirty.remove(&key);
        Some(key)
    }
}

struct Inner<K> {
    name: String,
    state: Mutex<State<K>>,
    /// Signalled when a key becomes pending or the queue shuts down.
    available: Notify,
    /// Signalled when the processing set becomes empty.
    idle: Notify,
    limiter: Box<dyn RateLimiter<K>>,
}

/// A concurrent queue of keys with dedup, delayed adds and per-key backoff.
///
/// Cloning is cheap and yields another handle to the same queue.
pub struct RateLimitingQueue<K> {
    inner: Arc<Inner<K>>,
}

impl<K> Clone for RateLimitingQueue<K> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K> fmt::Debug for RateLimitingQueue<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RateLimitingQueue")
            .field("name", &self.inner.name)
            .finish_non_exhaustive()
    }
}

impl<K> RateLimitingQueue<K>
where
    K: Clone + Eq + Hash + fmt::Debug + Send + Sync + 'static,
{
    /// Create a queue using `limiter` for [`add_rate_limited`](Self::add_rate_limited).
    pub fn new(name: impl Into<String>, limiter: impl RateLimiter<K> + 'static) -> Self {
        Self {
            inner: Arc::new(Inner {
                name: name.into(),
                state: Mutex::new(State::new()),
                available: Notify::new(),
                idle: Notify::new(),
                limiter: Box::new(limiter),
            }),
        }
    }

    /// Create a queue with the default controller limiter.
    pub fn with_default_rate_limiter(name: impl Into<String>) -> Self {
        Self::new(name, default_controller_rate_limiter())
    }

    /// Queue name, used in log fields.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Mark `key` as needing processing.
    ///
    /// A key that is already pending is not duplicated. A key that is being
    /// processed is redelivered once its current lease is released.
    pub fn add(&self, key: K) {
        let visible = self.inner.state.lock().insert(key.clone());
        if visible {
            trace!(queue = %self.inner.name, key = ?key, "Key added");
            self.inner.available.notify_one();
        }
    }

    /// Add `key` once `delay` has elapsed.
    pub fn add_after(&self, key: K, delay: Duration) {
        if delay.is_zero() {
            self.add(key);
            return;
        }

        let ready_at = Instant::now().checked_add(delay);
        let earlier = match ready_at {
            Some(ready_at) => self.inner.state.lock().insert_waiting(key.clone(), ready_at),
            // Too far in the future to represent; it would never become ready.
            None => false,
        };
        if earlier {
            trace!(queue = %self.inner.name, key = ?key, delay_ms = ?delay.as_millis(), "Key delayed");
            self.inner.available.notify_one();
        }
    }

    /// Add `key` after the delay the rate limiter assigns to it.
    pub fn add_rate_limited(&self, key: K) {
        let delay = self.inner.limiter.when(&key);
        debug!(
            queue = %self.inner.name,
            key = ?key,
            delay_ms = ?delay.as_millis(),
            "Requeueing with backoff"
        );
        self.add_after(key, delay);
    }

    /// Reset the rate limiter's failure count for `key`.
    pub fn forget(&self, key: &K) {
        self.inner.limiter.forget(key);
    }

    /// Number of rate-limited adds recorded for `key` since it was forgotten.
    pub fn num_requeues(&self, key: &K) -> u32 {
        self.inner.limiter.num_requeues(key)
    }

    /// Number of pending keys.
    pub fn len(&self) -> usize {
        self.inner.state.lock().queue.len()
    }

    /// True if no key is pending.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of keys currently leased to workers.
    pub fn processing_len(&self) -> usize {
        self.inner.state.lock().processing.len()
    }

    /// True once [`shut_down`](Self::shut_down) has been called.
    pub fn is_shutting_down(&self) -> bool {
        self.inner.state.lock().shutting_down
    }

    /// Take the next pending key without waiting.
    pub fn try_get(&self) -> Option<WorkItem<K>> {
        let key = {
            let mut state = self.inner.state.lock();
            state.promote_ready(Instant::now());
            let key = state.take()?;
            if !state.queue.is_empty() {
                self.inner.available.notify_one();
            }
            key
        };
        Some(WorkItem::new(self.clone(), key))
    }

    /// Wait for the next pending key and lease it.
    ///
    /// Returns `None` once the queue is shut down and no pending key is left.
    pub async fn get(&self) -> Option<WorkItem<K>> {
        loop {
            let mut notified = pin!(self.inner.available.notified());
            notified.as_mut().enable();

            let next_ready_at = {
                let mut state = self.inner.state.lock();
                state.promote_ready(Instant::now());
                if let Some(key) = state.take() {
                    // Hand the wakeup on if more work is ready.
                    if !state.queue.is_empty() {
                        self.inner.available.notify_one();
                    }
                    drop(state);
                    return Some(WorkItem::new(self.clone(), key));
                }
                if state.shutting_down {
                    return None;
                }
                state.next_ready_at()
            };

            match next_ready_at {
                Some(ready_at) => {
                    tokio::select! {
                        () = notified.as_mut() => {}
                        () = tokio::time::sleep_until(ready_at) => {}
                    }
                }
                None => notified.await,
            }
        }
    }

    /// Release the lease on `key`, re-queueing it if it was re-added meanwhile.
    fn done(&self, key: &K) {
        let mut state = self.inner.state.lock();
        state.processing.remove(key);
        if state.dirty.contains(key) {
            state.queue.push_back(key.clone());
            self.inner.available.notify_one();
        }
        if state.processing.is_empty() {
            self.inner.idle.notify_waiters();
        }
    }

    /// Stop accepting keys and release every blocked [`get`](Self::get).
    ///
    /// Keys already pending are still handed out; delayed keys are dropped.
    pub fn shut_down(&self) {
        {
            let mut state = self.inner.state.lock();
            if state.shutting_down {
                return;
            }
            state.shutting_down = true;
            state.waiting.clear();
            state.waiting_ready_at.clear();
        }
        debug!(queue = %self.inner.name, "Queue shutting down");
        self.inner.available.notify_waiters();
    }

    /// Shut down, then wait until no key is leased.
    pub async fn shut_down_with_drain(&self) {
        self.shut_down();
        loop {
            let mut idle = pin!(self.inner.idle.notified());
            idle.as_mut().enable();
            if self.inner.state.lock().processing.is_empty() {
                return;
            }
            idle.await;
        }
    }
}

/// A leased key. Dropping it marks the key done, exactly once.
pub struct WorkItem<K>
where
    K: Clone + Eq + Hash + fmt::Debug + Send + Sync + 'static,
{
    queue: RateLimitingQueue<K>,
    key: K,
}

impl<K> WorkItem<K>
where
    K: Clone + Eq + Hash + fmt::Debug + Send + Sync + 'static,
{
    fn new(queue: RateLimitingQueue<K>, key: K) -> Self {
        Self { queue, key }
    }

    /// The leased key.
    pub fn key(&self) -> &K {
        &self.key
    }

    /// Release the lease now.
    pub fn done(self) {
        drop(self);
    }
}

impl<K> Drop for WorkItem<K>
where
    K: Clone + Eq + Hash + fmt::Debug + Send + Sync + 'static,
{
    fn drop(&mut self) {
        self.queue.done(&self.key);
    }
}

impl<K> fmt::Debug for WorkItem<K>
where
    K: Clone + Eq + Hash + fmt::Debug + Send + Sync + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkItem").field("key", &self.key).finish()
    }
}
