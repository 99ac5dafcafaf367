//! Shared informer: a local mirror of a resource collection that notifies
//! subscribers of every change.
//!
//! The informer lists its [`ResourceSource`] until the first listing
//! succeeds, which marks the cache synced. From then on it relists
//! periodically, turning differences into change events, and periodically
//! resyncs, re-announcing every cached object as an update at its current
//! version.

use std::collections::BTreeSet;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use futures::Stream;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use workqueue::calculate_backoff;

use crate::error::{Error, Result};
use crate::event::{DeletedFinalStateUnknown, DeletedObject, WatchEvent};
use crate::key::{meta_namespace_key, ResourceKey};
use crate::meta::Resource;
use crate::source::ResourceSource;
use crate::store::{Lister, Store};

/// Informer timing settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InformerConfig {
    /// Period between resyncs; zero disables resync.
    pub resync_period_ms: u64,
    /// Period between relists; zero disables relisting.
    pub relist_period_ms: u64,
    /// First retry delay after a failed initial listing.
    pub list_retry_base_ms: u64,
    /// Ceiling on the initial listing retry delay.
    pub list_retry_max_ms: u64,
}

impl Default for InformerConfig {
    fn default() -> Self {
        Self {
            resync_period_ms: 30_000,
            relist_period_ms: 30_000,
            list_retry_base_ms: 500,
            list_retry_max_ms: 30_000,
        }
    }
}

impl InformerConfig {
    /// Set the resync period.
    #[must_use]
    pub fn with_resync_period(mut self, period: Duration) -> Self {
        self.resync_period_ms = duration_ms(period);
        self
    }

    /// Set the relist period.
    #[must_use]
    pub fn with_relist_period(mut self, period: Duration) -> Self {
        self.relist_period_ms = duration_ms(period);
        self
    }

    /// Set the initial listing retry backoff.
    #[must_use]
    pub fn with_list_retry(mut self, base: Duration, max: Duration) -> Self {
        self.list_retry_base_ms = duration_ms(base);
        self.list_retry_max_ms = duration_ms(max);
        self
    }

    /// Resync period.
    pub const fn resync_period(&self) -> Duration {
        Duration::from_millis(self.resync_period_ms)
    }

    /// Relist period.
    pub const fn relist_period(&self) -> Duration {
        Duration::from_millis(self.relist_period_ms)
    }
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Readiness of a local cache.
pub trait HasSynced: Send + Sync {
    /// True once the initial full listing has been loaded.
    fn has_synced(&self) -> bool;
}

/// Lazy, unending sequence of change events from one subscription.
///
/// Cannot be restarted; it ends only when the informer is dropped.
#[derive(Debug)]
pub struct WatchStream<T> {
    receiver: mpsc::UnboundedReceiver<WatchEvent<T>>,
}

impl<T> WatchStream<T> {
    /// Wait for the next event.
    pub async fn recv(&mut self) -> Option<WatchEvent<T>> {
        self.receiver.recv().await
    }

    /// Take the next event if one is buffered.
    pub fn try_recv(&mut self) -> Option<WatchEvent<T>> {
        self.receiver.try_recv().ok()
    }
}

impl<T> Stream for WatchStream<T> {
    type Item = WatchEvent<T>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().receiver.poll_recv(cx)
    }
}

/// Counts from one [`SharedInformer::replace`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplaceSummary {
    pub added: usize,
    /// Objects whose resource version changed.
    pub updated: usize,
    pub unchanged: usize,
    pub deleted: usize,
    /// Objects dropped because no key could be derived.
    pub skipped: usize,
}

/// Local cache of one resource kind with change subscriptions.
pub struct SharedInformer<T> {
    store: Arc<Store<T>>,
    /// Mutations hold this lock so the store and event order agree.
    subscribers: Mutex<Vec<mpsc::UnboundedSender<WatchEvent<T>>>>,
    synced: AtomicBool,
    running: AtomicBool,
}

impl<T: Resource> Default for SharedInformer<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Resource> SharedInformer<T> {
    /// Create an empty, unsynced informer.
    pub fn new() -> Self {
        Self {
            store: Arc::new(Store::new()),
            subscribers: Mutex::new(Vec::new()),
            synced: AtomicBool::new(false),
            running: AtomicBool::new(false),
        }
    }

    /// Read-only view of the cache.
    pub fn lister(&self) -> Lister<T> {
        Lister::new(Arc::clone(&self.store))
    }

    /// True once the first full listing has been loaded.
    pub fn has_synced(&self) -> bool {
        self.synced.load(Ordering::Acquire)
    }

    /// Subscribe to changes. The stream starts with an `Added` event for
    /// every object already cached.
    pub fn subscribe(&self) -> WatchStream<T> {
        let (sender, receiver) = mpsc::unbounded_channel();
        let mut subscribers = self.subscribers.lock();
        for (_, obj) in self.store.list() {
            let _ = sender.send(WatchEvent::Added(obj));
        }
        subscribers.push(sender);
        debug!(kind = T::KIND, subscribers = subscribers.len(), "Subscriber added");
        WatchStream { receiver }
    }

    /// Insert or replace one object, notifying subscribers.
    pub fn upsert(&self, obj: T) -> Result<()> {
        let key = meta_namespace_key(&obj)?;
        let new = Arc::new(obj);
        let mut subscribers = self.subscribers.lock();
        let event = match self.store.insert(key, Arc::clone(&new)) {
            Some(old) => WatchEvent::Updated { old, new },
            None => WatchEvent::Added(new),
        };
        dispatch(&mut subscribers, &event);
        Ok(())
    }

    /// Remove one object, notifying subscribers with its final state.
    pub fn delete(&self, key: &ResourceKey) -> Option<Arc<T>> {
        let mut subscribers = self.subscribers.lock();
        let old = self.store.remove(key)?;
        dispatch(
            &mut subscribers,
            &WatchEvent::Deleted(DeletedObject::Final(Arc::clone(&old))),
        );
        Some(old)
    }

    /// Replace the whole cache with a fresh listing.
    ///
    /// New objects are announced as added. Objects already cached are
    /// announced as updated, even at an unchanged version. Cached objects
    /// missing from the listing are announced as tombstones. The first call
    /// marks the informer synced.
    pub fn replace(&self, items: Vec<T>) -> ReplaceSummary {
        let mut summary = ReplaceSummary::default();
        let mut subscribers = self.subscribers.lock();
        let mut stale: BTreeSet<ResourceKey> = self.store.list_keys().into_iter().collect();

        for obj in items {
            let key = match meta_namespace_key(&obj) {
                Ok(key) => key,
                Err(e) => {
                    warn!(kind = T::KIND, error = %e, "Dropping listed object");
                    summary.skipped = summary.skipped.saturating_add(1);
                    continue;
                }
            };
            stale.remove(&key);

            let new = Arc::new(obj);
            let event = match self.store.insert(key, Arc::clone(&new)) {
                Some(old) => {
                    if old.resource_version() == new.resource_version() {
                        summary.unchanged = summary.unchanged.saturating_add(1);
                    } else {
                        summary.updated = summary.updated.saturating_add(1);
                    }
                    WatchEvent::Updated { old, new }
                }
                None => {
                    summary.added = summary.added.saturating_add(1);
                    WatchEvent::Added(new)
                }
            };
            dispatch(&mut subscribers, &event);
        }

        for key in stale {
            if let Some(old) = self.store.remove(&key) {
                summary.deleted = summary.deleted.saturating_add(1);
                let tombstone = DeletedFinalStateUnknown {
                    key,
                    obj: Some(old),
                };
                dispatch(
                    &mut subscribers,
                    &WatchEvent::Deleted(DeletedObject::Tombstone(tombstone)),
                );
            }
        }

        if !self.synced.swap(true, Ordering::AcqRel) {
            info!(kind = T::KIND, objects = self.store.len(), "Informer cache synced");
        }
        debug!(kind = T::KIND, ?summary, "Cache replaced");
        summary
    }

    /// Re-announce every cached object as an update at its current version.
    pub fn resync(&self) {
        let mut subscribers = self.subscribers.lock();
        let objects = self.store.list();
        debug!(kind = T::KIND, objects = objects.len(), "Resyncing");
        for (_, obj) in objects {
            dispatch(
                &mut subscribers,
                &WatchEvent::Updated {
                    old: Arc::clone(&obj),
                    new: obj,
                },
            );
        }
    }

    /// Mirror `source` until `stop` fires.
    ///
    /// The initial listing is retried with exponential backoff. Returns
    /// `Ok` when stopped, including when stopped before the first listing
    /// succeeded (the informer then never reports synced).
    pub async fn run<S>(&self, source: &S, config: &InformerConfig, stop: CancellationToken) -> Result<()>
    where
        S: ResourceSource<T> + ?Sized,
    {
        if self.running.swap(true, Ordering::AcqRel) {
            return Err(Error::AlreadyRunning {
                kind: T::KIND.to_string(),
            });
        }

        info!(kind = T::KIND, "Starting informer");
        if !self.initial_list(source, config, &stop).await {
            info!(kind = T::KIND, "Informer stopped before initial listing");
            return Ok(());
        }

        let mut relist = periodic(config.relist_period());
        let mut resync = periodic(config.resync_period());
        loop {
            tokio::select! {
                () = stop.cancelled() => break,
                () = next_tick(relist.as_mut()) => {
                    let listed = tokio::select! {
                        () = stop.cancelled() => break,
                        listed = source.list() => listed,
                    };
                    match listed {
                        Ok(items) => {
                            self.replace(items);
                        }
                        Err(e) => warn!(kind = T::KIND, error = %e, "Relist failed, keeping cached state"),
                    }
                }
                () = next_tick(resync.as_mut()) => self.resync(),
            }
        }

        info!(kind = T::KIND, "Informer stopped");
        Ok(())
    }

    /// Returns false if stopped before a listing succeeded.
    async fn initial_list<S>(&self, source: &S, config: &InformerConfig, stop: &CancellationToken) -> bool
    where
        S: ResourceSource<T> + ?Sized,
    {
        let base = Duration::from_millis(config.list_retry_base_ms);
        let max = Duration::from_millis(config.list_retry_max_ms);
        let mut attempt: u32 = 0;

        loop {
            let listed = tokio::select! {
                () = stop.cancelled() => return false,
                listed = source.list() => listed,
            };
            match listed {
                Ok(items) => {
                    self.replace(items);
                    return true;
                }
                Err(e) => {
                    let delay = calculate_backoff(attempt, base, max);
                    warn!(
                        kind = T::KIND,
                        error = %e,
                        attempt,
                        retry_in_ms = ?delay.as_millis(),
                        "Initial listing failed"
                    );
                    attempt = attempt.saturating_add(1);
                    tokio::select! {
                        () = stop.cancelled() => return false,
                        () = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }
}

impl<T: Resource> HasSynced for SharedInformer<T> {
    fn has_synced(&self) -> bool {
        self.synced.load(Ordering::Acquire)
    }
}

/// Send to every live subscriber, forgetting the ones that went away.
fn dispatch<T: Clone>(subscribers: &mut Vec<mpsc::UnboundedSender<WatchEvent<T>>>, event: &WatchEvent<T>) {
    subscribers.retain(|sender| sender.send(event.clone()).is_ok());
}

fn periodic(period: Duration) -> Option<Interval> {
    if period.is_zero() {
        return None;
    }
    let start = Instant::now().checked_add(period)?;
    let mut interval = interval_at(start, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    Some(interval)
}

async fn next_tick(interval: Option<&mut Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}
