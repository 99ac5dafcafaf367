//! Event adapter: turns informer notifications into queue keys.

use std::marker::PhantomData;
use std::sync::Arc;

use informer::{
    deletion_handling_key, meta_namespace_key, DeletedObject, Resource, ResourceKey, WatchEvent,
    WatchStream,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};
use workqueue::RateLimitingQueue;

use crate::report::{ErrorKind, ErrorReport, ErrorReporter};

/// Enqueues the key of every changed object.
///
/// Handlers never block: key derivation is pure, and the queue only takes
/// its internal lock. A key that cannot be derived is reported and dropped.
pub struct EventHandler<T> {
    controller: Arc<str>,
    queue: RateLimitingQueue<ResourceKey>,
    reporter: Arc<dyn ErrorReporter>,
    _kind: PhantomData<fn() -> T>,
}

impl<T> Clone for EventHandler<T> {
    fn clone(&self) -> Self {
        Self {
            controller: Arc::clone(&self.controller),
            queue: self.queue.clone(),
            reporter: Arc::clone(&self.reporter),
            _kind: PhantomData,
        }
    }
}

impl<T: Resource> EventHandler<T> {
    /// Create an adapter feeding `queue`.
    pub fn new(
        controller: impl Into<Arc<str>>,
        queue: RateLimitingQueue<ResourceKey>,
        reporter: Arc<dyn ErrorReporter>,
    ) -> Self {
        Self {
            controller: controller.into(),
            queue,
            reporter,
            _kind: PhantomData,
        }
    }

    /// An object appeared.
    pub fn on_add(&self, obj: &T) {
        self.enqueue(meta_namespace_key(obj));
    }

    /// An object changed. Notifications at an unchanged resource version,
    /// such as periodic resyncs, are ignored.
    pub fn on_update(&self, old: &T, new: &T) {
        if old.resource_version() == new.resource_version() {
            trace!(
                kind = T::KIND,
                name = %new.meta().name,
                resource_version = new.resource_version(),
                "Skipping update at unchanged resource version"
            );
            return;
        }
        self.enqueue(meta_namespace_key(new));
    }

    /// An object went away; tombstones are handled too.
    pub fn on_delete(&self, deleted: &DeletedObject<T>) {
        match deleted.object() {
            Some(obj) => trace!(
                kind = T::KIND,
                name = %obj.meta().name,
                resource_version = obj.resource_version(),
                tombstone = deleted.is_tombstone(),
                "Object deleted"
            ),
            None => trace!(kind = T::KIND, "Object deleted with unknown final state"),
        }
        self.enqueue(deletion_handling_key(deleted));
    }

    /// Dispatch one event to the matching handler.
    pub fn handle(&self, event: &WatchEvent<T>) {
        match event {
            WatchEvent::Added(obj) => self.on_add(obj),
            WatchEvent::Updated { old, new } => self.on_update(old, new),
            WatchEvent::Deleted(deleted) => self.on_delete(deleted),
        }
    }

    /// Consume `stream` until it ends or `stop` fires.
    pub async fn run(&self, mut stream: WatchStream<T>, stop: CancellationToken) {
        loop {
            tokio::select! {
                () = stop.cancelled() => break,
                event = stream.recv() => match event {
                    Some(event) => self.handle(&event),
                    None => break,
                },
            }
        }
        debug!(controller = %self.controller, kind = T::KIND, "Event handler stopped");
    }

    fn enqueue(&self, key: informer::Result<ResourceKey>) {
        match key {
            Ok(key) => self.queue.add_rate_limited(key),
            Err(e) => self.reporter.report(&ErrorReport {
                controller: &self.controller,
                kind: ErrorKind::KeyDerivation,
                key: None,
                message: &e.to_string(),
            }),
        }
    }
}
