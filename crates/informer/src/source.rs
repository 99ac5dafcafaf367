//! Where an informer gets its objects from.

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::error::{Error, Result};
use crate::meta::Resource;

/// A listable collection of resources, e.g. a remote API or a manifest file.
#[async_trait]
pub trait ResourceSource<T>: Send + Sync {
    /// Full listing of the collection as it is now.
    async fn list(&self) -> Result<Vec<T>>;
}

/// In-memory source whose contents are replaced by hand. Can be told to
/// fail, to exercise list retries.
#[derive(Debug, Default)]
pub struct StaticSource<T> {
    items: Mutex<Vec<T>>,
    failures_left: Mutex<u32>,
}

impl<T: Resource> StaticSource<T> {
    /// Create a source serving `items`.
    pub fn new(items: Vec<T>) -> Self {
        Self {
            items: Mutex::new(items),
            failures_left: Mutex::new(0),
        }
    }

    /// Replace the served collection.
    pub fn set(&self, items: Vec<T>) {
        *self.items.lock() = items;
    }

    /// Make the next `count` listings fail.
    pub fn fail_next(&self, count: u32) {
        *self.failures_left.lock() = count;
    }
}

#[async_trait]
impl<T: Resource> ResourceSource<T> for StaticSource<T> {
    async fn list(&self) -> Result<Vec<T>> {
        {
            let mut failures = self.failures_left.lock();
            if *failures > 0 {
                *failures = failures.saturating_sub(1);
                return Err(Error::list_failed(T::KIND, "injected failure"));
            }
        }
        Ok(self.items.lock().clone())
    }
}
