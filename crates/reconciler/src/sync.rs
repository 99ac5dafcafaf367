//! Sync handler contract and the lister-backed implementation.

use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use informer::{Lister, Resource, ResourceKey};
use tracing::{debug, info};

use crate::error::SyncError;

/// Brings one resource in line with its desired state.
///
/// Implementations must be idempotent: the same key is delivered again for
/// duplicate notifications, resyncs and retries.
#[async_trait]
pub trait SyncHandler: Send + Sync {
    async fn sync(&self, key: &ResourceKey) -> Result<(), SyncError>;
}

#[async_trait]
impl<S: SyncHandler + ?Sized> SyncHandler for Arc<S> {
    async fn sync(&self, key: &ResourceKey) -> Result<(), SyncError> {
        (**self).sync(key).await
    }
}

/// Domain-specific reconciliation of a live object snapshot.
#[async_trait]
pub trait Reconcile<T>: Send + Sync {
    async fn reconcile(&self, obj: Arc<T>) -> Result<(), SyncError>;
}

/// Looks the key up in the informer cache and reconciles what it finds.
///
/// A key with no cached object belongs to a resource deleted after it was
/// queued; that counts as success.
pub struct ListerSyncHandler<T, R> {
    lister: Lister<T>,
    reconciler: R,
    _kind: PhantomData<fn() -> T>,
}

impl<T: Resource, R: Reconcile<T>> ListerSyncHandler<T, R> {
    pub fn new(lister: Lister<T>, reconciler: R) -> Self {
        Self {
            lister,
            reconciler,
            _kind: PhantomData,
        }
    }
}

#[async_trait]
impl<T, R> SyncHandler for ListerSyncHandler<T, R>
where
    T: Resource,
    R: Reconcile<T>,
{
    async fn sync(&self, key: &ResourceKey) -> Result<(), SyncError> {
        match self.lister.get_by_key(key) {
            Some(obj) => {
                debug!(kind = T::KIND, key = %key, "Reconciling");
                self.reconciler.reconcile(obj).await
            }
            None => {
                info!(kind = T::KIND, key = %key, "Resource no longer exists");
                Ok(())
            }
        }
    }
}
