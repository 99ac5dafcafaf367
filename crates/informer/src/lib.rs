//! Local resource cache with change notifications.
//!
//! A [`SharedInformer`] mirrors a [`ResourceSource`] into a [`Store`] and
//! tells every subscriber what changed. Controllers read the cache through a
//! [`Lister`] and turn [`WatchEvent`]s into work queue keys using
//! [`meta_namespace_key`] and [`deletion_handling_key`].
//!
//! # Example
//!
//! ```ignore
//! use informer::{InformerConfig, SharedInformer, StaticSource};
//! use tokio_util::sync::CancellationToken;
//!
//! let informer = SharedInformer::<CronTab>::new();
//! let mut events = informer.subscribe();
//! let source = StaticSource::new(load_crontabs()?);
//!
//! informer.run(&source, &InformerConfig::default(), CancellationToken::new()).await?;
//! ```

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod error;
pub mod event;
pub mod informer;
pub mod key;
pub mod meta;
pub mod source;
pub mod store;

// Re-export main types
pub use error::{Error, Result};
pub use event::{DeletedFinalStateUnknown, DeletedObject, WatchEvent};
pub use informer::{HasSynced, InformerConfig, ReplaceSummary, SharedInformer, WatchStream};
pub use key::{deletion_handling_key, meta_namespace_key, ResourceKey};
pub use meta::{ObjectMeta, Resource};
pub use source::{ResourceSource, StaticSource};
pub use store::{Lister, Store};
